use super::*;
use crate::virtual_system::VirtualSystem;
use std::rc::Rc;

fn setup() -> (Rc<VirtualSystem>, CachedDirectoryStructureHost) {
    let sys = Rc::new(VirtualSystem::new("/project"));
    let host = CachedDirectoryStructureHost::new(sys.clone());
    (sys, host)
}

fn resolve(
    host: &CachedDirectoryStructureHost,
    name: &str,
    from: &str,
    options: &ResolvedCompilerOptions,
) -> ResolvedModuleWithFailedLookupLocations {
    resolve_module_name(name, Path::new(from), options, host)
}

fn resolved_name(result: &ResolvedModuleWithFailedLookupLocations) -> Option<String> {
    result
        .resolved_module
        .as_ref()
        .map(|m| to_slash_string(&m.resolved_file_name))
}

fn failed(result: &ResolvedModuleWithFailedLookupLocations) -> Vec<String> {
    result
        .failed_lookup_locations
        .iter()
        .map(|p| to_slash_string(p))
        .collect()
}

#[test]
fn test_relative_import_resolves_with_extension_probing() {
    let (sys, host) = setup();
    sys.write("/project/src/util.tsx", "");
    let result = resolve(&host, "./util", "/project/src/a.ts", &ResolvedCompilerOptions::default());
    assert_eq!(resolved_name(&result).as_deref(), Some("/project/src/util.tsx"));
    assert_eq!(failed(&result), vec!["/project/src/util.ts".to_string()]);
    let module = result.resolved_module.unwrap();
    assert_eq!(module.extension, Extension::Tsx);
    assert!(!module.is_external_library_import);
}

#[test]
fn test_unresolved_relative_import_keeps_failed_lookups() {
    let (_sys, host) = setup();
    let result = resolve(&host, "./b", "/project/a.ts", &ResolvedCompilerOptions::default());
    assert!(result.resolved_module.is_none());
    let failed = failed(&result);
    assert_eq!(
        &failed[..3],
        &[
            "/project/b.ts".to_string(),
            "/project/b.tsx".to_string(),
            "/project/b.d.ts".to_string()
        ]
    );
    assert!(failed.contains(&"/project/b/package.json".to_string()));
    assert!(failed.contains(&"/project/b/index.ts".to_string()));
}

#[test]
fn test_js_extension_maps_to_ts_source() {
    let (sys, host) = setup();
    sys.write("/project/lib.ts", "");
    let result = resolve(&host, "./lib.js", "/project/a.ts", &ResolvedCompilerOptions::default());
    assert_eq!(resolved_name(&result).as_deref(), Some("/project/lib.ts"));
}

#[test]
fn test_directory_with_package_types_and_index() {
    let (sys, host) = setup();
    sys.write("/project/pkg/package.json", r#"{ "types": "./dist/main.d.ts" }"#);
    sys.write("/project/pkg/dist/main.d.ts", "");
    sys.write("/project/dir/index.ts", "");
    let options = ResolvedCompilerOptions::default();
    let result = resolve(&host, "./pkg", "/project/a.ts", &options);
    assert_eq!(resolved_name(&result).as_deref(), Some("/project/pkg/dist/main.d.ts"));
    let result = resolve(&host, "./dir", "/project/a.ts", &options);
    assert_eq!(resolved_name(&result).as_deref(), Some("/project/dir/index.ts"));
    assert!(failed(&result).contains(&"/project/dir/package.json".to_string()));
}

#[test]
fn test_node_modules_ascent_records_each_level() {
    let (sys, host) = setup();
    sys.write("/project/node_modules/lib/index.d.ts", "");
    let result = resolve(&host, "lib", "/project/src/deep/a.ts", &ResolvedCompilerOptions::default());
    assert_eq!(
        resolved_name(&result).as_deref(),
        Some("/project/node_modules/lib/index.d.ts")
    );
    assert!(result.resolved_module.as_ref().unwrap().is_external_library_import);
    let failed = failed(&result);
    assert!(failed.contains(&"/project/src/deep/node_modules/lib.ts".to_string()));
    assert!(failed.contains(&"/project/src/node_modules/@types/lib.d.ts".to_string()));
    assert!(failed.contains(&"/project/node_modules/lib.ts".to_string()));
}

#[test]
fn test_at_types_fallback_with_scoped_name() {
    let (sys, host) = setup();
    sys.write("/project/node_modules/@types/scope__pkg/index.d.ts", "");
    let result = resolve(&host, "@scope/pkg", "/project/a.ts", &ResolvedCompilerOptions::default());
    assert_eq!(
        resolved_name(&result).as_deref(),
        Some("/project/node_modules/@types/scope__pkg/index.d.ts")
    );
}

#[test]
fn test_paths_longest_prefix_and_failed_probes_on_success() {
    let (sys, host) = setup();
    sys.write(
        "/project/tsconfig.json",
        r#"{ "compilerOptions": { "baseUrl": ".", "paths": { "*": ["generic/*"], "@app/*": ["missing/*", "src/app/*"] } } }"#,
    );
    sys.write("/project/src/app/main.ts", "");
    sys.write("/project/generic/@app/main.ts", "");
    let parsed = crate::config::parse_config_file(&host, Path::new("/project/tsconfig.json")).unwrap();

    let result = resolve(&host, "@app/main", "/project/a.ts", &parsed.options);
    assert_eq!(resolved_name(&result).as_deref(), Some("/project/src/app/main.ts"));
    let failed = failed(&result);
    assert!(failed.contains(&"/project/missing/main.ts".to_string()));
    assert!(failed.contains(&"/project/missing/main.d.ts".to_string()));
}

#[test]
fn test_base_url_lookup() {
    let (sys, host) = setup();
    sys.write("/project/src/shared/log.ts", "");
    let options = ResolvedCompilerOptions {
        base_url: Some(PathBuf::from("/project/src")),
        ..ResolvedCompilerOptions::default()
    };
    let result = resolve(&host, "shared/log", "/project/src/app/a.ts", &options);
    assert_eq!(resolved_name(&result).as_deref(), Some("/project/src/shared/log.ts"));
}

#[test]
fn test_js_only_resolved_with_allow_js() {
    let (sys, host) = setup();
    sys.write("/project/legacy.js", "");
    let strict = resolve(&host, "./legacy", "/project/a.ts", &ResolvedCompilerOptions::default());
    assert!(strict.resolved_module.is_none());
    let options = ResolvedCompilerOptions {
        allow_js: true,
        ..ResolvedCompilerOptions::default()
    };
    let result = resolve(&host, "./legacy", "/project/a.ts", &options);
    assert_eq!(resolved_name(&result).as_deref(), Some("/project/legacy.js"));
    assert_eq!(result.resolved_module.unwrap().extension, Extension::Js);
}

#[test]
fn test_classic_resolution_walks_ancestors() {
    let (sys, host) = setup();
    sys.write("/project/shared.ts", "");
    let options = ResolvedCompilerOptions {
        module_resolution: Some(ModuleResolutionKind::Classic),
        ..ResolvedCompilerOptions::default()
    };
    let result = resolve(&host, "shared", "/project/src/a.ts", &options);
    assert_eq!(resolved_name(&result).as_deref(), Some("/project/shared.ts"));
    assert!(failed(&result).contains(&"/project/src/shared.ts".to_string()));
}

#[test]
fn test_type_reference_primary_and_secondary() {
    let (sys, host) = setup();
    sys.write("/project/node_modules/@types/node/index.d.ts", "");
    sys.write("/project/node_modules/extra/index.d.ts", "");
    let options = ResolvedCompilerOptions::default();

    let primary =
        resolve_type_reference_directive("node", Some(Path::new("/project/a.ts")), &options, &host);
    let directive = primary.resolved_type_reference_directive.unwrap();
    assert!(directive.primary);
    assert_eq!(
        to_slash_string(&directive.resolved_file_name),
        "/project/node_modules/@types/node/index.d.ts"
    );

    let secondary =
        resolve_type_reference_directive("extra", Some(Path::new("/project/a.ts")), &options, &host);
    let directive = secondary.resolved_type_reference_directive.unwrap();
    assert!(!directive.primary);
    assert!(
        secondary
            .failed_lookup_locations
            .contains(&PathBuf::from("/project/node_modules/@types/extra/package.json"))
    );

    let missing = resolve_type_reference_directive("nope", None, &options, &host);
    assert!(missing.resolved_type_reference_directive.is_none());
    assert!(!missing.failed_lookup_locations.is_empty());
}

#[test]
fn test_automatic_type_directive_names() {
    let (sys, host) = setup();
    sys.write("/project/node_modules/@types/node/index.d.ts", "");
    sys.write("/project/node_modules/@types/jest/index.d.ts", "");
    sys.mkdir("/project/node_modules/@types/.bin");
    let options = ResolvedCompilerOptions::default();
    assert_eq!(
        get_automatic_type_directive_names(&options, &host),
        vec!["jest".to_string(), "node".to_string()]
    );
    let explicit = ResolvedCompilerOptions {
        types: Some(vec!["node".to_string()]),
        ..ResolvedCompilerOptions::default()
    };
    assert_eq!(get_automatic_type_directive_names(&explicit, &host), vec!["node".to_string()]);
}

#[test]
fn test_mangle_scoped_package_name() {
    assert_eq!(mangle_scoped_package_name("@scope/pkg"), "scope__pkg");
    assert_eq!(mangle_scoped_package_name("lodash"), "lodash");
    assert!(is_external_module_name_relative("../x"));
    assert!(is_external_module_name_relative("/abs"));
    assert!(!is_external_module_name_relative("pkg/sub"));
}
