//! Module and type reference directive resolution.
//!
//! Resolution never fails with an error: a name that cannot be found yields
//! an unresolved result that still carries every location probed on the way.
//! Those failed lookup locations are what the resolution cache watches.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::trace;

use crate::config::{ModuleResolutionKind, ResolvedCompilerOptions};
use crate::directory_cache::CachedDirectoryStructureHost;
use crate::paths::{normalize_path, to_slash_string};

/// File system queries made while resolving.
pub trait ModuleResolutionHost {
    fn file_exists(&self, path: &Path) -> bool;
    fn directory_exists(&self, path: &Path) -> bool;
    fn read_file(&self, path: &Path) -> Option<String>;
    fn realpath(&self, path: &Path) -> PathBuf;
    fn get_directories(&self, path: &Path) -> Vec<String>;
    fn current_directory(&self) -> PathBuf;
}

impl ModuleResolutionHost for CachedDirectoryStructureHost {
    fn file_exists(&self, path: &Path) -> bool {
        CachedDirectoryStructureHost::file_exists(self, path)
    }

    fn directory_exists(&self, path: &Path) -> bool {
        CachedDirectoryStructureHost::directory_exists(self, path)
    }

    fn read_file(&self, path: &Path) -> Option<String> {
        CachedDirectoryStructureHost::read_file(self, path).ok()
    }

    fn realpath(&self, path: &Path) -> PathBuf {
        CachedDirectoryStructureHost::realpath(self, path)
    }

    fn get_directories(&self, path: &Path) -> Vec<String> {
        CachedDirectoryStructureHost::get_directories(self, path)
    }

    fn current_directory(&self) -> PathBuf {
        self.canonicalizer().current_directory().to_path_buf()
    }
}

/// Module file extensions a resolution can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extension {
    Ts,
    Tsx,
    Dts,
    Js,
    Jsx,
    Json,
}

impl Extension {
    /// Parse extension from file path
    pub fn from_path(path: &Path) -> Option<Self> {
        let text = path.to_string_lossy();
        // Check compound extensions first
        if text.ends_with(".d.ts") {
            return Some(Extension::Dts);
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("ts") => Some(Extension::Ts),
            Some("tsx") => Some(Extension::Tsx),
            Some("js") => Some(Extension::Js),
            Some("jsx") => Some(Extension::Jsx),
            Some("json") => Some(Extension::Json),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Extension::Ts => ".ts",
            Extension::Tsx => ".tsx",
            Extension::Dts => ".d.ts",
            Extension::Js => ".js",
            Extension::Jsx => ".jsx",
            Extension::Json => ".json",
        }
    }
}

/// Result of module resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModuleFull {
    pub resolved_file_name: PathBuf,
    pub extension: Extension,
    /// Found through a `node_modules` lookup.
    pub is_external_library_import: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedModuleWithFailedLookupLocations {
    pub resolved_module: Option<ResolvedModuleFull>,
    /// Every location probed before the answer was found, in probe order.
    pub failed_lookup_locations: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTypeReferenceDirective {
    pub resolved_file_name: PathBuf,
    /// Found in a type root rather than by searching `node_modules`.
    pub primary: bool,
    pub is_external_library_import: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedTypeReferenceDirectiveWithFailedLookupLocations {
    pub resolved_type_reference_directive: Option<ResolvedTypeReferenceDirective>,
    pub failed_lookup_locations: Vec<PathBuf>,
}

/// Common view of module and type reference results used by the cache.
pub trait ResolutionWithFailedLookupLocations {
    fn resolved_file_name(&self) -> Option<&Path>;
    fn failed_lookup_locations(&self) -> &[PathBuf];
}

impl ResolutionWithFailedLookupLocations for ResolvedModuleWithFailedLookupLocations {
    fn resolved_file_name(&self) -> Option<&Path> {
        self.resolved_module
            .as_ref()
            .map(|m| m.resolved_file_name.as_path())
    }

    fn failed_lookup_locations(&self) -> &[PathBuf] {
        &self.failed_lookup_locations
    }
}

impl ResolutionWithFailedLookupLocations for ResolvedTypeReferenceDirectiveWithFailedLookupLocations {
    fn resolved_file_name(&self) -> Option<&Path> {
        self.resolved_type_reference_directive
            .as_ref()
            .map(|d| d.resolved_file_name.as_path())
    }

    fn failed_lookup_locations(&self) -> &[PathBuf] {
        &self.failed_lookup_locations
    }
}

/// The subset of package.json read during resolution
#[derive(Debug, Clone, Default, Deserialize)]
struct PackageJson {
    #[serde(default)]
    typings: Option<String>,
    #[serde(default)]
    types: Option<String>,
    #[serde(default)]
    main: Option<String>,
}

/// Which file kinds one resolution pass accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extensions {
    TypeScript,
    JavaScript,
    Json,
    DeclarationOnly,
}

impl Extensions {
    fn candidates(self) -> &'static [&'static str] {
        match self {
            Extensions::TypeScript => &[".ts", ".tsx", ".d.ts"],
            Extensions::JavaScript => &[".js", ".jsx"],
            Extensions::Json => &[".json"],
            Extensions::DeclarationOnly => &[".d.ts"],
        }
    }

    fn accepts(self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        self.candidates().iter().any(|ext| text.ends_with(ext))
    }

    fn reads_types_fields(self) -> bool {
        matches!(self, Extensions::TypeScript | Extensions::DeclarationOnly)
    }
}

struct ResolutionState<'a> {
    host: &'a dyn ModuleResolutionHost,
    options: &'a ResolvedCompilerOptions,
    failed_lookup_locations: Vec<PathBuf>,
}

impl ResolutionState<'_> {
    fn try_file(&mut self, path: PathBuf, only_record_failures: bool) -> Option<PathBuf> {
        if !only_record_failures && self.host.file_exists(&path) {
            return Some(path);
        }
        self.failed_lookup_locations.push(path);
        None
    }

    fn read_package_json(&mut self, directory: &Path, only_record_failures: bool) -> Option<PackageJson> {
        let package_json_path = directory.join("package.json");
        let directory_exists = !only_record_failures && self.host.directory_exists(directory);
        if directory_exists && self.host.file_exists(&package_json_path) {
            let content = self.host.read_file(&package_json_path).unwrap_or_default();
            return Some(serde_json::from_str(&content).unwrap_or_default());
        }
        self.failed_lookup_locations.push(package_json_path);
        None
    }
}

pub fn is_external_module_name_relative(name: &str) -> bool {
    name.starts_with("./")
        || name.starts_with("../")
        || name == "."
        || name == ".."
        || Path::new(name).has_root()
}

fn append_extension(path: &Path, extension: &str) -> PathBuf {
    let mut text = path.as_os_str().to_os_string();
    text.push(extension);
    PathBuf::from(text)
}

fn strip_extension<'a>(path: &'a Path, extensions: &[&str]) -> Option<&'a str> {
    let text = path.to_str()?;
    extensions
        .iter()
        .find_map(|ext| text.strip_suffix(ext))
}

/// `@scope/name` is published to `@types` as `scope__name`.
pub fn mangle_scoped_package_name(name: &str) -> String {
    match name.strip_prefix('@') {
        Some(rest) if rest.contains('/') => rest.replacen('/', "__", 1),
        _ => name.to_string(),
    }
}

/// Resolve `module_name` imported from `containing_file`.
pub fn resolve_module_name(
    module_name: &str,
    containing_file: &Path,
    options: &ResolvedCompilerOptions,
    host: &dyn ModuleResolutionHost,
) -> ResolvedModuleWithFailedLookupLocations {
    let containing_directory = containing_file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| host.current_directory());
    let mut state = ResolutionState {
        host,
        options,
        failed_lookup_locations: Vec::new(),
    };

    let mut passes = vec![Extensions::TypeScript];
    if options.allow_js {
        passes.push(Extensions::JavaScript);
    }
    if options.resolve_json_module {
        passes.push(Extensions::Json);
    }

    let classic = options.effective_module_resolution() == ModuleResolutionKind::Classic;
    let resolved = passes.into_iter().find_map(|extensions| {
        if classic {
            classic_try_resolve(module_name, &containing_directory, extensions, &mut state)
        } else {
            node_try_resolve(module_name, &containing_directory, extensions, &mut state)
        }
    });

    let resolved_module = resolved.map(|(path, is_external)| {
        let resolved_file_name = if is_external {
            host.realpath(&path)
        } else {
            path
        };
        ResolvedModuleFull {
            extension: Extension::from_path(&resolved_file_name).unwrap_or(Extension::Ts),
            resolved_file_name,
            is_external_library_import: is_external,
        }
    });
    trace!(
        module_name,
        containing_file = %containing_file.display(),
        resolved = ?resolved_module.as_ref().map(|m| to_slash_string(&m.resolved_file_name)),
        failed_lookups = state.failed_lookup_locations.len(),
        "resolved module"
    );
    ResolvedModuleWithFailedLookupLocations {
        resolved_module,
        failed_lookup_locations: state.failed_lookup_locations,
    }
}

fn node_try_resolve(
    module_name: &str,
    containing_directory: &Path,
    extensions: Extensions,
    state: &mut ResolutionState<'_>,
) -> Option<(PathBuf, bool)> {
    if let Some(resolved) =
        try_load_module_using_optional_resolution_settings(module_name, extensions, state)
    {
        return Some((resolved, false));
    }
    if is_external_module_name_relative(module_name) {
        let candidate = normalize_path(&containing_directory.join(module_name));
        return node_load_module_by_relative_name(extensions, &candidate, false, true, state)
            .map(|path| (path, false));
    }
    load_module_from_nearest_node_modules_directory(
        extensions,
        module_name,
        containing_directory,
        false,
        state,
    )
    .map(|path| (path, true))
}

fn classic_try_resolve(
    module_name: &str,
    containing_directory: &Path,
    extensions: Extensions,
    state: &mut ResolutionState<'_>,
) -> Option<(PathBuf, bool)> {
    if let Some(resolved) =
        try_load_module_using_optional_resolution_settings(module_name, extensions, state)
    {
        return Some((resolved, false));
    }
    if is_external_module_name_relative(module_name) {
        let candidate = normalize_path(&containing_directory.join(module_name));
        return load_module_from_file(extensions, &candidate, false, state).map(|path| (path, false));
    }
    for directory in containing_directory.ancestors() {
        let candidate = normalize_path(&directory.join(module_name));
        if let Some(path) = load_module_from_file(extensions, &candidate, false, state) {
            return Some((path, false));
        }
    }
    if extensions == Extensions::TypeScript {
        return load_module_from_nearest_node_modules_directory(
            Extensions::DeclarationOnly,
            module_name,
            containing_directory,
            true,
            state,
        )
        .map(|path| (path, true));
    }
    None
}

/// `paths` substitution, then `baseUrl`, for non-relative names.
fn try_load_module_using_optional_resolution_settings(
    module_name: &str,
    extensions: Extensions,
    state: &mut ResolutionState<'_>,
) -> Option<PathBuf> {
    if is_external_module_name_relative(module_name) {
        return None;
    }
    if let Some(resolved) = try_load_module_using_paths(module_name, extensions, state) {
        return Some(resolved);
    }
    let base_url = state.options.base_url.clone()?;
    let candidate = normalize_path(&base_url.join(module_name));
    let parent_missing = candidate
        .parent()
        .is_none_or(|parent| !state.host.directory_exists(parent));
    node_load_module_by_relative_name(extensions, &candidate, parent_missing, true, state)
}

/// Exact patterns win, then the pattern with the longest prefix; among equal
/// prefixes the first declared pattern wins. Every substitution is probed in
/// order.
fn try_load_module_using_paths(
    module_name: &str,
    extensions: Extensions,
    state: &mut ResolutionState<'_>,
) -> Option<PathBuf> {
    let options = state.options;
    let base = options.paths_base()?.to_path_buf();
    let mut best: Option<(&crate::config::PathMapping, String)> = None;
    for mapping in &options.paths {
        let Some(star_match) = mapping.match_specifier(module_name) else {
            continue;
        };
        if mapping.is_exact() {
            best = Some((mapping, star_match));
            break;
        }
        let better = match &best {
            None => true,
            Some((current, _)) => mapping.prefix.len() > current.prefix.len(),
        };
        if better {
            best = Some((mapping, star_match));
        }
    }
    let (mapping, star_match) = best?;

    for target in &mapping.targets {
        let substituted = mapping.substitute(target, &star_match);
        let candidate = normalize_path(&base.join(substituted));
        // A substitution that already names a supported file is tried as is.
        if Extension::from_path(&candidate).is_some_and(|_| extensions.accepts(&candidate))
            && let Some(found) = state.try_file(candidate.clone(), false)
        {
            return Some(found);
        }
        let parent_missing = candidate
            .parent()
            .is_none_or(|parent| !state.host.directory_exists(parent));
        if let Some(found) =
            node_load_module_by_relative_name(extensions, &candidate, parent_missing, true, state)
        {
            return Some(found);
        }
    }
    None
}

fn node_load_module_by_relative_name(
    extensions: Extensions,
    candidate: &Path,
    mut only_record_failures: bool,
    consider_package_json: bool,
    state: &mut ResolutionState<'_>,
) -> Option<PathBuf> {
    if !only_record_failures
        && candidate
            .parent()
            .is_none_or(|parent| !state.host.directory_exists(parent))
    {
        only_record_failures = true;
    }
    if let Some(found) = load_module_from_file(extensions, candidate, only_record_failures, state) {
        return Some(found);
    }
    if !only_record_failures && !state.host.directory_exists(candidate) {
        only_record_failures = true;
    }
    load_node_module_from_directory(
        extensions,
        candidate,
        only_record_failures,
        consider_package_json,
        state,
    )
}

fn load_module_from_file(
    extensions: Extensions,
    candidate: &Path,
    only_record_failures: bool,
    state: &mut ResolutionState<'_>,
) -> Option<PathBuf> {
    if extensions == Extensions::Json {
        let stem = strip_extension(candidate, &[".json"])?;
        return try_adding_extensions(Path::new(stem), extensions, only_record_failures, state);
    }
    if let Some(found) = try_adding_extensions(candidate, extensions, only_record_failures, state) {
        return Some(found);
    }
    // `./foo.js` may name the source `./foo.ts`.
    let stem = strip_extension(candidate, &[".js", ".jsx"])?;
    try_adding_extensions(Path::new(stem), extensions, only_record_failures, state)
}

fn try_adding_extensions(
    candidate: &Path,
    extensions: Extensions,
    only_record_failures: bool,
    state: &mut ResolutionState<'_>,
) -> Option<PathBuf> {
    extensions
        .candidates()
        .iter()
        .find_map(|ext| state.try_file(append_extension(candidate, ext), only_record_failures))
}

fn load_node_module_from_directory(
    extensions: Extensions,
    candidate: &Path,
    only_record_failures: bool,
    consider_package_json: bool,
    state: &mut ResolutionState<'_>,
) -> Option<PathBuf> {
    if consider_package_json
        && let Some(package_json) = state.read_package_json(candidate, only_record_failures)
    {
        let entry = if extensions.reads_types_fields() {
            package_json
                .typings
                .or(package_json.types)
                .or_else(|| (extensions == Extensions::TypeScript).then_some(package_json.main).flatten())
        } else {
            package_json.main
        };
        if let Some(entry) = entry
            && let Some(found) = load_package_entry(extensions, &candidate.join(entry), state)
        {
            return Some(found);
        }
    }
    load_module_from_file(extensions, &candidate.join("index"), only_record_failures, state)
}

/// A `types`/`main` entry names a file, a file without extension, or a
/// directory with an index.
fn load_package_entry(
    extensions: Extensions,
    entry: &Path,
    state: &mut ResolutionState<'_>,
) -> Option<PathBuf> {
    let entry = normalize_path(entry);
    if extensions.accepts(&entry)
        && let Some(found) = state.try_file(entry.clone(), false)
    {
        return Some(found);
    }
    let next = if extensions == Extensions::DeclarationOnly {
        Extensions::TypeScript
    } else {
        extensions
    };
    let parent_missing = entry
        .parent()
        .is_none_or(|parent| !state.host.directory_exists(parent));
    node_load_module_by_relative_name(next, &entry, parent_missing, false, state)
        .filter(|found| extensions.accepts(found) || next.accepts(found))
}

fn load_module_from_nearest_node_modules_directory(
    extensions: Extensions,
    module_name: &str,
    directory: &Path,
    types_scope_only: bool,
    state: &mut ResolutionState<'_>,
) -> Option<PathBuf> {
    for ancestor in directory.ancestors() {
        if ancestor.file_name().is_some_and(|name| name == "node_modules") {
            continue;
        }
        if let Some(found) = load_module_from_immediate_node_modules_directory(
            extensions,
            module_name,
            ancestor,
            types_scope_only,
            state,
        ) {
            return Some(found);
        }
    }
    None
}

fn load_module_from_immediate_node_modules_directory(
    extensions: Extensions,
    module_name: &str,
    directory: &Path,
    types_scope_only: bool,
    state: &mut ResolutionState<'_>,
) -> Option<PathBuf> {
    let node_modules = directory.join("node_modules");
    let node_modules_exists = state.host.directory_exists(&node_modules);
    if !types_scope_only
        && let Some(found) = load_module_from_specific_node_modules_directory(
            extensions,
            module_name,
            &node_modules,
            node_modules_exists,
            state,
        )
    {
        return Some(found);
    }
    if matches!(extensions, Extensions::TypeScript | Extensions::DeclarationOnly) {
        let at_types = node_modules.join("@types");
        let at_types_exists = node_modules_exists && state.host.directory_exists(&at_types);
        return load_module_from_specific_node_modules_directory(
            Extensions::DeclarationOnly,
            &mangle_scoped_package_name(module_name),
            &at_types,
            at_types_exists,
            state,
        );
    }
    None
}

fn load_module_from_specific_node_modules_directory(
    extensions: Extensions,
    module_name: &str,
    node_directory: &Path,
    node_directory_exists: bool,
    state: &mut ResolutionState<'_>,
) -> Option<PathBuf> {
    let candidate = normalize_path(&node_directory.join(module_name));
    let only_record_failures = !node_directory_exists;
    if let Some(found) = load_module_from_file(extensions, &candidate, only_record_failures, state) {
        return Some(found);
    }
    let candidate_missing = only_record_failures || !state.host.directory_exists(&candidate);
    load_node_module_from_directory(extensions, &candidate, candidate_missing, true, state)
}

/// Type roots: `typeRoots` when set, otherwise every existing
/// `node_modules/@types` from the project directory upwards.
pub fn get_effective_type_roots(
    options: &ResolvedCompilerOptions,
    host: &dyn ModuleResolutionHost,
) -> Vec<PathBuf> {
    if let Some(type_roots) = &options.type_roots {
        return type_roots.clone();
    }
    default_type_root_candidates(options, host)
        .into_iter()
        .filter(|root| host.directory_exists(root))
        .collect()
}

/// Every `node_modules/@types` from the project directory upwards, whether
/// or not it exists.
pub fn default_type_root_candidates(
    options: &ResolvedCompilerOptions,
    host: &dyn ModuleResolutionHost,
) -> Vec<PathBuf> {
    let current_directory = options
        .config_file_path
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| host.current_directory());
    current_directory
        .ancestors()
        .map(|dir| dir.join("node_modules").join("@types"))
        .collect()
}

/// Names of the type packages included without an explicit reference.
pub fn get_automatic_type_directive_names(
    options: &ResolvedCompilerOptions,
    host: &dyn ModuleResolutionHost,
) -> Vec<String> {
    if let Some(types) = &options.types {
        return types.clone();
    }
    let mut names = Vec::new();
    for root in get_effective_type_roots(options, host) {
        if !host.directory_exists(&root) {
            continue;
        }
        let mut directories = host.get_directories(&root);
        directories.sort();
        for name in directories {
            if name.starts_with('.') || names.contains(&name) {
                continue;
            }
            names.push(name);
        }
    }
    names
}

/// Resolve `/// <reference types="name" />` or an automatic type package.
/// Type roots are searched first, then `node_modules` above the containing
/// file.
pub fn resolve_type_reference_directive(
    type_reference_directive_name: &str,
    containing_file: Option<&Path>,
    options: &ResolvedCompilerOptions,
    host: &dyn ModuleResolutionHost,
) -> ResolvedTypeReferenceDirectiveWithFailedLookupLocations {
    let mut state = ResolutionState {
        host,
        options,
        failed_lookup_locations: Vec::new(),
    };

    let mut resolved = None;
    for root in get_effective_type_roots(options, host) {
        let candidate = normalize_path(&root.join(type_reference_directive_name));
        let directory_missing = candidate
            .parent()
            .is_none_or(|parent| !host.directory_exists(parent));
        if let Some(found) = load_node_module_from_directory(
            Extensions::DeclarationOnly,
            &candidate,
            directory_missing,
            true,
            &mut state,
        ) {
            resolved = Some(ResolvedTypeReferenceDirective {
                resolved_file_name: found,
                primary: true,
                is_external_library_import: false,
            });
            break;
        }
    }

    if resolved.is_none()
        && let Some(directory) = containing_file.and_then(Path::parent)
        && let Some(found) = load_module_from_nearest_node_modules_directory(
            Extensions::DeclarationOnly,
            type_reference_directive_name,
            directory,
            false,
            &mut state,
        )
    {
        resolved = Some(ResolvedTypeReferenceDirective {
            resolved_file_name: host.realpath(&found),
            primary: false,
            is_external_library_import: true,
        });
    }

    trace!(
        type_reference_directive_name,
        resolved = ?resolved.as_ref().map(|r| to_slash_string(&r.resolved_file_name)),
        "resolved type reference directive"
    );
    ResolvedTypeReferenceDirectiveWithFailedLookupLocations {
        resolved_type_reference_directive: resolved,
        failed_lookup_locations: state.failed_lookup_locations,
    }
}

#[cfg(test)]
#[path = "tests/module_resolution_tests.rs"]
mod tests;
