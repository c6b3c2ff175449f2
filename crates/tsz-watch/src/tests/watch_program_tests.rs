use super::*;
use crate::paths::Canonicalizer;
use crate::virtual_system::VirtualSystem;
use std::cell::RefCell;

#[derive(Default)]
struct Log {
    statuses: Vec<(u32, Option<usize>)>,
    diagnostics: Vec<Diagnostic>,
    builds: usize,
}

struct RecordingReporter(Rc<RefCell<Log>>);

impl WatchReporter for RecordingReporter {
    fn report_diagnostic(&mut self, diagnostic: &Diagnostic) {
        self.0.borrow_mut().diagnostics.push(diagnostic.clone());
    }

    fn on_watch_status_change(
        &mut self,
        diagnostic: &Diagnostic,
        _new_line: &str,
        _options: &ResolvedCompilerOptions,
        error_count: Option<usize>,
    ) {
        self.0
            .borrow_mut()
            .statuses
            .push((diagnostic.code, error_count));
    }

    fn after_program_create(&mut self, _program: &Program, _emit_result: &EmitResult) {
        self.0.borrow_mut().builds += 1;
    }
}

fn start(sys: &Rc<VirtualSystem>, options: WatchProgramOptions) -> (WatchProgram, Rc<RefCell<Log>>) {
    let log = Rc::new(RefCell::new(Log::default()));
    let watch = WatchProgram::new(
        sys.clone(),
        options,
        Box::new(RecordingReporter(Rc::clone(&log))),
    );
    (watch, log)
}

fn with_config() -> WatchProgramOptions {
    WatchProgramOptions {
        config_file_name: Some(PathBuf::from("/project/tsconfig.json")),
        ..WatchProgramOptions::default()
    }
}

/// Advance the clock in 50 ms steps, ticking after each one.
fn wait(sys: &VirtualSystem, watch: &mut WatchProgram, duration: Duration) {
    let step = Duration::from_millis(50);
    let mut elapsed = Duration::ZERO;
    while elapsed < duration {
        sys.advance(step);
        watch.tick(sys.now());
        elapsed += step;
    }
}

/// Long enough for missing file polls and the debounce timer.
fn settle(sys: &VirtualSystem, watch: &mut WatchProgram) {
    wait(sys, watch, Duration::from_millis(1500));
}

fn program_files(watch: &WatchProgram) -> Vec<String> {
    watch
        .get_current_program()
        .map(|program| {
            program
                .source_files()
                .iter()
                .map(|file| to_slash_string(&file.file_name))
                .collect()
        })
        .unwrap_or_default()
}

fn codes(diagnostics: &[Diagnostic]) -> Vec<u32> {
    diagnostics.iter().map(|d| d.code).collect()
}

#[test]
fn test_initial_build_reports_status() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.write("/project/tsconfig.json", "{}");
    sys.write("/project/a.ts", "export const a = 1;");
    let (watch, log) = start(&sys, with_config());

    assert_eq!(program_files(&watch), vec!["/project/a.ts"]);
    let log = log.borrow();
    assert_eq!(log.statuses, vec![(6031, None), (6194, Some(0))]);
    assert_eq!(log.builds, 1);
    assert!(log.diagnostics.is_empty());
}

#[test]
fn test_burst_of_changes_builds_once() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.write("/project/tsconfig.json", "{}");
    sys.write("/project/a.ts", "export const a = 1;");
    let (mut watch, log) = start(&sys, with_config());

    for text in ["export const a = 2;", "export const a = 3;", "export const a = 4;"] {
        sys.write("/project/a.ts", text);
        wait(&sys, &mut watch, Duration::from_millis(100));
    }
    assert!(watch.has_pending_update());
    assert_eq!(log.borrow().builds, 1);

    wait(&sys, &mut watch, Duration::from_millis(300));
    assert!(!watch.has_pending_update());
    let log = log.borrow();
    assert_eq!(log.builds, 2);
    let change_detected = log.statuses.iter().filter(|(code, _)| *code == 6032).count();
    assert_eq!(change_detected, 1);
    let program = watch.get_current_program().unwrap();
    assert_eq!(program.source_files()[0].text, "export const a = 4;");
}

#[test]
fn test_source_versions_only_move_forward() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.write("/project/tsconfig.json", "{}");
    sys.write("/project/a.ts", "1");
    let (mut watch, _log) = start(&sys, with_config());
    let a = Path::new("/project/a.ts");

    let first = watch.get_source_version(a).unwrap();
    sys.write("/project/a.ts", "2");
    watch.tick(sys.now());
    let bumped = watch.get_source_version(a).unwrap();
    assert!(bumped > first);

    settle(&sys, &mut watch);
    let read = watch.get_source_version(a).unwrap();
    assert!(read >= bumped);

    sys.write("/project/a.ts", "3");
    settle(&sys, &mut watch);
    assert!(watch.get_source_version(a).unwrap() > read);
}

#[test]
fn test_creating_imported_file_fixes_unresolved_import() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.write("/project/tsconfig.json", r#"{ "files": ["a.ts"] }"#);
    sys.write("/project/a.ts", "import { b } from './b';");
    let (mut watch, log) = start(&sys, with_config());
    assert_eq!(codes(&log.borrow().diagnostics), vec![2307]);
    assert_eq!(log.borrow().statuses.last(), Some(&(6193, Some(1))));

    sys.write("/project/b.ts", "export const b = 1;");
    settle(&sys, &mut watch);

    assert_eq!(program_files(&watch), vec!["/project/a.ts", "/project/b.ts"]);
    assert_eq!(log.borrow().statuses.last(), Some(&(6194, Some(0))));
}

#[test]
fn test_deleting_shared_module_reports_each_importer() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.write("/project/tsconfig.json", r#"{ "include": ["src"] }"#);
    sys.write("/project/src/a.ts", "import { lib } from './lib';");
    sys.write("/project/src/b.ts", "import { lib } from './lib';");
    sys.write("/project/src/lib.ts", "export const lib = 1;");
    let (mut watch, log) = start(&sys, with_config());
    assert_eq!(program_files(&watch).len(), 3);
    log.borrow_mut().diagnostics.clear();

    sys.remove("/project/src/lib.ts");
    settle(&sys, &mut watch);

    assert_eq!(
        program_files(&watch),
        vec!["/project/src/a.ts", "/project/src/b.ts"]
    );
    let log = log.borrow();
    assert_eq!(codes(&log.diagnostics), vec![2307, 2307]);
    assert_eq!(log.statuses.last(), Some(&(6194, Some(2))));
}

#[test]
fn test_unrelated_option_change_keeps_resolutions() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.write("/project/tsconfig.json", r#"{ "compilerOptions": { "strict": false } }"#);
    sys.write("/project/a.ts", "import { b } from './b';");
    sys.write("/project/b.ts", "export const b = 1;");
    let (mut watch, _log) = start(&sys, with_config());
    let a = watch.directory_structure_host().to_path(Path::new("/project/a.ts"));
    let before = watch.get_current_program().unwrap();
    let before_resolution = Rc::clone(&before.resolved_modules(&a)[0].1);

    sys.write("/project/tsconfig.json", r#"{ "compilerOptions": { "strict": true } }"#);
    watch.tick(sys.now());
    assert_eq!(watch.reload_level(), ReloadLevel::Full);
    settle(&sys, &mut watch);

    let after = watch.get_current_program().unwrap();
    assert!(after.options().strict);
    assert!(Rc::ptr_eq(&after.resolved_modules(&a)[0].1, &before_resolution));
    assert!(
        watch
            .directory_structure_host()
            .is_listing_cached(Path::new("/project"))
    );
    assert_eq!(watch.reload_level(), ReloadLevel::None);
}

#[test]
fn test_paths_change_re_resolves_unchanged_files() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.write(
        "/project/tsconfig.json",
        r#"{ "compilerOptions": { "baseUrl": ".", "paths": { "lib": ["a/lib"] } }, "files": ["main.ts"] }"#,
    );
    sys.write("/project/main.ts", "import { v } from 'lib';");
    sys.write("/project/a/lib.ts", "export const v = 1;");
    sys.write("/project/b/lib.ts", "export const v = 2;");
    let (mut watch, log) = start(&sys, with_config());
    assert_eq!(program_files(&watch), vec!["/project/main.ts", "/project/a/lib.ts"]);

    sys.write(
        "/project/tsconfig.json",
        r#"{ "compilerOptions": { "baseUrl": ".", "paths": { "lib": ["b/lib"] } }, "files": ["main.ts"] }"#,
    );
    settle(&sys, &mut watch);

    assert_eq!(program_files(&watch), vec!["/project/main.ts", "/project/b/lib.ts"]);
    assert!(log.borrow().diagnostics.is_empty());
}

#[test]
fn test_dropping_all_imports_releases_resolutions() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.write("/project/tsconfig.json", r#"{ "files": ["a.ts"] }"#);
    sys.write("/project/a.ts", "import './missing';");
    let (mut watch, _log) = start(&sys, with_config());
    assert_eq!(watch.resolution_cache().resolution_count(), 1);
    assert!(watch.resolution_cache().failed_lookup_directory_watch_count() > 0);

    sys.write("/project/a.ts", "export {};");
    settle(&sys, &mut watch);

    assert_eq!(program_files(&watch), vec!["/project/a.ts"]);
    assert_eq!(watch.resolution_cache().resolution_count(), 0);
    assert_eq!(watch.resolution_cache().failed_lookup_directory_watch_count(), 0);
}

#[test]
fn test_file_changed_and_dropped_in_one_update_is_released() {
    let fresh = Rc::new(VirtualSystem::new("/project"));
    fresh.write("/project/tsconfig.json", r#"{ "files": ["a.ts"] }"#);
    fresh.write("/project/a.ts", "export {};");
    let (baseline, _log) = start(&fresh, with_config());

    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.write("/project/tsconfig.json", r#"{ "files": ["a.ts"] }"#);
    sys.write("/project/a.ts", "import './b';");
    sys.write("/project/b.ts", "import './c';");
    sys.write("/project/c.ts", "export {};");
    let (mut watch, log) = start(&sys, with_config());
    assert_eq!(
        program_files(&watch),
        vec!["/project/a.ts", "/project/b.ts", "/project/c.ts"]
    );

    // b changes on disk in the same window that a stops importing it.
    sys.write("/project/b.ts", "import './c'; export const b = 1;");
    sys.write("/project/a.ts", "export {};");
    settle(&sys, &mut watch);

    assert_eq!(log.borrow().builds, 2);
    assert_eq!(program_files(&watch), vec!["/project/a.ts"]);
    assert_eq!(watch.get_source_version(Path::new("/project/b.ts")), None);
    assert_eq!(watch.resolution_cache().resolution_count(), 0);
    assert_eq!(watch.watcher_count(), baseline.watcher_count());
    assert_eq!(sys.native_watch_count(), fresh.native_watch_count());
}

#[test]
fn test_wildcard_directory_diff_is_idempotent() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.mkdir("/project/src");
    sys.mkdir("/project/lib");
    let canonicalizer = Canonicalizer::new("/project", true);
    let mut factory = WatchFactory::new(sys.clone(), WatchOptions::default());
    let mut existing = BTreeMap::new();
    let mut directories = BTreeMap::from([
        (PathBuf::from("/project/src"), true),
        (PathBuf::from("/project/lib"), false),
    ]);

    update_watching_wildcard_directories(&mut existing, &directories, |d| canonicalizer.to_path(d), &mut factory);
    let first = existing.clone();
    let count = factory.watcher_count();
    update_watching_wildcard_directories(&mut existing, &directories, |d| canonicalizer.to_path(d), &mut factory);
    assert_eq!(existing, first);
    assert_eq!(factory.watcher_count(), count);

    directories.insert(PathBuf::from("/project/lib"), true);
    directories.remove(Path::new("/project/src"));
    update_watching_wildcard_directories(&mut existing, &directories, |d| canonicalizer.to_path(d), &mut factory);
    let lib = canonicalizer.to_path(Path::new("/project/lib"));
    assert_eq!(existing.len(), 1);
    assert!(existing[&lib].recursive);
    assert_ne!(existing[&lib].watcher, first[&lib].watcher);
    assert!(!factory.is_open(first[&lib].watcher));
}

#[test]
fn test_new_root_file_triggers_partial_reload() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.write("/project/tsconfig.json", r#"{ "include": ["src"] }"#);
    sys.write("/project/src/a.ts", "export {};");
    let (mut watch, log) = start(&sys, with_config());
    let watcher = watch.wildcard_directory_watcher(Path::new("/project/src"));
    assert!(watcher.is_some_and(|w| w.recursive));

    sys.write("/project/src/readme.md", "# notes");
    watch.tick(sys.now());
    assert!(!watch.has_pending_update());
    assert_eq!(watch.reload_level(), ReloadLevel::None);

    sys.write("/project/src/b.ts", "export {};");
    watch.tick(sys.now());
    assert_eq!(watch.reload_level(), ReloadLevel::Partial);
    settle(&sys, &mut watch);

    assert_eq!(
        program_files(&watch),
        vec!["/project/src/a.ts", "/project/src/b.ts"]
    );
    assert_eq!(watch.reload_level(), ReloadLevel::None);
    assert_eq!(watch.wildcard_directory_watcher(Path::new("/project/src")), watcher);
    assert_eq!(log.borrow().builds, 2);
}

#[test]
fn test_emptied_include_reports_no_inputs() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.write("/project/tsconfig.json", r#"{ "include": ["src"] }"#);
    sys.write("/project/src/a.ts", "export {};");
    let (mut watch, log) = start(&sys, with_config());
    log.borrow_mut().diagnostics.clear();

    sys.remove("/project/src/a.ts");
    settle(&sys, &mut watch);
    assert!(program_files(&watch).is_empty());
    assert_eq!(codes(&log.borrow().diagnostics), vec![18003]);
}

#[test]
fn test_broken_config_keeps_previous_program() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.write("/project/tsconfig.json", "{}");
    sys.write("/project/a.ts", "export {};");
    let (mut watch, log) = start(&sys, with_config());
    let before = watch.get_current_program().unwrap();

    sys.write("/project/tsconfig.json", "{ \"compilerOptions\": ");
    settle(&sys, &mut watch);
    {
        let log = log.borrow();
        assert_eq!(codes(&log.diagnostics), vec![5014]);
        assert_eq!(log.statuses.last(), Some(&(6193, Some(1))));
        assert_eq!(log.builds, 1);
    }
    assert!(Rc::ptr_eq(&watch.get_current_program().unwrap(), &before));

    sys.write("/project/tsconfig.json", r#"{ "compilerOptions": { "strict": true } }"#);
    settle(&sys, &mut watch);
    assert!(watch.get_current_program().unwrap().options().strict);
    assert_eq!(log.borrow().statuses.last(), Some(&(6194, Some(0))));
}

#[test]
fn test_missing_config_is_reported_on_first_build() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    let (watch, log) = start(&sys, with_config());
    assert!(program_files(&watch).is_empty());
    let log = log.borrow();
    assert_eq!(codes(&log.diagnostics), vec![5083]);
    assert_eq!(log.statuses.last(), Some(&(6193, Some(1))));
}

#[test]
fn test_extended_config_change_reloads() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.write("/project/base.json", r#"{ "compilerOptions": { "strict": false } }"#);
    sys.write("/project/tsconfig.json", r#"{ "extends": "./base.json" }"#);
    sys.write("/project/a.ts", "export {};");
    let (mut watch, _log) = start(&sys, with_config());
    assert!(!watch.compiler_options().strict);

    sys.write("/project/base.json", r#"{ "compilerOptions": { "strict": true } }"#);
    settle(&sys, &mut watch);
    assert!(watch.compiler_options().strict);
    assert!(watch.get_current_program().unwrap().options().strict);
}

#[test]
fn test_update_root_file_names() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.write("/project/a.ts", "export {};");
    sys.write("/project/b.ts", "export {};");
    let options = WatchProgramOptions {
        root_file_names: vec![PathBuf::from("a.ts")],
        ..WatchProgramOptions::default()
    };
    let (mut watch, _log) = start(&sys, options);
    assert_eq!(program_files(&watch), vec!["/project/a.ts"]);

    watch
        .update_root_file_names(&[PathBuf::from("a.ts"), PathBuf::from("/project/b.ts")])
        .unwrap();
    assert!(watch.has_pending_update());
    let program = watch.get_program().unwrap();
    assert_eq!(program.source_files().len(), 2);
    assert!(!watch.has_pending_update());

    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.write("/project/tsconfig.json", "{}");
    let (mut configured, _log) = start(&sys, with_config());
    assert!(configured.update_root_file_names(&[]).is_err());
}

#[test]
fn test_missing_root_is_watched_until_created() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    let options = WatchProgramOptions {
        root_file_names: vec![PathBuf::from("/project/a.ts")],
        ..WatchProgramOptions::default()
    };
    let (mut watch, log) = start(&sys, options);
    assert_eq!(codes(&log.borrow().diagnostics), vec![6053]);
    assert!(watch.is_watching_missing_file(Path::new("/project/a.ts")));

    sys.write("/project/a.ts", "export {};");
    settle(&sys, &mut watch);
    assert_eq!(program_files(&watch), vec!["/project/a.ts"]);
    assert!(!watch.is_watching_missing_file(Path::new("/project/a.ts")));
}

#[test]
fn test_new_type_root_package_is_picked_up() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.mkdir("/project/node_modules/@types");
    sys.write("/project/tsconfig.json", "{}");
    sys.write("/project/a.ts", "export {};");
    let (mut watch, _log) = start(&sys, with_config());
    assert_eq!(watch.resolution_cache().type_roots_watch_count(), 1);
    assert!(
        watch
            .get_current_program()
            .unwrap()
            .automatic_type_directive_names()
            .is_empty()
    );

    sys.write("/project/node_modules/@types/node/index.d.ts", "");
    settle(&sys, &mut watch);
    let program = watch.get_current_program().unwrap();
    assert_eq!(program.automatic_type_directive_names(), &["node".to_string()]);
    assert_eq!(program.source_files().len(), 2);
}

#[test]
fn test_close_releases_every_watcher() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.write("/project/tsconfig.json", "{}");
    sys.write("/project/a.ts", "import './missing';");
    let (mut watch, log) = start(&sys, with_config());
    assert!(watch.watcher_count() > 0);
    assert!(sys.native_watch_count() > 0);

    watch.close();
    assert!(watch.is_closed());
    assert_eq!(watch.watcher_count(), 0);
    assert_eq!(sys.native_watch_count(), 0);

    sys.write("/project/a.ts", "export {};");
    assert!(!watch.tick(sys.now()));
    assert_eq!(log.borrow().builds, 1);
}

#[test]
fn test_run_until_stops_on_predicate() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.write("/project/tsconfig.json", "{}");
    sys.write("/project/a.ts", "1");
    let (mut watch, log) = start(&sys, with_config());

    sys.write("/project/a.ts", "2");
    let observed = Rc::clone(&log);
    watch.run_until(|_| observed.borrow().builds == 2);
    assert_eq!(log.borrow().builds, 2);
    assert!(!watch.has_pending_update());
}
