use super::*;
use crate::config::ResolvedCompilerOptions;
use crate::virtual_system::VirtualSystem;
use crate::watch_options::WatchOptions;

struct Fixture {
    sys: Rc<VirtualSystem>,
    host: Rc<CachedDirectoryStructureHost>,
    factory: WatchFactory,
    cache: SourceFileCache,
}

fn fixture() -> Fixture {
    let sys = Rc::new(VirtualSystem::new("/project"));
    let host = Rc::new(CachedDirectoryStructureHost::new(sys.clone()));
    let factory = WatchFactory::new(sys.clone(), WatchOptions::default());
    let cache = SourceFileCache::new(host.clone());
    Fixture {
        sys,
        host,
        factory,
        cache,
    }
}

impl Fixture {
    fn get(&mut self, file: &str, force: bool) -> Option<Rc<SourceFile>> {
        self.cache.get_or_create_source_file(
            Path::new(file),
            force,
            &mut self.factory,
            &mut |path, err| panic!("unexpected read error for {}: {err}", path.display()),
        )
    }

    fn key(&self, file: &str) -> PathKey {
        self.host.to_path(Path::new(file))
    }

    fn version(&self, file: &str) -> Option<u32> {
        self.cache.get_source_version(&self.key(file))
    }
}

#[test]
fn test_new_file_is_version_one_and_watched() {
    let mut f = fixture();
    f.sys.write("/project/a.ts", "import './b';");
    let file = f.get("/project/a.ts", false).unwrap();
    assert_eq!(file.version, 1);
    assert_eq!(file.module_names(), vec!["./b".to_string()]);
    assert_eq!(f.version("/project/a.ts"), Some(1));
    assert_eq!(f.factory.watcher_count(), 1);
}

#[test]
fn test_present_file_is_returned_without_reading() {
    let mut f = fixture();
    f.sys.write("/project/a.ts", "1");
    let first = f.get("/project/a.ts", false).unwrap();
    f.sys.write("/project/a.ts", "2");
    let second = f.get("/project/a.ts", false).unwrap();
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(second.text, "1");
}

#[test]
fn test_forced_read_bumps_version() {
    let mut f = fixture();
    f.sys.write("/project/a.ts", "1");
    f.get("/project/a.ts", false).unwrap();
    f.sys.write("/project/a.ts", "2");
    let file = f.get("/project/a.ts", true).unwrap();
    assert_eq!(file.version, 2);
    assert_eq!(file.text, "2");
    assert_eq!(f.factory.watcher_count(), 1);
}

#[test]
fn test_change_notification_bumps_once_and_rereads() {
    let mut f = fixture();
    f.sys.write("/project/a.ts", "1");
    f.get("/project/a.ts", false).unwrap();
    f.sys.write("/project/a.ts", "2");
    let key = f.key("/project/a.ts");
    f.cache.next_source_file_version(&key);
    f.cache.next_source_file_version(&key);
    assert_eq!(f.version("/project/a.ts"), Some(2));

    let file = f.get("/project/a.ts", false).unwrap();
    assert_eq!(file.version, 2);
    assert_eq!(file.text, "2");
    assert_eq!(f.version("/project/a.ts"), Some(2));
}

#[test]
fn test_deleted_then_recreated_file_keeps_versions_increasing() {
    let mut f = fixture();
    f.sys.write("/project/a.ts", "1");
    f.get("/project/a.ts", false).unwrap();
    let key = f.key("/project/a.ts");

    f.sys.remove("/project/a.ts");
    f.host.add_or_delete_file_or_directory(Path::new("/project/a.ts"));
    f.cache.next_source_file_version(&key);
    assert!(f.get("/project/a.ts", false).is_none());
    assert!(f.cache.is_missing(&key));
    assert_eq!(f.version("/project/a.ts"), None);
    assert_eq!(f.factory.watcher_count(), 0);

    // Missing entries are trusted until a notification arrives.
    f.sys.write("/project/a.ts", "3");
    f.host.add_or_delete_file_or_directory(Path::new("/project/a.ts"));
    assert!(f.get("/project/a.ts", true).is_none());

    f.cache.next_source_file_version(&key);
    let file = f.get("/project/a.ts", false).unwrap();
    assert_eq!(file.version, 3);
    assert_eq!(f.factory.watcher_count(), 1);
}

#[test]
fn test_absent_file_is_recorded_missing_without_watcher() {
    let mut f = fixture();
    assert!(f.get("/project/none.ts", false).is_none());
    let key = f.key("/project/none.ts");
    assert!(matches!(f.cache.get(&key), Some(HostFileInfo::Missing { version: 1 })));
    assert_eq!(f.factory.watcher_count(), 0);
    f.cache.remove_missing(&key);
    assert!(!f.cache.contains(&key));
}

#[test]
fn test_release_present_file_closes_watcher_and_resolutions() {
    let mut f = fixture();
    f.sys.write("/project/a.ts", "import './x';");
    let file = f.get("/project/a.ts", false).unwrap();
    let mut resolution = ResolutionCache::new(f.host.clone(), Path::new("/project"));
    resolution.resolve_module_names(
        &file.module_names(),
        Path::new("/project/a.ts"),
        &[],
        &ResolvedCompilerOptions::default(),
        &mut f.factory,
    );
    assert_eq!(resolution.resolution_count(), 1);

    f.cache
        .on_release_old_source_file(&file, false, &mut resolution, &mut f.factory);
    assert!(!f.cache.contains(&file.path));
    assert_eq!(resolution.resolution_count(), 0);
    resolution.finish_caching_per_directory_resolution(&mut f.factory);
    assert_eq!(f.factory.watcher_count(), 0);
}

#[test]
fn test_release_of_changed_unread_file_closes_watcher_and_resolutions() {
    let mut f = fixture();
    f.sys.write("/project/a.ts", "import './x';");
    let file = f.get("/project/a.ts", false).unwrap();
    let mut resolution = ResolutionCache::new(f.host.clone(), Path::new("/project"));
    resolution.resolve_module_names(
        &file.module_names(),
        Path::new("/project/a.ts"),
        &[],
        &ResolvedCompilerOptions::default(),
        &mut f.factory,
    );

    f.sys.write("/project/a.ts", "import './x'; export {};");
    f.cache.next_source_file_version(&file.path);
    assert_eq!(f.version("/project/a.ts"), Some(2));

    f.cache
        .on_release_old_source_file(&file, false, &mut resolution, &mut f.factory);
    assert!(!f.cache.contains(&file.path));
    assert_eq!(resolution.resolution_count(), 0);
    resolution.finish_caching_per_directory_resolution(&mut f.factory);
    assert_eq!(f.factory.watcher_count(), 0);
}

#[test]
fn test_release_of_stale_copy_is_ignored() {
    let mut f = fixture();
    f.sys.write("/project/a.ts", "1");
    let old = f.get("/project/a.ts", false).unwrap();
    f.get("/project/a.ts", true).unwrap();
    let mut resolution = ResolutionCache::new(f.host.clone(), Path::new("/project"));
    f.cache
        .on_release_old_source_file(&old, true, &mut resolution, &mut f.factory);
    assert!(f.cache.contains(&old.path));
    assert_eq!(f.factory.watcher_count(), 1);
}

#[test]
fn test_release_of_missing_file_is_deferred() {
    let mut f = fixture();
    f.sys.write("/project/a.ts", "1");
    let file = f.get("/project/a.ts", false).unwrap();
    f.sys.remove("/project/a.ts");
    f.host.add_or_delete_file_or_directory(Path::new("/project/a.ts"));
    f.cache.next_source_file_version(&file.path);
    assert!(f.get("/project/a.ts", false).is_none());

    let mut resolution = ResolutionCache::new(f.host.clone(), Path::new("/project"));
    f.cache
        .on_release_old_source_file(&file, false, &mut resolution, &mut f.factory);
    assert!(f.cache.is_missing(&file.path));

    f.cache.evict_released_missing_files(|path| path == &file.path);
    assert!(f.cache.is_missing(&file.path));

    f.cache
        .on_release_old_source_file(&file, false, &mut resolution, &mut f.factory);
    f.cache.evict_released_missing_files(|_| false);
    assert!(!f.cache.contains(&file.path));
}
