use super::*;
use crate::virtual_system::VirtualSystem;

const NATIVE: FsWatchMode = FsWatchMode::Native {
    fallback: PollingStrategy::DynamicPriority,
};

fn setup() -> (Rc<VirtualSystem>, FsWatchManager) {
    let sys = Rc::new(VirtualSystem::new("/project"));
    let manager = FsWatchManager::new(sys.clone());
    (sys, manager)
}

fn watch_file(manager: &mut FsWatchManager, path: &str) -> FsWatchId {
    manager.watch(
        Path::new(path),
        FileSystemEntryKind::File,
        false,
        NATIVE,
        PollingInterval::Low,
    )
}

fn step(sys: &VirtualSystem, manager: &mut FsWatchManager) -> Vec<FsEvent> {
    sys.advance(PollingInterval::Low.duration());
    manager.process(sys.now())
}

#[test]
fn test_present_file_uses_native_events() {
    let (sys, mut manager) = setup();
    sys.write("/project/a.ts", "1");
    let id = watch_file(&mut manager, "/project/a.ts");
    assert!(manager.is_native(id));
    assert_eq!(manager.kind_of(id), Some(FileSystemEntryKind::File));

    sys.write("/project/a.ts", "2");
    let events = manager.process(sys.now());
    assert_eq!(
        events,
        vec![FsEvent {
            id,
            kind: FsEventKind::Change,
            path: PathBuf::from("/project/a.ts"),
        }]
    );
}

#[test]
fn test_missing_file_is_polled_until_created() {
    let (sys, mut manager) = setup();
    let id = watch_file(&mut manager, "/project/b.ts");
    assert!(manager.is_missing(id));
    assert_eq!(sys.native_watch_count(), 0);

    assert!(step(&sys, &mut manager).is_empty());

    sys.write("/project/b.ts", "");
    let events = step(&sys, &mut manager);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, FsEventKind::Rename);
    assert!(manager.is_native(id));
    assert!(sys.is_natively_watched("/project/b.ts"));
}

#[test]
fn test_deleted_file_falls_back_to_missing_and_recovers() {
    let (sys, mut manager) = setup();
    sys.write("/project/a.ts", "1");
    let id = watch_file(&mut manager, "/project/a.ts");

    sys.remove("/project/a.ts");
    let events = manager.process(sys.now());
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e.kind == FsEventKind::Rename));
    assert!(manager.is_missing(id));
    assert_eq!(sys.native_watch_count(), 0);

    sys.write("/project/a.ts", "again");
    let events = step(&sys, &mut manager);
    assert_eq!(events.len(), 1);
    assert!(manager.is_native(id));
}

#[test]
fn test_renamed_file_falls_back_to_missing_while_handle_lives() {
    let (sys, mut manager) = setup();
    sys.write("/project/a.ts", "1");
    let id = watch_file(&mut manager, "/project/a.ts");
    assert!(manager.is_native(id));

    sys.rename("/project/a.ts", "/project/moved.ts");
    let events = manager.process(sys.now());
    assert_eq!(
        events,
        vec![FsEvent {
            id,
            kind: FsEventKind::Rename,
            path: PathBuf::from("/project/a.ts"),
        }]
    );
    assert!(manager.is_missing(id));
    assert_eq!(sys.native_watch_count(), 0);

    sys.rename("/project/moved.ts", "/project/a.ts");
    let events = step(&sys, &mut manager);
    assert_eq!(events.len(), 1);
    assert!(manager.is_native(id));
    assert!(sys.is_natively_watched("/project/a.ts"));
}

#[test]
fn test_replaced_file_keeps_native_watch() {
    let (sys, mut manager) = setup();
    sys.write("/project/a.ts", "1");
    sys.write("/project/a.ts.tmp", "2");
    let id = watch_file(&mut manager, "/project/a.ts");

    sys.rename("/project/a.ts.tmp", "/project/a.ts");
    let events = manager.process(sys.now());
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, FsEventKind::Rename);
    assert!(manager.is_native(id));
}

#[test]
fn test_native_failure_recovers_through_polling() {
    let (sys, mut manager) = setup();
    sys.set_native_watching(false);
    sys.write("/project/a.ts", "1");
    let id = watch_file(&mut manager, "/project/a.ts");
    assert!(!manager.is_native(id));
    assert!(!manager.is_missing(id));

    sys.write("/project/a.ts", "2");
    let events = step(&sys, &mut manager);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, FsEventKind::Change);

    sys.remove("/project/a.ts");
    let events = step(&sys, &mut manager);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, FsEventKind::Rename);
    assert!(manager.is_missing(id));
}

#[test]
fn test_watch_limit_switches_remaining_entries_to_polling() {
    let (sys, mut manager) = setup();
    sys.write("/project/a.ts", "1");
    sys.write("/project/b.ts", "1");
    sys.write("/project/c.ts", "1");
    sys.set_native_watch_budget(Some(1));

    let a = watch_file(&mut manager, "/project/a.ts");
    let b = watch_file(&mut manager, "/project/b.ts");
    sys.set_native_watch_budget(None);
    let c = watch_file(&mut manager, "/project/c.ts");

    assert!(manager.is_native(a));
    assert!(!manager.is_native(b));
    assert!(!manager.is_native(c));
}

#[test]
fn test_directory_events_carry_changed_entry() {
    let (sys, mut manager) = setup();
    let id = manager.watch(
        Path::new("/project/src"),
        FileSystemEntryKind::Directory,
        false,
        NATIVE,
        PollingInterval::Medium,
    );
    assert!(manager.is_missing(id));

    sys.mkdir("/project/src");
    sys.advance(PollingInterval::Medium.duration());
    let events = manager.process(sys.now());
    assert_eq!(events.len(), 1);
    assert!(manager.is_native(id));

    sys.write("/project/src/new.ts", "");
    let events = manager.process(sys.now());
    assert!(events.contains(&FsEvent {
        id,
        kind: FsEventKind::Rename,
        path: PathBuf::from("/project/src/new.ts"),
    }));
}

#[test]
fn test_polling_mode_never_uses_native_watches() {
    let (sys, mut manager) = setup();
    sys.mkdir("/project/src");
    let id = manager.watch(
        Path::new("/project/src"),
        FileSystemEntryKind::Directory,
        false,
        FsWatchMode::Polling(PollingStrategy::DynamicPriority),
        PollingInterval::Low,
    );
    assert!(!manager.is_native(id));
    assert_eq!(sys.native_watch_count(), 0);

    sys.write("/project/src/a.ts", "");
    let events = step(&sys, &mut manager);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].path, PathBuf::from("/project/src"));
}

#[test]
fn test_close_releases_native_watch() {
    let (sys, mut manager) = setup();
    sys.write("/project/a.ts", "1");
    let id = watch_file(&mut manager, "/project/a.ts");
    sys.write("/project/a.ts", "2");
    manager.close(id);
    assert_eq!(sys.native_watch_count(), 0);
    assert!(manager.is_empty());
    assert!(manager.process(sys.now()).is_empty());
}
