//! Host capabilities consumed by the watch core.
//!
//! Every component receives the host as an `Rc<dyn System>` at construction;
//! nothing in this crate reads ambient process state directly, so several
//! independent watch sessions can live in one process.

use std::cell::{Cell, RefCell};
use std::hash::Hasher;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use rustc_hash::{FxHashMap, FxHasher};
use tracing::{debug, warn};

/// Modified time reported for entries that do not exist.
pub const MISSING_FILE_MODIFIED_TIME: SystemTime = UNIX_EPOCH;

/// Kind of change reported to file watchers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileWatcherEventKind {
    Created,
    Changed,
    Deleted,
}

/// Classify a modified-time transition. `UNIX_EPOCH` stands for "missing".
pub fn get_file_watcher_event_kind(old_time: SystemTime, new_time: SystemTime) -> FileWatcherEventKind {
    if old_time == MISSING_FILE_MODIFIED_TIME {
        FileWatcherEventKind::Created
    } else if new_time == MISSING_FILE_MODIFIED_TIME {
        FileWatcherEventKind::Deleted
    } else {
        FileWatcherEventKind::Changed
    }
}

/// Base names of the entries of one directory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileSystemEntries {
    pub files: Vec<String>,
    pub directories: Vec<String>,
}

/// Handle of a native (OS event based) watch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeWatchId(pub u64);

/// Raw native event names, mirroring what OS notification APIs report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NativeEventKind {
    /// An entry was added, removed or renamed.
    Rename,
    /// Entry content changed.
    Change,
    /// The watch broke; the entry disappeared or became unwatchable.
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeEvent {
    pub id: NativeWatchId,
    pub kind: NativeEventKind,
    /// Absolute path of the entry that changed, when the OS reports one.
    pub path: Option<PathBuf>,
}

/// File system, clock and watch primitives supplied by the embedding CLI or editor.
pub trait System {
    fn use_case_sensitive_file_names(&self) -> bool;

    fn new_line(&self) -> &str {
        "\n"
    }

    fn current_directory(&self) -> PathBuf;

    fn read_file(&self, path: &Path) -> io::Result<String>;

    fn write_file(&self, path: &Path, data: &str, write_byte_order_mark: bool) -> io::Result<()>;

    fn file_exists(&self, path: &Path) -> bool;

    fn directory_exists(&self, path: &Path) -> bool;

    fn create_directory(&self, path: &Path) -> io::Result<()>;

    /// Immediate children of `path`. Unreadable directories yield empty entries.
    fn get_file_system_entries(&self, path: &Path) -> FileSystemEntries;

    /// `None` when the entry does not exist or cannot be stat'ed.
    fn get_modified_time(&self, path: &Path) -> Option<SystemTime>;

    fn realpath(&self, path: &Path) -> PathBuf;

    fn get_environment_variable(&self, name: &str) -> Option<String>;

    /// Stable content fingerprint. Collisions only cause a missed rebuild.
    fn create_hash(&self, data: &str) -> String {
        let mut hasher = FxHasher::default();
        hasher.write(data.as_bytes());
        format!("{:016x}", hasher.finish())
    }

    fn now(&self) -> Instant;

    /// Start a native watch. Errors (handle exhaustion, unsupported platform)
    /// are recovered by the caller through polling.
    fn watch_native(&self, path: &Path, recursive: bool) -> io::Result<NativeWatchId>;

    fn close_native(&self, id: NativeWatchId);

    fn take_native_events(&self) -> Vec<NativeEvent>;

    fn supports_recursive_watch(&self) -> bool;

    /// Block until a native event arrives or `timeout` elapses.
    fn wait_for_events(&self, timeout: Duration);
}

/// Modified time with missing entries mapped to [`MISSING_FILE_MODIFIED_TIME`].
pub fn modified_time_or_missing(system: &dyn System, path: &Path) -> SystemTime {
    system
        .get_modified_time(path)
        .unwrap_or(MISSING_FILE_MODIFIED_TIME)
}

// =============================================================================
// Real host
// =============================================================================

/// Host backed by `std::fs` and `notify`.
pub struct RealSystem {
    current_directory: PathBuf,
    watchers: RefCell<FxHashMap<NativeWatchId, RecommendedWatcher>>,
    next_watch_id: Cell<u64>,
    sender: Sender<NativeEvent>,
    receiver: Receiver<NativeEvent>,
    buffered: RefCell<Vec<NativeEvent>>,
}

impl RealSystem {
    pub fn new(current_directory: PathBuf) -> Self {
        let (sender, receiver) = channel();
        Self {
            current_directory,
            watchers: RefCell::new(FxHashMap::default()),
            next_watch_id: Cell::new(1),
            sender,
            receiver,
            buffered: RefCell::new(Vec::new()),
        }
    }
}

fn native_event_kind(kind: &EventKind) -> Option<NativeEventKind> {
    use notify::event::ModifyKind;
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) => Some(NativeEventKind::Rename),
        EventKind::Modify(ModifyKind::Name(_)) => Some(NativeEventKind::Rename),
        EventKind::Modify(_) | EventKind::Any => Some(NativeEventKind::Change),
        EventKind::Access(_) | EventKind::Other => None,
    }
}

impl System for RealSystem {
    fn use_case_sensitive_file_names(&self) -> bool {
        !cfg!(any(target_os = "windows", target_os = "macos"))
    }

    fn new_line(&self) -> &str {
        if cfg!(windows) { "\r\n" } else { "\n" }
    }

    fn current_directory(&self) -> PathBuf {
        self.current_directory.clone()
    }

    fn read_file(&self, path: &Path) -> io::Result<String> {
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(text.trim_start_matches('\u{feff}').to_string())
    }

    fn write_file(&self, path: &Path, data: &str, write_byte_order_mark: bool) -> io::Result<()> {
        if write_byte_order_mark {
            std::fs::write(path, format!("\u{feff}{data}"))
        } else {
            std::fs::write(path, data)
        }
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn directory_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn create_directory(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn get_file_system_entries(&self, path: &Path) -> FileSystemEntries {
        let mut entries = FileSystemEntries::default();
        let Ok(read_dir) = std::fs::read_dir(path) else {
            return entries;
        };
        for entry in read_dir.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name == "." || name == ".." {
                continue;
            }
            // Follow symlinks so linked directories are listed as directories.
            match std::fs::metadata(entry.path()) {
                Ok(meta) if meta.is_dir() => entries.directories.push(name),
                Ok(meta) if meta.is_file() => entries.files.push(name),
                _ => {}
            }
        }
        entries.files.sort();
        entries.directories.sort();
        entries
    }

    fn get_modified_time(&self, path: &Path) -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
    }

    fn realpath(&self, path: &Path) -> PathBuf {
        std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
    }

    fn get_environment_variable(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn watch_native(&self, path: &Path, recursive: bool) -> io::Result<NativeWatchId> {
        let id = NativeWatchId(self.next_watch_id.get());
        self.next_watch_id.set(id.0 + 1);

        let sender = self.sender.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let events: Vec<NativeEvent> = match res {
                Ok(event) => {
                    let Some(kind) = native_event_kind(&event.kind) else {
                        return;
                    };
                    if event.paths.is_empty() {
                        vec![NativeEvent { id, kind, path: None }]
                    } else {
                        event
                            .paths
                            .into_iter()
                            .map(|path| NativeEvent {
                                id,
                                kind,
                                path: Some(path),
                            })
                            .collect()
                    }
                }
                Err(_) => vec![NativeEvent {
                    id,
                    kind: NativeEventKind::Error,
                    path: None,
                }],
            };
            for event in events {
                // The receiver only goes away with the host.
                let _ = sender.send(event);
            }
        })
        .map_err(|err| io::Error::other(err.to_string()))?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(path, mode)
            .map_err(|err| io::Error::other(err.to_string()))?;
        debug!(path = %path.display(), recursive, id = id.0, "native watch started");
        self.watchers.borrow_mut().insert(id, watcher);
        Ok(id)
    }

    fn close_native(&self, id: NativeWatchId) {
        if self.watchers.borrow_mut().remove(&id).is_none() {
            warn!(id = id.0, "closing unknown native watch");
        }
    }

    fn take_native_events(&self) -> Vec<NativeEvent> {
        let mut events = std::mem::take(&mut *self.buffered.borrow_mut());
        events.extend(self.receiver.try_iter());
        let live = self.watchers.borrow();
        events.retain(|event| live.contains_key(&event.id));
        events
    }

    fn supports_recursive_watch(&self) -> bool {
        cfg!(any(target_os = "macos", target_os = "windows"))
    }

    fn wait_for_events(&self, timeout: Duration) {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => self.buffered.borrow_mut().push(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
        }
    }
}
