//! Native file system watching with polling fallback.
//!
//! Every entry is either *present* (watched natively, or polled when native
//! watching is unavailable) or *missing* (polled until it appears). Native
//! errors and observed deletions move an entry to missing; a poll that sees
//! the entry created moves it back to present.

use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::polling::{PollingInterval, PollingStrategy, PollingWatchId, PollingWatchers};
use crate::system::{FileWatcherEventKind, NativeEventKind, NativeWatchId, System};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileSystemEntryKind {
    File,
    Directory,
}

/// Whether an entry should try OS notifications at all, and how it is
/// polled when it does not.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FsWatchMode {
    Native { fallback: PollingStrategy },
    Polling(PollingStrategy),
}

impl FsWatchMode {
    fn polling_strategy(self) -> PollingStrategy {
        match self {
            FsWatchMode::Native { fallback } => fallback,
            FsWatchMode::Polling(strategy) => strategy,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FsWatchId(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsEventKind {
    Rename,
    Change,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FsEvent {
    pub id: FsWatchId,
    pub kind: FsEventKind,
    /// Entry that changed; the watched path itself when the source does not say.
    pub path: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WatchState {
    Native(NativeWatchId),
    /// Present, but polled.
    Polling(PollingWatchId),
    Missing(PollingWatchId),
}

#[derive(Debug)]
struct Entry {
    path: PathBuf,
    kind: FileSystemEntryKind,
    recursive: bool,
    mode: FsWatchMode,
    fallback_interval: PollingInterval,
    state: WatchState,
}

pub struct FsWatchManager {
    system: Rc<dyn System>,
    polling: PollingWatchers,
    entries: FxHashMap<FsWatchId, Entry>,
    by_native: FxHashMap<NativeWatchId, FsWatchId>,
    by_polling: FxHashMap<PollingWatchId, FsWatchId>,
    /// Set once the host ran out of native watch handles; later entries poll.
    hit_system_watcher_limit: bool,
    next_id: u32,
}

/// Errors that mean no further native watches can be created.
fn is_watch_limit_error(err: &io::Error) -> bool {
    if err.raw_os_error() == Some(28) {
        return true;
    }
    let message = err.to_string();
    message.contains("ENOSPC") || message.contains("watch limit")
}

fn entry_exists(system: &dyn System, path: &Path, kind: FileSystemEntryKind) -> bool {
    match kind {
        FileSystemEntryKind::File => system.file_exists(path),
        FileSystemEntryKind::Directory => system.directory_exists(path),
    }
}

impl FsWatchManager {
    pub fn new(system: Rc<dyn System>) -> Self {
        let polling = PollingWatchers::new(system.clone());
        Self {
            system,
            polling,
            entries: FxHashMap::default(),
            by_native: FxHashMap::default(),
            by_polling: FxHashMap::default(),
            hit_system_watcher_limit: false,
            next_id: 0,
        }
    }

    pub fn watch(
        &mut self,
        path: &Path,
        kind: FileSystemEntryKind,
        recursive: bool,
        mode: FsWatchMode,
        fallback_interval: PollingInterval,
    ) -> FsWatchId {
        let id = FsWatchId(self.next_id);
        self.next_id += 1;
        let state = if entry_exists(&*self.system, path, kind) {
            self.watch_present(path, recursive, mode, fallback_interval)
        } else {
            WatchState::Missing(self.polling.watch_file(
                mode.polling_strategy(),
                path,
                fallback_interval,
            ))
        };
        let entry = Entry {
            path: path.to_path_buf(),
            kind,
            recursive,
            mode,
            fallback_interval,
            state,
        };
        self.register(id, &entry);
        trace!(path = %path.display(), ?kind, recursive, state = ?entry.state, "fs watch added");
        self.entries.insert(id, entry);
        id
    }

    pub fn close(&mut self, id: FsWatchId) {
        let Some(entry) = self.entries.remove(&id) else {
            return;
        };
        self.release_state(entry.state);
        trace!(path = %entry.path.display(), "fs watch closed");
    }

    pub fn is_native(&self, id: FsWatchId) -> bool {
        matches!(
            self.entries.get(&id).map(|e| e.state),
            Some(WatchState::Native(_))
        )
    }

    pub fn is_missing(&self, id: FsWatchId) -> bool {
        matches!(
            self.entries.get(&id).map(|e| e.state),
            Some(WatchState::Missing(_))
        )
    }

    pub fn kind_of(&self, id: FsWatchId) -> Option<FileSystemEntryKind> {
        self.entries.get(&id).map(|e| e.kind)
    }

    pub fn path_of(&self, id: FsWatchId) -> Option<&Path> {
        self.entries.get(&id).map(|e| e.path.as_path())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.polling.next_deadline()
    }

    /// Drain native events and run due fallback polls.
    pub fn process(&mut self, now: Instant) -> Vec<FsEvent> {
        let mut events = Vec::new();

        for native in self.system.take_native_events() {
            let Some(&id) = self.by_native.get(&native.id) else {
                continue;
            };
            let Some(watched_path) = self.entries.get(&id).map(|e| e.path.clone()) else {
                continue;
            };
            match native.kind {
                NativeEventKind::Error => {
                    debug!(path = %watched_path.display(), "native watch failed, polling for the entry");
                    events.push(FsEvent {
                        id,
                        kind: FsEventKind::Rename,
                        path: watched_path,
                    });
                    self.update_state(id, false);
                }
                NativeEventKind::Change => {
                    events.push(FsEvent {
                        id,
                        kind: FsEventKind::Change,
                        path: native.path.unwrap_or(watched_path),
                    });
                }
                NativeEventKind::Rename => {
                    let path = native.path.unwrap_or_else(|| watched_path.clone());
                    // The handle may outlive the entry it was opened on.
                    let entry_gone = path == watched_path && !self.exists(id);
                    events.push(FsEvent {
                        id,
                        kind: FsEventKind::Rename,
                        path,
                    });
                    if entry_gone {
                        debug!(path = %watched_path.display(), "watched entry renamed away");
                        self.update_state(id, false);
                    }
                }
            }
        }

        for polled in self.polling.poll(now) {
            let Some(&id) = self.by_polling.get(&polled.id) else {
                continue;
            };
            let Some((state, entry_kind)) = self.entries.get(&id).map(|e| (e.state, e.kind)) else {
                continue;
            };
            match state {
                WatchState::Missing(_) => {
                    if polled.kind == FileWatcherEventKind::Created {
                        events.push(FsEvent {
                            id,
                            kind: FsEventKind::Rename,
                            path: polled.path,
                        });
                        self.update_state(id, true);
                    }
                }
                WatchState::Polling(_) => {
                    // A directory's timestamp only moves when its entries do.
                    let kind = if polled.kind == FileWatcherEventKind::Changed
                        && entry_kind == FileSystemEntryKind::File
                    {
                        FsEventKind::Change
                    } else {
                        FsEventKind::Rename
                    };
                    events.push(FsEvent {
                        id,
                        kind,
                        path: polled.path,
                    });
                    if polled.kind == FileWatcherEventKind::Deleted {
                        self.update_state(id, false);
                    }
                }
                WatchState::Native(_) => {}
            }
        }
        events
    }

    fn exists(&self, id: FsWatchId) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|entry| entry_exists(&*self.system, &entry.path, entry.kind))
    }

    fn update_state(&mut self, id: FsWatchId, present: bool) {
        let Some(mut entry) = self.entries.remove(&id) else {
            return;
        };
        self.release_state(entry.state);
        entry.state = if present {
            self.watch_present(&entry.path, entry.recursive, entry.mode, entry.fallback_interval)
        } else {
            WatchState::Missing(self.polling.watch_file(
                entry.mode.polling_strategy(),
                &entry.path,
                entry.fallback_interval,
            ))
        };
        self.register(id, &entry);
        self.entries.insert(id, entry);
    }

    fn watch_present(
        &mut self,
        path: &Path,
        recursive: bool,
        mode: FsWatchMode,
        fallback_interval: PollingInterval,
    ) -> WatchState {
        if matches!(mode, FsWatchMode::Native { .. }) && !self.hit_system_watcher_limit {
            match self.system.watch_native(path, recursive) {
                Ok(native) => return WatchState::Native(native),
                Err(err) => {
                    if is_watch_limit_error(&err) {
                        self.hit_system_watcher_limit = true;
                    }
                    debug!(path = %path.display(), error = %err, "native watch unavailable, polling");
                }
            }
        }
        WatchState::Polling(self.polling.watch_file(
            mode.polling_strategy(),
            path,
            fallback_interval,
        ))
    }

    fn register(&mut self, id: FsWatchId, entry: &Entry) {
        match entry.state {
            WatchState::Native(native) => {
                self.by_native.insert(native, id);
            }
            WatchState::Polling(poll) | WatchState::Missing(poll) => {
                self.by_polling.insert(poll, id);
            }
        }
    }

    fn release_state(&mut self, state: WatchState) {
        match state {
            WatchState::Native(native) => {
                self.by_native.remove(&native);
                self.system.close_native(native);
            }
            WatchState::Polling(poll) | WatchState::Missing(poll) => {
                self.by_polling.remove(&poll);
                self.polling.close(poll);
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/fs_watch_tests.rs"]
mod tests;
