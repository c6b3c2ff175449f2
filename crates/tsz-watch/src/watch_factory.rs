//! Registry of every watcher owned by a watch session.
//!
//! Owners register a [`WatchTarget`] describing *why* something is watched
//! and later receive [`WatchEvent`]s tagged with that target from
//! [`WatchFactory::process`]. No callbacks are stored; the owner decides
//! what an event means.

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::directory_watcher::RecursiveDirectoryWatcher;
use crate::fs_watch::{FileSystemEntryKind, FsEvent, FsEventKind, FsWatchId, FsWatchManager, FsWatchMode};
use crate::paths::{Canonicalizer, PathKey};
use crate::polling::{PollingInterval, PollingStrategy, PollingWatchId, PollingWatchers};
use crate::system::{FileWatcherEventKind, System};
use crate::watch_options::{
    WatchEnvironment, WatchExclusions, WatchFileKind, WatchOptions, resolve_directory_watch,
    resolve_file_watch,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(u32);

/// Why a path is watched.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum WatchTarget {
    ConfigFile,
    ExtendedConfigFile(PathKey),
    SourceFile(PathKey),
    MissingFile(PathKey),
    WildcardDirectory(PathKey),
    FailedLookupLocations(PathKey),
    TypeRoots(PathKey),
}

impl WatchTarget {
    /// Label used when logging watcher activity.
    pub fn watch_type(&self) -> &'static str {
        match self {
            WatchTarget::ConfigFile => "Config file",
            WatchTarget::ExtendedConfigFile(_) => "Extended config file",
            WatchTarget::SourceFile(_) => "Source file",
            WatchTarget::MissingFile(_) => "Missing file",
            WatchTarget::WildcardDirectory(_) => "Wild card directory",
            WatchTarget::FailedLookupLocations(_) => "Failed Lookup Locations",
            WatchTarget::TypeRoots(_) => "Type roots",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum WatchEvent {
    File {
        target: WatchTarget,
        path: PathBuf,
        kind: FileWatcherEventKind,
    },
    /// Something was added, removed or renamed at `path`, which is inside
    /// (or is) the watched directory.
    Directory { target: WatchTarget, path: PathBuf },
}

impl WatchEvent {
    pub fn target(&self) -> &WatchTarget {
        match self {
            WatchEvent::File { target, .. } | WatchEvent::Directory { target, .. } => target,
        }
    }
}

#[derive(Debug)]
enum Backend {
    Polling(PollingWatchId),
    Fs(FsWatchId),
    ParentDirectory { directory: PathKey, file: PathKey },
    Tree { mode: FsWatchMode, root: PathKey },
    Excluded,
}

#[derive(Debug)]
struct Registration {
    target: WatchTarget,
    path: PathBuf,
    is_directory: bool,
    backend: Backend,
}

/// One shared directory watch serving several file watchers.
#[derive(Debug)]
struct ParentDirectoryWatch {
    fs: FsWatchId,
    files: FxHashMap<PathKey, Vec<WatcherId>>,
}

pub struct WatchFactory {
    system: Rc<dyn System>,
    canonicalizer: Canonicalizer,
    options: WatchOptions,
    env: WatchEnvironment,
    exclusions: WatchExclusions,
    pollers: PollingWatchers,
    fs: FsWatchManager,
    trees: Vec<RecursiveDirectoryWatcher>,
    registrations: FxHashMap<WatcherId, Registration>,
    by_poll: FxHashMap<PollingWatchId, WatcherId>,
    by_fs: FxHashMap<FsWatchId, WatcherId>,
    parent_directories: FxHashMap<PathKey, ParentDirectoryWatch>,
    by_parent_fs: FxHashMap<FsWatchId, PathKey>,
    /// Log every watcher creation, close and event at `debug`.
    diagnostics: bool,
    next_id: u32,
}

impl WatchFactory {
    pub fn new(system: Rc<dyn System>, options: WatchOptions) -> Self {
        let canonicalizer = Canonicalizer::new(
            system.current_directory(),
            system.use_case_sensitive_file_names(),
        );
        let env = WatchEnvironment::from_system(system.as_ref());
        let exclusions = WatchExclusions::new(&options, canonicalizer.is_case_sensitive());
        Self {
            pollers: PollingWatchers::new(system.clone()),
            fs: FsWatchManager::new(system.clone()),
            system,
            canonicalizer,
            options,
            env,
            exclusions,
            trees: Vec::new(),
            registrations: FxHashMap::default(),
            by_poll: FxHashMap::default(),
            by_fs: FxHashMap::default(),
            parent_directories: FxHashMap::default(),
            by_parent_fs: FxHashMap::default(),
            diagnostics: false,
            next_id: 0,
        }
    }

    pub fn options(&self) -> &WatchOptions {
        &self.options
    }

    /// Applies to watchers created afterwards.
    pub fn set_options(&mut self, options: WatchOptions) {
        self.exclusions = WatchExclusions::new(&options, self.canonicalizer.is_case_sensitive());
        self.options = options;
    }

    pub fn set_diagnostics(&mut self, enabled: bool) {
        self.diagnostics = enabled;
    }

    pub fn watcher_count(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_open(&self, id: WatcherId) -> bool {
        self.registrations.contains_key(&id)
    }

    pub fn target_of(&self, id: WatcherId) -> Option<&WatchTarget> {
        self.registrations.get(&id).map(|r| &r.target)
    }

    pub fn watch_file(&mut self, path: &Path, priority: PollingInterval, target: WatchTarget) -> WatcherId {
        let id = self.allocate_id();
        let backend = if self.exclusions.is_file_excluded(path) {
            debug!(path = %path.display(), "file watch excluded by watch options");
            Backend::Excluded
        } else {
            let resolved = resolve_file_watch(&self.options, &self.env);
            let fallback = resolved.fallback.strategy();
            match (resolved.kind.polling_strategy(), resolved.kind) {
                (Some(strategy), _) => {
                    let poll = self.pollers.watch_file(strategy, path, priority);
                    self.by_poll.insert(poll, id);
                    Backend::Polling(poll)
                }
                (None, WatchFileKind::UseFsEventsOnParentDirectory) => {
                    self.watch_file_on_parent_directory(id, path, fallback)
                }
                (None, _) => {
                    let fs = self.fs.watch(
                        path,
                        FileSystemEntryKind::File,
                        false,
                        FsWatchMode::Native { fallback },
                        priority,
                    );
                    self.by_fs.insert(fs, id);
                    Backend::Fs(fs)
                }
            }
        };
        self.log_activity("FileWatcher:: Added", path, &target);
        self.registrations.insert(
            id,
            Registration {
                target,
                path: path.to_path_buf(),
                is_directory: false,
                backend,
            },
        );
        id
    }

    pub fn watch_directory(&mut self, path: &Path, recursive: bool, target: WatchTarget) -> WatcherId {
        let id = self.allocate_id();
        let backend = if self.exclusions.is_directory_excluded(path) {
            debug!(path = %path.display(), "directory watch excluded by watch options");
            Backend::Excluded
        } else {
            let resolved = resolve_directory_watch(&self.options, &self.env);
            let mode = match resolved.kind.polling_strategy() {
                Some(strategy) => FsWatchMode::Polling(strategy),
                None => FsWatchMode::Native {
                    fallback: resolved.fallback.strategy(),
                },
            };
            let os_recursive =
                matches!(mode, FsWatchMode::Native { .. }) && self.system.supports_recursive_watch();
            if recursive && !os_recursive {
                let tree = self.tree_index(mode);
                let root = self.trees[tree].add_root(&mut self.fs, path);
                Backend::Tree { mode, root }
            } else {
                let fs = self.fs.watch(
                    path,
                    FileSystemEntryKind::Directory,
                    recursive,
                    mode,
                    PollingInterval::Medium,
                );
                self.by_fs.insert(fs, id);
                Backend::Fs(fs)
            }
        };
        self.log_activity("DirectoryWatcher:: Added", path, &target);
        self.registrations.insert(
            id,
            Registration {
                target,
                path: path.to_path_buf(),
                is_directory: true,
                backend,
            },
        );
        id
    }

    pub fn close(&mut self, id: WatcherId) {
        let Some(registration) = self.registrations.remove(&id) else {
            return;
        };
        self.log_activity("Watcher:: Close", &registration.path, &registration.target);
        match registration.backend {
            Backend::Polling(poll) => {
                self.by_poll.remove(&poll);
                self.pollers.close(poll);
            }
            Backend::Fs(fs) => {
                self.by_fs.remove(&fs);
                self.fs.close(fs);
            }
            Backend::ParentDirectory { directory, file } => {
                let Some(parent) = self.parent_directories.get_mut(&directory) else {
                    return;
                };
                if let Some(ids) = parent.files.get_mut(&file) {
                    ids.retain(|other| *other != id);
                    if ids.is_empty() {
                        parent.files.remove(&file);
                    }
                }
                if parent.files.is_empty() {
                    let fs = parent.fs;
                    self.parent_directories.remove(&directory);
                    self.by_parent_fs.remove(&fs);
                    self.fs.close(fs);
                }
            }
            Backend::Tree { mode, root } => {
                if let Some(tree) = self.trees.iter_mut().find(|t| t.mode() == mode) {
                    tree.remove_root(&mut self.fs, &root);
                }
            }
            Backend::Excluded => {}
        }
    }

    pub fn close_all(&mut self) {
        let mut ids: Vec<WatcherId> = self.registrations.keys().copied().collect();
        ids.sort();
        for id in ids {
            self.close(id);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        [self.fs.next_deadline(), self.pollers.next_deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    /// Collect every event observable at `now`.
    pub fn process(&mut self, now: Instant) -> Vec<WatchEvent> {
        let mut events = Vec::new();
        for fs_event in self.fs.process(now) {
            if let Some(&id) = self.by_fs.get(&fs_event.id) {
                self.emit_direct(id, &fs_event, &mut events);
            } else if let Some(directory) = self.by_parent_fs.get(&fs_event.id).cloned() {
                self.emit_parent_directory(&directory, &fs_event, &mut events);
            } else {
                self.emit_tree(&fs_event, &mut events);
            }
        }
        for polled in self.pollers.poll(now) {
            let Some(registration) = self
                .by_poll
                .get(&polled.id)
                .and_then(|id| self.registrations.get(id))
            else {
                continue;
            };
            events.push(WatchEvent::File {
                target: registration.target.clone(),
                path: polled.path,
                kind: polled.kind,
            });
        }
        // A deletion is often reported by both the event and the broken watch.
        events.dedup();
        if self.diagnostics {
            for event in &events {
                debug!(watch_type = event.target().watch_type(), ?event, "Watcher:: Triggered");
            }
        }
        events
    }

    fn log_activity(&self, action: &str, path: &Path, target: &WatchTarget) {
        if self.diagnostics {
            debug!(path = %path.display(), watch_type = target.watch_type(), "{action}");
        } else {
            trace!(path = %path.display(), watch_type = target.watch_type(), "{action}");
        }
    }

    fn allocate_id(&mut self) -> WatcherId {
        let id = WatcherId(self.next_id);
        self.next_id += 1;
        id
    }

    fn tree_index(&mut self, mode: FsWatchMode) -> usize {
        if let Some(index) = self.trees.iter().position(|t| t.mode() == mode) {
            return index;
        }
        self.trees
            .push(RecursiveDirectoryWatcher::new(self.system.clone(), mode));
        self.trees.len() - 1
    }

    fn watch_file_on_parent_directory(
        &mut self,
        id: WatcherId,
        path: &Path,
        fallback: PollingStrategy,
    ) -> Backend {
        let file = self.canonicalizer.to_path(path);
        let Some(directory) = file.parent() else {
            return Backend::Excluded;
        };
        let directory_path = self
            .canonicalizer
            .absolute(path)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(directory.as_str()));
        if !self.parent_directories.contains_key(&directory) {
            let fs = self.fs.watch(
                &directory_path,
                FileSystemEntryKind::Directory,
                false,
                FsWatchMode::Native { fallback },
                PollingInterval::Medium,
            );
            self.by_parent_fs.insert(fs, directory.clone());
            self.parent_directories.insert(
                directory.clone(),
                ParentDirectoryWatch {
                    fs,
                    files: FxHashMap::default(),
                },
            );
        }
        if let Some(parent) = self.parent_directories.get_mut(&directory) {
            parent.files.entry(file.clone()).or_default().push(id);
        }
        Backend::ParentDirectory { directory, file }
    }

    fn file_event_kind(&self, kind: FsEventKind, path: &Path) -> FileWatcherEventKind {
        match kind {
            FsEventKind::Change => FileWatcherEventKind::Changed,
            FsEventKind::Rename if self.system.file_exists(path) => FileWatcherEventKind::Created,
            FsEventKind::Rename => FileWatcherEventKind::Deleted,
        }
    }

    fn emit_direct(&self, id: WatcherId, fs_event: &FsEvent, events: &mut Vec<WatchEvent>) {
        let Some(registration) = self.registrations.get(&id) else {
            return;
        };
        if registration.is_directory {
            if fs_event.kind == FsEventKind::Rename {
                events.push(WatchEvent::Directory {
                    target: registration.target.clone(),
                    path: fs_event.path.clone(),
                });
            }
        } else {
            events.push(WatchEvent::File {
                target: registration.target.clone(),
                path: registration.path.clone(),
                kind: self.file_event_kind(fs_event.kind, &registration.path),
            });
        }
    }

    fn emit_parent_directory(&self, directory: &PathKey, fs_event: &FsEvent, events: &mut Vec<WatchEvent>) {
        let Some(parent) = self.parent_directories.get(directory) else {
            return;
        };
        let file = self.canonicalizer.to_path(&fs_event.path);
        let Some(ids) = parent.files.get(&file) else {
            return;
        };
        for id in ids {
            if let Some(registration) = self.registrations.get(id) {
                events.push(WatchEvent::File {
                    target: registration.target.clone(),
                    path: registration.path.clone(),
                    kind: self.file_event_kind(fs_event.kind, &registration.path),
                });
            }
        }
    }

    fn emit_tree(&mut self, fs_event: &FsEvent, events: &mut Vec<WatchEvent>) {
        for index in 0..self.trees.len() {
            let Some(node) = self.trees[index].handle(&mut self.fs, fs_event) else {
                continue;
            };
            if fs_event.kind != FsEventKind::Rename {
                return;
            }
            let mode = self.trees[index].mode();
            let mut matching: Vec<(WatcherId, &Registration)> = self
                .registrations
                .iter()
                .filter(|(_, registration)| match &registration.backend {
                    Backend::Tree { mode: m, root } => {
                        *m == mode && (node == *root || node.is_in_directory(root))
                    }
                    _ => false,
                })
                .map(|(id, registration)| (*id, registration))
                .collect();
            matching.sort_by_key(|(id, _)| *id);
            for (_, registration) in matching {
                events.push(WatchEvent::Directory {
                    target: registration.target.clone(),
                    path: fs_event.path.clone(),
                });
            }
            return;
        }
    }
}

#[cfg(test)]
#[path = "tests/watch_factory_tests.rs"]
mod tests;
