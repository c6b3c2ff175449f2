//! Source file version cache.
//!
//! Every file a program asked for has exactly one [`HostFileInfo`]. A file
//! watcher is attached only once the file is known to exist, and versions
//! only move forward: a content change bumps the version once, and the
//! version survives the file going missing so a re-created file never
//! reuses an old number.

use std::io;
use std::path::Path;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::directory_cache::CachedDirectoryStructureHost;
use crate::paths::PathKey;
use crate::polling::PollingInterval;
use crate::resolution_cache::ResolutionCache;
use crate::source_file::SourceFile;
use crate::watch_factory::{WatchFactory, WatchTarget, WatcherId};

#[derive(Debug)]
pub enum HostFileInfo {
    /// Confirmed absent. `version` is the last version handed out.
    Missing { version: u32 },
    Present {
        file: Rc<SourceFile>,
        version: u32,
        watcher: WatcherId,
    },
    /// Version bumped by a change notification; the text has not been read
    /// again yet.
    PresenceUnknown {
        version: u32,
        watcher: Option<WatcherId>,
    },
}

impl HostFileInfo {
    fn version(&self) -> u32 {
        match self {
            HostFileInfo::Missing { version }
            | HostFileInfo::Present { version, .. }
            | HostFileInfo::PresenceUnknown { version, .. } => *version,
        }
    }
}

pub struct SourceFileCache {
    host: Rc<CachedDirectoryStructureHost>,
    files: FxHashMap<PathKey, HostFileInfo>,
    /// Missing files dropped by a program; evicted once the next program is
    /// known not to need them.
    missing_file_paths_requested_for_release: Vec<PathKey>,
}

impl SourceFileCache {
    pub fn new(host: Rc<CachedDirectoryStructureHost>) -> Self {
        Self {
            host,
            files: FxHashMap::default(),
            missing_file_paths_requested_for_release: Vec::new(),
        }
    }

    pub fn get(&self, path: &PathKey) -> Option<&HostFileInfo> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &PathKey) -> bool {
        self.files.contains_key(path)
    }

    pub fn is_missing(&self, path: &PathKey) -> bool {
        matches!(self.files.get(path), Some(HostFileInfo::Missing { .. }))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Version a program should compare its copy of `path` against. `None`
    /// for unknown and missing files.
    pub fn get_source_version(&self, path: &PathKey) -> Option<u32> {
        match self.files.get(path)? {
            HostFileInfo::Missing { .. } => None,
            info => Some(info.version()),
        }
    }

    /// Record that `path` changed on disk. The next
    /// [`get_or_create_source_file`](Self::get_or_create_source_file) reads
    /// it again.
    pub fn next_source_file_version(&mut self, path: &PathKey) {
        let Some(info) = self.files.get_mut(path) else {
            return;
        };
        let next = match info {
            HostFileInfo::Missing { version } => HostFileInfo::PresenceUnknown {
                version: *version + 1,
                watcher: None,
            },
            HostFileInfo::Present { version, watcher, .. } => HostFileInfo::PresenceUnknown {
                version: *version + 1,
                watcher: Some(*watcher),
            },
            // Already waiting for a re-read; one bump per confirmed change.
            HostFileInfo::PresenceUnknown { .. } => return,
        };
        trace!(path = %path, version = next.version(), "source file version bumped");
        *info = next;
    }

    /// The cached file for `file_name`, reading it when the cache has no
    /// up-to-date copy. Read failures other than "not found" are passed to
    /// `on_error` and the file is treated as absent for this pass only.
    pub fn get_or_create_source_file(
        &mut self,
        file_name: &Path,
        should_create_new_source_file: bool,
        factory: &mut WatchFactory,
        on_error: &mut dyn FnMut(&Path, &io::Error),
    ) -> Option<Rc<SourceFile>> {
        let path = self.host.to_path(file_name);
        let (previous_version, watcher) = match self.files.get(&path) {
            Some(HostFileInfo::Missing { .. }) => return None,
            Some(HostFileInfo::Present { file, .. }) if !should_create_new_source_file => {
                return Some(Rc::clone(file));
            }
            Some(HostFileInfo::Present { version, watcher, .. }) => (Some(*version + 1), Some(*watcher)),
            Some(HostFileInfo::PresenceUnknown { version, watcher }) => (Some(*version), *watcher),
            None => (None, None),
        };

        let text = match self.host.read_file(file_name) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if let Some(watcher) = watcher {
                    factory.close(watcher);
                }
                debug!(path = %path, "source file missing");
                self.files.insert(
                    path,
                    HostFileInfo::Missing {
                        version: previous_version.unwrap_or(1),
                    },
                );
                return None;
            }
            Err(err) => {
                on_error(file_name, &err);
                self.files.insert(
                    path,
                    HostFileInfo::PresenceUnknown {
                        version: previous_version.unwrap_or(1),
                        watcher,
                    },
                );
                return None;
            }
        };

        let version = previous_version.unwrap_or(1);
        let hash = self.host.system().create_hash(&text);
        let file = Rc::new(SourceFile::new(
            self.host.canonicalizer().absolute(file_name),
            path.clone(),
            text,
            version,
            hash,
        ));
        let watcher = watcher.unwrap_or_else(|| {
            factory.watch_file(file_name, PollingInterval::Low, WatchTarget::SourceFile(path.clone()))
        });
        trace!(path = %path, version, "source file read");
        self.files.insert(
            path,
            HostFileInfo::Present {
                file: Rc::clone(&file),
                version,
                watcher,
            },
        );
        Some(file)
    }

    /// Called for each file of the previous program that the new program
    /// no longer holds by identity.
    pub fn on_release_old_source_file(
        &mut self,
        old: &Rc<SourceFile>,
        has_source_file_by_path: bool,
        resolution_cache: &mut ResolutionCache,
        factory: &mut WatchFactory,
    ) {
        match self.files.get(&old.path) {
            Some(HostFileInfo::Missing { .. }) => {
                self.missing_file_paths_requested_for_release
                    .push(old.path.clone());
            }
            Some(HostFileInfo::Present { file, watcher, .. }) if Rc::ptr_eq(file, old) => {
                factory.close(*watcher);
                self.files.remove(&old.path);
                if !has_source_file_by_path {
                    resolution_cache.remove_resolutions_of_file(&old.path);
                }
            }
            // Changed on disk and never re-read by the new program.
            Some(HostFileInfo::PresenceUnknown { watcher, .. }) => {
                if let Some(watcher) = *watcher {
                    factory.close(watcher);
                }
                self.files.remove(&old.path);
                if !has_source_file_by_path {
                    resolution_cache.remove_resolutions_of_file(&old.path);
                }
            }
            _ => {}
        }
    }

    /// Drop released missing entries the new program does not list as
    /// missing.
    pub fn evict_released_missing_files(&mut self, is_missing_in_program: impl Fn(&PathKey) -> bool) {
        for path in std::mem::take(&mut self.missing_file_paths_requested_for_release) {
            if !is_missing_in_program(&path) && self.is_missing(&path) {
                self.files.remove(&path);
            }
        }
    }

    /// Forget a missing entry so the next request reads the disk again.
    pub fn remove_missing(&mut self, path: &PathKey) {
        if self.is_missing(path) {
            self.files.remove(path);
        }
    }

    pub fn close_all(&mut self, factory: &mut WatchFactory) {
        for (_, info) in self.files.drain() {
            match info {
                HostFileInfo::Present { watcher, .. }
                | HostFileInfo::PresenceUnknown {
                    watcher: Some(watcher),
                    ..
                } => factory.close(watcher),
                _ => {}
            }
        }
        self.missing_file_paths_requested_for_release.clear();
    }
}

#[cfg(test)]
#[path = "tests/source_file_cache_tests.rs"]
mod tests;
