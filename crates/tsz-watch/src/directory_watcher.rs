//! Recursive directory watching on hosts without recursive OS watches.
//!
//! A tree of non-recursive watches is kept in sync with the directory
//! structure: every watched directory also watches each real (non-symlinked)
//! subdirectory. Nodes are shared and reference counted, so overlapping
//! recursive roots cost one watch per directory.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::fs_watch::{FileSystemEntryKind, FsEvent, FsEventKind, FsWatchId, FsWatchManager, FsWatchMode};
use crate::paths::{Canonicalizer, PathKey};
use crate::polling::PollingInterval;
use crate::system::System;

#[derive(Debug)]
struct DirNode {
    path: PathBuf,
    fs: FsWatchId,
    children: Vec<PathKey>,
    ref_count: usize,
}

pub struct RecursiveDirectoryWatcher {
    system: Rc<dyn System>,
    canonicalizer: Canonicalizer,
    mode: FsWatchMode,
    nodes: FxHashMap<PathKey, DirNode>,
    by_fs: FxHashMap<FsWatchId, PathKey>,
}

/// Directory paths that never get child watches.
fn is_ignored_path(path: &PathKey) -> bool {
    let text = path.as_str();
    text.contains("/node_modules/.") || text.ends_with("/.git") || text.contains("/.git/")
}

impl RecursiveDirectoryWatcher {
    pub fn new(system: Rc<dyn System>, mode: FsWatchMode) -> Self {
        let canonicalizer = Canonicalizer::new(
            system.current_directory(),
            system.use_case_sensitive_file_names(),
        );
        Self {
            system,
            canonicalizer,
            mode,
            nodes: FxHashMap::default(),
            by_fs: FxHashMap::default(),
        }
    }

    /// Start (or share) a recursive watch rooted at `path`.
    pub fn add_root(&mut self, fs: &mut FsWatchManager, path: &Path) -> PathKey {
        let key = self.canonicalizer.to_path(path);
        self.acquire(fs, key.clone(), path.to_path_buf());
        key
    }

    pub fn remove_root(&mut self, fs: &mut FsWatchManager, key: &PathKey) {
        self.release(fs, key);
    }

    pub fn mode(&self) -> FsWatchMode {
        self.mode
    }

    pub fn is_watching(&self, key: &PathKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Map a low-level event to the node it belongs to, refreshing that
    /// node's child watches on structural changes.
    pub fn handle(&mut self, fs: &mut FsWatchManager, event: &FsEvent) -> Option<PathKey> {
        let key = self.by_fs.get(&event.id)?.clone();
        if event.kind == FsEventKind::Rename {
            self.refresh_children(fs, &key);
        }
        Some(key)
    }

    fn acquire(&mut self, fs: &mut FsWatchManager, key: PathKey, path: PathBuf) {
        if let Some(node) = self.nodes.get_mut(&key) {
            node.ref_count += 1;
            return;
        }
        let id = fs.watch(
            &path,
            FileSystemEntryKind::Directory,
            false,
            self.mode,
            PollingInterval::Medium,
        );
        trace!(path = %path.display(), "recursive directory node added");
        self.by_fs.insert(id, key.clone());
        self.nodes.insert(
            key.clone(),
            DirNode {
                path,
                fs: id,
                children: Vec::new(),
                ref_count: 1,
            },
        );
        self.refresh_children(fs, &key);
    }

    fn release(&mut self, fs: &mut FsWatchManager, key: &PathKey) {
        let Some(node) = self.nodes.get_mut(key) else {
            return;
        };
        node.ref_count -= 1;
        if node.ref_count > 0 {
            return;
        }
        let Some(node) = self.nodes.remove(key) else {
            return;
        };
        self.by_fs.remove(&node.fs);
        fs.close(node.fs);
        trace!(path = %node.path.display(), "recursive directory node removed");
        for child in &node.children {
            self.release(fs, child);
        }
    }

    fn refresh_children(&mut self, fs: &mut FsWatchManager, key: &PathKey) {
        let Some(node) = self.nodes.get(key) else {
            return;
        };
        let parent_path = node.path.clone();
        let current = node.children.clone();

        let mut desired: Vec<(PathKey, PathBuf)> = Vec::new();
        for name in self.system.get_file_system_entries(&parent_path).directories {
            let child_path = parent_path.join(&name);
            let child_key = self.canonicalizer.to_path(&child_path);
            if is_ignored_path(&child_key) {
                continue;
            }
            // Symlinked directories are reached through their real location.
            let real = self.canonicalizer.to_path(&self.system.realpath(&child_path));
            if real != child_key {
                continue;
            }
            desired.push((child_key, child_path));
        }

        let mut children = Vec::with_capacity(desired.len());
        for (child_key, child_path) in desired {
            if !current.contains(&child_key) {
                self.acquire(fs, child_key.clone(), child_path);
            }
            children.push(child_key);
        }
        for stale in current.iter().filter(|c| !children.contains(c)) {
            self.release(fs, stale);
        }
        if let Some(node) = self.nodes.get_mut(key) {
            node.children = children;
        }
    }
}
