//! In-memory host with a manual clock and simulated native watches.
//!
//! Used by the test suites to drive the polling scheduler, the event
//! adapter and the watch program deterministically.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rustc_hash::FxHashMap;

use crate::paths::{normalize_path, to_slash_string};
use crate::system::{FileSystemEntries, NativeEvent, NativeEventKind, NativeWatchId, System};

#[derive(Clone, Debug)]
enum EntryKind {
    File(String),
    Directory,
    /// Directory symlink to another absolute path.
    Symlink(String),
}

#[derive(Clone, Debug)]
struct Entry {
    /// Path as written, used for listings.
    path: String,
    kind: EntryKind,
    modified: SystemTime,
}

#[derive(Clone, Debug)]
struct NativeWatch {
    key: String,
    recursive: bool,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    watches: BTreeMap<NativeWatchId, NativeWatch>,
    pending: Vec<NativeEvent>,
    env: FxHashMap<String, String>,
    written: Vec<String>,
}

/// Simulated host. All paths are absolute and `/`-separated.
pub struct VirtualSystem {
    case_sensitive: bool,
    current_directory: PathBuf,
    base_instant: Instant,
    elapsed: Cell<Duration>,
    write_counter: Cell<u64>,
    next_watch_id: Cell<u64>,
    /// Remaining native watch handles; `None` means unlimited.
    native_watch_budget: Cell<Option<usize>>,
    native_watching: Cell<bool>,
    recursive_watching: Cell<bool>,
    state: RefCell<State>,
}

const BASE_TIME_SECS: u64 = 1_700_000_000;

impl VirtualSystem {
    pub fn new(current_directory: &str) -> Self {
        let system = Self {
            case_sensitive: true,
            current_directory: PathBuf::from(current_directory),
            base_instant: Instant::now(),
            elapsed: Cell::new(Duration::ZERO),
            write_counter: Cell::new(0),
            next_watch_id: Cell::new(1),
            native_watch_budget: Cell::new(None),
            native_watching: Cell::new(true),
            recursive_watching: Cell::new(false),
            state: RefCell::new(State::default()),
        };
        system.ensure_directory(current_directory);
        system
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self.state.borrow_mut().entries.clear();
        let cwd = to_slash_string(&self.current_directory);
        self.ensure_directory(&cwd);
        self
    }

    /// Advance the clock without producing any events.
    pub fn advance(&self, duration: Duration) {
        self.elapsed.set(self.elapsed.get() + duration);
    }

    pub fn set_native_watching(&self, enabled: bool) {
        self.native_watching.set(enabled);
    }

    pub fn set_recursive_watching(&self, enabled: bool) {
        self.recursive_watching.set(enabled);
    }

    /// Limit the number of further native watches that can be created.
    pub fn set_native_watch_budget(&self, budget: Option<usize>) {
        self.native_watch_budget.set(budget);
    }

    pub fn set_env(&self, name: &str, value: &str) {
        self.state
            .borrow_mut()
            .env
            .insert(name.to_string(), value.to_string());
    }

    pub fn native_watch_count(&self) -> usize {
        self.state.borrow().watches.len()
    }

    pub fn is_natively_watched(&self, path: &str) -> bool {
        let key = self.key(path);
        self.state.borrow().watches.values().any(|w| w.key == key)
    }

    /// Paths passed to `write_file` since the last call.
    pub fn take_written_files(&self) -> Vec<String> {
        std::mem::take(&mut self.state.borrow_mut().written)
    }

    pub fn write(&self, path: &str, text: &str) {
        let normalized = self.normalized(path);
        if let Some(parent) = parent_of(&normalized) {
            self.ensure_directory(&parent);
        }
        let key = self.key(&normalized);
        let modified = self.next_modified_time();
        let existed = {
            let mut state = self.state.borrow_mut();
            let existed = matches!(
                state.entries.get(&key),
                Some(Entry {
                    kind: EntryKind::File(_),
                    ..
                })
            );
            state.entries.insert(
                key.clone(),
                Entry {
                    path: normalized.clone(),
                    kind: EntryKind::File(text.to_string()),
                    modified,
                },
            );
            existed
        };
        if existed {
            self.notify(&key, NativeEventKind::Change, &normalized);
        } else {
            self.touch_parent(&normalized);
            self.notify(&key, NativeEventKind::Rename, &normalized);
        }
    }

    pub fn remove(&self, path: &str) {
        let normalized = self.normalized(path);
        let key = self.key(&normalized);
        let removed: Vec<(String, String)> = {
            let mut state = self.state.borrow_mut();
            let prefix = format!("{}/", key.trim_end_matches('/'));
            let keys: Vec<String> = state
                .entries
                .keys()
                .filter(|k| **k == key || k.starts_with(&prefix))
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|k| state.entries.remove(&k).map(|e| (k, e.path)))
                .collect()
        };
        if removed.is_empty() {
            return;
        }
        self.touch_parent(&normalized);
        // Deepest first, so watchers on children break before their parents.
        for (key, path) in removed.iter().rev() {
            self.notify(key, NativeEventKind::Rename, path);
            self.break_watches(key);
        }
    }

    /// Move an entry and everything below it. Native watches opened on the
    /// old path stay open and only see a rename.
    pub fn rename(&self, from: &str, to: &str) {
        let from = self.normalized(from);
        let to = self.normalized(to);
        if let Some(parent) = parent_of(&to) {
            self.ensure_directory(&parent);
        }
        let from_key = self.key(&from);
        let moved: Vec<(String, Entry)> = {
            let mut state = self.state.borrow_mut();
            let prefix = format!("{}/", from_key.trim_end_matches('/'));
            let keys: Vec<String> = state
                .entries
                .keys()
                .filter(|k| **k == from_key || k.starts_with(&prefix))
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|k| state.entries.remove(&k).map(|e| (k, e)))
                .collect()
        };
        if moved.is_empty() {
            return;
        }
        self.touch_parent(&from);
        for (key, entry) in moved.iter().rev() {
            self.notify(key, NativeEventKind::Rename, &entry.path);
        }
        for (_, mut entry) in moved {
            let path = format!("{to}{}", &entry.path[from.len()..]);
            let key = self.key(&path);
            entry.path = path.clone();
            self.state.borrow_mut().entries.insert(key.clone(), entry);
            self.notify(&key, NativeEventKind::Rename, &path);
        }
        self.touch_parent(&to);
    }

    pub fn mkdir(&self, path: &str) {
        let normalized = self.normalized(path);
        self.ensure_directory(&normalized);
    }

    pub fn symlink(&self, path: &str, target: &str) {
        let normalized = self.normalized(path);
        let target = self.normalized(target);
        if let Some(parent) = parent_of(&normalized) {
            self.ensure_directory(&parent);
        }
        let key = self.key(&normalized);
        let modified = self.next_modified_time();
        self.state.borrow_mut().entries.insert(
            key.clone(),
            Entry {
                path: normalized.clone(),
                kind: EntryKind::Symlink(target),
                modified,
            },
        );
        self.touch_parent(&normalized);
        self.notify(&key, NativeEventKind::Rename, &normalized);
    }

    /// Overwrite the timestamp of an entry without touching its content.
    pub fn set_modified_time(&self, path: &str, time: SystemTime) {
        let key = self.key(&self.normalized(path));
        if let Some(entry) = self.state.borrow_mut().entries.get_mut(&key) {
            entry.modified = time;
        }
    }

    fn ensure_directory(&self, path: &str) {
        let normalized = self.normalized(path);
        let mut chain = Vec::new();
        let mut current = Some(normalized);
        while let Some(dir) = current {
            current = parent_of(&dir);
            chain.push(dir);
        }
        for dir in chain.into_iter().rev() {
            let key = self.key(&dir);
            if self.state.borrow().entries.contains_key(&key) {
                continue;
            }
            let modified = self.next_modified_time();
            self.state.borrow_mut().entries.insert(
                key.clone(),
                Entry {
                    path: dir.clone(),
                    kind: EntryKind::Directory,
                    modified,
                },
            );
            self.touch_parent(&dir);
            self.notify(&key, NativeEventKind::Rename, &dir);
        }
    }

    fn touch_parent(&self, path: &str) {
        let Some(parent) = parent_of(path) else {
            return;
        };
        let key = self.key(&parent);
        let modified = self.next_modified_time();
        if let Some(entry) = self.state.borrow_mut().entries.get_mut(&key) {
            entry.modified = modified;
        }
    }

    fn next_modified_time(&self) -> SystemTime {
        let counter = self.write_counter.get() + 1;
        self.write_counter.set(counter);
        UNIX_EPOCH
            + Duration::from_secs(BASE_TIME_SECS)
            + self.elapsed.get()
            + Duration::from_nanos(counter)
    }

    /// Queue native events for watches on the entry itself, its parent
    /// directory, or a recursive ancestor.
    fn notify(&self, key: &str, kind: NativeEventKind, path: &str) {
        let mut state = self.state.borrow_mut();
        let parent = parent_of(key);
        let mut events = Vec::new();
        for (id, watch) in &state.watches {
            let on_self = watch.key == key;
            let on_parent = parent.as_deref() == Some(watch.key.as_str());
            let on_ancestor = watch.recursive && is_ancestor(&watch.key, key);
            if on_self || on_parent || on_ancestor {
                events.push(NativeEvent {
                    id: *id,
                    kind,
                    path: Some(PathBuf::from(path)),
                });
            }
        }
        state.pending.extend(events);
    }

    fn break_watches(&self, key: &str) {
        let mut state = self.state.borrow_mut();
        let broken: Vec<NativeWatchId> = state
            .watches
            .iter()
            .filter(|(_, w)| w.key == key)
            .map(|(id, _)| *id)
            .collect();
        for id in broken {
            state.pending.push(NativeEvent {
                id,
                kind: NativeEventKind::Error,
                path: None,
            });
        }
    }

    fn normalized(&self, path: &str) -> String {
        let path = Path::new(path);
        let absolute = if path.has_root() {
            path.to_path_buf()
        } else {
            self.current_directory.join(path)
        };
        to_slash_string(&normalize_path(&absolute))
    }

    fn key(&self, path: &str) -> String {
        let normalized = self.normalized(path);
        if self.case_sensitive {
            normalized
        } else {
            normalized.to_lowercase()
        }
    }

    fn resolve_links(&self, path: &str) -> String {
        let normalized = self.normalized(path);
        let state = self.state.borrow();
        let mut prefix = normalized.clone();
        loop {
            let key = if self.case_sensitive {
                prefix.clone()
            } else {
                prefix.to_lowercase()
            };
            if let Some(Entry {
                kind: EntryKind::Symlink(target),
                ..
            }) = state.entries.get(&key)
            {
                let rest = &normalized[prefix.len()..];
                return format!("{target}{rest}");
            }
            match parent_of(&prefix) {
                Some(parent) => prefix = parent,
                None => return normalized,
            }
        }
    }

    fn lookup(&self, path: &Path) -> Option<Entry> {
        let resolved = self.resolve_links(&to_slash_string(path));
        let key = self.key(&resolved);
        self.state.borrow().entries.get(&key).cloned()
    }
}

fn parent_of(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let idx = trimmed.rfind('/')?;
    Some(if idx == 0 {
        "/".to_string()
    } else {
        trimmed[..idx].to_string()
    })
}

fn is_ancestor(ancestor: &str, path: &str) -> bool {
    if ancestor == "/" {
        return path != "/";
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

impl System for VirtualSystem {
    fn use_case_sensitive_file_names(&self) -> bool {
        self.case_sensitive
    }

    fn current_directory(&self) -> PathBuf {
        self.current_directory.clone()
    }

    fn read_file(&self, path: &Path) -> io::Result<String> {
        match self.lookup(path) {
            Some(Entry {
                kind: EntryKind::File(text),
                ..
            }) => Ok(text),
            _ => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )),
        }
    }

    fn write_file(&self, path: &Path, data: &str, _write_byte_order_mark: bool) -> io::Result<()> {
        let path = to_slash_string(path);
        self.write(&path, data);
        self.state.borrow_mut().written.push(path);
        Ok(())
    }

    fn file_exists(&self, path: &Path) -> bool {
        matches!(
            self.lookup(path),
            Some(Entry {
                kind: EntryKind::File(_),
                ..
            })
        )
    }

    fn directory_exists(&self, path: &Path) -> bool {
        matches!(
            self.lookup(path),
            Some(Entry {
                kind: EntryKind::Directory,
                ..
            })
        )
    }

    fn create_directory(&self, path: &Path) -> io::Result<()> {
        self.mkdir(&to_slash_string(path));
        Ok(())
    }

    fn get_file_system_entries(&self, path: &Path) -> FileSystemEntries {
        let resolved = self.resolve_links(&to_slash_string(path));
        let dir_key = self.key(&resolved);
        let mut entries = FileSystemEntries::default();
        let state = self.state.borrow();
        let prefix = if dir_key == "/" {
            "/".to_string()
        } else {
            format!("{dir_key}/")
        };
        for (key, entry) in state.entries.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            let rest = &key[prefix.len()..];
            if rest.is_empty() || rest.contains('/') {
                continue;
            }
            let name = entry
                .path
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string();
            match entry.kind {
                EntryKind::File(_) => entries.files.push(name),
                EntryKind::Directory | EntryKind::Symlink(_) => entries.directories.push(name),
            }
        }
        entries
    }

    fn get_modified_time(&self, path: &Path) -> Option<SystemTime> {
        self.lookup(path).map(|entry| entry.modified)
    }

    fn realpath(&self, path: &Path) -> PathBuf {
        PathBuf::from(self.resolve_links(&to_slash_string(path)))
    }

    fn get_environment_variable(&self, name: &str) -> Option<String> {
        self.state.borrow().env.get(name).cloned()
    }

    fn now(&self) -> Instant {
        self.base_instant + self.elapsed.get()
    }

    fn watch_native(&self, path: &Path, recursive: bool) -> io::Result<NativeWatchId> {
        if !self.native_watching.get() {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "native watching disabled",
            ));
        }
        if recursive && !self.recursive_watching.get() {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "recursive watching unsupported",
            ));
        }
        if let Some(budget) = self.native_watch_budget.get() {
            if budget == 0 {
                return Err(io::Error::other("ENOSPC: watch handles exhausted"));
            }
            self.native_watch_budget.set(Some(budget - 1));
        }
        if self.lookup(path).is_none() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            ));
        }
        let id = NativeWatchId(self.next_watch_id.get());
        self.next_watch_id.set(id.0 + 1);
        let key = self.key(&self.resolve_links(&to_slash_string(path)));
        self.state
            .borrow_mut()
            .watches
            .insert(id, NativeWatch { key, recursive });
        Ok(id)
    }

    fn close_native(&self, id: NativeWatchId) {
        let mut state = self.state.borrow_mut();
        state.watches.remove(&id);
        state.pending.retain(|event| event.id != id);
    }

    fn take_native_events(&self) -> Vec<NativeEvent> {
        let mut state = self.state.borrow_mut();
        let pending = std::mem::take(&mut state.pending);
        pending
            .into_iter()
            .filter(|event| state.watches.contains_key(&event.id))
            .collect()
    }

    fn supports_recursive_watch(&self) -> bool {
        self.recursive_watching.get()
    }

    fn wait_for_events(&self, timeout: Duration) {
        self.advance(timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_creates_parents_and_lists_entries() {
        let sys = VirtualSystem::new("/project");
        sys.write("/project/src/a.ts", "export const a = 1;");
        sys.write("/project/src/lib/b.ts", "");

        let entries = sys.get_file_system_entries(Path::new("/project/src"));
        assert_eq!(entries.files, vec!["a.ts".to_string()]);
        assert_eq!(entries.directories, vec!["lib".to_string()]);
        assert!(sys.directory_exists(Path::new("/project/src/lib")));
        assert_eq!(
            sys.read_file(Path::new("/project/src/a.ts")).expect("read"),
            "export const a = 1;"
        );
    }

    #[test]
    fn test_modified_time_changes_on_every_write() {
        let sys = VirtualSystem::new("/project");
        sys.write("/project/a.ts", "1");
        let first = sys.get_modified_time(Path::new("/project/a.ts"));
        sys.write("/project/a.ts", "2");
        let second = sys.get_modified_time(Path::new("/project/a.ts"));
        assert!(first.is_some());
        assert_ne!(first, second);
        sys.remove("/project/a.ts");
        assert!(sys.get_modified_time(Path::new("/project/a.ts")).is_none());
    }

    #[test]
    fn test_native_events_for_file_and_directory_watches() {
        let sys = VirtualSystem::new("/project");
        sys.write("/project/a.ts", "1");
        let dir = sys
            .watch_native(Path::new("/project"), false)
            .expect("dir watch");
        let file = sys
            .watch_native(Path::new("/project/a.ts"), false)
            .expect("file watch");

        sys.write("/project/a.ts", "2");
        let events = sys.take_native_events();
        assert!(events.contains(&NativeEvent {
            id: file,
            kind: NativeEventKind::Change,
            path: Some(PathBuf::from("/project/a.ts")),
        }));
        assert!(events.iter().any(|e| e.id == dir && e.kind == NativeEventKind::Change));

        sys.remove("/project/a.ts");
        let events = sys.take_native_events();
        assert!(events.iter().any(|e| e.id == file && e.kind == NativeEventKind::Error));
        assert!(events.iter().any(|e| e.id == dir && e.kind == NativeEventKind::Rename));
    }

    #[test]
    fn test_watch_budget_exhaustion() {
        let sys = VirtualSystem::new("/project");
        sys.set_native_watch_budget(Some(1));
        assert!(sys.watch_native(Path::new("/project"), false).is_ok());
        assert!(sys.watch_native(Path::new("/project"), false).is_err());
        sys.set_native_watching(false);
        sys.set_native_watch_budget(None);
        assert!(sys.watch_native(Path::new("/project"), false).is_err());
    }

    #[test]
    fn test_case_insensitive_lookup_and_symlinks() {
        let sys = VirtualSystem::new("/Project").case_insensitive();
        sys.write("/Project/Src/A.ts", "x");
        assert!(sys.file_exists(Path::new("/project/src/a.ts")));

        sys.symlink("/Project/linked", "/Project/Src");
        assert!(sys.file_exists(Path::new("/Project/linked/A.ts")));
        assert_eq!(
            sys.realpath(Path::new("/Project/linked/A.ts")),
            PathBuf::from("/Project/Src/A.ts")
        );
    }

    #[test]
    fn test_clock_advances_manually() {
        let sys = VirtualSystem::new("/");
        let start = sys.now();
        sys.advance(Duration::from_millis(250));
        assert_eq!(sys.now() - start, Duration::from_millis(250));
    }
}
