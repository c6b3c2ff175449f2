//! Memoized directory listings, kept current from watch events.
//!
//! Listings are keyed by [`PathKey`] and produced through the same
//! [`Canonicalizer`] that event handlers use to invalidate them.

use std::cell::RefCell;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use rustc_hash::FxHashMap;
use tracing::{trace, warn};

use crate::paths::{Canonicalizer, PathKey, has_extension, to_slash_string};
use crate::system::{FileWatcherEventKind, System};

/// Directories never entered when expanding wildcards.
const SKIPPED_PACKAGE_DIRECTORIES: &[&str] = &["node_modules", "bower_components", "jspm_packages"];

#[derive(Clone, Debug, Default)]
struct CachedEntries {
    /// Names as reported by the host.
    files: Vec<String>,
    directories: Vec<String>,
    /// Canonical names, sorted for binary search.
    sorted_files: Vec<String>,
    sorted_directories: Vec<String>,
}

impl CachedEntries {
    fn new(files: Vec<String>, directories: Vec<String>, canonicalizer: &Canonicalizer) -> Self {
        let mut sorted_files: Vec<String> = files
            .iter()
            .map(|f| canonicalizer.canonical_file_name(f))
            .collect();
        sorted_files.sort();
        let mut sorted_directories: Vec<String> = directories
            .iter()
            .map(|d| canonicalizer.canonical_file_name(d))
            .collect();
        sorted_directories.sort();
        Self {
            files,
            directories,
            sorted_files,
            sorted_directories,
        }
    }

    fn has_file(&self, canonical: &str) -> bool {
        self.sorted_files
            .binary_search_by(|f| f.as_str().cmp(canonical))
            .is_ok()
    }

    fn has_directory(&self, canonical: &str) -> bool {
        self.sorted_directories
            .binary_search_by(|d| d.as_str().cmp(canonical))
            .is_ok()
    }

    fn set_file(&mut self, name: &str, exists: bool, canonicalizer: &Canonicalizer) {
        let canonical = canonicalizer.canonical_file_name(name);
        update_sorted(&mut self.sorted_files, &mut self.files, name, &canonical, exists, canonicalizer);
    }

    fn set_directory(&mut self, name: &str, exists: bool, canonicalizer: &Canonicalizer) {
        let canonical = canonicalizer.canonical_file_name(name);
        update_sorted(
            &mut self.sorted_directories,
            &mut self.directories,
            name,
            &canonical,
            exists,
            canonicalizer,
        );
    }
}

fn update_sorted(
    sorted: &mut Vec<String>,
    names: &mut Vec<String>,
    name: &str,
    canonical: &str,
    exists: bool,
    canonicalizer: &Canonicalizer,
) {
    match sorted.binary_search_by(|entry| entry.as_str().cmp(canonical)) {
        Ok(index) if !exists => {
            sorted.remove(index);
            if let Some(position) = names
                .iter()
                .position(|n| canonicalizer.canonical_file_name(n) == canonical)
            {
                names.remove(position);
            }
        }
        Err(index) if exists => {
            sorted.insert(index, canonical.to_string());
            names.push(name.to_string());
        }
        _ => {}
    }
}

#[derive(Clone, Debug)]
enum CachedDirectory {
    Listed(CachedEntries),
    /// A symlinked directory: known to exist, listing not cached.
    Linked,
}

/// What the host reported for a path named by a directory event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileSystemQueryResult {
    pub file_exists: bool,
    pub directory_exists: bool,
}

pub struct CachedDirectoryStructureHost {
    system: Rc<dyn System>,
    canonicalizer: Canonicalizer,
    listings: RefCell<FxHashMap<PathKey, CachedDirectory>>,
    /// Memoized `directory_exists` answers for paths without a listing.
    existence: RefCell<FxHashMap<PathKey, bool>>,
}

impl CachedDirectoryStructureHost {
    pub fn new(system: Rc<dyn System>) -> Self {
        let canonicalizer = Canonicalizer::new(
            system.current_directory(),
            system.use_case_sensitive_file_names(),
        );
        Self {
            system,
            canonicalizer,
            listings: RefCell::new(FxHashMap::default()),
            existence: RefCell::new(FxHashMap::default()),
        }
    }

    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canonicalizer
    }

    pub fn system(&self) -> &Rc<dyn System> {
        &self.system
    }

    pub fn to_path(&self, path: &Path) -> PathKey {
        self.canonicalizer.to_path(path)
    }

    pub fn is_listing_cached(&self, path: &Path) -> bool {
        let key = self.to_path(path);
        matches!(
            self.listings.borrow().get(&key),
            Some(CachedDirectory::Listed(_))
        )
    }

    pub fn cached_directory_count(&self) -> usize {
        self.listings.borrow().len()
    }

    pub fn file_exists(&self, path: &Path) -> bool {
        let key = self.to_path(path);
        if let Some(parent) = key.parent()
            && let Some(CachedDirectory::Listed(entries)) = self.listings.borrow().get(&parent)
            && entries.has_file(key.file_name())
        {
            return true;
        }
        self.system.file_exists(path)
    }

    pub fn directory_exists(&self, path: &Path) -> bool {
        let key = self.to_path(path);
        if self.listings.borrow().contains_key(&key) {
            return true;
        }
        if let Some(&exists) = self.existence.borrow().get(&key) {
            return exists;
        }
        let exists = self.system.directory_exists(path);
        self.existence.borrow_mut().insert(key, exists);
        exists
    }

    pub fn get_directories(&self, path: &Path) -> Vec<String> {
        let key = self.to_path(path);
        match self.try_read_directory(path, &key) {
            Some(CachedDirectory::Listed(entries)) => entries.directories,
            _ => self.system.get_file_system_entries(path).directories,
        }
    }

    pub fn read_file(&self, path: &Path) -> io::Result<String> {
        self.system.read_file(path)
    }

    pub fn realpath(&self, path: &Path) -> PathBuf {
        self.system.realpath(path)
    }

    pub fn write_file(&self, path: &Path, data: &str, write_byte_order_mark: bool) -> io::Result<()> {
        let key = self.to_path(path);
        if let Some(parent) = key.parent()
            && let Some(CachedDirectory::Listed(entries)) = self.listings.borrow_mut().get_mut(&parent)
        {
            entries.set_file(&base_name(path), true, &self.canonicalizer);
        }
        self.system.write_file(path, data, write_byte_order_mark)
    }

    pub fn create_directory(&self, path: &Path) -> io::Result<()> {
        let key = self.to_path(path);
        if let Some(parent) = key.parent()
            && let Some(CachedDirectory::Listed(entries)) = self.listings.borrow_mut().get_mut(&parent)
        {
            entries.set_directory(&base_name(path), true, &self.canonicalizer);
        }
        self.existence.borrow_mut().remove(&key);
        self.system.create_directory(path)
    }

    /// Files under `root` with one of `extensions`, matching `includes` (all
    /// files when empty) and not matching `excludes`. Patterns are absolute
    /// globs. `depth` limits how many directory levels below `root` are read.
    pub fn read_directory(
        &self,
        root: &Path,
        extensions: &[&str],
        excludes: &[String],
        includes: &[String],
        depth: Option<usize>,
    ) -> Vec<PathBuf> {
        let case_sensitive = self.canonicalizer.is_case_sensitive();
        let includes = build_matcher(includes, case_sensitive);
        let excludes = build_matcher(excludes, case_sensitive);
        let root = self.canonicalizer.absolute(root);
        let mut results = Vec::new();
        self.visit_directory(&root, extensions, includes.as_ref(), excludes.as_ref(), depth, &mut results);
        results
    }

    fn visit_directory(
        &self,
        dir: &Path,
        extensions: &[&str],
        includes: Option<&GlobSet>,
        excludes: Option<&GlobSet>,
        depth: Option<usize>,
        results: &mut Vec<PathBuf>,
    ) {
        let key = self.to_path(dir);
        let (mut files, mut directories) = match self.try_read_directory(dir, &key) {
            Some(CachedDirectory::Listed(entries)) => (entries.files, entries.directories),
            Some(CachedDirectory::Linked) => {
                let entries = self.system.get_file_system_entries(dir);
                (entries.files, entries.directories)
            }
            None => return,
        };
        files.sort();
        directories.sort();

        for name in files {
            if !extensions.is_empty() && !has_extension(&name, extensions) {
                continue;
            }
            let path = dir.join(&name);
            let text = to_slash_string(&path);
            if includes.is_some_and(|set| !set.is_match(&text)) {
                continue;
            }
            if excludes.is_some_and(|set| set.is_match(&text)) {
                continue;
            }
            results.push(path);
        }

        if depth == Some(0) {
            return;
        }
        for name in directories {
            if name.starts_with('.') || SKIPPED_PACKAGE_DIRECTORIES.contains(&name.as_str()) {
                continue;
            }
            let path = dir.join(&name);
            let text = to_slash_string(&path);
            if excludes.is_some_and(|set| set.is_match(&text)) {
                continue;
            }
            self.visit_directory(&path, extensions, includes, excludes, depth.map(|d| d - 1), results);
        }
    }

    /// Update the cache for a path reported by a directory watcher. Returns
    /// what the host says exists at `path` when the parent listing was cached.
    pub fn add_or_delete_file_or_directory(&self, path: &Path) -> Option<FileSystemQueryResult> {
        let key = self.to_path(path);
        if self.listings.borrow().contains_key(&key) {
            // A cached directory was itself added, removed or replaced.
            self.invalidate_directory(&key);
            let exists = self.system.directory_exists(path);
            if let Some(parent) = key.parent()
                && let Some(CachedDirectory::Listed(entries)) = self.listings.borrow_mut().get_mut(&parent)
            {
                entries.set_directory(&base_name(path), exists, &self.canonicalizer);
            }
            return None;
        }
        let Some(parent) = key.parent() else {
            return None;
        };
        let parent_listed = matches!(
            self.listings.borrow().get(&parent),
            Some(CachedDirectory::Listed(_))
        );
        if !parent_listed {
            self.clear_first_ancestor_entry(&key);
            self.clear_ancestor_existence(&key);
            return None;
        }

        let result = FileSystemQueryResult {
            file_exists: self.system.file_exists(path),
            directory_exists: self.system.directory_exists(path),
        };
        let name = base_name(path);
        let was_directory = match self.listings.borrow().get(&parent) {
            Some(CachedDirectory::Listed(entries)) => {
                entries.has_directory(&self.canonicalizer.canonical_file_name(&name))
            }
            _ => false,
        };
        if result.directory_exists || was_directory {
            self.invalidate_directory(&key);
            if let Some(CachedDirectory::Listed(entries)) = self.listings.borrow_mut().get_mut(&parent) {
                entries.set_directory(&name, result.directory_exists, &self.canonicalizer);
            }
        } else if let Some(CachedDirectory::Listed(entries)) = self.listings.borrow_mut().get_mut(&parent) {
            entries.set_file(&name, result.file_exists, &self.canonicalizer);
        }
        self.clear_ancestor_existence(&key);
        Some(result)
    }

    /// Update the parent listing for a file watcher event.
    pub fn add_or_delete_file(&self, path: &Path, key: &PathKey, kind: FileWatcherEventKind) {
        if kind == FileWatcherEventKind::Changed {
            return;
        }
        let Some(parent) = key.parent() else {
            return;
        };
        let updated = match self.listings.borrow_mut().get_mut(&parent) {
            Some(CachedDirectory::Listed(entries)) => {
                entries.set_file(
                    &base_name(path),
                    kind == FileWatcherEventKind::Created,
                    &self.canonicalizer,
                );
                true
            }
            _ => false,
        };
        if !updated {
            self.clear_first_ancestor_entry(key);
        }
        if kind == FileWatcherEventKind::Created {
            self.clear_ancestor_existence(key);
        }
    }

    pub fn clear_cache(&self) {
        trace!("directory structure cache cleared");
        self.listings.borrow_mut().clear();
        self.existence.borrow_mut().clear();
    }

    fn try_read_directory(&self, path: &Path, key: &PathKey) -> Option<CachedDirectory> {
        if let Some(cached) = self.listings.borrow().get(key) {
            return Some(cached.clone());
        }
        let real = self.to_path(&self.system.realpath(path));
        let entry = if real == *key {
            if !self.system.directory_exists(path) {
                return None;
            }
            let entries = self.system.get_file_system_entries(path);
            CachedDirectory::Listed(CachedEntries::new(
                entries.files,
                entries.directories,
                &self.canonicalizer,
            ))
        } else if self.system.directory_exists(path) {
            CachedDirectory::Linked
        } else {
            return None;
        };
        self.listings.borrow_mut().insert(key.clone(), entry.clone());
        Some(entry)
    }

    /// Drop a directory's listing and everything cached below it, plus the
    /// existence answers of its ancestors.
    fn invalidate_directory(&self, key: &PathKey) {
        self.listings
            .borrow_mut()
            .retain(|cached, _| cached != key && !cached.is_in_directory(key));
        self.existence
            .borrow_mut()
            .retain(|cached, _| cached != key && !cached.is_in_directory(key));
        self.clear_ancestor_existence(key);
    }

    fn clear_first_ancestor_entry(&self, key: &PathKey) {
        let mut listings = self.listings.borrow_mut();
        for ancestor in key.ancestors().skip(1) {
            if listings.remove(&ancestor).is_some() {
                return;
            }
        }
    }

    fn clear_ancestor_existence(&self, key: &PathKey) {
        let mut existence = self.existence.borrow_mut();
        for ancestor in key.ancestors() {
            existence.remove(&ancestor);
        }
    }
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

pub(crate) fn build_matcher(patterns: &[String], case_sensitive: bool) -> Option<GlobSet> {
    if patterns.is_empty() {
        return None;
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match GlobBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .literal_separator(true)
            .build()
        {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(err) => warn!(pattern = %pattern, error = %err, "ignoring invalid file pattern"),
        }
    }
    builder.build().ok()
}

#[cfg(test)]
#[path = "tests/directory_cache_tests.rs"]
mod tests;
