//! Resolution cache: module and type reference resolutions per file, with
//! failed lookup tracking.
//!
//! Results are shared through `Rc` so that every file in a directory that
//! resolves the same name during one program pass sees the same object. Each
//! result is stored once in an arena and indexed by its failed lookup
//! locations and by the file it resolved to, which is how file system events
//! are turned into the set of files that must re-resolve.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::config::ResolvedCompilerOptions;
use crate::directory_cache::CachedDirectoryStructureHost;
use crate::module_resolution::{
    ResolutionWithFailedLookupLocations, ResolvedModuleWithFailedLookupLocations,
    ResolvedTypeReferenceDirectiveWithFailedLookupLocations, default_type_root_candidates,
    resolve_module_name, resolve_type_reference_directive,
};
use crate::paths::{PathKey, can_watch_directory};
use crate::watch_factory::{WatchFactory, WatchTarget, WatcherId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct ResolutionId(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ResolutionKind {
    Module,
    TypeReference,
}

#[derive(Debug)]
enum CachedResolution {
    Module(Rc<ResolvedModuleWithFailedLookupLocations>),
    TypeReference(Rc<ResolvedTypeReferenceDirectiveWithFailedLookupLocations>),
}

impl CachedResolution {
    fn as_dyn(&self) -> &dyn ResolutionWithFailedLookupLocations {
        match self {
            CachedResolution::Module(resolution) => &**resolution,
            CachedResolution::TypeReference(resolution) => &**resolution,
        }
    }
}

#[derive(Debug)]
struct ResolutionEntry {
    resolution: CachedResolution,
    /// Files holding this resolution in their per-file map.
    files: BTreeSet<PathKey>,
    invalidated: bool,
    failed_lookups: Vec<PathKey>,
    /// Directory watch keys acquired for `failed_lookups`, one per location.
    watched_directories: Vec<PathKey>,
    resolved_file: Option<PathKey>,
}

#[derive(Debug)]
struct DirectoryWatchesOfFailedLookup {
    watcher: WatcherId,
    ref_count: usize,
    recursive: bool,
}

#[derive(Debug, Default)]
struct KindCache {
    per_file: FxHashMap<PathKey, FxHashMap<String, ResolutionId>>,
    /// Keyed by containing directory and resolution fingerprint. Only filled
    /// between `start_caching_per_directory_resolution` and
    /// `finish_caching_per_directory_resolution`.
    per_directory: FxHashMap<(PathKey, u64), FxHashMap<String, ResolutionId>>,
}

/// Files whose resolutions must be recomputed on the next program pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HasInvalidatedResolution {
    all: bool,
    files: FxHashSet<PathKey>,
}

impl HasInvalidatedResolution {
    pub fn contains(&self, path: &PathKey) -> bool {
        self.all || self.files.contains(path)
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.files.is_empty()
    }
}

pub struct ResolutionCache {
    host: Rc<CachedDirectoryStructureHost>,
    root_directory: PathBuf,
    root_key: PathKey,
    modules: KindCache,
    type_references: KindCache,
    entries: FxHashMap<ResolutionId, ResolutionEntry>,
    next_id: u32,
    resolutions_by_failed_lookup: BTreeMap<PathKey, BTreeSet<ResolutionId>>,
    resolutions_by_resolved_file: FxHashMap<PathKey, BTreeSet<ResolutionId>>,
    directory_watches_of_failed_lookups: FxHashMap<PathKey, DirectoryWatchesOfFailedLookup>,
    type_roots_watches: BTreeMap<PathKey, WatcherId>,
    files_with_invalidated_resolutions: FxHashSet<PathKey>,
    has_changed_automatic_type_directive_names: bool,
    caching_per_directory: bool,
}

impl ResolutionCache {
    /// `root_directory` is the config file directory, or the current
    /// directory when there is no config file. Failed lookups below it share
    /// one recursive watch.
    pub fn new(host: Rc<CachedDirectoryStructureHost>, root_directory: &Path) -> Self {
        let root_key = host.to_path(root_directory);
        Self {
            root_directory: host.canonicalizer().absolute(root_directory),
            root_key,
            host,
            modules: KindCache::default(),
            type_references: KindCache::default(),
            entries: FxHashMap::default(),
            next_id: 0,
            resolutions_by_failed_lookup: BTreeMap::new(),
            resolutions_by_resolved_file: FxHashMap::default(),
            directory_watches_of_failed_lookups: FxHashMap::default(),
            type_roots_watches: BTreeMap::new(),
            files_with_invalidated_resolutions: FxHashSet::default(),
            has_changed_automatic_type_directive_names: false,
            caching_per_directory: false,
        }
    }

    pub fn root_directory(&self) -> &Path {
        &self.root_directory
    }

    pub fn start_caching_per_directory_resolution(&mut self) {
        self.modules.per_directory.clear();
        self.type_references.per_directory.clear();
        self.caching_per_directory = true;
    }

    /// Ends the program pass: drops the per-directory tier and closes failed
    /// lookup watches nobody acquired again during the pass.
    pub fn finish_caching_per_directory_resolution(&mut self, factory: &mut WatchFactory) {
        self.modules.per_directory.clear();
        self.type_references.per_directory.clear();
        self.caching_per_directory = false;
        self.has_changed_automatic_type_directive_names = false;
        self.close_unreferenced_directory_watches(factory);
    }

    pub fn resolve_module_names(
        &mut self,
        names: &[String],
        containing_file: &Path,
        reused_names: &[String],
        options: &ResolvedCompilerOptions,
        factory: &mut WatchFactory,
    ) -> Vec<Rc<ResolvedModuleWithFailedLookupLocations>> {
        let host = Rc::clone(&self.host);
        let ids = self.resolve_names_with_local_cache(
            ResolutionKind::Module,
            names,
            containing_file,
            reused_names,
            options,
            factory,
            |name| {
                CachedResolution::Module(Rc::new(resolve_module_name(
                    name,
                    containing_file,
                    options,
                    &*host,
                )))
            },
        );
        ids.into_iter()
            .map(|id| match self.entries.get(&id).map(|e| &e.resolution) {
                Some(CachedResolution::Module(resolution)) => Rc::clone(resolution),
                _ => Rc::default(),
            })
            .collect()
    }

    pub fn resolve_type_reference_directives(
        &mut self,
        names: &[String],
        containing_file: &Path,
        options: &ResolvedCompilerOptions,
        factory: &mut WatchFactory,
    ) -> Vec<Rc<ResolvedTypeReferenceDirectiveWithFailedLookupLocations>> {
        let host = Rc::clone(&self.host);
        let ids = self.resolve_names_with_local_cache(
            ResolutionKind::TypeReference,
            names,
            containing_file,
            &[],
            options,
            factory,
            |name| {
                CachedResolution::TypeReference(Rc::new(resolve_type_reference_directive(
                    name,
                    Some(containing_file),
                    options,
                    &*host,
                )))
            },
        );
        ids.into_iter()
            .map(|id| match self.entries.get(&id).map(|e| &e.resolution) {
                Some(CachedResolution::TypeReference(resolution)) => Rc::clone(resolution),
                _ => Rc::default(),
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_names_with_local_cache(
        &mut self,
        kind: ResolutionKind,
        names: &[String],
        containing_file: &Path,
        reused_names: &[String],
        options: &ResolvedCompilerOptions,
        factory: &mut WatchFactory,
        mut loader: impl FnMut(&str) -> CachedResolution,
    ) -> Vec<ResolutionId> {
        let path = self.host.to_path(containing_file);
        let directory_key = path
            .parent()
            .map(|dir| (dir, options.resolution_fingerprint()));
        let mut resolutions_in_file = self
            .kind_cache(kind)
            .per_file
            .remove(&path)
            .unwrap_or_default();

        let mut seen: FxHashSet<&str> = FxHashSet::default();
        let mut result = Vec::with_capacity(names.len());
        for name in names {
            seen.insert(name.as_str());
            let existing = resolutions_in_file.get(name).copied();
            if let Some(id) = existing.filter(|id| self.is_valid(*id)) {
                result.push(id);
                continue;
            }

            let from_directory = match &directory_key {
                Some(key) if self.caching_per_directory => self
                    .kind_cache_ref(kind)
                    .per_directory
                    .get(key)
                    .and_then(|names| names.get(name))
                    .copied()
                    .filter(|id| self.is_valid(*id)),
                _ => None,
            };
            let id = match from_directory {
                Some(id) => {
                    trace!(name = %name, file = %path, "reusing per-directory resolution");
                    id
                }
                None => {
                    let id = self.insert_entry(loader(name), factory);
                    if self.caching_per_directory
                        && let Some(key) = directory_key.clone()
                    {
                        self.kind_cache(kind)
                            .per_directory
                            .entry(key)
                            .or_default()
                            .insert(name.clone(), id);
                    }
                    id
                }
            };

            if let Some(entry) = self.entries.get_mut(&id) {
                entry.files.insert(path.clone());
            }
            resolutions_in_file.insert(name.clone(), id);
            if let Some(old) = existing
                && old != id
            {
                self.release_file_from_entry(old, &path);
            }
            result.push(id);
        }

        let stale: Vec<(String, ResolutionId)> = resolutions_in_file
            .iter()
            .filter(|(name, _)| !seen.contains(name.as_str()) && !reused_names.contains(name))
            .map(|(name, id)| (name.clone(), *id))
            .collect();
        for (name, id) in stale {
            resolutions_in_file.remove(&name);
            self.release_file_from_entry(id, &path);
        }

        self.files_with_invalidated_resolutions.remove(&path);
        if !resolutions_in_file.is_empty() {
            self.kind_cache(kind).per_file.insert(path, resolutions_in_file);
        }
        result
    }

    fn kind_cache(&mut self, kind: ResolutionKind) -> &mut KindCache {
        match kind {
            ResolutionKind::Module => &mut self.modules,
            ResolutionKind::TypeReference => &mut self.type_references,
        }
    }

    fn kind_cache_ref(&self, kind: ResolutionKind) -> &KindCache {
        match kind {
            ResolutionKind::Module => &self.modules,
            ResolutionKind::TypeReference => &self.type_references,
        }
    }

    fn is_valid(&self, id: ResolutionId) -> bool {
        self.entries.get(&id).is_some_and(|entry| !entry.invalidated)
    }

    fn insert_entry(&mut self, resolution: CachedResolution, factory: &mut WatchFactory) -> ResolutionId {
        let id = ResolutionId(self.next_id);
        self.next_id += 1;

        let view = resolution.as_dyn();
        let locations = view.failed_lookup_locations().to_vec();
        let resolved_file = view.resolved_file_name().map(|p| self.host.to_path(p));

        let mut failed_lookups = Vec::with_capacity(locations.len());
        let mut watched_directories = Vec::new();
        for location in &locations {
            let key = self.host.to_path(location);
            self.resolutions_by_failed_lookup
                .entry(key.clone())
                .or_default()
                .insert(id);
            if let Some((dir, dir_key, recursive)) =
                self.get_directory_to_watch_failed_lookup_location(location, &key)
            {
                self.acquire_directory_watch(&dir, &dir_key, recursive, factory);
                watched_directories.push(dir_key);
            }
            failed_lookups.push(key);
        }
        if let Some(resolved) = &resolved_file {
            self.resolutions_by_resolved_file
                .entry(resolved.clone())
                .or_default()
                .insert(id);
        }

        self.entries.insert(
            id,
            ResolutionEntry {
                resolution,
                files: BTreeSet::new(),
                invalidated: false,
                failed_lookups,
                watched_directories,
                resolved_file,
            },
        );
        id
    }

    /// Drop `path` from an entry, freeing the entry when no file holds it.
    fn release_file_from_entry(&mut self, id: ResolutionId, path: &PathKey) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.files.remove(path);
        if !entry.files.is_empty() {
            return;
        }
        let Some(entry) = self.entries.remove(&id) else {
            return;
        };
        for key in &entry.failed_lookups {
            if let Some(ids) = self.resolutions_by_failed_lookup.get_mut(key) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.resolutions_by_failed_lookup.remove(key);
                }
            }
        }
        if let Some(resolved) = &entry.resolved_file
            && let Some(ids) = self.resolutions_by_resolved_file.get_mut(resolved)
        {
            ids.remove(&id);
            if ids.is_empty() {
                self.resolutions_by_resolved_file.remove(resolved);
            }
        }
        for dir_key in &entry.watched_directories {
            if let Some(watch) = self.directory_watches_of_failed_lookups.get_mut(dir_key) {
                watch.ref_count = watch.ref_count.saturating_sub(1);
            }
        }
    }

    /// Directory whose watch covers a failed lookup location, and whether it
    /// is watched recursively.
    fn get_directory_to_watch_failed_lookup_location(
        &self,
        location: &Path,
        key: &PathKey,
    ) -> Option<(PathBuf, PathKey, bool)> {
        if key.is_in_directory(&self.root_key) {
            return Some((self.root_directory.clone(), self.root_key.clone(), true));
        }
        let dir = location.parent()?.to_path_buf();
        let dir_key = key.parent()?;
        self.get_directory_to_watch_from_failed_lookup_directory(dir, dir_key)
    }

    fn get_directory_to_watch_from_failed_lookup_directory(
        &self,
        mut dir: PathBuf,
        mut dir_key: PathKey,
    ) -> Option<(PathBuf, PathKey, bool)> {
        // Anything under node_modules is covered by one watch on the
        // outermost node_modules directory.
        while dir_key.as_str().contains("/node_modules/") {
            dir = dir.parent()?.to_path_buf();
            dir_key = dir_key.parent()?;
        }
        if dir_key.is_node_modules_directory() {
            let owner = dir_key.parent()?;
            return can_watch_directory(&owner).then_some((dir, dir_key, true));
        }

        let mut recursive = false;
        let mut sub_directory = None;
        while !self.root_key.is_in_directory(&dir_key) {
            let Some(parent_key) = dir_key.parent() else {
                break;
            };
            let Some(parent) = dir.parent().map(Path::to_path_buf) else {
                break;
            };
            recursive = true;
            sub_directory = Some((dir, dir_key));
            dir = parent;
            dir_key = parent_key;
        }
        if !can_watch_directory(&dir_key) {
            return None;
        }
        Some(match sub_directory {
            Some((sub, sub_key)) => (sub, sub_key, recursive),
            None => (dir, dir_key, recursive),
        })
    }

    fn acquire_directory_watch(
        &mut self,
        dir: &Path,
        dir_key: &PathKey,
        recursive: bool,
        factory: &mut WatchFactory,
    ) {
        if let Some(watch) = self.directory_watches_of_failed_lookups.get_mut(dir_key) {
            watch.ref_count += 1;
            if recursive && !watch.recursive {
                factory.close(watch.watcher);
                watch.watcher = factory.watch_directory(
                    dir,
                    true,
                    WatchTarget::FailedLookupLocations(dir_key.clone()),
                );
                watch.recursive = true;
            }
            return;
        }
        debug!(dir = %dir_key, recursive, "watching failed lookup directory");
        let watcher = factory.watch_directory(
            dir,
            recursive,
            WatchTarget::FailedLookupLocations(dir_key.clone()),
        );
        self.directory_watches_of_failed_lookups.insert(
            dir_key.clone(),
            DirectoryWatchesOfFailedLookup {
                watcher,
                ref_count: 1,
                recursive,
            },
        );
    }

    fn close_unreferenced_directory_watches(&mut self, factory: &mut WatchFactory) {
        let unreferenced: Vec<PathKey> = self
            .directory_watches_of_failed_lookups
            .iter()
            .filter(|(_, watch)| watch.ref_count == 0)
            .map(|(key, _)| key.clone())
            .collect();
        for key in unreferenced {
            if let Some(watch) = self.directory_watches_of_failed_lookups.remove(&key) {
                debug!(dir = %key, "closing failed lookup directory watch");
                factory.close(watch.watcher);
            }
        }
    }

    /// Mark every resolution that probed `path` (or anything below it) as
    /// invalidated. Returns true when at least one resolution was affected.
    pub fn invalidate_resolution_of_failed_lookup_location(&mut self, path: &Path) -> bool {
        let key = self.host.to_path(path);
        let ids: BTreeSet<ResolutionId> = self
            .resolutions_by_failed_lookup
            .range(key.clone()..)
            .take_while(|(location, _)| location.as_str().starts_with(key.as_str()))
            .filter(|(location, _)| location.is_in_directory(&key))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect();
        if ids.is_empty() {
            return false;
        }
        debug!(path = %key, count = ids.len(), "invalidating resolutions for failed lookup");
        self.invalidate_resolutions(ids);
        true
    }

    /// Mark every resolution that resolved to `path` as invalidated. The
    /// results stay available until the owning files re-resolve.
    pub fn invalidate_resolution_of_file(&mut self, path: &PathKey) -> bool {
        let Some(ids) = self.resolutions_by_resolved_file.get(path).cloned() else {
            return false;
        };
        debug!(path = %path, count = ids.len(), "invalidating resolutions to file");
        self.invalidate_resolutions(ids);
        true
    }

    fn invalidate_resolutions(&mut self, ids: BTreeSet<ResolutionId>) {
        let mut files = Vec::new();
        for id in ids {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.invalidated = true;
                files.extend(entry.files.iter().cloned());
            }
        }
        self.files_with_invalidated_resolutions.extend(files);
    }

    /// Release every resolution made from `path`.
    pub fn remove_resolutions_of_file(&mut self, path: &PathKey) {
        for kind in [ResolutionKind::Module, ResolutionKind::TypeReference] {
            let Some(names) = self.kind_cache(kind).per_file.remove(path) else {
                continue;
            };
            for id in names.into_values() {
                self.release_file_from_entry(id, path);
            }
        }
        self.files_with_invalidated_resolutions.remove(path);
    }

    /// Snapshot and reset the invalidated file set. `force_all` treats every
    /// file as invalidated.
    pub fn create_has_invalidated_resolution(&mut self, force_all: bool) -> HasInvalidatedResolution {
        HasInvalidatedResolution {
            all: force_all,
            files: std::mem::take(&mut self.files_with_invalidated_resolutions),
        }
    }

    pub fn has_changed_automatic_type_directive_names(&self) -> bool {
        self.has_changed_automatic_type_directive_names
    }

    /// Watch the type roots that can contribute automatic type directives.
    /// Nothing is watched when `types` lists them explicitly.
    pub fn update_type_roots_watch(&mut self, options: &ResolvedCompilerOptions, factory: &mut WatchFactory) {
        if options.types.is_some() {
            self.close_type_roots_watch(factory);
            return;
        }
        let roots = match &options.type_roots {
            Some(roots) => roots.clone(),
            None => default_type_root_candidates(options, &*self.host)
                .into_iter()
                .filter(|root| {
                    let Some(owner) = root
                        .parent()
                        .and_then(Path::parent)
                        .map(|dir| self.host.to_path(dir))
                    else {
                        return false;
                    };
                    owner == self.root_key || can_watch_directory(&owner)
                })
                .collect(),
        };

        let desired: BTreeMap<PathKey, PathBuf> = roots
            .into_iter()
            .map(|root| (self.host.to_path(&root), root))
            .collect();
        let removed: Vec<PathKey> = self
            .type_roots_watches
            .keys()
            .filter(|key| !desired.contains_key(*key))
            .cloned()
            .collect();
        for key in removed {
            if let Some(watcher) = self.type_roots_watches.remove(&key) {
                factory.close(watcher);
            }
        }
        for (key, root) in desired {
            if self.type_roots_watches.contains_key(&key) {
                continue;
            }
            let watcher = factory.watch_directory(&root, true, WatchTarget::TypeRoots(key.clone()));
            self.type_roots_watches.insert(key, watcher);
        }
    }

    fn close_type_roots_watch(&mut self, factory: &mut WatchFactory) {
        for (_, watcher) in std::mem::take(&mut self.type_roots_watches) {
            factory.close(watcher);
        }
    }

    /// Something was added or removed below a type root.
    pub fn on_type_roots_directory_changed(&mut self, path: &Path) {
        self.has_changed_automatic_type_directive_names = true;
        self.invalidate_resolution_of_failed_lookup_location(path);
    }

    pub fn type_roots_watch_count(&self) -> usize {
        self.type_roots_watches.len()
    }

    pub fn is_watching_failed_lookup_directory(&self, dir: &PathKey) -> bool {
        self.directory_watches_of_failed_lookups.contains_key(dir)
    }

    pub fn failed_lookup_directory_watch_count(&self) -> usize {
        self.directory_watches_of_failed_lookups.len()
    }

    /// Number of distinct cached resolutions.
    pub fn resolution_count(&self) -> usize {
        self.entries.len()
    }

    /// Forget everything, closing every watch this cache owns.
    pub fn clear(&mut self, factory: &mut WatchFactory) {
        debug!("clearing resolution cache");
        for (_, watch) in self.directory_watches_of_failed_lookups.drain() {
            factory.close(watch.watcher);
        }
        self.close_type_roots_watch(factory);
        self.modules = KindCache::default();
        self.type_references = KindCache::default();
        self.entries.clear();
        self.resolutions_by_failed_lookup.clear();
        self.resolutions_by_resolved_file.clear();
        self.files_with_invalidated_resolutions.clear();
        self.has_changed_automatic_type_directive_names = false;
    }
}

#[cfg(test)]
#[path = "tests/resolution_cache_tests.rs"]
mod tests;
