//! Compiler host for program and builder tests: resolves straight through
//! the module resolver and keeps one `Rc<SourceFile>` per path until the
//! test edits the file.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::ResolvedCompilerOptions;
use crate::directory_cache::CachedDirectoryStructureHost;
use crate::module_resolution::{
    ResolvedModuleWithFailedLookupLocations, ResolvedTypeReferenceDirectiveWithFailedLookupLocations,
    get_automatic_type_directive_names, resolve_module_name, resolve_type_reference_directive,
};
use crate::paths::PathKey;
use crate::program::{CompilerHost, CreateProgramOptions, Program};
use crate::source_file::SourceFile;
use crate::system::System;
use crate::virtual_system::VirtualSystem;

pub(crate) struct TestHost {
    pub(crate) sys: Rc<VirtualSystem>,
    pub(crate) host: Rc<CachedDirectoryStructureHost>,
    pub(crate) files: FxHashMap<PathKey, Rc<SourceFile>>,
    versions: FxHashMap<PathKey, u32>,
    pub(crate) module_resolution_calls: usize,
    pub(crate) invalidated: FxHashSet<PathKey>,
    pub(crate) options: ResolvedCompilerOptions,
}

impl TestHost {
    pub(crate) fn new() -> Self {
        let sys = Rc::new(VirtualSystem::new("/project"));
        let host = Rc::new(CachedDirectoryStructureHost::new(sys.clone()));
        Self {
            sys,
            host,
            files: FxHashMap::default(),
            versions: FxHashMap::default(),
            module_resolution_calls: 0,
            invalidated: FxHashSet::default(),
            options: ResolvedCompilerOptions::default(),
        }
    }

    pub(crate) fn key(&self, path: &str) -> PathKey {
        self.host.to_path(Path::new(path))
    }

    /// Write `path` and forget the cached copy so the next program reads
    /// the new text.
    pub(crate) fn edit(&mut self, path: &str, text: &str) {
        self.sys.write(path, text);
        self.host.add_or_delete_file_or_directory(Path::new(path));
        let key = self.key(path);
        self.files.remove(&key);
    }

    pub(crate) fn delete(&mut self, path: &str) {
        self.sys.remove(path);
        self.host.add_or_delete_file_or_directory(Path::new(path));
        let key = self.key(path);
        self.files.remove(&key);
    }

    pub(crate) fn create_program(&mut self, roots: &[&str], old: Option<&Program>) -> Program {
        let roots: Vec<PathBuf> = roots.iter().map(PathBuf::from).collect();
        let options = self.options.clone();
        Program::create(
            CreateProgramOptions {
                root_names: &roots,
                options: &options,
                config_file_parsing_diagnostics: &[],
            },
            self,
            old,
        )
    }
}

impl CompilerHost for TestHost {
    fn get_source_file(&mut self, file_name: &Path, should_create_new_source_file: bool) -> Option<Rc<SourceFile>> {
        let path = self.host.to_path(file_name);
        if !should_create_new_source_file && let Some(file) = self.files.get(&path) {
            return Some(Rc::clone(file));
        }
        let text = self.host.read_file(file_name).ok()?;
        let version = self.versions.entry(path.clone()).or_insert(0);
        *version += 1;
        let hash = self.sys.create_hash(&text);
        let file = Rc::new(SourceFile::new(file_name.to_path_buf(), path.clone(), text, *version, hash));
        self.files.insert(path, Rc::clone(&file));
        Some(file)
    }

    fn to_path(&self, file_name: &Path) -> PathKey {
        self.host.to_path(file_name)
    }

    fn file_exists(&self, file_name: &Path) -> bool {
        self.host.file_exists(file_name)
    }

    fn get_current_directory(&self) -> PathBuf {
        PathBuf::from("/project")
    }

    fn resolve_module_names(
        &mut self,
        module_names: &[String],
        containing_file: &Path,
        _reused_names: &[String],
        options: &ResolvedCompilerOptions,
    ) -> Vec<Rc<ResolvedModuleWithFailedLookupLocations>> {
        self.module_resolution_calls += 1;
        module_names
            .iter()
            .map(|name| Rc::new(resolve_module_name(name, containing_file, options, &*self.host)))
            .collect()
    }

    fn resolve_type_reference_directives(
        &mut self,
        names: &[String],
        containing_file: &Path,
        options: &ResolvedCompilerOptions,
    ) -> Vec<Rc<ResolvedTypeReferenceDirectiveWithFailedLookupLocations>> {
        names
            .iter()
            .map(|name| {
                Rc::new(resolve_type_reference_directive(
                    name,
                    Some(containing_file),
                    options,
                    &*self.host,
                ))
            })
            .collect()
    }

    fn get_automatic_type_directive_names(&self, options: &ResolvedCompilerOptions) -> Vec<String> {
        get_automatic_type_directive_names(options, &*self.host)
    }

    fn has_invalidated_resolution(&self, path: &PathKey) -> bool {
        self.invalidated.contains(path)
    }
}
