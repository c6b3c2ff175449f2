//! Program: the dependency-closed set of source files for one build.
//!
//! Type checking and emit live outside the watch core. The program here
//! discovers files through their references, records what could not be
//! found, and reports the diagnostics that discovery produces.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, debug_span};
use tsz_common::diagnostics::{Diagnostic, diagnostic_messages};

use crate::config::ResolvedCompilerOptions;
use crate::module_resolution::{
    Extension, ResolvedModuleWithFailedLookupLocations,
    ResolvedTypeReferenceDirectiveWithFailedLookupLocations,
};
use crate::paths::{PathKey, normalize_path, to_slash_string};
use crate::resolution_cache::HasInvalidatedResolution;
use crate::source_file::{FileReference, SourceFile};

/// File name used as the containing file when resolving automatic type
/// directives.
pub const INFERRED_TYPES_CONTAINING_FILE: &str = "__inferred type names__.ts";

/// Everything a program needs from its environment.
pub trait CompilerHost {
    fn get_source_file(&mut self, file_name: &Path, should_create_new_source_file: bool) -> Option<Rc<SourceFile>>;

    fn to_path(&self, file_name: &Path) -> PathKey;

    fn file_exists(&self, file_name: &Path) -> bool;

    fn get_current_directory(&self) -> PathBuf;

    fn resolve_module_names(
        &mut self,
        module_names: &[String],
        containing_file: &Path,
        reused_names: &[String],
        options: &ResolvedCompilerOptions,
    ) -> Vec<Rc<ResolvedModuleWithFailedLookupLocations>>;

    fn resolve_type_reference_directives(
        &mut self,
        names: &[String],
        containing_file: &Path,
        options: &ResolvedCompilerOptions,
    ) -> Vec<Rc<ResolvedTypeReferenceDirectiveWithFailedLookupLocations>>;

    fn get_automatic_type_directive_names(&self, options: &ResolvedCompilerOptions) -> Vec<String>;

    /// Files whose resolutions must not be taken from the old program.
    fn has_invalidated_resolution(&self, path: &PathKey) -> bool {
        let _ = path;
        false
    }

    fn has_changed_automatic_type_directive_names(&self) -> bool {
        false
    }

    /// Whether cached source files must be read again, e.g. because options
    /// that affect parsing changed.
    fn should_create_new_source_files(&self) -> bool {
        false
    }
}

/// How much of the old program survived.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StructureIsReused {
    Not,
    SafeModules,
    Completely,
}

pub struct CreateProgramOptions<'a> {
    pub root_names: &'a [PathBuf],
    pub options: &'a ResolvedCompilerOptions,
    pub config_file_parsing_diagnostics: &'a [Diagnostic],
}

type ModuleResolutions = Vec<(String, Rc<ResolvedModuleWithFailedLookupLocations>)>;
type TypeReferenceResolutions = Vec<(String, Rc<ResolvedTypeReferenceDirectiveWithFailedLookupLocations>)>;

#[derive(Debug)]
pub struct Program {
    root_names: Vec<PathBuf>,
    options: ResolvedCompilerOptions,
    files: Vec<Rc<SourceFile>>,
    files_by_path: FxHashMap<PathKey, usize>,
    external_library_files: FxHashSet<PathKey>,
    missing_file_paths: BTreeMap<PathKey, PathBuf>,
    resolved_modules: FxHashMap<PathKey, ModuleResolutions>,
    resolved_type_reference_directives: FxHashMap<PathKey, TypeReferenceResolutions>,
    references: FxHashMap<PathKey, Vec<PathKey>>,
    automatic_type_directive_names: Vec<String>,
    global_diagnostics: Vec<Diagnostic>,
    file_diagnostics: FxHashMap<PathKey, Vec<Diagnostic>>,
    config_file_parsing_diagnostics: Vec<Diagnostic>,
    structure_is_reused: StructureIsReused,
}

struct ProgramBuilder<'h, 'o> {
    host: &'h mut dyn CompilerHost,
    old_program: Option<&'o Program>,
    program: Program,
    queue: VecDeque<Rc<SourceFile>>,
    reused_files: usize,
    should_create_new_source_files: bool,
}

impl Program {
    pub fn create(
        create_options: CreateProgramOptions<'_>,
        host: &mut dyn CompilerHost,
        old_program: Option<&Program>,
    ) -> Program {
        let span = debug_span!("create_program", roots = create_options.root_names.len());
        let _enter = span.enter();

        let should_create_new_source_files = host.should_create_new_source_files();
        let mut builder = ProgramBuilder {
            host,
            old_program,
            program: Program {
                root_names: create_options.root_names.to_vec(),
                options: create_options.options.clone(),
                files: Vec::new(),
                files_by_path: FxHashMap::default(),
                external_library_files: FxHashSet::default(),
                missing_file_paths: BTreeMap::new(),
                resolved_modules: FxHashMap::default(),
                resolved_type_reference_directives: FxHashMap::default(),
                references: FxHashMap::default(),
                automatic_type_directive_names: Vec::new(),
                global_diagnostics: Vec::new(),
                file_diagnostics: FxHashMap::default(),
                config_file_parsing_diagnostics: create_options.config_file_parsing_diagnostics.to_vec(),
                structure_is_reused: StructureIsReused::Not,
            },
            queue: VecDeque::new(),
            reused_files: 0,
            should_create_new_source_files,
        };
        builder.build();
        let mut program = builder.program;
        let reused_files = builder.reused_files;

        program.structure_is_reused = match old_program {
            Some(old)
                if reused_files == program.files.len()
                    && old.files.len() == program.files.len()
                    && old.root_names == program.root_names =>
            {
                StructureIsReused::Completely
            }
            Some(_) if reused_files > 0 => StructureIsReused::SafeModules,
            _ => StructureIsReused::Not,
        };
        debug!(
            files = program.files.len(),
            missing = program.missing_file_paths.len(),
            reused = ?program.structure_is_reused,
            "program created"
        );
        program
    }

    pub fn root_names(&self) -> &[PathBuf] {
        &self.root_names
    }

    pub fn options(&self) -> &ResolvedCompilerOptions {
        &self.options
    }

    pub fn source_files(&self) -> &[Rc<SourceFile>] {
        &self.files
    }

    pub fn get_source_file_by_path(&self, path: &PathKey) -> Option<&Rc<SourceFile>> {
        self.files_by_path.get(path).map(|index| &self.files[*index])
    }

    pub fn missing_file_paths(&self) -> &BTreeMap<PathKey, PathBuf> {
        &self.missing_file_paths
    }

    pub fn is_source_file_from_external_library(&self, path: &PathKey) -> bool {
        self.external_library_files.contains(path)
    }

    pub fn resolved_modules(&self, path: &PathKey) -> &[(String, Rc<ResolvedModuleWithFailedLookupLocations>)] {
        self.resolved_modules
            .get(path)
            .map_or(&[], |resolutions| resolutions.as_slice())
    }

    pub fn resolved_type_reference_directives(
        &self,
        path: &PathKey,
    ) -> &[(String, Rc<ResolvedTypeReferenceDirectiveWithFailedLookupLocations>)] {
        self.resolved_type_reference_directives
            .get(path)
            .map_or(&[], |resolutions| resolutions.as_slice())
    }

    pub fn automatic_type_directive_names(&self) -> &[String] {
        &self.automatic_type_directive_names
    }

    pub fn structure_is_reused(&self) -> StructureIsReused {
        self.structure_is_reused
    }

    /// Files in the program that `path` references: resolved imports, type
    /// references and `/// <reference path>` targets.
    pub fn referenced_paths(&self, path: &PathKey) -> &[PathKey] {
        self.references
            .get(path)
            .map_or(&[], |references| references.as_slice())
    }

    pub fn get_config_file_parsing_diagnostics(&self) -> &[Diagnostic] {
        &self.config_file_parsing_diagnostics
    }

    /// Diagnostics not tied to one file: missing roots and unresolved
    /// automatic type directives.
    pub fn get_global_diagnostics(&self) -> &[Diagnostic] {
        &self.global_diagnostics
    }

    /// Diagnostics reported against `path`, such as unresolved imports.
    pub fn get_semantic_diagnostics(&self, path: &PathKey) -> &[Diagnostic] {
        self.file_diagnostics
            .get(path)
            .map_or(&[], |diagnostics| diagnostics.as_slice())
    }

    /// Config, global and per-file diagnostics, files in program order.
    pub fn all_diagnostics(&self) -> Vec<Diagnostic> {
        let mut diagnostics = self.config_file_parsing_diagnostics.clone();
        diagnostics.extend(self.global_diagnostics.iter().cloned());
        for file in &self.files {
            diagnostics.extend(self.get_semantic_diagnostics(&file.path).iter().cloned());
        }
        diagnostics
    }
}

impl ProgramBuilder<'_, '_> {
    fn build(&mut self) {
        let options = self.program.options.clone();
        for root in self.program.root_names.clone() {
            if self.process_file(&root, false).is_none() {
                let path = self.host.to_path(&root);
                self.program.missing_file_paths.insert(path, root.clone());
                self.program.global_diagnostics.push(Diagnostic::from_message(
                    &diagnostic_messages::FILE_NOT_FOUND,
                    &[&to_slash_string(&root)],
                ));
            }
        }
        self.drain_queue(&options);

        self.program.automatic_type_directive_names = self.host.get_automatic_type_directive_names(&options);
        if !self.program.automatic_type_directive_names.is_empty() {
            let containing = options
                .config_file_path
                .as_deref()
                .and_then(Path::parent)
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.host.get_current_directory())
                .join(INFERRED_TYPES_CONTAINING_FILE);
            let names = self.program.automatic_type_directive_names.clone();
            let resolutions = self
                .host
                .resolve_type_reference_directives(&names, &containing, &options);
            for (name, resolution) in names.iter().zip(resolutions) {
                match &resolution.resolved_type_reference_directive {
                    Some(directive) => {
                        let target = directive.resolved_file_name.clone();
                        self.process_file(&target, directive.is_external_library_import);
                    }
                    None => self.program.global_diagnostics.push(Diagnostic::from_message(
                        &diagnostic_messages::CANNOT_FIND_TYPE_DEFINITION_FILE,
                        &[name],
                    )),
                }
            }
            self.drain_queue(&options);
        }
    }

    fn drain_queue(&mut self, options: &ResolvedCompilerOptions) {
        while let Some(file) = self.queue.pop_front() {
            self.process_references(&file, options);
        }
    }

    /// Add `file_name` to the program unless it is already there. `None`
    /// when the host cannot supply it.
    fn process_file(&mut self, file_name: &Path, is_external_library: bool) -> Option<PathKey> {
        let path = self.host.to_path(file_name);
        if self.program.files_by_path.contains_key(&path) {
            return Some(path);
        }
        if self.program.missing_file_paths.contains_key(&path) {
            return None;
        }
        let Some(file) = self
            .host
            .get_source_file(file_name, self.should_create_new_source_files)
        else {
            self.program
                .missing_file_paths
                .insert(path, file_name.to_path_buf());
            return None;
        };
        if is_external_library {
            self.program.external_library_files.insert(path.clone());
        }
        self.program
            .files_by_path
            .insert(path.clone(), self.program.files.len());
        self.program.files.push(Rc::clone(&file));
        self.queue.push_back(file);
        Some(path)
    }

    fn process_references(&mut self, file: &Rc<SourceFile>, options: &ResolvedCompilerOptions) {
        let old_file = self
            .old_program
            .and_then(|old| old.get_source_file_by_path(&file.path).map(|f| (old, f)));
        let reuse_resolutions = old_file.is_some_and(|(_, old_file)| Rc::ptr_eq(old_file, file))
            && !self.host.has_invalidated_resolution(&file.path)
            && !self.host.has_changed_automatic_type_directive_names();
        if reuse_resolutions {
            self.reused_files += 1;
        }

        let mut references = Vec::new();
        let directory = file.file_name.parent().unwrap_or(Path::new("")).to_path_buf();
        for reference in &file.referenced_files {
            let target = normalize_path(&directory.join(&reference.file_name));
            if let Some(path) = self.process_file(&target, false) {
                references.push(path);
            } else {
                let message = Diagnostic::from_message(
                    &diagnostic_messages::FILE_NOT_FOUND,
                    &[&to_slash_string(&target)],
                );
                self.report(file, reference, message);
            }
        }

        let type_names = file.type_reference_names();
        let type_resolutions = match old_file {
            Some((old, _)) if reuse_resolutions => old
                .resolved_type_reference_directives(&file.path)
                .to_vec(),
            _ => {
                let resolved = self
                    .host
                    .resolve_type_reference_directives(&type_names, &file.file_name, options);
                type_names.iter().cloned().zip(resolved).collect()
            }
        };
        for (name, resolution) in &type_resolutions {
            match &resolution.resolved_type_reference_directive {
                Some(directive) => {
                    let target = directive.resolved_file_name.clone();
                    references.extend(self.process_file(&target, directive.is_external_library_import));
                }
                None => {
                    if let Some(reference) = file
                        .type_reference_directives
                        .iter()
                        .find(|r| &r.file_name == name)
                    {
                        let message = Diagnostic::from_message(
                            &diagnostic_messages::CANNOT_FIND_TYPE_DEFINITION_FILE,
                            &[name],
                        );
                        self.report(file, reference, message);
                    }
                }
            }
        }
        if !type_resolutions.is_empty() {
            self.program
                .resolved_type_reference_directives
                .insert(file.path.clone(), type_resolutions);
        }

        let module_names = file.module_names();
        let module_resolutions = match old_file {
            Some((old, _)) if reuse_resolutions => old.resolved_modules(&file.path).to_vec(),
            _ => {
                let resolved = self
                    .host
                    .resolve_module_names(&module_names, &file.file_name, &[], options);
                module_names.iter().cloned().zip(resolved).collect()
            }
        };
        for (name, resolution) in &module_resolutions {
            let included = resolution.resolved_module.as_ref().filter(|module| {
                match module.extension {
                    Extension::Ts | Extension::Tsx | Extension::Dts => true,
                    Extension::Js | Extension::Jsx => options.allow_js && !module.is_external_library_import,
                    Extension::Json => options.resolve_json_module,
                }
            });
            match included {
                Some(module) => {
                    let target = module.resolved_file_name.clone();
                    references.extend(self.process_file(&target, module.is_external_library_import));
                }
                None if resolution.resolved_module.is_none() => {
                    for reference in file.imported_files.iter().filter(|r| &r.file_name == name) {
                        let message = Diagnostic::from_message(
                            &diagnostic_messages::CANNOT_FIND_MODULE,
                            &[name],
                        );
                        self.report(file, reference, message);
                    }
                }
                None => {}
            }
        }
        if !module_resolutions.is_empty() {
            self.program
                .resolved_modules
                .insert(file.path.clone(), module_resolutions);
        }
        references.sort();
        references.dedup();
        if !references.is_empty() {
            self.program.references.insert(file.path.clone(), references);
        }
    }

    fn report(&mut self, file: &SourceFile, reference: &FileReference, diagnostic: Diagnostic) {
        let start = u32::try_from(reference.pos).unwrap_or(u32::MAX);
        let length = u32::try_from(reference.end - reference.pos).unwrap_or(0);
        self.program
            .file_diagnostics
            .entry(file.path.clone())
            .or_default()
            .push(diagnostic.in_file(to_slash_string(&file.file_name), start, length));
    }
}

/// Whether `program` can be kept as is for the given inputs.
pub fn is_program_up_to_date(
    program: Option<&Program>,
    root_names: &[PathBuf],
    options: &ResolvedCompilerOptions,
    get_source_version: impl Fn(&PathKey) -> Option<u32>,
    file_exists: impl Fn(&Path) -> bool,
    has_invalidated_resolution: &HasInvalidatedResolution,
    has_changed_automatic_type_directive_names: bool,
) -> bool {
    let Some(program) = program else {
        return false;
    };
    if has_changed_automatic_type_directive_names {
        return false;
    }
    if program.root_names != root_names {
        return false;
    }
    let file_not_up_to_date = |file: &Rc<SourceFile>| {
        get_source_version(&file.path) != Some(file.version)
            || has_invalidated_resolution.contains(&file.path)
    };
    if program.files.iter().any(file_not_up_to_date) {
        return false;
    }
    if program
        .missing_file_paths
        .values()
        .any(|file_name| file_exists(file_name))
    {
        return false;
    }
    program.options == *options
}

#[cfg(test)]
#[path = "tests/program_tests.rs"]
mod tests;
