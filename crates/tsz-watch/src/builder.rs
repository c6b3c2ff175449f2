//! Builder program: what changed between two programs and what that
//! change affects.
//!
//! The reference map tracks file references in both directions. When file
//! A references file B we record:
//! - `references`: A -> {B}
//! - `referenced_by`: B -> {A}
//!
//! A file is changed when its content hash or its reference set differs
//! from the previous build. The affected set is every changed file plus the
//! transitive closure of files that reference one.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};
use tsz_common::diagnostics::Diagnostic;

use crate::cancellation::{CancellationToken, OperationCanceledError};
use crate::config::{changes_affect_emit, changes_affect_semantic_diagnostics};
use crate::paths::{PathKey, normalize_path};
use crate::program::Program;

/// Bidirectional reference graph between program files.
#[derive(Default, Debug, Clone)]
pub struct ReferenceMap {
    /// file -> files it references
    references: FxHashMap<PathKey, FxHashSet<PathKey>>,
    /// file -> files that reference it
    referenced_by: FxHashMap<PathKey, FxHashSet<PathKey>>,
}

impl ReferenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the map from the references a program recorded.
    pub fn from_program(program: &Program) -> Self {
        let mut map = Self::new();
        for file in program.source_files() {
            map.update_file(&file.path, program.referenced_paths(&file.path));
        }
        map
    }

    /// Replace the outgoing edges of `file`.
    pub fn update_file(&mut self, file: &PathKey, references: &[PathKey]) {
        if let Some(old) = self.references.get(file) {
            for referenced in old {
                if let Some(rev) = self.referenced_by.get_mut(referenced) {
                    rev.remove(file);
                    if rev.is_empty() {
                        self.referenced_by.remove(referenced);
                    }
                }
            }
        }

        if references.is_empty() {
            self.references.remove(file);
            return;
        }
        self.references
            .insert(file.clone(), references.iter().cloned().collect());
        for referenced in references {
            self.referenced_by
                .entry(referenced.clone())
                .or_default()
                .insert(file.clone());
        }
    }

    pub fn remove_file(&mut self, file: &PathKey) {
        self.update_file(file, &[]);
        if let Some(referencing) = self.referenced_by.remove(file) {
            for dependent in referencing {
                if let Some(references) = self.references.get_mut(&dependent) {
                    references.remove(file);
                }
            }
        }
    }

    pub fn get_references(&self, file: &PathKey) -> Option<&FxHashSet<PathKey>> {
        self.references.get(file)
    }

    pub fn get_referenced_by(&self, file: &PathKey) -> Option<&FxHashSet<PathKey>> {
        self.referenced_by.get(file)
    }

    /// Whether `file` references exactly `references`.
    fn has_same_references(&self, file: &PathKey, references: &[PathKey]) -> bool {
        match self.references.get(file) {
            Some(old) => old.len() == references.len() && references.iter().all(|r| old.contains(r)),
            None => references.is_empty(),
        }
    }

    /// Every file that transitively references `file`, not including
    /// `file` itself unless it sits on a cycle.
    pub fn get_files_referencing(&self, file: &PathKey) -> FxHashSet<PathKey> {
        let mut affected = FxHashSet::default();
        let mut stack = vec![file.clone()];
        while let Some(current) = stack.pop() {
            if let Some(dependents) = self.referenced_by.get(&current) {
                for dependent in dependents {
                    if affected.insert(dependent.clone()) {
                        stack.push(dependent.clone());
                    }
                }
            }
        }
        affected
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EmitResult {
    pub emit_skipped: bool,
    /// Output files that would be written, in program order.
    pub emitted_files: Vec<PathBuf>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Incremental state layered over a [`Program`].
#[derive(Debug)]
pub struct BuilderProgram {
    program: Rc<Program>,
    reference_map: ReferenceMap,
    file_hashes: FxHashMap<PathKey, String>,
    changed_files: BTreeSet<PathKey>,
    /// Affected files in program order.
    affected_files: Vec<PathKey>,
    semantic_diagnostics_per_file: FxHashMap<PathKey, Vec<Diagnostic>>,
    affected_files_pending_emit: BTreeSet<PathKey>,
}

impl BuilderProgram {
    /// Wrap `program`, carrying forward whatever `old` computed for files
    /// the change did not affect.
    pub fn create(program: Rc<Program>, old: Option<BuilderProgram>) -> BuilderProgram {
        let reference_map = ReferenceMap::from_program(&program);
        let file_hashes: FxHashMap<PathKey, String> = program
            .source_files()
            .iter()
            .map(|file| (file.path.clone(), file.hash.clone()))
            .collect();

        let Some(old) = old else {
            let all: Vec<PathKey> = program.source_files().iter().map(|f| f.path.clone()).collect();
            debug!(files = all.len(), "builder created without reusable state");
            return BuilderProgram {
                changed_files: all.iter().cloned().collect(),
                affected_files_pending_emit: all.iter().cloned().collect(),
                affected_files: all,
                program,
                reference_map,
                file_hashes,
                semantic_diagnostics_per_file: FxHashMap::default(),
            };
        };

        let mut changed_files = BTreeSet::new();
        for file in program.source_files() {
            let same_content = old.file_hashes.get(&file.path) == Some(&file.hash);
            let same_references = old
                .reference_map
                .has_same_references(&file.path, program.referenced_paths(&file.path));
            if !same_content || !same_references {
                trace!(path = %file.path, same_content, same_references, "file changed");
                changed_files.insert(file.path.clone());
            }
        }

        let mut affected: FxHashSet<PathKey> = FxHashSet::default();
        for path in &changed_files {
            affected.insert(path.clone());
            affected.extend(reference_map.get_files_referencing(path));
        }
        for path in old.file_hashes.keys() {
            if !file_hashes.contains_key(path) {
                affected.extend(old.reference_map.get_files_referencing(path));
            }
        }
        let semantic_options_changed =
            changes_affect_semantic_diagnostics(old.program.options(), program.options());
        let emit_options_changed = changes_affect_emit(old.program.options(), program.options());
        if semantic_options_changed || emit_options_changed {
            debug!(semantic_options_changed, emit_options_changed, "compiler options changed");
        }

        let affected_files: Vec<PathKey> = program
            .source_files()
            .iter()
            .filter(|file| semantic_options_changed || affected.contains(&file.path))
            .map(|file| file.path.clone())
            .collect();

        let mut semantic_diagnostics_per_file = old.semantic_diagnostics_per_file;
        if semantic_options_changed {
            semantic_diagnostics_per_file.clear();
        }
        semantic_diagnostics_per_file
            .retain(|path, _| file_hashes.contains_key(path) && !affected.contains(path));

        let mut affected_files_pending_emit = old.affected_files_pending_emit;
        affected_files_pending_emit.retain(|path| file_hashes.contains_key(path));
        affected_files_pending_emit.extend(affected_files.iter().cloned());
        if emit_options_changed {
            affected_files_pending_emit.extend(file_hashes.keys().cloned());
        }

        debug!(
            changed = changed_files.len(),
            affected = affected_files.len(),
            pending_emit = affected_files_pending_emit.len(),
            "builder updated"
        );
        BuilderProgram {
            program,
            reference_map,
            file_hashes,
            changed_files,
            affected_files,
            semantic_diagnostics_per_file,
            affected_files_pending_emit,
        }
    }

    pub fn program(&self) -> &Rc<Program> {
        &self.program
    }

    pub fn reference_map(&self) -> &ReferenceMap {
        &self.reference_map
    }

    pub fn changed_files(&self) -> &BTreeSet<PathKey> {
        &self.changed_files
    }

    pub fn affected_files(&self) -> &[PathKey] {
        &self.affected_files
    }

    pub fn affected_files_pending_emit(&self) -> &BTreeSet<PathKey> {
        &self.affected_files_pending_emit
    }

    /// Whether the semantic diagnostics of `path` are cached.
    pub fn has_cached_semantic_diagnostics(&self, path: &PathKey) -> bool {
        self.semantic_diagnostics_per_file.contains_key(path)
    }

    /// Config, global and per-file diagnostics. Per-file results are cached
    /// until the file is affected by a change. The token is polled between
    /// files; work finished before a cancellation stays cached.
    pub fn get_semantic_diagnostics(
        &mut self,
        cancellation_token: Option<&CancellationToken>,
    ) -> Result<Vec<Diagnostic>, OperationCanceledError> {
        let mut diagnostics = self.program.get_config_file_parsing_diagnostics().to_vec();
        diagnostics.extend(self.program.get_global_diagnostics().iter().cloned());
        for file in self.program.source_files() {
            if let Some(cached) = self.semantic_diagnostics_per_file.get(&file.path) {
                diagnostics.extend(cached.iter().cloned());
                continue;
            }
            if let Some(token) = cancellation_token {
                token.throw_if_cancellation_requested()?;
            }
            let file_diagnostics = self.program.get_semantic_diagnostics(&file.path).to_vec();
            diagnostics.extend(file_diagnostics.iter().cloned());
            self.semantic_diagnostics_per_file
                .insert(file.path.clone(), file_diagnostics);
        }
        Ok(diagnostics)
    }

    /// Report the outputs of every file pending emit and clear the pending
    /// set. Nothing is written.
    pub fn emit(&mut self) -> EmitResult {
        let options = self.program.options();
        if options.no_emit {
            return EmitResult {
                emit_skipped: true,
                ..EmitResult::default()
            };
        }

        let common_source_directory = self.common_source_directory();
        let mut emitted_files = Vec::new();
        for file in self.program.source_files() {
            if !self.affected_files_pending_emit.contains(&file.path)
                || file.is_declaration_file()
                || self.program.is_source_file_from_external_library(&file.path)
            {
                continue;
            }
            let Some(stem) = output_stem(
                &file.file_name,
                common_source_directory.as_deref(),
                options.out_dir.as_deref(),
            ) else {
                continue;
            };
            emitted_files.push(with_suffix(&stem, ".js"));
            if options.declaration {
                emitted_files.push(with_suffix(&stem, ".d.ts"));
            }
        }
        self.affected_files_pending_emit.clear();
        debug!(outputs = emitted_files.len(), "emit");
        EmitResult {
            emit_skipped: false,
            emitted_files,
            diagnostics: Vec::new(),
        }
    }

    /// `rootDir` when set, otherwise the deepest directory containing every
    /// emitted source file.
    fn common_source_directory(&self) -> Option<PathBuf> {
        let options = self.program.options();
        if let Some(root_dir) = &options.root_dir {
            return Some(normalize_path(root_dir));
        }
        let mut common: Option<PathBuf> = None;
        for file in self.program.source_files() {
            if file.is_declaration_file() || self.program.is_source_file_from_external_library(&file.path) {
                continue;
            }
            let Some(directory) = file.file_name.parent() else {
                continue;
            };
            common = Some(match common {
                None => directory.to_path_buf(),
                Some(current) => common_ancestor(&current, directory),
            });
        }
        common
    }
}

fn common_ancestor(a: &Path, b: &Path) -> PathBuf {
    a.components()
        .zip(b.components())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x)
        .collect()
}

/// Output path without extension for `file_name`, or `None` for inputs
/// that produce no JavaScript.
fn output_stem(file_name: &Path, common_source_directory: Option<&Path>, out_dir: Option<&Path>) -> Option<PathBuf> {
    let name = file_name.to_str()?;
    let stem = [".tsx", ".ts", ".jsx", ".js"]
        .iter()
        .find_map(|ext| name.strip_suffix(ext))?;
    let stem = PathBuf::from(stem);
    match (out_dir, common_source_directory) {
        (Some(out_dir), Some(common)) => {
            let relative = stem.strip_prefix(common).unwrap_or(&stem);
            Some(normalize_path(&out_dir.join(relative)))
        }
        (Some(out_dir), None) => Some(normalize_path(&out_dir.join(stem.file_name()?))),
        (None, _) => Some(stem),
    }
}

fn with_suffix(stem: &Path, suffix: &str) -> PathBuf {
    let mut name = stem.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
#[path = "tests/builder_tests.rs"]
mod tests;
