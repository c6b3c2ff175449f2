//! `tsconfig.json` loading: JSONC parsing, `extends` chains, compiler option
//! resolution and expansion of `files` / `include` / `exclude` into root file
//! names and wildcard directories.

use anyhow::{Context, Result, anyhow, bail};
use rustc_hash::{FxHashSet, FxHasher};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use tsz_common::diagnostics::{Diagnostic, diagnostic_messages};

use crate::directory_cache::{CachedDirectoryStructureHost, build_matcher};
use crate::paths::{
    get_normalized_absolute_path, has_extension, is_supported_source_file_name, normalize_path,
    supported_extensions, to_slash_string,
};
use crate::system::System;
use crate::watch_options::{PollingWatchKind, WatchDirectoryKind, WatchFileKind, WatchOptions};

/// Custom deserializer for boolean options that accepts both bool and string values.
/// This handles cases where tsconfig.json contains `"strict": "true"` instead of `"strict": true`.
fn deserialize_bool_or_string<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        String(String),
    }

    match Option::<BoolOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(BoolOrString::Bool(b)) => Ok(Some(b)),
        Some(BoolOrString::String(s)) => {
            let normalized = s.trim().to_lowercase();
            match normalized.as_str() {
                "true" | "1" | "yes" | "on" => Ok(Some(true)),
                "false" | "0" | "no" | "off" => Ok(Some(false)),
                _ => Err(Error::custom(format!(
                    "invalid boolean value: '{}'. Expected true, false, 'true', or 'false'",
                    s
                ))),
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TsConfig {
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub compiler_options: Option<CompilerOptions>,
    #[serde(default)]
    pub include: Option<Vec<String>>,
    #[serde(default)]
    pub exclude: Option<Vec<String>>,
    #[serde(default)]
    pub files: Option<Vec<String>>,
    #[serde(default)]
    pub watch_options: Option<RawWatchOptions>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CompilerOptions {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub module_resolution: Option<String>,
    #[serde(default)]
    pub types: Option<Vec<String>>,
    #[serde(default)]
    pub type_roots: Option<Vec<String>>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Ordered: ties between equally long patterns go to the first one.
    #[serde(default)]
    pub paths: Option<serde_json::Map<String, serde_json::Value>>,
    /// Directory of the config file that declared `paths`.
    #[serde(skip)]
    pub paths_base_path: Option<String>,
    #[serde(default)]
    pub root_dir: Option<String>,
    #[serde(default)]
    pub out_dir: Option<String>,
    #[serde(default, deserialize_with = "deserialize_bool_or_string")]
    pub allow_js: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_bool_or_string")]
    pub resolve_json_module: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_bool_or_string")]
    pub declaration: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_bool_or_string")]
    pub incremental: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_bool_or_string")]
    pub strict: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_bool_or_string")]
    pub no_emit: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawWatchOptions {
    #[serde(default)]
    pub watch_file: Option<String>,
    #[serde(default)]
    pub watch_directory: Option<String>,
    #[serde(default)]
    pub fallback_polling: Option<String>,
    #[serde(default, deserialize_with = "deserialize_bool_or_string")]
    pub synchronous_watch_directory: Option<bool>,
    #[serde(default)]
    pub exclude_directories: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_files: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleResolutionKind {
    Classic,
    Node,
    Node16,
    NodeNext,
    Bundler,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathMapping {
    pub(crate) pattern: String,
    pub(crate) prefix: String,
    pub(crate) suffix: String,
    pub(crate) targets: Vec<String>,
}

impl PathMapping {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub(crate) fn is_exact(&self) -> bool {
        !self.pattern.contains('*')
    }

    /// The text matched by `*`, or an empty string for an exact pattern.
    pub(crate) fn match_specifier(&self, specifier: &str) -> Option<String> {
        if self.is_exact() {
            return if self.pattern == specifier {
                Some(String::new())
            } else {
                None
            };
        }

        if !specifier.starts_with(&self.prefix) || !specifier.ends_with(&self.suffix) {
            return None;
        }

        let start = self.prefix.len();
        let end = specifier.len().saturating_sub(self.suffix.len());
        if end < start {
            return None;
        }

        Some(specifier[start..end].to_string())
    }

    pub(crate) fn substitute(&self, target: &str, star_match: &str) -> String {
        if target.contains('*') {
            target.replacen('*', star_match, 1)
        } else {
            target.to_string()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedCompilerOptions {
    pub target: Option<String>,
    pub module: Option<String>,
    pub module_resolution: Option<ModuleResolutionKind>,
    pub base_url: Option<PathBuf>,
    pub paths: Vec<PathMapping>,
    pub paths_base_path: Option<PathBuf>,
    pub type_roots: Option<Vec<PathBuf>>,
    pub types: Option<Vec<String>>,
    pub root_dir: Option<PathBuf>,
    pub out_dir: Option<PathBuf>,
    pub allow_js: bool,
    pub resolve_json_module: bool,
    pub declaration: bool,
    pub incremental: bool,
    pub strict: bool,
    pub no_emit: bool,
    /// Set when the options came from a config file.
    pub config_file_path: Option<PathBuf>,
}

impl ResolvedCompilerOptions {
    pub fn effective_module_resolution(&self) -> ModuleResolutionKind {
        if let Some(resolution) = self.module_resolution {
            return resolution;
        }
        match self.module.as_deref().map(normalize_option).as_deref() {
            Some("node16") => ModuleResolutionKind::Node16,
            Some("nodenext") => ModuleResolutionKind::NodeNext,
            Some("amd" | "umd" | "system" | "es6" | "es2015") => ModuleResolutionKind::Classic,
            _ => ModuleResolutionKind::Node,
        }
    }

    /// Base directory that `paths` targets are relative to.
    pub fn paths_base(&self) -> Option<&Path> {
        self.base_url
            .as_deref()
            .or(self.paths_base_path.as_deref())
    }

    /// Fingerprint of the options that change how names resolve. Two option
    /// sets with equal fingerprints share resolution results.
    pub fn resolution_fingerprint(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.effective_module_resolution().hash(&mut hasher);
        self.base_url.hash(&mut hasher);
        self.paths.hash(&mut hasher);
        self.paths_base_path.hash(&mut hasher);
        self.type_roots.hash(&mut hasher);
        self.types.hash(&mut hasher);
        self.allow_js.hash(&mut hasher);
        self.resolve_json_module.hash(&mut hasher);
        hasher.finish()
    }
}

pub fn changes_affect_module_resolution(
    old: &ResolvedCompilerOptions,
    new: &ResolvedCompilerOptions,
) -> bool {
    old.resolution_fingerprint() != new.resolution_fingerprint()
}

/// Option changes after which no cached per-file diagnostic can be trusted.
pub fn changes_affect_semantic_diagnostics(
    old: &ResolvedCompilerOptions,
    new: &ResolvedCompilerOptions,
) -> bool {
    changes_affect_module_resolution(old, new)
        || old.target != new.target
        || old.module != new.module
        || old.strict != new.strict
}

/// Option changes that alter the outputs of every file.
pub fn changes_affect_emit(old: &ResolvedCompilerOptions, new: &ResolvedCompilerOptions) -> bool {
    old.target != new.target
        || old.module != new.module
        || old.root_dir != new.root_dir
        || old.out_dir != new.out_dir
        || old.declaration != new.declaration
        || old.no_emit != new.no_emit
}

pub fn resolve_compiler_options(
    options: Option<&CompilerOptions>,
) -> Result<ResolvedCompilerOptions> {
    let mut resolved = ResolvedCompilerOptions::default();
    let Some(options) = options else {
        return Ok(resolved);
    };

    resolved.target = options.target.clone();
    resolved.module = options.module.clone();
    if let Some(module_resolution) = options.module_resolution.as_deref() {
        resolved.module_resolution = Some(parse_module_resolution(module_resolution)?);
    }
    resolved.base_url = options.base_url.as_deref().map(PathBuf::from);
    if let Some(paths) = options.paths.as_ref() {
        resolved.paths = build_path_mappings(paths)?;
        resolved.paths_base_path = options.paths_base_path.as_deref().map(PathBuf::from);
    }
    resolved.type_roots = options
        .type_roots
        .as_ref()
        .map(|roots| roots.iter().map(PathBuf::from).collect());
    resolved.types = options.types.clone();
    resolved.root_dir = options.root_dir.as_deref().map(PathBuf::from);
    resolved.out_dir = options.out_dir.as_deref().map(PathBuf::from);
    resolved.allow_js = options.allow_js.unwrap_or(false);
    resolved.resolve_json_module = options.resolve_json_module.unwrap_or(false);
    resolved.declaration = options.declaration.unwrap_or(false);
    resolved.incremental = options.incremental.unwrap_or(false);
    resolved.strict = options.strict.unwrap_or(false);
    resolved.no_emit = options.no_emit.unwrap_or(false);

    Ok(resolved)
}

pub fn resolve_watch_options(raw: Option<&RawWatchOptions>) -> Result<WatchOptions> {
    let Some(raw) = raw else {
        return Ok(WatchOptions::default());
    };
    Ok(WatchOptions {
        watch_file: raw
            .watch_file
            .as_deref()
            .map(str::parse::<WatchFileKind>)
            .transpose()
            .context("invalid watchOptions.watchFile")?,
        watch_directory: raw
            .watch_directory
            .as_deref()
            .map(str::parse::<WatchDirectoryKind>)
            .transpose()
            .context("invalid watchOptions.watchDirectory")?,
        fallback_polling: raw
            .fallback_polling
            .as_deref()
            .map(str::parse::<PollingWatchKind>)
            .transpose()
            .context("invalid watchOptions.fallbackPolling")?,
        synchronous_watch_directory: raw.synchronous_watch_directory,
        exclude_directories: raw.exclude_directories.clone().unwrap_or_default(),
        exclude_files: raw.exclude_files.clone().unwrap_or_default(),
    })
}

pub fn parse_tsconfig(source: &str) -> Result<TsConfig> {
    let stripped = strip_jsonc(source);
    let normalized = remove_trailing_commas(&stripped);
    let config = serde_json::from_str(&normalized).context("failed to parse tsconfig JSON")?;
    Ok(config)
}

/// A config file with its `extends` chain merged in.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: TsConfig,
    /// Every base config read while following `extends`, nearest first.
    pub extended_config_files: Vec<PathBuf>,
}

/// Read `path` and follow its `extends` chain. Path-valued fields are made
/// absolute relative to the file that declared them.
pub fn load_tsconfig(system: &dyn System, path: &Path) -> Result<LoadedConfig> {
    let mut visited = FxHashSet::default();
    let mut extended_config_files = Vec::new();
    let config = load_tsconfig_inner(system, path, &mut visited, &mut extended_config_files)?;
    Ok(LoadedConfig {
        config,
        extended_config_files,
    })
}

fn load_tsconfig_inner(
    system: &dyn System,
    path: &Path,
    visited: &mut FxHashSet<PathBuf>,
    extended: &mut Vec<PathBuf>,
) -> Result<TsConfig> {
    let canonical = normalize_path(path);
    if !visited.insert(canonical.clone()) {
        bail!("tsconfig extends cycle detected at {}", canonical.display());
    }

    let source = system
        .read_file(path)
        .with_context(|| format!("failed to read tsconfig: {}", path.display()))?;
    let mut config = parse_tsconfig(&source)
        .with_context(|| format!("failed to parse tsconfig: {}", path.display()))?;
    let base_dir = path
        .parent()
        .ok_or_else(|| anyhow!("tsconfig has no parent directory"))?;
    absolutize_config(&mut config, base_dir);

    let extends = config.extends.take();
    if let Some(extends_path) = extends {
        let base_path = resolve_extends_path(path, &extends_path)?;
        extended.push(base_path.clone());
        let base_config = load_tsconfig_inner(system, &base_path, visited, extended)?;
        config = merge_configs(base_config, config);
    }

    visited.remove(&canonical);
    Ok(config)
}

fn resolve_extends_path(current_path: &Path, extends: &str) -> Result<PathBuf> {
    let base_dir = current_path
        .parent()
        .ok_or_else(|| anyhow!("tsconfig has no parent directory"))?;
    let mut candidate = PathBuf::from(extends);
    if candidate.extension().is_none() {
        candidate.set_extension("json");
    }

    if candidate.is_absolute() {
        Ok(normalize_path(&candidate))
    } else {
        Ok(normalize_path(&base_dir.join(candidate)))
    }
}

fn absolute_in(base_dir: &Path, value: &str) -> String {
    to_slash_string(&get_normalized_absolute_path(Path::new(value), base_dir))
}

fn absolutize_config(config: &mut TsConfig, base_dir: &Path) {
    let absolutize_all = |values: &mut Vec<String>| {
        for value in values.iter_mut() {
            *value = absolute_in(base_dir, value);
        }
    };
    if let Some(files) = config.files.as_mut() {
        absolutize_all(files);
    }
    if let Some(include) = config.include.as_mut() {
        absolutize_all(include);
    }
    if let Some(exclude) = config.exclude.as_mut() {
        absolutize_all(exclude);
    }
    if let Some(options) = config.compiler_options.as_mut() {
        for value in [&mut options.base_url, &mut options.root_dir, &mut options.out_dir]
            .into_iter()
            .flatten()
        {
            *value = absolute_in(base_dir, value);
        }
        if let Some(roots) = options.type_roots.as_mut() {
            absolutize_all(roots);
        }
        if options.paths.is_some() {
            options.paths_base_path = Some(to_slash_string(base_dir));
        }
    }
    if let Some(watch) = config.watch_options.as_mut() {
        for values in [&mut watch.exclude_directories, &mut watch.exclude_files]
            .into_iter()
            .flatten()
        {
            absolutize_all(values);
        }
    }
}

fn merge_configs(base: TsConfig, mut child: TsConfig) -> TsConfig {
    let merged_compiler_options = match (base.compiler_options, child.compiler_options.take()) {
        (Some(base_opts), Some(child_opts)) => Some(merge_compiler_options(base_opts, child_opts)),
        (Some(base_opts), None) => Some(base_opts),
        (None, Some(child_opts)) => Some(child_opts),
        (None, None) => None,
    };
    let merged_watch_options = match (base.watch_options, child.watch_options.take()) {
        (Some(base_opts), Some(child_opts)) => Some(RawWatchOptions {
            watch_file: child_opts.watch_file.or(base_opts.watch_file),
            watch_directory: child_opts.watch_directory.or(base_opts.watch_directory),
            fallback_polling: child_opts.fallback_polling.or(base_opts.fallback_polling),
            synchronous_watch_directory: child_opts
                .synchronous_watch_directory
                .or(base_opts.synchronous_watch_directory),
            exclude_directories: child_opts
                .exclude_directories
                .or(base_opts.exclude_directories),
            exclude_files: child_opts.exclude_files.or(base_opts.exclude_files),
        }),
        (base_opts, child_opts) => child_opts.or(base_opts),
    };

    TsConfig {
        extends: None,
        compiler_options: merged_compiler_options,
        include: child.include.or(base.include),
        exclude: child.exclude.or(base.exclude),
        files: child.files.or(base.files),
        watch_options: merged_watch_options,
    }
}

fn merge_compiler_options(base: CompilerOptions, child: CompilerOptions) -> CompilerOptions {
    let (paths, paths_base_path) = if child.paths.is_some() {
        (child.paths, child.paths_base_path)
    } else {
        (base.paths, base.paths_base_path)
    };
    CompilerOptions {
        target: child.target.or(base.target),
        module: child.module.or(base.module),
        module_resolution: child.module_resolution.or(base.module_resolution),
        types: child.types.or(base.types),
        type_roots: child.type_roots.or(base.type_roots),
        base_url: child.base_url.or(base.base_url),
        paths,
        paths_base_path,
        root_dir: child.root_dir.or(base.root_dir),
        out_dir: child.out_dir.or(base.out_dir),
        allow_js: child.allow_js.or(base.allow_js),
        resolve_json_module: child.resolve_json_module.or(base.resolve_json_module),
        declaration: child.declaration.or(base.declaration),
        incremental: child.incremental.or(base.incremental),
        strict: child.strict.or(base.strict),
        no_emit: child.no_emit.or(base.no_emit),
    }
}

fn parse_module_resolution(value: &str) -> Result<ModuleResolutionKind> {
    let normalized = normalize_option(value);
    let resolution = match normalized.as_str() {
        "classic" => ModuleResolutionKind::Classic,
        "node" | "node10" => ModuleResolutionKind::Node,
        "node16" => ModuleResolutionKind::Node16,
        "nodenext" => ModuleResolutionKind::NodeNext,
        "bundler" => ModuleResolutionKind::Bundler,
        _ => bail!("unsupported compilerOptions.moduleResolution '{}'", value),
    };

    Ok(resolution)
}

fn build_path_mappings(
    paths: &serde_json::Map<String, serde_json::Value>,
) -> Result<Vec<PathMapping>> {
    let mut mappings = Vec::new();
    for (pattern, targets) in paths {
        let targets: Vec<String> = serde_json::from_value(targets.clone())
            .with_context(|| format!("compilerOptions.paths['{pattern}'] must be a string array"))?;
        if targets.is_empty() {
            continue;
        }
        if pattern.matches('*').count() > 1 {
            bail!("pattern '{}' can have at most one '*' character", pattern);
        }
        let pattern = normalize_path_pattern(pattern);
        let targets = targets
            .iter()
            .map(|target| normalize_path_pattern(target))
            .collect();
        let (prefix, suffix) = split_path_pattern(&pattern);
        mappings.push(PathMapping {
            pattern,
            prefix,
            suffix,
            targets,
        });
    }
    Ok(mappings)
}

fn normalize_path_pattern(value: &str) -> String {
    value.trim().replace('\\', "/")
}

fn split_path_pattern(pattern: &str) -> (String, String) {
    match pattern.find('*') {
        Some(star_idx) => {
            let (prefix, rest) = pattern.split_at(star_idx);
            (prefix.to_string(), rest[1..].to_string())
        }
        None => (pattern.to_string(), String::new()),
    }
}

fn normalize_option(value: &str) -> String {
    let mut normalized = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch == '-' || ch == '_' || ch.is_whitespace() {
            continue;
        }
        normalized.push(ch.to_ascii_lowercase());
    }
    normalized
}

// =============================================================================
// Root files and wildcard directories
// =============================================================================

const DEFAULT_INCLUDE: &str = "**/*";
const DEFAULT_EXCLUDE: &[&str] = &["node_modules", "bower_components", "jspm_packages"];

/// `files` / `include` / `exclude` of a config file, absolute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFileSpecs {
    pub config_file: PathBuf,
    pub files: Vec<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// True when `include` was written by the user rather than defaulted.
    pub include_specified: bool,
}

impl ConfigFileSpecs {
    fn new(config_file: &Path, config: &TsConfig, options: &ResolvedCompilerOptions) -> Self {
        let base_dir = config_file.parent().unwrap_or(Path::new("/"));
        let files = config.files.clone().unwrap_or_default();
        let include_specified = config.include.is_some();
        let include = match config.include.clone() {
            Some(include) => include,
            None if config.files.is_none() => vec![absolute_in(base_dir, DEFAULT_INCLUDE)],
            None => Vec::new(),
        };
        let exclude = match config.exclude.clone() {
            Some(exclude) => exclude,
            None => {
                let mut exclude: Vec<String> = DEFAULT_EXCLUDE
                    .iter()
                    .map(|name| absolute_in(base_dir, name))
                    .collect();
                if let Some(out_dir) = options.out_dir.as_deref() {
                    exclude.push(to_slash_string(out_dir));
                }
                exclude
            }
        };
        Self {
            config_file: config_file.to_path_buf(),
            files,
            include,
            exclude,
            include_specified,
        }
    }

    fn include_globs(&self) -> Vec<String> {
        self.include
            .iter()
            .map(|spec| {
                if is_implicit_glob(last_component(spec)) {
                    format!("{}/**/*", spec.trim_end_matches('/'))
                } else {
                    spec.clone()
                }
            })
            .collect()
    }

    fn exclude_globs(&self) -> Vec<String> {
        self.exclude
            .iter()
            .flat_map(|spec| {
                let spec = spec.trim_end_matches('/');
                [spec.to_string(), format!("{spec}/**")]
            })
            .collect()
    }

    /// Is `path` matched by `exclude`?
    pub fn is_excluded(&self, path: &Path, case_sensitive: bool) -> bool {
        build_matcher(&self.exclude_globs(), case_sensitive)
            .is_some_and(|set| set.is_match(to_slash_string(path)))
    }

    /// Would `file` be picked up by `include` / `exclude`? Used to filter
    /// wildcard directory events before scheduling a root file refresh.
    pub fn matches_wildcard_file(
        &self,
        file: &Path,
        options: &ResolvedCompilerOptions,
        case_sensitive: bool,
    ) -> bool {
        let text = to_slash_string(file);
        if !is_supported_source_file_name(&text, options.allow_js) {
            return false;
        }
        if text == to_slash_string(&self.config_file) {
            return false;
        }
        let includes = build_matcher(&self.include_globs(), case_sensitive);
        let excludes = build_matcher(&self.exclude_globs(), case_sensitive);
        includes.is_some_and(|set| set.is_match(&text))
            && !excludes.is_some_and(|set| set.is_match(&text))
    }
}

fn last_component(spec: &str) -> &str {
    spec.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(spec)
}

/// A trailing component without wildcards or an extension names a directory
/// and means "everything below it".
fn is_implicit_glob(component: &str) -> bool {
    !component.contains(['.', '*', '?'])
}

/// Expand the specs into root file names: explicit `files` first, then
/// wildcard matches in a stable order. A `.ts` input hides a `.d.ts` or
/// `.js` file with the same stem.
pub fn get_file_names_from_config_specs(
    specs: &ConfigFileSpecs,
    options: &ResolvedCompilerOptions,
    host: &CachedDirectoryStructureHost,
) -> Vec<PathBuf> {
    let canonicalizer = host.canonicalizer();
    let mut seen = FxHashSet::default();
    let mut file_names = Vec::new();
    for file in &specs.files {
        let path = PathBuf::from(file);
        if seen.insert(canonicalizer.to_path(&path)) {
            file_names.push(path);
        }
    }

    let extensions = supported_extensions(options.allow_js);
    let includes = specs.include_globs();
    let excludes = specs.exclude_globs();
    let mut wildcard_files = Vec::new();
    for (directory, recursive) in get_wildcard_directories(specs, canonicalizer.is_case_sensitive()) {
        let depth = if recursive { None } else { Some(0) };
        wildcard_files.extend(host.read_directory(&directory, &extensions, &excludes, &includes, depth));
    }
    wildcard_files.sort();

    let stems: FxHashSet<String> = wildcard_files
        .iter()
        .filter(|path| has_extension(&to_slash_string(path), &[".ts", ".tsx"]))
        .filter(|path| !has_extension(&to_slash_string(path), &[".d.ts"]))
        .map(|path| canonicalizer.canonical_file_name(&strip_source_extension(path)))
        .collect();
    for path in wildcard_files {
        let text = to_slash_string(&path);
        let shadowed = has_extension(&text, &[".d.ts", ".js", ".jsx"])
            && stems.contains(&canonicalizer.canonical_file_name(&strip_source_extension(&path)));
        if shadowed {
            continue;
        }
        if seen.insert(canonicalizer.to_path(&path)) {
            file_names.push(path);
        }
    }
    file_names
}

fn strip_source_extension(path: &Path) -> String {
    let text = to_slash_string(path);
    for ext in [".d.ts", ".tsx", ".ts", ".jsx", ".js"] {
        if let Some(stem) = text.strip_suffix(ext) {
            return stem.to_string();
        }
    }
    text
}

/// Directories whose structure can change the root file list, mapped to
/// whether they must be watched recursively.
pub fn get_wildcard_directories(
    specs: &ConfigFileSpecs,
    case_sensitive: bool,
) -> BTreeMap<PathBuf, bool> {
    let excludes = build_matcher(&specs.exclude_globs(), case_sensitive);
    let mut directories: BTreeMap<PathBuf, bool> = BTreeMap::new();
    for spec in &specs.include {
        let Some((directory, recursive)) = wildcard_directory_from_spec(spec) else {
            continue;
        };
        if excludes
            .as_ref()
            .is_some_and(|set| set.is_match(&directory))
        {
            continue;
        }
        let entry = directories.entry(PathBuf::from(directory)).or_insert(false);
        *entry |= recursive;
    }

    // Drop directories already covered by a recursive ancestor.
    let recursive: Vec<PathBuf> = directories
        .iter()
        .filter(|&(_, &recursive)| recursive)
        .map(|(directory, _)| directory.clone())
        .collect();
    directories.retain(|directory, _| {
        !recursive
            .iter()
            .any(|ancestor| ancestor != directory && directory.starts_with(ancestor))
    });
    directories
}

fn wildcard_directory_from_spec(spec: &str) -> Option<(String, bool)> {
    let spec = spec.trim_end_matches('/');
    let last_separator = spec.rfind('/')?;
    if let Some(wildcard) = spec.find(['*', '?']) {
        let directory_end = spec[..wildcard].rfind('/')?;
        let directory = if directory_end == 0 {
            "/".to_string()
        } else {
            spec[..directory_end].to_string()
        };
        return Some((directory, wildcard < last_separator));
    }
    if is_implicit_glob(&spec[last_separator + 1..]) {
        return Some((spec.to_string(), true));
    }
    None
}

/// A fully parsed config file.
#[derive(Debug, Clone, Default)]
pub struct ParsedCommandLine {
    pub options: ResolvedCompilerOptions,
    pub file_names: Vec<PathBuf>,
    pub specs: Option<ConfigFileSpecs>,
    pub wildcard_directories: BTreeMap<PathBuf, bool>,
    pub watch_options: WatchOptions,
    pub extended_config_files: Vec<PathBuf>,
    /// Non-fatal problems, such as an empty root file list.
    pub errors: Vec<Diagnostic>,
}

/// Load and expand `config_file`. Read and parse failures are returned as
/// errors; the caller keeps its previous state.
pub fn parse_config_file(
    host: &CachedDirectoryStructureHost,
    config_file: &Path,
) -> Result<ParsedCommandLine> {
    let config_file = host.canonicalizer().absolute(config_file);
    let loaded = load_tsconfig(host.system().as_ref(), &config_file)?;
    let mut options = resolve_compiler_options(loaded.config.compiler_options.as_ref())
        .with_context(|| format!("invalid compilerOptions in {}", config_file.display()))?;
    options.config_file_path = Some(config_file.clone());
    let watch_options = resolve_watch_options(loaded.config.watch_options.as_ref())
        .with_context(|| format!("invalid watchOptions in {}", config_file.display()))?;

    let specs = ConfigFileSpecs::new(&config_file, &loaded.config, &options);
    let file_names = get_file_names_from_config_specs(&specs, &options, host);
    let wildcard_directories =
        get_wildcard_directories(&specs, host.canonicalizer().is_case_sensitive());
    let mut errors = Vec::new();
    if let Some(error) = no_inputs_error(&specs, &file_names) {
        errors.push(error);
    }

    Ok(ParsedCommandLine {
        options,
        file_names,
        specs: Some(specs),
        wildcard_directories,
        watch_options,
        extended_config_files: loaded.extended_config_files,
        errors,
    })
}

/// The diagnostic for a config file that could not be loaded: 5083 when
/// the file (or a base it extends) could not be read, 5014 otherwise.
pub fn config_error_diagnostic(config_file: &Path, error: &anyhow::Error) -> Diagnostic {
    let file = to_slash_string(config_file);
    if error
        .chain()
        .any(|cause| cause.downcast_ref::<std::io::Error>().is_some())
    {
        return Diagnostic::from_message(&diagnostic_messages::CANNOT_READ_FILE, &[&file]);
    }
    let reason = error.root_cause().to_string();
    Diagnostic::from_message(&diagnostic_messages::FAILED_TO_PARSE_FILE, &[&file, &reason])
}

/// 18003 when the specs matched nothing.
pub fn no_inputs_error(specs: &ConfigFileSpecs, file_names: &[PathBuf]) -> Option<Diagnostic> {
    if !file_names.is_empty() {
        return None;
    }
    let config = to_slash_string(&specs.config_file);
    let include = serde_json::to_string(&specs.include).unwrap_or_default();
    let exclude = serde_json::to_string(&specs.exclude).unwrap_or_default();
    Some(Diagnostic::from_message(
        &diagnostic_messages::NO_INPUTS_WERE_FOUND_IN_CONFIG_FILE,
        &[&config, &include, &exclude],
    ))
}

// =============================================================================
// JSONC
// =============================================================================

fn strip_jsonc(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;

    while let Some(ch) = chars.next() {
        if in_line_comment {
            if ch == '\n' {
                in_line_comment = false;
                out.push(ch);
            }
            continue;
        }

        if in_block_comment {
            if ch == '*' {
                if let Some('/') = chars.peek().copied() {
                    chars.next();
                    in_block_comment = false;
                }
            } else if ch == '\n' {
                out.push(ch);
            }
            continue;
        }

        if in_string {
            out.push(ch);
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        if ch == '"' {
            in_string = true;
            out.push(ch);
            continue;
        }

        if ch == '/'
            && let Some(&next) = chars.peek()
        {
            if next == '/' {
                chars.next();
                in_line_comment = true;
                continue;
            }
            if next == '*' {
                chars.next();
                in_block_comment = true;
                continue;
            }
        }

        out.push(ch);
    }

    out
}

fn remove_trailing_commas(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape = false;

    while let Some(ch) = chars.next() {
        if in_string {
            out.push(ch);
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        if ch == '"' {
            in_string = true;
            out.push(ch);
            continue;
        }

        if ch == ',' {
            let mut lookahead = chars.clone();
            while lookahead.peek().is_some_and(|next| next.is_whitespace()) {
                lookahead.next();
            }
            if let Some(next) = lookahead.peek().copied()
                && (next == '}' || next == ']')
            {
                continue;
            }
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
