//! Watch program orchestrator.
//!
//! A [`WatchProgram`] owns every cache and watcher of one watch session.
//! File system activity reaches it as [`WatchEvent`]s from the factory; each
//! event updates the caches it concerns and restarts the debounce timer. When
//! the timer fires, the program is brought up to date at the pending
//! [`ReloadLevel`]:
//!
//! - `None`: re-create the program from the current root files.
//! - `Partial`: re-expand the config file's `include` / `exclude` first.
//! - `Full`: re-read the config file first.
//!
//! Everything runs on the caller's thread. The caller drives the session
//! with [`WatchProgram::tick`] or [`WatchProgram::run_until`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use tracing::{debug, debug_span, info, trace, warn};
use tsz_common::diagnostics::{
    Diagnostic, DiagnosticMessage, diagnostic_codes, diagnostic_messages, error_count,
};

use crate::builder::{BuilderProgram, EmitResult};
use crate::cancellation::CancellationToken;
use crate::config::{
    ConfigFileSpecs, ParsedCommandLine, ResolvedCompilerOptions, changes_affect_module_resolution,
    config_error_diagnostic, get_file_names_from_config_specs, no_inputs_error, parse_config_file,
};
use crate::directory_cache::CachedDirectoryStructureHost;
use crate::module_resolution::{
    ResolvedModuleWithFailedLookupLocations, ResolvedTypeReferenceDirectiveWithFailedLookupLocations,
    get_automatic_type_directive_names,
};
use crate::paths::{PathKey, to_slash_string};
use crate::polling::PollingInterval;
use crate::program::{CompilerHost, CreateProgramOptions, Program, is_program_up_to_date};
use crate::resolution_cache::{HasInvalidatedResolution, ResolutionCache};
use crate::source_file::SourceFile;
use crate::source_file_cache::SourceFileCache;
use crate::system::{FileWatcherEventKind, System};
use crate::timers::TimerQueue;
use crate::watch_factory::{WatchEvent, WatchFactory, WatchTarget, WatcherId};
use crate::watch_options::WatchOptions;

/// Delay between the last change and the rebuild it triggers.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Longest [`WatchProgram::run_until`] waits without anything scheduled.
const MAX_IDLE_WAIT: Duration = Duration::from_secs(1);

/// How much of the configuration must be re-read before the next rebuild.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReloadLevel {
    #[default]
    None,
    /// Root file names must be re-expanded from the config specs.
    Partial,
    /// The config file must be parsed again.
    Full,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum WatchTimer {
    UpdateProgram,
}

/// Receives everything a watch session reports.
pub trait WatchReporter {
    fn report_diagnostic(&mut self, diagnostic: &Diagnostic);

    /// Status messages (6031, 6032, 6193, 6194). `error_count` is set for
    /// the summary emitted after each build.
    fn on_watch_status_change(
        &mut self,
        diagnostic: &Diagnostic,
        new_line: &str,
        options: &ResolvedCompilerOptions,
        error_count: Option<usize>,
    );

    fn after_program_create(&mut self, program: &Program, emit_result: &EmitResult) {
        let _ = (program, emit_result);
    }
}

#[derive(Clone, Debug)]
pub struct WatchProgramOptions {
    /// Drive the session from this config file. `root_file_names` and
    /// `compiler_options` are ignored when set.
    pub config_file_name: Option<PathBuf>,
    pub root_file_names: Vec<PathBuf>,
    pub compiler_options: ResolvedCompilerOptions,
    /// Command line watch options; they win over the config file's.
    pub watch_options: WatchOptions,
    /// Log every watcher added, closed or triggered.
    pub watch_diagnostics: bool,
    pub debounce: Duration,
}

impl Default for WatchProgramOptions {
    fn default() -> Self {
        Self {
            config_file_name: None,
            root_file_names: Vec::new(),
            compiler_options: ResolvedCompilerOptions::default(),
            watch_options: WatchOptions::default(),
            watch_diagnostics: false,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WildcardDirectoryWatcher {
    pub watcher: WatcherId,
    pub recursive: bool,
}

/// Bring `existing` in line with `wildcard_directories`. Watchers whose
/// directory and recursion flag are unchanged are kept as they are.
pub fn update_watching_wildcard_directories(
    existing: &mut BTreeMap<PathKey, WildcardDirectoryWatcher>,
    wildcard_directories: &BTreeMap<PathBuf, bool>,
    to_path: impl Fn(&Path) -> PathKey,
    factory: &mut WatchFactory,
) {
    let desired: BTreeMap<PathKey, (&PathBuf, bool)> = wildcard_directories
        .iter()
        .map(|(directory, recursive)| (to_path(directory), (directory, *recursive)))
        .collect();
    existing.retain(|key, watch| match desired.get(key) {
        Some((_, recursive)) if *recursive == watch.recursive => true,
        _ => {
            factory.close(watch.watcher);
            false
        }
    });
    for (key, (directory, recursive)) in desired {
        if existing.contains_key(&key) {
            continue;
        }
        let watcher =
            factory.watch_directory(directory, recursive, WatchTarget::WildcardDirectory(key.clone()));
        existing.insert(key, WildcardDirectoryWatcher { watcher, recursive });
    }
}

/// The compiler host handed to [`Program::create`]: source files come from
/// the version cache and resolutions from the resolution cache.
struct WatchCompilerHost<'a> {
    host: &'a CachedDirectoryStructureHost,
    source_files: &'a mut SourceFileCache,
    resolution_cache: &'a mut ResolutionCache,
    factory: &'a mut WatchFactory,
    has_invalidated_resolution: &'a HasInvalidatedResolution,
    has_changed_automatic_type_directive_names: bool,
    read_errors: &'a mut Vec<Diagnostic>,
}

impl CompilerHost for WatchCompilerHost<'_> {
    fn get_source_file(&mut self, file_name: &Path, should_create_new_source_file: bool) -> Option<Rc<SourceFile>> {
        let read_errors = &mut *self.read_errors;
        self.source_files.get_or_create_source_file(
            file_name,
            should_create_new_source_file,
            &mut *self.factory,
            &mut |path, error| {
                warn!(path = %path.display(), %error, "failed to read source file");
                read_errors.push(Diagnostic::from_message(
                    &diagnostic_messages::CANNOT_READ_FILE_WITH_REASON,
                    &[&to_slash_string(path), &error.to_string()],
                ));
            },
        )
    }

    fn to_path(&self, file_name: &Path) -> PathKey {
        self.host.to_path(file_name)
    }

    fn file_exists(&self, file_name: &Path) -> bool {
        self.host.file_exists(file_name)
    }

    fn get_current_directory(&self) -> PathBuf {
        self.host.canonicalizer().current_directory().to_path_buf()
    }

    fn resolve_module_names(
        &mut self,
        module_names: &[String],
        containing_file: &Path,
        reused_names: &[String],
        options: &ResolvedCompilerOptions,
    ) -> Vec<Rc<ResolvedModuleWithFailedLookupLocations>> {
        self.resolution_cache.resolve_module_names(
            module_names,
            containing_file,
            reused_names,
            options,
            &mut *self.factory,
        )
    }

    fn resolve_type_reference_directives(
        &mut self,
        names: &[String],
        containing_file: &Path,
        options: &ResolvedCompilerOptions,
    ) -> Vec<Rc<ResolvedTypeReferenceDirectiveWithFailedLookupLocations>> {
        self.resolution_cache
            .resolve_type_reference_directives(names, containing_file, options, &mut *self.factory)
    }

    fn get_automatic_type_directive_names(&self, options: &ResolvedCompilerOptions) -> Vec<String> {
        get_automatic_type_directive_names(options, self.host)
    }

    fn has_invalidated_resolution(&self, path: &PathKey) -> bool {
        self.has_invalidated_resolution.contains(path)
    }

    fn has_changed_automatic_type_directive_names(&self) -> bool {
        self.has_changed_automatic_type_directive_names
    }
}

pub struct WatchProgram {
    system: Rc<dyn System>,
    host: Rc<CachedDirectoryStructureHost>,
    factory: WatchFactory,
    source_files: SourceFileCache,
    resolution_cache: ResolutionCache,
    reporter: Box<dyn WatchReporter>,
    timers: TimerQueue<WatchTimer>,
    debounce: Duration,
    cancellation_token: CancellationToken,

    config_file_name: Option<PathBuf>,
    config_file_watcher: Option<WatcherId>,
    extended_config_watchers: BTreeMap<PathKey, WatcherId>,
    wildcard_directory_watchers: BTreeMap<PathKey, WildcardDirectoryWatcher>,
    missing_file_watchers: BTreeMap<PathKey, WatcherId>,
    /// Command line watch options, merged over the config file's.
    watch_options_overrides: WatchOptions,

    root_file_names: Vec<PathBuf>,
    compiler_options: ResolvedCompilerOptions,
    config_file_specs: Option<ConfigFileSpecs>,
    wildcard_directories: BTreeMap<PathBuf, bool>,
    extended_config_files: Vec<PathBuf>,
    config_file_parsing_diagnostics: Vec<Diagnostic>,
    read_errors: Vec<Diagnostic>,

    builder: Option<BuilderProgram>,
    reload_level: ReloadLevel,
    has_changed_compiler_options: bool,
    has_changed_config_file_parsing_errors: bool,
    report_file_change_detected: bool,
    closed: bool,
}

impl WatchProgram {
    /// Start a session and build the first program. Problems with the
    /// config file are reported as diagnostics of that program.
    pub fn new(system: Rc<dyn System>, options: WatchProgramOptions, reporter: Box<dyn WatchReporter>) -> Self {
        let host = Rc::new(CachedDirectoryStructureHost::new(Rc::clone(&system)));
        let config_file_name = options
            .config_file_name
            .as_deref()
            .map(|file| host.canonicalizer().absolute(file));
        let root_directory = config_file_name
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| system.current_directory());
        let root_file_names = options
            .root_file_names
            .iter()
            .map(|file| host.canonicalizer().absolute(file))
            .collect();

        let mut factory = WatchFactory::new(Rc::clone(&system), options.watch_options.clone());
        factory.set_diagnostics(options.watch_diagnostics);

        let mut watch = WatchProgram {
            source_files: SourceFileCache::new(Rc::clone(&host)),
            resolution_cache: ResolutionCache::new(Rc::clone(&host), &root_directory),
            system,
            host,
            factory,
            reporter,
            timers: TimerQueue::new(),
            debounce: options.debounce,
            cancellation_token: CancellationToken::new(),
            config_file_name,
            config_file_watcher: None,
            extended_config_watchers: BTreeMap::new(),
            wildcard_directory_watchers: BTreeMap::new(),
            missing_file_watchers: BTreeMap::new(),
            watch_options_overrides: options.watch_options,
            root_file_names,
            compiler_options: options.compiler_options,
            config_file_specs: None,
            wildcard_directories: BTreeMap::new(),
            extended_config_files: Vec::new(),
            config_file_parsing_diagnostics: Vec::new(),
            read_errors: Vec::new(),
            builder: None,
            reload_level: ReloadLevel::None,
            has_changed_compiler_options: false,
            has_changed_config_file_parsing_errors: false,
            report_file_change_detected: false,
            closed: false,
        };

        if let Some(config_file) = watch.config_file_name.clone() {
            match watch.parse_config_file() {
                Ok(parsed) => watch.set_config_file_parsing_result(parsed),
                Err(diagnostic) => {
                    watch.root_file_names.clear();
                    watch.config_file_parsing_diagnostics = vec![diagnostic];
                }
            }
            watch.config_file_watcher =
                Some(watch.factory.watch_file(&config_file, PollingInterval::High, WatchTarget::ConfigFile));
        }

        info!(
            config = ?watch.config_file_name,
            roots = watch.root_file_names.len(),
            "starting watch program"
        );
        watch.report_watch_status(&diagnostic_messages::STARTING_COMPILATION_IN_WATCH_MODE, &[], None);
        watch.synchronize_program();
        watch.watch_config_file_wildcard_directories();
        watch.update_extended_config_files_watches();
        watch
    }

    // =========================================================================
    // Public API
    // =========================================================================

    /// Apply any pending update now and return the program.
    pub fn get_program(&mut self) -> Option<Rc<Program>> {
        if self.timers.cancel(WatchTimer::UpdateProgram) {
            self.update_program();
        }
        self.get_current_program()
    }

    /// The last program built, without applying pending changes.
    pub fn get_current_program(&self) -> Option<Rc<Program>> {
        self.builder.as_ref().map(|builder| Rc::clone(builder.program()))
    }

    pub fn get_builder_program(&self) -> Option<&BuilderProgram> {
        self.builder.as_ref()
    }

    /// Replace the root files of a session started without a config file.
    pub fn update_root_file_names(&mut self, file_names: &[PathBuf]) -> Result<()> {
        if let Some(config_file) = &self.config_file_name {
            bail!(
                "root file names come from {} and cannot be set directly",
                config_file.display()
            );
        }
        self.root_file_names = file_names
            .iter()
            .map(|file| self.host.canonicalizer().absolute(file))
            .collect();
        self.schedule_program_update();
        Ok(())
    }

    /// Handle every event observable at `now` and fire due timers. Returns
    /// true when anything happened.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.closed {
            return false;
        }
        let events = self.factory.process(now);
        let had_events = !events.is_empty();
        for event in events {
            self.on_watch_event(event);
        }
        let due = self.timers.take_due(now);
        for timer in &due {
            match timer {
                WatchTimer::UpdateProgram => self.update_program_with_watch_status(),
            }
        }
        had_events || !due.is_empty()
    }

    /// Earliest instant at which [`tick`](Self::tick) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.timers.next_deadline(), self.factory.next_deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    /// Wait for events and process them until `done` returns true or the
    /// session is closed.
    pub fn run_until(&mut self, mut done: impl FnMut(&WatchProgram) -> bool) {
        while !self.closed && !done(self) {
            let now = self.system.now();
            let timeout = self
                .next_deadline()
                .map_or(MAX_IDLE_WAIT, |deadline| deadline.saturating_duration_since(now))
                .min(MAX_IDLE_WAIT);
            self.system.wait_for_events(timeout);
            let now = self.system.now();
            self.tick(now);
        }
    }

    /// Close every watcher and cancel the pending update. The session does
    /// nothing afterwards.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.timers = TimerQueue::new();
        self.cancellation_token.cancel();
        self.resolution_cache.clear(&mut self.factory);
        self.source_files.close_all(&mut self.factory);
        self.config_file_watcher = None;
        self.extended_config_watchers.clear();
        self.wildcard_directory_watchers.clear();
        self.missing_file_watchers.clear();
        self.factory.close_all();
        debug!("watch program closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn watcher_count(&self) -> usize {
        self.factory.watcher_count()
    }

    pub fn has_pending_update(&self) -> bool {
        self.timers.is_scheduled(WatchTimer::UpdateProgram)
    }

    pub fn reload_level(&self) -> ReloadLevel {
        self.reload_level
    }

    pub fn root_file_names(&self) -> &[PathBuf] {
        &self.root_file_names
    }

    pub fn compiler_options(&self) -> &ResolvedCompilerOptions {
        &self.compiler_options
    }

    pub fn directory_structure_host(&self) -> &Rc<CachedDirectoryStructureHost> {
        &self.host
    }

    pub fn resolution_cache(&self) -> &ResolutionCache {
        &self.resolution_cache
    }

    /// Version the source file cache holds for `file_name`.
    pub fn get_source_version(&self, file_name: &Path) -> Option<u32> {
        self.source_files
            .get_source_version(&self.host.to_path(file_name))
    }

    pub fn wildcard_directory_watcher(&self, directory: &Path) -> Option<WildcardDirectoryWatcher> {
        self.wildcard_directory_watchers
            .get(&self.host.to_path(directory))
            .copied()
    }

    pub fn is_watching_missing_file(&self, file_name: &Path) -> bool {
        self.missing_file_watchers
            .contains_key(&self.host.to_path(file_name))
    }

    /// Token polled while diagnostics are computed. Cancelling it abandons
    /// the current report; the next build starts with a fresh request.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    // =========================================================================
    // Config file
    // =========================================================================

    fn parse_config_file(&self) -> std::result::Result<ParsedCommandLine, Diagnostic> {
        let Some(config_file) = &self.config_file_name else {
            return Ok(ParsedCommandLine::default());
        };
        parse_config_file(&self.host, config_file).map_err(|error| {
            warn!(config = %config_file.display(), error = %format!("{error:#}"), "failed to load config file");
            config_error_diagnostic(config_file, &error)
        })
    }

    fn set_config_file_parsing_result(&mut self, parsed: ParsedCommandLine) {
        self.root_file_names = parsed.file_names;
        self.compiler_options = parsed.options;
        self.config_file_specs = parsed.specs;
        self.wildcard_directories = parsed.wildcard_directories;
        self.extended_config_files = parsed.extended_config_files;
        self.config_file_parsing_diagnostics = parsed.errors;
        self.has_changed_config_file_parsing_errors = true;
        self.factory
            .set_options(parsed.watch_options.merged_with(&self.watch_options_overrides));
    }

    fn watch_config_file_wildcard_directories(&mut self) {
        let host = Rc::clone(&self.host);
        update_watching_wildcard_directories(
            &mut self.wildcard_directory_watchers,
            &self.wildcard_directories,
            |directory| host.to_path(directory),
            &mut self.factory,
        );
    }

    fn update_extended_config_files_watches(&mut self) {
        let desired: BTreeMap<PathKey, &PathBuf> = self
            .extended_config_files
            .iter()
            .map(|file| (self.host.to_path(file), file))
            .collect();
        let factory = &mut self.factory;
        self.extended_config_watchers.retain(|key, watcher| {
            let keep = desired.contains_key(key);
            if !keep {
                factory.close(*watcher);
            }
            keep
        });
        for (key, file) in desired {
            if self.extended_config_watchers.contains_key(&key) {
                continue;
            }
            let watcher = self.factory.watch_file(
                file,
                PollingInterval::High,
                WatchTarget::ExtendedConfigFile(key.clone()),
            );
            self.extended_config_watchers.insert(key, watcher);
        }
    }

    /// Re-expand the specs after a wildcard directory changed.
    fn reload_file_names_from_config_file(&mut self) {
        debug!("reloading root file names from config specs");
        self.reload_level = ReloadLevel::None;
        if let Some(specs) = &self.config_file_specs {
            let file_names = get_file_names_from_config_specs(specs, &self.compiler_options, &self.host);
            let no_inputs = no_inputs_error(specs, &file_names);
            let had_no_inputs = self
                .config_file_parsing_diagnostics
                .iter()
                .any(|d| d.code == diagnostic_codes::NO_INPUTS_WERE_FOUND_IN_CONFIG_FILE);
            if had_no_inputs != no_inputs.is_some() {
                self.has_changed_config_file_parsing_errors = true;
            }
            self.config_file_parsing_diagnostics
                .retain(|d| d.code != diagnostic_codes::NO_INPUTS_WERE_FOUND_IN_CONFIG_FILE);
            self.config_file_parsing_diagnostics.extend(no_inputs);
            self.root_file_names = file_names;
        }
        self.synchronize_program();
    }

    /// Parse the config file again. On failure the previous program stays in
    /// effect and the failure is reported on its own.
    fn reload_config_file(&mut self) {
        debug!("reloading config file");
        self.reload_level = ReloadLevel::None;
        let parsed = match self.parse_config_file() {
            Ok(parsed) => parsed,
            Err(diagnostic) => {
                self.reporter.report_diagnostic(&diagnostic);
                self.report_error_summary(1);
                return;
            }
        };
        let specs_changed = parsed.specs != self.config_file_specs;
        self.set_config_file_parsing_result(parsed);
        if specs_changed {
            // Listings read for the old specs may not be watched any more.
            self.host.clear_cache();
            if let Some(specs) = &self.config_file_specs {
                self.root_file_names =
                    get_file_names_from_config_specs(specs, &self.compiler_options, &self.host);
            }
        }
        self.has_changed_compiler_options = true;
        self.synchronize_program();
        self.watch_config_file_wildcard_directories();
        self.update_extended_config_files_watches();
    }

    // =========================================================================
    // Program updates
    // =========================================================================

    fn update_program_with_watch_status(&mut self) {
        self.report_file_change_detected = true;
        self.update_program();
    }

    fn update_program(&mut self) {
        if self.closed {
            return;
        }
        match self.reload_level {
            ReloadLevel::None => self.synchronize_program(),
            ReloadLevel::Partial => self.reload_file_names_from_config_file(),
            ReloadLevel::Full => self.reload_config_file(),
        }
    }

    fn synchronize_program(&mut self) {
        let span = debug_span!("synchronize_program", roots = self.root_file_names.len());
        let _enter = span.enter();

        let current = self.get_current_program();
        let resolution_options_changed = self.has_changed_compiler_options
            && current.as_ref().is_some_and(|program| {
                changes_affect_module_resolution(program.options(), &self.compiler_options)
            });
        if resolution_options_changed {
            debug!("module resolution options changed");
            self.resolution_cache.clear(&mut self.factory);
        }

        // Every file re-resolves once the cache was cleared.
        let has_invalidated_resolution = self
            .resolution_cache
            .create_has_invalidated_resolution(resolution_options_changed);
        let has_changed_automatic_type_directive_names =
            self.resolution_cache.has_changed_automatic_type_directive_names();
        let up_to_date = is_program_up_to_date(
            current.as_deref(),
            &self.root_file_names,
            &self.compiler_options,
            |path| self.source_files.get_source_version(path),
            |file_name| self.host.file_exists(file_name),
            &has_invalidated_resolution,
            has_changed_automatic_type_directive_names,
        );

        if up_to_date && !self.has_changed_config_file_parsing_errors {
            trace!("program is up to date");
        } else {
            if self.report_file_change_detected {
                self.report_watch_status(&diagnostic_messages::FILE_CHANGE_DETECTED, &[], None);
            }
            self.create_new_program(&has_invalidated_resolution, has_changed_automatic_type_directive_names);
            self.emit_and_report_errors();
        }
        self.report_file_change_detected = false;
    }

    fn create_new_program(
        &mut self,
        has_invalidated_resolution: &HasInvalidatedResolution,
        has_changed_automatic_type_directive_names: bool,
    ) {
        let needs_update_in_type_root_watch = self.has_changed_compiler_options || self.builder.is_none();
        self.has_changed_compiler_options = false;
        self.has_changed_config_file_parsing_errors = false;

        let old_program = self.get_current_program();
        self.resolution_cache.start_caching_per_directory_resolution();
        let mut read_errors = Vec::new();
        let program = {
            let mut compiler_host = WatchCompilerHost {
                host: &self.host,
                source_files: &mut self.source_files,
                resolution_cache: &mut self.resolution_cache,
                factory: &mut self.factory,
                has_invalidated_resolution,
                has_changed_automatic_type_directive_names,
                read_errors: &mut read_errors,
            };
            Program::create(
                CreateProgramOptions {
                    root_names: &self.root_file_names,
                    options: &self.compiler_options,
                    config_file_parsing_diagnostics: &self.config_file_parsing_diagnostics,
                },
                &mut compiler_host,
                old_program.as_deref(),
            )
        };
        self.read_errors = read_errors;

        if let Some(old_program) = &old_program {
            self.release_old_source_files(old_program, &program);
        }
        self.resolution_cache
            .finish_caching_per_directory_resolution(&mut self.factory);
        self.update_missing_file_paths_watch(&program);
        let missing_file_watchers = &self.missing_file_watchers;
        self.source_files
            .evict_released_missing_files(|path| missing_file_watchers.contains_key(path));
        if needs_update_in_type_root_watch {
            self.resolution_cache
                .update_type_roots_watch(&self.compiler_options, &mut self.factory);
        }

        debug!(
            files = program.source_files().len(),
            missing = program.missing_file_paths().len(),
            reused = ?program.structure_is_reused(),
            "program created"
        );
        self.builder = Some(BuilderProgram::create(Rc::new(program), self.builder.take()));
    }

    /// Give back whatever the old program held that the new one does not
    /// share by identity.
    fn release_old_source_files(&mut self, old_program: &Program, new_program: &Program) {
        for old_file in old_program.source_files() {
            let new_file = new_program.get_source_file_by_path(&old_file.path);
            if new_file.is_some_and(|file| Rc::ptr_eq(file, old_file)) {
                continue;
            }
            self.source_files.on_release_old_source_file(
                old_file,
                new_file.is_some(),
                &mut self.resolution_cache,
                &mut self.factory,
            );
        }
    }

    fn update_missing_file_paths_watch(&mut self, program: &Program) {
        let missing = program.missing_file_paths();
        let stale: Vec<PathKey> = self
            .missing_file_watchers
            .keys()
            .filter(|key| !missing.contains_key(*key))
            .cloned()
            .collect();
        for key in stale {
            if let Some(watcher) = self.missing_file_watchers.remove(&key) {
                self.factory.close(watcher);
            }
        }
        for (key, file_name) in missing {
            if self.missing_file_watchers.contains_key(key) {
                continue;
            }
            let watcher =
                self.factory
                    .watch_file(file_name, PollingInterval::Medium, WatchTarget::MissingFile(key.clone()));
            self.missing_file_watchers.insert(key.clone(), watcher);
        }
    }

    fn emit_and_report_errors(&mut self) {
        self.cancellation_token.reset();
        let Some(builder) = self.builder.as_mut() else {
            return;
        };
        let mut diagnostics = match builder.get_semantic_diagnostics(Some(&self.cancellation_token)) {
            Ok(diagnostics) => diagnostics,
            Err(error) => {
                debug!(%error, "diagnostics abandoned");
                return;
            }
        };
        diagnostics.extend(self.read_errors.iter().cloned());
        let emit_result = builder.emit();
        diagnostics.extend(emit_result.diagnostics.iter().cloned());

        for diagnostic in &diagnostics {
            self.reporter.report_diagnostic(diagnostic);
        }
        self.reporter
            .after_program_create(builder.program(), &emit_result);
        let errors = error_count(&diagnostics);
        self.report_error_summary(errors);
    }

    fn report_error_summary(&mut self, errors: usize) {
        let count = errors.to_string();
        if errors == 1 {
            self.report_watch_status(
                &diagnostic_messages::FOUND_1_ERROR_WATCHING_FOR_FILE_CHANGES,
                &[],
                Some(errors),
            );
        } else {
            self.report_watch_status(
                &diagnostic_messages::FOUND_N_ERRORS_WATCHING_FOR_FILE_CHANGES,
                &[&count],
                Some(errors),
            );
        }
    }

    fn report_watch_status(&mut self, message: &DiagnosticMessage, args: &[&str], errors: Option<usize>) {
        let diagnostic = Diagnostic::from_message(message, args);
        debug!(code = diagnostic.code, "{}", diagnostic.message_text);
        self.reporter.on_watch_status_change(
            &diagnostic,
            self.system.new_line(),
            &self.compiler_options,
            errors,
        );
    }

    // =========================================================================
    // Events
    // =========================================================================

    fn schedule_program_update(&mut self) {
        if self.closed {
            return;
        }
        let deadline = self.system.now() + self.debounce;
        trace!(level = ?self.reload_level, "scheduling program update");
        self.timers.schedule(WatchTimer::UpdateProgram, deadline);
    }

    fn schedule_program_reload(&mut self) {
        self.reload_level = ReloadLevel::Full;
        self.schedule_program_update();
    }

    fn update_cached_system_with_file(&self, file_name: &Path, kind: FileWatcherEventKind) {
        let key = self.host.to_path(file_name);
        self.host.add_or_delete_file(file_name, &key, kind);
    }

    fn on_watch_event(&mut self, event: WatchEvent) {
        match event {
            WatchEvent::File {
                target: WatchTarget::ConfigFile | WatchTarget::ExtendedConfigFile(_),
                path,
                kind,
            } => {
                debug!(path = %path.display(), ?kind, "config file changed");
                self.update_cached_system_with_file(&path, kind);
                self.schedule_program_reload();
            }
            WatchEvent::File {
                target: WatchTarget::SourceFile(key),
                path,
                kind,
            } => {
                self.update_cached_system_with_file(&path, kind);
                if kind == FileWatcherEventKind::Deleted && self.source_files.contains(&key) {
                    self.resolution_cache.invalidate_resolution_of_file(&key);
                }
                self.source_files.next_source_file_version(&key);
                self.schedule_program_update();
            }
            WatchEvent::File {
                target: WatchTarget::MissingFile(key),
                path,
                kind,
            } => {
                self.update_cached_system_with_file(&path, kind);
                if kind == FileWatcherEventKind::Created
                    && let Some(watcher) = self.missing_file_watchers.remove(&key)
                {
                    self.factory.close(watcher);
                    self.source_files.next_source_file_version(&key);
                    self.schedule_program_update();
                }
            }
            WatchEvent::Directory {
                target: WatchTarget::WildcardDirectory(_),
                path,
            } => self.on_wildcard_directory_change(&path),
            WatchEvent::Directory {
                target: WatchTarget::FailedLookupLocations(_),
                path,
            } => {
                self.host.add_or_delete_file_or_directory(&path);
                if self
                    .resolution_cache
                    .invalidate_resolution_of_failed_lookup_location(&path)
                {
                    self.schedule_program_update();
                }
            }
            WatchEvent::Directory {
                target: WatchTarget::TypeRoots(_),
                path,
            } => {
                self.host.add_or_delete_file_or_directory(&path);
                self.resolution_cache.on_type_roots_directory_changed(&path);
                self.schedule_program_update();
            }
            other => trace!(?other, "ignoring watch event"),
        }
    }

    fn on_wildcard_directory_change(&mut self, path: &Path) {
        let key = self.host.to_path(path);
        self.host.add_or_delete_file_or_directory(path);
        self.source_files.next_source_file_version(&key);
        if self.is_ignored_by_wildcard_watch(path) {
            trace!(path = %path.display(), "wildcard change ignored");
            return;
        }
        if self.reload_level != ReloadLevel::Full {
            self.reload_level = ReloadLevel::Partial;
            self.schedule_program_update();
        }
    }

    /// Paths with an extension must be matching root file candidates;
    /// directories must not be excluded.
    fn is_ignored_by_wildcard_watch(&self, path: &Path) -> bool {
        let Some(specs) = &self.config_file_specs else {
            return true;
        };
        let case_sensitive = self.host.canonicalizer().is_case_sensitive();
        if path.extension().is_some() {
            !specs.matches_wildcard_file(path, &self.compiler_options, case_sensitive)
        } else {
            specs.is_excluded(path, case_sensitive)
        }
    }
}

impl Drop for WatchProgram {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "tests/watch_program_tests.rs"]
mod tests;
