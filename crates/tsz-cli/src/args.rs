use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use tsz_watch::watch_options;

/// CLI arguments for the tsz binary.
#[derive(Parser, Debug)]
#[command(
    name = "tsz",
    version,
    about = "Codename Zang (Persian for rust) - incremental TypeScript builds"
)]
pub struct CliArgs {
    // ==================== Command-line Only Options ====================
    /// Watch input files and recompile on changes.
    #[arg(short = 'w', long)]
    pub watch: bool,

    /// Path to tsconfig.json or a directory containing it.
    #[arg(short = 'p', long = "project")]
    pub project: Option<PathBuf>,

    // ==================== Compiler Diagnostics ====================
    /// Log every watcher that is added, closed or triggered.
    #[arg(long = "extendedDiagnostics", alias = "extended-diagnostics")]
    pub extended_diagnostics: bool,

    /// Print all of the files read during the compilation.
    #[arg(long = "listFiles", alias = "list-files")]
    pub list_files: bool,

    /// Print the names of emitted files after a compilation.
    #[arg(long = "listEmittedFiles", alias = "list-emitted-files")]
    pub list_emitted_files: bool,

    // ==================== Output Formatting ====================
    /// Enable color and formatting in the output to make compiler errors easier to read.
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub pretty: Option<bool>,

    /// Disable wiping the console in watch mode.
    #[arg(long = "preserveWatchOutput", alias = "preserve-watch-output")]
    pub preserve_watch_output: bool,

    // ==================== Watch Mode Options ====================
    /// Specify how the TypeScript watch mode works.
    #[arg(long = "watchFile", alias = "watch-file", value_enum, ignore_case = true)]
    pub watch_file: Option<WatchFileKind>,

    /// Specify how directories are watched on systems that lack recursive file-watching functionality.
    #[arg(long = "watchDirectory", alias = "watch-directory", value_enum, ignore_case = true)]
    pub watch_directory: Option<WatchDirectoryKind>,

    /// Specify what approach the watcher should use if the system runs out of native file watchers.
    #[arg(long = "fallbackPolling", alias = "fallback-polling", value_enum, ignore_case = true)]
    pub fallback_polling: Option<PollingWatchKind>,

    /// Synchronously call callbacks and update the state of directory watchers.
    #[arg(
        long = "synchronousWatchDirectory",
        alias = "synchronous-watch-directory"
    )]
    pub synchronous_watch_directory: bool,

    /// Remove a list of directories from the watch process.
    #[arg(
        long = "excludeDirectories",
        alias = "exclude-directories",
        value_delimiter = ','
    )]
    pub exclude_directories: Option<Vec<PathBuf>>,

    /// Remove a list of files from the watch mode's processing.
    #[arg(long = "excludeFiles", alias = "exclude-files", value_delimiter = ',')]
    pub exclude_files: Option<Vec<PathBuf>>,

    // ==================== Input Files ====================
    /// Input files to compile.
    #[arg(value_name = "FILE")]
    pub files: Vec<PathBuf>,
}

impl CliArgs {
    /// Watch options given on the command line. Relative exclude patterns
    /// are anchored at `current_directory`.
    pub fn watch_options(&self, current_directory: &std::path::Path) -> watch_options::WatchOptions {
        let absolute = |patterns: &Option<Vec<PathBuf>>| -> Vec<String> {
            patterns
                .iter()
                .flatten()
                .map(|pattern| {
                    tsz_watch::paths::to_slash_string(&tsz_watch::paths::get_normalized_absolute_path(
                        pattern,
                        current_directory,
                    ))
                })
                .collect()
        };
        watch_options::WatchOptions {
            watch_file: self.watch_file.map(Into::into),
            watch_directory: self.watch_directory.map(Into::into),
            fallback_polling: self.fallback_polling.map(Into::into),
            synchronous_watch_directory: self.synchronous_watch_directory.then_some(true),
            exclude_directories: absolute(&self.exclude_directories),
            exclude_files: absolute(&self.exclude_files),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum WatchFileKind {
    /// Poll files at fixed intervals.
    #[value(name = "fixedpollinginterval", alias = "fixed-polling-interval")]
    FixedPollingInterval,
    /// Poll files with priority intervals.
    #[value(name = "prioritypollinginterval", alias = "priority-polling-interval")]
    PriorityPollingInterval,
    /// Poll files dynamically based on activity.
    #[value(name = "dynamicprioritypolling", alias = "dynamic-priority-polling")]
    DynamicPriorityPolling,
    /// Poll using fixed chunk sizes.
    #[value(name = "fixedchunksizepolling", alias = "fixed-chunk-size-polling")]
    FixedChunkSizePolling,
    /// Use native file system events.
    #[value(name = "usefsevents", alias = "use-fs-events")]
    UseFsEvents,
    /// Use file system events on parent directory.
    #[value(
        name = "usefseventsonparentdirectory",
        alias = "use-fs-events-on-parent-directory"
    )]
    UseFsEventsOnParentDirectory,
}

impl From<WatchFileKind> for watch_options::WatchFileKind {
    fn from(kind: WatchFileKind) -> Self {
        match kind {
            WatchFileKind::FixedPollingInterval => Self::FixedPollingInterval,
            WatchFileKind::PriorityPollingInterval => Self::PriorityPollingInterval,
            WatchFileKind::DynamicPriorityPolling => Self::DynamicPriorityPolling,
            WatchFileKind::FixedChunkSizePolling => Self::FixedChunkSizePolling,
            WatchFileKind::UseFsEvents => Self::UseFsEvents,
            WatchFileKind::UseFsEventsOnParentDirectory => Self::UseFsEventsOnParentDirectory,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum WatchDirectoryKind {
    /// Use native file system events for directories.
    #[value(name = "usefsevents", alias = "use-fs-events")]
    UseFsEvents,
    /// Poll directories at fixed intervals.
    #[value(name = "fixedpollinginterval", alias = "fixed-polling-interval")]
    FixedPollingInterval,
    /// Poll directories dynamically based on activity.
    #[value(name = "dynamicprioritypolling", alias = "dynamic-priority-polling")]
    DynamicPriorityPolling,
    /// Poll directories using fixed chunk sizes.
    #[value(name = "fixedchunksizepolling", alias = "fixed-chunk-size-polling")]
    FixedChunkSizePolling,
}

impl From<WatchDirectoryKind> for watch_options::WatchDirectoryKind {
    fn from(kind: WatchDirectoryKind) -> Self {
        match kind {
            WatchDirectoryKind::UseFsEvents => Self::UseFsEvents,
            WatchDirectoryKind::FixedPollingInterval => Self::FixedPollingInterval,
            WatchDirectoryKind::DynamicPriorityPolling => Self::DynamicPriorityPolling,
            WatchDirectoryKind::FixedChunkSizePolling => Self::FixedChunkSizePolling,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum PollingWatchKind {
    /// Poll at fixed intervals as fallback.
    #[value(name = "fixedinterval", alias = "fixed-interval")]
    FixedInterval,
    /// Poll with priority intervals as fallback.
    #[value(name = "priorityinterval", alias = "priority-interval")]
    PriorityInterval,
    /// Poll dynamically as fallback.
    #[value(name = "dynamicpriority", alias = "dynamic-priority")]
    DynamicPriority,
    /// Poll using fixed chunk sizes as fallback.
    #[value(name = "fixedchunksize", alias = "fixed-chunk-size")]
    FixedChunkSize,
}

impl From<PollingWatchKind> for watch_options::PollingWatchKind {
    fn from(kind: PollingWatchKind) -> Self {
        match kind {
            PollingWatchKind::FixedInterval => Self::FixedInterval,
            PollingWatchKind::PriorityInterval => Self::PriorityInterval,
            PollingWatchKind::DynamicPriority => Self::DynamicPriority,
            PollingWatchKind::FixedChunkSize => Self::FixedChunkSize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_watch_flags_and_files() {
        let args = CliArgs::try_parse_from([
            "tsz",
            "-w",
            "--watchFile",
            "useFsEventsOnParentDirectory",
            "--fallbackPolling=dynamicPriority",
            "--excludeDirectories",
            "node_modules,dist",
            "src/a.ts",
        ])
        .unwrap();
        assert!(args.watch);
        assert_eq!(args.files, vec![PathBuf::from("src/a.ts")]);

        let options = args.watch_options(Path::new("/project"));
        assert_eq!(
            options.watch_file,
            Some(watch_options::WatchFileKind::UseFsEventsOnParentDirectory)
        );
        assert_eq!(
            options.fallback_polling,
            Some(watch_options::PollingWatchKind::DynamicPriority)
        );
        assert_eq!(
            options.exclude_directories,
            vec!["/project/node_modules".to_string(), "/project/dist".to_string()]
        );
        assert_eq!(options.synchronous_watch_directory, None);
    }

    #[test]
    fn test_pretty_accepts_bare_flag() {
        let args = CliArgs::try_parse_from(["tsz", "--pretty", "-p", "app"]).unwrap();
        assert_eq!(args.pretty, Some(true));
        assert_eq!(args.project, Some(PathBuf::from("app")));

        let args = CliArgs::try_parse_from(["tsz", "--pretty", "false"]).unwrap();
        assert_eq!(args.pretty, Some(false));
    }
}
