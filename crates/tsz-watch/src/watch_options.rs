//! Watch strategy selection: `watchOptions` from the config file, falling
//! back to the `TSC_WATCHFILE`, `TSC_WATCHDIRECTORY` and
//! `TSC_NONPOLLING_WATCHER` environment variables.

use std::path::Path;
use std::str::FromStr;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::warn;

use crate::paths::to_slash_string;
use crate::polling::PollingStrategy;
use crate::system::System;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WatchFileKind {
    FixedPollingInterval,
    PriorityPollingInterval,
    DynamicPriorityPolling,
    FixedChunkSizePolling,
    UseFsEvents,
    UseFsEventsOnParentDirectory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WatchDirectoryKind {
    UseFsEvents,
    FixedPollingInterval,
    DynamicPriorityPolling,
    FixedChunkSizePolling,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PollingWatchKind {
    FixedInterval,
    PriorityInterval,
    DynamicPriority,
    FixedChunkSize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownWatchKind(pub String);

impl std::fmt::Display for UnknownWatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown watch kind '{}'", self.0)
    }
}

impl std::error::Error for UnknownWatchKind {}

impl FromStr for WatchFileKind {
    type Err = UnknownWatchKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixedpollinginterval" => Ok(Self::FixedPollingInterval),
            "prioritypollinginterval" => Ok(Self::PriorityPollingInterval),
            "dynamicprioritypolling" => Ok(Self::DynamicPriorityPolling),
            "fixedchunksizepolling" => Ok(Self::FixedChunkSizePolling),
            "usefsevents" => Ok(Self::UseFsEvents),
            "usefseventsonparentdirectory" => Ok(Self::UseFsEventsOnParentDirectory),
            _ => Err(UnknownWatchKind(s.to_string())),
        }
    }
}

impl FromStr for WatchDirectoryKind {
    type Err = UnknownWatchKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "usefsevents" => Ok(Self::UseFsEvents),
            "fixedpollinginterval" => Ok(Self::FixedPollingInterval),
            "dynamicprioritypolling" => Ok(Self::DynamicPriorityPolling),
            "fixedchunksizepolling" => Ok(Self::FixedChunkSizePolling),
            _ => Err(UnknownWatchKind(s.to_string())),
        }
    }
}

impl FromStr for PollingWatchKind {
    type Err = UnknownWatchKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixedinterval" => Ok(Self::FixedInterval),
            "priorityinterval" => Ok(Self::PriorityInterval),
            "dynamicpriority" => Ok(Self::DynamicPriority),
            "fixedchunksize" => Ok(Self::FixedChunkSize),
            _ => Err(UnknownWatchKind(s.to_string())),
        }
    }
}

impl WatchFileKind {
    /// Polling strategy for the polling kinds; `None` for event based kinds.
    pub fn polling_strategy(self) -> Option<PollingStrategy> {
        match self {
            Self::FixedPollingInterval => Some(PollingStrategy::FixedInterval),
            Self::PriorityPollingInterval => Some(PollingStrategy::PriorityInterval),
            Self::DynamicPriorityPolling => Some(PollingStrategy::DynamicPriority),
            Self::FixedChunkSizePolling => Some(PollingStrategy::FixedChunkSize),
            Self::UseFsEvents | Self::UseFsEventsOnParentDirectory => None,
        }
    }
}

impl WatchDirectoryKind {
    pub fn polling_strategy(self) -> Option<PollingStrategy> {
        match self {
            Self::UseFsEvents => None,
            Self::FixedPollingInterval => Some(PollingStrategy::FixedInterval),
            Self::DynamicPriorityPolling => Some(PollingStrategy::DynamicPriority),
            Self::FixedChunkSizePolling => Some(PollingStrategy::FixedChunkSize),
        }
    }
}

impl PollingWatchKind {
    pub fn strategy(self) -> PollingStrategy {
        match self {
            Self::FixedInterval => PollingStrategy::FixedInterval,
            Self::PriorityInterval => PollingStrategy::PriorityInterval,
            Self::DynamicPriority => PollingStrategy::DynamicPriority,
            Self::FixedChunkSize => PollingStrategy::FixedChunkSize,
        }
    }
}

/// `watchOptions` as written by the user. Exclude patterns are absolute.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WatchOptions {
    pub watch_file: Option<WatchFileKind>,
    pub watch_directory: Option<WatchDirectoryKind>,
    pub fallback_polling: Option<PollingWatchKind>,
    pub synchronous_watch_directory: Option<bool>,
    pub exclude_directories: Vec<String>,
    pub exclude_files: Vec<String>,
}

impl WatchOptions {
    /// Fields set in `overrides` win.
    pub fn merged_with(&self, overrides: &WatchOptions) -> WatchOptions {
        WatchOptions {
            watch_file: overrides.watch_file.or(self.watch_file),
            watch_directory: overrides.watch_directory.or(self.watch_directory),
            fallback_polling: overrides.fallback_polling.or(self.fallback_polling),
            synchronous_watch_directory: overrides
                .synchronous_watch_directory
                .or(self.synchronous_watch_directory),
            exclude_directories: if overrides.exclude_directories.is_empty() {
                self.exclude_directories.clone()
            } else {
                overrides.exclude_directories.clone()
            },
            exclude_files: if overrides.exclude_files.is_empty() {
                self.exclude_files.clone()
            } else {
                overrides.exclude_files.clone()
            },
        }
    }
}

/// Watch related environment variables, read once from the host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WatchEnvironment {
    pub tsc_watch_file: Option<String>,
    pub tsc_watch_directory: Option<String>,
    pub use_non_polling_watchers: bool,
}

impl WatchEnvironment {
    pub fn from_system(system: &dyn System) -> Self {
        Self {
            tsc_watch_file: system.get_environment_variable("TSC_WATCHFILE"),
            tsc_watch_directory: system.get_environment_variable("TSC_WATCHDIRECTORY"),
            use_non_polling_watchers: system
                .get_environment_variable("TSC_NONPOLLING_WATCHER")
                .is_some_and(|value| !value.is_empty()),
        }
    }
}

/// Concrete strategy for one watch request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedFileWatch {
    pub kind: WatchFileKind,
    pub fallback: PollingWatchKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedDirectoryWatch {
    pub kind: WatchDirectoryKind,
    pub fallback: PollingWatchKind,
    pub synchronous: bool,
}

const DEFAULT_FALLBACK_POLLING: PollingWatchKind = PollingWatchKind::PriorityInterval;

pub fn resolve_file_watch(options: &WatchOptions, env: &WatchEnvironment) -> ResolvedFileWatch {
    let fallback = options.fallback_polling.unwrap_or(DEFAULT_FALLBACK_POLLING);
    if let Some(kind) = options.watch_file {
        return ResolvedFileWatch { kind, fallback };
    }
    let kind = match env.tsc_watch_file.as_deref() {
        Some("PriorityPollingInterval") => WatchFileKind::PriorityPollingInterval,
        Some("DynamicPriorityPolling") => WatchFileKind::DynamicPriorityPolling,
        Some("UseFsEvents") => WatchFileKind::UseFsEvents,
        Some("UseFsEventsWithFallbackDynamicPolling") => {
            return ResolvedFileWatch {
                kind: WatchFileKind::UseFsEvents,
                fallback: options
                    .fallback_polling
                    .unwrap_or(PollingWatchKind::DynamicPriority),
            };
        }
        Some("UseFsEventsOnParentDirectory") => WatchFileKind::UseFsEventsOnParentDirectory,
        _ if env.use_non_polling_watchers => WatchFileKind::UseFsEventsOnParentDirectory,
        _ => WatchFileKind::UseFsEvents,
    };
    ResolvedFileWatch { kind, fallback }
}

pub fn resolve_directory_watch(options: &WatchOptions, env: &WatchEnvironment) -> ResolvedDirectoryWatch {
    let fallback = options.fallback_polling.unwrap_or(DEFAULT_FALLBACK_POLLING);
    let synchronous = options.synchronous_watch_directory.unwrap_or(false);
    let kind = options.watch_directory.unwrap_or_else(|| {
        match env.tsc_watch_directory.as_deref() {
            Some("RecursiveDirectoryUsingFsWatchFile") => WatchDirectoryKind::FixedPollingInterval,
            Some("RecursiveDirectoryUsingDynamicPriorityPolling") => {
                WatchDirectoryKind::DynamicPriorityPolling
            }
            _ => WatchDirectoryKind::UseFsEvents,
        }
    });
    ResolvedDirectoryWatch {
        kind,
        fallback,
        synchronous,
    }
}

/// Compiled `excludeFiles` / `excludeDirectories` patterns.
#[derive(Debug, Default)]
pub struct WatchExclusions {
    files: Option<GlobSet>,
    directories: Option<GlobSet>,
}

fn build_glob_set(patterns: &[String], case_sensitive: bool, match_contents: bool) -> Option<GlobSet> {
    if patterns.is_empty() {
        return None;
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let pattern = pattern.trim_end_matches('/');
        let mut variants = vec![pattern.to_string()];
        if match_contents {
            variants.push(format!("{pattern}/**"));
        }
        for variant in variants {
            match GlobBuilder::new(&variant)
                .case_insensitive(!case_sensitive)
                .literal_separator(true)
                .build()
            {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(err) => warn!(pattern = %variant, error = %err, "ignoring invalid watch exclude pattern"),
            }
        }
    }
    builder.build().ok()
}

impl WatchExclusions {
    pub fn new(options: &WatchOptions, case_sensitive: bool) -> Self {
        Self {
            files: build_glob_set(&options.exclude_files, case_sensitive, false),
            directories: build_glob_set(&options.exclude_directories, case_sensitive, true),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_none() && self.directories.is_none()
    }

    pub fn is_file_excluded(&self, path: &Path) -> bool {
        let text = to_slash_string(path);
        self.files.as_ref().is_some_and(|set| set.is_match(&text))
            || self.directories.as_ref().is_some_and(|set| set.is_match(&text))
    }

    pub fn is_directory_excluded(&self, path: &Path) -> bool {
        let text = to_slash_string(path);
        self.directories.as_ref().is_some_and(|set| set.is_match(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_parse_case_insensitively() {
        assert_eq!("useFsEvents".parse::<WatchFileKind>(), Ok(WatchFileKind::UseFsEvents));
        assert_eq!(
            "DYNAMICPRIORITYPOLLING".parse::<WatchDirectoryKind>(),
            Ok(WatchDirectoryKind::DynamicPriorityPolling)
        );
        assert_eq!("fixedChunkSize".parse::<PollingWatchKind>(), Ok(PollingWatchKind::FixedChunkSize));
        assert!("sometimes".parse::<WatchFileKind>().is_err());
    }

    #[test]
    fn test_config_wins_over_environment() {
        let env = WatchEnvironment {
            tsc_watch_file: Some("DynamicPriorityPolling".to_string()),
            ..Default::default()
        };
        let options = WatchOptions {
            watch_file: Some(WatchFileKind::FixedChunkSizePolling),
            ..Default::default()
        };
        assert_eq!(
            resolve_file_watch(&options, &env).kind,
            WatchFileKind::FixedChunkSizePolling
        );
        assert_eq!(
            resolve_file_watch(&WatchOptions::default(), &env).kind,
            WatchFileKind::DynamicPriorityPolling
        );
    }

    #[test]
    fn test_environment_fallbacks() {
        let env = WatchEnvironment {
            tsc_watch_file: Some("UseFsEventsWithFallbackDynamicPolling".to_string()),
            tsc_watch_directory: Some("RecursiveDirectoryUsingFsWatchFile".to_string()),
            use_non_polling_watchers: false,
        };
        let file = resolve_file_watch(&WatchOptions::default(), &env);
        assert_eq!(file.kind, WatchFileKind::UseFsEvents);
        assert_eq!(file.fallback, PollingWatchKind::DynamicPriority);
        let dir = resolve_directory_watch(&WatchOptions::default(), &env);
        assert_eq!(dir.kind, WatchDirectoryKind::FixedPollingInterval);

        let non_polling = WatchEnvironment {
            use_non_polling_watchers: true,
            ..Default::default()
        };
        assert_eq!(
            resolve_file_watch(&WatchOptions::default(), &non_polling).kind,
            WatchFileKind::UseFsEventsOnParentDirectory
        );
        assert_eq!(
            resolve_file_watch(&WatchOptions::default(), &WatchEnvironment::default()),
            ResolvedFileWatch {
                kind: WatchFileKind::UseFsEvents,
                fallback: PollingWatchKind::PriorityInterval,
            }
        );
    }

    #[test]
    fn test_merge_prefers_overrides() {
        let base = WatchOptions {
            watch_file: Some(WatchFileKind::UseFsEvents),
            exclude_files: vec!["/p/a.ts".to_string()],
            ..Default::default()
        };
        let overrides = WatchOptions {
            watch_file: Some(WatchFileKind::DynamicPriorityPolling),
            synchronous_watch_directory: Some(true),
            ..Default::default()
        };
        let merged = base.merged_with(&overrides);
        assert_eq!(merged.watch_file, Some(WatchFileKind::DynamicPriorityPolling));
        assert_eq!(merged.synchronous_watch_directory, Some(true));
        assert_eq!(merged.exclude_files, vec!["/p/a.ts".to_string()]);
    }

    #[test]
    fn test_exclusions_match_directories_and_contents() {
        let options = WatchOptions {
            exclude_directories: vec!["/project/**/generated".to_string()],
            exclude_files: vec!["/project/*.tmp.ts".to_string()],
            ..Default::default()
        };
        let exclusions = WatchExclusions::new(&options, false);
        assert!(exclusions.is_directory_excluded(Path::new("/project/src/generated")));
        assert!(exclusions.is_file_excluded(Path::new("/project/src/Generated/a.ts")));
        assert!(exclusions.is_file_excluded(Path::new("/project/x.tmp.ts")));
        assert!(!exclusions.is_file_excluded(Path::new("/project/src/x.tmp.ts")));
        assert!(!exclusions.is_directory_excluded(Path::new("/project/src")));
    }
}
