//! Incremental watch and build orchestration for the tsz compiler.
//!
//! This crate keeps a program up to date while its inputs change:
//! - Host abstraction (`System`) with a real and a virtual implementation
//! - File and directory watchers with native, polling and fallback modes
//! - Cached directory listings, source file versions and module resolutions
//! - Config file parsing with `extends`, wildcards and watch options
//! - The watch program that debounces changes and rebuilds
//!
//! Everything is single threaded; the caller drives time through
//! [`WatchProgram::tick`] or [`WatchProgram::run_until`].

pub mod builder;
pub mod cancellation;
pub mod config;
pub mod directory_cache;
pub mod directory_watcher;
pub mod fs_watch;
pub mod module_resolution;
pub mod paths;
pub mod polling;
pub mod program;
pub mod resolution_cache;
pub mod source_file;
pub mod source_file_cache;
pub mod system;
pub mod timers;
pub mod virtual_system;
pub mod watch_factory;
pub mod watch_options;
pub mod watch_program;

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

pub use builder::{BuilderProgram, EmitResult};
pub use cancellation::{CancellationToken, OperationCanceledError};
pub use config::{ParsedCommandLine, ResolvedCompilerOptions, parse_config_file};
pub use program::Program;
pub use system::{RealSystem, System};
pub use virtual_system::VirtualSystem;
pub use watch_options::WatchOptions;
pub use watch_program::{ReloadLevel, WatchProgram, WatchProgramOptions, WatchReporter};
