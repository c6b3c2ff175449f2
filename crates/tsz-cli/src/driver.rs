//! Batch and watch entry points behind the `tsz` binary.

use anyhow::{Context, Result, bail};
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info};

use tsz_common::diagnostics::{Diagnostic, diagnostic_messages};
use tsz_watch::paths::{get_normalized_absolute_path, to_slash_string};
use tsz_watch::{RealSystem, System, WatchProgram, WatchProgramOptions, WatchReporter};

use crate::args::CliArgs;
use crate::reporter::{ConsoleReporter, ReporterOptions};

/// tsc exit status codes (matching TypeScript's ExitStatus enum)
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_DIAGNOSTICS_OUTPUTS_SKIPPED: i32 = 1;
pub const EXIT_DIAGNOSTICS_OUTPUTS_GENERATED: i32 = 2;

const CONFIG_FILE_NAME: &str = "tsconfig.json";

/// Run against the real file system and stdout.
pub fn run(args: &CliArgs) -> Result<i32> {
    let cwd = std::env::current_dir().context("failed to resolve current directory")?;
    let system: Rc<dyn System> = Rc::new(RealSystem::new(cwd));
    let is_terminal = io::stdout().is_terminal();
    run_with_system(args, system, is_terminal, io::stdout())
}

/// Build once, or keep rebuilding with `--watch`. Returns the process exit code.
///
/// A watch session only returns once the program is closed.
pub fn run_with_system<W: Write + 'static>(
    args: &CliArgs,
    system: Rc<dyn System>,
    is_terminal: bool,
    out: W,
) -> Result<i32> {
    let cwd = system.current_directory();
    if args.project.is_some() && !args.files.is_empty() {
        bail!("Option 'project' cannot be mixed with source files on a command line.");
    }

    let pretty = args.pretty.unwrap_or(is_terminal);
    let mut reporter = ConsoleReporter::new(
        Rc::clone(&system),
        ReporterOptions {
            watch: args.watch,
            pretty,
            clear_screen: is_terminal && !args.preserve_watch_output && !args.extended_diagnostics,
            list_files: args.list_files,
            list_emitted_files: args.list_emitted_files,
        },
        out,
    );

    let config_file_name = if args.files.is_empty() {
        match resolve_tsconfig_path(&*system, &cwd, args.project.as_deref())? {
            Some(path) => Some(path),
            None => {
                reporter.report_diagnostic(&Diagnostic::from_message(
                    &diagnostic_messages::CANNOT_FIND_TSCONFIG,
                    &[&to_slash_string(&cwd)],
                ));
                return Ok(EXIT_DIAGNOSTICS_OUTPUTS_SKIPPED);
            }
        }
    } else {
        None
    };
    debug!(config = ?config_file_name, roots = args.files.len(), watch = args.watch, "starting");

    let error_count = reporter.error_count_handle();
    let options = WatchProgramOptions {
        config_file_name,
        root_file_names: args
            .files
            .iter()
            .map(|file| get_normalized_absolute_path(file, &cwd))
            .collect(),
        watch_options: args.watch_options(&cwd),
        watch_diagnostics: args.extended_diagnostics,
        ..WatchProgramOptions::default()
    };
    let mut program = WatchProgram::new(system, options, Box::new(reporter));

    if args.watch {
        info!("watching for file changes");
        program.run_until(|_| false);
        return Ok(EXIT_SUCCESS);
    }

    let errors = error_count.get().unwrap_or(0);
    let no_emit = program.compiler_options().no_emit;
    program.close();
    Ok(match errors {
        0 => EXIT_SUCCESS,
        _ if no_emit => EXIT_DIAGNOSTICS_OUTPUTS_SKIPPED,
        _ => EXIT_DIAGNOSTICS_OUTPUTS_GENERATED,
    })
}

/// `-p` may name a config file or a directory holding `tsconfig.json`.
/// Without `-p` the nearest `tsconfig.json` at or above `cwd` is used.
pub fn resolve_tsconfig_path(
    system: &dyn System,
    cwd: &Path,
    project: Option<&Path>,
) -> Result<Option<PathBuf>> {
    let Some(project) = project else {
        return Ok(find_tsconfig(system, cwd));
    };

    let mut candidate = get_normalized_absolute_path(project, cwd);
    if system.directory_exists(&candidate) {
        candidate = candidate.join(CONFIG_FILE_NAME);
    }
    if !system.file_exists(&candidate) {
        bail!("tsconfig not found at {}", candidate.display());
    }
    Ok(Some(candidate))
}

fn find_tsconfig(system: &dyn System, cwd: &Path) -> Option<PathBuf> {
    cwd.ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| system.file_exists(candidate))
}

#[cfg(test)]
#[path = "tests/driver_tests.rs"]
mod tests;
