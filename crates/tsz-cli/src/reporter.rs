//! Console rendering of diagnostics and watch status messages.

use colored::Colorize;
use std::cell::Cell;
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

use tsz_common::diagnostics::{Diagnostic, DiagnosticCategory, diagnostic_codes};
use tsz_watch::paths::to_slash_string;
use tsz_watch::{EmitResult, Program, ResolvedCompilerOptions, System, WatchReporter};

/// Full terminal reset, the same sequence `tsc` writes.
const CLEAR_SCREEN: &str = "\x1Bc";

#[derive(Clone, Copy, Debug, Default)]
pub struct ReporterOptions {
    pub watch: bool,
    pub pretty: bool,
    /// Wipe the console when a compilation starts. Off with `--preserveWatchOutput`.
    pub clear_screen: bool,
    pub list_files: bool,
    pub list_emitted_files: bool,
}

pub struct ConsoleReporter<W: Write = io::Stdout> {
    system: Rc<dyn System>,
    options: ReporterOptions,
    out: W,
    error_count: Rc<Cell<Option<usize>>>,
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(system: Rc<dyn System>, options: ReporterOptions, out: W) -> Self {
        Self {
            system,
            options,
            out,
            error_count: Rc::new(Cell::new(None)),
        }
    }

    /// Error count of the most recent build, shared with the driver after
    /// the reporter has been handed to the watch program.
    pub fn error_count_handle(&self) -> Rc<Cell<Option<usize>>> {
        Rc::clone(&self.error_count)
    }

    fn write(&mut self, text: &str) {
        let result = self
            .out
            .write_all(text.as_bytes())
            .and_then(|()| self.out.flush());
        if let Err(err) = result {
            warn!(%err, "failed to write to console");
        }
    }
}

impl<W: Write> WatchReporter for ConsoleReporter<W> {
    fn report_diagnostic(&mut self, diagnostic: &Diagnostic) {
        let text = if diagnostic.file.is_empty() {
            None
        } else {
            self.system.read_file(Path::new(&diagnostic.file)).ok()
        };
        let new_line = self.system.new_line().to_string();
        let mut output = format_diagnostic(
            diagnostic,
            text.as_deref(),
            &self.system.current_directory(),
            self.options.pretty,
            &new_line,
        );
        output.push_str(&new_line);
        if self.options.pretty {
            output.push_str(&new_line);
        }
        self.write(&output);
    }

    fn on_watch_status_change(
        &mut self,
        diagnostic: &Diagnostic,
        new_line: &str,
        _options: &ResolvedCompilerOptions,
        error_count: Option<usize>,
    ) {
        if error_count.is_some() {
            self.error_count.set(error_count);
        }

        if !self.options.watch {
            // A one-shot build only prints the summary, and only when pretty.
            if let Some(count) = error_count.filter(|&count| count > 0)
                && self.options.pretty
            {
                let summary = if count == 1 {
                    "Found 1 error.".to_string()
                } else {
                    format!("Found {count} errors.")
                };
                self.write(&format!("{summary}{new_line}{new_line}"));
            }
            return;
        }

        if self.options.clear_screen
            && matches!(
                diagnostic.code,
                diagnostic_codes::STARTING_COMPILATION_IN_WATCH_MODE
                    | diagnostic_codes::FILE_CHANGE_DETECTED
            )
        {
            self.write(CLEAR_SCREEN);
        }
        let time = clock_time(SystemTime::now());
        let output = format_status(diagnostic, &time, self.options.pretty, new_line);
        self.write(&output);
    }

    fn after_program_create(&mut self, program: &Program, emit_result: &EmitResult) {
        let new_line = self.system.new_line().to_string();
        let mut output = String::new();
        if self.options.list_emitted_files {
            for file in &emit_result.emitted_files {
                output.push_str(&format!("TSFILE: {}{new_line}", to_slash_string(file)));
            }
        }
        if self.options.list_files {
            for file in program.source_files() {
                output.push_str(&to_slash_string(&file.file_name));
                output.push_str(&new_line);
            }
        }
        if !output.is_empty() {
            self.write(&output);
        }
    }
}

/// Render one diagnostic without a trailing newline.
///
/// Plain: `src/a.ts(1,8): error TS2307: message`.
/// Pretty: `src/a.ts:1:8 - error TS2307: message` followed by a code frame.
pub fn format_diagnostic(
    diagnostic: &Diagnostic,
    source_text: Option<&str>,
    current_directory: &Path,
    pretty: bool,
    new_line: &str,
) -> String {
    let category = category_name(diagnostic.category);
    let code = format!("TS{}", diagnostic.code);

    if diagnostic.file.is_empty() {
        return if pretty {
            format!(
                "{} {}: {}",
                colored_category(diagnostic.category, category),
                code.bright_black(),
                diagnostic.message_text
            )
        } else {
            format!("{category} {code}: {}", diagnostic.message_text)
        };
    }

    let file = display_path(&diagnostic.file, current_directory);
    let Some(text) = source_text else {
        return if pretty {
            format!(
                "{} - {} {}: {}",
                file.cyan(),
                colored_category(diagnostic.category, category),
                code.bright_black(),
                diagnostic.message_text
            )
        } else {
            format!("{file}: {category} {code}: {}", diagnostic.message_text)
        };
    };

    let (line, column) = line_and_column(text, diagnostic.start as usize);
    if !pretty {
        return format!(
            "{file}({},{}): {category} {code}: {}",
            line + 1,
            column + 1,
            diagnostic.message_text
        );
    }

    let mut output = format!(
        "{}:{}:{} - {} {}: {}",
        file.cyan(),
        (line + 1).to_string().yellow(),
        (column + 1).to_string().yellow(),
        colored_category(diagnostic.category, category),
        code.bright_black(),
        diagnostic.message_text
    );
    output.push_str(new_line);
    output.push_str(new_line);
    output.push_str(&code_frame(text, line, column, diagnostic.length as usize, new_line));
    output
}

/// Render a status message: `[12:00:00] message` when pretty,
/// `12:00:00 - message` otherwise. Ends with a blank line.
pub fn format_status(diagnostic: &Diagnostic, time: &str, pretty: bool, new_line: &str) -> String {
    if pretty {
        format!(
            "[{}] {}{new_line}{new_line}",
            time.bright_black(),
            diagnostic.message_text
        )
    } else {
        format!("{time} - {}{new_line}{new_line}", diagnostic.message_text)
    }
}

/// `HH:MM:SS` wall clock time in UTC.
pub fn clock_time(time: SystemTime) -> String {
    let seconds = time
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    format!(
        "{:02}:{:02}:{:02}",
        (seconds / 3600) % 24,
        (seconds / 60) % 60,
        seconds % 60
    )
}

fn category_name(category: DiagnosticCategory) -> &'static str {
    match category {
        DiagnosticCategory::Error => "error",
        DiagnosticCategory::Warning => "warning",
        DiagnosticCategory::Suggestion => "suggestion",
        DiagnosticCategory::Message => "message",
    }
}

fn colored_category(category: DiagnosticCategory, name: &str) -> colored::ColoredString {
    match category {
        DiagnosticCategory::Error => name.red(),
        DiagnosticCategory::Warning => name.yellow(),
        DiagnosticCategory::Suggestion | DiagnosticCategory::Message => name.blue(),
    }
}

fn display_path(file: &str, current_directory: &Path) -> String {
    Path::new(file)
        .strip_prefix(current_directory)
        .map(to_slash_string)
        .unwrap_or_else(|_| file.to_string())
}

/// Zero-based line and column (in chars) of a byte offset.
fn line_and_column(text: &str, offset: usize) -> (usize, usize) {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    let before = &text[..offset];
    let line = before.matches('\n').count();
    let line_start = before.rfind('\n').map_or(0, |index| index + 1);
    (line, before[line_start..].chars().count())
}

fn code_frame(text: &str, line: usize, column: usize, length: usize, new_line: &str) -> String {
    let source_line = text
        .lines()
        .nth(line)
        .unwrap_or_default()
        .trim_end_matches('\r');
    let gutter = (line + 1).to_string();
    let available = source_line.chars().count().saturating_sub(column);
    let squiggle = "~".repeat(length.min(available).max(1));

    format!(
        "{} {source_line}{new_line}{} {}{}",
        gutter.reversed(),
        " ".repeat(gutter.len()).reversed(),
        " ".repeat(column),
        squiggle.red()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::path::PathBuf;
    use tsz_common::diagnostics::diagnostic_messages;
    use tsz_watch::VirtualSystem;

    #[derive(Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn take(&self) -> String {
            String::from_utf8(std::mem::take(&mut *self.0.borrow_mut())).unwrap()
        }
    }

    fn missing_module() -> Diagnostic {
        Diagnostic::from_message(&diagnostic_messages::CANNOT_FIND_MODULE, &["./b"])
            .in_file("/project/src/a.ts", 24, 5)
    }

    const SOURCE: &str = "export const x = 1;\nimport './b';\n";

    #[test]
    fn test_plain_diagnostic_uses_relative_path_and_position() {
        let output = format_diagnostic(
            &missing_module(),
            Some(SOURCE),
            Path::new("/project"),
            false,
            "\n",
        );
        assert_eq!(
            output,
            "src/a.ts(2,5): error TS2307: Cannot find module './b' or its corresponding type declarations."
        );
    }

    #[test]
    fn test_global_and_unreadable_diagnostics() {
        let global = Diagnostic::from_message(&diagnostic_messages::FAILED_TO_PARSE_FILE, &[
            "/project/tsconfig.json",
            "unexpected end",
        ]);
        let output = format_diagnostic(&global, None, Path::new("/project"), false, "\n");
        assert!(output.starts_with("error TS5014: "));

        let output = format_diagnostic(&missing_module(), None, Path::new("/elsewhere"), false, "\n");
        assert!(output.starts_with("/project/src/a.ts: error TS2307: "));
    }

    #[test]
    fn test_pretty_diagnostic_has_code_frame() {
        let output = format_diagnostic(
            &missing_module(),
            Some(SOURCE),
            Path::new("/project"),
            true,
            "\n",
        );
        assert!(output.contains("TS2307"));
        assert!(output.contains("import './b';"));
        assert!(output.contains("~~~~~"));
    }

    #[test]
    fn test_line_and_column_counts_chars() {
        assert_eq!(line_and_column("abc", 0), (0, 0));
        assert_eq!(line_and_column("a\nbc", 3), (1, 1));
        assert_eq!(line_and_column("é\nx", 1), (0, 0));
        assert_eq!(line_and_column("ab", 99), (0, 2));
    }

    #[test]
    fn test_status_line_and_clock() {
        let status = Diagnostic::from_message(&diagnostic_messages::FILE_CHANGE_DETECTED, &[]);
        assert_eq!(
            format_status(&status, "10:20:30", false, "\n"),
            format!("10:20:30 - {}\n\n", status.message_text)
        );

        let time = UNIX_EPOCH + std::time::Duration::from_secs(86_400 + 3_600 + 62);
        assert_eq!(clock_time(time), "01:01:02");
    }

    fn reporter(options: ReporterOptions) -> (ConsoleReporter<SharedBuffer>, SharedBuffer) {
        let sys = Rc::new(VirtualSystem::new("/project"));
        sys.write("/project/src/a.ts", SOURCE);
        let buffer = SharedBuffer::default();
        (ConsoleReporter::new(sys, options, buffer.clone()), buffer)
    }

    #[test]
    fn test_watch_mode_clears_screen_on_start_only_when_allowed() {
        let starting =
            Diagnostic::from_message(&diagnostic_messages::STARTING_COMPILATION_IN_WATCH_MODE, &[]);
        let options = ResolvedCompilerOptions::default();

        let (mut console, buffer) = reporter(ReporterOptions {
            watch: true,
            clear_screen: true,
            ..ReporterOptions::default()
        });
        console.on_watch_status_change(&starting, "\n", &options, None);
        assert!(buffer.take().starts_with(CLEAR_SCREEN));

        let (mut console, buffer) = reporter(ReporterOptions {
            watch: true,
            ..ReporterOptions::default()
        });
        console.on_watch_status_change(&starting, "\n", &options, None);
        let output = buffer.take();
        assert!(!output.contains(CLEAR_SCREEN));
        assert!(output.contains(&starting.message_text));
    }

    #[test]
    fn test_batch_mode_records_error_count_silently() {
        let summary = Diagnostic::from_message(
            &diagnostic_messages::FOUND_N_ERRORS_WATCHING_FOR_FILE_CHANGES,
            &["2"],
        );
        let (mut console, buffer) = reporter(ReporterOptions::default());
        let count = console.error_count_handle();
        console.on_watch_status_change(&summary, "\n", &ResolvedCompilerOptions::default(), Some(2));
        assert_eq!(count.get(), Some(2));
        assert!(buffer.take().is_empty());

        console.report_diagnostic(&missing_module());
        assert_eq!(
            buffer.take(),
            "src/a.ts(2,5): error TS2307: Cannot find module './b' or its corresponding type declarations.\n"
        );
    }

    #[test]
    fn test_list_files_after_each_build() {
        let sys = Rc::new(VirtualSystem::new("/project"));
        sys.write("/project/src/a.ts", "export const a = 1;");
        let buffer = SharedBuffer::default();
        let console = ConsoleReporter::new(
            Rc::clone(&sys) as Rc<dyn System>,
            ReporterOptions {
                list_files: true,
                list_emitted_files: true,
                ..ReporterOptions::default()
            },
            buffer.clone(),
        );
        let count = console.error_count_handle();
        let options = tsz_watch::WatchProgramOptions {
            root_file_names: vec![PathBuf::from("/project/src/a.ts")],
            ..tsz_watch::WatchProgramOptions::default()
        };
        let mut watch = tsz_watch::WatchProgram::new(sys, options, Box::new(console));
        watch.close();

        assert_eq!(
            buffer.take(),
            "TSFILE: /project/src/a.js\n/project/src/a.ts\n"
        );
        assert_eq!(count.get(), Some(0));
    }
}
