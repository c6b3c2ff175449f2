//! Diagnostic types and message lookup shared by the watch core and the CLI.
//!
//! Message data lives in `data.rs`. Only the messages reported by the watch
//! and build front-end are listed there.

use serde::Serialize;

mod data;
pub use data::{DIAGNOSTIC_MESSAGES, diagnostic_codes, diagnostic_messages};

// =============================================================================
// Diagnostic Types
// =============================================================================

/// Diagnostic category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DiagnosticCategory {
    Warning = 0,
    Error = 1,
    Suggestion = 2,
    Message = 3,
}

/// Related information for a diagnostic (e.g., "see also" locations).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiagnosticRelatedInformation {
    pub file: String,
    pub start: u32,
    pub length: u32,
    pub message_text: String,
    pub category: DiagnosticCategory,
    pub code: u32,
}

/// A diagnostic with optional file location and related information.
///
/// Global diagnostics (config errors, watch status messages) use an empty
/// `file`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub file: String,
    pub start: u32,
    pub length: u32,
    pub message_text: String,
    pub category: DiagnosticCategory,
    pub code: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub related_information: Vec<DiagnosticRelatedInformation>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    #[must_use]
    pub const fn error(file: String, start: u32, length: u32, message: String, code: u32) -> Self {
        Self {
            file,
            start,
            length,
            message_text: message,
            category: DiagnosticCategory::Error,
            code,
            related_information: Vec::new(),
        }
    }

    /// Create a diagnostic from a message definition, filling `{n}` placeholders.
    #[must_use]
    pub fn from_message(message: &DiagnosticMessage, args: &[&str]) -> Self {
        Self {
            file: String::new(),
            start: 0,
            length: 0,
            message_text: format_message(message.message, args),
            category: message.category,
            code: message.code,
            related_information: Vec::new(),
        }
    }

    /// Attach a file location to this diagnostic.
    #[must_use]
    pub fn in_file(mut self, file: impl Into<String>, start: u32, length: u32) -> Self {
        self.file = file.into();
        self.start = start;
        self.length = length;
        self
    }

    /// Add related information to this diagnostic.
    #[must_use]
    pub fn with_related(mut self, file: String, start: u32, length: u32, message: String) -> Self {
        self.related_information.push(DiagnosticRelatedInformation {
            file,
            start,
            length,
            message_text: message,
            category: DiagnosticCategory::Message,
            code: 0,
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.category == DiagnosticCategory::Error
    }
}

/// Format a diagnostic message by replacing {0}, {1}, etc. with arguments.
#[must_use]
pub fn format_message(template: &str, args: &[&str]) -> String {
    let mut result = template.to_string();
    for (i, arg) in args.iter().enumerate() {
        result = result.replace(&format!("{{{i}}}"), arg);
    }
    result
}

/// A diagnostic message definition with code, category, and message template.
#[derive(Clone, Copy, Debug)]
pub struct DiagnosticMessage {
    pub code: u32,
    pub category: DiagnosticCategory,
    pub message: &'static str,
}

/// Look up a diagnostic message definition by code.
#[must_use]
pub fn get_diagnostic_message(code: u32) -> Option<&'static DiagnosticMessage> {
    DIAGNOSTIC_MESSAGES.iter().find(|m| m.code == code)
}

/// Get the message template for a diagnostic code.
#[must_use]
pub fn get_message_template(code: u32) -> Option<&'static str> {
    get_diagnostic_message(code).map(|m| m.message)
}

/// Count the diagnostics that are errors.
pub fn error_count(diagnostics: &[Diagnostic]) -> usize {
    diagnostics.iter().filter(|d| d.is_error()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_message_replaces_placeholders() {
        assert_eq!(
            format_message("Cannot find module '{0}' from '{1}'.", &["./b", "a.ts"]),
            "Cannot find module './b' from 'a.ts'."
        );
    }

    #[test]
    fn test_from_message_uses_category_and_code() {
        let diag = Diagnostic::from_message(&diagnostic_messages::FILE_NOT_FOUND, &["/p/a.ts"]);
        assert_eq!(diag.code, diagnostic_codes::FILE_NOT_FOUND);
        assert_eq!(diag.category, DiagnosticCategory::Error);
        assert!(diag.message_text.contains("/p/a.ts"));
        assert!(diag.file.is_empty());
    }

    #[test]
    fn test_error_count_skips_messages() {
        let diagnostics = vec![
            Diagnostic::from_message(
                &diagnostic_messages::STARTING_COMPILATION_IN_WATCH_MODE,
                &[],
            ),
            Diagnostic::from_message(&diagnostic_messages::CANNOT_FIND_MODULE, &["x"]),
        ];
        assert_eq!(error_count(&diagnostics), 1);
    }

    #[test]
    fn test_lookup_by_code() {
        assert_eq!(
            get_message_template(2307),
            Some("Cannot find module '{0}' or its corresponding type declarations.")
        );
        assert!(get_diagnostic_message(1).is_none());
    }
}
