use super::DiagnosticMessage;

pub mod diagnostic_codes {
    pub const CANNOT_FIND_MODULE: u32 = 2307;
    pub const CANNOT_FIND_TYPE_DEFINITION_FILE: u32 = 2688;
    pub const CANNOT_READ_FILE_WITH_REASON: u32 = 5012;
    pub const FAILED_TO_PARSE_FILE: u32 = 5014;
    pub const CANNOT_FIND_TSCONFIG: u32 = 5081;
    pub const CANNOT_READ_FILE: u32 = 5083;
    pub const FILE_NOT_FOUND: u32 = 6053;
    pub const STARTING_COMPILATION_IN_WATCH_MODE: u32 = 6031;
    pub const FILE_CHANGE_DETECTED: u32 = 6032;
    pub const FOUND_1_ERROR_WATCHING_FOR_FILE_CHANGES: u32 = 6193;
    pub const FOUND_N_ERRORS_WATCHING_FOR_FILE_CHANGES: u32 = 6194;
    pub const NO_INPUTS_WERE_FOUND_IN_CONFIG_FILE: u32 = 18003;
}

pub mod diagnostic_messages {
    use crate::diagnostics::{DiagnosticCategory, DiagnosticMessage};

    pub const CANNOT_FIND_MODULE: DiagnosticMessage = DiagnosticMessage {
        code: 2307,
        category: DiagnosticCategory::Error,
        message: "Cannot find module '{0}' or its corresponding type declarations.",
    };
    pub const CANNOT_FIND_TYPE_DEFINITION_FILE: DiagnosticMessage = DiagnosticMessage {
        code: 2688,
        category: DiagnosticCategory::Error,
        message: "Cannot find type definition file for '{0}'.",
    };
    pub const CANNOT_READ_FILE_WITH_REASON: DiagnosticMessage = DiagnosticMessage {
        code: 5012,
        category: DiagnosticCategory::Error,
        message: "Cannot read file '{0}': {1}.",
    };
    pub const FAILED_TO_PARSE_FILE: DiagnosticMessage = DiagnosticMessage {
        code: 5014,
        category: DiagnosticCategory::Error,
        message: "Failed to parse file '{0}': {1}.",
    };
    pub const CANNOT_FIND_TSCONFIG: DiagnosticMessage = DiagnosticMessage {
        code: 5081,
        category: DiagnosticCategory::Error,
        message: "Cannot find a tsconfig.json file at the current directory: {0}.",
    };
    pub const CANNOT_READ_FILE: DiagnosticMessage = DiagnosticMessage {
        code: 5083,
        category: DiagnosticCategory::Error,
        message: "Cannot read file '{0}'.",
    };
    pub const FILE_NOT_FOUND: DiagnosticMessage = DiagnosticMessage {
        code: 6053,
        category: DiagnosticCategory::Error,
        message: "File '{0}' not found.",
    };
    pub const STARTING_COMPILATION_IN_WATCH_MODE: DiagnosticMessage = DiagnosticMessage {
        code: 6031,
        category: DiagnosticCategory::Message,
        message: "Starting compilation in watch mode...",
    };
    pub const FILE_CHANGE_DETECTED: DiagnosticMessage = DiagnosticMessage {
        code: 6032,
        category: DiagnosticCategory::Message,
        message: "File change detected. Starting incremental compilation...",
    };
    pub const FOUND_1_ERROR_WATCHING_FOR_FILE_CHANGES: DiagnosticMessage = DiagnosticMessage {
        code: 6193,
        category: DiagnosticCategory::Message,
        message: "Found 1 error. Watching for file changes.",
    };
    pub const FOUND_N_ERRORS_WATCHING_FOR_FILE_CHANGES: DiagnosticMessage = DiagnosticMessage {
        code: 6194,
        category: DiagnosticCategory::Message,
        message: "Found {0} errors. Watching for file changes.",
    };
    pub const NO_INPUTS_WERE_FOUND_IN_CONFIG_FILE: DiagnosticMessage = DiagnosticMessage {
        code: 18003,
        category: DiagnosticCategory::Error,
        message: "No inputs were found in config file '{0}'. Specified 'include' paths were '{1}' and 'exclude' paths were '{2}'.",
    };
}

pub static DIAGNOSTIC_MESSAGES: &[DiagnosticMessage] = &[
    diagnostic_messages::CANNOT_FIND_MODULE,
    diagnostic_messages::CANNOT_FIND_TYPE_DEFINITION_FILE,
    diagnostic_messages::CANNOT_READ_FILE_WITH_REASON,
    diagnostic_messages::FAILED_TO_PARSE_FILE,
    diagnostic_messages::CANNOT_FIND_TSCONFIG,
    diagnostic_messages::CANNOT_READ_FILE,
    diagnostic_messages::FILE_NOT_FOUND,
    diagnostic_messages::STARTING_COMPILATION_IN_WATCH_MODE,
    diagnostic_messages::FILE_CHANGE_DETECTED,
    diagnostic_messages::FOUND_1_ERROR_WATCHING_FOR_FILE_CHANGES,
    diagnostic_messages::FOUND_N_ERRORS_WATCHING_FOR_FILE_CHANGES,
    diagnostic_messages::NO_INPUTS_WERE_FOUND_IN_CONFIG_FILE,
];
