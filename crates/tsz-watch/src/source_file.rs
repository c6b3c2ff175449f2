//! Source files as seen by the watch core.
//!
//! Parsing and binding happen elsewhere; this module only keeps the text,
//! its version and hash, and the references a file makes to other files.
//! References are found by a light pre-processing scan that understands
//! comments and string literals but not the full grammar.

use std::path::PathBuf;

use crate::paths::PathKey;

/// A module specifier or reference directive and where it appears.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileReference {
    pub file_name: String,
    /// Byte offset of the name inside the file text.
    pub pos: usize,
    pub end: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PreProcessedFileInfo {
    /// `import`/`export ... from`, `require()` and dynamic `import()`
    /// specifiers, in source order.
    pub imported_files: Vec<FileReference>,
    /// `/// <reference path="..." />`
    pub referenced_files: Vec<FileReference>,
    /// `/// <reference types="..." />`
    pub type_reference_directives: Vec<FileReference>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFile {
    pub file_name: PathBuf,
    pub path: PathKey,
    pub text: String,
    pub version: u32,
    /// Content hash from the host, compared by the builder.
    pub hash: String,
    pub imported_files: Vec<FileReference>,
    pub referenced_files: Vec<FileReference>,
    pub type_reference_directives: Vec<FileReference>,
}

impl SourceFile {
    pub fn new(file_name: PathBuf, path: PathKey, text: String, version: u32, hash: String) -> Self {
        let info = pre_process_file(&text);
        Self {
            file_name,
            path,
            text,
            version,
            hash,
            imported_files: info.imported_files,
            referenced_files: info.referenced_files,
            type_reference_directives: info.type_reference_directives,
        }
    }

    /// Module names in source order, duplicates removed.
    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::with_capacity(self.imported_files.len());
        for reference in &self.imported_files {
            if !names.contains(&reference.file_name) {
                names.push(reference.file_name.clone());
            }
        }
        names
    }

    pub fn type_reference_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for reference in &self.type_reference_directives {
            if !names.contains(&reference.file_name) {
                names.push(reference.file_name.clone());
            }
        }
        names
    }

    pub fn is_declaration_file(&self) -> bool {
        self.path.as_str().ends_with(".d.ts")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Token<'a> {
    Identifier(&'a str),
    /// String literal contents and the offset of the first content byte.
    String(&'a str, usize),
    Punctuation(u8),
    /// A `///` comment line seen before any code.
    TripleSlash(&'a str, usize),
}

struct Scanner<'a> {
    text: &'a str,
    pos: usize,
    seen_code: bool,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            seen_code: false,
        }
    }

    fn bytes(&self) -> &'a [u8] {
        self.text.as_bytes()
    }

    fn peek(&mut self) -> Option<Token<'a>> {
        let (pos, seen_code) = (self.pos, self.seen_code);
        let token = self.next_token();
        self.pos = pos;
        self.seen_code = seen_code;
        token
    }

    fn next_token(&mut self) -> Option<Token<'a>> {
        let bytes = self.bytes();
        loop {
            while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.pos >= bytes.len() {
                return None;
            }
            let rest = &bytes[self.pos..];
            if rest.starts_with(b"//") {
                let start = self.pos;
                let end = self.text[start..]
                    .find('\n')
                    .map_or(bytes.len(), |offset| start + offset);
                self.pos = end;
                if rest.starts_with(b"///") && !self.seen_code {
                    return Some(Token::TripleSlash(&self.text[start..end], start));
                }
                continue;
            }
            if rest.starts_with(b"/*") {
                self.pos = self.text[self.pos + 2..]
                    .find("*/")
                    .map_or(bytes.len(), |offset| self.pos + 2 + offset + 2);
                continue;
            }
            break;
        }

        self.seen_code = true;
        let start = self.pos;
        let c = bytes[start];
        match c {
            b'\'' | b'"' | b'`' => {
                let content_start = start + 1;
                let mut end = content_start;
                while end < bytes.len() && bytes[end] != c {
                    if bytes[end] == b'\\' {
                        end += 1;
                    } else if bytes[end] == b'\n' && c != b'`' {
                        break;
                    }
                    end += 1;
                }
                let end = end.min(bytes.len());
                self.pos = (end + 1).min(bytes.len());
                let content = &self.text[content_start..end];
                if c == b'`' && content.contains("${") {
                    return Some(Token::Punctuation(c));
                }
                Some(Token::String(content, content_start))
            }
            c if is_identifier_start(c) => {
                let mut end = start + 1;
                while end < bytes.len() && is_identifier_part(bytes[end]) {
                    end += 1;
                }
                self.pos = end;
                Some(Token::Identifier(&self.text[start..end]))
            }
            c if c.is_ascii_digit() => {
                let mut end = start + 1;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'.' || bytes[end] == b'_') {
                    end += 1;
                }
                self.pos = end;
                Some(Token::Punctuation(b'0'))
            }
            c => {
                self.pos += 1;
                Some(Token::Punctuation(c))
            }
        }
    }
}

fn is_identifier_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'$' || c >= 0x80
}

fn is_identifier_part(c: u8) -> bool {
    is_identifier_start(c) || c.is_ascii_digit()
}

/// Collect the references a file makes without parsing it.
pub fn pre_process_file(text: &str) -> PreProcessedFileInfo {
    let mut info = PreProcessedFileInfo::default();
    let mut scanner = Scanner::new(text);
    let mut previous_was_dot = false;

    while let Some(token) = scanner.next_token() {
        match token {
            Token::TripleSlash(line, pos) => {
                process_triple_slash_directive(line, pos, &mut info);
            }
            Token::Identifier("import") if !previous_was_dot => {
                process_import(&mut scanner, &mut info);
            }
            Token::Identifier("export") if !previous_was_dot => {
                process_export(&mut scanner, &mut info);
            }
            Token::Identifier("require") if !previous_was_dot => {
                process_require_call(&mut scanner, &mut info);
            }
            _ => {}
        }
        previous_was_dot = token == Token::Punctuation(b'.');
    }
    info
}

fn push_import(info: &mut PreProcessedFileInfo, name: &str, pos: usize) {
    info.imported_files.push(FileReference {
        file_name: name.to_string(),
        pos,
        end: pos + name.len(),
    });
}

fn process_import(scanner: &mut Scanner<'_>, info: &mut PreProcessedFileInfo) {
    match scanner.peek() {
        // import("x")
        Some(Token::Punctuation(b'(')) => {
            scanner.next_token();
            if let Some(Token::String(name, pos)) = scanner.next_token() {
                push_import(info, name, pos);
            }
        }
        // import "x"
        Some(Token::String(name, pos)) => {
            scanner.next_token();
            push_import(info, name, pos);
        }
        // import.meta
        Some(Token::Punctuation(b'.')) => {}
        Some(_) => scan_to_module_specifier(scanner, info),
        None => {}
    }
}

fn process_export(scanner: &mut Scanner<'_>, info: &mut PreProcessedFileInfo) {
    if scanner.peek() == Some(Token::Identifier("type")) {
        scanner.next_token();
    }
    match scanner.peek() {
        Some(Token::Punctuation(b'*' | b'{')) => scan_to_module_specifier(scanner, info),
        Some(Token::Identifier("import")) => {
            scanner.next_token();
            scan_to_module_specifier(scanner, info);
        }
        _ => {}
    }
}

fn process_require_call(scanner: &mut Scanner<'_>, info: &mut PreProcessedFileInfo) {
    if scanner.peek() != Some(Token::Punctuation(b'(')) {
        return;
    }
    scanner.next_token();
    if let Some(Token::String(name, pos)) = scanner.peek() {
        scanner.next_token();
        if scanner.peek() == Some(Token::Punctuation(b')')) {
            push_import(info, name, pos);
        }
    }
}

/// Skip an import or export clause up to `from "x"` or `require("x")`.
fn scan_to_module_specifier(scanner: &mut Scanner<'_>, info: &mut PreProcessedFileInfo) {
    let mut brace_depth = 0usize;
    while let Some(token) = scanner.peek() {
        match token {
            Token::Punctuation(b'{') => brace_depth += 1,
            Token::Punctuation(b'}') => brace_depth = brace_depth.saturating_sub(1),
            Token::Punctuation(b';') | Token::String(..) if brace_depth == 0 => return,
            Token::Identifier("from") if brace_depth == 0 => {
                scanner.next_token();
                if let Some(Token::String(name, pos)) = scanner.peek() {
                    scanner.next_token();
                    push_import(info, name, pos);
                }
                return;
            }
            Token::Identifier("require") if brace_depth == 0 => {
                scanner.next_token();
                process_require_call(scanner, info);
                return;
            }
            // A new statement started without a module specifier.
            Token::Identifier("import" | "export") if brace_depth == 0 => return,
            _ => {}
        }
        scanner.next_token();
    }
}

fn process_triple_slash_directive(line: &str, pos: usize, info: &mut PreProcessedFileInfo) {
    let body = line.trim_start_matches('/').trim_start();
    if !body.starts_with("<reference") {
        return;
    }
    let offset = line.len() - line.trim_start_matches('/').trim_start().len();
    if let Some((value, at)) = directive_attribute(body, "path") {
        info.referenced_files.push(FileReference {
            file_name: value.to_string(),
            pos: pos + offset + at,
            end: pos + offset + at + value.len(),
        });
    } else if let Some((value, at)) = directive_attribute(body, "types") {
        info.type_reference_directives.push(FileReference {
            file_name: value.to_string(),
            pos: pos + offset + at,
            end: pos + offset + at + value.len(),
        });
    }
}

/// Value of `name="..."` (or single quoted) and its offset in `body`.
fn directive_attribute<'a>(body: &'a str, name: &str) -> Option<(&'a str, usize)> {
    let mut search = 0;
    while let Some(found) = body[search..].find(name) {
        let at = search + found;
        search = at + name.len();
        let preceded_by_space = body[..at].ends_with(char::is_whitespace);
        let rest = body[search..].trim_start();
        let Some(rest) = rest.strip_prefix('=') else {
            continue;
        };
        if !preceded_by_space {
            continue;
        }
        let rest = rest.trim_start();
        let quote = rest.chars().next()?;
        if quote != '"' && quote != '\'' {
            return None;
        }
        let value_start = body.len() - rest.len() + 1;
        let value_end = body[value_start..].find(quote)? + value_start;
        return Some((&body[value_start..value_end], value_start));
    }
    None
}
