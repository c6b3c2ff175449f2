//! Path normalization and canonical path keys.
//!
//! Every cache and watch map in this crate is keyed by [`PathKey`]. Keys are
//! produced by exactly one place, [`Canonicalizer::to_path`], so listing caches
//! and invalidation events can never disagree about case folding or separators.

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Extensions the watch core treats as TypeScript inputs, in probe order.
pub const SUPPORTED_TS_EXTENSIONS: &[&str] = &[".ts", ".tsx", ".d.ts"];
/// Extensions added when `allowJs` is set, in probe order.
pub const SUPPORTED_JS_EXTENSIONS: &[&str] = &[".js", ".jsx"];

/// A normalized, absolute, `/`-separated and (on case-insensitive hosts)
/// lower-cased path.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathKey(String);

impl PathKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parent key, or `None` for a root.
    pub fn parent(&self) -> Option<PathKey> {
        let idx = self.0.rfind('/')?;
        if idx + 1 == self.0.len() {
            // A root such as "/" or "c:/".
            return None;
        }
        let root_len = root_length(&self.0);
        if idx < root_len {
            return Some(PathKey(self.0[..root_len].to_string()));
        }
        Some(PathKey(self.0[..idx].to_string()))
    }

    /// Last path component; empty for roots.
    pub fn file_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Append an already-canonical component.
    pub fn join(&self, name: &str) -> PathKey {
        if self.0.ends_with('/') {
            PathKey(format!("{}{}", self.0, name))
        } else {
            PathKey(format!("{}/{}", self.0, name))
        }
    }

    /// `self` followed by each ancestor up to and including the root.
    pub fn ancestors(&self) -> impl Iterator<Item = PathKey> {
        let mut next = Some(self.clone());
        std::iter::from_fn(move || {
            let current = next.take()?;
            next = current.parent();
            Some(current)
        })
    }

    /// True when `self` is `dir` or lies below it.
    pub fn is_in_directory(&self, dir: &PathKey) -> bool {
        if self.0 == dir.0 {
            return true;
        }
        if !self.0.starts_with(&dir.0) {
            return false;
        }
        dir.0.ends_with('/') || self.0.as_bytes().get(dir.0.len()) == Some(&b'/')
    }

    /// Number of components below the root.
    pub fn depth(&self) -> usize {
        self.0[root_length(&self.0)..]
            .split('/')
            .filter(|part| !part.is_empty())
            .count()
    }

    pub fn contains_node_modules(&self) -> bool {
        self.0.split('/').any(|part| part == "node_modules")
    }

    pub fn is_node_modules_directory(&self) -> bool {
        self.file_name() == "node_modules"
    }
}

impl fmt::Debug for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn root_length(path: &str) -> usize {
    let bytes = path.as_bytes();
    if bytes.first() == Some(&b'/') {
        return 1;
    }
    // Drive roots: "c:/"
    if bytes.len() >= 3 && bytes[1] == b':' && bytes[2] == b'/' {
        return 3;
    }
    0
}

/// Converts file names into [`PathKey`]s for one host.
#[derive(Clone, Debug)]
pub struct Canonicalizer {
    case_sensitive: bool,
    current_directory: PathBuf,
}

impl Canonicalizer {
    pub fn new(current_directory: impl Into<PathBuf>, case_sensitive: bool) -> Self {
        Self {
            case_sensitive,
            current_directory: normalize_path(&current_directory.into()),
        }
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn current_directory(&self) -> &Path {
        &self.current_directory
    }

    /// Canonical form of a single name (file or directory component).
    pub fn canonical_file_name(&self, name: &str) -> String {
        if self.case_sensitive {
            name.to_string()
        } else {
            name.to_lowercase()
        }
    }

    pub fn to_path(&self, file_name: &Path) -> PathKey {
        let absolute = self.absolute(file_name);
        PathKey(self.canonical_file_name(&to_slash_string(&absolute)))
    }

    /// Normalized absolute form of `file_name`, preserving case.
    pub fn absolute(&self, file_name: &Path) -> PathBuf {
        get_normalized_absolute_path(file_name, &self.current_directory)
    }
}

/// Lexically normalize `path`: drop `.` components and fold `..` into the
/// preceding component.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub fn get_normalized_absolute_path(path: &Path, current_directory: &Path) -> PathBuf {
    if path.is_absolute() || path.has_root() {
        normalize_path(path)
    } else {
        normalize_path(&current_directory.join(path))
    }
}

pub fn to_slash_string(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    if text.len() > 1 && text.ends_with('/') && root_length(&text) != text.len() {
        text.trim_end_matches('/').to_string()
    } else {
        text
    }
}

pub fn has_extension(file_name: &str, extensions: &[&str]) -> bool {
    extensions.iter().any(|ext| file_name.ends_with(ext))
}

/// Extensions considered source inputs for the given `allowJs` setting.
pub fn supported_extensions(allow_js: bool) -> Vec<&'static str> {
    let mut extensions = SUPPORTED_TS_EXTENSIONS.to_vec();
    if allow_js {
        extensions.extend_from_slice(SUPPORTED_JS_EXTENSIONS);
    }
    extensions
}

pub fn is_supported_source_file_name(file_name: &str, allow_js: bool) -> bool {
    has_extension(file_name, SUPPORTED_TS_EXTENSIONS)
        || (allow_js && has_extension(file_name, SUPPORTED_JS_EXTENSIONS))
}

/// Directories too close to the root to be worth watching recursively
/// (`/`, `/home`, `/users/name` style prefixes are rejected).
pub fn can_watch_directory(dir: &PathKey) -> bool {
    let depth = dir.depth();
    if depth == 0 {
        return false;
    }
    let first = dir.as_str()[root_length(dir.as_str())..]
        .split('/')
        .next()
        .unwrap_or_default();
    if matches!(first, "home" | "users" | "Users") {
        return depth > 2;
    }
    true
}
