//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! on the production sources of the gateway crates:
//! - No sleep() calls outside reconnect backoff
//! - No blocking I/O inside async functions
//!
//! The helpers here locate the production sources and answer simple
//! line-level questions about them (is this line test code, which function
//! encloses it). They are heuristics over source text, not a Rust parser.

use std::fs;
use std::path::{Path, PathBuf};

/// Source directories scanned by every check, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["gateway/core/src", "gateway/daemon/src"];

/// Workspace root, two levels above this package
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// One production source file, read into lines
pub struct SourceFile {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// File content
    pub content: String,
}

impl SourceFile {
    /// Lines of the file
    #[must_use]
    pub fn lines(&self) -> Vec<&str> {
        self.content.lines().collect()
    }
}

/// Every `.rs` file under [`PRODUCTION_DIRS`]
#[must_use]
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            if let Ok(content) = fs::read_to_string(entry.path()) {
                files.push(SourceFile {
                    path: entry
                        .path()
                        .strip_prefix(&root)
                        .unwrap_or(entry.path())
                        .to_path_buf(),
                    content,
                });
            }
        }
    }

    files
}

/// Code part of a line, with any trailing `//` comment removed
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Whether the line sits in test code
///
/// Test modules are kept at the end of each file, so everything after a
/// `#[cfg(test)]` attribute counts as test code.
#[must_use]
pub fn is_test_code(lines: &[&str], current_idx: usize) -> bool {
    lines[..current_idx]
        .iter()
        .any(|line| line.trim().starts_with("#[cfg(test)]"))
}

/// Whether a line opens a function, with or without visibility
fn is_fn_signature(line: &str) -> bool {
    let mut code = code_part(line).trim_start();
    if let Some(rest) = code.strip_prefix("pub") {
        // `pub`, `pub(crate)`, `pub(super)`
        code = rest.trim_start_matches(|c: char| c != ' ').trim_start();
    }
    code.starts_with("fn ") || code.starts_with("async fn ")
}

/// Signature line of the function enclosing `current_idx`, if any
#[must_use]
pub fn enclosing_fn<'a>(lines: &[&'a str], current_idx: usize) -> Option<&'a str> {
    lines[..current_idx]
        .iter()
        .rev()
        .copied()
        .find(|line| is_fn_signature(line))
}

/// Whether the enclosing function is `async`
#[must_use]
pub fn is_in_async_fn(lines: &[&str], current_idx: usize) -> bool {
    enclosing_fn(lines, current_idx).is_some_and(|sig| sig.contains("async fn "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enclosing_fn_detection() {
        let code = vec![
            "pub(crate) async fn fetch(&self) {",
            "    let x = 1;",
            "}",
            "pub fn load() {",
            "    let y = 2;",
            "}",
        ];
        assert!(is_in_async_fn(&code, 1));
        assert!(!is_in_async_fn(&code, 4));
        assert_eq!(enclosing_fn(&code, 4), Some("pub fn load() {"));
    }

    #[test]
    fn test_test_code_detection() {
        let code = vec!["fn a() {}", "#[cfg(test)]", "mod tests {", "    fn b() {}", "}"];
        assert!(!is_test_code(&code, 0));
        assert!(is_test_code(&code, 3));
    }

    #[test]
    fn test_sources_are_found() {
        let files = production_sources();
        assert!(files
            .iter()
            .any(|f| f.path.ends_with("gateway/core/src/lib.rs")));
        assert!(files
            .iter()
            .any(|f| f.path.ends_with("gateway/daemon/src/main.rs")));
    }
}
