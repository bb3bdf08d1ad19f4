//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles:
//! - No blocking waits inside the async streaming core
//! - No panicking shortcuts (`unwrap`, `expect`) in production code
//! - No blocking file or network I/O inside `async fn` bodies
//!
//! These tests are designed to catch violations early in the development cycle.

use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["conductor/core/src", "conductor/daemon/src"];

/// One offending line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the line
    pub path: PathBuf,
    /// 1-based line number
    pub line_number: usize,
    /// What was found
    pub pattern: &'static str,
    /// The trimmed line
    pub line: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line_number,
            self.pattern,
            self.line
        )
    }
}

/// Workspace root (two levels above this package)
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// Every `.rs` file under the production directories
#[must_use]
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();
    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files
}

/// Lines of a source file that belong to production code
///
/// Everything from the first `#[cfg(test)]` on is test code. Line comments are
/// stripped.
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|(idx, line)| (idx + 1, line.split("//").next().unwrap_or(line)))
        .collect()
}

/// Scan production files for any of `patterns`
#[must_use]
pub fn find_violations(patterns: &[&'static str]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for path in production_files() {
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        for (line_number, code) in production_lines(&content) {
            for pattern in patterns {
                if code.contains(pattern) {
                    violations.push(Violation {
                        path: path.clone(),
                        line_number,
                        pattern,
                        line: code.trim().to_string(),
                    });
                }
            }
        }
    }
    violations
}

/// Like [`find_violations`], limited to lines inside an `async fn`
///
/// A line belongs to the nearest `fn` declared above it. Blocking I/O in
/// plain functions (startup, config loading) is allowed.
#[must_use]
pub fn find_violations_in_async_fns(patterns: &[&'static str]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for path in production_files() {
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        for (line_number, code) in async_fn_lines(&content) {
            for pattern in patterns {
                if code.contains(pattern) {
                    violations.push(Violation {
                        path: path.clone(),
                        line_number,
                        pattern,
                        line: code.trim().to_string(),
                    });
                }
            }
        }
    }
    violations
}

/// Production lines whose enclosing function is `async`
#[must_use]
pub fn async_fn_lines(content: &str) -> Vec<(usize, &str)> {
    let mut in_async = false;
    production_lines(content)
        .into_iter()
        .filter(|(_, code)| {
            if is_fn_declaration(code) {
                in_async = code.contains("async fn ");
            }
            in_async
        })
        .collect()
}

fn is_fn_declaration(code: &str) -> bool {
    let trimmed = code.trim_start();
    trimmed.starts_with("fn ") || trimmed.contains(" fn ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let source = "fn a() {}\nlet x = y; // .unwrap()\n#[cfg(test)]\nmod tests { x.unwrap() }\n";
        let lines = production_lines(source);
        assert_eq!(lines.len(), 2);
        assert!(!lines[1].1.contains("unwrap"));
    }

    #[test]
    fn test_async_fn_lines_skip_plain_functions() {
        let source = "fn load() {\n    std::fs::read(p);\n}\npub async fn save() {\n    std::fs::write(p, b);\n}\n";
        let lines = async_fn_lines(source);
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().any(|(n, code)| *n == 5 && code.contains("std::fs::write")));
        assert!(!lines.iter().any(|(_, code)| code.contains("std::fs::read(")));
    }

    #[test]
    fn test_production_files_found() {
        assert!(production_files()
            .iter()
            .any(|p| p.ends_with("streaming/session.rs")));
    }
}
