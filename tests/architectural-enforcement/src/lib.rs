//! Architectural Enforcement
//!
//! Source scanners backing the integration tests in `tests/`:
//! - No sleep() calls in production code
//! - No blocking I/O inside async functions
//!
//! Scanning is line-based. Comments are stripped, and code after a
//! `#[cfg(test)]` attribute is treated as test code.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["bridge/core/src", "bridge/daemon/src"];

/// A forbidden construct found in a source file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// File containing the violation
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// The workspace root (two levels above this crate)
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// All `.rs` files under a directory
#[must_use]
pub fn rust_sources(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// The code part of a line, without a trailing `//` comment
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Whether the line at `idx` is test code
///
/// True after a `#[cfg(test)]` attribute, or inside a function annotated with
/// `#[test]` / `#[tokio::test]`.
#[must_use]
pub fn is_test_code(lines: &[&str], idx: usize) -> bool {
    if lines[..=idx].iter().any(|l| l.trim().starts_with("#[cfg(test)]")) {
        return true;
    }

    for line in lines[..idx].iter().rev() {
        let line = line.trim();
        if line.starts_with("#[test]") || line.starts_with("#[tokio::test") {
            return true;
        }
        if line.contains("fn ") || line.starts_with("mod ") || line.starts_with("impl ") {
            return false;
        }
    }
    false
}

/// Whether the line at `idx` sits inside an `async fn`
///
/// Looks at the nearest preceding function signature.
#[must_use]
pub fn is_in_async_function(lines: &[&str], idx: usize) -> bool {
    lines[..=idx]
        .iter()
        .rev()
        .map(|l| code_part(l))
        .find(|l| l.contains("fn "))
        .is_some_and(|l| l.contains("async fn ") || l.contains("async move"))
}

/// Scan every production file with `check`, collecting violations
pub fn scan_production(
    mut check: impl FnMut(&Path, &[&str], usize) -> bool,
) -> Vec<Violation> {
    let root = workspace_root();
    let mut violations = Vec::new();

    for dir in PRODUCTION_DIRS {
        for path in rust_sources(&root.join(dir)) {
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            let lines: Vec<&str> = content.lines().collect();
            for idx in 0..lines.len() {
                if check(&path, &lines, idx) {
                    violations.push(Violation {
                        path: path.clone(),
                        line: idx + 1,
                        text: lines[idx].trim().to_string(),
                    });
                }
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_part_strips_comments() {
        assert_eq!(code_part("let x = 1; // sleep(1)"), "let x = 1; ");
        assert_eq!(code_part("// only a comment"), "");
    }

    #[test]
    fn test_test_code_detection() {
        let lines = vec![
            "fn production() {",
            "    work();",
            "}",
            "#[cfg(test)]",
            "mod tests {",
            "    fn helper() { wait(); }",
            "}",
        ];
        assert!(!is_test_code(&lines, 1));
        assert!(is_test_code(&lines, 5));

        let annotated = vec!["#[tokio::test]", "async fn test_it() {", "    pause();", "}"];
        assert!(is_test_code(&annotated, 2));
    }

    #[test]
    fn test_async_function_detection() {
        let lines = vec![
            "fn load() {",
            "    std::fs::read_to_string(p);",
            "}",
            "async fn run() {",
            "    std::fs::read_to_string(p);",
            "}",
        ];
        assert!(!is_in_async_function(&lines, 1));
        assert!(is_in_async_function(&lines, 4));
    }

    #[test]
    fn test_production_dirs_exist() {
        let root = workspace_root();
        for dir in PRODUCTION_DIRS {
            assert!(root.join(dir).is_dir(), "missing {dir}");
            assert!(!rust_sources(&root.join(dir)).is_empty());
        }
    }
}
