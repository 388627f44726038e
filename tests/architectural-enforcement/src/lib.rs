//! Architectural Enforcement
//!
//! Source scans backing the integration tests in `tests/`:
//!
//! - the engine core never sleeps and never reads the wall clock; time only
//!   moves through the frame tick
//! - no blocking file I/O inside async functions
//! - no console printing or panicking shortcuts in library code
//!
//! Each scan walks a crate's `src/` tree and reports `path:line - code`
//! entries for lines outside `#[cfg(test)]` modules.

use std::fs;
use std::path::{Path, PathBuf};

/// Workspace root, resolved from this crate's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Source directory of a workspace crate, e.g. `marionette/core`
#[must_use]
pub fn crate_src(relative: &str) -> PathBuf {
    workspace_root().join(relative).join("src")
}

/// One line of production code, with the context a rule needs
#[derive(Debug)]
pub struct SourceLine<'a> {
    /// File the line belongs to
    pub path: &'a Path,
    /// 1-based line number
    pub number: usize,
    /// The line with any trailing `//` comment removed
    pub code: &'a str,
    /// The full line, trimmed
    pub text: &'a str,
    /// Whether the closest enclosing `fn` is `async`
    pub in_async_fn: bool,
}

impl SourceLine<'_> {
    /// `path:line - code` for failure reports
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{}:{} - {}", self.path.display(), self.number, self.text)
    }
}

/// Every `.rs` file under `dir`, sorted
#[must_use]
pub fn rust_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(walkdir::DirEntry::into_path)
        .collect();
    files.sort();
    files
}

fn strip_comment(line: &str) -> &str {
    let trimmed = line.trim_start();
    if trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*') {
        return "";
    }
    line.split("//").next().unwrap_or(line)
}

/// Run `rule` over every production line under `dir`, collecting violations
///
/// Scanning of a file stops at its first `#[cfg(test)]` attribute; unit test
/// modules sit at the bottom of each file in this workspace.
pub fn scan<F>(dir: &Path, mut rule: F) -> Vec<String>
where
    F: FnMut(&SourceLine<'_>) -> bool,
{
    let mut violations = Vec::new();
    for path in rust_files(dir) {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };

        let mut in_async_fn = false;
        for (idx, line) in content.lines().enumerate() {
            let text = line.trim();
            if text.starts_with("#[cfg(test)]") {
                break;
            }
            let code = strip_comment(line);
            if code.contains("fn ") {
                in_async_fn = code.contains("async fn ");
            }

            let source_line = SourceLine {
                path: &path,
                number: idx + 1,
                code,
                text,
                in_async_fn,
            };
            if rule(&source_line) {
                violations.push(source_line.describe());
            }
        }
    }
    violations
}

/// Panic with a readable report when `violations` is not empty
pub fn assert_clean(title: &str, hint: &str, violations: &[String]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n{title}\n");
    for violation in violations {
        eprintln!("  - {violation}");
    }
    eprintln!("\n{hint}");
    panic!("{} violation(s): {title}", violations.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_root_contains_core() {
        assert!(crate_src("marionette/core").join("lib.rs").exists());
    }

    #[test]
    fn test_scan_stops_at_test_module() {
        let dir = std::env::temp_dir().join(format!("arch-scan-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("sample.rs"),
            "fn a() { forbidden(); } // forbidden\n\
             // forbidden in a comment\n\
             async fn b() {\n    forbidden();\n}\n\
             #[cfg(test)]\nmod tests { fn c() { forbidden(); } }\n",
        )
        .unwrap();

        let mut async_hits = 0;
        let found = scan(&dir, |line| {
            let hit = line.code.contains("forbidden(");
            if hit && line.in_async_fn {
                async_hits += 1;
            }
            hit
        });
        fs::remove_dir_all(&dir).unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(async_hits, 1);
        assert!(found[0].ends_with(":1 - fn a() { forbidden(); } // forbidden"));
    }
}
