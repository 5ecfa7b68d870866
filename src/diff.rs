//! Unified diff rendering for applied changes

use serde::{Deserialize, Serialize};
use similar::TextDiff;
use std::path::PathBuf;

/// Lines of unchanged context around each hunk
const CONTEXT_RADIUS: usize = 3;

/// Diff of one modified file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: PathBuf,
    pub diff: String,
}

impl FileDiff {
    /// Added and removed line counts
    pub fn stats(&self) -> (usize, usize) {
        self.diff
            .lines()
            .filter(|l| !l.starts_with("+++") && !l.starts_with("---"))
            .fold((0, 0), |(adds, removes), line| {
                if line.starts_with('+') {
                    (adds + 1, removes)
                } else if line.starts_with('-') {
                    (adds, removes + 1)
                } else {
                    (adds, removes)
                }
            })
    }
}

/// Unified diff between two versions of `path`, with `a/` and `b/` headers
pub fn unified_diff(path: &str, original: &str, modified: &str) -> String {
    if original == modified {
        return String::new();
    }

    TextDiff::from_lines(original, modified)
        .unified_diff()
        .context_radius(CONTEXT_RADIUS)
        .header(&format!("a/{}", path), &format!("b/{}", path))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_diff() {
        let original = "line1\nold_text\nline3\n";
        let modified = "line1\nnew_text\nline3\n";
        let diff = unified_diff("index.html", original, modified);

        assert!(diff.starts_with("--- a/index.html\n+++ b/index.html\n"));
        assert!(diff.contains("-old_text"));
        assert!(diff.contains("+new_text"));
        assert!(diff.contains(" line1"));
    }

    #[test]
    fn test_no_changes() {
        assert!(unified_diff("a.txt", "same\n", "same\n").is_empty());
    }

    #[test]
    fn test_context_is_bounded() {
        let original: String = (1..=20).map(|i| format!("line{}\n", i)).collect();
        let modified = original.replace("line10\n", "changed\n");
        let diff = unified_diff("f.txt", &original, &modified);

        assert!(diff.contains(" line7\n"));
        assert!(!diff.contains(" line6\n"));
        assert!(diff.contains(" line13\n"));
        assert!(!diff.contains(" line14\n"));

        let file = FileDiff {
            path: PathBuf::from("f.txt"),
            diff,
        };
        assert_eq!(file.stats(), (1, 1));
    }
}
