//! Cheap log checks run before any network call
//!
//! The hint check runs on every notification from the migration program, so it
//! works on the borrowed log lines and never allocates.

/// True if any log line contains any non-empty hint
#[inline]
pub fn contains_hint<S: AsRef<str>>(logs: &[String], hints: &[S]) -> bool {
    hints.iter().any(|hint| {
        let hint = hint.as_ref();
        !hint.is_empty() && logs.iter().any(|line| line.contains(hint))
    })
}

/// True if some log line contains the exact instruction marker
#[inline]
pub fn contains_marker(logs: &[String], marker: &str) -> bool {
    !marker.is_empty() && logs.iter().any(|line| line.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logs(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    const HINTS: [&str; 3] = ["Migrate", "migrate", "Instruction: Migrate"];

    #[test]
    fn test_hint_matches_any_line() {
        let l = logs(&[
            "Program 39azUYFWPz3VHgKCf3VChUwbpURdCHRxjWVowf5jUJjg invoke [1]",
            "Program log: Instruction: MigrateDammV2",
        ]);
        assert!(contains_hint(&l, &HINTS));
    }

    #[test]
    fn test_hint_rejects_unrelated_logs() {
        let l = logs(&["Program log: Instruction: Swap", "Program log: Instruction: Buy"]);
        assert!(!contains_hint(&l, &HINTS));
        assert!(!contains_hint(&l, &[""]));
    }

    #[test]
    fn test_hint_without_marker() {
        // "migrate" shows up in a CPI log, but the exact instruction line does not
        let l = logs(&["Program log: pool will migrate later"]);
        assert!(contains_hint(&l, &HINTS));
        assert!(!contains_marker(&l, "Program log: Instruction: Migrate"));
    }

    #[test]
    fn test_marker() {
        let l = logs(&["Program log: Instruction: Migrate"]);
        assert!(contains_marker(&l, "Program log: Instruction: Migrate"));
        assert!(!contains_marker(&l, ""));
        assert!(!contains_marker(&[], "Program log: Instruction: Migrate"));
    }
}
