//! Result classifier (C2).
//!
//! Parses a worker's free-form textual output into a structured
//! [`Outcome`] the state machine can act on. Pure and deterministic: the
//! same input string always yields the same outcome (P5), in this process
//! or any other.

use serde::{Deserialize, Serialize};

/// The structured outcome of classifying a worker's result text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Approved,
    Rejected { feedback: String },
    Passed,
    Failed { reason: String },
    Neutral,
}

/// Classify `result` per §4.2: scans lines in order, case-insensitively.
/// APPROVED/REJECTED only match when they start the trimmed line; PASSED/
/// FAILED match anywhere in the line. The first line with any match wins.
pub fn classify(result: &str) -> Outcome {
    for line in result.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let upper = trimmed.to_ascii_uppercase();

        if upper.starts_with("APPROVED") {
            return Outcome::Approved;
        }
        if upper.starts_with("REJECTED") {
            return Outcome::Rejected {
                feedback: after_colon(trimmed),
            };
        }
        if upper.contains("PASSED") {
            return Outcome::Passed;
        }
        if upper.contains("FAILED") {
            return Outcome::Failed {
                reason: after_colon(trimmed),
            };
        }
    }
    Outcome::Neutral
}

/// Extract and trim the text after the first colon on a line, or an empty
/// string if there is no colon.
fn after_colon(line: &str) -> String {
    match line.split_once(':') {
        Some((_, rest)) => rest.trim().to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approved_token() {
        assert_eq!(classify("APPROVED: looks good"), Outcome::Approved);
        assert_eq!(classify("approved"), Outcome::Approved);
    }

    #[test]
    fn rejected_with_feedback() {
        assert_eq!(
            classify("REJECTED: missing examples"),
            Outcome::Rejected {
                feedback: "missing examples".to_string()
            }
        );
    }

    #[test]
    fn rejected_without_colon_has_empty_feedback() {
        assert_eq!(
            classify("REJECTED"),
            Outcome::Rejected {
                feedback: String::new()
            }
        );
    }

    #[test]
    fn passed_token() {
        assert_eq!(classify("PASSED"), Outcome::Passed);
        assert_eq!(classify("All tests PASSED without issue"), Outcome::Passed);
    }

    #[test]
    fn failed_with_reason() {
        assert_eq!(
            classify("FAILED: build error"),
            Outcome::Failed {
                reason: "build error".to_string()
            }
        );
    }

    #[test]
    fn neutral_when_no_token_present() {
        assert_eq!(classify("here is the draft document"), Outcome::Neutral);
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(classify("rejected: needs work"), Outcome::Rejected {
            feedback: "needs work".to_string(),
        });
        assert_eq!(classify("Failed: timeout"), Outcome::Failed {
            reason: "timeout".to_string(),
        });
    }

    #[test]
    fn first_matching_line_wins() {
        let text = "some preamble\nAPPROVED: first\nREJECTED: second";
        assert_eq!(classify(text), Outcome::Approved);
    }

    #[test]
    fn matching_is_anchored_at_line_start_after_trim() {
        // "approved" appears mid-sentence, not at line start: no match.
        assert_eq!(classify("the plan was approved yesterday"), Outcome::Neutral);
        // Leading whitespace before the token is trimmed before matching.
        assert_eq!(classify("   APPROVED: ok"), Outcome::Approved);
    }

    #[test]
    fn classifier_is_pure_and_deterministic() {
        let input = "REJECTED: needs more tests";
        let a = classify(input);
        let b = classify(input);
        assert_eq!(a, b);
    }
}
