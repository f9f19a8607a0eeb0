//! Verification outcome types

use serde::{Deserialize, Serialize};

/// What part of the table a check looked at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aspect {
    Rows,
    Columns,
    Cells,
    Content,
    Replay,
}

/// One comparison between expectation and observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    /// Zero-based step, `None` for whole-batch checks
    pub step: Option<usize>,
    /// Operation name, or `batch`
    pub op: String,
    pub aspect: Aspect,
    pub expected: String,
    pub observed: String,
    pub pass: bool,
}

impl Check {
    /// Human-readable diagnostic
    #[must_use]
    pub fn message(&self) -> String {
        match self.step {
            Some(step) => format!(
                "operation #{} ({}): expected {}, observed {}",
                step + 1,
                self.op,
                self.expected,
                self.observed
            ),
            None => format!("{}: expected {}, observed {}", self.op, self.expected, self.observed),
        }
    }
}

/// Verdict for an applied batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub pass: bool,
    pub expected: String,
    pub observed: String,
    /// First failing check, formatted for the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mismatch: Option<String>,
    pub checks: Vec<Check>,
}

impl VerificationResult {
    pub(crate) fn from_checks(checks: Vec<Check>) -> Self {
        match checks.iter().find(|c| !c.pass) {
            Some(failed) => Self {
                pass: false,
                expected: failed.expected.clone(),
                observed: failed.observed.clone(),
                mismatch: Some(failed.message()),
                checks,
            },
            None => Self {
                pass: true,
                expected: summarize(checks.iter().map(|c| c.expected.as_str())),
                observed: summarize(checks.iter().map(|c| c.observed.as_str())),
                mismatch: None,
                checks,
            },
        }
    }

    /// Failing checks only
    pub fn failures(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| !c.pass)
    }
}

fn summarize<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts.collect::<Vec<_>>().join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(pass: bool) -> Check {
        Check {
            step: Some(0),
            op: "delete_row".to_string(),
            aspect: Aspect::Rows,
            expected: "1 row removed".to_string(),
            observed: if pass { "1" } else { "0" }.to_string(),
            pass,
        }
    }

    #[test]
    fn first_failure_becomes_mismatch() {
        let result = VerificationResult::from_checks(vec![check(true), check(false)]);
        assert!(!result.pass);
        assert_eq!(
            result.mismatch.as_deref(),
            Some("operation #1 (delete_row): expected 1 row removed, observed 0")
        );
        assert_eq!(result.failures().count(), 1);
    }

    #[test]
    fn passing_result_summarizes() {
        let result = VerificationResult::from_checks(vec![check(true)]);
        assert!(result.pass);
        assert_eq!(result.expected, "1 row removed");
        assert!(result.mismatch.is_none());
    }
}
