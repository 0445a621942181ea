use crate::exec::ExecutionResult;

use super::{EvalDetails, EvalResult, Evaluate};

/// Passes when the whole captured stdout equals the expected string.
/// With `trim` set, trailing whitespace is stripped first.
#[derive(Debug, Clone)]
pub struct MatchOutput {
    expected: String,
    trim: bool,
}

impl MatchOutput {
    pub fn new(expected: impl Into<String>, trim: bool) -> Self {
        Self {
            expected: expected.into(),
            trim,
        }
    }
}

impl Evaluate for MatchOutput {
    fn verify(&self, result: &mut ExecutionResult) -> EvalResult {
        let mut actual = result.stdout.read_all();
        if self.trim {
            actual.truncate(actual.trim_end_matches([' ', '\t', '\r', '\n']).len());
        }

        if actual == self.expected {
            EvalResult {
                passed: true,
                details: EvalDetails::Text(actual),
            }
        } else {
            EvalResult {
                passed: false,
                details: EvalDetails::TextMismatch {
                    expected: self.expected.clone(),
                    actual,
                },
            }
        }
    }
}
