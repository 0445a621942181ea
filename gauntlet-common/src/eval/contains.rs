use crate::exec::ExecutionResult;

use super::{EvalDetails, EvalResult, Evaluate};

/// Passes when the captured stdout contains the expected substring.
/// The details carry the full captured output regardless of outcome.
#[derive(Debug, Clone)]
pub struct Contains {
    expected: String,
}

impl Contains {
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
        }
    }
}

impl Evaluate for Contains {
    fn verify(&self, result: &mut ExecutionResult) -> EvalResult {
        let actual = result.stdout.read_all();
        EvalResult {
            passed: actual.contains(&self.expected),
            details: EvalDetails::Text(actual),
        }
    }
}
