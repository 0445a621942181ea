use crate::exec::ExecutionResult;

use super::{EvalDetails, EvalResult, Evaluate};

/// Passes when the actual exit code equals the expected one.
#[derive(Debug, Clone)]
pub struct ExitCode {
    expected: i32,
}

impl ExitCode {
    pub fn new(expected: i32) -> Self {
        Self { expected }
    }
}

impl Evaluate for ExitCode {
    fn verify(&self, result: &mut ExecutionResult) -> EvalResult {
        let actual = result.exit_code;
        if actual == self.expected {
            EvalResult {
                passed: true,
                details: EvalDetails::Code(actual),
            }
        } else {
            EvalResult {
                passed: false,
                details: EvalDetails::CodeMismatch {
                    expected: self.expected,
                    actual,
                },
            }
        }
    }
}
