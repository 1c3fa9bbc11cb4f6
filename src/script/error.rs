use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use rhai::{EvalAltResult, ParseError, Position};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::expect::MatcherFailure;

/// Why a script invocation did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScriptError {
    #[error("SyntaxError: {message}{}", location(.line, .column))]
    #[serde(rename = "SyntaxError")]
    Syntax {
        message: String,
        line: Option<usize>,
        column: Option<usize>,
    },
    #[error("ExecutionError: {message}{}", location(.line, .column))]
    #[serde(rename = "ExecutionError")]
    Execution {
        message: String,
        line: Option<usize>,
        column: Option<usize>,
    },
    #[error("TimeoutError: script exceeded {budget_ms} ms")]
    #[serde(rename = "TimeoutError")]
    Timeout { budget_ms: u64 },
    #[error("InternalError: {message}")]
    #[serde(rename = "InternalError")]
    Internal { message: String },
}

impl ScriptError {
    pub fn timeout(budget: Duration) -> Self {
        ScriptError::Timeout {
            budget_ms: budget.as_millis() as u64,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ScriptError::Internal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ScriptError::Syntax { .. } => "SyntaxError",
            ScriptError::Execution { .. } => "ExecutionError",
            ScriptError::Timeout { .. } => "TimeoutError",
            ScriptError::Internal { .. } => "InternalError",
        }
    }

    pub fn line(&self) -> Option<usize> {
        match self {
            ScriptError::Syntax { line, .. } | ScriptError::Execution { line, .. } => *line,
            _ => None,
        }
    }

    pub fn column(&self) -> Option<usize> {
        match self {
            ScriptError::Syntax { column, .. } | ScriptError::Execution { column, .. } => *column,
            _ => None,
        }
    }
}

fn location(line: &Option<usize>, column: &Option<usize>) -> String {
    match (line, column) {
        (Some(line), Some(column)) => format!(" (line {line}, column {column})"),
        (Some(line), None) => format!(" (line {line})"),
        _ => String::new(),
    }
}

static POSITION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\(line (\d+), position (\d+)\)").expect("valid regex"));

pub(crate) fn from_parse_error(err: &ParseError) -> ScriptError {
    let (line, column) = split_position(err.position());
    ScriptError::Syntax {
        message: err.err_type().to_string(),
        line,
        column,
    }
}

/// Classifies a failed run. `interrupted` is true when the executor raised the
/// interrupt flag before the engine stopped.
pub(crate) fn from_eval_error(
    err: &EvalAltResult,
    interrupted: bool,
    budget: Duration,
) -> ScriptError {
    if interrupted && is_termination(err) {
        return ScriptError::timeout(budget);
    }

    let root = root_cause(err);
    let (mut line, mut column) = split_position(root.position());
    if line.is_none() {
        (line, column) = split_position(err.position());
    }
    let raw = error_message(err);
    if line.is_none() {
        if let Some(caps) = POSITION_PATTERN.captures(&err.to_string()) {
            line = caps.get(1).and_then(|m| m.as_str().parse().ok());
            column = caps.get(2).and_then(|m| m.as_str().parse().ok());
        }
    }

    ScriptError::Execution {
        message: raw,
        line,
        column,
    }
}

fn split_position(position: Position) -> (Option<usize>, Option<usize>) {
    if position.is_none() {
        (None, None)
    } else {
        (position.line(), position.position())
    }
}

/// Innermost error, looking through function-call wrappers.
pub(crate) fn root_cause(err: &EvalAltResult) -> &EvalAltResult {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => root_cause(inner),
        EvalAltResult::ErrorInModule(_, inner, _) => root_cause(inner),
        other => other,
    }
}

pub(crate) fn is_termination(err: &EvalAltResult) -> bool {
    matches!(root_cause(err), EvalAltResult::ErrorTerminated(..))
}

pub(crate) fn matcher_failure(err: &EvalAltResult) -> Option<MatcherFailure> {
    match root_cause(err) {
        EvalAltResult::ErrorRuntime(value, _) => value.clone().try_cast::<MatcherFailure>(),
        _ => None,
    }
}

/// Human-readable message without the trailing position marker.
pub(crate) fn error_message(err: &EvalAltResult) -> String {
    if let Some(failure) = matcher_failure(err) {
        return failure.message;
    }
    let root = root_cause(err);
    let text = match root {
        EvalAltResult::ErrorRuntime(value, _) if value.is_string() => value.to_string(),
        EvalAltResult::ErrorRuntime(value, _) => format!("Uncaught {value}"),
        other => other.to_string(),
    };
    POSITION_PATTERN.replace_all(&text, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhai::Engine;

    #[test]
    fn parse_errors_carry_position() {
        let engine = Engine::new();
        let err = engine.compile("let x = ;").unwrap_err();
        let classified = from_parse_error(&err);
        assert_eq!(classified.kind(), "SyntaxError");
        assert_eq!(classified.line(), Some(1));
        assert!(classified.column().is_some());
    }

    #[test]
    fn thrown_strings_become_execution_errors() {
        let engine = Engine::new();
        let err = engine.run("let a = 1;\nthrow \"boom\";").unwrap_err();
        let classified = from_eval_error(&err, false, Duration::from_millis(10));
        match classified {
            ScriptError::Execution { message, line, .. } => {
                assert_eq!(message, "boom");
                assert_eq!(line, Some(2));
            }
            other => panic!("unexpected classification {other:?}"),
        }
    }

    #[test]
    fn termination_without_interrupt_is_not_a_timeout() {
        let mut engine = Engine::new();
        engine.on_progress(|_| Some(rhai::Dynamic::UNIT));
        let err = engine.run("let x = 1;").unwrap_err();
        assert!(is_termination(&err));
        assert_eq!(
            from_eval_error(&err, true, Duration::from_millis(100)),
            ScriptError::Timeout { budget_ms: 100 }
        );
        assert_eq!(
            from_eval_error(&err, false, Duration::from_millis(100)).kind(),
            "ExecutionError"
        );
    }

    #[test]
    fn display_includes_location() {
        let err = ScriptError::Execution {
            message: "boom".into(),
            line: Some(3),
            column: Some(7),
        };
        assert_eq!(err.to_string(), "ExecutionError: boom (line 3, column 7)");
        assert_eq!(
            ScriptError::timeout(Duration::from_millis(250)).to_string(),
            "TimeoutError: script exceeded 250 ms"
        );
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(ScriptError::timeout(Duration::from_millis(5))).unwrap();
        assert_eq!(json, serde_json::json!({"type": "TimeoutError", "budget_ms": 5}));
    }
}
