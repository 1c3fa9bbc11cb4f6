//! `expect(value)` matchers and the `test(name, fn)` registrar.
//!
//! Matchers are plain functions returning `Result<(), MatcherFailure>`. Only the
//! script bindings at the bottom of this file turn a failure into a script
//! throw, which `test` then catches and records.

use regex::Regex;
use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, NativeCallContext, Position};

use super::{
    error::{error_message, is_termination, matcher_failure},
    result::{AssertionResult, Recorder},
    value::ScriptValue,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatcherFailure {
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

pub type MatchResult = Result<(), MatcherFailure>;

#[derive(Debug, Clone, PartialEq)]
pub struct Expectation {
    actual: ScriptValue,
    negated: bool,
}

impl Expectation {
    pub fn new(actual: impl Into<ScriptValue>) -> Self {
        Self {
            actual: actual.into(),
            negated: false,
        }
    }

    /// Inverted copy of this expectation.
    pub fn not(&self) -> Self {
        Self {
            actual: self.actual.clone(),
            negated: !self.negated,
        }
    }

    pub fn actual(&self) -> &ScriptValue {
        &self.actual
    }

    pub fn to_be(&self, expected: &ScriptValue) -> MatchResult {
        self.check(self.actual == *expected, "be", Some(expected.describe()))
    }

    pub fn to_equal(&self, expected: &ScriptValue) -> MatchResult {
        self.check(self.actual == *expected, "equal", Some(expected.describe()))
    }

    pub fn to_be_truthy(&self) -> MatchResult {
        self.check(self.actual.is_truthy(), "be truthy", None)
    }

    pub fn to_be_falsy(&self) -> MatchResult {
        self.check(!self.actual.is_truthy(), "be falsy", None)
    }

    pub fn to_contain(&self, item: &ScriptValue) -> MatchResult {
        let found = match (&self.actual, item) {
            (ScriptValue::String(haystack), ScriptValue::String(needle)) => {
                haystack.contains(needle.as_str())
            }
            (ScriptValue::String(haystack), other) => haystack.contains(&other.to_string()),
            (ScriptValue::List(items), needle) => items.contains(needle),
            (actual, _) => {
                return Err(self.type_failure(format!(
                    "Expected {} to be a string for toContain, got {}",
                    actual.describe(),
                    actual.type_name()
                )))
            }
        };
        self.check(found, "contain", Some(item.describe()))
    }

    pub fn to_have_property(&self, name: &str) -> MatchResult {
        let ScriptValue::Map(entries) = &self.actual else {
            return Err(self.type_failure(format!(
                "Expected {} to be a map for toHaveProperty, got {}",
                self.actual.describe(),
                self.actual.type_name()
            )));
        };
        self.check(
            entries.contains_key(name),
            "have property",
            Some(format!("{name:?}")),
        )
    }

    pub fn to_be_greater_than(&self, bound: &ScriptValue) -> MatchResult {
        self.compare(bound, "be greater than", |a, b| a > b)
    }

    pub fn to_be_less_than(&self, bound: &ScriptValue) -> MatchResult {
        self.compare(bound, "be less than", |a, b| a < b)
    }

    pub fn to_be_greater_than_or_equal(&self, bound: &ScriptValue) -> MatchResult {
        self.compare(bound, "be greater than or equal to", |a, b| a >= b)
    }

    pub fn to_be_less_than_or_equal(&self, bound: &ScriptValue) -> MatchResult {
        self.compare(bound, "be less than or equal to", |a, b| a <= b)
    }

    pub fn to_match(&self, pattern: &str) -> MatchResult {
        let regex = Regex::new(pattern).map_err(|err| {
            self.type_failure(format!("Invalid pattern /{pattern}/: {err}"))
        })?;
        let text = match &self.actual {
            ScriptValue::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.check(regex.is_match(&text), "match", Some(format!("/{pattern}/")))
    }

    pub fn to_be_null(&self) -> MatchResult {
        self.check(self.actual.is_absent(), "be null", None)
    }

    pub fn to_be_undefined(&self) -> MatchResult {
        self.check(self.actual.is_absent(), "be undefined", None)
    }

    pub fn to_be_defined(&self) -> MatchResult {
        self.check(!self.actual.is_absent(), "be defined", None)
    }

    pub fn to_have_length(&self, expected: &ScriptValue) -> MatchResult {
        let Some(length) = self.actual.len() else {
            return Err(self.type_failure(format!(
                "Expected {} to have a length, got {}",
                self.actual.describe(),
                self.actual.type_name()
            )));
        };
        let Some(wanted) = expected.to_number() else {
            return Err(self.type_failure(format!(
                "toHaveLength expects a number, got {}",
                expected.describe()
            )));
        };
        self.check(
            length as f64 == wanted,
            "have length",
            Some(expected.describe()),
        )
    }

    fn compare(
        &self,
        bound: &ScriptValue,
        verb: &str,
        cmp: impl Fn(f64, f64) -> bool,
    ) -> MatchResult {
        let (Some(actual), Some(limit)) = (self.actual.to_number(), bound.to_number()) else {
            return Err(self.type_failure(format!(
                "Expected {} and {} to be numbers",
                self.actual.describe(),
                bound.describe()
            )));
        };
        self.check(cmp(actual, limit), verb, Some(bound.describe()))
    }

    fn check(&self, pass: bool, verb: &str, expected: Option<String>) -> MatchResult {
        if pass != self.negated {
            return Ok(());
        }
        let polarity = if self.negated { "not to" } else { "to" };
        let actual = self.actual.describe();
        let message = match &expected {
            Some(expected) => format!("Expected {actual} {polarity} {verb} {expected}"),
            None => format!("Expected {actual} {polarity} {verb}"),
        };
        Err(MatcherFailure {
            message,
            expected,
            actual: Some(actual),
        })
    }

    fn type_failure(&self, message: String) -> MatcherFailure {
        MatcherFailure {
            message,
            expected: None,
            actual: Some(self.actual.describe()),
        }
    }
}

fn throw(result: MatchResult) -> Result<(), Box<EvalAltResult>> {
    result.map_err(|failure| {
        Box::new(EvalAltResult::ErrorRuntime(
            Dynamic::from(failure),
            Position::NONE,
        ))
    })
}

fn arg(value: &Dynamic) -> ScriptValue {
    ScriptValue::from_dynamic(value)
}

/// Registers `expect` and the matcher methods.
pub(crate) fn register_expect(engine: &mut Engine) {
    engine
        .register_type_with_name::<Expectation>("Expectation")
        .register_type_with_name::<MatcherFailure>("MatcherFailure")
        .register_fn("expect", |value: Dynamic| Expectation::new(arg(&value)))
        .register_fn("expect", || Expectation::new(ScriptValue::Null))
        .register_get("not", |e: &mut Expectation| e.not())
        .register_get("message", |f: &mut MatcherFailure| f.message.clone())
        .register_fn("to_string", |f: &mut MatcherFailure| f.message.clone())
        .register_fn("toBe", |e: &mut Expectation, v: Dynamic| throw(e.to_be(&arg(&v))))
        .register_fn("toEqual", |e: &mut Expectation, v: Dynamic| {
            throw(e.to_equal(&arg(&v)))
        })
        .register_fn("toBeTruthy", |e: &mut Expectation| throw(e.to_be_truthy()))
        .register_fn("toBeFalsy", |e: &mut Expectation| throw(e.to_be_falsy()))
        .register_fn("toContain", |e: &mut Expectation, v: Dynamic| {
            throw(e.to_contain(&arg(&v)))
        })
        .register_fn("toHaveProperty", |e: &mut Expectation, name: &str| {
            throw(e.to_have_property(name))
        })
        .register_fn("toBeGreaterThan", |e: &mut Expectation, v: Dynamic| {
            throw(e.to_be_greater_than(&arg(&v)))
        })
        .register_fn("toBeLessThan", |e: &mut Expectation, v: Dynamic| {
            throw(e.to_be_less_than(&arg(&v)))
        })
        .register_fn("toBeGreaterThanOrEqual", |e: &mut Expectation, v: Dynamic| {
            throw(e.to_be_greater_than_or_equal(&arg(&v)))
        })
        .register_fn("toBeLessThanOrEqual", |e: &mut Expectation, v: Dynamic| {
            throw(e.to_be_less_than_or_equal(&arg(&v)))
        })
        .register_fn("toMatch", |e: &mut Expectation, pattern: &str| {
            throw(e.to_match(pattern))
        })
        .register_fn("toBeNull", |e: &mut Expectation| throw(e.to_be_null()))
        .register_fn("toBeUndefined", |e: &mut Expectation| throw(e.to_be_undefined()))
        .register_fn("toBeDefined", |e: &mut Expectation| throw(e.to_be_defined()))
        .register_fn("toHaveLength", |e: &mut Expectation, v: Dynamic| {
            throw(e.to_have_length(&arg(&v)))
        });
}

/// Registers `test(name, fn)`, appending one record per call to `records`.
pub(crate) fn register_test(engine: &mut Engine, records: Recorder<AssertionResult>) {
    engine.register_fn(
        "test",
        move |ctx: NativeCallContext,
              name: &str,
              body: FnPtr|
              -> Result<(), Box<EvalAltResult>> {
            let record = match body.call_within_context::<Dynamic>(&ctx, ()) {
                Ok(_) => AssertionResult::passed(name),
                Err(err) if is_termination(&err) => return Err(err),
                Err(err) => {
                    let mut record = AssertionResult::failed(name, error_message(&err));
                    if let Some(failure) = matcher_failure(&err) {
                        record.expected = failure.expected;
                        record.actual = failure.actual;
                    }
                    record
                }
            };
            tracing::debug!(test = %record.name, passed = record.passed, "assertion recorded");
            records.push(record);
            Ok(())
        },
    );
}
