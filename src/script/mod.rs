//! Script execution: sandboxed Rhai interpreters for pre-request and
//! post-response scripts, with assertions, console capture and variable
//! tracking.

mod console;
mod error;
mod executor;
mod expect;
mod result;
mod sandbox;
mod utils;
mod value;
mod views;

pub use console::format_console_args;
pub use error::ScriptError;
pub use executor::{ScriptExecutor, DEFAULT_SCRIPT_TIMEOUT};
pub use expect::{Expectation, MatchResult, MatcherFailure};
pub use result::{AssertionResult, ConsoleEntry, ConsoleLevel, ScriptResult};
pub use value::ScriptValue;
pub use views::{RequestView, ResponseView, ViewError};
