use std::sync::atomic::{AtomicBool, Ordering};

use rhai::{Dynamic, Engine, Token};

use super::{
    result::{ConsoleEntry, ConsoleLevel, Recorder},
    value::ScriptValue,
};

/// `console` object bound into a sandbox; entries land in the call's recorder.
#[derive(Debug, Clone)]
pub(crate) struct Console {
    entries: Recorder<ConsoleEntry>,
}

impl Console {
    pub(crate) fn new(entries: Recorder<ConsoleEntry>) -> Self {
        Self { entries }
    }

    fn record(&self, level: ConsoleLevel, args: &[Dynamic]) -> Dynamic {
        let values: Vec<ScriptValue> = args.iter().map(ScriptValue::from_dynamic).collect();
        let message = format_console_args(&values);
        if level == ConsoleLevel::Debug {
            // `debug` is a keyword function: the engine passes the returned
            // text to the on_debug hook, which records it.
            return message.into();
        }
        self.push(level, message);
        Dynamic::UNIT
    }

    fn push(&self, level: ConsoleLevel, message: String) {
        tracing::trace!(level = level.as_str(), %message, "script console");
        self.entries.push(ConsoleEntry { level, message });
    }
}

/// Joins arguments with a space; containers render as `{ k: v }` / `[ a, b ]`.
pub fn format_console_args(args: &[ScriptValue]) -> String {
    args.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn register_console(engine: &mut Engine, console: &Console) {
    engine.register_type_with_name::<Console>("Console");
    for (name, level) in [
        ("log", ConsoleLevel::Log),
        ("info", ConsoleLevel::Info),
        ("warn", ConsoleLevel::Warn),
        ("error", ConsoleLevel::Error),
        ("debug", ConsoleLevel::Debug),
    ] {
        register_level(engine, name, level);
    }

    allow_debug_method(engine);

    let printer = console.clone();
    engine.on_print(move |text| printer.push(ConsoleLevel::Log, text.to_string()));
    let debugger = console.clone();
    engine.on_debug(move |text, _source, _pos| {
        debugger.push(ConsoleLevel::Debug, text.to_string())
    });
}

/// `debug` is reserved in Rhai; after a `.` it is lexed as a plain method name
/// so `console.debug(..)` parses. Calls still go through the `debug` hook.
#[allow(deprecated)]
fn allow_debug_method(engine: &mut Engine) {
    let after_period = AtomicBool::new(false);
    engine.on_parse_token(move |token, _pos, _state| {
        let follows_period = after_period.swap(token == Token::Period, Ordering::Relaxed);
        match token {
            Token::Reserved(word) if follows_period && word.as_str() == "debug" => {
                Token::Identifier(word)
            }
            other => other,
        }
    });
}

// Rhai has no variadic natives, so each arity is registered separately.
fn register_level(engine: &mut Engine, name: &str, level: ConsoleLevel) {
    engine
        .register_fn(name, move |c: &mut Console| c.record(level, &[]))
        .register_fn(name, move |c: &mut Console, a: Dynamic| c.record(level, &[a]))
        .register_fn(name, move |c: &mut Console, a: Dynamic, b: Dynamic| {
            c.record(level, &[a, b])
        })
        .register_fn(
            name,
            move |c: &mut Console, a: Dynamic, b: Dynamic, d: Dynamic| c.record(level, &[a, b, d]),
        )
        .register_fn(
            name,
            move |c: &mut Console, a: Dynamic, b: Dynamic, d: Dynamic, e: Dynamic| {
                c.record(level, &[a, b, d, e])
            },
        )
        .register_fn(
            name,
            move |c: &mut Console, a: Dynamic, b: Dynamic, d: Dynamic, e: Dynamic, f: Dynamic| {
                c.record(level, &[a, b, d, e, f])
            },
        )
        .register_fn(
            name,
            move |c: &mut Console,
                  a: Dynamic,
                  b: Dynamic,
                  d: Dynamic,
                  e: Dynamic,
                  f: Dynamic,
                  g: Dynamic| { c.record(level, &[a, b, d, e, f, g]) },
        );
}
