use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, NativeCallContext, Scope};
use tokio::runtime::Handle;

use crate::{
    env::{build_variable_map, expand_placeholders, MutationTracker},
    http::{HttpRequest, HttpResponse, HttpSender},
};

use super::{
    console::{register_console, Console},
    error::{self, ScriptError},
    expect::{register_expect, register_test},
    result::{AssertionResult, ConsoleEntry, Recorder},
    utils::register_utils,
    value::ScriptValue,
    views::{register_views, RequestView, ResponseView},
};

/// Everything a single script invocation may touch.
#[derive(Clone)]
pub(crate) struct Bindings {
    pub request: RequestView,
    pub response: Option<ResponseView>,
    pub env: Arc<MutationTracker>,
    pub globals: Arc<MutationTracker>,
    pub console: Recorder<ConsoleEntry>,
    pub assertions: Recorder<AssertionResult>,
    pub sender: Option<Arc<dyn HttpSender>>,
    pub runtime: Option<Handle>,
}

/// `env` / `globals` objects in scripts.
#[derive(Clone)]
struct Variables {
    tracker: Arc<MutationTracker>,
}

impl Variables {
    fn get(&self, name: &str) -> Dynamic {
        self.tracker
            .get(name)
            .map(Dynamic::from)
            .unwrap_or(Dynamic::UNIT)
    }

    fn set(&self, name: &str, value: &Dynamic) {
        self.tracker
            .set(name, ScriptValue::from_dynamic(value).to_env_string());
    }
}

// Native calls run outside the progress hook, so data growth is capped instead.
const MAX_STRING_SIZE: usize = 16 * 1024 * 1024;
const MAX_ARRAY_SIZE: usize = 1_000_000;
const MAX_MAP_SIZE: usize = 1_000_000;

/// One interpreter, built for exactly one script run and dropped afterwards.
pub(crate) struct Sandbox {
    engine: Engine,
    scope: Scope<'static>,
    interrupt: Arc<AtomicBool>,
    budget: Duration,
}

impl Sandbox {
    pub(crate) fn new(bindings: Bindings, interrupt: Arc<AtomicBool>, budget: Duration) -> Self {
        let mut engine = Engine::new();
        engine.disable_symbol("eval");
        engine
            .set_max_string_size(MAX_STRING_SIZE)
            .set_max_array_size(MAX_ARRAY_SIZE)
            .set_max_map_size(MAX_MAP_SIZE);

        let flag = Arc::clone(&interrupt);
        engine.on_progress(move |_| {
            if flag.load(Ordering::Relaxed) {
                Some(Dynamic::UNIT)
            } else {
                None
            }
        });

        let console = Console::new(bindings.console.clone());
        register_console(&mut engine, &console);
        register_views(&mut engine);
        register_expect(&mut engine);
        register_test(&mut engine, bindings.assertions.clone());
        register_utils(&mut engine);
        register_variables(&mut engine);
        register_send_request(&mut engine, &bindings);

        let mut scope = Scope::new();
        scope.push("request", bindings.request);
        if let Some(response) = bindings.response {
            scope.push("response", response);
        }
        scope.push("env", Variables { tracker: bindings.env });
        scope.push(
            "globals",
            Variables {
                tracker: bindings.globals,
            },
        );
        scope.push("console", console);

        Self {
            engine,
            scope,
            interrupt,
            budget,
        }
    }

    pub(crate) fn run(self, script: &str) -> Result<(), ScriptError> {
        let Sandbox {
            engine,
            mut scope,
            interrupt,
            budget,
        } = self;
        let ast = engine
            .compile_with_scope(&scope, script)
            .map_err(|err| error::from_parse_error(&err))?;
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|err| error::from_eval_error(&err, interrupt.load(Ordering::SeqCst), budget))
    }
}

fn register_variables(engine: &mut Engine) {
    engine
        .register_type_with_name::<Variables>("Variables")
        .register_fn("get", |v: &mut Variables, name: &str| v.get(name))
        .register_fn("set", |v: &mut Variables, name: &str, value: Dynamic| {
            v.set(name, &value)
        })
        .register_fn("unset", |v: &mut Variables, name: &str| v.tracker.unset(name))
        .register_fn("has", |v: &mut Variables, name: &str| v.tracker.has(name));
}

fn register_send_request(engine: &mut Engine, bindings: &Bindings) {
    let sender = bindings.sender.clone();
    let runtime = bindings.runtime.clone();
    let env = Arc::clone(&bindings.env);
    let globals = Arc::clone(&bindings.globals);

    engine.register_fn(
        "sendRequest",
        move |ctx: NativeCallContext,
              target: Dynamic,
              callback: FnPtr|
              -> Result<(), Box<EvalAltResult>> {
            let vars = build_variable_map(&globals.snapshot(), &env.snapshot());
            let outcome = build_request(&ScriptValue::from_dynamic(&target), &vars)
                .and_then(|request| dispatch(sender.as_deref(), runtime.as_ref(), &request));
            let args = match outcome {
                Ok(response) => (Dynamic::UNIT, Dynamic::from(ResponseView::new(&response))),
                Err(message) => {
                    tracing::debug!(%message, "sendRequest failed");
                    (Dynamic::from(message), Dynamic::UNIT)
                }
            };
            let _: Dynamic = callback.call_within_context(&ctx, args)?;
            Ok(())
        },
    );
}

/// Accepts a bare URL or `#{url, method, headers, body}`.
fn build_request(
    target: &ScriptValue,
    vars: &crate::env::EnvMap,
) -> Result<HttpRequest, String> {
    let mut request = match target {
        ScriptValue::String(url) => HttpRequest::new("GET", url.as_str()),
        ScriptValue::Map(fields) => {
            let url = fields
                .get("url")
                .and_then(ScriptValue::as_str)
                .ok_or_else(|| "sendRequest requires a url".to_string())?;
            let method = fields
                .get("method")
                .and_then(ScriptValue::as_str)
                .unwrap_or("GET")
                .to_ascii_uppercase();
            let mut request = HttpRequest::new(method, url);
            if let Some(ScriptValue::Map(headers)) =
                fields.get("headers").or_else(|| fields.get("header"))
            {
                for (name, value) in headers {
                    request = request.with_header(name.as_str(), value.to_env_string());
                }
            }
            match fields.get("body") {
                None | Some(ScriptValue::Null) => {}
                Some(body) => request = request.with_body(body.to_env_string()),
            }
            request
        }
        other => {
            return Err(format!(
                "sendRequest expects a url or a request map, got {}",
                other.type_name()
            ))
        }
    };

    request.url = expand_placeholders(&request.url, vars);
    for header in &mut request.headers {
        header.value = expand_placeholders(&header.value, vars);
    }
    Ok(request)
}

fn dispatch(
    sender: Option<&dyn HttpSender>,
    runtime: Option<&Handle>,
    request: &HttpRequest,
) -> Result<HttpResponse, String> {
    let (Some(sender), Some(runtime)) = (sender, runtime) else {
        return Err("sendRequest is not available in this run".to_string());
    };
    runtime
        .block_on(sender.send(request))
        .map_err(|err| err.to_string())
}
