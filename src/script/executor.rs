use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tokio::{runtime::Handle, sync::oneshot};

use crate::{
    env::{EnvMap, GlobalStore, MutationTracker},
    http::HttpSender,
};

use super::{
    error::ScriptError,
    result::{Recorder, ScriptResult},
    sandbox::{Bindings, Sandbox},
    views::{RequestView, ResponseView},
};

pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long an interrupted worker gets to unwind before its output is collected.
const INTERRUPT_GRACE: Duration = Duration::from_millis(250);

/// Runs pre-request and post-response scripts, one fresh sandbox per call.
#[derive(Clone)]
pub struct ScriptExecutor {
    timeout: Duration,
    globals: GlobalStore,
    sender: Option<Arc<dyn HttpSender>>,
}

impl fmt::Debug for ScriptExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptExecutor")
            .field("timeout", &self.timeout)
            .field("globals", &self.globals)
            .field("sender", &self.sender.is_some())
            .finish()
    }
}

impl ScriptExecutor {
    pub fn new(globals: GlobalStore) -> Self {
        Self {
            timeout: DEFAULT_SCRIPT_TIMEOUT,
            globals,
            sender: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Transport used by the scripts' `sendRequest`.
    pub fn with_sender(mut self, sender: Arc<dyn HttpSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn globals(&self) -> &GlobalStore {
        &self.globals
    }

    pub async fn execute_pre_request(
        &self,
        script: &str,
        request: &RequestView,
        env: &EnvMap,
    ) -> ScriptResult {
        self.execute("pre-request", script, request, None, env)
            .await
    }

    pub async fn execute_post_response(
        &self,
        script: &str,
        request: &RequestView,
        response: &ResponseView,
        env: &EnvMap,
    ) -> ScriptResult {
        self.execute("post-response", script, request, Some(response), env)
            .await
    }

    async fn execute(
        &self,
        phase: &'static str,
        script: &str,
        request: &RequestView,
        response: Option<&ResponseView>,
        env: &EnvMap,
    ) -> ScriptResult {
        if script.trim().is_empty() {
            return ScriptResult::empty();
        }

        let started = Instant::now();
        let budget = self.timeout;
        let bindings = Bindings {
            request: request.clone(),
            response: response.cloned(),
            env: Arc::new(MutationTracker::from_map(env.clone())),
            globals: Arc::new(MutationTracker::from_map(self.globals.snapshot())),
            console: Recorder::default(),
            assertions: Recorder::default(),
            sender: self.sender.clone(),
            runtime: Handle::try_current().ok(),
        };
        let interrupt = Arc::new(AtomicBool::new(false));

        let (tx, mut rx) = oneshot::channel();
        let worker_bindings = bindings.clone();
        let worker_flag = Arc::clone(&interrupt);
        let source = script.to_string();
        tokio::task::spawn_blocking(move || {
            let outcome = Sandbox::new(worker_bindings, worker_flag, budget).run(&source);
            let _ = tx.send(outcome);
        });

        let outcome = tokio::select! {
            received = &mut rx => received.unwrap_or_else(|_| {
                Err(ScriptError::internal("script worker stopped without a result"))
            }),
            _ = tokio::time::sleep(budget) => {
                interrupt.store(true, Ordering::SeqCst);
                tracing::warn!(phase, budget_ms = budget.as_millis() as u64, "script timed out; interrupting");
                if tokio::time::timeout(INTERRUPT_GRACE, rx).await.is_err() {
                    tracing::warn!(phase, "script worker did not stop within grace period");
                }
                Err(ScriptError::timeout(budget))
            }
        };

        let global_changes = bindings.globals.changes();
        self.globals.apply(&global_changes);

        if let Err(err) = &outcome {
            tracing::debug!(phase, error = %err, "script failed");
        }

        ScriptResult {
            success: outcome.is_ok(),
            duration: started.elapsed(),
            error: outcome.err(),
            console_output: bindings.console.snapshot(),
            assertions: bindings.assertions.snapshot(),
            env_changes: bindings.env.changes(),
            global_changes,
            request_modified: request.is_modified(),
        }
    }
}
