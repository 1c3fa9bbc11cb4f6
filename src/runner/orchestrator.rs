use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use thiserror::Error;

use crate::{
    env::{
        build_variable_map, expand_placeholders, replay_changes, EnvChange, EnvMap, Environment,
        GlobalStore,
    },
    http::{HttpRequest, HttpSender, TransportError},
    script::{RequestView, ResponseView, ScriptExecutor, ScriptResult},
};

use super::{
    collection::{Collection, RequestItem},
    config::{ConfigError, RunConfig},
    session::{
        RequestError, RequestInfo, RequestResult, RequestStatus, RunSession, ScriptPhase,
        SessionError,
    },
};

/// Cooperative cancellation, checked between requests.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid run configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("folder not found in collection: {0}")]
    FolderNotFound(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Progress callbacks for a run; all methods default to no-ops.
pub trait RunObserver: Send + Sync {
    fn run_started(&self, _session: &RunSession) {}
    fn request_started(&self, _index: usize, _total: usize, _request: &RequestItem) {}
    fn request_finished(&self, _result: &RequestResult) {}
}

struct SilentObserver;

impl RunObserver for SilentObserver {}

/// Drives collection runs: one request at a time, scripts around each send.
pub struct Runner {
    sender: Arc<dyn HttpSender>,
    globals: GlobalStore,
    cancel: CancelHandle,
    observer: Arc<dyn RunObserver>,
}

impl Runner {
    pub fn new(sender: Arc<dyn HttpSender>) -> Self {
        Self {
            sender,
            globals: GlobalStore::new(),
            cancel: CancelHandle::new(),
            observer: Arc::new(SilentObserver),
        }
    }

    pub fn with_globals(mut self, globals: GlobalStore) -> Self {
        self.globals = globals;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn globals(&self) -> &GlobalStore {
        &self.globals
    }

    /// Runs the whole collection, or the folder at `folder_path`.
    pub async fn run(
        &self,
        collection: &Collection,
        folder_path: Option<&str>,
        environment: Option<&Environment>,
        config: RunConfig,
    ) -> Result<RunSession, RunError> {
        config.validate()?;
        let requests = match folder_path {
            Some(path) => collection
                .folder(path)
                .ok_or_else(|| RunError::FolderNotFound(path.to_string()))?
                .flatten(),
            None => collection.flatten(),
        };

        let executor = ScriptExecutor::new(self.globals.clone())
            .with_timeout(config.script_timeout)
            .with_sender(Arc::clone(&self.sender));
        let mut session = RunSession::new(
            collection.name.as_str(),
            folder_path.map(str::to_string),
            environment,
            config.clone(),
        );
        session.start(requests.len())?;
        self.observer.run_started(&session);
        tracing::info!(
            session = session.id(),
            requests = requests.len(),
            stop_on_failure = config.stop_on_failure,
            "run started"
        );

        for (index, item) in requests.iter().enumerate() {
            if self.cancel.is_canceled() {
                tracing::info!(session = session.id(), index, "run canceled");
                session.cancel()?;
                skip_remaining(&mut session, &requests[index..], index);
                break;
            }

            self.observer.request_started(index, requests.len(), item);
            let result = self
                .execute_request(&executor, &config, session.session_env(), index, item)
                .await;
            let (pre_changes, post_changes) = env_changes(&result);
            let failed = result.is_failure();
            self.observer.request_finished(&result);
            tracing::info!(
                index,
                request = %result.request_info.name,
                status = result.status.as_str(),
                duration_ms = result.duration_ms,
                "request finished"
            );
            session.apply_env_changes(&pre_changes);
            session.add_result(result);
            session.apply_env_changes(&post_changes);

            if config.stop_on_failure && failed {
                tracing::info!(session = session.id(), index, "stopping after failure");
                session.stop()?;
                skip_remaining(&mut session, &requests[index + 1..], index + 1);
                break;
            }
            if config.delay_ms > 0 && index + 1 < requests.len() {
                tokio::time::sleep(config.delay()).await;
            }
        }

        if !session.is_terminal() {
            session.complete()?;
        }
        tracing::info!(session = session.id(), status = %session.status(), "run finished");
        Ok(session)
    }

    async fn execute_request(
        &self,
        executor: &ScriptExecutor,
        config: &RunConfig,
        session_env: &EnvMap,
        index: usize,
        item: &RequestItem,
    ) -> RequestResult {
        let started = Instant::now();
        let mut result = RequestResult::pending(index, RequestInfo::from(item));
        result.mark_running();

        let mut outgoing = item.to_http_request();
        // Env as the post-response script and placeholders will see it.
        let mut env = session_env.clone();

        if let Some(script) = non_empty(item.pre_request_script.as_deref()) {
            let view = RequestView::mutable(&outgoing);
            let pre = executor.execute_pre_request(script, &view, &env).await;
            replay_changes(&pre.env_changes, &mut env);
            view.apply_to(&mut outgoing);
            let error = pre.error.clone();
            result.set_pre_script_result(pre);
            if let Some(error) = error {
                tracing::warn!(request = %item.name, %error, "pre-request script failed");
                result.mark_error(RequestError::Script {
                    phase: ScriptPhase::PreRequest,
                    error,
                });
                result.set_duration(started.elapsed());
                return result;
            }
        }

        let vars = build_variable_map(&self.globals.snapshot(), &env);
        resolve_placeholders(&mut outgoing, &vars);
        result.request_info.url = outgoing.url.clone();

        let sent = match tokio::time::timeout(config.request_timeout, self.sender.send(&outgoing))
            .await
        {
            Ok(sent) => sent,
            Err(_) => Err(TransportError::Timeout {
                timeout_ms: config.request_timeout.as_millis() as u64,
            }),
        };

        match sent {
            Err(err) => {
                tracing::warn!(request = %item.name, error = %err, "request failed");
                result.mark_error(RequestError::Transport(err));
            }
            Ok(response) => {
                result.mark_passed();
                if let Some(script) = non_empty(item.post_response_script.as_deref()) {
                    let request_view = RequestView::read_only(&outgoing);
                    let response_view = ResponseView::new(&response);
                    let post = executor
                        .execute_post_response(script, &request_view, &response_view, &env)
                        .await;
                    if let Some(error) = post.error.clone() {
                        tracing::warn!(request = %item.name, %error, "post-response script failed");
                        result.mark_error(RequestError::Script {
                            phase: ScriptPhase::PostResponse,
                            error,
                        });
                    }
                    result.set_post_script_result(post);
                }
                if result.status == RequestStatus::Passed && result.failed_assertions() > 0 {
                    result.mark_failed();
                }
                result.set_response(response);
            }
        }

        result.set_duration(started.elapsed());
        result
    }
}

fn non_empty(script: Option<&str>) -> Option<&str> {
    script.filter(|s| !s.trim().is_empty())
}

fn env_changes(result: &RequestResult) -> (Vec<EnvChange>, Vec<EnvChange>) {
    let pick = |r: &Option<ScriptResult>| {
        r.as_ref().map(|r| r.env_changes.clone()).unwrap_or_default()
    };
    (pick(&result.pre_script_result), pick(&result.post_script_result))
}

fn skip_remaining(session: &mut RunSession, remaining: &[&RequestItem], first_index: usize) {
    for (offset, item) in remaining.iter().enumerate() {
        session.add_result(RequestResult::skipped(
            first_index + offset,
            RequestInfo::from(*item),
        ));
    }
}

/// Expands `{{name}}` in url, header values and body.
pub fn resolve_placeholders(request: &mut HttpRequest, vars: &EnvMap) {
    request.url = expand_placeholders(&request.url, vars);
    for header in &mut request.headers {
        header.value = expand_placeholders(&header.value, vars);
    }
    if let Some(body) = request.body.as_mut() {
        *body = expand_placeholders(body, vars);
    }
}
