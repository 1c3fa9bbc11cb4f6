use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    env::{replay_changes, EnvChange, EnvMap, Environment},
    http::{HttpResponse, TransportError},
    script::{ScriptError, ScriptResult},
};

use super::{collection::RequestItem, config::RunConfig, report::RunReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Canceled,
    Stopped,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Canceled | RunStatus::Stopped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Canceled => "canceled",
            RunStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Error,
    Skipped,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Running => "running",
            RequestStatus::Passed => "passed",
            RequestStatus::Failed => "failed",
            RequestStatus::Error => "error",
            RequestStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScriptPhase {
    PreRequest,
    PostResponse,
}

impl fmt::Display for ScriptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptPhase::PreRequest => f.write_str("pre-request"),
            ScriptPhase::PostResponse => f.write_str("post-response"),
        }
    }
}

/// Why a request ended in `error`.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum RequestError {
    #[error("transport error: {0}")]
    Transport(TransportError),
    #[error("{phase} script failed: {error}")]
    Script { phase: ScriptPhase, error: ScriptError },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    pub id: String,
    pub name: String,
    pub method: String,
    pub url: String,
}

impl From<&RequestItem> for RequestInfo {
    fn from(item: &RequestItem) -> Self {
        Self {
            id: item.id.clone(),
            name: item.name.clone(),
            method: item.method.to_ascii_uppercase(),
            url: item.url.clone(),
        }
    }
}

/// Outcome of one attempted or skipped request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResult {
    pub index: usize,
    pub request_info: RequestInfo,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<HttpResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_script_result: Option<ScriptResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_script_result: Option<ScriptResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RequestError>,
    pub duration_ms: f64,
}

impl RequestResult {
    pub fn pending(index: usize, request_info: RequestInfo) -> Self {
        Self {
            index,
            request_info,
            status: RequestStatus::Pending,
            response: None,
            pre_script_result: None,
            post_script_result: None,
            error: None,
            duration_ms: 0.0,
        }
    }

    pub fn skipped(index: usize, request_info: RequestInfo) -> Self {
        Self {
            status: RequestStatus::Skipped,
            ..Self::pending(index, request_info)
        }
    }

    pub fn mark_running(&mut self) {
        self.status = RequestStatus::Running;
    }

    pub fn mark_passed(&mut self) {
        self.status = RequestStatus::Passed;
    }

    pub fn mark_failed(&mut self) {
        self.status = RequestStatus::Failed;
    }

    pub fn mark_error(&mut self, error: RequestError) {
        self.status = RequestStatus::Error;
        self.error = Some(error);
    }

    pub fn set_response(&mut self, response: HttpResponse) {
        self.response = Some(response);
    }

    pub fn set_pre_script_result(&mut self, result: ScriptResult) {
        self.pre_script_result = Some(result);
    }

    pub fn set_post_script_result(&mut self, result: ScriptResult) {
        self.post_script_result = Some(result);
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_ms = duration.as_micros() as f64 / 1000.0;
    }

    /// Script results attached so far, pre-request first.
    pub fn script_results(&self) -> impl Iterator<Item = &ScriptResult> {
        self.pre_script_result
            .iter()
            .chain(self.post_script_result.iter())
    }

    pub fn passed_assertions(&self) -> usize {
        self.script_results().map(ScriptResult::passed_assertions).sum()
    }

    pub fn failed_assertions(&self) -> usize {
        self.script_results().map(ScriptResult::failed_assertions).sum()
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, RequestStatus::Failed | RequestStatus::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("cannot move run from {from} to {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },
}

/// State of one collection (or folder) run.
#[derive(Debug, Clone)]
pub struct RunSession {
    id: String,
    collection: String,
    folder_path: Option<String>,
    environment: Option<String>,
    status: RunStatus,
    config: RunConfig,
    results: Vec<RequestResult>,
    current_index: usize,
    total_requests: usize,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    session_env: EnvMap,
}

impl RunSession {
    /// The environment is cloned; scripts never touch the caller's copy.
    pub fn new(
        collection: impl Into<String>,
        folder_path: Option<String>,
        environment: Option<&Environment>,
        config: RunConfig,
    ) -> Self {
        let collection = collection.into();
        let created_at = Utc::now();
        Self {
            id: session_id(&collection, created_at),
            collection,
            folder_path,
            environment: environment.map(|env| env.name.clone()),
            status: RunStatus::Pending,
            config,
            results: Vec::new(),
            current_index: 0,
            total_requests: 0,
            created_at,
            started_at: None,
            finished_at: None,
            session_env: environment
                .map(|env| env.variables.clone())
                .unwrap_or_default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn folder_path(&self) -> Option<&str> {
        self.folder_path.as_deref()
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn results(&self) -> &[RequestResult] {
        &self.results
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn total_requests(&self) -> usize {
        self.total_requests
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn session_env(&self) -> &EnvMap {
        &self.session_env
    }

    pub fn start(&mut self, total_requests: usize) -> Result<(), SessionError> {
        self.transition(RunStatus::Running, &[RunStatus::Pending])?;
        self.total_requests = total_requests;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), SessionError> {
        self.finish(RunStatus::Completed, &[RunStatus::Running])
    }

    pub fn cancel(&mut self) -> Result<(), SessionError> {
        self.finish(RunStatus::Canceled, &[RunStatus::Pending, RunStatus::Running])
    }

    pub fn stop(&mut self) -> Result<(), SessionError> {
        self.finish(RunStatus::Stopped, &[RunStatus::Running])
    }

    fn finish(&mut self, to: RunStatus, allowed: &[RunStatus]) -> Result<(), SessionError> {
        self.transition(to, allowed)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, to: RunStatus, allowed: &[RunStatus]) -> Result<(), SessionError> {
        if !allowed.contains(&self.status) {
            return Err(SessionError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        tracing::debug!(session = %self.id, from = %self.status, %to, "run status changed");
        self.status = to;
        Ok(())
    }

    pub fn add_result(&mut self, result: RequestResult) {
        self.results.push(result);
        self.current_index = self.results.len();
    }

    pub(crate) fn apply_env_changes(&mut self, changes: &[EnvChange]) {
        replay_changes(changes, &mut self.session_env);
    }

    /// Snapshot report; does not change the session.
    pub fn generate_report(&self) -> RunReport {
        RunReport::from_session(self)
    }
}

fn session_id(collection: &str, at: DateTime<Utc>) -> String {
    let mut slug = String::with_capacity(collection.len());
    for ch in collection.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "run" } else { slug };
    format!("{}-{}", slug, at.format("%Y%m%d-%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::AssertionResult;
    use pretty_assertions::assert_eq;

    fn info(name: &str) -> RequestInfo {
        RequestInfo {
            id: String::new(),
            name: name.to_string(),
            method: "GET".to_string(),
            url: format!("https://example.com/{name}"),
        }
    }

    #[test]
    fn follows_the_state_machine() {
        let mut session = RunSession::new("Shop API", None, None, RunConfig::default());
        assert_eq!(session.status(), RunStatus::Pending);
        assert!(session.complete().is_err());

        session.start(2).unwrap();
        assert_eq!(session.status(), RunStatus::Running);
        assert!(session.started_at().is_some());
        assert_eq!(
            session.start(2),
            Err(SessionError::InvalidTransition {
                from: RunStatus::Running,
                to: RunStatus::Running
            })
        );

        session.stop().unwrap();
        assert!(session.is_terminal());
        assert!(session.finished_at().is_some());
        assert!(session.cancel().is_err());
    }

    #[test]
    fn only_final_states_are_terminal() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Canceled.is_terminal());
        assert!(RunStatus::Stopped.is_terminal());
    }

    #[test]
    fn add_result_advances_the_index() {
        let mut session = RunSession::new("shop", None, None, RunConfig::default());
        session.start(2).unwrap();
        session.add_result(RequestResult::pending(0, info("a")));
        session.add_result(RequestResult::skipped(1, info("b")));
        assert_eq!(session.current_index(), 2);
        assert_eq!(session.results()[1].status, RequestStatus::Skipped);
    }

    #[test]
    fn session_environment_is_an_owned_copy() {
        let environment = Environment::new(
            "dev",
            EnvMap::from([("token".to_string(), "a".to_string())]),
        );
        let mut session = RunSession::new("shop", None, Some(&environment), RunConfig::default());
        session.apply_env_changes(&[EnvChange::set("token", "b", Some("a".into()))]);
        assert_eq!(session.session_env().get("token").map(String::as_str), Some("b"));
        assert_eq!(environment.variables.get("token").map(String::as_str), Some("a"));
        assert_eq!(session.environment(), Some("dev"));
    }

    #[test]
    fn ids_combine_slug_and_time() {
        let at = DateTime::parse_from_rfc3339("2024-03-05T10:20:30Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(session_id("My Shop / API", at), "my-shop-api-20240305-102030");
        assert_eq!(session_id("***", at), "run-20240305-102030");
    }

    #[test]
    fn counts_assertions_across_both_scripts() {
        let mut result = RequestResult::pending(0, info("a"));
        result.set_pre_script_result(ScriptResult {
            assertions: vec![AssertionResult::passed("pre")],
            ..ScriptResult::empty()
        });
        result.set_post_script_result(ScriptResult {
            assertions: vec![
                AssertionResult::passed("a"),
                AssertionResult::failed("b", "Expected 1 to be 2"),
            ],
            ..ScriptResult::empty()
        });
        assert_eq!(result.passed_assertions(), 2);
        assert_eq!(result.failed_assertions(), 1);
    }

    #[test]
    fn request_errors_serialize_with_source() {
        let error = RequestError::Transport(TransportError::Network {
            message: "connection refused".into(),
        });
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["source"], "transport");
        assert_eq!(json["type"], "network");
    }
}
