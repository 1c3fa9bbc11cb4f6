use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use rhai::{Dynamic, Engine, EvalAltResult, ImmutableString, Map};
use thiserror::Error;

use crate::http::{find_header, Header, HttpRequest, HttpResponse};

use super::value::ScriptValue;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewError {
    #[error("request is read-only in post-response scripts")]
    ReadOnly,
}

#[derive(Debug)]
struct RequestState {
    request: HttpRequest,
    mutable: bool,
    modified: bool,
}

/// Script-facing projection of an outgoing request.
///
/// Clones share state, so the executor can read back what a script changed.
/// Setters fail with [`ViewError::ReadOnly`] unless the view was built with
/// [`RequestView::mutable`].
#[derive(Debug, Clone)]
pub struct RequestView {
    state: Arc<Mutex<RequestState>>,
}

impl RequestView {
    fn with_mode(request: &HttpRequest, mutable: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(RequestState {
                request: request.clone(),
                mutable,
                modified: false,
            })),
        }
    }

    pub fn mutable(request: &HttpRequest) -> Self {
        Self::with_mode(request, true)
    }

    pub fn read_only(request: &HttpRequest) -> Self {
        Self::with_mode(request, false)
    }

    fn lock(&self) -> MutexGuard<'_, RequestState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mutate<R>(&self, apply: impl FnOnce(&mut HttpRequest) -> R) -> Result<R, ViewError> {
        let mut state = self.lock();
        if !state.mutable {
            return Err(ViewError::ReadOnly);
        }
        state.modified = true;
        Ok(apply(&mut state.request))
    }

    pub fn is_mutable(&self) -> bool {
        self.lock().mutable
    }

    pub fn is_modified(&self) -> bool {
        self.lock().modified
    }

    pub fn method(&self) -> String {
        self.lock().request.method.clone()
    }

    pub fn url(&self) -> String {
        self.lock().request.url.clone()
    }

    pub fn set_url(&self, url: impl Into<String>) -> Result<(), ViewError> {
        let url = url.into();
        self.mutate(|request| request.url = url)
    }

    pub fn header(&self, name: &str) -> Option<String> {
        find_header(&self.lock().request.headers, name).map(str::to_string)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    pub fn headers(&self) -> Vec<Header> {
        self.lock().request.headers.clone()
    }

    /// Sets a header; an existing entry under any case variant is replaced in place.
    pub fn set_header(&self, name: &str, value: impl Into<String>) -> Result<(), ViewError> {
        let value = value.into();
        self.mutate(|request| {
            match request
                .headers
                .iter_mut()
                .find(|h| h.name.eq_ignore_ascii_case(name))
            {
                Some(existing) => {
                    existing.name = name.to_string();
                    existing.value = value;
                }
                None => request.headers.push(Header::new(name, value)),
            }
        })
    }

    pub fn remove_header(&self, name: &str) -> Result<bool, ViewError> {
        self.mutate(|request| {
            let before = request.headers.len();
            request.headers.retain(|h| !h.name.eq_ignore_ascii_case(name));
            request.headers.len() != before
        })
    }

    pub fn body(&self) -> Option<String> {
        self.lock().request.body.clone()
    }

    pub fn set_body(&self, body: impl Into<String>) -> Result<(), ViewError> {
        let body = body.into();
        self.mutate(|request| request.body = Some(body))
    }

    /// Parsed body, or `Null` when the body is missing or not valid JSON.
    pub fn json(&self) -> ScriptValue {
        parse_json(self.body().as_deref().unwrap_or_default())
    }

    /// Query parameters of the current URL, in order.
    pub fn query(&self) -> Vec<(String, String)> {
        query_pairs(&self.url())
    }

    pub fn param(&self, name: &str) -> Option<String> {
        self.query()
            .into_iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn snapshot(&self) -> HttpRequest {
        self.lock().request.clone()
    }

    /// Writes url, headers and body back onto `target`. No-op when unmodified.
    pub fn apply_to(&self, target: &mut HttpRequest) {
        let state = self.lock();
        if !state.modified {
            return;
        }
        target.url = state.request.url.clone();
        target.headers = state.request.headers.clone();
        target.body = state.request.body.clone();
    }
}

/// Read-only projection of a received response.
#[derive(Debug, Clone)]
pub struct ResponseView {
    response: Arc<HttpResponse>,
}

impl ResponseView {
    pub fn new(response: &HttpResponse) -> Self {
        Self {
            response: Arc::new(response.clone()),
        }
    }

    pub fn code(&self) -> u16 {
        self.response.status
    }

    pub fn status_text(&self) -> &str {
        &self.response.status_text
    }

    pub fn time(&self) -> f64 {
        self.response.elapsed_ms
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.response.header(name).map(str::to_string)
    }

    pub fn headers(&self) -> &[Header] {
        &self.response.headers
    }

    pub fn body(&self) -> &str {
        &self.response.body
    }

    pub fn size(&self) -> usize {
        self.response.body.len()
    }

    pub fn json(&self) -> ScriptValue {
        parse_json(&self.response.body)
    }
}

fn parse_json(text: &str) -> ScriptValue {
    serde_json::from_str::<serde_json::Value>(text)
        .map(|value| ScriptValue::from_json(&value))
        .unwrap_or(ScriptValue::Null)
}

fn query_pairs(url: &str) -> Vec<(String, String)> {
    let Some((_, query)) = url.split_once('?') else {
        return Vec::new();
    };
    let query = query.split('#').next().unwrap_or_default();
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn headers_map(headers: &[Header]) -> Map {
    headers
        .iter()
        .map(|h| (h.name.as_str().into(), Dynamic::from(h.value.clone())))
        .collect()
}

fn optional(value: Option<String>) -> Dynamic {
    value.map(Dynamic::from).unwrap_or(Dynamic::UNIT)
}

fn script_error(err: ViewError) -> Box<EvalAltResult> {
    err.to_string().into()
}

/// `request.headers` / `response.headers` in scripts.
#[derive(Debug, Clone)]
pub(crate) enum HeaderAccess {
    Request(RequestView),
    Response(ResponseView),
}

/// `request.body` / `response.body` in scripts.
#[derive(Debug, Clone)]
pub(crate) enum BodyAccess {
    Request(RequestView),
    Response(ResponseView),
}

impl HeaderAccess {
    fn get(&self, name: &str) -> Option<String> {
        match self {
            HeaderAccess::Request(view) => view.header(name),
            HeaderAccess::Response(view) => view.header(name),
        }
    }

    fn all(&self) -> Map {
        match self {
            HeaderAccess::Request(view) => headers_map(&view.headers()),
            HeaderAccess::Response(view) => headers_map(view.headers()),
        }
    }

    fn set(&self, name: &str, value: &Dynamic) -> Result<(), Box<EvalAltResult>> {
        match self {
            HeaderAccess::Request(view) => view
                .set_header(name, ScriptValue::from_dynamic(value).to_env_string())
                .map_err(script_error),
            HeaderAccess::Response(_) => Ok(()),
        }
    }

    fn remove(&self, name: &str) -> Result<bool, Box<EvalAltResult>> {
        match self {
            HeaderAccess::Request(view) => view.remove_header(name).map_err(script_error),
            HeaderAccess::Response(_) => Ok(false),
        }
    }
}

impl BodyAccess {
    fn raw(&self) -> String {
        match self {
            BodyAccess::Request(view) => view.body().unwrap_or_default(),
            BodyAccess::Response(view) => view.body().to_string(),
        }
    }

    fn json(&self) -> ScriptValue {
        match self {
            BodyAccess::Request(view) => view.json(),
            BodyAccess::Response(view) => view.json(),
        }
    }

    fn set(&self, value: &Dynamic) -> Result<(), Box<EvalAltResult>> {
        match self {
            BodyAccess::Request(view) => view
                .set_body(ScriptValue::from_dynamic(value).to_env_string())
                .map_err(script_error),
            BodyAccess::Response(_) => Ok(()),
        }
    }
}

pub(crate) fn register_views(engine: &mut Engine) {
    engine
        .register_type_with_name::<RequestView>("Request")
        .register_get("method", |r: &mut RequestView| r.method())
        .register_get("url", |r: &mut RequestView| r.url())
        .register_set(
            "url",
            |r: &mut RequestView, url: ImmutableString| -> Result<(), Box<EvalAltResult>> {
                r.set_url(url.to_string()).map_err(script_error)
            },
        )
        .register_fn(
            "setUrl",
            |r: &mut RequestView, url: &str| -> Result<(), Box<EvalAltResult>> {
                r.set_url(url).map_err(script_error)
            },
        )
        .register_get("headers", |r: &mut RequestView| {
            HeaderAccess::Request(r.clone())
        })
        .register_get("body", |r: &mut RequestView| BodyAccess::Request(r.clone()))
        .register_fn("json", |r: &mut RequestView| r.json().into_dynamic())
        .register_fn("isModified", |r: &mut RequestView| r.is_modified())
        .register_fn("query", |r: &mut RequestView| -> Map {
            let mut params = BTreeMap::new();
            for (key, value) in r.query() {
                params.insert(key, value);
            }
            params
                .into_iter()
                .map(|(k, v)| (k.into(), Dynamic::from(v)))
                .collect()
        })
        .register_fn("param", |r: &mut RequestView, name: &str| optional(r.param(name)));

    engine
        .register_type_with_name::<ResponseView>("Response")
        .register_get("code", |r: &mut ResponseView| r.code() as rhai::INT)
        .register_get("status", |r: &mut ResponseView| r.code() as rhai::INT)
        .register_get("statusText", |r: &mut ResponseView| r.status_text().to_string())
        .register_get("time", |r: &mut ResponseView| r.time())
        .register_get("size", |r: &mut ResponseView| r.size() as rhai::INT)
        .register_get("headers", |r: &mut ResponseView| {
            HeaderAccess::Response(r.clone())
        })
        .register_get("body", |r: &mut ResponseView| BodyAccess::Response(r.clone()))
        .register_fn("json", |r: &mut ResponseView| r.json().into_dynamic())
        .register_fn("text", |r: &mut ResponseView| r.body().to_string());

    // Assignments through a response are absorbed without effect.
    for property in ["code", "status", "statusText", "time", "size", "headers", "body"] {
        engine.register_set(property, |_: &mut ResponseView, _: Dynamic| {});
    }
    // Unknown properties fall back to the string indexer.
    engine
        .register_indexer_set(|_: &mut ResponseView, _: ImmutableString, _: Dynamic| {})
        .register_indexer_set(|_: &mut ResponseView, _: rhai::INT, _: Dynamic| {});

    engine
        .register_type_with_name::<HeaderAccess>("Headers")
        .register_fn("get", |h: &mut HeaderAccess, name: &str| optional(h.get(name)))
        .register_fn("has", |h: &mut HeaderAccess, name: &str| h.get(name).is_some())
        .register_fn("all", |h: &mut HeaderAccess| h.all())
        .register_fn(
            "set",
            |h: &mut HeaderAccess, name: &str, value: Dynamic| h.set(name, &value),
        )
        .register_fn("remove", |h: &mut HeaderAccess, name: &str| h.remove(name));

    engine
        .register_type_with_name::<BodyAccess>("Body")
        .register_fn("raw", |b: &mut BodyAccess| b.raw())
        .register_fn("json", |b: &mut BodyAccess| b.json().into_dynamic())
        .register_fn("set", |b: &mut BodyAccess, value: Dynamic| b.set(&value))
        .register_fn("to_string", |b: &mut BodyAccess| b.raw());
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rhai::Scope;

    fn request() -> HttpRequest {
        HttpRequest::new("POST", "https://api.example.com/items?page=2&q=a%20b")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"name":"widget"}"#)
    }

    #[test]
    fn header_names_are_case_insensitive() {
        let view = RequestView::mutable(&HttpRequest::new("GET", "https://example.com"));
        view.set_header("Content-Type", "text/plain").unwrap();
        assert_eq!(view.header("content-type").as_deref(), Some("text/plain"));

        view.set_header("CONTENT-TYPE", "application/json").unwrap();
        let headers = view.headers();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].value, "application/json");
        assert!(view.remove_header("content-TYPE").unwrap());
        assert!(!view.has_header("Content-Type"));
    }

    #[test]
    fn read_only_views_reject_setters() {
        let view = RequestView::read_only(&request());
        assert_eq!(view.set_url("https://other"), Err(ViewError::ReadOnly));
        assert_eq!(view.set_header("x", "y"), Err(ViewError::ReadOnly));
        assert!(!view.is_modified());
        assert_eq!(view.url(), request().url);
    }

    #[test]
    fn json_is_absent_for_malformed_bodies() {
        let view = RequestView::mutable(&request());
        assert!(matches!(view.json(), ScriptValue::Map(_)));
        view.set_body("{not json").unwrap();
        assert_eq!(view.json(), ScriptValue::Null);
    }

    #[test]
    fn query_parameters_follow_the_current_url() {
        let view = RequestView::mutable(&request());
        assert_eq!(view.param("q").as_deref(), Some("a b"));
        view.set_url("https://api.example.com/items?page=3#top").unwrap();
        assert_eq!(view.query(), vec![("page".to_string(), "3".to_string())]);
    }

    #[test]
    fn apply_to_only_writes_when_modified() {
        let original = request();
        let mut target = original.clone();
        target.url = "https://untouched".into();

        let view = RequestView::mutable(&original);
        view.apply_to(&mut target);
        assert_eq!(target.url, "https://untouched");

        view.set_header("X-Trace", "1").unwrap();
        view.apply_to(&mut target);
        assert_eq!(target.url, original.url);
        assert_eq!(target.header("x-trace"), Some("1"));
        assert_eq!(target.method, "POST");
    }

    fn run_with_views(script: &str, request: RequestView, response: ResponseView) {
        let mut engine = Engine::new();
        register_views(&mut engine);
        let mut scope = Scope::new();
        scope.push("request", request);
        scope.push("response", response);
        engine.run_with_scope(&mut scope, script).unwrap();
    }

    #[test]
    fn scripts_modify_requests() {
        let view = RequestView::mutable(&request());
        let response = ResponseView::new(&HttpResponse::new(200, "{}"));
        run_with_views(
            r#"
            request.url = request.url + "&debug=1";
            request.headers.set("authorization", "Bearer t");
            request.body.set("payload");
            "#,
            view.clone(),
            response,
        );
        assert!(view.is_modified());
        assert_eq!(view.param("debug").as_deref(), Some("1"));
        assert_eq!(view.header("Authorization").as_deref(), Some("Bearer t"));
        assert_eq!(view.body().as_deref(), Some("payload"));
    }

    #[test]
    fn response_assignments_are_absorbed() {
        let response = HttpResponse::new(201, r#"{"id":1}"#).with_header("X-Id", "1");
        let view = ResponseView::new(&response);
        run_with_views(
            r#"
            response.status = 500;
            response.headers.set("X-Id", "2");
            response.body.set("nope");
            response.statusCode = 500;
            response["code"] = 1;
            response[0] = "x";
            if response.code != 201 { throw "status changed"; }
            if response.headers.get("x-id") != "1" { throw "header changed"; }
            if response.json().id != 1 { throw "body changed"; }
            "#,
            RequestView::read_only(&request()),
            view.clone(),
        );
        assert_eq!(view.code(), 201);
        assert_eq!(view.body(), r#"{"id":1}"#);
    }
}
