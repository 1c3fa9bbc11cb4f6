use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{header::HeaderMap, Client, Method};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::{status_text_for, Header, HttpRequest, HttpResponse};

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransportError {
    #[error("request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("network error: {message}")]
    Network { message: String },
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

/// Sends one request and returns its response.
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestSender {
    client: Client,
    timeout: Duration,
}

impl ReqwestSender {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl HttpSender for ReqwestSender {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| TransportError::InvalidRequest {
                message: format!("invalid HTTP method {}", request.method),
            })?;
        let url = reqwest::Url::parse(&request.url).map_err(|err| {
            TransportError::InvalidRequest {
                message: format!("invalid URL {}: {err}", request.url),
            }
        })?;

        let mut request_builder = self.client.request(method, url).timeout(self.timeout);
        for header in &request.headers {
            request_builder = request_builder.header(&header.name, &header.value);
        }
        if let Some(body) = &request.body {
            request_builder = request_builder.body(body.clone());
        }

        let start = Instant::now();
        let response = request_builder
            .send()
            .await
            .map_err(|err| self.classify(err))?;

        let status = response.status();
        let headers = collect_headers(response.headers());
        let body = response.text().await.map_err(|err| self.classify(err))?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status_text_for(status.as_u16()).to_string(),
            headers,
            body,
            elapsed_ms,
        })
    }
}

impl ReqwestSender {
    fn classify(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else if err.is_builder() {
            TransportError::InvalidRequest {
                message: err.to_string(),
            }
        } else {
            TransportError::Network {
                message: err.to_string(),
            }
        }
    }
}

fn collect_headers(headers: &HeaderMap) -> Vec<Header> {
    headers
        .iter()
        .map(|(name, value)| {
            Header::new(
                name.as_str(),
                value.to_str().unwrap_or_default(),
            )
        })
        .collect()
}
