//! JSON-over-HTTP transport shared by every remote adapter
//!
//! Adapters depend on the [`JsonTransport`] trait rather than on reqwest so
//! tests can script responses and count requests.

use crate::core::error::{GeoError, NetworkError};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Default User-Agent string for outgoing requests
pub const DEFAULT_USER_AGENT: &str = concat!("mapgeo/", env!("CARGO_PKG_VERSION"));

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Async JSON request/response transport
#[async_trait]
pub trait JsonTransport: Send + Sync {
    /// POST `body` as JSON and decode the JSON answer
    ///
    /// Non-2xx statuses are errors. An empty body decodes to `Value::Null`.
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &Value,
    ) -> Result<Value, GeoError>;

    /// GET with query parameters and decode the JSON answer
    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, GeoError>;
}

/// Real transport implementation using reqwest
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Creates a transport with default timeout and User-Agent
    pub fn new() -> Result<Self, GeoError> {
        Self::with_settings(DEFAULT_TIMEOUT, DEFAULT_USER_AGENT)
    }

    pub fn with_settings(timeout: Duration, user_agent: &str) -> Result<Self, GeoError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| GeoError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }

    fn send_error(&self, url: &str, e: reqwest::Error) -> GeoError {
        warn!(
            url = url,
            error = %e,
            is_connect = e.is_connect(),
            is_timeout = e.is_timeout(),
            "HTTP request failed"
        );
        if e.is_timeout() {
            NetworkError::Timeout {
                elapsed_ms: self.timeout.as_millis() as u64,
            }
            .into()
        } else {
            NetworkError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            }
            .into()
        }
    }

    async fn decode(&self, url: &str, response: reqwest::Response) -> Result<Value, GeoError> {
        let status = response.status();
        debug!(url = url, status = status.as_u16(), "HTTP response received");

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.send_error(url, e))?;
        trace!(url = url, bytes = bytes.len(), "HTTP response body read");

        if !status.is_success() {
            warn!(url = url, status = status.as_u16(), "HTTP error status");
            return Err(status_error(url, status.as_u16(), &bytes));
        }

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&bytes).map_err(|e| {
            NetworkError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }
}

/// Prefer the backend's own `{error, error_description}` payload when present
fn status_error(url: &str, status: u16, body: &[u8]) -> GeoError {
    let payload = serde_json::from_slice::<Value>(body).ok();
    let code = payload
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(Value::as_str);

    match code {
        Some(code) => {
            let message = payload
                .as_ref()
                .and_then(|v| v.get("error_description").or_else(|| v.get("message")))
                .and_then(Value::as_str)
                .unwrap_or_default();
            NetworkError::Backend {
                backend: host_of(url),
                code: code.to_string(),
                message: format!("HTTP {}: {}", status, message),
            }
            .into()
        }
        None => NetworkError::Status {
            status,
            url: url.to_string(),
        }
        .into(),
    }
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

#[async_trait]
impl JsonTransport for ReqwestTransport {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &Value,
    ) -> Result<Value, GeoError> {
        trace!(url = url, "HTTP POST request starting");

        let mut request = self.client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await.map_err(|e| self.send_error(url, e))?;
        self.decode(url, response).await
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, GeoError> {
        trace!(url = url, "HTTP GET request starting");

        let response = self
            .client
            .get(url)
            .query(query)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| self.send_error(url, e))?;
        self.decode(url, response).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport for adapter tests

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Method {
        Get,
        Post,
    }

    /// One request as seen by the transport
    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub method: Method,
        pub url: String,
        pub headers: Vec<(String, String)>,
        pub query: Vec<(String, String)>,
        pub body: Value,
    }

    type Script = (String, VecDeque<Result<Value, GeoError>>);

    /// Answers requests whose URL contains a registered fragment, in registration order
    ///
    /// Unmatched requests fail with HTTP 404.
    #[derive(Default)]
    pub struct ScriptedTransport {
        scripts: Mutex<Vec<Script>>,
        calls: Mutex<Vec<RecordedCall>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a response for URLs containing `fragment`; the last queued
        /// response is repeated once the queue would run dry
        pub fn on(self, fragment: &str, response: Result<Value, GeoError>) -> Self {
            {
                let mut scripts = self.scripts.lock().unwrap();
                match scripts.iter_mut().find(|(f, _)| f == fragment) {
                    Some((_, queue)) => queue.push_back(response),
                    None => scripts.push((fragment.to_string(), VecDeque::from([response]))),
                }
            }
            self
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn answer(&self, call: RecordedCall) -> Result<Value, GeoError> {
            let url = call.url.clone();
            self.calls.lock().unwrap().push(call);

            let mut scripts = self.scripts.lock().unwrap();
            let Some((_, queue)) = scripts.iter_mut().find(|(f, _)| url.contains(f.as_str())) else {
                return Err(NetworkError::Status { status: 404, url }.into());
            };
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                match queue.front() {
                    Some(Ok(value)) => Ok(value.clone()),
                    Some(Err(err)) => Err(clone_error(err)),
                    None => Err(NetworkError::Status { status: 404, url }.into()),
                }
            }
        }
    }

    fn clone_error(err: &GeoError) -> GeoError {
        match err {
            GeoError::Network(e) => GeoError::Network(e.clone()),
            GeoError::Protocol(e) => GeoError::Protocol(e.clone()),
            other => GeoError::Internal(other.to_string()),
        }
    }

    #[async_trait]
    impl JsonTransport for ScriptedTransport {
        async fn post_json(
            &self,
            url: &str,
            headers: &[(&str, &str)],
            body: &Value,
        ) -> Result<Value, GeoError> {
            self.answer(RecordedCall {
                method: Method::Post,
                url: url.to_string(),
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                query: Vec::new(),
                body: body.clone(),
            })
        }

        async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, GeoError> {
            self.answer(RecordedCall {
                method: Method::Get,
                url: url.to_string(),
                headers: Vec::new(),
                query: query
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                body: Value::Null,
            })
        }
    }
}
