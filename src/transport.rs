use std::time::Duration;

use serde_json::{json, Value};

use crate::{env_optional, TargetConfig, TransportError};

const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const CREATE_RETRIES: u32 = 2;
const RETRY_BACKOFF_MS: u64 = 500;
const CONNECT_TIMEOUT_MS: u64 = 10_000;
/// Read/write budget for create and destroy. Sends carry their own per-turn
/// timeout on the request.
const REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Conversation-scoped model transport. One conversation handle per dispatch;
/// each send is a full turn round-trip.
pub(crate) trait Transport {
    fn create_conversation(&mut self) -> Result<String, TransportError>;
    fn send(&mut self, handle: &str, text: &str, timeout_ms: u64)
        -> Result<String, TransportError>;
    fn destroy(&mut self, handle: &str) -> Result<(), String>;
}

pub(crate) struct HttpTransport {
    base_url: String,
    model: String,
    api_key: Option<String>,
    native_tools: bool,
    request_timeout_ms: u64,
    agent: ureq::Agent,
}

impl HttpTransport {
    pub(crate) fn new(target: &TargetConfig, native_tools: bool) -> Self {
        Self::with_request_timeout(target, native_tools, REQUEST_TIMEOUT_MS)
    }

    pub(crate) fn with_request_timeout(
        target: &TargetConfig,
        native_tools: bool,
        request_timeout_ms: u64,
    ) -> Self {
        let api_key = target.api_key_env.as_deref().and_then(env_optional);
        let request_timeout = Duration::from_millis(request_timeout_ms);
        HttpTransport {
            base_url: target
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: target.model.clone(),
            api_key,
            native_tools,
            request_timeout_ms,
            agent: ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_millis(
                    CONNECT_TIMEOUT_MS.min(request_timeout_ms),
                ))
                .timeout_read(request_timeout)
                .timeout_write(request_timeout)
                .build(),
        }
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let mut req = self
            .agent
            .request(method, &format!("{}{path}", self.base_url))
            .set("content-type", "application/json");
        if let Some(key) = &self.api_key {
            req = req.set("authorization", &format!("Bearer {key}"));
        }
        req
    }
}

fn classify(err: ureq::Error, timeout_ms: u64) -> TransportError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            TransportError::Other(format!("status {code}: {}", body.trim()))
        }
        ureq::Error::Transport(t) => {
            let text = t.to_string();
            if text.contains("timed out") || text.contains("timeout") {
                TransportError::Timeout { timeout_ms }
            } else {
                TransportError::Other(text)
            }
        }
    }
}

fn retryable_status(err: &TransportError) -> bool {
    match err {
        TransportError::Timeout { .. } => false,
        TransportError::Other(text) => {
            ["status 429", "status 500", "status 502", "status 503", "status 504"]
                .iter()
                .any(|s| text.starts_with(s))
        }
    }
}

impl Transport for HttpTransport {
    /// Creating a conversation has no side effects on the model, so transient
    /// server errors are retried. Sends never are.
    fn create_conversation(&mut self) -> Result<String, TransportError> {
        let payload = json!({ "model": self.model });
        let mut last_err = TransportError::Other("no attempt made".to_string());
        for attempt in 0..=CREATE_RETRIES {
            if attempt > 0 {
                eprintln!("[transport] retrying conversation create (attempt {})", attempt + 1);
                std::thread::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64));
            }
            match self
                .request("POST", "/v1/conversations")
                .send_json(payload.clone())
            {
                Ok(response) => {
                    let body: Value = response
                        .into_json()
                        .map_err(|e| TransportError::Other(format!("create response: {e}")))?;
                    return body
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| {
                            TransportError::Other("create response missing 'id'".to_string())
                        });
                }
                Err(err) => {
                    last_err = classify(err, self.request_timeout_ms);
                    if !retryable_status(&last_err) {
                        return Err(last_err);
                    }
                }
            }
        }
        Err(last_err)
    }

    fn send(
        &mut self,
        handle: &str,
        text: &str,
        timeout_ms: u64,
    ) -> Result<String, TransportError> {
        let payload = json!({
            "text": text,
            "native_tools": self.native_tools,
        });
        let response = self
            .request("POST", &format!("/v1/conversations/{handle}/messages"))
            .timeout(Duration::from_millis(timeout_ms))
            .send_json(payload)
            .map_err(|e| classify(e, timeout_ms))?;
        let body: Value = response
            .into_json()
            .map_err(|e| TransportError::Other(format!("send response: {e}")))?;
        body.get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TransportError::Other("send response missing 'text'".to_string()))
    }

    fn destroy(&mut self, handle: &str) -> Result<(), String> {
        self.request("DELETE", &format!("/v1/conversations/{handle}"))
            .call()
            .map(|_| ())
            .map_err(|e| classify(e, self.request_timeout_ms).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_text_is_classified_as_timeout() {
        let err = TransportError::Timeout { timeout_ms: 1_000 };
        assert!(!retryable_status(&err));
        assert_eq!(err.to_string(), "transport timed out after 1000ms");
    }

    #[test]
    fn create_times_out_against_a_silent_server() {
        // A bound listener that never reads or replies: the connection is
        // accepted into the backlog, then the response read must hit the
        // agent's read timeout instead of stalling the dispatch.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let target = TargetConfig {
            name: "silent".to_string(),
            model: "m".to_string(),
            base_url: Some(format!("http://{addr}")),
            api_key_env: None,
            supports_native_tools: false,
        };
        let mut transport = HttpTransport::with_request_timeout(&target, false, 300);
        let start = std::time::Instant::now();
        let err = match transport.create_conversation() {
            Ok(_) => panic!("expected a timeout from a silent server"),
            Err(e) => e,
        };
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "create took {:?}",
            start.elapsed()
        );
        assert_eq!(err, TransportError::Timeout { timeout_ms: 300 });
        assert!(err.to_string().contains("after 300ms"));
        drop(listener);
    }

    #[test]
    fn server_errors_are_retryable_for_create() {
        assert!(retryable_status(&TransportError::Other(
            "status 503: overloaded".to_string()
        )));
        assert!(!retryable_status(&TransportError::Other(
            "status 404: no such model".to_string()
        )));
        assert!(!retryable_status(&TransportError::Other(
            "connection refused".to_string()
        )));
    }
}
