//! JSON-over-HTTP plumbing shared by the Ollama and OpenAI-compatible adapters.

use crate::retry::Transient;
use reqwest::Client;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Why an HTTP exchange with a capability backend failed.
#[derive(Debug)]
pub(crate) enum HttpFailure {
    /// The server could not be reached at all.
    Unreachable(String),
    TimedOut,
    /// The server answered with a non-success status.
    Status { status: u16, body: String },
    /// The server answered 2xx but the body was not what we expected.
    Malformed(String),
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable(msg) => write!(f, "connection failed: {msg}"),
            Self::TimedOut => f.write_str("request timed out"),
            Self::Status { status, body } => write!(f, "HTTP {status}: {}", truncate(body, 300)),
            Self::Malformed(msg) => write!(f, "malformed response: {msg}"),
        }
    }
}

impl Transient for HttpFailure {
    fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::TimedOut => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Malformed(_) => false,
        }
    }
}

/// Build a client with a per-request timeout.
pub(crate) fn build_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// POST a JSON body and parse a JSON reply.
pub(crate) async fn post_json(
    client: &Client,
    url: &str,
    body: &Value,
    bearer: Option<&str>,
) -> Result<Value, HttpFailure> {
    debug!(url = %url, "POST");
    let mut request = client.post(url).json(body);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }
    let response = request.send().await.map_err(map_send_error)?;
    read_json(response).await
}

/// GET a JSON document.
pub(crate) async fn get_json(client: &Client, url: &str) -> Result<Value, HttpFailure> {
    debug!(url = %url, "GET");
    let response = client.get(url).send().await.map_err(map_send_error)?;
    read_json(response).await
}

async fn read_json(response: reqwest::Response) -> Result<Value, HttpFailure> {
    let status = response.status();
    let text = response.text().await.map_err(map_send_error)?;
    if !status.is_success() {
        return Err(HttpFailure::Status {
            status: status.as_u16(),
            body: text,
        });
    }
    serde_json::from_str(&text).map_err(|e| HttpFailure::Malformed(format!("invalid JSON: {e}")))
}

fn map_send_error(e: reqwest::Error) -> HttpFailure {
    if e.is_timeout() {
        HttpFailure::TimedOut
    } else {
        HttpFailure::Unreachable(e.to_string())
    }
}

/// Strip a trailing slash so paths can be appended with `format!`.
pub(crate) fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Parse a JSON array of numbers into an embedding vector.
pub(crate) fn parse_vector(value: &Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
