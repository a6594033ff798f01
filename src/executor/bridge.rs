//! Script host transport.
//!
//! A host accepts `{ "script": "..." }` and answers `{ ok, output, errors }`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{NodeFlowError, Result};

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8787";
pub const RUN_SCRIPT_PATH: &str = "/runScript";

#[derive(Debug, Clone, Serialize)]
struct RunRequest<'a> {
    script: &'a str,
}

/// Host reply to a script run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunResponse {
    pub ok: bool,
    pub output: String,
    pub errors: String,
    /// Set by hosts that reject the request outright.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResponse {
    /// Parse the trimmed output as JSON; empty output yields `None`.
    pub fn output_json(&self) -> Result<Option<serde_json::Value>> {
        let output = self.output.trim();
        if output.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(output).map(Some).map_err(|e| {
            log::error!("Failed to parse JSON from script output: {e}");
            NodeFlowError::Transport(format!("Script output is not valid JSON: {e}"))
        })
    }
}

/// Something that can execute a generated script.
#[async_trait]
pub trait ScriptHost: Send + Sync {
    async fn run_script(&self, script: &str) -> Result<RunResponse>;
}

/// Run `script` and parse its output as JSON.
pub async fn request_json(host: &dyn ScriptHost, script: &str) -> Result<Option<serde_json::Value>> {
    host.run_script(script).await?.output_json()
}

/// Trim, add `http://` when no scheme is given and drop trailing slashes.
///
/// Blank input yields an empty string.
pub fn normalize_server_url(value: &str) -> String {
    let url = value.trim();
    if url.is_empty() {
        return String::new();
    }
    let lower = url.to_ascii_lowercase();
    let url = if lower.starts_with("http://") || lower.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    };
    url.trim_end_matches('/').to_string()
}

/// HTTP host at `<base>/runScript`.
#[derive(Debug, Clone)]
pub struct HttpScriptHost {
    http_client: reqwest::Client,
    endpoint: String,
    timeout: Option<Duration>,
}

impl HttpScriptHost {
    pub fn new(server_url: &str) -> Self {
        let base = match normalize_server_url(server_url) {
            base if base.is_empty() => DEFAULT_SERVER_URL.to_string(),
            base => base,
        };
        Self {
            http_client: reqwest::Client::new(),
            endpoint: format!("{base}{RUN_SCRIPT_PATH}"),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ScriptHost for HttpScriptHost {
    async fn run_script(&self, script: &str) -> Result<RunResponse> {
        if script.trim().is_empty() {
            return Err(NodeFlowError::Transport("Script is empty.".to_string()));
        }

        let mut request = self
            .http_client
            .post(&self.endpoint)
            .json(&RunRequest { script });
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|e| NodeFlowError::Transport(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        let payload: RunResponse = response.json().await.map_err(|e| {
            log::error!("Failed to parse script host response: {e}");
            NodeFlowError::Transport("Received an invalid response from the script host.".to_string())
        })?;

        if !status.is_success() {
            let message = payload
                .error
                .clone()
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(NodeFlowError::Transport(message));
        }
        log::debug!("Script host answered ok={}", payload.ok);
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(String);

    #[async_trait]
    impl ScriptHost for Canned {
        async fn run_script(&self, _script: &str) -> Result<RunResponse> {
            Ok(RunResponse {
                ok: true,
                output: self.0.clone(),
                ..Default::default()
            })
        }
    }

    #[test]
    fn test_normalize_server_url() {
        assert_eq!(normalize_server_url("  localhost:9000/// "), "http://localhost:9000");
        assert_eq!(normalize_server_url("HTTPS://host/"), "HTTPS://host");
        assert_eq!(normalize_server_url("   "), "");
    }

    #[test]
    fn test_endpoint_defaults() {
        assert_eq!(HttpScriptHost::new("").endpoint(), "http://127.0.0.1:8787/runScript");
        assert_eq!(HttpScriptHost::new("10.0.0.2:81/").endpoint(), "http://10.0.0.2:81/runScript");
    }

    #[test]
    fn test_response_tolerates_missing_fields() {
        let response: RunResponse = serde_json::from_str(r#"{"ok": true}"#).unwrap();
        assert!(response.ok);
        assert_eq!(response.output, "");
        assert!(response.output_json().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_request_json_parses_trimmed_output() {
        let host = Canned("  {\"name\": \"svc\"}\n".to_string());
        let value = request_json(&host, "Get-Service").await.unwrap().unwrap();
        assert_eq!(value["name"], "svc");

        let bad = Canned("not json".to_string());
        assert!(matches!(
            request_json(&bad, "x").await,
            Err(NodeFlowError::Transport(_))
        ));
    }
}
