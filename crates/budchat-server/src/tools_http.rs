// Webhook tool execution
//
// Forwards tool invocations to a configured HTTP endpoint with retries and
// exponential backoff. The webhook receives the invocation as JSON and
// answers with the tool output; non-JSON bodies are wrapped rather than
// rejected.

use std::time::Duration;

use async_trait::async_trait;
use budchat_core::{Result, ToolBackend, ToolInvocation, ToolOutcome};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{info, warn};

const DEFAULT_MAX_RETRIES: u32 = 2;

pub struct HttpToolBackend {
    client: Client,
    url: Option<String>,
    max_retries: u32,
}

impl HttpToolBackend {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: Some(url.into()),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Reads TOOL_WEBHOOK_URL; when unset, every invocation resolves to an
    /// error-carrying outcome instead of failing the turn
    pub fn from_env() -> Self {
        match std::env::var("TOOL_WEBHOOK_URL") {
            Ok(url) if !url.is_empty() => Self::new(url),
            _ => Self::disabled(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            client: Client::new(),
            url: None,
            max_retries: 0,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    async fn call_once(&self, url: &str, invocation: &ToolInvocation) -> anyhow::Result<Value> {
        let body = json!({
            "tool_call_id": invocation.id,
            "tool_name": invocation.name,
            "arguments": invocation.args,
        });

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            anyhow::bail!("webhook returned status {status}: {text}");
        }

        Ok(serde_json::from_str(&text).unwrap_or_else(|_| json!({ "raw_response": text })))
    }
}

#[async_trait]
impl ToolBackend for HttpToolBackend {
    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutcome> {
        let Some(url) = &self.url else {
            return Ok(ToolOutcome::err(
                &invocation.id,
                "no tool backend configured",
            ));
        };

        info!(id = %invocation.id, name = %invocation.name, "executing webhook tool");

        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                warn!(
                    id = %invocation.id,
                    attempt,
                    max_retries = self.max_retries,
                    "retrying webhook call"
                );
                tokio::time::sleep(Duration::from_secs(2_u64.pow(attempt - 1))).await;
            }

            match self.call_once(url, invocation).await {
                Ok(output) => return Ok(ToolOutcome::ok(&invocation.id, output)),
                Err(error) => {
                    warn!(id = %invocation.id, attempt, %error, "webhook call failed");
                    last_error = Some(error);
                }
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "webhook call failed".to_string());
        Ok(ToolOutcome::err(
            &invocation.id,
            format!(
                "webhook failed after {} retries: {message}",
                self.max_retries
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn invocation() -> ToolInvocation {
        ToolInvocation {
            id: "call_1".into(),
            name: "lookup".into(),
            args: json!({"q": "x"}),
        }
    }

    #[tokio::test]
    async fn successful_webhook_returns_the_parsed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(json!({"tool_name": "lookup"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hits": 3})))
            .mount(&server)
            .await;

        let backend = HttpToolBackend::new(format!("{}/hook", server.uri()));
        let outcome = backend.execute(&invocation()).await.unwrap();
        assert_eq!(outcome.output, json!({"hits": 3}));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn non_json_body_is_wrapped_not_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("plain text"))
            .mount(&server)
            .await;

        let backend = HttpToolBackend::new(server.uri());
        let outcome = backend.execute(&invocation()).await.unwrap();
        assert_eq!(outcome.output, json!({"raw_response": "plain text"}));
    }

    #[tokio::test]
    async fn failing_webhook_becomes_an_error_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let backend = HttpToolBackend::new(server.uri()).with_max_retries(0);
        let outcome = backend.execute(&invocation()).await.unwrap();
        assert!(outcome.error.as_deref().unwrap().contains("500"));
    }

    #[tokio::test]
    async fn disabled_backend_resolves_to_an_error_outcome() {
        let backend = HttpToolBackend::disabled();
        let outcome = backend.execute(&invocation()).await.unwrap();
        assert_eq!(outcome.error.as_deref(), Some("no tool backend configured"));
    }
}
