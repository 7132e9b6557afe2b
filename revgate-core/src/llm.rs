//! Chat-completion client for the external review model.
//!
//! Two wire dialects are spoken, chosen by the configured endpoint: Ollama's
//! native `/api/chat` and the OpenAI-compatible `chat/completions` shape.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::LlmSettings;
use crate::error::LlmError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_owned(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_owned(), content: content.into() }
    }
}

/// One chat call. Unset knobs are filled from the client's settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages, ..Self::default() }
    }
}

/// The `chat(request) -> text` collaborator the analysis pipeline depends on.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Sends the conversation and returns the model's reply text.
    async fn chat(&self, request: ChatRequest) -> Result<String, LlmError>;

    /// Whether the endpoint answers at all.
    async fn health_check(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Ollama,
    OpenAi,
}

impl Dialect {
    fn for_endpoint(endpoint: &str) -> Self {
        if endpoint.contains("/api/chat") { Dialect::Ollama } else { Dialect::OpenAi }
    }
}

/// reqwest-backed [`ChatModel`].
#[derive(Clone)]
pub struct HttpChatClient {
    client: reqwest::Client,
    settings: LlmSettings,
    dialect: Dialect,
}

impl HttpChatClient {
    /// # Errors
    ///
    /// Returns `LlmError::Http` if the TLS backend cannot be initialised.
    pub fn new(settings: LlmSettings) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let dialect = Dialect::for_endpoint(&settings.endpoint);
        Ok(Self { client, settings, dialect })
    }

    fn request_body(&self, request: &ChatRequest) -> Value {
        let model = request.model.as_deref().unwrap_or(&self.settings.model);
        let temperature = request.temperature.unwrap_or(self.settings.temperature);
        let max_tokens = request.max_tokens.unwrap_or(self.settings.max_tokens);

        match self.dialect {
            Dialect::Ollama => json!({
                "model": model,
                "stream": false,
                "options": { "temperature": temperature, "num_predict": max_tokens },
                "messages": request.messages,
            }),
            Dialect::OpenAi => json!({
                "model": model,
                "temperature": temperature,
                "max_tokens": max_tokens,
                "messages": request.messages,
            }),
        }
    }

    fn health_url(&self) -> String {
        let endpoint = &self.settings.endpoint;
        if endpoint.contains("/api/chat") {
            endpoint.replace("/api/chat", "/api/tags")
        } else if endpoint.contains("/v1/chat/completions") {
            endpoint.replace("/v1/chat/completions", "/v1/models")
        } else {
            endpoint.clone()
        }
    }
}

/// Pulls the reply text out of a response body, `None` if the shape is unexpected.
fn extract_content(dialect: Dialect, body: &Value) -> Option<&str> {
    let message = match dialect {
        Dialect::Ollama => body.get("message"),
        Dialect::OpenAi => body.get("choices")?.get(0)?.get("message"),
    };
    message?.get("content")?.as_str()
}

#[async_trait]
impl ChatModel for HttpChatClient {
    async fn chat(&self, request: ChatRequest) -> Result<String, LlmError> {
        let body = self.request_body(&request);

        let mut builder = self.client.post(&self.settings.endpoint).json(&body);
        if let Some(key) = self.settings.api_key() {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(LlmError::Status { status: status.as_u16(), body: text });
        }

        let parsed = serde_json::from_str::<Value>(&text).ok();
        match parsed.as_ref().and_then(|v| extract_content(self.dialect, v)) {
            Some(content) => Ok(content.to_owned()),
            None => {
                debug!(endpoint = %self.settings.endpoint, "reply has no content field, using raw body");
                Ok(text)
            }
        }
    }

    async fn health_check(&self) -> bool {
        let url = self.health_url();
        let mut builder = self.client.get(&url);
        if let Some(key) = self.settings.api_key() {
            builder = builder.bearer_auth(key);
        }
        match builder.send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(url = %url, error = %e, "model endpoint unreachable");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(endpoint: String, api_key: Option<&str>) -> HttpChatClient {
        HttpChatClient::new(LlmSettings {
            endpoint,
            api_key: api_key.map(str::to_owned),
            ..LlmSettings::default()
        })
        .expect("client")
    }

    fn request() -> ChatRequest {
        ChatRequest::new(vec![ChatMessage::system("sys"), ChatMessage::user("diff")])
    }

    #[tokio::test]
    async fn ollama_dialect_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({
                "model": "codellama:13b",
                "stream": false,
                "options": { "num_predict": 4096 },
                "messages": [{"role": "system", "content": "sys"}, {"role": "user", "content": "diff"}],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "codellama:13b",
                "message": { "role": "assistant", "content": "[]" },
                "done": true,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = client(format!("{}/api/chat", server.uri()), None)
            .chat(request())
            .await
            .expect("chat");
        assert_eq!(reply, "[]");
    }

    #[tokio::test]
    async fn openai_dialect_sends_bearer_and_overrides() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({ "model": "gpt-test", "max_tokens": 256 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "index": 0, "message": { "role": "assistant", "content": "ok" } }],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut req = request();
        req.model = Some("gpt-test".into());
        req.max_tokens = Some(256);
        let reply = client(format!("{}/v1/chat/completions", server.uri()), Some("sk-test"))
            .chat(req)
            .await
            .expect("chat");
        assert_eq!(reply, "ok");
    }

    #[tokio::test]
    async fn unexpected_shape_returns_raw_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("plain text reply"))
            .mount(&server)
            .await;

        let reply = client(format!("{}/v1/chat/completions", server.uri()), None)
            .chat(request())
            .await
            .expect("chat");
        assert_eq!(reply, "plain text reply");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = client(format!("{}/api/chat", server.uri()), None)
            .chat(request())
            .await
            .unwrap_err();
        match err {
            LlmError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "overloaded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn health_check_probes_listing_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
            .mount(&server)
            .await;

        assert!(client(format!("{}/api/chat", server.uri()), None).health_check().await);
        // Nothing mounted at /v1/models, so the mock server answers 404.
        assert!(
            !client(format!("{}/v1/chat/completions", server.uri()), None)
                .health_check()
                .await
        );
    }

    #[test]
    fn health_url_rewrites() {
        let ollama = client("http://h:11434/api/chat".into(), None);
        assert_eq!(ollama.health_url(), "http://h:11434/api/tags");
        let openai = client("http://h/v1/chat/completions".into(), None);
        assert_eq!(openai.health_url(), "http://h/v1/models");
    }
}
