use crate::config::LlmOptions;
use crate::error::{ConfigError, ModelError};
use crate::traits::{ChatMessage, CompletionRequest, LanguageModel};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    output: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Client for OpenAI-compatible `/chat/completions` endpoints (Together by default).
pub struct ChatCompletionClient {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl ChatCompletionClient {
    /// Fails before any network activity when the credential is absent.
    pub fn new(options: &LlmOptions, api_key: Option<String>) -> Result<Self, ConfigError> {
        let api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ConfigError::MissingCredential(options.api_key_env.clone()))?;

        let base = format!("{}/", options.base_url.trim_end_matches('/'));
        let endpoint = Url::parse(&base)?.join("chat/completions")?;

        let client = Client::builder().timeout(options.request_timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            model: options.model.clone(),
            api_key,
            timeout: options.request_timeout,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn transport(&self, error: reqwest::Error) -> ModelError {
        if error.is_timeout() {
            ModelError::Timeout(self.timeout)
        } else {
            ModelError::Transport(error.to_string())
        }
    }
}

fn completion_text(payload: ChatResponse) -> Result<String, ModelError> {
    payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .or(payload.output)
        .filter(|content| !content.trim().is_empty())
        .ok_or(ModelError::MissingCompletion)
}

#[async_trait]
impl LanguageModel for ChatCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|error| self.transport(error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let payload: ChatResponse = response.json().await.map_err(|error| self.transport(error))?;
        let text = completion_text(payload)?;
        debug!(model = %self.model, chars = text.len(), "completion received");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{serve_once, StubReply};

    #[test]
    fn missing_credential_fails_fast() {
        let result = ChatCompletionClient::new(&LlmOptions::default(), None);
        assert!(matches!(result, Err(ConfigError::MissingCredential(name)) if name == "TOGETHER_API_KEY"));

        let blank = ChatCompletionClient::new(&LlmOptions::default(), Some("  ".to_string()));
        assert!(matches!(blank, Err(ConfigError::MissingCredential(_))));
    }

    #[test]
    fn endpoint_is_joined_onto_base_url() -> Result<(), ConfigError> {
        let client = ChatCompletionClient::new(&LlmOptions::default(), Some("key".to_string()))?;
        assert_eq!(
            client.endpoint().as_str(),
            "https://api.together.xyz/v1/chat/completions"
        );
        Ok(())
    }

    #[test]
    fn completion_prefers_choices_then_output() -> Result<(), Box<dyn std::error::Error>> {
        let chat: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"{\"answer\":\"YES\"}"}}]}"#)?;
        assert_eq!(completion_text(chat)?, r#"{"answer":"YES"}"#);

        let legacy: ChatResponse = serde_json::from_str(r#"{"output":"plain text"}"#)?;
        assert_eq!(completion_text(legacy)?, "plain text");

        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#)?;
        assert!(matches!(completion_text(empty), Err(ModelError::MissingCompletion)));
        Ok(())
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            messages: vec![ChatMessage::system("base"), ChatMessage::user("Is dental covered?")],
            temperature: 0.2,
        }
    }

    fn client_for(base_url: &str, timeout: Duration) -> Result<ChatCompletionClient, ConfigError> {
        let options = LlmOptions {
            base_url: format!("{base_url}/v1"),
            request_timeout: timeout,
            ..LlmOptions::default()
        };
        ChatCompletionClient::new(&options, Some("secret".to_string()))
    }

    #[tokio::test]
    async fn successful_reply_returns_message_content() -> Result<(), Box<dyn std::error::Error>> {
        let (url, served) = serve_once(StubReply::new(
            200,
            r#"{"choices":[{"message":{"content":"{\"answer\":\"NO\"}"}}]}"#,
        ))
        .await;
        let client = client_for(&url, Duration::from_secs(5))?;

        let text = client.complete(&request()).await?;
        assert_eq!(text, r#"{"answer":"NO"}"#);

        let received = served.await?.to_ascii_lowercase();
        assert!(received.starts_with("post /v1/chat/completions "));
        assert!(received.contains("authorization: bearer secret"));
        assert!(received.contains(r#""temperature":0.2"#));
        assert!(received.contains(r#""stream":false"#));
        Ok(())
    }

    #[tokio::test]
    async fn error_status_keeps_code_and_body() -> Result<(), ConfigError> {
        let (url, _served) = serve_once(StubReply::new(503, "upstream busy")).await;
        let client = client_for(&url, Duration::from_secs(5))?;

        let result = client.complete(&request()).await;
        assert!(matches!(
            result,
            Err(ModelError::Status { status: 503, ref body }) if body == "upstream busy"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn malformed_body_is_a_transport_error() -> Result<(), ConfigError> {
        let (url, _served) = serve_once(StubReply::new(200, "<html>gateway</html>")).await;
        let client = client_for(&url, Duration::from_secs(5))?;

        let result = client.complete(&request()).await;
        assert!(matches!(result, Err(ModelError::Transport(_))));
        Ok(())
    }

    #[tokio::test]
    async fn slow_server_maps_to_timeout() -> Result<(), ConfigError> {
        let (url, _served) =
            serve_once(StubReply::new(200, "{}").delayed(Duration::from_secs(5))).await;
        let timeout = Duration::from_millis(200);
        let client = client_for(&url, timeout)?;

        let result = client.complete(&request()).await;
        assert!(matches!(result, Err(ModelError::Timeout(limit)) if limit == timeout));
        Ok(())
    }
}
