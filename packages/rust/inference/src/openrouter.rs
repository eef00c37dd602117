//! OpenRouter chat-completions client (OpenAI-compatible API).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use expensetracker_shared::{ExpenseError, InferenceConfig, Result};

use crate::{InferenceClient, InferenceRequest};

/// User-Agent string for inference requests.
const USER_AGENT: &str = concat!("expensetracker/", env!("CARGO_PKG_VERSION"));

/// Inference client for any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug)]
pub struct OpenRouterClient {
    api_key: String,
    model: String,
    endpoint: String,
    client: reqwest::Client,
}

impl OpenRouterClient {
    /// Build a client from config, reading the API key from `api_key_env`.
    pub fn from_config(config: &InferenceConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ExpenseError::Authentication(format!(
                    "no API key: {} is not set",
                    config.api_key_env
                ))
            })?;
        Self::new(api_key, config.model.clone(), &config.base_url, config.timeout_secs)
    }

    pub fn new(api_key: String, model: String, base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ExpenseError::TransientIo(format!("client build: {e}")))?;

        Ok(Self {
            api_key,
            model,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            client,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Build the chat messages for a stage request.
fn build_messages(request: &InferenceRequest) -> Vec<ChatMessage> {
    let system = format!(
        "{}\n\nRespond with a single JSON object conforming to the {} schema and nothing else.",
        request.instruction.trim(),
        request.output_schema
    );
    vec![
        ChatMessage {
            role: "system",
            content: system,
        },
        ChatMessage {
            role: "user",
            content: request.payload.to_string(),
        },
    ]
}

/// Map a non-success HTTP status to the error taxonomy.
fn status_error(status: u16, body: &str) -> ExpenseError {
    let message = serde_json::from_str::<ApiErrorResponse>(body)
        .map(|r| r.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    match status {
        401 | 403 => ExpenseError::Authentication(message),
        408 | 429 | 500..=599 => ExpenseError::TransientIo(format!("HTTP {status}: {message}")),
        _ => ExpenseError::Inference { status, message },
    }
}

#[async_trait]
impl InferenceClient for OpenRouterClient {
    #[instrument(skip_all, fields(stage = %request.stage, model = %self.model))]
    async fn complete(&self, request: &InferenceRequest) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: build_messages(request),
            response_format: ResponseFormat {
                format_type: "json_object",
            },
            temperature: 0.1,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExpenseError::TransientIo(format!("{}: {e}", self.endpoint)))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ExpenseError::TransientIo(format!("{}: {e}", self.endpoint)))?;

        if !(200..300).contains(&status) {
            return Err(status_error(status, &text));
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            ExpenseError::schema_violation(request.stage, format!("malformed completion: {e}"))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                ExpenseError::schema_violation(request.stage, "completion has no content")
            })?;

        debug!(chars = content.len(), "completion received");
        Ok(content)
    }

    fn provider_name(&self) -> &'static str {
        "openrouter"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expensetracker_shared::StageName;
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> InferenceRequest {
        InferenceRequest {
            stage: StageName::Extraction,
            instruction: "Extract the receipt.".into(),
            payload: serde_json::json!({"image_path": "receipts/a.jpg"}),
            output_schema: "Receipt",
        }
    }

    fn client_for(server: &MockServer) -> OpenRouterClient {
        OpenRouterClient::new("test-key".into(), "test/model".into(), &server.uri(), 5)
            .expect("client")
    }

    #[test]
    fn system_message_names_the_schema() {
        let messages = build_messages(&request());
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.starts_with("Extract the receipt."));
        assert!(messages[0].content.contains("Receipt schema"));
        assert!(messages[1].content.contains("receipts/a.jpg"));
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(bearer_token("test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "test/model",
                "response_format": {"type": "json_object"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"category\":\"Fuel\"}"}}]
            })))
            .mount(&server)
            .await;

        let text = client_for(&server).complete(&request()).await.unwrap();
        assert_eq!(text, r#"{"category":"Fuel"}"#);
    }

    #[tokio::test]
    async fn unauthorized_maps_to_authentication() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"message": "No auth credentials found", "code": 401}
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).complete(&request()).await.unwrap_err();
        match err {
            ExpenseError::Authentication(msg) => assert!(msg.contains("No auth credentials")),
            other => panic!("expected Authentication, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
            .mount(&server)
            .await;

        let err = client_for(&server).complete(&request()).await.unwrap_err();
        assert!(matches!(err, ExpenseError::TransientIo(_)));
    }

    #[tokio::test]
    async fn bad_request_is_an_inference_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"message": "model not found"}
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).complete(&request()).await.unwrap_err();
        assert!(matches!(err, ExpenseError::Inference { status: 400, .. }));
    }

    #[tokio::test]
    async fn empty_choices_is_a_schema_violation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).complete(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            ExpenseError::SchemaViolation {
                stage: StageName::Extraction,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        // Nothing listens on port 9 (discard) in the test environment.
        let client =
            OpenRouterClient::new("k".into(), "m".into(), "http://127.0.0.1:9", 2).unwrap();
        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, ExpenseError::TransientIo(_)));
    }
}
