//! Model inference boundary for the pipeline stages.
//!
//! Each stage hands an [`InferenceRequest`] (instruction + JSON payload + the
//! name of the schema it expects back) to an [`InferenceClient`] and receives
//! the raw model text. Schema validation is the stage's job, not the client's.

mod fake;
mod mock;
mod openrouter;

pub use fake::FakeInferenceClient;
pub use mock::MockReceiptModel;
pub use openrouter::OpenRouterClient;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use expensetracker_shared::{InferenceConfig, ProviderKind, Result, StageName};

/// One structured-output request sent on behalf of a stage.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceRequest {
    /// Stage issuing the request.
    pub stage: StageName,
    /// Natural-language instruction for the model.
    pub instruction: String,
    /// Input data the instruction refers to.
    pub payload: serde_json::Value,
    /// Name of the JSON shape the response must conform to.
    pub output_schema: &'static str,
}

/// Trait for inference backends.
///
/// Implementations must be thread-safe; independent pipeline runs may share one client.
#[async_trait]
pub trait InferenceClient: Send + Sync + fmt::Debug {
    /// Send the request and return the model's raw text response.
    async fn complete(&self, request: &InferenceRequest) -> Result<String>;

    /// Provider name (e.g., "openrouter", "mock", "fake").
    fn provider_name(&self) -> &'static str;

    /// Model identifier used for every request.
    fn model_name(&self) -> &str;
}

/// Build the client selected by `[inference] provider`.
pub fn create_client(config: &InferenceConfig) -> Result<Box<dyn InferenceClient>> {
    match config.provider {
        ProviderKind::Mock => Ok(Box::new(MockReceiptModel::new())),
        ProviderKind::OpenRouter => Ok(Box::new(OpenRouterClient::from_config(config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds_mock_client() {
        let client = create_client(&InferenceConfig::default()).expect("mock client");
        assert_eq!(client.provider_name(), "mock");
    }

    #[test]
    fn openrouter_without_key_is_an_auth_error() {
        let config = InferenceConfig {
            provider: ProviderKind::OpenRouter,
            api_key_env: "EXPENSE_TEST_NONEXISTENT_KEY_67890".into(),
            ..Default::default()
        };
        let err = create_client(&config).unwrap_err();
        assert!(matches!(
            err,
            expensetracker_shared::ExpenseError::Authentication(_)
        ));
    }

    #[test]
    fn request_serializes_stage_name() {
        let request = InferenceRequest {
            stage: StageName::Classification,
            instruction: "classify".into(),
            payload: serde_json::json!({"vendor_name": "Shell"}),
            output_schema: "ClassificationOutput",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stage"], "classification");
        assert_eq!(json["output_schema"], "ClassificationOutput");
    }
}
