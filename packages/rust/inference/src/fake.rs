//! Scripted inference client for tests.
//!
//! Replies are queued per stage and consumed in order; every request is
//! recorded so tests can assert on what each stage actually sent.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use expensetracker_shared::{ExpenseError, Result, StageName};

use crate::{InferenceClient, InferenceRequest};

#[derive(Debug)]
enum Reply {
    Text(String),
    Fail(ExpenseError),
}

/// A fake inference client with per-stage scripted replies.
#[derive(Debug, Default)]
pub struct FakeInferenceClient {
    replies: Mutex<HashMap<StageName, VecDeque<Reply>>>,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl FakeInferenceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw text reply for the next request from `stage`.
    pub fn with_response(self, stage: StageName, text: impl Into<String>) -> Self {
        self.push(stage, Reply::Text(text.into()));
        self
    }

    /// Queue a failure for the next request from `stage`.
    pub fn with_error(self, stage: StageName, error: ExpenseError) -> Self {
        self.push(stage, Reply::Fail(error));
        self
    }

    fn push(&self, stage: StageName, reply: Reply) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(stage)
            .or_default()
            .push_back(reply);
    }

    /// All requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl InferenceClient for FakeInferenceClient {
    async fn complete(&self, request: &InferenceRequest) -> Result<String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&request.stage)
            .and_then(VecDeque::pop_front);

        match reply {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(err)) => Err(err),
            None => Err(ExpenseError::TransientIo(format!(
                "FakeInferenceClient: no reply scripted for stage {}",
                request.stage
            ))),
        }
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }

    fn model_name(&self) -> &str {
        "fake-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(stage: StageName) -> InferenceRequest {
        InferenceRequest {
            stage,
            instruction: "test".into(),
            payload: serde_json::Value::Null,
            output_schema: "Test",
        }
    }

    #[tokio::test]
    async fn replies_are_consumed_in_order() {
        let client = FakeInferenceClient::new()
            .with_response(StageName::Classification, "first")
            .with_response(StageName::Classification, "second");

        let r = request(StageName::Classification);
        assert_eq!(client.complete(&r).await.unwrap(), "first");
        assert_eq!(client.complete(&r).await.unwrap(), "second");
        assert!(client.complete(&r).await.is_err());
        assert_eq!(client.requests().len(), 3);
    }

    #[tokio::test]
    async fn replies_are_scoped_by_stage() {
        let client = FakeInferenceClient::new()
            .with_error(StageName::Extraction, ExpenseError::Authentication("bad key".into()));

        let err = client
            .complete(&request(StageName::Extraction))
            .await
            .unwrap_err();
        assert!(matches!(err, ExpenseError::Authentication(_)));
        assert!(client.complete(&request(StageName::Classification)).await.is_err());
    }
}
