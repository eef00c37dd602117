//! The three pipeline stages.
//!
//! Extraction and classification each send one inference request and validate
//! the reply against the shape they expect. Logging calls the warehouse
//! directly.

pub mod classification;
pub mod extraction;
pub mod logging;

use serde::de::DeserializeOwned;
use tracing::debug;

use expensetracker_inference::{InferenceClient, InferenceRequest};
use expensetracker_shared::{ExpenseError, Result, StageName};

/// Remove a surrounding Markdown code fence (```` ```json ... ``` ````), if any.
pub(crate) fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`, `JSON`, ...) on the opening line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a model reply as `T`, mapping any failure to a schema violation.
pub(crate) fn parse_structured<T: DeserializeOwned>(stage: StageName, raw: &str) -> Result<T> {
    serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| ExpenseError::schema_violation(stage, format!("invalid JSON reply: {e}")))
}

/// Send `request` and return the raw reply.
pub(crate) async fn ask(client: &dyn InferenceClient, request: &InferenceRequest) -> Result<String> {
    debug!(
        stage = %request.stage,
        schema = request.output_schema,
        provider = client.provider_name(),
        "sending inference request"
    );
    let raw = client.complete(request).await?;
    debug!(stage = %request.stage, bytes = raw.len(), "inference reply received");
    Ok(raw)
}
