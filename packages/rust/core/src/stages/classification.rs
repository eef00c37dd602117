//! Classification: extracted receipt → [`Category`].

use tracing::{info, instrument};

use expensetracker_inference::{InferenceClient, InferenceRequest};
use expensetracker_shared::{Category, ExpenseError, Result, StageName};

use crate::state::PipelineState;

const STAGE: StageName = StageName::Classification;

const INSTRUCTION: &str = "\
You are an expense categorization agent. Given the structured data from a receipt, \
determine the most appropriate expense category by analyzing the vendor name and the \
descriptions of the line items.

The possible categories are: Dining, Groceries, Fuel, Travel, Entertainment, and Other.
Return the category as {\"category\": \"<one of the above>\"}.";

/// Classify the receipt recorded in `state` and record the category.
#[instrument(skip_all)]
pub async fn run(client: &dyn InferenceClient, state: &mut PipelineState) -> Result<Category> {
    let receipt = state.receipt(STAGE)?;
    let payload = serde_json::to_value(receipt)
        .map_err(|e| ExpenseError::validation(format!("cannot encode receipt: {e}")))?;

    let request = InferenceRequest {
        stage: STAGE,
        instruction: INSTRUCTION.to_string(),
        payload,
        output_schema: "ClassificationOutput",
    };
    let raw = super::ask(client, &request).await?;
    let category = parse_category(&raw)?;

    info!(%category, "receipt classified");
    state.record_category(category)?;
    Ok(category)
}

/// Accepts `{"category": "..."}`, a JSON string, or a bare label.
fn parse_category(raw: &str) -> Result<Category> {
    let body = super::strip_code_fence(raw);

    let label = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => match map.get("category") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(ExpenseError::schema_violation(
                    STAGE,
                    format!("category must be a string, got {other}"),
                ));
            }
            None => {
                return Err(ExpenseError::schema_violation(STAGE, "reply has no `category` field"));
            }
        },
        Ok(serde_json::Value::String(s)) => s,
        Ok(other) => {
            return Err(ExpenseError::schema_violation(
                STAGE,
                format!("expected a category, got {other}"),
            ));
        }
        Err(_) => body.to_string(),
    };

    label
        .parse::<Category>()
        .map_err(|e| ExpenseError::schema_violation(STAGE, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use expensetracker_inference::FakeInferenceClient;
    use expensetracker_shared::Receipt;

    fn extracted_state() -> PipelineState {
        let mut state = PipelineState::new();
        state
            .record_receipt(Receipt {
                vendor_name: "Shell".into(),
                transaction_date: "2025-06-02".into(),
                total_amount: 45.48,
                line_items: vec![],
                category: None,
            })
            .unwrap();
        state
    }

    #[test]
    fn accepted_reply_shapes() {
        assert_eq!(parse_category(r#"{"category": "Fuel"}"#).unwrap(), Category::Fuel);
        assert_eq!(parse_category(r#""Dining""#).unwrap(), Category::Dining);
        assert_eq!(parse_category("Travel\n").unwrap(), Category::Travel);
        assert_eq!(parse_category("groceries").unwrap(), Category::Groceries);
        assert_eq!(
            parse_category("```json\n{\"category\": \"Other\"}\n```").unwrap(),
            Category::Other
        );
    }

    #[test]
    fn labels_outside_the_enumeration_are_rejected() {
        for raw in [
            r#"{"category": "Office Supplies"}"#,
            r#"{"category": 3}"#,
            r#"{"label": "Fuel"}"#,
            "[\"Fuel\"]",
            "",
        ] {
            let err = parse_category(raw).unwrap_err();
            assert!(
                matches!(err, ExpenseError::SchemaViolation { stage: STAGE, .. }),
                "{raw}: {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn classifies_recorded_receipt() {
        let client = FakeInferenceClient::new().with_response(STAGE, r#"{"category": "Fuel"}"#);
        let mut state = extracted_state();

        let category = run(&client, &mut state).await.expect("classify");
        assert_eq!(category, Category::Fuel);
        assert_eq!(state.category(StageName::Logging).unwrap(), Category::Fuel);

        let requests = client.requests();
        assert_eq!(requests[0].payload["vendor_name"], "Shell");
    }

    #[tokio::test]
    async fn without_extraction_is_missing_state() {
        let client = FakeInferenceClient::new().with_response(STAGE, r#"{"category": "Fuel"}"#);
        let mut state = PipelineState::new();

        let err = run(&client, &mut state).await.unwrap_err();
        assert!(matches!(err, ExpenseError::MissingState { stage: STAGE, .. }));
        assert!(client.requests().is_empty());
    }
}
