//! Extraction: receipt image reference → [`Receipt`].

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{info, instrument};

use expensetracker_inference::{InferenceClient, InferenceRequest};
use expensetracker_shared::{ExpenseError, ImageRef, LineItem, Receipt, Result, StageName};

use crate::state::PipelineState;

const STAGE: StageName = StageName::Extraction;

const INSTRUCTION: &str = "\
You are an OCR (optical character recognition) agent. Given the path to an image \
of a receipt, extract the vendor name, the transaction date, the total amount, and \
every line item with its description, quantity, and price.

Return the transaction date as YYYY-MM-DD. Do not assign an expense category.";

/// Field-for-field shape of the expected reply. Unknown fields, including any
/// category the model volunteers, are ignored.
#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    vendor_name: String,
    transaction_date: String,
    total_amount: f64,
    line_items: Vec<LineItem>,
}

/// Run extraction for `image` and record the receipt in `state`.
#[instrument(skip_all, fields(image = %image))]
pub async fn run(
    client: &dyn InferenceClient,
    image: &ImageRef,
    state: &mut PipelineState,
) -> Result<()> {
    let reference = image.as_reference();
    if reference.trim().is_empty() {
        return Err(ExpenseError::validation("image reference is empty"));
    }

    let request = InferenceRequest {
        stage: STAGE,
        instruction: INSTRUCTION.to_string(),
        payload: serde_json::json!({ "image_path": reference }),
        output_schema: "Receipt",
    };
    let raw = super::ask(client, &request).await?;
    let receipt = validate(super::parse_structured(STAGE, &raw)?)?;

    info!(
        vendor = %receipt.vendor_name,
        date = %receipt.transaction_date,
        total = receipt.total_amount,
        items = receipt.line_items.len(),
        "receipt extracted"
    );
    state.record_receipt(receipt)
}

fn validate(response: ExtractionResponse) -> Result<Receipt> {
    let vendor_name = response.vendor_name.trim().to_string();
    if vendor_name.is_empty() {
        return Err(ExpenseError::schema_violation(STAGE, "vendor_name is empty"));
    }

    let date = NaiveDate::parse_from_str(response.transaction_date.trim(), "%Y-%m-%d")
        .map_err(|e| {
            ExpenseError::schema_violation(
                STAGE,
                format!(
                    "transaction_date `{}` is not YYYY-MM-DD: {e}",
                    response.transaction_date
                ),
            )
        })?;

    if !response.total_amount.is_finite() || response.total_amount < 0.0 {
        return Err(ExpenseError::schema_violation(
            STAGE,
            format!("total_amount {} is not a non-negative number", response.total_amount),
        ));
    }

    for (i, item) in response.line_items.iter().enumerate() {
        if !item.price.is_finite() || item.price < 0.0 {
            return Err(ExpenseError::schema_violation(
                STAGE,
                format!("line_items[{i}].price {} is not a non-negative number", item.price),
            ));
        }
    }

    Ok(Receipt {
        vendor_name,
        transaction_date: date.format("%Y-%m-%d").to_string(),
        total_amount: response.total_amount,
        line_items: response.line_items,
        category: None,
    })
}
