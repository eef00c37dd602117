//! Per-invocation pipeline state.
//!
//! Each stage records its output in a typed slot. Slots are written once and
//! never replaced, so a later stage always sees exactly what an earlier stage
//! produced.

use serde::Serialize;

use expensetracker_shared::{Category, ExpenseError, Receipt, Result, StageName};

/// State key holding the extraction output.
pub const EXTRACTED_RECEIPT: &str = "extracted_receipt";
/// State key holding the classification output.
pub const CLASSIFIED_CATEGORY: &str = "classified_category";

/// Append-only record of stage outputs for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineState {
    extracted_receipt: Option<Receipt>,
    classified_category: Option<Category>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the extraction output. Fails if a receipt was already recorded.
    pub fn record_receipt(&mut self, receipt: Receipt) -> Result<()> {
        if self.extracted_receipt.is_some() {
            return Err(ExpenseError::validation(format!(
                "`{EXTRACTED_RECEIPT}` is already set for this run"
            )));
        }
        self.extracted_receipt = Some(receipt);
        Ok(())
    }

    /// Store the classification output. Fails if a category was already recorded.
    pub fn record_category(&mut self, category: Category) -> Result<()> {
        if self.classified_category.is_some() {
            return Err(ExpenseError::validation(format!(
                "`{CLASSIFIED_CATEGORY}` is already set for this run"
            )));
        }
        self.classified_category = Some(category);
        Ok(())
    }

    /// The extracted receipt, as required by `stage`.
    pub fn receipt(&self, stage: StageName) -> Result<&Receipt> {
        self.extracted_receipt
            .as_ref()
            .ok_or_else(|| ExpenseError::missing_state(stage, EXTRACTED_RECEIPT))
    }

    /// The classified category, as required by `stage`.
    pub fn category(&self, stage: StageName) -> Result<Category> {
        self.classified_category
            .ok_or_else(|| ExpenseError::missing_state(stage, CLASSIFIED_CATEGORY))
    }

    /// JSON snapshot keyed by the well-known state keys.
    pub fn snapshot(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| ExpenseError::validation(format!("cannot snapshot pipeline state: {e}")))
    }
}
