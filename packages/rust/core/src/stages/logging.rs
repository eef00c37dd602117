//! Logging: receipt + category → one warehouse row.

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use expensetracker_shared::{
    ExpenseError, ImageRef, LogResult, Result, StageName, WarehouseConfig,
};
use expensetracker_storage::{ColumnDef, Row, SqlType, TableSchema, Warehouse};

use crate::state::PipelineState;

const STAGE: StageName = StageName::Logging;

/// Columns of the expenses table.
pub const EXPENSE_TABLE_SCHEMA: TableSchema = TableSchema {
    columns: &[
        ColumnDef::required("record_id", SqlType::Text),
        ColumnDef::required("vendor_name", SqlType::Text),
        ColumnDef::required("transaction_date", SqlType::Text),
        ColumnDef::required("total_amount", SqlType::Real),
        ColumnDef::required("category", SqlType::Text),
        // JSON array of line items
        ColumnDef::nullable("line_items", SqlType::Text),
        ColumnDef::nullable("source_image", SqlType::Text),
        ColumnDef::required("logged_at", SqlType::Text),
    ],
};

/// Where expense rows go: one table in one dataset of a warehouse project.
#[derive(Debug, Clone)]
pub struct ExpenseSink {
    pub warehouse: Warehouse,
    pub dataset: String,
    pub table: String,
}

impl ExpenseSink {
    pub fn new(warehouse: Warehouse, dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            warehouse,
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// Resolve root, project, dataset and table from `[warehouse]` config.
    pub fn from_config(config: &WarehouseConfig) -> Result<Self> {
        let warehouse = Warehouse::new(config.root_path()?, config.resolve_project())?;
        Ok(Self::new(warehouse, &config.dataset, &config.table))
    }

    /// Most recent expense rows, newest first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<Row>> {
        self.warehouse
            .list_rows(&self.dataset, &self.table, limit)
            .await
    }
}

/// Append the classified receipt in `state` to the sink.
#[instrument(skip_all, fields(project = sink.warehouse.project(), table = %sink.table))]
pub async fn run(
    sink: &ExpenseSink,
    state: &PipelineState,
    source_image: &ImageRef,
) -> Result<LogResult> {
    let receipt = state.receipt(STAGE)?;
    let category = state.category(STAGE)?;

    let line_items = serde_json::to_string(&receipt.line_items)
        .map_err(|e| ExpenseError::validation(format!("cannot encode line items: {e}")))?;
    let record_id = Uuid::now_v7().to_string();

    let row = Row::new()
        .text("record_id", &record_id)
        .text("vendor_name", &receipt.vendor_name)
        .text("transaction_date", &receipt.transaction_date)
        .real("total_amount", receipt.total_amount)
        .text("category", category.as_str())
        .text("line_items", line_items)
        .text("source_image", source_image.as_reference())
        .text("logged_at", Utc::now().to_rfc3339());

    sink.warehouse
        .append_row(&sink.dataset, &sink.table, &EXPENSE_TABLE_SCHEMA, row)
        .await?;

    info!(%record_id, %category, "expense logged");
    Ok(LogResult::success(record_id))
}
