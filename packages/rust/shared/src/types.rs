//! Core domain types for expense receipts and pipeline results.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// StageName
// ---------------------------------------------------------------------------

/// The three pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Extraction,
    Classification,
    Logging,
}

impl StageName {
    /// All stages in the only supported order.
    pub const ALL: [StageName; 3] = [Self::Extraction, Self::Classification, Self::Logging];

    /// Position of this stage in the pipeline (0-based).
    pub fn index(&self) -> usize {
        match self {
            Self::Extraction => 0,
            Self::Classification => 1,
            Self::Logging => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Classification => "classification",
            Self::Logging => "logging",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// The closed set of expense categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Dining,
    Groceries,
    Fuel,
    Travel,
    Entertainment,
    Other,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Self::Dining,
        Self::Groceries,
        Self::Fuel,
        Self::Travel,
        Self::Entertainment,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dining => "Dining",
            Self::Groceries => "Groceries",
            Self::Fuel => "Fuel",
            Self::Travel => "Travel",
            Self::Entertainment => "Entertainment",
            Self::Other => "Other",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a label is not one of the six categories.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("`{0}` is not one of Dining, Groceries, Fuel, Travel, Entertainment, Other")]
pub struct UnknownCategory(pub String);

impl std::str::FromStr for Category {
    type Err = UnknownCategory;

    /// Labels match case-insensitively after trimming whitespace.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let label = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(label))
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Receipt
// ---------------------------------------------------------------------------

/// A single purchased item on a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Description of the item purchased.
    pub description: String,
    /// Quantity purchased.
    pub quantity: u32,
    /// Price of the item.
    pub price: f64,
}

/// Structured record of a parsed expense document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Name of the vendor or store.
    pub vendor_name: String,
    /// Transaction date in `YYYY-MM-DD` format.
    pub transaction_date: String,
    /// Total amount of the transaction.
    pub total_amount: f64,
    /// Items purchased, in receipt order.
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    /// Expense category. Always unset on extraction output.
    #[serde(default)]
    pub category: Option<Category>,
}

// ---------------------------------------------------------------------------
// LogResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Failure,
}

/// Acknowledgment returned by the logging stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogResult {
    pub status: LogStatus,
    /// Identifier of the appended warehouse row.
    pub record_id: String,
}

impl LogResult {
    pub fn success(record_id: impl Into<String>) -> Self {
        Self {
            status: LogStatus::Success,
            record_id: record_id.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline input
// ---------------------------------------------------------------------------

/// The single request accepted by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineInput {
    /// Path or URI of the receipt image.
    pub image_path: String,
}

/// Where the receipt image lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    Path(PathBuf),
    Uri(Url),
}

impl ImageRef {
    /// Interpret `raw` as a URI when it has a recognised scheme, otherwise as a path.
    pub fn parse(raw: &str) -> Self {
        match Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https" | "gs" | "s3" | "file") => {
                Self::Uri(url)
            }
            _ => Self::Path(PathBuf::from(raw)),
        }
    }

    /// String form sent to the model and stored alongside the row.
    pub fn as_reference(&self) -> String {
        match self {
            Self::Path(p) => p.to_string_lossy().into_owned(),
            Self::Uri(u) => u.to_string(),
        }
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_reference())
    }
}

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline invocation identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}
