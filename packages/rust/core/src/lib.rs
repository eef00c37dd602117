//! Pipeline orchestration for the expense tracker.
//!
//! Ties the inference and storage crates together into the receipt workflow
//! (extraction → classification → logging) exposed as [`process_receipt`].

pub mod pipeline;
pub mod stages;
pub mod state;

pub use pipeline::{
    PipelineRunner, PipelineStatus, ProgressReporter, SilentProgress, process_receipt,
    process_receipt_with,
};
pub use stages::logging::{EXPENSE_TABLE_SCHEMA, ExpenseSink};
pub use state::PipelineState;
