//! Shared types, error model, and configuration for the expense tracker.
//!
//! This crate is the foundation depended on by all other expense tracker crates.
//! It provides:
//! - [`ExpenseError`]: the unified error type
//! - Domain types ([`Receipt`], [`LineItem`], [`Category`], [`LogResult`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, InferenceConfig, ProviderKind, WarehouseConfig, config_dir, config_file_path,
    expand_home, init_config, journal_path, load_config, load_config_from, validate_api_key,
};
pub use error::{ExpenseError, Result};
pub use types::{
    Category, ImageRef, LineItem, LogResult, LogStatus, PipelineInput, Receipt, RunId, StageName,
    UnknownCategory,
};
