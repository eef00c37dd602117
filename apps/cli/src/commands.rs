//! CLI command definitions, routing, and tracing setup.

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use expensetracker_core::{ExpenseSink, ProgressReporter, process_receipt};
use expensetracker_shared::{
    AppConfig, ExpenseError, LogResult, PipelineInput, StageName, init_config, journal_path,
    load_config, validate_api_key,
};
use expensetracker_storage::{Cell, Storage};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Expense tracker: receipt image in, categorized expense row out.
#[derive(Parser)]
#[command(
    name = "expensetracker",
    version,
    about = "Extract, classify and log receipt expenses.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run a receipt image through extraction, classification and logging.
    Process {
        /// Path or URI of the receipt image.
        image_path: String,

        /// Print the log result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the most recently logged expenses.
    Expenses {
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Show recent pipeline runs from the run journal.
    Runs {
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "expensetracker=warn",
        1 => "expensetracker=info",
        2 => "expensetracker=debug",
        _ => "expensetracker=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Process { image_path, json } => cmd_process(&image_path, json).await,
        Command::Expenses { limit } => cmd_expenses(limit).await,
        Command::Runs { limit } => cmd_runs(limit).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_process(image_path: &str, json: bool) -> Result<()> {
    // Validate API key before doing anything
    let config = load_config()?;
    validate_api_key(&config)?;

    let project = config.warehouse.resolve_project();
    info!(
        image_path,
        provider = ?config.inference.provider,
        %project,
        "processing receipt"
    );

    let input = PipelineInput {
        image_path: image_path.to_string(),
    };
    let reporter = CliProgress::new(json);
    let result = process_receipt(&config, &input, &reporter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!();
    println!("  Expense logged!");
    println!("  Record:  {}", result.record_id);
    println!(
        "  Table:   {project}.{}.{}",
        config.warehouse.dataset, config.warehouse.table
    );
    println!();

    Ok(())
}

async fn cmd_expenses(limit: u32) -> Result<()> {
    let config = load_config()?;
    let sink = ExpenseSink::from_config(&config.warehouse)?;
    let rows = sink.recent(limit).await?;

    if rows.is_empty() {
        println!(
            "No expenses logged in {}.{}.{} yet.",
            sink.warehouse.project(),
            sink.dataset,
            sink.table
        );
        return Ok(());
    }

    let text = |row: &expensetracker_storage::Row, col: &str| {
        row.get(col).map(Cell::to_string).unwrap_or_default()
    };

    println!(
        "{:<10}  {:<28}  {:<13}  {:>10}  RECORD",
        "DATE", "VENDOR", "CATEGORY", "TOTAL"
    );
    for row in &rows {
        let total = row
            .get("total_amount")
            .and_then(Cell::as_real)
            .map(|t| format!("{t:.2}"))
            .unwrap_or_default();
        println!(
            "{:<10}  {:<28}  {:<13}  {:>10}  {}",
            text(row, "transaction_date"),
            truncate(&text(row, "vendor_name"), 28),
            text(row, "category"),
            total,
            text(row, "record_id"),
        );
    }
    Ok(())
}

async fn cmd_runs(limit: u32) -> Result<()> {
    let path = journal_path()?;
    if !path.exists() {
        println!("No runs recorded yet.");
        return Ok(());
    }

    let journal = Storage::open(&path).await?;
    let runs = journal.list_runs(limit).await?;
    if runs.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }

    for run in runs {
        let detail = match (&run.record_id, &run.failed_stage, &run.error) {
            (Some(record), _, _) => format!("record {record}"),
            (None, Some(stage), Some(error)) => format!("{stage}: {error}"),
            (None, _, Some(error)) => error.clone(),
            _ => String::new(),
        };
        println!(
            "{}  {:<9}  {:<8}  {}  {}",
            run.started_at, run.status.as_str(), run.provider, run.image_ref, detail
        );
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    println!(
        "# resolved project: {}",
        config.warehouse.resolve_project()
    );
    let root = config
        .warehouse
        .root_path()
        .map_err(|e| eyre!("cannot resolve warehouse root: {e}"))?;
    println!("# warehouse root:   {}", root.display());
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new(quiet: bool) -> Self {
        if quiet {
            return Self {
                spinner: ProgressBar::hidden(),
            };
        }
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn stage_started(&self, stage: StageName) {
        let message = match stage {
            StageName::Extraction => "Extracting receipt",
            StageName::Classification => "Classifying expense",
            StageName::Logging => "Logging to warehouse",
        };
        self.spinner
            .set_message(format!("[{}/3] {message}", stage.index() + 1));
    }

    fn stage_completed(&self, _stage: StageName) {}

    fn stage_failed(&self, stage: StageName, _error: &ExpenseError) {
        self.spinner
            .abandon_with_message(format!("{stage} stage failed"));
    }

    fn done(&self, _result: &LogResult) {
        self.spinner.finish_and_clear();
    }
}
