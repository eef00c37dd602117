//! End-to-end receipt pipeline: image → extraction → classification → logging.

use std::time::Instant;

use tracing::{info, instrument, warn};

use expensetracker_inference::{InferenceClient, create_client};
use expensetracker_shared::{
    AppConfig, ExpenseError, ImageRef, LogResult, PipelineInput, Result, RunId, StageName,
    journal_path,
};
use expensetracker_storage::{NewRun, RunOutcome, RunStatus, Storage};

use crate::stages::logging::ExpenseSink;
use crate::stages::{classification, extraction, logging};
use crate::state::PipelineState;

/// Lifecycle of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Pending,
    Running(StageName),
    Completed,
    Failed(StageName),
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Running(stage) => write!(f, "running({stage})"),
            Self::Completed => f.write_str("completed"),
            Self::Failed(stage) => write!(f, "failed({stage})"),
        }
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a stage starts.
    fn stage_started(&self, stage: StageName);
    /// Called when a stage finishes successfully.
    fn stage_completed(&self, stage: StageName);
    /// Called when a stage fails; the run stops here.
    fn stage_failed(&self, stage: StageName, error: &ExpenseError);
    /// Called when the expense has been logged.
    fn done(&self, result: &LogResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage_started(&self, _stage: StageName) {}
    fn stage_completed(&self, _stage: StageName) {}
    fn stage_failed(&self, _stage: StageName, _error: &ExpenseError) {}
    fn done(&self, _result: &LogResult) {}
}

/// Runs the three stages in order for a single invocation.
///
/// A runner is single-use: it starts `Pending`, passes through `Running` for
/// each stage, and ends `Completed` or `Failed`. Every status it enters is
/// kept in [`transitions`](Self::transitions).
pub struct PipelineRunner<'a> {
    client: &'a dyn InferenceClient,
    sink: &'a ExpenseSink,
    status: PipelineStatus,
    transitions: Vec<PipelineStatus>,
    state: PipelineState,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(client: &'a dyn InferenceClient, sink: &'a ExpenseSink) -> Self {
        Self {
            client,
            sink,
            status: PipelineStatus::Pending,
            transitions: vec![PipelineStatus::Pending],
            state: PipelineState::new(),
        }
    }

    pub fn status(&self) -> PipelineStatus {
        self.status
    }

    /// Every status entered so far, starting with `Pending`.
    pub fn transitions(&self) -> &[PipelineStatus] {
        &self.transitions
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    fn enter(&mut self, status: PipelineStatus) {
        self.status = status;
        self.transitions.push(status);
    }

    /// Execute extraction, classification and logging for `input`.
    ///
    /// Errors are returned wrapped in [`ExpenseError::Stage`].
    #[instrument(skip_all, fields(image = %input.image_path, provider = self.client.provider_name()))]
    pub async fn run(
        &mut self,
        input: &PipelineInput,
        progress: &dyn ProgressReporter,
    ) -> Result<LogResult> {
        if self.status != PipelineStatus::Pending {
            return Err(ExpenseError::validation(format!(
                "pipeline runner already used (status: {})",
                self.status
            )));
        }

        let image = ImageRef::parse(&input.image_path);
        let mut logged = None;

        for stage in StageName::ALL {
            self.enter(PipelineStatus::Running(stage));
            progress.stage_started(stage);

            match self.run_stage(stage, &image).await {
                Ok(result) => {
                    progress.stage_completed(stage);
                    if result.is_some() {
                        logged = result;
                    }
                }
                Err(e) => {
                    self.enter(PipelineStatus::Failed(stage));
                    progress.stage_failed(stage, &e);
                    warn!(%stage, error = %e, "pipeline stage failed");
                    return Err(e.in_stage(stage));
                }
            }
        }

        let result = logged.ok_or_else(|| {
            ExpenseError::validation("logging stage finished without a result")
                .in_stage(StageName::Logging)
        })?;
        self.enter(PipelineStatus::Completed);
        progress.done(&result);
        Ok(result)
    }

    async fn run_stage(&mut self, stage: StageName, image: &ImageRef) -> Result<Option<LogResult>> {
        match stage {
            StageName::Extraction => {
                extraction::run(self.client, image, &mut self.state).await?;
                Ok(None)
            }
            StageName::Classification => {
                classification::run(self.client, &mut self.state).await?;
                Ok(None)
            }
            StageName::Logging => logging::run(self.sink, &self.state, image).await.map(Some),
        }
    }
}

/// Run the pipeline once, recording the run in `journal` when one is given.
///
/// Journal failures are logged and never fail the run.
#[instrument(skip_all, fields(image = %input.image_path))]
pub async fn process_receipt_with(
    client: &dyn InferenceClient,
    sink: &ExpenseSink,
    journal: Option<&Storage>,
    input: &PipelineInput,
    progress: &dyn ProgressReporter,
) -> Result<LogResult> {
    let start = Instant::now();
    let run_id = RunId::new();
    info!(%run_id, "starting receipt pipeline");

    if let Some(journal) = journal {
        let new_run = NewRun {
            run_id: &run_id,
            image_ref: &input.image_path,
            provider: client.provider_name(),
            model: client.model_name(),
            project: sink.warehouse.project(),
        };
        if let Err(e) = journal.insert_run(&new_run).await {
            warn!(%run_id, error = %e, "could not journal run start");
        }
    }

    let mut runner = PipelineRunner::new(client, sink);
    let result = runner.run(input, progress).await;

    if let Some(journal) = journal {
        let state_json = runner.state().snapshot().ok();
        let outcome = match &result {
            Ok(log) => RunOutcome {
                status: RunStatus::Completed,
                failed_stage: None,
                error: None,
                record_id: Some(log.record_id.as_str()),
                state_json,
            },
            Err(e) => RunOutcome {
                status: RunStatus::Failed,
                failed_stage: e.stage(),
                error: Some(e.condition().to_string()),
                record_id: None,
                state_json,
            },
        };
        if let Err(e) = journal.finish_run(&run_id, &outcome).await {
            warn!(%run_id, error = %e, "could not journal run outcome");
        }
    }

    match &result {
        Ok(log) => info!(
            %run_id,
            record_id = %log.record_id,
            elapsed_ms = start.elapsed().as_millis(),
            "receipt pipeline complete"
        ),
        Err(e) => warn!(
            %run_id,
            error = %e,
            elapsed_ms = start.elapsed().as_millis(),
            "receipt pipeline failed"
        ),
    }
    result
}

/// Run the pipeline with the provider, warehouse and journal named by `config`.
pub async fn process_receipt(
    config: &AppConfig,
    input: &PipelineInput,
    progress: &dyn ProgressReporter,
) -> Result<LogResult> {
    let client = create_client(&config.inference)?;
    let sink = ExpenseSink::from_config(&config.warehouse)?;

    let journal = match journal_path() {
        Ok(path) => match Storage::open(&path).await {
            Ok(storage) => Some(storage),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "run journal unavailable");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "run journal unavailable");
            None
        }
    };

    process_receipt_with(client.as_ref(), &sink, journal.as_ref(), input, progress).await
}
