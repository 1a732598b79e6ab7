// 🚀 Pipeline - load → normalize → reconcile → report → write
//
// `run` is the synchronous entry point. `spawn` runs the same pipeline on a
// worker thread and hands back a RunHandle that yields coarse progress and
// exactly one terminal outcome.

use crate::config::ReconConfig;
use crate::normalize::Normalizer;
use crate::parser::{read_table, SourceKind};
use crate::reconciliation::ReconciliationEngine;
use crate::report::{ReportBuilder, RunMetadata};
use crate::writer::write_results;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};
use tracing::info;

// ============================================================================
// REQUEST + SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Primary export (CSV)
    pub primary: PathBuf,
    /// Secondary layer (spreadsheet)
    pub secondary: PathBuf,
    /// Template workbook; only its row count is used
    pub template: PathBuf,
    /// Merged table destination (xlsx)
    pub output: PathBuf,
}

/// What a finished run hands back to its caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub perfect_matches: usize,
    pub partial_matches: usize,
    pub total_rows: usize,
    pub filled_path: PathBuf,
    pub report_path: PathBuf,
}

// ============================================================================
// STAGES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Loading,
    Normalizing,
    Reconciling,
    Writing,
    Done,
}

impl Stage {
    /// Progress percentage reached when the stage starts
    pub fn percent(&self) -> u16 {
        match self {
            Stage::Loading => 10,
            Stage::Normalizing => 40,
            Stage::Reconciling => 70,
            Stage::Writing => 90,
            Stage::Done => 100,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Stage::Loading => "Loading data files",
            Stage::Normalizing => "Cleaning data",
            Stage::Reconciling => "Matching records",
            Stage::Writing => "Saving results",
            Stage::Done => "Done",
        }
    }
}

// ============================================================================
// SYNCHRONOUS RUN
// ============================================================================

pub fn run(request: &RunRequest, config: &ReconConfig) -> Result<RunSummary> {
    run_with_progress(request, config, |_| {})
}

/// Full pipeline, reporting each stage as it starts
pub fn run_with_progress(
    request: &RunRequest,
    config: &ReconConfig,
    mut on_stage: impl FnMut(Stage),
) -> Result<RunSummary> {
    on_stage(Stage::Loading);
    info!(stage = Stage::Loading.label(), "pipeline stage");

    let mut primary = read_table(&request.primary, SourceKind::Primary, &config.csv)
        .with_context(|| format!("Failed to load {} data", config.primary.label))?;
    let mut secondary = read_table(&request.secondary, SourceKind::Secondary, &config.csv)
        .with_context(|| format!("Failed to load {} data", config.secondary.label))?;
    let template = read_table(&request.template, SourceKind::Template, &config.csv)
        .with_context(|| format!("Failed to load {} template", config.template_label))?;

    info!(
        primary = primary.len(),
        secondary = secondary.len(),
        template = template.len(),
        "data loaded"
    );

    let metadata = RunMetadata::now(&request.output)
        .with_input(&config.primary.label, &primary)
        .with_input(&config.secondary.label, &secondary)
        .with_input(&config.template_label, &template);
    let mut report = ReportBuilder::new(config, metadata);
    report.data_loading(&primary, &secondary, template.len());

    on_stage(Stage::Normalizing);
    info!(stage = Stage::Normalizing.label(), "pipeline stage");

    let normalizer = Normalizer::new(config);
    let primary_stats = normalizer.normalize_table(&mut primary);
    let secondary_stats = normalizer.normalize_table(&mut secondary);
    report.normalization(&primary_stats, &secondary_stats);

    on_stage(Stage::Reconciling);
    info!(stage = Stage::Reconciling.label(), "pipeline stage");

    let result = ReconciliationEngine::new(config).reconcile(&primary.records, &secondary.records);
    report.key_analysis(&result);
    report.match_results(&result);
    let report = report.finish();

    on_stage(Stage::Writing);
    info!(stage = Stage::Writing.label(), "pipeline stage");

    let written = write_results(&result, &report, config, &request.output)?;

    on_stage(Stage::Done);

    Ok(RunSummary {
        perfect_matches: report.counts.perfect_matches,
        partial_matches: report.counts.partial_matches,
        total_rows: report.counts.total_rows,
        filled_path: written.table_path,
        report_path: written.report_path,
    })
}

// ============================================================================
// BACKGROUND RUN
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Finished(RunSummary),
    /// Formatted error chain
    Failed(String),
}

impl RunOutcome {
    pub fn into_result(self) -> Result<RunSummary, String> {
        match self {
            RunOutcome::Finished(summary) => Ok(summary),
            RunOutcome::Failed(message) => Err(message),
        }
    }
}

enum RunMessage {
    Progress(Stage),
    Outcome(RunOutcome),
}

const WORKER_LOST: &str = "worker stopped before reporting a result";

pub struct RunHandle {
    receiver: Receiver<RunMessage>,
    stage: Option<Stage>,
    outcome: Option<RunOutcome>,
    worker: Option<JoinHandle<()>>,
}

/// Start the pipeline on a worker thread
pub fn spawn(request: RunRequest, config: ReconConfig) -> RunHandle {
    let (sender, receiver) = mpsc::channel();

    let worker = thread::spawn(move || {
        let progress = sender.clone();
        let outcome = match run_with_progress(&request, &config, |stage| {
            let _ = progress.send(RunMessage::Progress(stage));
        }) {
            Ok(summary) => RunOutcome::Finished(summary),
            Err(e) => RunOutcome::Failed(format!("{e:#}")),
        };
        // Receiver may already be gone; nothing left to tell
        let _ = sender.send(RunMessage::Outcome(outcome));
    });

    RunHandle {
        receiver,
        stage: None,
        outcome: None,
        worker: Some(worker),
    }
}

impl RunHandle {
    /// Drain pending messages without blocking
    pub fn poll(&mut self) -> Option<&RunOutcome> {
        while self.outcome.is_none() {
            match self.receiver.try_recv() {
                Ok(message) => self.apply(message),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.outcome = Some(RunOutcome::Failed(WORKER_LOST.to_string()));
                }
            }
        }
        if self.outcome.is_some() {
            self.join();
        }
        self.outcome.as_ref()
    }

    /// Block until the run ends
    pub fn wait(mut self) -> RunOutcome {
        while self.outcome.is_none() {
            match self.receiver.recv() {
                Ok(message) => self.apply(message),
                Err(_) => self.outcome = Some(RunOutcome::Failed(WORKER_LOST.to_string())),
            }
        }
        self.join();
        self.outcome
            .take()
            .unwrap_or_else(|| RunOutcome::Failed(WORKER_LOST.to_string()))
    }

    /// Last reported percentage (0 before the first stage)
    pub fn progress(&self) -> u16 {
        self.stage.map(|s| s.percent()).unwrap_or(0)
    }

    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    fn apply(&mut self, message: RunMessage) {
        match message {
            RunMessage::Progress(stage) => self.stage = Some(stage),
            RunMessage::Outcome(outcome) => self.outcome = Some(outcome),
        }
    }

    fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
