//! End-to-end article pipeline: keyword → analysis → generation → links →
//! assembly → publish.
//!
//! [`Pipeline::execute`] runs the fifteen stages strictly in order. Each stage
//! is looked up in the [`StageRegistry`], guarded by its prerequisites and a
//! timeout, and its output folded into the [`PipelineState`]. Critical
//! failures end the run; other failures are recorded as warnings.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use postforge_shared::{
    AppConfig, FinalDocument, LinkingConfig, PublishStatus, PublishedPost, QaReport,
    StructureConstraints,
};

use crate::collaborators::Services;
use crate::error::PipelineError;
use crate::events::{PipelineObserver, TracingObserver};
use crate::handlers::{StageContext, StageRegistry};
use crate::stages::{self, STAGE_COUNT};
use crate::state::{PipelineState, RunStatus, StageOutput, StageWarning};

/// Settings a run needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Site the article is published to.
    pub site_url: String,
    /// How many published posts to fetch as link targets.
    pub discovery_limit: u32,
    /// How many prior articles to fetch as context.
    pub prior_limit: u32,
    pub linking: LinkingConfig,
    pub structure: StructureConstraints,
    pub publish_status: PublishStatus,
    pub categories: Vec<u64>,
    pub tags: Vec<u64>,
    /// Run every stage but skip the remote publish call.
    pub dry_run: bool,
    /// Use this timeout for every stage instead of the table's.
    pub timeout_override: Option<Duration>,
}

impl PipelineConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            site_url: config.site.base_url.clone(),
            discovery_limit: config.site.discovery_limit,
            prior_limit: config.site.prior_limit,
            linking: config.linking.clone(),
            structure: config.generation.structure.clone(),
            publish_status: config.defaults.publish_status,
            categories: config.site.category_ids.clone(),
            tags: config.site.tag_ids.clone(),
            dry_run: config.defaults.dry_run,
            timeout_override: None,
        }
    }
}

/// Input for one run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub keyword: String,
    pub title: String,
    /// The article's own URL; never used as a link target.
    pub target_url: Option<String>,
    /// Update this remote post instead of creating one.
    pub post_id: Option<u64>,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub document: FinalDocument,
    pub qa: Option<QaReport>,
    /// `None` on dry runs.
    pub publication: Option<PublishedPost>,
    pub warnings: Vec<StageWarning>,
    pub state: PipelineState,
}

/// Where and why a run stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFailure {
    pub stage: u8,
    pub message: String,
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = stages::definition(self.stage)
            .map(|d| d.name)
            .unwrap_or("unknown");
        write!(f, "stage {} ({name}): {}", self.stage, self.message)
    }
}

/// How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(RunReport),
    Failed {
        failure: RunFailure,
        state: PipelineState,
    },
    /// Cancelled between stages; the state can be resumed.
    Paused { state: PipelineState },
}

impl RunOutcome {
    pub fn state(&self) -> &PipelineState {
        match self {
            Self::Completed(report) => &report.state,
            Self::Failed { state, .. } | Self::Paused { state } => state,
        }
    }

    pub fn into_state(self) -> PipelineState {
        match self {
            Self::Completed(report) => report.state,
            Self::Failed { state, .. } | Self::Paused { state } => state,
        }
    }
}

/// The stage orchestrator.
pub struct Pipeline {
    registry: StageRegistry,
    services: Services,
    config: PipelineConfig,
    observer: Arc<dyn PipelineObserver>,
}

impl Pipeline {
    /// Pipeline with the standard handlers, logging through `tracing`.
    pub fn new(services: Services, config: PipelineConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            registry: StageRegistry::standard()?,
            services,
            config,
            observer: Arc::new(TracingObserver),
        })
    }

    pub fn with_registry(mut self, registry: StageRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage for a new article.
    #[instrument(skip_all, fields(keyword = %request.keyword))]
    pub async fn execute(&self, request: RunRequest, cancel: &CancellationToken) -> RunOutcome {
        let mut state = PipelineState::new(request.keyword, request.title);
        state.target_url = request.target_url;
        state.post_id = request.post_id;
        info!(run_id = %state.run_id, "starting run");
        self.drive(state, cancel).await
    }

    /// Continue a paused (or interrupted) run from its first incomplete stage.
    #[instrument(skip_all, fields(run_id = %state.run_id))]
    pub async fn resume(
        &self,
        state: PipelineState,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        if matches!(state.status, RunStatus::Completed | RunStatus::Failed) {
            return Err(PipelineError::Configuration(format!(
                "run {} is already {}",
                state.run_id, state.status
            )));
        }
        let next = state.next_stage().unwrap_or(STAGE_COUNT);
        info!(next, completed = state.completed_steps.len(), "resuming run");
        if let Some(def) = stages::definition(next) {
            self.observer.message(
                def,
                &format!("resuming with {} stages done", state.completed_steps.len()),
            );
        }
        Ok(self.drive(state, cancel).await)
    }

    /// Run one stage against `state` without folding its output in.
    ///
    /// Fails with [`PipelineError::PrerequisiteViolation`] and runs nothing
    /// if any earlier stage is incomplete.
    pub async fn execute_stage(
        &self,
        state: &PipelineState,
        ordinal: u8,
        cancel: &CancellationToken,
    ) -> Result<StageOutput, PipelineError> {
        let def = stages::definition(ordinal).ok_or_else(|| {
            PipelineError::Configuration(format!("stage {ordinal} is not in the stage table"))
        })?;

        let missing = state.missing_prerequisites(ordinal);
        if !missing.is_empty() {
            return Err(PipelineError::PrerequisiteViolation {
                stage: ordinal,
                missing,
            });
        }

        let handler = self.registry.get(ordinal).ok_or_else(|| {
            PipelineError::Configuration(format!("no handler registered for stage {ordinal}"))
        })?;
        let ctx = StageContext {
            services: &self.services,
            config: &self.config,
            cancel,
            observer: self.observer.as_ref(),
        };

        let limit = self.config.timeout_override.unwrap_or(def.timeout);
        match tokio::time::timeout(limit, handler.run(&ctx, state)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::execution(
                ordinal,
                format!("timed out after {}ms", limit.as_millis()),
            )),
        }
    }

    async fn drive(&self, mut state: PipelineState, cancel: &CancellationToken) -> RunOutcome {
        let started = Instant::now();
        let total = usize::from(STAGE_COUNT);
        state.status = RunStatus::Running;
        state.error = None;
        state.failed_stage = None;

        while let Some(ordinal) = state.next_stage() {
            if cancel.is_cancelled() {
                state.status = RunStatus::Paused;
                state.current_step = ordinal;
                info!(next = ordinal, "run paused");
                if let Some(def) = stages::definition(ordinal) {
                    self.observer
                        .message(def, &format!("paused before stage {ordinal}"));
                }
                return RunOutcome::Paused { state };
            }
            let Some(def) = stages::definition(ordinal) else {
                break;
            };

            state.current_step = ordinal;
            self.observer.stage_started(def);
            let stage_started = Instant::now();
            let result = self.execute_stage(&state, ordinal, cancel).await;
            let elapsed = stage_started.elapsed();
            let elapsed_ms = elapsed.as_millis() as u64;

            match result {
                Ok(output) => {
                    state = state.apply(output);
                    state.mark_completed(ordinal, elapsed_ms);
                    self.observer.stage_completed(def, elapsed);
                }
                Err(err) => {
                    let fatal = def.critical || err.is_always_fatal();
                    self.observer.stage_failed(def, &err, fatal);
                    if fatal {
                        let message = err.to_string();
                        state.fail(ordinal, message.clone());
                        self.observer.progress(state.completed_steps.len(), total);
                        warn!(stage = ordinal, error = %message, "run failed");
                        return RunOutcome::Failed {
                            failure: RunFailure {
                                stage: ordinal,
                                message,
                            },
                            state,
                        };
                    }
                    state.push_warning(ordinal, err.to_string());
                    state.mark_completed(ordinal, elapsed_ms);
                }
            }
            self.observer.progress(state.completed_steps.len(), total);
        }

        let Some(document) = state.final_document.clone() else {
            let message = "run finished without an assembled document".to_string();
            state.fail(stages::ASSEMBLE_DOCUMENT, message.clone());
            return RunOutcome::Failed {
                failure: RunFailure {
                    stage: stages::ASSEMBLE_DOCUMENT,
                    message,
                },
                state,
            };
        };

        state.status = RunStatus::Completed;
        state.finish();
        info!(
            run_id = %state.run_id,
            warnings = state.warnings.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run completed"
        );
        RunOutcome::Completed(RunReport {
            document,
            qa: state.qa.clone(),
            publication: state.publication.clone(),
            warnings: state.warnings.clone(),
            state,
        })
    }
}
