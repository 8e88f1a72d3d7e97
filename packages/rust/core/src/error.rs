//! Orchestrator error model.
//!
//! Collaborators fail with [`postforge_shared::PostforgeError`]; the
//! orchestrator folds those into [`PipelineError::StageExecution`] so every
//! failure carries the stage it happened in.

/// A failure raised while running or dispatching a stage.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    /// Invalid run input, configuration, or stage table.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A stage was invoked before every earlier stage completed.
    #[error("stage {stage} requires stages {missing:?} to complete first")]
    PrerequisiteViolation { stage: u8, missing: Vec<u8> },

    /// A stage handler or its collaborator failed.
    #[error("stage {stage} failed: {message}")]
    StageExecution { stage: u8, message: String },

    /// A stage found an upstream output missing or empty.
    #[error("stage {stage} depends on {dependency}, which is not ready")]
    DependencyNotReady { stage: u8, dependency: String },
}

impl PipelineError {
    pub fn execution(stage: u8, message: impl std::fmt::Display) -> Self {
        Self::StageExecution {
            stage,
            message: message.to_string(),
        }
    }

    /// Ordering violations halt a run whatever the stage's criticality.
    pub fn is_always_fatal(&self) -> bool {
        matches!(
            self,
            Self::PrerequisiteViolation { .. } | Self::DependencyNotReady { .. }
        )
    }

    /// Stage the error is attributed to, when known.
    pub fn stage(&self) -> Option<u8> {
        match self {
            Self::Configuration(_) => None,
            Self::PrerequisiteViolation { stage, .. }
            | Self::StageExecution { stage, .. }
            | Self::DependencyNotReady { stage, .. } => Some(*stage),
        }
    }
}
