//! Pipeline orchestration and domain logic for Postforge.
//!
//! This crate ties together the generation bridge, link injection, document
//! assembly, quality checks and publishing into the fifteen-stage article
//! pipeline ([`Pipeline`]).

pub mod assembler;
pub mod bridge;
pub mod collaborators;
pub mod error;
pub mod events;
pub mod handlers;
pub mod pipeline;
pub mod quality;
pub mod schema;
pub mod stages;
pub mod state;

#[cfg(test)]
mod test_support;

pub use bridge::{BridgeConfig, BridgeStats, GenerationBridge};
pub use collaborators::{
    ContentAnalyzer, ContentGenerator, MediaFinder, PriorContentSource, Publisher,
    QualityValidator, ReferenceFinder, Services, TargetDiscovery,
};
pub use error::PipelineError;
pub use events::{ChannelObserver, PipelineEvent, PipelineObserver, SilentObserver, TracingObserver};
pub use handlers::{StageContext, StageHandler, StageRegistry};
pub use pipeline::{Pipeline, PipelineConfig, RunFailure, RunOutcome, RunReport, RunRequest};
pub use quality::RuleValidator;
pub use stages::{STAGE_COUNT, STAGES, StageDefinition};
pub use state::{GeneratedContent, PipelineState, RunStatus, StageOutput, StageWarning};
