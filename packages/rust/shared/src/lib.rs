//! Shared types, error model, and configuration for Postforge.
//!
//! This crate is the foundation depended on by all other Postforge crates.
//! It provides:
//! - [`PostforgeError`]: the unified error type
//! - Domain types ([`LinkCandidate`], [`GeneratedDocument`], [`FinalDocument`], [`RunId`])
//! - Configuration ([`AppConfig`], [`LinkingConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, GenerationConfig, LinkingConfig, QualityConfig, SiteConfig,
    config_dir, config_file_path, expand_home, init_config, load_config, load_config_from,
    read_secret,
};
pub use error::{PostforgeError, Result};
pub use types::{
    CompetitorAnalysis, DocumentSection, FaqItem, FinalDocument, GapAnalysis, GeneratedDocument,
    GenerationRequest, LinkCandidate, LinkPlacement, Outline, OutlineSection, Paragraph,
    PriorArticle, PublishStatus, PublishedPost, QaReport, QaRuleOutcome, Reference, RunId,
    StructureConstraints, VideoEmbed,
};
