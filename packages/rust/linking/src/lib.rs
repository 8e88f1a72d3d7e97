//! Link relevance scoring, placement planning and injection for Postforge.
//!
//! - [`relevance`]: 0–100 relevance between an article and a link target
//! - [`placement`]: which sentences should carry a link
//! - [`inject`]: filter, rank and insert links into article HTML
//!
//! Everything in this crate is pure and synchronous; the pipeline calls it
//! from its link-injection stage.

mod text;

pub mod inject;
pub mod placement;
pub mod relevance;

pub use inject::{InjectionResult, inject};
pub use placement::{DEFAULT_MAX_PLACEMENTS, PlacementCandidate, plan_placements, rank_sentences};
pub use relevance::{RelevanceScore, score, score_with_title};
