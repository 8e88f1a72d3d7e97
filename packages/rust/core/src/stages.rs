//! The fixed stage table.
//!
//! Fifteen stages run in ascending ordinal order. Each one names its
//! criticality (a critical failure ends the run) and a bounded timeout.

use std::time::Duration;

/// Immutable description of one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDefinition {
    pub ordinal: u8,
    pub name: &'static str,
    pub critical: bool,
    pub timeout: Duration,
}

const fn stage(ordinal: u8, name: &'static str, critical: bool, timeout_secs: u64) -> StageDefinition {
    StageDefinition {
        ordinal,
        name,
        critical,
        timeout: Duration::from_secs(timeout_secs),
    }
}

pub const VALIDATE_CONFIG: u8 = 1;
pub const RETRIEVE_PRIOR_CONTENT: u8 = 2;
pub const ANALYZE_GAPS: u8 = 3;
pub const ANALYZE_COMPETITORS: u8 = 4;
pub const BUILD_OUTLINE: u8 = 5;
pub const DISCOVER_LINK_TARGETS: u8 = 6;
pub const GENERATE_CONTENT: u8 = 7;
pub const INJECT_VIDEO: u8 = 8;
pub const GENERATE_FAQ: u8 = 9;
pub const DISCOVER_REFERENCES: u8 = 10;
pub const INJECT_LINKS: u8 = 11;
pub const ASSEMBLE_SCHEMA: u8 = 12;
pub const ASSEMBLE_DOCUMENT: u8 = 13;
pub const VALIDATE_QUALITY: u8 = 14;
pub const PUBLISH: u8 = 15;

/// Every stage, indexed by `ordinal - 1`.
pub const STAGES: [StageDefinition; 15] = [
    stage(VALIDATE_CONFIG, "validate_config", true, 15),
    stage(RETRIEVE_PRIOR_CONTENT, "retrieve_prior_content", false, 30),
    stage(ANALYZE_GAPS, "analyze_gaps", false, 60),
    stage(ANALYZE_COMPETITORS, "analyze_competitors", false, 60),
    stage(BUILD_OUTLINE, "build_outline", true, 60),
    stage(DISCOVER_LINK_TARGETS, "discover_link_targets", false, 30),
    stage(GENERATE_CONTENT, "generate_content", true, 60),
    stage(INJECT_VIDEO, "inject_video", false, 30),
    stage(GENERATE_FAQ, "generate_faq", false, 60),
    stage(DISCOVER_REFERENCES, "discover_references", false, 60),
    stage(INJECT_LINKS, "inject_links", false, 15),
    stage(ASSEMBLE_SCHEMA, "assemble_schema", false, 15),
    stage(ASSEMBLE_DOCUMENT, "assemble_document", true, 15),
    stage(VALIDATE_QUALITY, "validate_quality", false, 15),
    stage(PUBLISH, "publish", true, 60),
];

pub const STAGE_COUNT: u8 = STAGES.len() as u8;

/// Look up a stage by ordinal.
pub fn definition(ordinal: u8) -> Option<&'static StageDefinition> {
    ordinal
        .checked_sub(1)
        .and_then(|idx| STAGES.get(usize::from(idx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ordinals_form_a_total_order() {
        for (idx, def) in STAGES.iter().enumerate() {
            assert_eq!(usize::from(def.ordinal), idx + 1);
        }
        let names: HashSet<_> = STAGES.iter().map(|d| d.name).collect();
        assert_eq!(names.len(), STAGES.len());
        assert_eq!(STAGE_COUNT, 15);
    }

    #[test]
    fn critical_stages_are_the_backbone() {
        let critical: Vec<u8> = STAGES.iter().filter(|d| d.critical).map(|d| d.ordinal).collect();
        assert_eq!(critical, vec![1, 5, 7, 13, 15]);
    }

    #[test]
    fn timeouts_are_bounded() {
        for def in &STAGES {
            let secs = def.timeout.as_secs();
            assert!((15..=60).contains(&secs), "{} has {secs}s", def.name);
        }
    }

    #[test]
    fn definition_lookup() {
        assert_eq!(definition(7).map(|d| d.name), Some("generate_content"));
        assert!(definition(0).is_none());
        assert!(definition(16).is_none());
    }
}
