//! Observer hooks for pipeline progress.
//!
//! The orchestrator reports every stage transition through a
//! [`PipelineObserver`]. Front-ends pick an implementation: the CLI drives a
//! spinner, headless callers use [`TracingObserver`] or [`SilentObserver`],
//! and anything that wants an event stream uses [`ChannelObserver`].

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::stages::StageDefinition;

/// Receives stage lifecycle callbacks from the orchestrator.
pub trait PipelineObserver: Send + Sync {
    fn stage_started(&self, stage: &StageDefinition);
    fn stage_completed(&self, stage: &StageDefinition, elapsed: Duration);
    /// `fatal` is true when the failure ends the run.
    fn stage_failed(&self, stage: &StageDefinition, error: &PipelineError, fatal: bool);
    /// Called after each stage settles, with stages done out of `total`.
    fn progress(&self, completed: usize, total: usize);
    /// Free-text note about what a stage did or skipped.
    fn message(&self, stage: &StageDefinition, text: &str);
}

/// No-op observer for tests and embedding.
pub struct SilentObserver;

impl PipelineObserver for SilentObserver {
    fn stage_started(&self, _stage: &StageDefinition) {}
    fn stage_completed(&self, _stage: &StageDefinition, _elapsed: Duration) {}
    fn stage_failed(&self, _stage: &StageDefinition, _error: &PipelineError, _fatal: bool) {}
    fn progress(&self, _completed: usize, _total: usize) {}
    fn message(&self, _stage: &StageDefinition, _text: &str) {}
}

/// Logs every transition through `tracing`.
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn stage_started(&self, stage: &StageDefinition) {
        info!(stage = stage.ordinal, name = stage.name, "stage started");
    }

    fn stage_completed(&self, stage: &StageDefinition, elapsed: Duration) {
        info!(
            stage = stage.ordinal,
            name = stage.name,
            elapsed_ms = elapsed.as_millis() as u64,
            "stage completed"
        );
    }

    fn stage_failed(&self, stage: &StageDefinition, err: &PipelineError, fatal: bool) {
        if fatal {
            error!(stage = stage.ordinal, name = stage.name, error = %err, "stage failed, halting run");
        } else {
            warn!(stage = stage.ordinal, name = stage.name, error = %err, "stage failed, continuing");
        }
    }

    fn progress(&self, _completed: usize, _total: usize) {}

    fn message(&self, stage: &StageDefinition, text: &str) {
        info!(stage = stage.ordinal, name = stage.name, "{text}");
    }
}

/// Serializable form of an observer callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    StageStarted {
        stage: u8,
        name: String,
    },
    StageCompleted {
        stage: u8,
        name: String,
        elapsed_ms: u64,
    },
    StageFailed {
        stage: u8,
        name: String,
        error: String,
        fatal: bool,
    },
    Progress {
        completed: usize,
        total: usize,
    },
    Message {
        stage: u8,
        text: String,
    },
}

/// Forwards events into an unbounded channel. Sends after the receiver is
/// dropped are discarded.
pub struct ChannelObserver {
    tx: UnboundedSender<PipelineEvent>,
}

impl ChannelObserver {
    pub fn new(tx: UnboundedSender<PipelineEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

impl PipelineObserver for ChannelObserver {
    fn stage_started(&self, stage: &StageDefinition) {
        self.send(PipelineEvent::StageStarted {
            stage: stage.ordinal,
            name: stage.name.to_string(),
        });
    }

    fn stage_completed(&self, stage: &StageDefinition, elapsed: Duration) {
        self.send(PipelineEvent::StageCompleted {
            stage: stage.ordinal,
            name: stage.name.to_string(),
            elapsed_ms: elapsed.as_millis() as u64,
        });
    }

    fn stage_failed(&self, stage: &StageDefinition, error: &PipelineError, fatal: bool) {
        self.send(PipelineEvent::StageFailed {
            stage: stage.ordinal,
            name: stage.name.to_string(),
            error: error.to_string(),
            fatal,
        });
    }

    fn progress(&self, completed: usize, total: usize) {
        self.send(PipelineEvent::Progress { completed, total });
    }

    fn message(&self, stage: &StageDefinition, text: &str) {
        self.send(PipelineEvent::Message {
            stage: stage.ordinal,
            text: text.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::STAGES;

    #[test]
    fn channel_observer_forwards_events() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let observer = ChannelObserver::new(tx);
        let stage = &STAGES[2];

        observer.stage_started(stage);
        observer.stage_failed(stage, &PipelineError::execution(3, "boom"), false);
        observer.progress(3, 15);
        observer.message(stage, "no prior articles");

        assert_eq!(
            rx.try_recv().unwrap(),
            PipelineEvent::StageStarted {
                stage: 3,
                name: "analyze_gaps".into()
            }
        );
        match rx.try_recv().unwrap() {
            PipelineEvent::StageFailed { fatal, error, .. } => {
                assert!(!fatal);
                assert!(error.contains("boom"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            rx.try_recv().unwrap(),
            PipelineEvent::Progress {
                completed: 3,
                total: 15
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            PipelineEvent::Message {
                stage: 3,
                text: "no prior articles".into()
            }
        );
    }

    #[test]
    fn dropped_receiver_is_ignored() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        ChannelObserver::new(tx).progress(1, 15);
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_string(&PipelineEvent::Progress {
            completed: 1,
            total: 15,
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"progress","completed":1,"total":15}"#);
    }
}
