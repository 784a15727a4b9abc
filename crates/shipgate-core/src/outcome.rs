//! Per-target state machine and run reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::RunId;
use crate::classify::ClassificationResult;

/// Which step of a build or relay failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Build,
    Pull,
    Tag,
    Push,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureStage::Build => "build",
            FailureStage::Pull => "pull",
            FailureStage::Tag => "tag",
            FailureStage::Push => "push",
        };
        f.write_str(s)
    }
}

/// State of a target (or relay) during a run.
///
/// `Pending -> Skipped`, `Pending -> Building -> {Pushed, Built, Failed}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TargetState {
    Pending,
    Skipped { reason: String },
    Building { started_at: DateTime<Utc> },
    /// Built locally; pushing was disabled for this run.
    Built { image_id: Option<String> },
    Pushed { tag: String },
    Failed { stage: FailureStage, message: String },
}

impl TargetState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TargetState::Skipped { .. }
                | TargetState::Built { .. }
                | TargetState::Pushed { .. }
                | TargetState::Failed { .. }
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TargetState::Failed { .. })
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: &TargetState) -> bool {
        matches!(
            (self, next),
            (TargetState::Pending, TargetState::Skipped { .. })
                | (TargetState::Pending, TargetState::Building { .. })
                | (TargetState::Building { .. }, TargetState::Built { .. })
                | (TargetState::Building { .. }, TargetState::Pushed { .. })
                | (TargetState::Building { .. }, TargetState::Failed { .. })
        )
    }

    /// Short label used in summaries.
    pub fn label(&self) -> &'static str {
        match self {
            TargetState::Pending => "pending",
            TargetState::Skipped { .. } => "skipped",
            TargetState::Building { .. } => "building",
            TargetState::Built { .. } => "built",
            TargetState::Pushed { .. } => "pushed",
            TargetState::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Target,
    Relay,
}

/// Terminal record for one target or relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub name: String,
    pub kind: OutcomeKind,
    /// Destination tag.
    pub image: String,
    pub state: TargetState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BuildOutcome {
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }
}

/// Counts of outcomes per terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub pushed: usize,
    pub built: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Result of a complete run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub classification: ClassificationResult,
    /// Targets in plan order, then relays in plan order.
    pub outcomes: Vec<BuildOutcome>,
    /// False when any outcome failed.
    pub success: bool,
}

impl RunReport {
    pub fn new(
        run_id: RunId,
        classification: ClassificationResult,
        outcomes: Vec<BuildOutcome>,
    ) -> Self {
        let success = !outcomes.iter().any(|o| o.state.is_failure());
        Self {
            run_id,
            classification,
            outcomes,
            success,
        }
    }

    pub fn outcome(&self, name: &str, kind: OutcomeKind) -> Option<&BuildOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.name == name && o.kind == kind)
    }

    pub fn failed(&self) -> impl Iterator<Item = &BuildOutcome> {
        self.outcomes.iter().filter(|o| o.state.is_failure())
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for outcome in &self.outcomes {
            match outcome.state {
                TargetState::Pushed { .. } => summary.pushed += 1,
                TargetState::Built { .. } => summary.built += 1,
                TargetState::Skipped { .. } => summary.skipped += 1,
                TargetState::Failed { .. } => summary.failed += 1,
                TargetState::Pending | TargetState::Building { .. } => {}
            }
        }
        summary
    }

    /// True when every outcome failed and at least one step ran.
    pub fn all_failed(&self) -> bool {
        let summary = self.summary();
        summary.failed > 0 && summary.pushed == 0 && summary.built == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(name: &str, state: TargetState) -> BuildOutcome {
        BuildOutcome {
            name: name.to_string(),
            kind: OutcomeKind::Target,
            image: format!("registry.local/{name}:latest"),
            state,
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn test_state_transitions() {
        let building = TargetState::Building {
            started_at: Utc::now(),
        };
        let skipped = TargetState::Skipped {
            reason: "unchanged".to_string(),
        };
        let pushed = TargetState::Pushed {
            tag: "x".to_string(),
        };

        assert!(TargetState::Pending.can_transition_to(&skipped));
        assert!(TargetState::Pending.can_transition_to(&building));
        assert!(building.can_transition_to(&pushed));
        assert!(!TargetState::Pending.can_transition_to(&pushed));
        assert!(!skipped.can_transition_to(&building));
        assert!(!pushed.can_transition_to(&building));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TargetState::Pending.is_terminal());
        assert!(
            !TargetState::Building {
                started_at: Utc::now()
            }
            .is_terminal()
        );
        assert!(TargetState::Built { image_id: None }.is_terminal());
        assert!(
            TargetState::Failed {
                stage: FailureStage::Build,
                message: "exit 1".to_string()
            }
            .is_terminal()
        );
    }

    #[test]
    fn test_report_success_and_summary() {
        let report = RunReport::new(
            RunId::new(),
            ClassificationResult::default(),
            vec![
                outcome("a", TargetState::Pushed { tag: "a".to_string() }),
                outcome(
                    "b",
                    TargetState::Skipped {
                        reason: "unchanged".to_string(),
                    },
                ),
            ],
        );

        assert!(report.success);
        assert_eq!(
            report.summary(),
            RunSummary {
                pushed: 1,
                skipped: 1,
                ..Default::default()
            }
        );
        assert!(!report.all_failed());
    }

    #[test]
    fn test_report_with_failure_is_partial() {
        let report = RunReport::new(
            RunId::new(),
            ClassificationResult::default(),
            vec![
                outcome("a", TargetState::Pushed { tag: "a".to_string() }),
                outcome(
                    "b",
                    TargetState::Failed {
                        stage: FailureStage::Push,
                        message: "denied".to_string(),
                    },
                ),
            ],
        );

        assert!(!report.success);
        assert_eq!(report.failed().count(), 1);
        assert!(!report.all_failed());
        assert!(report.outcome("b", OutcomeKind::Target).is_some());
        assert!(report.outcome("b", OutcomeKind::Relay).is_none());
    }

    #[test]
    fn test_report_serializes_states() {
        let report = RunReport::new(
            RunId::new(),
            ClassificationResult::default(),
            vec![outcome(
                "a",
                TargetState::Failed {
                    stage: FailureStage::Build,
                    message: "exit 1".to_string(),
                },
            )],
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcomes"][0]["state"]["state"], "failed");
        assert_eq!(json["outcomes"][0]["state"]["stage"], "build");
        assert_eq!(json["success"], false);
    }
}
