//! Run orchestrator - builds affected targets and relays upstream images.

use chrono::Utc;
use serde::Serialize;
use shipgate_core::builder::{BuildRequest, ImageBuilder, Registry};
use shipgate_core::outcome::{BuildOutcome, FailureStage, OutcomeKind, RunReport, TargetState};
use shipgate_core::{
    BuildPlan, ChangeSet, ClassificationResult, Classifier, Error, RelaySpec, Result, RunId,
    Target,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Options that shape a single run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub run_id: RunId,
    /// Push built images. When false, targets stop at `Built` and relays are skipped.
    pub push: bool,
    /// Targets to build regardless of the change set.
    pub force: BTreeSet<String>,
    /// Restrict the run to these targets.
    pub only: Option<BTreeSet<String>>,
    pub skip_relays: bool,
    /// Classify and report without building or pushing anything.
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            run_id: RunId::new(),
            push: true,
            force: BTreeSet::new(),
            only: None,
            skip_relays: false,
            dry_run: false,
        }
    }
}

/// Event emitted during a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Classified { affected: Vec<String> },
    TargetSkipped { target: String, reason: String },
    TargetStarted { target: String },
    TargetCompleted { target: String, state: TargetState },
    RelaySkipped { relay: String, reason: String },
    RelayStarted { relay: String },
    RelayCompleted { relay: String, state: TargetState },
    RunCompleted { success: bool },
}

/// Tracks one target or relay through its state machine.
struct Tracker {
    name: String,
    kind: OutcomeKind,
    image: String,
    state: TargetState,
    started_at: Option<chrono::DateTime<Utc>>,
    finished_at: Option<chrono::DateTime<Utc>>,
}

impl Tracker {
    fn new(name: &str, kind: OutcomeKind, image: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            image: image.to_string(),
            state: TargetState::Pending,
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, next: TargetState) {
        if !self.state.can_transition_to(&next) {
            warn!(
                name = %self.name,
                from = self.state.label(),
                to = next.label(),
                "Unexpected state transition"
            );
        }
        if let TargetState::Building { started_at } = &next {
            self.started_at = Some(*started_at);
        }
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.state = next;
    }

    fn start(&mut self) {
        self.transition(TargetState::Building {
            started_at: Utc::now(),
        });
    }

    fn skip(&mut self, reason: impl Into<String>) {
        self.transition(TargetState::Skipped {
            reason: reason.into(),
        });
    }

    fn fail(&mut self, stage: FailureStage, err: &Error) {
        self.transition(TargetState::Failed {
            stage,
            message: err.to_string(),
        });
    }

    fn into_outcome(self) -> BuildOutcome {
        BuildOutcome {
            name: self.name,
            kind: self.kind,
            image: self.image,
            state: self.state,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Orchestrates a change-gated run.
pub struct Orchestrator {
    builder: Arc<dyn ImageBuilder>,
    registry: Arc<dyn Registry>,
}

impl Orchestrator {
    pub fn new(builder: Arc<dyn ImageBuilder>, registry: Arc<dyn Registry>) -> Self {
        Self { builder, registry }
    }

    /// Classify the change set and validate the options against the plan.
    ///
    /// Errors here are fatal: nothing has been built yet.
    pub fn prepare(
        plan: &BuildPlan,
        changes: &ChangeSet,
        options: &RunOptions,
    ) -> Result<ClassificationResult> {
        let known: BTreeSet<&str> = plan.targets().iter().map(|t| t.name()).collect();
        let requested = options.force.iter().chain(options.only.iter().flatten());
        for name in requested {
            if !known.contains(name.as_str()) {
                return Err(Error::InvalidInput(format!("unknown target '{}'", name)));
            }
        }

        let classifier = Classifier::new(&plan.rules())?;
        Ok(classifier.classify(changes))
    }

    /// Start a run, returning a channel of events and a handle to the final report.
    pub fn execute(
        &self,
        plan: &BuildPlan,
        changes: &ChangeSet,
        options: RunOptions,
    ) -> Result<(mpsc::Receiver<RunEvent>, tokio::task::JoinHandle<RunReport>)> {
        let classification = Self::prepare(plan, changes, &options)?;

        let (tx, rx) = mpsc::channel(100);
        let builder = self.builder.clone();
        let registry = self.registry.clone();
        let plan = plan.clone();

        let handle = tokio::spawn(async move {
            Self::execute_inner(builder, registry, plan, classification, options, tx).await
        });

        Ok((rx, handle))
    }

    /// Run to completion, discarding events.
    pub async fn run(
        &self,
        plan: &BuildPlan,
        changes: &ChangeSet,
        options: RunOptions,
    ) -> Result<RunReport> {
        let (mut rx, handle) = self.execute(plan, changes, options)?;
        while rx.recv().await.is_some() {}
        handle
            .await
            .map_err(|e| Error::Internal(format!("run task failed: {}", e)))
    }

    async fn execute_inner(
        builder: Arc<dyn ImageBuilder>,
        registry: Arc<dyn Registry>,
        plan: BuildPlan,
        classification: ClassificationResult,
        options: RunOptions,
        tx: mpsc::Sender<RunEvent>,
    ) -> RunReport {
        let affected: Vec<String> = classification.affected().map(str::to_string).collect();
        info!(run_id = %options.run_id, ?affected, "Classified changes");
        let _ = tx.send(RunEvent::Classified { affected }).await;

        let mut outcomes = Vec::with_capacity(plan.targets().len() + plan.relays().len());

        for target in plan.targets() {
            let outcome = Self::run_target(
                builder.as_ref(),
                registry.as_ref(),
                target,
                &classification,
                &options,
                &tx,
            )
            .await;
            outcomes.push(outcome);
        }

        for relay in plan.relays() {
            let outcome = Self::run_relay(registry.as_ref(), relay, &options, &tx).await;
            outcomes.push(outcome);
        }

        let report = RunReport::new(options.run_id, classification, outcomes);
        let _ = tx
            .send(RunEvent::RunCompleted {
                success: report.success,
            })
            .await;
        report
    }

    fn skip_reason(
        target: &Target,
        classification: &ClassificationResult,
        options: &RunOptions,
    ) -> Option<&'static str> {
        let name = target.name();
        if let Some(only) = &options.only {
            if !only.contains(name) {
                return Some("not selected");
            }
        }
        if !classification.is_affected(name) && !options.force.contains(name) {
            return Some("no matching changes");
        }
        if options.dry_run {
            return Some("dry run");
        }
        None
    }

    async fn run_target(
        builder: &dyn ImageBuilder,
        registry: &dyn Registry,
        target: &Target,
        classification: &ClassificationResult,
        options: &RunOptions,
        tx: &mpsc::Sender<RunEvent>,
    ) -> BuildOutcome {
        let name = target.name();
        let mut tracker = Tracker::new(name, OutcomeKind::Target, &target.build.tag);

        if let Some(reason) = Self::skip_reason(target, classification, options) {
            info!(name = %name, reason, "Skipping target");
            tracker.skip(reason);
            let _ = tx
                .send(RunEvent::TargetSkipped {
                    target: name.to_string(),
                    reason: reason.to_string(),
                })
                .await;
            return tracker.into_outcome();
        }

        let _ = tx
            .send(RunEvent::TargetStarted {
                target: name.to_string(),
            })
            .await;
        tracker.start();

        let request = BuildRequest {
            run_id: options.run_id,
            target: name.to_string(),
            spec: target.build.clone(),
        };

        match builder.build(&request).await {
            Err(e) => {
                error!(name = %name, error = %e, "Build failed");
                tracker.fail(FailureStage::Build, &e);
            }
            Ok(built) if !options.push => {
                info!(name = %name, tag = %built.tag, "Built image (push disabled)");
                tracker.transition(TargetState::Built {
                    image_id: built.image_id,
                });
            }
            Ok(built) => match registry.push(&built.tag).await {
                Ok(()) => {
                    info!(name = %name, tag = %built.tag, "Pushed image");
                    tracker.transition(TargetState::Pushed { tag: built.tag });
                }
                Err(e) => {
                    error!(name = %name, error = %e, "Push failed");
                    tracker.fail(FailureStage::Push, &e);
                }
            },
        }

        let _ = tx
            .send(RunEvent::TargetCompleted {
                target: name.to_string(),
                state: tracker.state.clone(),
            })
            .await;
        tracker.into_outcome()
    }

    async fn run_relay(
        registry: &dyn Registry,
        relay: &RelaySpec,
        options: &RunOptions,
        tx: &mpsc::Sender<RunEvent>,
    ) -> BuildOutcome {
        let mut tracker = Tracker::new(&relay.name, OutcomeKind::Relay, &relay.tag);

        let skip = if options.skip_relays {
            Some("relays disabled")
        } else if !options.push {
            Some("push disabled")
        } else if options.dry_run {
            Some("dry run")
        } else {
            None
        };

        if let Some(reason) = skip {
            info!(name = %relay.name, reason, "Skipping relay");
            tracker.skip(reason);
            let _ = tx
                .send(RunEvent::RelaySkipped {
                    relay: relay.name.clone(),
                    reason: reason.to_string(),
                })
                .await;
            return tracker.into_outcome();
        }

        let _ = tx
            .send(RunEvent::RelayStarted {
                relay: relay.name.clone(),
            })
            .await;
        tracker.start();

        match Self::relay_steps(registry, relay).await {
            Ok(()) => {
                info!(name = %relay.name, source = %relay.source, tag = %relay.tag, "Relayed image");
                tracker.transition(TargetState::Pushed {
                    tag: relay.tag.clone(),
                });
            }
            Err((stage, e)) => {
                error!(name = %relay.name, stage = %stage, error = %e, "Relay failed");
                tracker.fail(stage, &e);
            }
        }

        let _ = tx
            .send(RunEvent::RelayCompleted {
                relay: relay.name.clone(),
                state: tracker.state.clone(),
            })
            .await;
        tracker.into_outcome()
    }

    async fn relay_steps(
        registry: &dyn Registry,
        relay: &RelaySpec,
    ) -> std::result::Result<(), (FailureStage, Error)> {
        registry
            .pull(&relay.source)
            .await
            .map_err(|e| (FailureStage::Pull, e))?;
        registry
            .tag(&relay.source, &relay.tag)
            .await
            .map_err(|e| (FailureStage::Tag, e))?;
        registry
            .push(&relay.tag)
            .await
            .map_err(|e| (FailureStage::Push, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shipgate_core::builder::BuiltImage;
    use shipgate_core::{BuildSpec, TargetRule};
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockBuilder {
        failing: BTreeSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl MockBuilder {
        fn failing(names: &[&str]) -> Self {
            Self {
                failing: names.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ImageBuilder for MockBuilder {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn available(&self) -> bool {
            true
        }

        async fn build(&self, request: &BuildRequest) -> Result<BuiltImage> {
            self.calls.lock().unwrap().push(request.target.clone());
            if self.failing.contains(&request.target) {
                return Err(Error::Build(format!("{} exited with 1", request.target)));
            }
            Ok(BuiltImage {
                tag: request.spec.tag.clone(),
                image_id: Some(format!("sha256:{}", request.target)),
            })
        }
    }

    #[derive(Default)]
    struct MockRegistry {
        /// Operations ("pull x", "tag x y", "push x") that fail.
        failing: BTreeSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl MockRegistry {
        fn failing(ops: &[&str]) -> Self {
            Self {
                failing: ops.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn record(&self, op: String) -> Result<()> {
            self.calls.lock().unwrap().push(op.clone());
            if self.failing.contains(&op) {
                Err(Error::Push(format!("{} rejected", op)))
            } else {
                Ok(())
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Registry for MockRegistry {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn pull(&self, reference: &str) -> Result<()> {
            self.record(format!("pull {}", reference))
        }

        async fn tag(&self, source: &str, target: &str) -> Result<()> {
            self.record(format!("tag {} {}", source, target))
        }

        async fn push(&self, reference: &str) -> Result<()> {
            self.record(format!("push {}", reference))
        }
    }

    fn make_target(name: &str, pattern: &str) -> Target {
        Target {
            rule: TargetRule::new(name, [pattern]),
            build: BuildSpec {
                context: PathBuf::from(name),
                dockerfile: PathBuf::from(format!("{}/Dockerfile", name)),
                tag: format!("reg.local/{}:latest", name),
                args: BTreeMap::new(),
                platform: None,
            },
        }
    }

    fn make_plan() -> BuildPlan {
        BuildPlan::new(
            vec![
                make_target("export", "export/**"),
                make_target("client", "clients/**"),
                make_target("docs", "docs/**"),
            ],
            vec![RelaySpec {
                name: "triton".to_string(),
                source: "nvcr.io/nvidia/tritonserver:23.01-py3".to_string(),
                tag: "reg.local/tritonserver:23.01".to_string(),
            }],
        )
        .unwrap()
    }

    fn changes(paths: &[&str]) -> ChangeSet {
        paths.iter().copied().collect()
    }

    fn state<'a>(report: &'a RunReport, name: &str, kind: OutcomeKind) -> &'a TargetState {
        &report.outcome(name, kind).unwrap().state
    }

    async fn run_with(
        builder: Arc<MockBuilder>,
        registry: Arc<MockRegistry>,
        changes: &ChangeSet,
        options: RunOptions,
    ) -> RunReport {
        Orchestrator::new(builder, registry)
            .run(&make_plan(), changes, options)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_builds_only_affected_targets() {
        let builder = Arc::new(MockBuilder::default());
        let registry = Arc::new(MockRegistry::default());

        let report = run_with(
            builder.clone(),
            registry.clone(),
            &changes(&["export/Dockerfile"]),
            RunOptions::default(),
        )
        .await;

        assert!(report.success);
        assert_eq!(builder.calls(), vec!["export"]);
        assert!(matches!(
            state(&report, "export", OutcomeKind::Target),
            TargetState::Pushed { tag } if tag == "reg.local/export:latest"
        ));
        assert!(matches!(
            state(&report, "client", OutcomeKind::Target),
            TargetState::Skipped { .. }
        ));
        assert_eq!(
            registry.calls(),
            vec![
                "push reg.local/export:latest",
                "pull nvcr.io/nvidia/tritonserver:23.01-py3",
                "tag nvcr.io/nvidia/tritonserver:23.01-py3 reg.local/tritonserver:23.01",
                "push reg.local/tritonserver:23.01",
            ]
        );
    }

    #[tokio::test]
    async fn test_build_failure_does_not_stop_run() {
        let builder = Arc::new(MockBuilder::failing(&["export"]));
        let registry = Arc::new(MockRegistry::default());

        let report = run_with(
            builder.clone(),
            registry.clone(),
            &changes(&["export/app.py", "clients/Dockerfile"]),
            RunOptions::default(),
        )
        .await;

        assert!(!report.success);
        assert_eq!(builder.calls(), vec!["export", "client"]);
        assert!(matches!(
            state(&report, "export", OutcomeKind::Target),
            TargetState::Failed {
                stage: FailureStage::Build,
                ..
            }
        ));
        assert!(matches!(
            state(&report, "client", OutcomeKind::Target),
            TargetState::Pushed { .. }
        ));
        assert!(matches!(
            state(&report, "docs", OutcomeKind::Target),
            TargetState::Skipped { .. }
        ));
        assert!(matches!(
            state(&report, "triton", OutcomeKind::Relay),
            TargetState::Pushed { .. }
        ));
        assert_eq!(report.failed().count(), 1);
        assert!(!registry.calls().contains(&"push reg.local/export:latest".to_string()));
    }

    #[tokio::test]
    async fn test_push_failure_is_recorded() {
        let builder = Arc::new(MockBuilder::default());
        let registry = Arc::new(MockRegistry::failing(&["push reg.local/client:latest"]));

        let report = run_with(
            builder,
            registry,
            &changes(&["clients/Dockerfile"]),
            RunOptions::default(),
        )
        .await;

        assert!(matches!(
            state(&report, "client", OutcomeKind::Target),
            TargetState::Failed {
                stage: FailureStage::Push,
                ..
            }
        ));
        assert!(matches!(
            state(&report, "triton", OutcomeKind::Relay),
            TargetState::Pushed { .. }
        ));
    }

    #[tokio::test]
    async fn test_relay_failure_is_isolated() {
        let builder = Arc::new(MockBuilder::default());
        let registry = Arc::new(MockRegistry::failing(&[
            "pull nvcr.io/nvidia/tritonserver:23.01-py3",
        ]));

        let report = run_with(
            builder,
            registry.clone(),
            &changes(&["export/Dockerfile"]),
            RunOptions::default(),
        )
        .await;

        assert!(!report.success);
        assert!(matches!(
            state(&report, "triton", OutcomeKind::Relay),
            TargetState::Failed {
                stage: FailureStage::Pull,
                ..
            }
        ));
        assert!(matches!(
            state(&report, "export", OutcomeKind::Target),
            TargetState::Pushed { .. }
        ));
        // Nothing after the failed pull.
        assert!(!registry
            .calls()
            .iter()
            .any(|c| c.starts_with("tag ")));
    }

    #[tokio::test]
    async fn test_relays_run_with_empty_change_set() {
        let builder = Arc::new(MockBuilder::default());
        let registry = Arc::new(MockRegistry::default());

        let report = run_with(
            builder.clone(),
            registry.clone(),
            &ChangeSet::empty(),
            RunOptions::default(),
        )
        .await;

        assert!(report.success);
        assert!(builder.calls().is_empty());
        assert_eq!(report.summary().skipped, 3);
        assert_eq!(report.summary().pushed, 1);
    }

    #[tokio::test]
    async fn test_no_push_stops_at_built() {
        let builder = Arc::new(MockBuilder::default());
        let registry = Arc::new(MockRegistry::default());

        let report = run_with(
            builder,
            registry.clone(),
            &changes(&["export/Dockerfile"]),
            RunOptions {
                push: false,
                ..Default::default()
            },
        )
        .await;

        assert!(report.success);
        assert!(matches!(
            state(&report, "export", OutcomeKind::Target),
            TargetState::Built { image_id: Some(_) }
        ));
        assert!(matches!(
            state(&report, "triton", OutcomeKind::Relay),
            TargetState::Skipped { reason } if reason == "push disabled"
        ));
        assert!(registry.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let builder = Arc::new(MockBuilder::default());
        let registry = Arc::new(MockRegistry::default());

        let report = run_with(
            builder.clone(),
            registry.clone(),
            &changes(&["export/Dockerfile"]),
            RunOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .await;

        assert!(builder.calls().is_empty());
        assert!(registry.calls().is_empty());
        assert!(report.classification.is_affected("export"));
        assert!(matches!(
            state(&report, "export", OutcomeKind::Target),
            TargetState::Skipped { reason } if reason == "dry run"
        ));
    }

    #[tokio::test]
    async fn test_force_and_only() {
        let builder = Arc::new(MockBuilder::default());
        let registry = Arc::new(MockRegistry::default());

        let report = run_with(
            builder.clone(),
            registry,
            &changes(&["export/Dockerfile"]),
            RunOptions {
                force: BTreeSet::from(["docs".to_string()]),
                only: Some(BTreeSet::from(["docs".to_string(), "client".to_string()])),
                skip_relays: true,
                ..Default::default()
            },
        )
        .await;

        assert_eq!(builder.calls(), vec!["docs"]);
        assert!(matches!(
            state(&report, "export", OutcomeKind::Target),
            TargetState::Skipped { reason } if reason == "not selected"
        ));
        assert!(matches!(
            state(&report, "triton", OutcomeKind::Relay),
            TargetState::Skipped { reason } if reason == "relays disabled"
        ));
    }

    #[tokio::test]
    async fn test_unknown_forced_target_is_rejected() {
        let orchestrator = Orchestrator::new(
            Arc::new(MockBuilder::default()),
            Arc::new(MockRegistry::default()),
        );

        let result = orchestrator
            .run(
                &make_plan(),
                &ChangeSet::empty(),
                RunOptions {
                    force: BTreeSet::from(["nope".to_string()]),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_malformed_pattern_aborts_before_building() {
        let builder = Arc::new(MockBuilder::default());
        let registry = Arc::new(MockRegistry::default());
        let plan = BuildPlan::new(vec![make_target("bad", "bad/[x-")], vec![]).unwrap();

        let result = Orchestrator::new(builder.clone(), registry.clone())
            .run(&plan, &changes(&["bad/x"]), RunOptions::default())
            .await;

        assert!(matches!(result, Err(Error::Classification { .. })));
        assert!(builder.calls().is_empty());
        assert!(registry.calls().is_empty());
    }

    #[tokio::test]
    async fn test_classification_is_stable_across_runs() {
        let changes = changes(&["clients/a.py", "README.md"]);
        let first = run_with(
            Arc::new(MockBuilder::default()),
            Arc::new(MockRegistry::default()),
            &changes,
            RunOptions::default(),
        )
        .await;
        let second = run_with(
            Arc::new(MockBuilder::default()),
            Arc::new(MockRegistry::default()),
            &changes,
            RunOptions::default(),
        )
        .await;

        assert_eq!(first.classification, second.classification);
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn test_events_follow_state_machine() {
        let orchestrator = Orchestrator::new(
            Arc::new(MockBuilder::failing(&["client"])),
            Arc::new(MockRegistry::default()),
        );

        let (mut rx, handle) = orchestrator
            .execute(
                &make_plan(),
                &changes(&["export/x", "clients/y"]),
                RunOptions::default(),
            )
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let report = handle.await.unwrap();

        assert!(matches!(&events[0], RunEvent::Classified { affected } if affected.len() == 2));
        assert!(matches!(
            events.last(),
            Some(RunEvent::RunCompleted { success: false })
        ));

        let completed: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                RunEvent::TargetCompleted { target, .. } => Some(target.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(completed, vec!["export", "client"]);

        let export = report.outcome("export", OutcomeKind::Target).unwrap();
        assert!(export.started_at.is_some());
        assert!(export.duration().is_some());
        assert!(report.outcomes.iter().all(|o| o.state.is_terminal()));
    }
}
