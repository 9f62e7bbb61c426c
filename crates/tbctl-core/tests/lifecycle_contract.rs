//! Contract Test: Install and First Start
//!
//! Constraints verified:
//! - A fresh install against an empty backend bootstraps exactly once
//! - A backend that already holds the schema gets a plain restart
//! - Install runs at most once per version, across restarts
//! - A failing install or bootstrap ends the pass before the service starts
//! - An unreachable backend blocks the start quietly until a later pass
//! - The database is requested with a name derived from the unit identity

mod common;

use common::*;
use tbctl_core::{
    Action, BackendKind, BlockedReason, Condition, ConnectivityFailureKind, Error, LifecycleState,
};

#[tokio::test]
async fn fresh_install_runs_first_run_once() {
    let harness = Harness::new();
    let mut reconciler = harness.reconciler().await;

    let outcome = reconciler.reconcile(&postgres_snapshot()).await;

    assert!(outcome.is_ok(), "pass failed: {:?}", outcome.error);
    assert_eq!(outcome.status.to_string(), "Active (PostgreSQL)");
    assert!(reconciler.conditions().contains(Condition::Started));

    assert_eq!(harness.journal.count(&format!("run {BOOTSTRAP_PROGRAM}")), 1);
    assert_eq!(harness.journal.count(&format!("start {SERVICE}")), 1);
    assert_eq!(harness.journal.count(&format!("restart {SERVICE}")), 0);
    assert_eq!(harness.probe_count(), 1);

    // Bootstrap strictly before the start it enables
    let entries = harness.journal.entries();
    let bootstrap = entries
        .iter()
        .position(|e| *e == format!("run {BOOTSTRAP_PROGRAM}"))
        .unwrap();
    let start = entries
        .iter()
        .position(|e| *e == format!("start {SERVICE}"))
        .unwrap();
    assert!(bootstrap < start);
}

#[tokio::test]
async fn existing_schema_restarts_instead_of_first_run() {
    let harness = Harness::new();
    harness.set_schema_present(true);
    let mut reconciler = harness.reconciler().await;

    let outcome = reconciler.reconcile(&postgres_snapshot()).await;

    assert!(outcome.is_ok());
    assert_eq!(outcome.status.to_string(), "Active (PostgreSQL)");
    assert_eq!(harness.journal.count(&format!("run {BOOTSTRAP_PROGRAM}")), 0);
    assert_eq!(harness.journal.count(&format!("restart {SERVICE}")), 1);
}

#[tokio::test]
async fn fresh_install_applies_actions_in_lifecycle_order() {
    let harness = Harness::new();
    let mut reconciler = harness.reconciler().await;

    let outcome = reconciler.reconcile(&postgres_snapshot()).await;

    assert_eq!(
        outcome.applied,
        vec![
            Action::Install,
            Action::RequestBackend {
                kind: BackendKind::Postgresql
            },
            Action::BindBackend {
                kind: BackendKind::Postgresql
            },
            Action::Start {
                kind: BackendKind::Postgresql
            },
        ]
    );
    assert_eq!(harness.journal.count("request postgresql thingsboard_0"), 1);
    assert_eq!(harness.journal.count("open 8080"), 1);

    let persisted = harness.persisted().await;
    assert_eq!(persisted.installed_version.as_deref(), Some("1.3.1"));
    assert_eq!(persisted.applied_port, Some(8080));
    assert!(!persisted.first_run);
    assert_eq!(
        persisted.backend.as_ref().map(|b| b.kind()),
        Some(BackendKind::Postgresql)
    );

    let rendered = harness.rendered();
    assert!(rendered.contains("jdbc:postgresql://10.0.0.5:5432/tb_1"));
    assert!(rendered.contains("type: \"sql\""));
}

#[tokio::test]
async fn install_runs_once_across_restarts() {
    let harness = Harness::new();
    {
        let mut reconciler = harness.reconciler().await;
        reconciler.reconcile(&postgres_snapshot()).await;
    }
    assert_eq!(harness.journal.count(&format!("run {INSTALL_PROGRAM}")), 1);

    // Restarted controller: same store, fresh session
    harness.journal.clear();
    harness.set_schema_present(true);
    let mut reconciler = harness.reconciler().await;
    assert!(reconciler.conditions().contains(Condition::Installed));

    let outcome = reconciler.reconcile(&postgres_snapshot()).await;
    assert!(outcome.is_ok());
    assert!(!outcome.applied.contains(&Action::Install));
    assert_eq!(harness.journal.count(&format!("run {INSTALL_PROGRAM}")), 0);
    assert_eq!(harness.journal.count(&format!("run {BOOTSTRAP_PROGRAM}")), 0);
    assert_eq!(harness.journal.count(&format!("restart {SERVICE}")), 1);
}

#[tokio::test]
async fn install_failure_blocks_and_does_not_start() {
    let harness = Harness::new();
    harness.fail_command(INSTALL_PROGRAM, 2);
    let mut reconciler = harness.reconciler().await;

    let outcome = reconciler.reconcile(&postgres_snapshot()).await;

    assert!(matches!(outcome.error, Some(Error::Install { code: Some(2), .. })));
    assert!(outcome.applied.is_empty());
    assert_eq!(
        outcome.status.state.blocked_reason(),
        Some(BlockedReason::StepFailed)
    );
    assert!(!reconciler.conditions().contains(Condition::Installed));
    assert_eq!(harness.journal.count(&format!("start {SERVICE}")), 0);
    assert!(harness.persisted().await.installed_version.is_none());
}

#[tokio::test]
async fn bootstrap_failure_ends_pass_before_start() {
    let harness = Harness::new();
    harness.fail_command(BOOTSTRAP_PROGRAM, 1);
    let mut reconciler = harness.reconciler().await;

    let outcome = reconciler.reconcile(&postgres_snapshot()).await;

    assert!(matches!(outcome.error, Some(Error::Bootstrap { .. })));
    assert!(!reconciler.conditions().contains(Condition::Started));
    assert_eq!(harness.journal.count(&format!("start {SERVICE}")), 0);
    assert_eq!(harness.journal.count("open 8080"), 0);
    assert!(outcome.status.message.contains("Bootstrap failed"));

    // Next externally triggered pass retries once the script is fixed
    harness.fail_command(BOOTSTRAP_PROGRAM, 0);
    let outcome = reconciler.reconcile(&postgres_snapshot()).await;
    assert!(outcome.is_ok());
    assert_eq!(
        outcome.applied,
        vec![Action::Start {
            kind: BackendKind::Postgresql
        }]
    );
    assert!(outcome.status.state.is_active());
}

#[tokio::test]
async fn connectivity_failure_blocks_start_until_retried() {
    let harness = Harness::new();
    harness.fail_schema_query(Some(ConnectivityFailureKind::ConnectFailed));
    let mut reconciler = harness.reconciler().await;

    let outcome = reconciler.reconcile(&postgres_snapshot()).await;

    match outcome.error {
        Some(Error::Connectivity { backend, kind, .. }) => {
            assert_eq!(backend, BackendKind::Postgresql);
            assert_eq!(kind, ConnectivityFailureKind::ConnectFailed);
        }
        ref other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(
        outcome.status.state.blocked_reason(),
        Some(BlockedReason::BackendUnavailable)
    );
    assert!(outcome.status.message.contains("PostgreSQL"));
    assert!(!reconciler.conditions().contains(Condition::Started));
    assert_eq!(harness.journal.count(&format!("run {BOOTSTRAP_PROGRAM}")), 0);
    assert_eq!(harness.journal.count(&format!("start {SERVICE}")), 0);
    assert_eq!(harness.journal.count(&format!("restart {SERVICE}")), 0);
    assert_eq!(harness.journal.count("open 8080"), 0);
    assert!(harness.persisted().await.first_run, "bootstrap still owed");

    // Next pass checks the schema again and proceeds once the backend answers
    harness.fail_schema_query(None);
    let outcome = reconciler.reconcile(&postgres_snapshot()).await;

    assert!(outcome.is_ok(), "pass failed: {:?}", outcome.error);
    assert_eq!(
        outcome.applied,
        vec![Action::Start {
            kind: BackendKind::Postgresql
        }]
    );
    assert_eq!(harness.probe_count(), 2);
    assert_eq!(harness.journal.count(&format!("run {BOOTSTRAP_PROGRAM}")), 1);
    assert!(outcome.status.state.is_active());
    assert!(!harness.persisted().await.first_run);
}

#[tokio::test]
async fn waits_without_backend() {
    let harness = Harness::new();
    let mut reconciler = harness.reconciler().await;

    let snapshot = tbctl_core::Snapshot::new().with_install_ready(true);
    let outcome = reconciler.reconcile(&snapshot).await;

    assert_eq!(outcome.applied, vec![Action::Install]);
    assert_eq!(
        outcome.status.state,
        LifecycleState::blocked(BlockedReason::NoBackend)
    );
}

#[tokio::test]
async fn cassandra_keyspace_is_derived_from_unit() {
    let harness = Harness::new();
    let mut reconciler = harness.reconciler().await;

    let outcome = reconciler.reconcile(&cassandra_snapshot()).await;

    assert_eq!(outcome.status.to_string(), "Active (Cassandra)");
    assert_eq!(harness.journal.count("request cassandra thingsboard_0"), 1);

    let rendered = harness.rendered();
    assert!(rendered.contains("keyspace_name: \"thingsboard_0\""));
    assert!(rendered.contains("url: \"10.0.1.1:9042,10.0.1.2:9042\""));
    assert!(!rendered.contains("jdbc:"));
}

#[tokio::test]
async fn incomplete_relation_stays_blocked_quietly() {
    let harness = Harness::new();
    let mut reconciler = harness.reconciler().await;

    let partial = tbctl_core::RelationData::new().with("host", "10.0.0.5");
    let snapshot = tbctl_core::Snapshot::new()
        .with_install_ready(true)
        .with_backend(BackendKind::Postgresql, partial);
    let outcome = reconciler.reconcile(&snapshot).await;

    match outcome.error {
        Some(Error::BindingUnavailable { backend, ref missing }) => {
            assert_eq!(backend, BackendKind::Postgresql);
            assert!(missing.contains(&"password".to_string()));
        }
        ref other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(
        outcome.status.state.blocked_reason(),
        Some(BlockedReason::BackendUnavailable)
    );
    assert!(harness.rendered().is_empty(), "nothing rendered without a context");
}
