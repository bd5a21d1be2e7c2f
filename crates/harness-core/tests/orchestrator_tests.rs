//! Lifecycle orchestrator integration tests.
//!
//! Covers the cleanup policy truth table, lease accounting across every
//! failure point, and an end-to-end setup failure driven through the real
//! resource recipes with a scripted process runner.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use harness_core::cluster::mock::MockClusterState;
use harness_core::lease::LeaseBackend;
use harness_core::process::mock::MockProcessRunner;
use harness_core::{
    AtomicSuffixAllocator, DependencyChain, DomainInImage, ExecResult, HarnessConfig, LeaseError,
    LifecycleOrchestrator, LifecycleState, OperatorRelease, OracleDatabase, ProvisionContext,
    RcuSchema, ResourceKind, ResourceRef, SetupError,
};
use harness_test_utils::{
    lease_guard, mock_context, scripted_chain, test_orchestrator, CountingLeaseBackend,
    FailingAllocator, Journal, ScriptedResource, JRF_STEPS, TEST_CLASS_JRF, TEST_CLUSTER_ID,
    TEST_RCU_PREFIX,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// teardown executes iff ci_mode || all tests succeeded.
#[tokio::test]
async fn test_cleanup_truth_table_against_real_teardown() {
    for (ci_mode, test_passes, expect_teardown) in [
        (true, true, true),
        (true, false, true),
        (false, true, true),
        (false, false, false),
    ] {
        let journal = Journal::new();
        let leases = Arc::new(CountingLeaseBackend::new());
        let mut orch = test_orchestrator(TEST_CLASS_JRF, 0, &leases);

        orch.setup(|_| Ok(scripted_chain(&journal, &JRF_STEPS, None)))
            .await
            .unwrap();
        let _ = orch
            .run_test("testJrfDomainInImageUsingWlst", |_| async move {
                if test_passes {
                    Ok(())
                } else {
                    anyhow::bail!("domain did not come up")
                }
            })
            .await;

        let summary = orch.teardown(ci_mode).await;
        assert_eq!(summary.resources_released, expect_teardown, "ci={ci_mode} pass={test_passes}");
        assert_eq!(!journal.torn_down().is_empty(), expect_teardown);
        if expect_teardown {
            assert!(summary.preserved.is_empty());
        } else {
            assert_eq!(summary.preserved.len(), JRF_STEPS.len());
        }
        assert_eq!(leases.releases(), 1, "lease is released regardless of policy");
    }
}

/// One failed test among several keeps the resources outside CI.
#[tokio::test]
async fn test_one_failure_among_many_preserves_resources() {
    let journal = Journal::new();
    let leases = Arc::new(CountingLeaseBackend::new());
    let mut orch = test_orchestrator(TEST_CLASS_JRF, 0, &leases);
    orch.setup(|_| Ok(scripted_chain(&journal, &JRF_STEPS, None)))
        .await
        .unwrap();

    orch.run_test("testA", |_| async { Ok(()) }).await.unwrap();
    orch.run_test("testB", |_| async { anyhow::bail!("boom") })
        .await
        .unwrap_err();
    orch.run_test("testC", |_| async { Ok(()) }).await.unwrap();

    assert!(!orch.all_succeeded());
    let summary = orch.teardown(false).await;
    assert!(!summary.resources_released);
    assert!(journal.torn_down().is_empty());
}

#[tokio::test]
async fn test_lease_released_once_when_setup_fails() {
    let journal = Journal::new();
    let leases = Arc::new(CountingLeaseBackend::new());
    let mut orch = test_orchestrator(TEST_CLASS_JRF, 0, &leases);

    let err = orch
        .setup(|_| Ok(scripted_chain(&journal, &JRF_STEPS, Some(2))))
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::Chain { .. }));
    assert_eq!(orch.state(), LifecycleState::TornDown);
    assert_eq!(leases.releases(), 1);
    assert!(!leases.is_held(TEST_CLUSTER_ID));

    // A later teardown call is harmless and does not release again.
    orch.teardown(true).await;
    assert_eq!(leases.releases(), 1);
}

#[tokio::test]
async fn test_lease_released_once_when_test_body_fails() {
    let journal = Journal::new();
    let leases = Arc::new(CountingLeaseBackend::new());
    let mut orch = test_orchestrator(TEST_CLASS_JRF, 0, &leases);
    orch.setup(|_| Ok(scripted_chain(&journal, &JRF_STEPS, None)))
        .await
        .unwrap();

    orch.run_test("t", |_| async { anyhow::bail!("assertion failed") })
        .await
        .unwrap_err();
    assert!(leases.is_held(TEST_CLUSTER_ID));

    orch.teardown(false).await;
    orch.teardown(false).await;
    assert_eq!(leases.releases(), 1);
    assert!(!leases.is_held(TEST_CLUSTER_ID));
}

#[tokio::test]
async fn test_lease_released_once_when_teardown_fails() {
    let journal = Journal::new();
    let leases = Arc::new(CountingLeaseBackend::new());
    let mut orch = test_orchestrator(TEST_CLASS_JRF, 0, &leases);
    orch.setup(|_| {
        let mut chain = DependencyChain::new();
        let db = chain.add_step("Database", ScriptedResource::new("Database", &journal), &[])?;
        chain.add_step(
            "Operator",
            ScriptedResource::new("Operator", &journal).failing_teardown(),
            &[db],
        )?;
        Ok(chain)
    })
    .await
    .unwrap();

    let summary = orch.teardown(true).await;
    assert_eq!(summary.report.failures.len(), 1);
    assert_eq!(journal.torn_down(), vec!["Operator", "Database"]);
    assert_eq!(leases.releases(), 1);
}

#[tokio::test]
async fn test_dropped_orchestrator_releases_lease() {
    let journal = Journal::new();
    let leases = Arc::new(CountingLeaseBackend::new());
    {
        let mut orch = test_orchestrator(TEST_CLASS_JRF, 0, &leases);
        orch.setup(|_| Ok(scripted_chain(&journal, &JRF_STEPS[..1], None)))
            .await
            .unwrap();
        assert!(leases.is_held(TEST_CLUSTER_ID));
    }
    assert_eq!(leases.releases(), 1);
    assert!(!leases.is_held(TEST_CLUSTER_ID));
    assert!(journal.torn_down().is_empty(), "resources are kept without cleanup on drop");
}

#[tokio::test]
async fn test_dropped_orchestrator_tears_down_in_background_when_cleaning_up() {
    let journal = Journal::new();
    let leases = Arc::new(CountingLeaseBackend::new());
    {
        let mut orch = test_orchestrator(TEST_CLASS_JRF, 0, &leases).with_cleanup_on_drop(true);
        orch.setup(|_| Ok(scripted_chain(&journal, &JRF_STEPS, None)))
            .await
            .unwrap();
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while leases.releases() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    let mut expected: Vec<&str> = JRF_STEPS.to_vec();
    expected.reverse();
    assert_eq!(journal.torn_down(), expected);
    assert_eq!(leases.releases(), 1);
}

/// A setup cancelled mid-chain keeps what it created; teardown removes it.
#[tokio::test(start_paused = true)]
async fn test_cancelled_setup_leaves_created_steps_to_teardown() {
    let journal = Journal::new();
    let leases = Arc::new(CountingLeaseBackend::new());
    let mut orch = test_orchestrator(TEST_CLASS_JRF, 0, &leases);

    let setup = orch.setup(|_| {
        let mut chain = DependencyChain::new();
        let db = chain.add_step("Database", ScriptedResource::new("Database", &journal), &[])?;
        chain.add_step(
            "Operator",
            ScriptedResource::new("Operator", &journal)
                .of_kind(ResourceKind::Operator)
                .hanging_create(),
            &[db],
        )?;
        Ok(chain)
    });
    assert!(tokio::time::timeout(Duration::from_millis(200), setup)
        .await
        .is_err());
    assert_eq!(journal.created(), vec!["Database"]);
    assert!(leases.is_held(TEST_CLUSTER_ID));

    let err = orch.setup(|_| Ok(DependencyChain::new())).await.unwrap_err();
    assert!(matches!(err, SetupError::InvalidState(LifecycleState::Created)));

    let summary = orch.teardown(true).await;
    assert!(summary.resources_released);
    assert_eq!(journal.torn_down(), vec!["Database"]);
    assert_eq!(leases.releases(), 1);
    assert_eq!(orch.state(), LifecycleState::TornDown);
}

/// Orchestrators built from one configuration draw from one counter and
/// contend for one lease.
#[tokio::test(start_paused = true)]
async fn test_orchestrators_from_one_config_share_allocator_and_lease() {
    let config = HarnessConfig::from_vars(&HashMap::from([(
        "LEASE_TIMEOUT_SECONDS".to_string(),
        "1".to_string(),
    )]))
    .unwrap();
    let journal = Journal::new();

    let mut first = LifecycleOrchestrator::from_config("ItA", &config, mock_context());
    let mut second = LifecycleOrchestrator::from_config("ItB", &config, mock_context());

    let ctx = first
        .setup(|_| Ok(scripted_chain(&journal, &JRF_STEPS[..1], None)))
        .await
        .unwrap();
    assert_eq!(ctx.suffix.value(), 0);

    let err = second
        .setup(|_| Ok(scripted_chain(&journal, &JRF_STEPS[..1], None)))
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::Lease(LeaseError::Timeout { .. })));

    first.teardown(true).await;

    let mut third = LifecycleOrchestrator::from_config("ItC", &config.clone(), mock_context());
    let ctx = third
        .setup(|_| Ok(scripted_chain(&journal, &JRF_STEPS[..1], None)))
        .await
        .unwrap();
    assert_eq!(ctx.suffix.value(), 1);
    third.teardown(true).await;
}

#[tokio::test]
async fn test_allocation_failure_releases_lease_and_creates_nothing() {
    let journal = Journal::new();
    let leases = Arc::new(CountingLeaseBackend::new());
    let mut orch = LifecycleOrchestrator::new(
        TEST_CLASS_JRF,
        Arc::new(FailingAllocator),
        lease_guard(&leases),
        harness_test_utils::mock_context(),
    )
    .with_cluster(TEST_CLUSTER_ID, Duration::from_secs(2));

    let err = orch
        .setup(|_| Ok(scripted_chain(&journal, &JRF_STEPS, None)))
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::Allocation(_)));
    assert!(journal.entries().is_empty());
    assert_eq!(leases.claims(), 1);
    assert_eq!(leases.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lease_timeout_creates_nothing() {
    let journal = Journal::new();
    let leases = Arc::new(CountingLeaseBackend::new());
    assert!(leases.try_claim(TEST_CLUSTER_ID, "another-run").unwrap());

    let mut orch = test_orchestrator(TEST_CLASS_JRF, 0, &leases);
    let err = orch
        .setup(|_| Ok(scripted_chain(&journal, &JRF_STEPS, None)))
        .await
        .unwrap_err();

    assert!(matches!(err, SetupError::Lease(LeaseError::Timeout { .. })));
    assert!(leases.refused() > 0);
    assert!(journal.entries().is_empty());
    assert!(orch.suffix().is_none());
    assert_eq!(orch.state(), LifecycleState::TornDown);
}

/// Two classes on one cluster take turns; neither sees the other's suffix.
#[tokio::test]
async fn test_classes_serialize_on_shared_cluster() {
    let leases = Arc::new(CountingLeaseBackend::new());
    let allocator = Arc::new(AtomicSuffixAllocator::new());

    let run_class = |name: &'static str| {
        let leases = leases.clone();
        let allocator = allocator.clone();
        async move {
            let journal = Journal::new();
            let mut orch = LifecycleOrchestrator::new(
                name,
                allocator,
                lease_guard(&leases),
                harness_test_utils::mock_context(),
            )
            .with_cluster(TEST_CLUSTER_ID, Duration::from_secs(10));
            let ctx = orch
                .setup(|_| Ok(scripted_chain(&journal, &JRF_STEPS, None)))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            orch.teardown(true).await;
            ctx.suffix.value()
        }
    };

    let (a, b) = tokio::join!(run_class("ItA"), run_class("ItB"));
    assert_ne!(a, b);
    assert_eq!(leases.claims(), 2);
    assert_eq!(leases.releases(), 2);
}

/// Suffix 7 drives the whole chain through the real recipes; the operator
/// install fails, so the schema and database are rolled back in that order
/// and the domain is never applied.
#[tokio::test]
async fn test_end_to_end_operator_failure_rolls_back_schema_then_database() {
    let manifests = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockProcessRunner::new().on(
        "helm",
        &["install"],
        ExecResult::failed(1, "Error: INSTALLATION FAILED: chart not found"),
    ));
    let cluster = MockClusterState::new().ready_after(&ResourceRef::deployment("oracle-db", "db7"), 1);
    let ctx = ProvisionContext::new(runner.clone(), Arc::new(cluster));
    let leases = Arc::new(CountingLeaseBackend::new());

    let mut orch = LifecycleOrchestrator::new(
        TEST_CLASS_JRF,
        Arc::new(AtomicSuffixAllocator::starting_at(7)),
        lease_guard(&leases),
        ctx,
    )
    .with_cluster(TEST_CLUSTER_ID, Duration::from_secs(2));

    let manifest_dir = manifests.path().to_path_buf();
    let err = orch
        .setup(|suffix| {
            assert_eq!(suffix.db_namespace(), "db7");
            assert_eq!(suffix.db_port(), 30018);

            let db = OracleDatabase::new("/scripts", suffix, "k8s-node");
            let schema = RcuSchema::new("/scripts", TEST_RCU_PREFIX, db.url(), db.namespace());
            let domain = DomainInImage::new(suffix, "weblogic:12.2.1.3", manifest_dir)
                .with_rcu(TEST_RCU_PREFIX, db.url());

            let mut chain = DependencyChain::new();
            let d = chain.add_step("Database", db, &[])?;
            let r = chain.add_step("RcuSchema", schema, &[d])?;
            let o = chain.add_step("Operator", OperatorRelease::new("/chart", suffix), &[])?;
            chain.add_step("Domain", domain, &[r, o])?;
            Ok(chain)
        })
        .await
        .unwrap_err();

    let SetupError::Chain {
        step,
        suffix,
        namespace,
        rolled_back,
        teardown_failures,
        ..
    } = &err
    else {
        panic!("expected chain failure, got {err:?}");
    };
    assert_eq!(step, "Operator");
    assert_eq!(suffix.value(), 7);
    assert_eq!(namespace, "db7");
    assert_eq!(rolled_back, &vec!["RcuSchema".to_string(), "Database".to_string()]);
    assert_eq!(*teardown_failures, 0);
    assert!(err.to_string().contains("Operator"));
    assert!(err.to_string().contains("db7"));

    let lines = runner.command_lines();
    assert_eq!(
        lines[0],
        "sh /scripts/create-oracle-db-service/start-db-service.sh -p 30018 -n db7"
    );
    assert!(lines[1].contains("create-rcu-schema.sh -s jrfImage -d k8s-node:30018/devpdb.k8s -n db7"));
    assert!(!lines.iter().any(|l| l.starts_with("kubectl apply")));
    assert!(!lines.iter().any(|l| l.starts_with("helm uninstall")));

    let rcu_delete = lines
        .iter()
        .position(|l| l == "kubectl delete pod rcu -n db7 --ignore-not-found")
        .unwrap();
    let db_stop = lines
        .iter()
        .position(|l| l.ends_with("stop-db-service.sh -n db7"))
        .unwrap();
    assert!(rcu_delete < db_stop);

    assert_eq!(leases.releases(), 1);
}
