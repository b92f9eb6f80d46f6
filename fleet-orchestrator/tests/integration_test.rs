//! Integration tests for fleet-orchestrator
//!
//! Drives full lifecycle operations against the in-memory fake system: provisioning,
//! rollback on partial failure, teardown idempotence, start/stop, listing and
//! per-name serialization.

use std::sync::Arc;
use std::time::Duration;

use fleet_orchestrator::test_utils::{fake_orchestrator, FakeSystem};
use fleet_orchestrator::{
    DatabaseProbe, InstanceOrchestrator, InstanceStatus, OrchestratorConfig, OrchestratorError,
    Owner, Presence, ProvisionRequest, ProvisionStep, StepOutcome,
};

fn request(name: &str) -> ProvisionRequest {
    ProvisionRequest::new(
        name,
        "tok",
        Owner {
            id: "1".to_string(),
            username: "u".to_string(),
            email: "e@x.com".to_string(),
        },
    )
}

fn provision_failure(err: OrchestratorError) -> fleet_orchestrator::ProvisionFailure {
    match err {
        OrchestratorError::Provision(failure) => *failure,
        other => panic!("Expected provisioning failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_provision_on_clean_system() {
    let base = tempfile::tempdir().unwrap();
    let (orchestrator, system) = fake_orchestrator(base.path());

    let instance = orchestrator
        .provision(request("bot1"))
        .await
        .expect("Failed to provision instance");

    assert_eq!(instance.name, "bot1");
    assert_eq!(instance.status, InstanceStatus::Active);
    assert!(system.has_database("bot1"));
    assert_eq!(system.process_status("bot1").as_deref(), Some("online"));

    let workspace = orchestrator.config().workspace_path("bot1");
    assert!(workspace.join("venv").join("bin").is_dir());
    assert!(workspace.join("cookies.txt").is_file());
    let env = std::fs::read_to_string(workspace.join(".env")).unwrap();
    assert!(env.contains("DISCORD_TOKEN='tok'"));
    assert!(env.contains("BOT_PREFIX=';'"));
    assert!(env.contains("/bot1'"));

    assert_eq!(
        orchestrator.cached("bot1").map(|i| i.status),
        Some(InstanceStatus::Active)
    );
}

#[tokio::test]
async fn test_provision_runs_steps_in_order() {
    let base = tempfile::tempdir().unwrap();
    let (orchestrator, system) = fake_orchestrator(base.path());
    orchestrator.provision(request("bot1")).await.unwrap();

    let history = system.history();
    let position = |needle: &str| {
        history
            .iter()
            .position(|c| c.contains(needle))
            .unwrap_or_else(|| panic!("'{}' was never run", needle))
    };

    assert!(position("git clone") < position("-m venv venv"));
    assert!(position("-m venv venv") < position("install -r requirements.txt"));
    assert!(position("uninstall -y discord.py") < position("--force-reinstall"));
    assert!(position("/var/lib/postgresql/data") < position("CREATE DATABASE"));
    assert!(position("CREATE DATABASE") < position("-d bot1"));
    assert!(position("-d bot1") < position("pm2 start"));
}

#[tokio::test]
async fn test_provision_rejects_unsafe_name_before_side_effects() {
    let base = tempfile::tempdir().unwrap();
    let (orchestrator, system) = fake_orchestrator(base.path());

    for name in ["../etc", "bot1; rm -rf /", "", "-rf"] {
        let err = orchestrator.provision(request(name)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)), "{name}");
    }
    assert!(system.history().is_empty());
}

#[tokio::test]
async fn test_database_failure_rolls_back_everything() {
    let base = tempfile::tempdir().unwrap();
    let (orchestrator, system) = fake_orchestrator(base.path());
    system.fail_on("CREATE DATABASE");

    let failure = provision_failure(orchestrator.provision(request("bot1")).await.unwrap_err());

    assert_eq!(failure.step, ProvisionStep::CreateDatabase);
    assert!(failure.cause.contains("injected failure"));
    assert!(matches!(
        failure.database_probe,
        Some(DatabaseProbe::ServerStatus(ref status)) if status.contains("accepting connections")
    ));
    assert!(failure.diagnostics.disk.contains("/dev/root"));
    assert!(failure.diagnostics.memory.contains("Mem:"));
    assert_eq!(failure.rollback.process, StepOutcome::Skipped);
    assert_eq!(failure.rollback.workspace, StepOutcome::Done);

    assert!(!orchestrator.config().workspace_path("bot1").exists());
    assert!(!system.has_database("bot1"));
    assert!(!system.has_process("bot1"));
    assert!(orchestrator.cached("bot1").is_none());
}

#[tokio::test]
async fn test_schema_failure_drops_created_database() {
    let base = tempfile::tempdir().unwrap();
    let (orchestrator, system) = fake_orchestrator(base.path());
    system.fail_on("-d bot1");

    let failure = provision_failure(orchestrator.provision(request("bot1")).await.unwrap_err());

    assert_eq!(failure.step, ProvisionStep::ApplySchema);
    assert_eq!(failure.rollback.database, StepOutcome::Done);
    assert!(!system.has_database("bot1"));
    assert!(!orchestrator.config().workspace_path("bot1").exists());
}

#[tokio::test]
async fn test_process_start_failure_rolls_back() {
    let base = tempfile::tempdir().unwrap();
    let (orchestrator, system) = fake_orchestrator(base.path());
    system.fail_on("pm2 start");

    let failure = provision_failure(orchestrator.provision(request("bot1")).await.unwrap_err());

    assert_eq!(failure.step, ProvisionStep::StartProcess);
    assert!(failure.database_probe.is_none());
    assert_eq!(failure.rollback.process, StepOutcome::NothingToDo);
    assert!(!system.has_database("bot1"));
    assert!(!system.has_process("bot1"));
}

#[tokio::test]
async fn test_clone_timeout_rolls_back_workspace() {
    let base = tempfile::tempdir().unwrap();
    let (orchestrator, system) = fake_orchestrator(base.path());
    system.time_out_on("git clone");

    let failure = provision_failure(orchestrator.provision(request("bot1")).await.unwrap_err());

    assert_eq!(failure.step, ProvisionStep::CloneTemplate);
    assert!(failure.cause.contains("timed out"));
    assert_eq!(failure.rollback.database, StepOutcome::Skipped);
    assert!(!orchestrator.config().workspace_path("bot1").exists());
}

#[tokio::test]
async fn test_browser_runtime_failure_is_not_fatal() {
    let base = tempfile::tempdir().unwrap();
    let schema_path = base.path().join("schema.sql");
    std::fs::write(&schema_path, "SELECT 1;").unwrap();
    let config = OrchestratorConfig {
        instances_root: base.path().join("instances"),
        schema_path,
        browser_installer: Some("/opt/fleet/browser-installer".into()),
        ..Default::default()
    };
    let system = FakeSystem::new();
    let orchestrator = InstanceOrchestrator::new(config, system.clone());

    let instance = orchestrator.provision(request("bot1")).await.unwrap();

    assert_eq!(instance.status, InstanceStatus::Active);
    assert!(system
        .history()
        .iter()
        .any(|c| c.ends_with("browser-installer install-deps")));
    assert!(system.has_process("bot1"));
}

#[tokio::test]
async fn test_provision_retry_replaces_previous_instance() {
    let base = tempfile::tempdir().unwrap();
    let (orchestrator, system) = fake_orchestrator(base.path());

    orchestrator.provision(request("bot1")).await.unwrap();
    orchestrator.provision(request("bot1")).await.unwrap();

    assert!(system.has_database("bot1"));
    assert_eq!(orchestrator.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let base = tempfile::tempdir().unwrap();
    let (orchestrator, system) = fake_orchestrator(base.path());
    orchestrator.provision(request("bot1")).await.unwrap();

    let first = orchestrator.delete("bot1").await.unwrap();
    assert_eq!(first.process, StepOutcome::Done);
    assert_eq!(first.database, StepOutcome::Done);
    assert_eq!(first.workspace, StepOutcome::Done);

    let second = orchestrator.delete("bot1").await.unwrap();
    assert_eq!(second.process, StepOutcome::NothingToDo);
    assert_eq!(second.database, StepOutcome::NothingToDo);
    assert_eq!(second.workspace, StepOutcome::NothingToDo);

    assert!(!system.has_process("bot1"));
    assert!(!system.has_database("bot1"));
    assert!(orchestrator.cached("bot1").is_none());
}

#[tokio::test]
async fn test_delete_continues_past_failed_steps() {
    let base = tempfile::tempdir().unwrap();
    let (orchestrator, system) = fake_orchestrator(base.path());
    orchestrator.provision(request("bot1")).await.unwrap();
    system.fail_on("pm2 delete");

    let report = orchestrator.delete("bot1").await.unwrap();

    assert!(report.process.is_failed());
    assert_eq!(report.database, StepOutcome::Done);
    assert_eq!(report.workspace, StepOutcome::Done);
}

#[tokio::test]
async fn test_start_without_workspace_is_not_found() {
    let base = tempfile::tempdir().unwrap();
    let (orchestrator, system) = fake_orchestrator(base.path());

    let err = orchestrator.start("ghost").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
    assert!(!system.has_process("ghost"));
}

#[tokio::test]
async fn test_stop_then_start() {
    let base = tempfile::tempdir().unwrap();
    let (orchestrator, system) = fake_orchestrator(base.path());
    orchestrator.provision(request("bot1")).await.unwrap();

    orchestrator.stop("bot1").await.unwrap();
    assert_eq!(system.process_status("bot1").as_deref(), Some("stopped"));
    assert_eq!(
        orchestrator.cached("bot1").map(|i| i.status),
        Some(InstanceStatus::Stopped)
    );

    orchestrator.start("bot1").await.unwrap();
    assert_eq!(system.process_status("bot1").as_deref(), Some("online"));
    assert_eq!(
        orchestrator.cached("bot1").map(|i| i.status),
        Some(InstanceStatus::Active)
    );
}

#[tokio::test]
async fn test_stop_unknown_process_is_not_found() {
    let base = tempfile::tempdir().unwrap();
    let (orchestrator, _system) = fake_orchestrator(base.path());

    let err = orchestrator.stop("bot1").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(ref m) if m.contains("not running")));
}

#[tokio::test]
async fn test_list_reports_live_processes() {
    let base = tempfile::tempdir().unwrap();
    let (orchestrator, _system) = fake_orchestrator(base.path());
    orchestrator.provision(request("bot1")).await.unwrap();
    orchestrator.provision(request("bot2")).await.unwrap();
    orchestrator.stop("bot2").await.unwrap();

    let processes = orchestrator.list().await.unwrap();
    let summary: Vec<_> = processes
        .iter()
        .map(|p| (p.name.as_str(), p.status.as_deref()))
        .collect();
    assert_eq!(
        summary,
        vec![("bot1", Some("online")), ("bot2", Some("stopped"))]
    );
    assert!(processes[0]
        .working_directory
        .as_deref()
        .is_some_and(|cwd| cwd.ends_with("bot1")));
}

#[tokio::test]
async fn test_inspect_reconciles_external_state() {
    let base = tempfile::tempdir().unwrap();
    let (orchestrator, system) = fake_orchestrator(base.path());

    let state = orchestrator.inspect("bot1").await.unwrap();
    assert_eq!(state.status, InstanceStatus::Deleted);

    orchestrator.provision(request("bot1")).await.unwrap();
    let state = orchestrator.inspect("bot1").await.unwrap();
    assert_eq!(state.status, InstanceStatus::Active);
    assert_eq!(state.database, Presence::Present);
    assert_eq!(state.process_status.as_deref(), Some("online"));

    // Workspace removed behind the orchestrator's back.
    std::fs::remove_dir_all(orchestrator.config().workspace_path("bot1")).unwrap();
    let state = orchestrator.inspect("bot1").await.unwrap();
    assert_eq!(state.workspace, Presence::Absent);
    assert_eq!(state.status, InstanceStatus::Failed);
    assert_eq!(
        orchestrator.cached("bot1").map(|i| i.status),
        Some(InstanceStatus::Failed)
    );

    system.add_database("orphan");
    let state = orchestrator.inspect("orphan").await.unwrap();
    assert_eq!(state.status, InstanceStatus::Failed);
}

#[tokio::test]
async fn test_inspect_reports_failed_checks() {
    let base = tempfile::tempdir().unwrap();
    let (orchestrator, system) = fake_orchestrator(base.path());
    system.fail_on("pm2 jlist");

    let state = orchestrator.inspect("bot1").await.unwrap();
    assert!(matches!(state.process, Presence::CheckFailed(_)));
    assert_eq!(state.status, InstanceStatus::Failed);
}

#[tokio::test]
async fn test_same_name_operations_are_serialized() {
    let base = tempfile::tempdir().unwrap();
    let (orchestrator, system) = fake_orchestrator(base.path());
    system.set_delay(Duration::from_millis(2));

    let orchestrator = Arc::new(orchestrator);
    let first = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.provision(request("bot1")).await }
    });
    let second = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.provision(request("bot1")).await }
    });

    first.await.unwrap().expect("First provision failed");
    second.await.unwrap().expect("Second provision failed");

    assert!(system.has_process("bot1"));
    assert!(system.has_database("bot1"));
    assert_eq!(orchestrator.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_different_names_provision_concurrently() {
    let base = tempfile::tempdir().unwrap();
    let (orchestrator, system) = fake_orchestrator(base.path());

    let (a, b) = tokio::join!(
        orchestrator.provision(request("bot1")),
        orchestrator.provision(request("bot2"))
    );
    a.unwrap();
    b.unwrap();

    assert!(system.has_database("bot1"));
    assert!(system.has_database("bot2"));
}

#[tokio::test]
async fn test_dropped_caller_does_not_leave_half_built_instance() {
    let base = tempfile::tempdir().unwrap();
    let (orchestrator, system) = fake_orchestrator(base.path());
    system.set_delay(Duration::from_millis(20));

    let caller = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.provision(request("bot1")).await }
    });
    while !system.has_database("bot1") {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    caller.abort();
    assert!(caller.await.unwrap_err().is_cancelled());

    // Mid-run the cached status is still honoured; afterwards it is derived.
    let state = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let state = orchestrator.inspect("bot1").await.unwrap();
            if state.status != InstanceStatus::Provisioning {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Provisioning never settled");

    assert_eq!(state.status, InstanceStatus::Active);
    assert!(state.workspace.is_present());
    assert!(state.database.is_present());
    assert!(system.has_process("bot1"));
    assert_eq!(
        orchestrator.cached("bot1").map(|i| i.status),
        Some(InstanceStatus::Active)
    );
}
