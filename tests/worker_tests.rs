//! TaskWorker, spawners, keychain and worker config tests.

use anyhow::{Result, bail};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use snowqueue::queue::{
    CONNECTED_APP_SERVICE, ParallelWorker, ProcessSpawner, SharedConfig, SpawnKind, TaskWorker,
    ThreadSpawner, WORKER_CONFIG_SCHEMA_VERSION, WORKER_SUBCOMMAND, WorkerConfig, WorkerKeychain,
};
use snowqueue::tasks::{SLEEP, Task, TaskContext, TaskRegistry};
use snowqueue::{ConnectedApp, OrgConnection, PipelineError, TaskOptions};

struct Echo;

impl Task for Echo {
    fn run(&mut self, ctx: &TaskContext<'_>) -> Result<Option<Value>> {
        ctx.log.info("echoing options");
        let app = ctx
            .keychain
            .get_service(CONNECTED_APP_SERVICE)
            .map(|a| a.client_id.clone())
            .ok();
        Ok(Some(json!({
            "message": ctx.options.get_str("message"),
            "client_id": app,
        })))
    }
}

struct Explode;

impl Task for Explode {
    fn run(&mut self, _ctx: &TaskContext<'_>) -> Result<Option<Value>> {
        bail!("the subtask blew up")
    }
}

struct Panics;

impl Task for Panics {
    fn run(&mut self, _ctx: &TaskContext<'_>) -> Result<Option<Value>> {
        panic!("unexpected state")
    }
}

fn registry() -> Arc<TaskRegistry> {
    let mut registry = TaskRegistry::builtin();
    registry.register("echo", "Echo", |_| Ok(Box::new(Echo)));
    registry.register("explode", "Explode", |_| Ok(Box::new(Explode)));
    registry.register("panics", "Panics", |_| Ok(Box::new(Panics)));
    Arc::new(registry)
}

struct Layout {
    inprogress: PathBuf,
    outbox: PathBuf,
    failures: PathBuf,
}

fn layout(root: &Path) -> Layout {
    let inprogress = root.join("q_inprogress");
    fs::create_dir_all(inprogress.join("1_10")).unwrap();
    Layout {
        inprogress,
        outbox: root.join("q_outbox"),
        failures: root.join("failures"),
    }
}

fn worker_config(root: &Path, task: &str, options: TaskOptions) -> WorkerConfig {
    let dirs = layout(root);
    let org = OrgConnection::sqlite("test", &root.join("org.db"));
    WorkerConfig::new(
        SharedConfig::new(task, org),
        options,
        dirs.inprogress.join("1_10"),
        dirs.outbox,
        dirs.failures,
    )
}

#[test]
fn test_success_moves_job_to_outbox() {
    let tmp = tempfile::tempdir().unwrap();
    let config = worker_config(
        tmp.path(),
        "echo",
        TaskOptions::new().with("message", "hello"),
    );

    TaskWorker::new(config, registry()).run().unwrap();

    let done = tmp.path().join("q_outbox").join("1_10");
    assert!(done.is_dir());
    assert!(!tmp.path().join("q_inprogress").join("1_10").exists());
    let results: Value =
        serde_json::from_str(&fs::read_to_string(done.join("results.json")).unwrap()).unwrap();
    assert_eq!(results["message"], "hello");
    assert_eq!(results["client_id"], Value::Null);

    let log = fs::read_to_string(done.join("Echo.log")).unwrap();
    assert!(log.contains("echoing options"));
    assert!(log.contains("SubTask Success!"));
}

#[test]
fn test_failure_moves_job_to_failures() {
    let tmp = tempfile::tempdir().unwrap();
    let config = worker_config(tmp.path(), "explode", TaskOptions::new());

    let err = TaskWorker::new(config, registry()).run().unwrap_err();
    assert!(err.to_string().contains("the subtask blew up"));

    let failed = tmp.path().join("failures").join("1_10");
    let exception = fs::read_to_string(failed.join("exception.txt")).unwrap();
    assert!(exception.contains("the subtask blew up"));
    assert!(!failed.join("results.json").exists());
    assert!(!tmp.path().join("q_outbox").join("1_10").exists());
    let log = fs::read_to_string(failed.join("Explode.log")).unwrap();
    assert!(log.contains("Failure detected"));
}

#[test]
fn test_panic_is_a_job_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let config = worker_config(tmp.path(), "panics", TaskOptions::new());

    let err = TaskWorker::new(config, registry()).run().unwrap_err();
    assert!(err.to_string().contains("subtask panicked: unexpected state"));
    assert!(
        tmp.path()
            .join("failures")
            .join("1_10")
            .join("exception.txt")
            .is_file()
    );
}

#[test]
fn test_unmovable_success_leaves_exception_behind() {
    let tmp = tempfile::tempdir().unwrap();
    let config = worker_config(tmp.path(), "echo", TaskOptions::new());
    // A file where the outbox directory should be.
    fs::write(tmp.path().join("q_outbox"), "not a directory").unwrap();

    assert!(TaskWorker::new(config, registry()).run().is_err());
    let job = tmp.path().join("q_inprogress").join("1_10");
    assert!(job.join("exception.txt").is_file());
    assert!(job.join("results.json").is_file());
}

#[test]
fn test_bad_options_fail_before_running() {
    let tmp = tempfile::tempdir().unwrap();
    let config = worker_config(
        tmp.path(),
        SLEEP,
        TaskOptions::new().with("seconds", "soon"),
    );

    let err = TaskWorker::new(config, registry()).run().unwrap_err();
    assert!(err.to_string().contains("soon is not a number"));
    assert!(tmp.path().join("failures").join("1_10").is_dir());
}

#[test]
fn test_keychain_offers_only_the_connected_app() {
    let app = ConnectedApp {
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        callback_url: None,
    };
    let keychain = WorkerKeychain::new(Some(app.clone()));
    assert_eq!(keychain.get_service(CONNECTED_APP_SERVICE).unwrap(), &app);
    assert!(matches!(
        keychain.get_service("github"),
        Err(PipelineError::ServiceNotConfigured(name)) if name == "github"
    ));

    let empty = WorkerKeychain::new(None);
    assert!(empty.get_service(CONNECTED_APP_SERVICE).is_err());
}

#[test]
fn test_connected_app_reaches_the_task() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = worker_config(tmp.path(), "echo", TaskOptions::new());
    config.shared.connected_app = Some(ConnectedApp {
        client_id: "client-42".to_string(),
        client_secret: "secret".to_string(),
        callback_url: None,
    });

    TaskWorker::new(config, registry()).run().unwrap();
    let results: Value = serde_json::from_str(
        &fs::read_to_string(tmp.path().join("q_outbox/1_10/results.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(results["client_id"], "client-42");
}

#[test]
fn test_connected_app_debug_hides_secret() {
    let app = ConnectedApp {
        client_id: "client".to_string(),
        client_secret: "hunter2".to_string(),
        callback_url: None,
    };
    let shown = format!("{app:?}");
    assert!(shown.contains("client"));
    assert!(!shown.contains("hunter2"));
}

#[test]
fn test_worker_config_json_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let config = worker_config(
        tmp.path(),
        "echo",
        TaskOptions::new().with("message", "hi").with("count", 3),
    );

    let json = config.to_json().unwrap();
    let parsed = WorkerConfig::from_json(&json).unwrap();
    assert_eq!(parsed, config);
    assert_eq!(parsed.schema_version, WORKER_CONFIG_SCHEMA_VERSION);
    assert_eq!(parsed.job_name(), "1_10");
}

#[test]
fn test_worker_config_rejects_other_schema_versions() {
    let tmp = tempfile::tempdir().unwrap();
    let config = worker_config(tmp.path(), "echo", TaskOptions::new());
    let mut raw: Value = serde_json::from_str(&config.to_json().unwrap()).unwrap();
    raw["schema_version"] = json!(WORKER_CONFIG_SCHEMA_VERSION + 1);

    let err = WorkerConfig::from_json(&raw.to_string()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::UnsupportedSchemaVersion { .. })
    ));

    raw.as_object_mut().unwrap().remove("schema_version");
    assert!(WorkerConfig::from_json(&raw.to_string()).is_err());
}

#[test]
fn test_thread_spawner_runs_job() {
    let tmp = tempfile::tempdir().unwrap();
    let config = worker_config(
        tmp.path(),
        SLEEP,
        TaskOptions::new().with("seconds", 0),
    );
    let spawner = ThreadSpawner::new(registry());

    let mut worker = ParallelWorker::start(&spawner, config).unwrap();
    assert_eq!(worker.job_name(), "1_10");
    worker.join().unwrap();
    assert!(!worker.is_alive());
    assert!(tmp.path().join("q_outbox").join("1_10").is_dir());
    assert!(worker.terminate().is_err());
}

#[test]
fn test_thread_worker_reports_job_failure_on_join() {
    let tmp = tempfile::tempdir().unwrap();
    let config = worker_config(tmp.path(), "explode", TaskOptions::new());
    let spawner = ThreadSpawner::new(registry());

    let mut worker = ParallelWorker::start(&spawner, config).unwrap();
    assert!(worker.join().is_err());
    assert!(tmp.path().join("failures").join("1_10").is_dir());
}

fn worker_binary() -> ProcessSpawner {
    ProcessSpawner::new(
        PathBuf::from(env!("CARGO_BIN_EXE_snowqueue")),
        vec![WORKER_SUBCOMMAND.to_string()],
    )
}

#[test]
fn test_process_worker_runs_job() {
    let tmp = tempfile::tempdir().unwrap();
    let config = worker_config(tmp.path(), SLEEP, TaskOptions::new().with("seconds", 0));

    let mut worker = ParallelWorker::start(&worker_binary(), config).unwrap();
    worker.join().unwrap();
    assert!(!worker.is_alive());
    let done = tmp.path().join("q_outbox").join("1_10");
    assert!(done.is_dir());
    let log = fs::read_to_string(done.join("Sleep.log")).unwrap();
    assert!(log.contains("SubTask Success!"));
    // Already exited.
    worker.terminate().unwrap();
}

#[test]
fn test_process_worker_failure_lands_in_failures() {
    let tmp = tempfile::tempdir().unwrap();
    // Only built-in tasks exist in a worker process.
    let config = worker_config(tmp.path(), "explode", TaskOptions::new());

    let mut worker = ParallelWorker::start(&worker_binary(), config).unwrap();
    let err = worker.join().unwrap_err();
    assert!(err.to_string().contains("worker process exited with"));
    let failed = tmp.path().join("failures").join("1_10");
    let exception = fs::read_to_string(failed.join("exception.txt")).unwrap();
    assert!(exception.contains("explode"));
    assert!(!tmp.path().join("q_inprogress").join("1_10").exists());
}

#[test]
fn test_spawn_kind_parsing() {
    assert_eq!("thread".parse::<SpawnKind>().unwrap(), SpawnKind::Thread);
    assert_eq!(" Process ".parse::<SpawnKind>().unwrap(), SpawnKind::Process);
    assert!("fork".parse::<SpawnKind>().is_err());
    assert_eq!(SpawnKind::Process.to_string(), "process");
}
