//! Generate and load subtasks, run directly in a job directory.

use rusqlite::Connection;
use serde_json::Value;
use std::fs;
use std::path::Path;

use snowqueue::queue::{JobLog, WorkerKeychain};
use snowqueue::tasks::generate::Continuation;
use snowqueue::tasks::{GenerateData, JobWorkingDirectory, LoadData, Task, TaskContext};
use snowqueue::{
    LoadResults, OrgConnection, PipelineError, ProjectDescriptor, StepStatus, TaskOptions,
};

const RECIPE: &str = r#"
[[object]]
name = "Account"
just_once = true
[object.fields]
Name = "Account {n}"

[[object]]
name = "Contact"
count = 3
[object.fields]
LastName = "Contact {n} in {i}"
AccountId = "ref:Account"
"#;

fn run_task(
    task: &mut dyn Task,
    org: &OrgConnection,
    dir: &Path,
    options: &TaskOptions,
) -> anyhow::Result<Option<Value>> {
    let log = JobLog::console("test");
    let keychain = WorkerKeychain::new(None);
    let project = ProjectDescriptor::default();
    let ctx = TaskContext {
        options,
        org,
        project: &project,
        keychain: &keychain,
        working_dir: dir,
        log: &log,
    };
    task.run(&ctx)
}

fn generate(
    root: &Path,
    job: &str,
    num_records: u64,
    tablename: Option<&str>,
    continuation: Option<&Path>,
) -> anyhow::Result<JobWorkingDirectory> {
    let recipe = root.join("recipe.toml");
    fs::write(&recipe, RECIPE)?;
    let dir = root.join(job);
    fs::create_dir_all(&dir)?;
    let wd = JobWorkingDirectory::new(&dir);
    let mut options = TaskOptions::new()
        .with("generator_yaml", recipe.display().to_string())
        .with("num_records", num_records)
        .with("database_url", wd.database_url());
    if let Some(name) = tablename {
        options.insert("num_records_tablename", name);
    }
    options.insert_path("generate_mapping_file", &wd.mapping_file());
    options.insert_path("generate_continuation_file", &wd.continuation_file());
    if let Some(path) = continuation {
        options.insert_path("continuation_file", path);
    }
    let org = OrgConnection::sqlite("test", &root.join("org.db"));
    let mut task = GenerateData::from_options(&options)?;
    run_task(&mut task, &org, &dir, &options)?;
    Ok(wd)
}

fn load(
    org: &OrgConnection,
    wd: &JobWorkingDirectory,
    extra: TaskOptions,
) -> anyhow::Result<LoadResults> {
    let mut options = TaskOptions::new().with("database_url", wd.database_url());
    options.insert_path("mapping", &wd.mapping_file());
    options.merge(extra);
    let mut task = LoadData::from_options(&options)?;
    let value = run_task(&mut task, org, wd.dir(), &options)?.unwrap();
    Ok(serde_json::from_value(value)?)
}

fn column(db: &Path, sql: &str) -> Vec<String> {
    let conn = Connection::open(db).unwrap();
    let mut stmt = conn.prepare(sql).unwrap();
    stmt.query_map([], |r| r.get::<_, String>(0))
        .unwrap()
        .map(|r| r.unwrap())
        .collect()
}

#[test]
fn test_generate_counts_iterations_or_records() {
    let tmp = tempfile::tempdir().unwrap();
    let wd = generate(tmp.path(), "1_4", 4, None, None).unwrap();
    let counts = wd.record_counts().unwrap();
    assert_eq!(counts.get("Account"), Some(&1));
    assert_eq!(counts.get("Contact"), Some(&12));
    assert!(wd.mapping_file().is_file());

    let continuation = Continuation::load(&wd.continuation_file()).unwrap();
    assert_eq!(continuation.iterations, 4);
    assert_eq!(continuation.next_ids.get("Contact"), Some(&13));
    assert_eq!(continuation.just_once_ids.get("Account"), Some(&1));

    // Seven Contacts take three iterations of three.
    let wd = generate(tmp.path(), "2_7", 7, Some("Contact"), None).unwrap();
    assert_eq!(wd.record_counts().unwrap().get("Contact"), Some(&9));
}

#[test]
fn test_generate_rejects_unknown_count_object() {
    let tmp = tempfile::tempdir().unwrap();
    let err = generate(tmp.path(), "1_4", 4, Some("Lead"), None)
        .err()
        .unwrap();
    assert!(err.to_string().contains("`Lead` is not generated by recipe"));

    let err = generate(tmp.path(), "2_4", 4, Some("Account"), None)
        .err()
        .unwrap();
    assert!(err.to_string().contains("Recipe never repeats `Account`"));
}

#[test]
fn test_continuation_skips_just_once_objects() {
    let tmp = tempfile::tempdir().unwrap();
    let first = generate(tmp.path(), "template_1", 1, None, None).unwrap();
    let second = generate(
        tmp.path(),
        "1_2",
        2,
        None,
        Some(&first.continuation_file()),
    )
    .unwrap();

    let counts = second.record_counts().unwrap();
    assert_eq!(counts.get("Account"), Some(&0));
    assert_eq!(counts.get("Contact"), Some(&6));
    let ids = column(
        &second.database_path(),
        "SELECT CAST(id AS TEXT) FROM Contact ORDER BY id",
    );
    assert_eq!(ids, vec!["4", "5", "6", "7", "8", "9"]);
    let refs = column(&second.database_path(), "SELECT DISTINCT AccountId FROM Contact");
    assert_eq!(refs, vec!["1"]);
    let names = column(
        &second.database_path(),
        "SELECT LastName FROM Contact ORDER BY id LIMIT 1",
    );
    assert_eq!(names, vec!["Contact 4 in 2"]);
}

#[test]
fn test_load_translates_lookups_to_org_ids() {
    let tmp = tempfile::tempdir().unwrap();
    let org_db = tmp.path().join("org.db");
    {
        // Existing rows push the org's ids away from the local ones.
        let conn = Connection::open(&org_db).unwrap();
        conn.execute_batch(
            "CREATE TABLE Account (Id INTEGER PRIMARY KEY AUTOINCREMENT, Name TEXT);
             INSERT INTO Account (Name) VALUES ('old 1'), ('old 2');",
        )
        .unwrap();
    }
    let org = OrgConnection::sqlite("test", &org_db);
    let wd = generate(tmp.path(), "1_2", 2, None, None).unwrap();

    let results = load(&org, &wd, TaskOptions::new()).unwrap();
    let contacts = &results.step_results["Insert Contact"];
    assert_eq!(contacts.records_processed, 6);
    assert_eq!(contacts.total_row_errors, 0);
    assert_eq!(contacts.status, StepStatus::Success);

    let refs = column(&org_db, "SELECT DISTINCT AccountId FROM Contact");
    assert_eq!(refs, vec!["3"]);

    // Loading again with kept ids inserts nothing new.
    let again = load(&org, &wd, TaskOptions::new().with("reset_oids", false)).unwrap();
    assert_eq!(again.step_results["Insert Contact"].records_processed, 0);
    assert_eq!(column(&org_db, "SELECT CAST(COUNT(*) AS TEXT) FROM Contact"), vec!["6"]);
}

fn strict_org(root: &Path, schema: &str) -> OrgConnection {
    let org_db = root.join("org.db");
    let conn = Connection::open(&org_db).unwrap();
    conn.execute_batch(schema).unwrap();
    let mut org = OrgConnection::sqlite("strict", &org_db);
    org.config
        .insert("strict_schema".to_string(), "true".to_string());
    org
}

#[test]
fn test_strict_org_rejects_missing_objects() {
    let tmp = tempfile::tempdir().unwrap();
    let org = strict_org(
        tmp.path(),
        "CREATE TABLE Account (Id INTEGER PRIMARY KEY AUTOINCREMENT, Name TEXT);",
    );
    let wd = generate(tmp.path(), "1_1", 1, None, None).unwrap();

    let err = load(&org, &wd, TaskOptions::new()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::BulkData(msg)) if msg.contains("Contact")
    ));
}

#[test]
fn test_drop_missing_schema_skips_what_the_org_lacks() {
    let tmp = tempfile::tempdir().unwrap();
    let org = strict_org(
        tmp.path(),
        "CREATE TABLE Account (Id INTEGER PRIMARY KEY AUTOINCREMENT);
         CREATE TABLE Contact (Id INTEGER PRIMARY KEY AUTOINCREMENT, AccountId TEXT);",
    );
    let wd = generate(tmp.path(), "1_1", 1, None, None).unwrap();

    let results = load(
        &org,
        &wd,
        TaskOptions::new().with("drop_missing_schema", true),
    )
    .unwrap();
    assert_eq!(results.step_results["Insert Account"].records_processed, 1);
    assert_eq!(results.step_results["Insert Contact"].records_processed, 3);
    let org_db = tmp.path().join("org.db");
    assert_eq!(
        column(&org_db, "SELECT DISTINCT AccountId FROM Contact"),
        vec!["1"]
    );
}

#[test]
fn test_row_errors_fail_unless_ignored() {
    let tmp = tempfile::tempdir().unwrap();
    let wd = generate(tmp.path(), "1_1", 1, None, None).unwrap();
    {
        // A Contact pointing at an Account that was never generated.
        let conn = Connection::open(wd.database_path()).unwrap();
        conn.execute(
            "INSERT INTO Contact (id, LastName, AccountId) VALUES (99, 'Orphan', '42')",
            [],
        )
        .unwrap();
    }
    let org = OrgConnection::sqlite("test", &tmp.path().join("org.db"));

    let err = load(&org, &wd, TaskOptions::new()).unwrap_err();
    assert!(err.to_string().contains("1 row errors"));

    let results = load(
        &org,
        &wd,
        TaskOptions::new()
            .with("ignore_row_errors", true)
            .with("reset_oids", false),
    )
    .unwrap();
    let contacts = &results.step_results["Insert Contact"];
    assert_eq!(contacts.total_row_errors, 1);
    assert_eq!(contacts.status, StepStatus::Failure);
}
