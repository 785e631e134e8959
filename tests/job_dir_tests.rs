//! Job directory naming, listing and moving.

use rusqlite::Connection;
use std::fs;
use std::path::Path;

use snowqueue::RunUntil;
use snowqueue::pipeline::data_loader_new_directory_name;
use snowqueue::queue::job_dir::{
    copy_tree, count_from_name, index_from_name, job_dir_name, list_job_dirs, move_into,
    set_count_from_names, with_count,
};
use snowqueue::tasks::JobWorkingDirectory;

#[test]
fn test_names_carry_index_and_count() {
    assert_eq!(job_dir_name(3, 2_000), "3_2000");
    assert_eq!(count_from_name("3_2000"), Some(2_000));
    assert_eq!(index_from_name("3_2000"), "3");
    assert_eq!(count_from_name("template_1"), Some(1));
    assert_eq!(index_from_name("template_1"), "template");
    assert_eq!(count_from_name("foo"), None);
    assert_eq!(index_from_name("foo"), "foo");
    assert_eq!(index_from_name("2_bad"), "2_bad");
}

#[test]
fn test_set_count_sums_names() {
    assert_eq!(set_count_from_names(&["1_10", "2_20", "3_5"]), 35);
    assert_eq!(set_count_from_names(&["1_10", "odd"]), 10);
    assert_eq!(set_count_from_names::<&str>(&[]), 0);
}

#[test]
fn test_with_count_renames_sibling() {
    let dir = Path::new("/work/data_load_inprogress/4_2000");
    assert_eq!(
        with_count(dir, 2_011),
        Path::new("/work/data_load_inprogress/4_2011")
    );
    assert_eq!(
        with_count(Path::new("/work/template_1"), 3),
        Path::new("/work/template_3")
    );
}

#[test]
fn test_listing_sorts_by_numeric_index() {
    let tmp = tempfile::tempdir().unwrap();
    for name in ["10_1", "9_1", "1_1", "zeta"] {
        fs::create_dir(tmp.path().join(name)).unwrap();
    }
    fs::write(tmp.path().join("3_1"), "a file, not a job").unwrap();

    let names: Vec<String> = list_job_dirs(tmp.path())
        .unwrap()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["1_1", "9_1", "10_1", "zeta"]);

    assert!(list_job_dirs(&tmp.path().join("missing")).unwrap().is_empty());
}

#[test]
fn test_listing_skips_hidden_partial_copies() {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir(tmp.path().join("2_5")).unwrap();
    fs::create_dir(tmp.path().join(".1_5.partial")).unwrap();

    let listed = list_job_dirs(tmp.path()).unwrap();
    assert_eq!(listed, vec![tmp.path().join("2_5")]);
}

#[test]
fn test_move_into_creates_destination_and_refuses_clobber() {
    let tmp = tempfile::tempdir().unwrap();
    let job = tmp.path().join("staging").join("1_5");
    fs::create_dir_all(job.join("nested")).unwrap();
    fs::write(job.join("nested").join("data.txt"), "rows").unwrap();

    let moved = move_into(&job, &tmp.path().join("inbox")).unwrap();
    assert_eq!(moved, tmp.path().join("inbox").join("1_5"));
    assert!(!job.exists());
    assert_eq!(
        fs::read_to_string(moved.join("nested").join("data.txt")).unwrap(),
        "rows"
    );

    let again = tmp.path().join("other").join("1_5");
    fs::create_dir_all(&again).unwrap();
    let err = move_into(&again, &tmp.path().join("inbox")).unwrap_err();
    assert!(err.to_string().contains("destination already exists"));
    assert!(again.is_dir());
}

#[test]
fn test_copy_tree_copies_everything() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("template_1");
    fs::create_dir_all(src.join("sub")).unwrap();
    fs::write(src.join("a.json"), "{}").unwrap();
    fs::write(src.join("sub").join("b.txt"), "b").unwrap();

    let dest = tmp.path().join("staging").join("1_10");
    copy_tree(&src, &dest).unwrap();
    assert_eq!(fs::read_to_string(dest.join("a.json")).unwrap(), "{}");
    assert_eq!(fs::read_to_string(dest.join("sub").join("b.txt")).unwrap(), "b");
    assert!(src.join("a.json").is_file());
}

fn job_with_rows(dir: &Path, table: &str, rows: usize) {
    fs::create_dir_all(dir).unwrap();
    let wd = JobWorkingDirectory::new(dir);
    let conn = Connection::open(wd.database_path()).unwrap();
    conn.execute_batch(&format!(
        "CREATE TABLE \"{table}\" (id INTEGER PRIMARY KEY, Name TEXT);
         CREATE TABLE \"{table}_sf_ids\" (id TEXT PRIMARY KEY, sf_id TEXT);"
    ))
    .unwrap();
    for i in 0..rows {
        conn.execute(
            &format!("INSERT INTO \"{table}\" (Name) VALUES (?1)"),
            [format!("row {i}")],
        )
        .unwrap();
    }
}

#[test]
fn test_loader_rename_uses_true_record_count() {
    let tmp = tempfile::tempdir().unwrap();
    let job = tmp.path().join("5_2");
    job_with_rows(&job, "Account", 3);

    let run_until = RunUntil::RecordsLoaded {
        sobject: "Account".to_string(),
        target: 100,
    };
    assert_eq!(
        data_loader_new_directory_name(&job, &run_until).unwrap(),
        tmp.path().join("5_3")
    );

    let other = RunUntil::RecordsLoaded {
        sobject: "Contact".to_string(),
        target: 100,
    };
    assert_eq!(
        data_loader_new_directory_name(&job, &other).unwrap(),
        tmp.path().join("5_0")
    );

    let reps = RunUntil::RecipeRepeated { target: 100 };
    assert_eq!(data_loader_new_directory_name(&job, &reps).unwrap(), job);
}

#[test]
fn test_working_directory_counts_and_cleanup() {
    let tmp = tempfile::tempdir().unwrap();
    let job = tmp.path().join("template_1");
    job_with_rows(&job, "Account", 4);
    let wd = JobWorkingDirectory::new(&job);

    assert_eq!(wd.index(), "template");
    assert_eq!(wd.record_counts().unwrap().get("Account"), Some(&4));
    assert_eq!(wd.relevant_sobjects().unwrap(), vec!["Account"]);
    assert!(wd.database_url().starts_with("sqlite:///"));

    wd.cleanup_data_tables().unwrap();
    assert!(wd.record_counts().unwrap().is_empty());
    let conn = Connection::open(wd.database_path()).unwrap();
    let sf_ids: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name = 'Account_sf_ids'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(sf_ids, 1);
}

#[test]
fn test_missing_job_database_has_no_counts() {
    let tmp = tempfile::tempdir().unwrap();
    let wd = JobWorkingDirectory::new(tmp.path());
    assert!(wd.record_counts().unwrap().is_empty());
    wd.cleanup_data_tables().unwrap();
}
