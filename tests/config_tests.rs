//! Settings file, command line and recipe parsing.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use snowqueue::engine::{Cli, Commands, parse_pairs};
use snowqueue::tasks::{Mapping, Recipe};
use snowqueue::utils::app_toml::parse_snowqueue_toml;
use snowqueue::utils::apply_file_to_opts;
use snowqueue::{BulkMode, LoadOpts, PipelineError};

#[test]
fn test_settings_file_overrides_defaults() {
    let file = parse_snowqueue_toml(
        r#"
[settings]
num_processes = 3
num_loaders = 9
bulk_mode = "serial"
min_portion_size = 100
max_portion_size = 1000
growth_factor = 1.5
error_threshold = 4
wait_time = 1
load_queue_size = 7
"#,
    )
    .unwrap();
    let mut opts = LoadOpts::default();
    apply_file_to_opts(&file, &mut opts);

    assert_eq!(opts.num_generator_workers, Some(3));
    assert_eq!(opts.num_loader_workers, Some(9));
    assert_eq!(opts.bulk_mode, BulkMode::Serial);
    assert_eq!(opts.min_portion_size, 100);
    assert_eq!(opts.max_portion_size, 1000);
    assert_eq!(opts.growth_factor, 1.5);
    assert_eq!(opts.error_threshold, 4);
    assert_eq!(opts.wait_time, Duration::from_secs(1));
    assert_eq!(opts.load_queue_size, 7);
    // Untouched.
    assert!(!opts.ignore_row_errors);
    assert_eq!(opts.org_poll_interval, Duration::from_secs(10));
}

#[test]
fn test_empty_settings_file_keeps_defaults() {
    let file = parse_snowqueue_toml("").unwrap();
    let mut opts = LoadOpts::default();
    apply_file_to_opts(&file, &mut opts);

    assert_eq!(opts.min_portion_size, 2_000);
    assert_eq!(opts.max_portion_size, 250_000);
    assert_eq!(opts.growth_factor, 1.1);
    assert_eq!(opts.error_threshold, 0);
    assert_eq!(opts.load_queue_size, 15);
    assert_eq!(opts.wait_time, Duration::from_secs(3));

    assert!(parse_snowqueue_toml("[settings]\nnum_processes = \"many\"").is_err());
}

#[test]
fn test_recipe_options_pairs() {
    let pairs = parse_pairs("VAR1:foo, VAR2=bar,").unwrap();
    assert_eq!(pairs.get("VAR1").map(String::as_str), Some("foo"));
    assert_eq!(pairs.get("VAR2").map(String::as_str), Some("bar"));
    assert!(parse_pairs("").unwrap().is_empty());
    assert!(matches!(
        parse_pairs("VAR1"),
        Err(PipelineError::TaskOptions(msg)) if msg.starts_with("Var:value pair not correct")
    ));
}

#[test]
fn test_run_command_line() {
    let cli = Cli::try_parse_from([
        "snowqueue",
        "run",
        "--recipe",
        "accounts.recipe.toml",
        "--org",
        "org.db",
        "--run-until-records-loaded",
        "Account:1000",
        "--num-processes",
        "4",
        "--ignore-row-errors",
        "--debug",
        "false",
        "-v",
    ])
    .unwrap();
    let Commands::Run(args) = cli.command else {
        panic!("expected the run command");
    };
    assert_eq!(args.recipe, PathBuf::from("accounts.recipe.toml"));
    assert_eq!(args.org_name, "default");
    assert_eq!(args.run_until_records_loaded.as_deref(), Some("Account:1000"));
    assert_eq!(args.num_processes, Some(4));
    assert_eq!(args.ignore_row_errors, Some(true));
    assert_eq!(args.debug, Some(false));
    assert_eq!(args.verbose, Some(true));
    assert_eq!(args.drop_missing_schema, None);

    assert!(Cli::try_parse_from(["snowqueue", "run", "--org", "org.db"]).is_err());
    assert!(Cli::try_parse_from(["snowqueue", "worker"]).is_ok());
}

#[test]
fn test_recipe_parsing_and_mapping() {
    let recipe = Recipe::parse(
        r#"
[vars]
size = 3

[[object]]
name = "Account"
just_once = true
[object.fields]
Name = "Account {n}"

[[object]]
name = "Contact"
count = 2
[object.fields]
LastName = "Contact {n}"
AccountId = "ref:Account"
ReportsToId = "ref:Contact"
"#,
    )
    .unwrap();
    assert_eq!(recipe.object_names(), vec!["Account", "Contact"]);
    let vars = recipe.resolve_vars(&Default::default()).unwrap();
    assert_eq!(vars.get("size").map(String::as_str), Some("3"));

    let mapping = Mapping::from_recipe(&recipe);
    assert_eq!(mapping.steps.len(), 2);
    let contact = &mapping.steps[1];
    assert_eq!(contact.name(), "Insert Contact");
    assert_eq!(contact.fields, vec!["LastName"]);
    assert_eq!(
        contact.lookups.get("AccountId").map(String::as_str),
        Some("Account")
    );
    assert_eq!(
        contact.columns(),
        vec!["LastName", "AccountId", "ReportsToId"]
    );
}

#[test]
fn test_recipe_rejects_bad_references() {
    let forward = r#"
[[object]]
name = "Contact"
[object.fields]
AccountId = "ref:Account"

[[object]]
name = "Account"
"#;
    let err = Recipe::parse(forward).unwrap_err();
    assert!(err.to_string().contains("must be declared earlier"));

    assert!(Recipe::parse("").is_err());

    let org_id = r#"
[[object]]
name = "Account"
[object.fields]
Id = "1"
"#;
    assert!(Recipe::parse(org_id).is_err());

    let injection = r#"
[[object]]
name = "Account; DROP TABLE x"
"#;
    assert!(Recipe::parse(injection).is_err());
}
