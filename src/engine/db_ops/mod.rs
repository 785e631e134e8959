//! SQLite helpers shared by the org client and the generate/load subtasks.

mod connection;
mod schema;

pub use connection::{open_db, open_db_url, sqlite_path_from_url, sqlite_url};
pub use schema::{
    SF_IDS_SUFFIX, add_missing_columns, count_rows, create_table, drop_tables, list_tables,
    quote_ident, sf_ids_table, table_columns, table_exists, validate_ident,
};

/// WAL tuning pragmas. Use after `PRAGMA journal_mode = WAL`.
pub(crate) const WAL_PRAGMAS: &str = r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 10000;
        PRAGMA journal_size_limit = 67108864;
        "#;
