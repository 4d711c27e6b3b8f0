use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, Transaction};
use tracing::{info, warn};

use crate::config::HistoryConfig;
use crate::error::HistoryError;
use crate::legacy;
use crate::migrations::{CURRENT_SCHEMA, CURRENT_VERSION, V1_TO_V2, V2_TO_V3};
use crate::upsert::IdentityResolver;

pub struct HistoryDb {
    pub path: PathBuf,
    pub conn: Connection,
}

pub fn open_history(config: &HistoryConfig, resolver: &IdentityResolver) -> Result<HistoryDb, HistoryError> {
    let path = config.db_path();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut conn = Connection::open(&path).map_err(|source| HistoryError::Open {
        path: path.clone(),
        source,
    })?;
    configure_connection(&conn, config.busy_timeout_ms)?;
    let backup_of = config.backup_before_migration.then_some(path.as_path());
    let version = apply_migrations(&mut conn, backup_of, resolver)?;
    info!(path = %path.display(), version, "history database opened");
    Ok(HistoryDb { path, conn })
}

pub fn configure_connection(conn: &Connection, busy_timeout_ms: u64) -> Result<(), HistoryError> {
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL; \
         PRAGMA synchronous = NORMAL; \
         PRAGMA foreign_keys = ON; \
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(())
}

pub fn schema_version(conn: &Connection) -> Result<i64, HistoryError> {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .map_err(|_| HistoryError::VersionUnreadable)
}

/// Brings the schema to `CURRENT_VERSION` and returns the version reached.
///
/// Every step runs in its own transaction together with its version bump, so
/// a failed or interrupted step leaves the database at the previous version.
/// When `backup_of` is set, the file at that path is copied aside once before
/// the first step touches an existing database.
pub fn apply_migrations(
    conn: &mut Connection,
    backup_of: Option<&Path>,
    resolver: &IdentityResolver,
) -> Result<i64, HistoryError> {
    let mut version = schema_version(conn)?;
    if version == CURRENT_VERSION {
        return Ok(version);
    }
    if !(0..CURRENT_VERSION).contains(&version) {
        return Err(HistoryError::UnsupportedVersion(version));
    }

    let fresh = version == 0 && !has_user_tables(conn)?;
    if !fresh {
        if let Some(path) = backup_of {
            backup_database(conn, path);
        }
    }

    while version < CURRENT_VERSION {
        let from = version;
        version = migrate_step(conn, from, resolver).map_err(|err| HistoryError::Migration {
            from,
            source: Box::new(err),
        })?;
        info!(from, to = version, "history schema migrated");
    }
    Ok(version)
}

fn migrate_step(conn: &mut Connection, from: i64, resolver: &IdentityResolver) -> Result<i64, HistoryError> {
    match from {
        0 => {
            run_step(conn, false, |tx| {
                tx.execute_batch(CURRENT_SCHEMA)?;
                let stats = legacy::migrate_legacy_tables(tx, resolver)?;
                if stats.migrated + stats.skipped > 0 {
                    info!(migrated = stats.migrated, skipped = stats.skipped, "legacy history rows migrated");
                }
                set_schema_version(tx, CURRENT_VERSION)
            })?;
            Ok(CURRENT_VERSION)
        }
        1 => {
            run_step(conn, true, |tx| {
                tx.execute_batch(V1_TO_V2)?;
                set_schema_version(tx, 2)
            })?;
            Ok(2)
        }
        2 => {
            run_step(conn, false, |tx| {
                tx.execute_batch(V2_TO_V3)?;
                set_schema_version(tx, 3)
            })?;
            Ok(3)
        }
        other => Err(HistoryError::UnsupportedVersion(other)),
    }
}

/// Table rebuilds need foreign key enforcement off, and SQLite ignores that
/// pragma inside a transaction, so it is toggled around it.
fn run_step<F>(conn: &mut Connection, rebuilds_tables: bool, step: F) -> Result<(), HistoryError>
where
    F: FnOnce(&Transaction) -> Result<(), HistoryError>,
{
    if rebuilds_tables {
        conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
    }
    let result = (|| -> Result<(), HistoryError> {
        let tx = conn.transaction()?;
        step(&tx)?;
        if rebuilds_tables {
            report_foreign_key_violations(&tx)?;
        }
        tx.commit()?;
        Ok(())
    })();
    if rebuilds_tables {
        if let Err(err) = conn.execute_batch("PRAGMA foreign_keys = ON;") {
            if result.is_ok() {
                return Err(err.into());
            }
            warn!(error = %err, "failed to re-enable foreign keys after failed migration");
        }
    }
    result
}

fn report_foreign_key_violations(conn: &Connection) -> Result<(), HistoryError> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_check;")?;
    let mut rows = stmt.query([])?;
    let mut violations = 0usize;
    while let Some(row) = rows.next()? {
        let table: String = row.get(0)?;
        if violations == 0 {
            warn!(table, "dangling reference carried over by migration");
        }
        violations += 1;
    }
    if violations > 0 {
        warn!(violations, "foreign key violations after migration");
    }
    Ok(())
}

fn set_schema_version(conn: &Connection, version: i64) -> Result<(), HistoryError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

fn has_user_tables(conn: &Connection) -> Result<bool, HistoryError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(1) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%';",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn backup_path_for(path: &Path, unix_ts: i64) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{unix_ts}"));
    PathBuf::from(name)
}

/// Best effort: a failed copy is logged and the migration goes ahead.
pub fn backup_database(conn: &Connection, path: &Path) -> Option<PathBuf> {
    if !path.exists() {
        return None;
    }
    if let Err(err) = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);") {
        warn!(error = %err, "wal checkpoint before backup failed");
    }
    let target = backup_path_for(path, Utc::now().timestamp());
    match fs::copy(path, &target) {
        Ok(_) => {
            info!(backup = %target.display(), "history database backed up");
            Some(target)
        }
        Err(err) => {
            warn!(error = %err, backup = %target.display(), "history database backup failed");
            None
        }
    }
}
