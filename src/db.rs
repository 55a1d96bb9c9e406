//! Local SQLite database layer for the ledger.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations and the shared
//! connection state all ledger operations run against. There is no durable
//! derived-value cache anywhere in the schema: reconciliation outputs are
//! recomputed from stored columns on every read, except the two carry
//! tables which are intentionally persisted one day ahead.

use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::error::{Error, Result};

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Lock the connection, mapping a poisoned mutex to a typed error.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::LockPoisoned)
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Initialize the database at `{data_dir}/ledger.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState> {
    fs::create_dir_all(data_dir)
        .map_err(|e| Error::validation(format!("failed to create data dir: {e}")))?;

    let db_path = data_dir.join("ledger.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                // Also remove WAL/SHM files if present
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<()> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Migration v1: users, submission ledger, rate registry, SKU sequencing.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- users (workers carry a location label; admin/supervisor do not)
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('worker', 'supervisor', 'admin')),
            location TEXT,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
        );

        -- submissions (one per worker per date in normal operation; the
        -- schema permits several, reporting dedupes by newest per
        -- date/location)
        CREATE TABLE IF NOT EXISTS submissions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            location TEXT,
            for_date TEXT NOT NULL, -- YYYY-MM-DD
            total_sku INTEGER NOT NULL DEFAULT 0,
            total_mr INTEGER NOT NULL DEFAULT 0,
            total_fr INTEGER NOT NULL DEFAULT 0,
            total_sale INTEGER NOT NULL DEFAULT 0,
            total_amount REAL NOT NULL DEFAULT 0,
            cash REAL NOT NULL DEFAULT 0,
            online REAL NOT NULL DEFAULT 0,
            previous_balance REAL NOT NULL DEFAULT 0,
            total_due REAL NOT NULL DEFAULT 0,
            remaining_due REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'approved')),
            created_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
            FOREIGN KEY(user_id) REFERENCES users(id)
        );

        -- submission_lines (one per SKU per submission)
        CREATE TABLE IF NOT EXISTS submission_lines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            submission_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            sku INTEGER NOT NULL DEFAULT 0,
            mr INTEGER NOT NULL DEFAULT 0,
            fr INTEGER NOT NULL DEFAULT 0,
            buyback_rate REAL NOT NULL DEFAULT 0,
            sale INTEGER NOT NULL DEFAULT 0,
            amount REAL NOT NULL DEFAULT 0,
            ordering TEXT,
            FOREIGN KEY(submission_id) REFERENCES submissions(id) ON DELETE CASCADE
        );

        -- worker_rates (retail and delivery-buyback rate upsert independently;
        -- NULL means the field was never set for that worker/SKU)
        CREATE TABLE IF NOT EXISTS worker_rates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            worker_id INTEGER NOT NULL,
            name TEXT NOT NULL, -- SKU name
            retail_rate REAL,
            buyback_rate REAL,
            UNIQUE(worker_id, name),
            FOREIGN KEY(worker_id) REFERENCES users(id) ON DELETE CASCADE
        );

        -- sku_sequence (admin-editable display order; catalog SKUs without a
        -- row sort after all sequenced entries)
        CREATE TABLE IF NOT EXISTS sku_sequence (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            seq INTEGER NOT NULL DEFAULT 0
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_submissions_status ON submissions(status);
        CREATE INDEX IF NOT EXISTS idx_submissions_for_date ON submissions(for_date);
        CREATE INDEX IF NOT EXISTS idx_submission_lines_submission ON submission_lines(submission_id);
        CREATE INDEX IF NOT EXISTS idx_worker_rates_worker ON worker_rates(worker_id);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        e
    })?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: reconciliation tables (per-location order grid, the two
/// carry tables, legacy day totals, and the admin working snapshot).
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- location_orders: one row per (date, SKU); each location column is
        -- updated independently. previous_balance is populated once from the
        -- prior date's carry and only changed by explicit overwrite.
        CREATE TABLE IF NOT EXISTS location_orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            for_date TEXT NOT NULL,
            sku_name TEXT NOT NULL,
            prabhadevi_1 INTEGER NOT NULL DEFAULT 0,
            prabhadevi_2 INTEGER NOT NULL DEFAULT 0,
            parel INTEGER NOT NULL DEFAULT 0,
            saat_rasta INTEGER NOT NULL DEFAULT 0,
            sea_face INTEGER NOT NULL DEFAULT 0,
            worli_bdd INTEGER NOT NULL DEFAULT 0,
            worli_mix INTEGER NOT NULL DEFAULT 0,
            matunga INTEGER NOT NULL DEFAULT 0,
            mahim INTEGER NOT NULL DEFAULT 0,
            koli_wada INTEGER NOT NULL DEFAULT 0,
            previous_balance INTEGER NOT NULL DEFAULT 0,
            UNIQUE(for_date, sku_name)
        );

        -- extra_orders: remainder carried into the NEXT day's order
        -- previous-balance, keyed by the date it was computed on.
        CREATE TABLE IF NOT EXISTS extra_orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            for_date TEXT NOT NULL,
            sku_name TEXT NOT NULL,
            extra_order INTEGER NOT NULL DEFAULT 0,
            UNIQUE(for_date, sku_name)
        );

        -- remark_plus_data: remainder carried into the NEXT day's sale-sheet
        -- previous-quantity column. Stored only when strictly positive.
        CREATE TABLE IF NOT EXISTS remark_plus_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            for_date TEXT NOT NULL,
            sku_name TEXT NOT NULL,
            remark_plus INTEGER NOT NULL DEFAULT 0,
            UNIQUE(for_date, sku_name)
        );

        -- order_totals: per-day aggregate row kept alongside the grid
        CREATE TABLE IF NOT EXISTS order_totals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            for_date TEXT NOT NULL,
            name TEXT NOT NULL,
            total_qty INTEGER NOT NULL DEFAULT 0,
            carryover INTEGER NOT NULL DEFAULT 0,
            UNIQUE(for_date, name)
        );

        -- main_table_data: single continuously-overwritten working snapshot,
        -- one row per SKU (not per date)
        CREATE TABLE IF NOT EXISTS main_table_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sku_name TEXT NOT NULL UNIQUE,
            tray INTEGER NOT NULL DEFAULT 0,
            tray_qty INTEGER NOT NULL DEFAULT 0,
            previous_qty INTEGER NOT NULL DEFAULT 0,
            total_qty INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
        );

        -- Indexes for the per-date read paths
        CREATE INDEX IF NOT EXISTS idx_location_orders_date ON location_orders(for_date);
        CREATE INDEX IF NOT EXISTS idx_extra_orders_date ON extra_orders(for_date);
        CREATE INDEX IF NOT EXISTS idx_remark_plus_date ON remark_plus_data(for_date);
        CREATE INDEX IF NOT EXISTS idx_order_totals_date ON order_totals(for_date);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        e
    })?;

    info!("Applied migration v2 (reconciliation tables)");
    Ok(())
}

/// Migration v3: weekday labels on dated rows and last-login tracking.
fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        ALTER TABLE users ADD COLUMN last_login INTEGER;

        ALTER TABLE submissions ADD COLUMN day_of_week TEXT;

        ALTER TABLE location_orders ADD COLUMN day_of_week TEXT;

        ALTER TABLE order_totals ADD COLUMN day_of_week TEXT;

        -- Record migration
        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(|e| {
        error!("Migration v3 failed: {e}");
        e
    })?;

    info!("Applied migration v3 (day_of_week columns, last_login)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Fully-migrated in-memory state for module tests.
#[cfg(test)]
pub(crate) fn test_state() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    run_migrations(&conn).expect("run_migrations should succeed in test");
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
