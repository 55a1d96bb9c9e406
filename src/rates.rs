//! Per-worker SKU rates.
//!
//! Two rates per (worker, SKU): the retail rate shown on the worker's sale
//! sheet and the buyback rate used to price returned stock. Both live in
//! one row but upsert independently; a NULL column means that rate was
//! never set, which matters for the preserve-existing bulk application.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use tracing::info;

use crate::db::DbState;
use crate::error::Result;
use crate::users;

/// Which workers a bulk rate application touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateTarget {
    AllWorkers,
    OneWorker(i64),
}

// ---------------------------------------------------------------------------
// Single-worker reads and writes
// ---------------------------------------------------------------------------

/// Retail rates for one worker, keyed by SKU name. Unset (NULL) rates are
/// absent from the map.
pub fn get_rates(db: &DbState, worker_id: i64) -> Result<HashMap<String, f64>> {
    let conn = db.lock()?;
    fetch_rate_column(&conn, worker_id, "retail_rate")
}

/// Buyback rates for one worker, keyed by SKU name.
pub fn get_buyback_rates(db: &DbState, worker_id: i64) -> Result<HashMap<String, f64>> {
    let conn = db.lock()?;
    fetch_rate_column(&conn, worker_id, "buyback_rate")
}

pub(crate) fn fetch_rate_column(
    conn: &Connection,
    worker_id: i64,
    column: &str,
) -> Result<HashMap<String, f64>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT name, {column} FROM worker_rates WHERE worker_id = ?1 AND {column} IS NOT NULL"
    ))?;
    let map = stmt
        .query_map([worker_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<HashMap<String, f64>>>()?;
    Ok(map)
}

/// Set one worker's retail rate for a SKU without touching the buyback rate.
pub fn set_rate(db: &DbState, worker_id: i64, sku_name: &str, rate: f64) -> Result<()> {
    let conn = db.lock()?;
    upsert_rate(&conn, worker_id, sku_name, "retail_rate", rate)
}

/// Set one worker's buyback rate for a SKU without touching the retail rate.
pub fn set_buyback_rate(db: &DbState, worker_id: i64, sku_name: &str, rate: f64) -> Result<()> {
    let conn = db.lock()?;
    upsert_rate(&conn, worker_id, sku_name, "buyback_rate", rate)
}

fn upsert_rate(
    conn: &Connection,
    worker_id: i64,
    sku_name: &str,
    column: &str,
    rate: f64,
) -> Result<()> {
    // The other rate column stays NULL on insert and untouched on update.
    conn.execute(
        &format!(
            "INSERT INTO worker_rates (worker_id, name, {column}) VALUES (?1, ?2, ?3)
             ON CONFLICT(worker_id, name) DO UPDATE SET {column} = excluded.{column}"
        ),
        params![worker_id, sku_name, rate],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Bulk application
// ---------------------------------------------------------------------------

/// Apply a retail rate for one SKU across the target workers.
///
/// With `preserve_existing`, workers that already have a retail rate for
/// the SKU keep it. Returns the number of workers actually written.
pub fn apply_rate(
    db: &DbState,
    target: RateTarget,
    sku_name: &str,
    rate: f64,
    preserve_existing: bool,
) -> Result<usize> {
    apply_rate_inner(db, target, sku_name, rate, "retail_rate", preserve_existing)
}

/// Apply a buyback rate for one SKU across the target workers.
///
/// With `preserve_existing`, only a non-NULL, non-zero buyback rate counts
/// as already set: a stored zero is treated as a placeholder and gets
/// overwritten.
pub fn apply_buyback_rate(
    db: &DbState,
    target: RateTarget,
    sku_name: &str,
    rate: f64,
    preserve_existing: bool,
) -> Result<usize> {
    apply_rate_inner(db, target, sku_name, rate, "buyback_rate", preserve_existing)
}

fn apply_rate_inner(
    db: &DbState,
    target: RateTarget,
    sku_name: &str,
    rate: f64,
    column: &str,
    preserve_existing: bool,
) -> Result<usize> {
    let worker_ids: Vec<i64> = match target {
        RateTarget::OneWorker(id) => vec![id],
        RateTarget::AllWorkers => users::get_workers(db)?.iter().map(|w| w.id).collect(),
    };

    let conn = db.lock()?;
    let mut written = 0usize;

    // Each worker upserts independently; a failure stops the loop but does
    // not undo workers already written.
    for worker_id in worker_ids {
        if preserve_existing {
            let existing: Option<Option<f64>> = conn
                .query_row(
                    &format!(
                        "SELECT {column} FROM worker_rates WHERE worker_id = ?1 AND name = ?2"
                    ),
                    params![worker_id, sku_name],
                    |row| row.get(0),
                )
                .optional()?;
            let is_set = match existing.flatten() {
                Some(v) => column != "buyback_rate" || v != 0.0,
                None => false,
            };
            if is_set {
                continue;
            }
        }
        upsert_rate(&conn, worker_id, sku_name, column, rate)?;
        written += 1;
    }

    info!(
        "Applied {column} {rate} for '{sku_name}' to {written} worker(s) \
         (preserve_existing={preserve_existing})"
    );
    Ok(written)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::users::Role;

    fn worker(state: &DbState, name: &str, location: &str) -> i64 {
        users::create_user(state, name, "pw", Role::Worker, Some(location)).unwrap()
    }

    #[test]
    fn test_set_rate_does_not_clobber_buyback() {
        let state = db::test_state();
        let id = worker(&state, "w1", "PAREL");

        set_buyback_rate(&state, id, "BR 400", 2.5).unwrap();
        set_rate(&state, id, "BR 400", 40.0).unwrap();
        set_rate(&state, id, "BR 400", 42.0).unwrap();

        assert_eq!(get_rates(&state, id).unwrap()["BR 400"], 42.0);
        assert_eq!(get_buyback_rates(&state, id).unwrap()["BR 400"], 2.5);
    }

    #[test]
    fn test_unset_rates_absent_from_map() {
        let state = db::test_state();
        let id = worker(&state, "w1", "PAREL");
        set_rate(&state, id, "BR 400", 40.0).unwrap();

        let buyback = get_buyback_rates(&state, id).unwrap();
        assert!(!buyback.contains_key("BR 400"));
    }

    #[test]
    fn test_apply_rate_preserves_existing_retail() {
        let state = db::test_state();
        let w1 = worker(&state, "w1", "PAREL");
        let w2 = worker(&state, "w2", "MAHIM");
        set_rate(&state, w1, "BR 400", 38.0).unwrap();

        let written =
            apply_rate(&state, RateTarget::AllWorkers, "BR 400", 40.0, true).unwrap();
        assert_eq!(written, 1);
        assert_eq!(get_rates(&state, w1).unwrap()["BR 400"], 38.0);
        assert_eq!(get_rates(&state, w2).unwrap()["BR 400"], 40.0);
    }

    #[test]
    fn test_apply_buyback_overwrites_zero_placeholder() {
        let state = db::test_state();
        let w1 = worker(&state, "w1", "PAREL");
        let w2 = worker(&state, "w2", "MAHIM");
        set_buyback_rate(&state, w1, "BR 400", 0.0).unwrap();
        set_buyback_rate(&state, w2, "BR 400", 2.0).unwrap();

        let written =
            apply_buyback_rate(&state, RateTarget::AllWorkers, "BR 400", 2.5, true).unwrap();
        assert_eq!(written, 1, "zero placeholder should be overwritten");
        assert_eq!(get_buyback_rates(&state, w1).unwrap()["BR 400"], 2.5);
        assert_eq!(get_buyback_rates(&state, w2).unwrap()["BR 400"], 2.0);
    }

    #[test]
    fn test_apply_without_preserve_overwrites_all() {
        let state = db::test_state();
        let w1 = worker(&state, "w1", "PAREL");
        let w2 = worker(&state, "w2", "MAHIM");
        set_rate(&state, w1, "BR 400", 38.0).unwrap();

        let written =
            apply_rate(&state, RateTarget::AllWorkers, "BR 400", 40.0, false).unwrap();
        assert_eq!(written, 2);
        assert_eq!(get_rates(&state, w1).unwrap()["BR 400"], 40.0);
        assert_eq!(get_rates(&state, w2).unwrap()["BR 400"], 40.0);
    }

    #[test]
    fn test_apply_to_single_worker() {
        let state = db::test_state();
        let w1 = worker(&state, "w1", "PAREL");
        let w2 = worker(&state, "w2", "MAHIM");

        apply_rate(&state, RateTarget::OneWorker(w1), "BR 400", 40.0, false).unwrap();

        assert_eq!(get_rates(&state, w1).unwrap()["BR 400"], 40.0);
        assert!(get_rates(&state, w2).unwrap().is_empty());
    }
}
