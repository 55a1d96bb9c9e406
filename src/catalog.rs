//! SKU catalog and display sequencing.
//!
//! The master SKU list is fixed; admins only control display order via the
//! `sku_sequence` table. The trays-per-unit reference table is static:
//! loose items (buns, slices) are 1-per-unit, and the two made-to-order
//! items carry an explicit zero so tray conversion is skipped entirely.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::DbState;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Static reference data
// ---------------------------------------------------------------------------

/// Master catalog, in declaration order.
pub const DEFAULT_SKUS: [&str; 33] = [
    "LARGE 350",
    "ECO 800",
    "HALF 150",
    "POP 500",
    "BR 400",
    "FRT 200",
    "H ATTA 200",
    "MD 200",
    "MG 400",
    "WW 450",
    "H SLICE 450",
    "600 GM",
    "BR 200",
    "POP 250",
    "MG 200",
    "ATTA 400",
    "BUM 70",
    "A.KULCHA",
    "M.KULCHA",
    "BUR 200",
    "BUR 100",
    "PAV 250",
    "GAR 300",
    "BOMB.PAV",
    "VAN 50",
    "CHO 50",
    "M PIZZA 150",
    "M BUN",
    "SLICE",
    "D'nt Worry",
    "FINGER",
    "TOAST",
    "C.ROLL",
];

/// Last SKU of the "main" section; everything after it is "extra".
/// Presentation split only; the reconciliation engine treats all SKUs
/// uniformly.
pub const MAIN_SECTION_BOUNDARY: &str = "M PIZZA 150";

/// Units per tray per SKU. Explicit zeros mark SKUs that are never
/// converted to trays.
const TRAYS_PER_UNIT: [(&str, i64); 33] = [
    ("LARGE 350", 24),
    ("ECO 800", 15),
    ("HALF 150", 48),
    ("POP 500", 20),
    ("BR 400", 24),
    ("FRT 200", 35),
    ("H ATTA 200", 48),
    ("MD 200", 42),
    ("MG 400", 24),
    ("WW 450", 24),
    ("H SLICE 450", 15),
    ("600 GM", 14),
    ("BR 200", 48),
    ("POP 250", 20),
    ("MG 200", 24),
    ("ATTA 400", 24),
    ("BUM 70", 20),
    ("A.KULCHA", 9),
    ("M.KULCHA", 9),
    ("BUR 200", 6),
    ("BUR 100", 20),
    ("PAV 250", 16),
    ("GAR 300", 12),
    ("BOMB.PAV", 6),
    ("VAN 50", 30),
    ("CHO 50", 30),
    ("M PIZZA 150", 12),
    ("M BUN", 1),
    ("SLICE", 1),
    ("D'nt Worry", 1),
    ("FINGER", 1),
    ("TOAST", 0),
    ("C.ROLL", 0),
];

/// Units per tray for a SKU. SKUs missing from the reference table default
/// to 1; an explicit zero means "no tray conversion".
pub fn trays_per_unit(name: &str) -> i64 {
    TRAYS_PER_UNIT
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, v)| *v)
        .unwrap_or(1)
}

fn catalog_index(name: &str) -> usize {
    DEFAULT_SKUS
        .iter()
        .position(|n| *n == name)
        .unwrap_or(usize::MAX)
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sku {
    pub name: String,
    pub sequence: i64,
}

// ---------------------------------------------------------------------------
// Sequencing
// ---------------------------------------------------------------------------

/// All catalog SKUs sorted by stored sequence ascending.
///
/// Ties and equal sequence values break by catalog order; catalog SKUs
/// without a sequence row are appended after all sequenced entries, in
/// catalog order.
pub fn list_skus_ordered(db: &DbState) -> Result<Vec<Sku>> {
    let conn = db.lock()?;
    list_skus_ordered_tx(&conn)
}

pub(crate) fn list_skus_ordered_tx(conn: &Connection) -> Result<Vec<Sku>> {
    let mut stmt = conn.prepare("SELECT name, seq FROM sku_sequence")?;
    let mut stored: Vec<(String, i64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<_>>()?;

    // Only catalog members participate; stale rows for retired names are
    // ignored here (cleanup_sku_names removes them for good).
    stored.retain(|(name, _)| catalog_index(name) != usize::MAX);
    stored.sort_by_key(|(name, seq)| (*seq, catalog_index(name)));

    let mut out: Vec<Sku> = stored
        .into_iter()
        .map(|(name, sequence)| Sku { name, sequence })
        .collect();

    let mut next_seq = out.last().map(|s| s.sequence + 1).unwrap_or(1);
    for name in DEFAULT_SKUS {
        if !out.iter().any(|s| s.name == name) {
            out.push(Sku {
                name: name.to_string(),
                sequence: next_seq,
            });
            next_seq += 1;
        }
    }

    Ok(out)
}

/// Upsert the display position of a single SKU. Positions need not be
/// unique or contiguous.
pub fn set_sku_sequence(db: &DbState, name: &str, position: i64) -> Result<()> {
    let conn = db.lock()?;
    conn.execute(
        "INSERT INTO sku_sequence (name, seq) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET seq = excluded.seq",
        params![name, position],
    )?;
    Ok(())
}

/// Split an ordered SKU list at the main/extra boundary. Everything up to
/// and including the boundary SKU is "main"; if the boundary is absent the
/// whole list is main.
pub fn split_main_extra(skus: &[Sku]) -> (&[Sku], &[Sku]) {
    match skus.iter().position(|s| s.name == MAIN_SECTION_BOUNDARY) {
        Some(i) => skus.split_at(i + 1),
        None => (skus, &[]),
    }
}

// ---------------------------------------------------------------------------
// Catalog cleanup
// ---------------------------------------------------------------------------

/// Legacy spellings that must collapse into their catalog names.
const SKU_RENAMES: [(&str, &str); 2] = [("BR200", "BR 200"), ("MG200", "MG 200")];

/// Retired SKU names purged from every table that stores one.
const RETIRED_SKUS: [&str; 16] = [
    "VV 250", "VV 450", "VV350", "AT 400", "BUM70", "AK", "MK", "BUR200", "BUR190", "PAV250",
    "GAP300", "B.BRW250", "V450", "CHD50", "MP150", "W D/DRY",
];

/// Every table/column pair that stores a SKU name.
const SKU_NAME_COLUMNS: [(&str, &str); 8] = [
    ("sku_sequence", "name"),
    ("worker_rates", "name"),
    ("main_table_data", "sku_name"),
    ("order_totals", "name"),
    ("extra_orders", "sku_name"),
    ("remark_plus_data", "sku_name"),
    ("submission_lines", "name"),
    ("location_orders", "sku_name"),
];

/// Collapse legacy SKU spellings and purge retired names, atomically.
///
/// On a rename collision in `sku_sequence` (both spellings present) the
/// row with the higher sequence wins.
pub fn cleanup_sku_names(db: &DbState) -> Result<()> {
    let conn = db.lock()?;

    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = (|| -> Result<()> {
        for (old_name, new_name) in SKU_RENAMES {
            let old_seq: Option<i64> = conn
                .query_row(
                    "SELECT seq FROM sku_sequence WHERE name = ?1",
                    params![old_name],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(old_seq) = old_seq {
                let new_seq: Option<i64> = conn
                    .query_row(
                        "SELECT seq FROM sku_sequence WHERE name = ?1",
                        params![new_name],
                        |row| row.get(0),
                    )
                    .optional()?;
                match new_seq {
                    Some(new_seq) if old_seq > new_seq => {
                        conn.execute(
                            "DELETE FROM sku_sequence WHERE name = ?1",
                            params![new_name],
                        )?;
                        conn.execute(
                            "UPDATE sku_sequence SET name = ?1 WHERE name = ?2",
                            params![new_name, old_name],
                        )?;
                    }
                    Some(_) => {
                        conn.execute(
                            "DELETE FROM sku_sequence WHERE name = ?1",
                            params![old_name],
                        )?;
                    }
                    None => {
                        conn.execute(
                            "UPDATE sku_sequence SET name = ?1 WHERE name = ?2",
                            params![new_name, old_name],
                        )?;
                    }
                }
            }
        }

        for (table, column) in SKU_NAME_COLUMNS {
            for retired in RETIRED_SKUS {
                conn.execute(
                    &format!("DELETE FROM {table} WHERE {column} = ?1"),
                    params![retired],
                )?;
            }
            if table != "sku_sequence" {
                for (old_name, new_name) in SKU_RENAMES {
                    conn.execute(
                        &format!("UPDATE {table} SET {column} = ?1 WHERE {column} = ?2"),
                        params![new_name, old_name],
                    )?;
                }
            }
        }

        Ok(())
    })();

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")?;
            info!("SKU name cleanup applied");
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
