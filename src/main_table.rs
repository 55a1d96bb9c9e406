//! Admin production working snapshot.
//!
//! One row per SKU, continuously overwritten: tray count, units per tray,
//! and a previous-quantity column seeded from the prior day's sale-sheet
//! carry. The total is always recomputed on save and on load, never trusted
//! from storage.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog;
use crate::dates;
use crate::db::DbState;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainTableRow {
    pub sku_name: String,
    pub tray: i64,
    pub tray_qty: i64,
    pub previous_qty: i64,
    pub total_qty: i64,
}

impl MainTableRow {
    fn recompute_total(&mut self) {
        self.total_qty = self.tray * self.tray_qty + self.previous_qty;
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Upsert one snapshot row. The stored total is recomputed from the other
/// three columns regardless of what the caller passed.
pub fn save_row(db: &DbState, row: &MainTableRow) -> Result<()> {
    let conn = db.lock()?;
    save_row_tx(&conn, row)
}

fn save_row_tx(conn: &Connection, row: &MainTableRow) -> Result<()> {
    let mut row = row.clone();
    row.recompute_total();
    conn.execute(
        "INSERT INTO main_table_data (sku_name, tray, tray_qty, previous_qty, total_qty, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, strftime('%s','now'))
         ON CONFLICT(sku_name) DO UPDATE SET
             tray = excluded.tray,
             tray_qty = excluded.tray_qty,
             previous_qty = excluded.previous_qty,
             total_qty = excluded.total_qty,
             updated_at = excluded.updated_at",
        params![
            row.sku_name,
            row.tray,
            row.tray_qty,
            row.previous_qty,
            row.total_qty
        ],
    )?;
    Ok(())
}

/// Replace the whole snapshot atomically.
pub fn save_all(db: &DbState, rows: &[MainTableRow]) -> Result<()> {
    let conn = db.lock()?;

    conn.execute_batch("BEGIN IMMEDIATE")?;
    let result = (|| -> Result<()> {
        for row in rows {
            save_row_tx(&conn, row)?;
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")?;
            info!("Saved {} production snapshot rows", rows.len());
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

/// Load the snapshot for a working date, one row per catalog SKU in display
/// order.
///
/// The previous-quantity column is seeded from the prior date's positive
/// sale-sheet carry when one exists; otherwise the stored value stands.
/// Totals are recomputed after seeding.
pub fn load_main_table(db: &DbState, for_date: &str) -> Result<Vec<MainTableRow>> {
    let prev_date = dates::previous_day(for_date)?;
    let conn = db.lock()?;

    let skus = catalog::list_skus_ordered_tx(&conn)?;

    let mut out = Vec::with_capacity(skus.len());
    for sku in &skus {
        let stored: Option<(i64, i64, i64)> = conn
            .query_row(
                "SELECT tray, tray_qty, previous_qty FROM main_table_data WHERE sku_name = ?1",
                params![sku.name],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let (tray, tray_qty, stored_prev) = stored.unwrap_or((0, 0, 0));

        let carried: i64 = conn
            .query_row(
                "SELECT remark_plus FROM remark_plus_data
                 WHERE for_date = ?1 AND sku_name = ?2",
                params![prev_date, sku.name],
                |row| row.get(0),
            )
            .unwrap_or(0);

        let mut row = MainTableRow {
            sku_name: sku.name.clone(),
            tray,
            tray_qty,
            previous_qty: if carried > 0 { carried } else { stored_prev },
            total_qty: 0,
        };
        row.recompute_total();
        out.push(row);
    }

    Ok(out)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn test_save_recomputes_total() {
        let state = db::test_state();
        save_row(
            &state,
            &MainTableRow {
                sku_name: "BR 400".into(),
                tray: 4,
                tray_qty: 24,
                previous_qty: 3,
                total_qty: 999, // ignored
            },
        )
        .unwrap();

        let conn = state.conn.lock().unwrap();
        let total: i64 = conn
            .query_row(
                "SELECT total_qty FROM main_table_data WHERE sku_name = 'BR 400'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(total, 4 * 24 + 3);
    }

    #[test]
    fn test_save_all_overwrites() {
        let state = db::test_state();
        let row = |tray| MainTableRow {
            sku_name: "BR 400".into(),
            tray,
            tray_qty: 24,
            previous_qty: 0,
            total_qty: 0,
        };
        save_all(&state, &[row(2)]).unwrap();
        save_all(&state, &[row(5)]).unwrap();

        let conn = state.conn.lock().unwrap();
        let (count, total): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), MAX(total_qty) FROM main_table_data",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(total, 120);
    }

    #[test]
    fn test_load_seeds_previous_qty_from_carry() {
        let state = db::test_state();
        save_row(
            &state,
            &MainTableRow {
                sku_name: "BR 400".into(),
                tray: 2,
                tray_qty: 24,
                previous_qty: 1,
                total_qty: 0,
            },
        )
        .unwrap();
        {
            let conn = state.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO remark_plus_data (for_date, sku_name, remark_plus)
                 VALUES ('2025-03-13', 'BR 400', 7)",
                [],
            )
            .unwrap();
        }

        let rows = load_main_table(&state, "2025-03-14").unwrap();
        let br = rows.iter().find(|r| r.sku_name == "BR 400").unwrap();
        assert_eq!(br.previous_qty, 7, "carry should replace stored value");
        assert_eq!(br.total_qty, 2 * 24 + 7);
    }

    #[test]
    fn test_load_without_carry_keeps_stored_previous() {
        let state = db::test_state();
        save_row(
            &state,
            &MainTableRow {
                sku_name: "BR 400".into(),
                tray: 2,
                tray_qty: 24,
                previous_qty: 5,
                total_qty: 0,
            },
        )
        .unwrap();

        let rows = load_main_table(&state, "2025-03-14").unwrap();
        let br = rows.iter().find(|r| r.sku_name == "BR 400").unwrap();
        assert_eq!(br.previous_qty, 5);
    }

    #[test]
    fn test_load_covers_whole_catalog() {
        let state = db::test_state();
        let rows = load_main_table(&state, "2025-03-14").unwrap();
        assert_eq!(rows.len(), catalog::DEFAULT_SKUS.len());
        assert!(rows.iter().all(|r| r.total_qty == 0));
    }
}
