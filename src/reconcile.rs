//! Order reconciliation engine.
//!
//! One row per (date, SKU) holds the ten per-location order quantities and
//! a previous-balance column. Everything else (total quantity, tray
//! count, remainder, remark text) is derived fresh from those columns on
//! every read and on every edit. The two carry tables are the only derived
//! values persisted, and they are persisted one day ahead on purpose:
//! today's remainders become tomorrow's opening balance and tomorrow's
//! sale-sheet previous quantity.
//!
//! Sync is two one-way projections, each with a single trigger point:
//! an admin edit here pushes the recomputed total into the matching
//! worker's pending sale-sheet line, and a worker submission pushes its
//! per-SKU order requests into the location column for the worker's own
//! location. Both projections are best-effort: their failure never fails
//! the edit or the submission that triggered them.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::catalog;
use crate::dates;
use crate::db::DbState;
use crate::error::Result;
use crate::location::Location;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Derived outputs for one (date, SKU) after an edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledRow {
    pub total_quantity: i64,
    pub tray_order_count: i64,
    pub remainder: i64,
    pub remark: String,
}

/// One SKU's full reconciliation state for a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationRow {
    pub sku_name: String,
    /// Quantities in `Location::ALL` order.
    pub location_quantities: [i64; 10],
    pub previous_balance: i64,
    pub total_quantity: i64,
    pub tray_order_count: i64,
    pub remainder: i64,
    pub remark: String,
}

impl ReconciliationRow {
    /// Quantity stored for one location on this row.
    pub fn quantity(&self, location: Location) -> i64 {
        self.location_quantities[location.index()]
    }
}

/// Per-day aggregate row kept alongside the grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotal {
    pub sku_name: String,
    pub total_qty: i64,
    pub carryover: i64,
}

// ---------------------------------------------------------------------------
// Pure derivation
// ---------------------------------------------------------------------------

/// Steps 1-5 of the reconciliation algorithm, as a pure function.
///
/// The previous balance never enters the total: it only contributes the
/// `-N` remark part. Zero-tray SKUs produce zero trays and zero remainder
/// rather than a division error.
pub(crate) fn derive(
    location_quantities: &[i64; 10],
    previous_balance: i64,
    trays_per_unit: i64,
) -> ReconciledRow {
    let total_quantity: i64 = location_quantities.iter().sum();
    let (tray_order_count, remainder) = if trays_per_unit > 0 {
        (total_quantity / trays_per_unit, total_quantity % trays_per_unit)
    } else {
        (0, 0)
    };

    let mut parts: Vec<String> = Vec::with_capacity(2);
    if remainder > 0 {
        parts.push(format!("+{remainder}"));
    }
    if previous_balance != 0 {
        parts.push(format!("-{}", previous_balance.abs()));
    }
    let remark = if parts.is_empty() {
        "0".to_string()
    } else {
        parts.join(" ")
    };

    ReconciledRow {
        total_quantity,
        tray_order_count,
        remainder,
        remark,
    }
}

// ---------------------------------------------------------------------------
// Row access
// ---------------------------------------------------------------------------

const GRID_COLUMNS: &str = "prabhadevi_1, prabhadevi_2, parel, saat_rasta, sea_face, \
     worli_bdd, worli_mix, matunga, mahim, koli_wada, previous_balance";

fn load_grid_row(
    conn: &Connection,
    for_date: &str,
    sku_name: &str,
) -> Result<Option<([i64; 10], i64)>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {GRID_COLUMNS} FROM location_orders
                 WHERE for_date = ?1 AND sku_name = ?2"
            ),
            params![for_date, sku_name],
            |row| {
                let mut qty = [0i64; 10];
                for (i, q) in qty.iter_mut().enumerate() {
                    *q = row.get(i)?;
                }
                Ok((qty, row.get(10)?))
            },
        )
        .optional()?;
    Ok(row)
}

/// Write one location's quantity, creating the (date, SKU) row if needed.
pub(crate) fn upsert_location_quantity(
    conn: &Connection,
    for_date: &str,
    sku_name: &str,
    location: Location,
    quantity: i64,
) -> Result<()> {
    let day = dates::day_of_week(for_date)?;
    let col = location.column();
    conn.execute(
        &format!(
            "INSERT INTO location_orders (for_date, sku_name, {col}, day_of_week)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(for_date, sku_name) DO UPDATE SET
                 {col} = excluded.{col},
                 day_of_week = excluded.day_of_week"
        ),
        params![for_date, sku_name, quantity, day],
    )?;
    Ok(())
}

/// The carry stored on `for_date` for consumption on the next day.
fn stored_carry(conn: &Connection, for_date: &str, sku_name: &str) -> Result<i64> {
    let carry: Option<i64> = conn
        .query_row(
            "SELECT extra_order FROM extra_orders WHERE for_date = ?1 AND sku_name = ?2",
            params![for_date, sku_name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(carry.unwrap_or(0))
}

/// Opening balance for a row: the stored value when explicitly set, else
/// the carry computed on the previous calendar day.
fn effective_previous_balance(
    conn: &Connection,
    for_date: &str,
    sku_name: &str,
    stored: i64,
) -> Result<i64> {
    if stored != 0 {
        return Ok(stored);
    }
    let prev_date = dates::previous_day(for_date)?;
    stored_carry(conn, &prev_date, sku_name)
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Record one location's order quantity for a (date, SKU) and recompute.
///
/// Persists the quantity, re-derives the row, stores tomorrow's carries,
/// refreshes the day-total row, and best-effort pushes the new total into
/// the matching worker's pending sale-sheet line. Returns the derived row.
pub fn record_location_order(
    db: &DbState,
    for_date: &str,
    sku_name: &str,
    location: Location,
    quantity: i64,
) -> Result<ReconciledRow> {
    dates::parse_date(for_date)?;

    let conn = db.lock()?;

    upsert_location_quantity(&conn, for_date, sku_name, location, quantity)?;

    let (quantities, stored_balance) = load_grid_row(&conn, for_date, sku_name)?
        .unwrap_or(([0; 10], 0));
    let previous_balance =
        effective_previous_balance(&conn, for_date, sku_name, stored_balance)?;

    let tpu = catalog::trays_per_unit(sku_name);
    let derived = derive(&quantities, previous_balance, tpu);

    store_carries(&conn, for_date, sku_name, &quantities, tpu)?;
    upsert_order_total(&conn, for_date, sku_name, derived.total_quantity, derived.remainder)?;

    // Best-effort projection into the worker's pending sale sheet. The
    // edit above is already durable; a projection failure is logged only.
    if let Err(e) =
        project_total_to_pending_lines(&conn, for_date, sku_name, location, derived.total_quantity)
    {
        warn!(
            "Order edit saved but sale-sheet sync failed for {sku_name} on {for_date}: {e}"
        );
    }

    Ok(derived)
}

/// Tomorrow's two carries, both keyed by today's date.
///
/// The order-balance carry is always written; the sale-sheet carry only
/// exists while strictly positive.
fn store_carries(
    conn: &Connection,
    for_date: &str,
    sku_name: &str,
    quantities: &[i64; 10],
    trays_per_unit: i64,
) -> Result<()> {
    // Both carries are currently cut from the same sum, but they feed
    // different destinations with different storage rules, so they are
    // computed and stored separately on purpose.
    let location_sum: i64 = quantities.iter().sum();
    let total_quantity: i64 = location_sum;

    let extra_order = if trays_per_unit > 0 {
        total_quantity % trays_per_unit
    } else {
        0
    };
    conn.execute(
        "INSERT INTO extra_orders (for_date, sku_name, extra_order) VALUES (?1, ?2, ?3)
         ON CONFLICT(for_date, sku_name) DO UPDATE SET extra_order = excluded.extra_order",
        params![for_date, sku_name, extra_order],
    )?;

    let remark_plus = if trays_per_unit > 0 {
        location_sum % trays_per_unit
    } else {
        0
    };
    if remark_plus > 0 {
        conn.execute(
            "INSERT INTO remark_plus_data (for_date, sku_name, remark_plus) VALUES (?1, ?2, ?3)
             ON CONFLICT(for_date, sku_name) DO UPDATE SET remark_plus = excluded.remark_plus",
            params![for_date, sku_name, remark_plus],
        )?;
    } else {
        conn.execute(
            "DELETE FROM remark_plus_data WHERE for_date = ?1 AND sku_name = ?2",
            params![for_date, sku_name],
        )?;
    }

    Ok(())
}

fn upsert_order_total(
    conn: &Connection,
    for_date: &str,
    sku_name: &str,
    total_qty: i64,
    carryover: i64,
) -> Result<()> {
    let day = dates::day_of_week(for_date)?;
    conn.execute(
        "INSERT INTO order_totals (for_date, name, total_qty, carryover, day_of_week)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(for_date, name) DO UPDATE SET
             total_qty = excluded.total_qty,
             carryover = excluded.carryover,
             day_of_week = excluded.day_of_week",
        params![for_date, sku_name, total_qty, carryover, day],
    )?;
    Ok(())
}

/// Overwrite the new total onto the pending sale-sheet line of every
/// worker stationed at the edited location.
fn project_total_to_pending_lines(
    conn: &Connection,
    for_date: &str,
    sku_name: &str,
    location: Location,
    total_quantity: i64,
) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT id, location FROM users WHERE role = 'worker' AND location IS NOT NULL",
    )?;
    let workers: Vec<(i64, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<_>>()?;

    for (worker_id, label) in workers {
        if Location::from_label(&label) != Some(location) {
            continue;
        }
        let submission_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM submissions
                 WHERE user_id = ?1 AND for_date = ?2 AND status = 'pending'
                 ORDER BY id DESC LIMIT 1",
                params![worker_id, for_date],
                |row| row.get(0),
            )
            .optional()?;
        let Some(submission_id) = submission_id else {
            continue;
        };

        let changed = conn.execute(
            "UPDATE submission_lines SET sku = ?1 WHERE submission_id = ?2 AND name = ?3",
            params![total_quantity, submission_id, sku_name],
        )?;
        if changed == 0 {
            conn.execute(
                "INSERT INTO submission_lines (submission_id, name, sku) VALUES (?1, ?2, ?3)",
                params![submission_id, sku_name, total_quantity],
            )?;
        }
    }

    Ok(())
}

/// Explicitly set a row's opening balance. An explicit value wins over the
/// previous day's carry; setting it back to 0 re-enables the carry.
pub fn set_previous_balance(
    db: &DbState,
    for_date: &str,
    sku_name: &str,
    balance: i64,
) -> Result<()> {
    let day = dates::day_of_week(for_date)?;
    let conn = db.lock()?;
    conn.execute(
        "INSERT INTO location_orders (for_date, sku_name, previous_balance, day_of_week)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(for_date, sku_name) DO UPDATE SET
             previous_balance = excluded.previous_balance",
        params![for_date, sku_name, balance, day],
    )?;
    Ok(())
}

/// Full reconciliation view for a date, one row per catalog SKU in display
/// order. Derived values are recomputed here, never read from storage.
pub fn get_reconciliation_view(db: &DbState, for_date: &str) -> Result<Vec<ReconciliationRow>> {
    dates::parse_date(for_date)?;
    let conn = db.lock()?;

    let skus = catalog::list_skus_ordered_tx(&conn)?;
    let mut out = Vec::with_capacity(skus.len());

    for sku in &skus {
        let (quantities, stored_balance) =
            load_grid_row(&conn, for_date, &sku.name)?.unwrap_or(([0; 10], 0));
        let previous_balance =
            effective_previous_balance(&conn, for_date, &sku.name, stored_balance)?;

        let derived = derive(&quantities, previous_balance, catalog::trays_per_unit(&sku.name));
        out.push(ReconciliationRow {
            sku_name: sku.name.clone(),
            location_quantities: quantities,
            previous_balance,
            total_quantity: derived.total_quantity,
            tray_order_count: derived.tray_order_count,
            remainder: derived.remainder,
            remark: derived.remark,
        });
    }

    Ok(out)
}

/// The stored per-day aggregate rows for a date.
pub fn fetch_order_totals(db: &DbState, for_date: &str) -> Result<Vec<OrderTotal>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(
        "SELECT name, total_qty, carryover FROM order_totals WHERE for_date = ?1 ORDER BY name",
    )?;
    let rows = stmt
        .query_map([for_date], |row| {
            Ok(OrderTotal {
                sku_name: row.get(0)?,
                total_qty: row.get(1)?,
                carryover: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;
    Ok(rows)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::users::{self, Role};

    #[test]
    fn test_derive_br400_scenario() {
        // BR 400 has 24 units per tray; 100 units across locations.
        let mut qty = [0i64; 10];
        qty[0] = 60;
        qty[2] = 40;
        let row = derive(&qty, 0, 24);
        assert_eq!(row.total_quantity, 100);
        assert_eq!(row.tray_order_count, 4);
        assert_eq!(row.remainder, 4);
        assert_eq!(row.remark, "+4");
    }

    #[test]
    fn test_derive_remark_variants() {
        let qty = [24, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(derive(&qty, 0, 24).remark, "0");
        assert_eq!(derive(&qty, 5, 24).remark, "-5");
        assert_eq!(derive(&qty, -5, 24).remark, "-5");

        let qty = [25, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(derive(&qty, 3, 24).remark, "+1 -3");
    }

    #[test]
    fn test_derive_zero_tray_sku_never_divides() {
        let qty = [500, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let row = derive(&qty, 7, 0);
        assert_eq!(row.tray_order_count, 0);
        assert_eq!(row.remainder, 0);
        assert_eq!(row.total_quantity, 500);
        assert_eq!(row.remark, "-7");
    }

    #[test]
    fn test_total_excludes_previous_balance() {
        let qty = [10, 10, 0, 0, 0, 0, 0, 0, 0, 0];
        let row = derive(&qty, 50, 24);
        assert_eq!(row.total_quantity, 20);
    }

    #[test]
    fn test_record_is_idempotent() {
        let state = db::test_state();
        let first =
            record_location_order(&state, "2025-03-14", "BR 400", Location::Parel, 30).unwrap();
        let second =
            record_location_order(&state, "2025-03-14", "BR 400", Location::Parel, 30).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.total_quantity, 30);
        assert_eq!(second.tray_order_count, 1);
        assert_eq!(second.remainder, 6);
    }

    #[test]
    fn test_record_sums_across_locations() {
        let state = db::test_state();
        record_location_order(&state, "2025-03-14", "BR 400", Location::Parel, 60).unwrap();
        let row =
            record_location_order(&state, "2025-03-14", "BR 400", Location::Mahim, 40).unwrap();
        assert_eq!(row.total_quantity, 100);
        assert_eq!(row.tray_order_count, 4);
        assert_eq!(row.remark, "+4");
    }

    #[test]
    fn test_carry_round_trip_to_next_day() {
        let state = db::test_state();
        // 100 on the 14th leaves 4 past the last full tray.
        record_location_order(&state, "2025-03-14", "BR 400", Location::Parel, 100).unwrap();

        let view = get_reconciliation_view(&state, "2025-03-15").unwrap();
        let br = view.iter().find(|r| r.sku_name == "BR 400").unwrap();
        assert_eq!(br.previous_balance, 4);
        assert_eq!(br.total_quantity, 0);
        assert_eq!(br.remark, "-4");
    }

    #[test]
    fn test_view_exposes_per_location_quantities() {
        let state = db::test_state();
        record_location_order(&state, "2025-03-14", "BR 400", Location::Mahim, 12).unwrap();

        let view = get_reconciliation_view(&state, "2025-03-14").unwrap();
        let br = view.iter().find(|r| r.sku_name == "BR 400").unwrap();
        assert_eq!(br.quantity(Location::Mahim), 12);
        assert_eq!(br.quantity(Location::Parel), 0);
    }

    #[test]
    fn test_explicit_balance_overrides_carry() {
        let state = db::test_state();
        record_location_order(&state, "2025-03-14", "BR 400", Location::Parel, 100).unwrap();
        set_previous_balance(&state, "2025-03-15", "BR 400", 9).unwrap();

        let view = get_reconciliation_view(&state, "2025-03-15").unwrap();
        let br = view.iter().find(|r| r.sku_name == "BR 400").unwrap();
        assert_eq!(br.previous_balance, 9, "explicit overwrite wins over carry");
    }

    #[test]
    fn test_sale_sheet_carry_stored_only_when_positive() {
        let state = db::test_state();
        record_location_order(&state, "2025-03-14", "BR 400", Location::Parel, 100).unwrap();

        let conn = state.conn.lock().unwrap();
        let remark_plus: i64 = conn
            .query_row(
                "SELECT remark_plus FROM remark_plus_data
                 WHERE for_date = '2025-03-14' AND sku_name = 'BR 400'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(remark_plus, 4);
        drop(conn);

        // Editing down to a full-tray total removes the stale carry.
        record_location_order(&state, "2025-03-14", "BR 400", Location::Parel, 96).unwrap();
        let conn = state.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM remark_plus_data
                 WHERE for_date = '2025-03-14' AND sku_name = 'BR 400'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_edit_projects_total_into_pending_line() {
        let state = db::test_state();
        let worker_id =
            users::create_user(&state, "w_parel", "pw", Role::Worker, Some("PAREL")).unwrap();
        {
            let conn = state.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO submissions (user_id, location, for_date, status)
                 VALUES (?1, 'PAREL', '2025-03-14', 'pending')",
                [worker_id],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO submission_lines (submission_id, name, sku) VALUES (1, 'BR 400', 5)",
                [],
            )
            .unwrap();
        }

        // Editing another location first, then the worker's own column:
        // the projection fires on the PAREL edit and carries the full
        // grid total, not the single column value.
        record_location_order(&state, "2025-03-14", "BR 400", Location::Mahim, 40).unwrap();
        record_location_order(&state, "2025-03-14", "BR 400", Location::Parel, 60).unwrap();

        let conn = state.conn.lock().unwrap();
        let sku: i64 = conn
            .query_row(
                "SELECT sku FROM submission_lines WHERE submission_id = 1 AND name = 'BR 400'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(sku, 100);
    }

    #[test]
    fn test_edit_does_not_touch_approved_submissions() {
        let state = db::test_state();
        let worker_id =
            users::create_user(&state, "w_parel", "pw", Role::Worker, Some("PAREL")).unwrap();
        {
            let conn = state.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO submissions (user_id, location, for_date, status)
                 VALUES (?1, 'PAREL', '2025-03-14', 'approved')",
                [worker_id],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO submission_lines (submission_id, name, sku) VALUES (1, 'BR 400', 5)",
                [],
            )
            .unwrap();
        }

        record_location_order(&state, "2025-03-14", "BR 400", Location::Parel, 60).unwrap();

        let conn = state.conn.lock().unwrap();
        let sku: i64 = conn
            .query_row("SELECT sku FROM submission_lines WHERE id = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(sku, 5, "approved sheets are frozen");
    }

    #[test]
    fn test_order_totals_row_tracks_edits() {
        let state = db::test_state();
        record_location_order(&state, "2025-03-14", "BR 400", Location::Parel, 100).unwrap();

        let totals = fetch_order_totals(&state, "2025-03-14").unwrap();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].sku_name, "BR 400");
        assert_eq!(totals[0].total_qty, 100);
        assert_eq!(totals[0].carryover, 4);
    }

    #[test]
    fn test_view_rejects_malformed_date() {
        let state = db::test_state();
        assert!(get_reconciliation_view(&state, "14-03-2025").is_err());
    }
}
