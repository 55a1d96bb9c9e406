//! Worker daily submission ledger.
//!
//! A submission is one worker's sale sheet for one date: per-SKU sold and
//! returned quantities, the amounts they price out to at the worker's
//! buyback rates, and a payment split. Submissions start pending and move
//! to approved exactly once; there is no unapprove. Repeat submits on the
//! same date create new rows, and reporting keeps only the newest row per
//! (date, location).
//!
//! Inserting a submission triggers the worker-to-admin projection: every
//! positive order request on the sheet lands in the order grid column for
//! the worker's own location. The projection is best-effort; the
//! submission stands even when it fails.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dates;
use crate::db::DbState;
use crate::error::{Error, Result};
use crate::location::Location;
use crate::rates;
use crate::reconcile;
use crate::users::{self, Role};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub user_id: i64,
    pub location: Option<String>,
    pub for_date: String,
    pub day_of_week: Option<String>,
    pub total_sku: i64,
    pub total_mr: i64,
    pub total_fr: i64,
    pub total_sale: i64,
    pub total_amount: f64,
    pub cash: f64,
    pub online: f64,
    pub previous_balance: f64,
    pub total_due: f64,
    pub remaining_due: f64,
    pub status: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionLine {
    pub id: i64,
    pub submission_id: i64,
    pub name: String,
    pub sku: i64,
    pub mr: i64,
    pub fr: i64,
    pub buyback_rate: f64,
    pub sale: i64,
    pub amount: f64,
    pub ordering: Option<String>,
}

/// One sheet row as entered by the worker. `ordering` is the next-day
/// order request, kept as the raw string the worker typed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInput {
    pub name: String,
    pub sku: i64,
    pub mr: i64,
    pub fr: i64,
    pub ordering: Option<String>,
}

/// Payment fields entered alongside the sheet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaymentInput {
    pub cash: f64,
    pub online: f64,
    pub previous_balance: f64,
}

/// Which payment field the operator just typed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaymentEdit {
    Cash(f64),
    Online(f64),
}

// ---------------------------------------------------------------------------
// Pure payment arithmetic
// ---------------------------------------------------------------------------

/// Recompute the payment split after one field is typed: the edited field
/// drives, the other absorbs the rest of the amount, floored at zero.
pub fn apply_payment_edit(total_amount: f64, edit: PaymentEdit) -> (f64, f64) {
    match edit {
        PaymentEdit::Cash(cash) => (cash, (total_amount - cash).max(0.0)),
        PaymentEdit::Online(online) => ((total_amount - online).max(0.0), online),
    }
}

/// Outstanding amount after payments. Negative means overpayment; no clamp.
pub fn remaining_due(total_due: f64, cash: f64, online: f64) -> f64 {
    total_due - cash - online
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// Insert a worker's daily sheet and return the new submission id.
///
/// Line amounts are priced from the worker's buyback rates as they stand
/// right now; a missing rate prices as 0. The submission and all its lines
/// land in one transaction; the grid projection runs after commit.
pub fn submit_daily_entry(
    db: &DbState,
    worker_id: i64,
    for_date: &str,
    lines: &[LineInput],
    payments: PaymentInput,
) -> Result<i64> {
    dates::parse_date(for_date)?;
    let day = dates::day_of_week(for_date)?;

    let worker = users::get_user(db, worker_id)?;
    if worker.role != Role::Worker {
        return Err(Error::validation(format!(
            "user {worker_id} is not a worker"
        )));
    }

    let buyback = rates::get_buyback_rates(db, worker_id)?;

    // Price every line before touching the ledger.
    let mut priced: Vec<SubmissionLine> = Vec::with_capacity(lines.len());
    let (mut total_sku, mut total_mr, mut total_fr, mut total_sale) = (0i64, 0i64, 0i64, 0i64);
    let mut total_amount = 0f64;
    for line in lines {
        let rate = buyback.get(&line.name).copied().unwrap_or(0.0);
        let sale = line.sku - line.mr - line.fr;
        let amount = sale as f64 * rate;
        total_sku += line.sku;
        total_mr += line.mr;
        total_fr += line.fr;
        total_sale += sale;
        total_amount += amount;
        priced.push(SubmissionLine {
            id: 0,
            submission_id: 0,
            name: line.name.clone(),
            sku: line.sku,
            mr: line.mr,
            fr: line.fr,
            buyback_rate: rate,
            sale,
            amount,
            ordering: line.ordering.clone(),
        });
    }

    let total_due = payments.previous_balance + total_amount;
    let remaining = remaining_due(total_due, payments.cash, payments.online);

    let conn = db.lock()?;
    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = (|| -> Result<i64> {
        conn.execute(
            "INSERT INTO submissions (
                 user_id, location, for_date, day_of_week,
                 total_sku, total_mr, total_fr, total_sale, total_amount,
                 cash, online, previous_balance, total_due, remaining_due, status
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 'pending')",
            params![
                worker_id,
                worker.location,
                for_date,
                day,
                total_sku,
                total_mr,
                total_fr,
                total_sale,
                total_amount,
                payments.cash,
                payments.online,
                payments.previous_balance,
                total_due,
                remaining,
            ],
        )?;
        let submission_id = conn.last_insert_rowid();

        for line in &priced {
            conn.execute(
                "INSERT INTO submission_lines
                     (submission_id, name, sku, mr, fr, buyback_rate, sale, amount, ordering)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    submission_id,
                    line.name,
                    line.sku,
                    line.mr,
                    line.fr,
                    line.buyback_rate,
                    line.sale,
                    line.amount,
                    line.ordering,
                ],
            )?;
        }

        Ok(submission_id)
    })();

    let submission_id = match result {
        Ok(id) => {
            conn.execute_batch("COMMIT")?;
            id
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    };

    info!(
        "Submission {submission_id} recorded for worker {worker_id} on {for_date} \
         ({} lines, amount {total_amount})",
        priced.len()
    );

    // Worker-to-admin projection; the submission is already committed.
    if let Err(e) = sync_orders_to_grid(&conn, &worker, for_date, &priced) {
        warn!("Submission {submission_id} saved but order-grid sync failed: {e}");
    }

    Ok(submission_id)
}

/// Push the sheet's positive order requests into the order grid column for
/// the worker's location. An unmapped location skips the whole sheet with
/// a warning.
fn sync_orders_to_grid(
    conn: &Connection,
    worker: &users::User,
    for_date: &str,
    lines: &[SubmissionLine],
) -> Result<()> {
    let Some(location) = worker
        .location
        .as_deref()
        .and_then(Location::from_label)
    else {
        warn!(
            "Worker {} has no mapped order-grid location ({:?}); order requests not synced",
            worker.id, worker.location
        );
        return Ok(());
    };

    for line in lines {
        let Some(order) = line
            .ordering
            .as_deref()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .filter(|v| *v > 0)
        else {
            continue;
        };
        reconcile::upsert_location_quantity(conn, for_date, &line.name, location, order)?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Listing and workflow
// ---------------------------------------------------------------------------

const SUBMISSION_COLUMNS: &str = "id, user_id, location, for_date, day_of_week, \
     total_sku, total_mr, total_fr, total_sale, total_amount, \
     cash, online, previous_balance, total_due, remaining_due, status, created_at";

fn submission_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Submission> {
    Ok(Submission {
        id: row.get(0)?,
        user_id: row.get(1)?,
        location: row.get(2)?,
        for_date: row.get(3)?,
        day_of_week: row.get(4)?,
        total_sku: row.get(5)?,
        total_mr: row.get(6)?,
        total_fr: row.get(7)?,
        total_sale: row.get(8)?,
        total_amount: row.get(9)?,
        cash: row.get(10)?,
        online: row.get(11)?,
        previous_balance: row.get(12)?,
        total_due: row.get(13)?,
        remaining_due: row.get(14)?,
        status: row.get(15)?,
        created_at: row.get(16)?,
    })
}

/// Pending submissions, optionally for one date, newest row per
/// (date, location) only. Earlier superseded submits stay in the table
/// but never reach this list.
pub fn list_pending_submissions(db: &DbState, for_date: Option<&str>) -> Result<Vec<Submission>> {
    let conn = db.lock()?;
    let sql = format!(
        "SELECT {SUBMISSION_COLUMNS} FROM submissions s
         WHERE s.status = 'pending'
           AND (?1 IS NULL OR s.for_date = ?1)
           AND s.id = (
               SELECT MAX(s2.id) FROM submissions s2
               WHERE s2.for_date = s.for_date
                 AND COALESCE(s2.location, '') = COALESCE(s.location, '')
                 AND s2.status = 'pending'
           )
         ORDER BY s.for_date DESC, s.id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![for_date], submission_from_row)?
        .collect::<rusqlite::Result<_>>()?;
    Ok(rows)
}

/// Number of distinct pending sheets, counted after the newest-per-
/// (date, location) dedupe.
pub fn pending_count(db: &DbState, for_date: Option<&str>) -> Result<i64> {
    let conn = db.lock()?;
    let count = conn.query_row(
        "SELECT COUNT(*) FROM submissions s
         WHERE s.status = 'pending'
           AND (?1 IS NULL OR s.for_date = ?1)
           AND s.id = (
               SELECT MAX(s2.id) FROM submissions s2
               WHERE s2.for_date = s.for_date
                 AND COALESCE(s2.location, '') = COALESCE(s.location, '')
                 AND s2.status = 'pending'
           )",
        params![for_date],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Newest submission id for a worker and date, if any.
pub fn find_submission_id(db: &DbState, worker_id: i64, for_date: &str) -> Result<Option<i64>> {
    let conn = db.lock()?;
    let id = conn
        .query_row(
            "SELECT id FROM submissions
             WHERE user_id = ?1 AND for_date = ?2
             ORDER BY id DESC LIMIT 1",
            params![worker_id, for_date],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Create a pending submission with no lines and zeroed totals, as the
/// anchor for line-by-line admin entry.
pub fn create_empty_submission(db: &DbState, worker_id: i64, for_date: &str) -> Result<i64> {
    dates::parse_date(for_date)?;
    let day = dates::day_of_week(for_date)?;
    let worker = users::get_user(db, worker_id)?;
    if worker.role != Role::Worker {
        return Err(Error::validation(format!(
            "user {worker_id} is not a worker"
        )));
    }

    let conn = db.lock()?;
    conn.execute(
        "INSERT INTO submissions (user_id, location, for_date, day_of_week, status)
         VALUES (?1, ?2, ?3, ?4, 'pending')",
        params![worker_id, worker.location, for_date, day],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Set one line's next-day order request, creating the line if needed.
pub fn upsert_line_ordering(
    db: &DbState,
    submission_id: i64,
    name: &str,
    ordering: Option<&str>,
) -> Result<()> {
    let conn = db.lock()?;
    let changed = conn.execute(
        "UPDATE submission_lines SET ordering = ?1 WHERE submission_id = ?2 AND name = ?3",
        params![ordering, submission_id, name],
    )?;
    if changed == 0 {
        conn.execute(
            "INSERT INTO submission_lines (submission_id, name, ordering) VALUES (?1, ?2, ?3)",
            params![submission_id, name, ordering],
        )?;
    }
    Ok(())
}

/// All submissions in a closed date range, newest first. Superseded rows
/// are included; range reporting dedupes on its side.
pub fn fetch_submissions_in_range(
    db: &DbState,
    start_date: &str,
    end_date: &str,
) -> Result<Vec<Submission>> {
    dates::parse_date(start_date)?;
    dates::parse_date(end_date)?;
    let conn = db.lock()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {SUBMISSION_COLUMNS} FROM submissions
         WHERE for_date >= ?1 AND for_date <= ?2
         ORDER BY for_date ASC, id ASC"
    ))?;
    let rows = stmt
        .query_map(params![start_date, end_date], submission_from_row)?
        .collect::<rusqlite::Result<_>>()?;
    Ok(rows)
}

/// Mark a pending submission approved. Approving an already-approved
/// submission is a no-op; a missing id is an error.
pub fn approve_submission(db: &DbState, submission_id: i64) -> Result<()> {
    let conn = db.lock()?;
    let changed = conn.execute(
        "UPDATE submissions SET status = 'approved' WHERE id = ?1 AND status = 'pending'",
        params![submission_id],
    )?;
    if changed == 0 {
        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM submissions WHERE id = ?1",
                params![submission_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(Error::not_found("submission", submission_id));
        }
        // Already approved.
        return Ok(());
    }
    info!("Submission {submission_id} approved");
    Ok(())
}

/// Overwrite a submission's payment fields.
pub fn update_submission_payments(
    db: &DbState,
    submission_id: i64,
    cash: f64,
    online: f64,
    remaining: f64,
) -> Result<()> {
    let conn = db.lock()?;
    let changed = conn.execute(
        "UPDATE submissions SET cash = ?1, online = ?2, remaining_due = ?3 WHERE id = ?4",
        params![cash, online, remaining, submission_id],
    )?;
    if changed == 0 {
        return Err(Error::not_found("submission", submission_id));
    }
    Ok(())
}

/// Full-row line upsert keyed by (submission, SKU name), used during
/// approval review. Sale and amount are recomputed here rather than
/// trusted from the caller.
pub fn upsert_submission_line(
    db: &DbState,
    submission_id: i64,
    name: &str,
    sku: i64,
    mr: i64,
    fr: i64,
    buyback_rate: f64,
) -> Result<()> {
    let sale = sku - mr - fr;
    let amount = sale as f64 * buyback_rate;

    let conn = db.lock()?;
    let changed = conn.execute(
        "UPDATE submission_lines
         SET sku = ?1, mr = ?2, fr = ?3, buyback_rate = ?4, sale = ?5, amount = ?6
         WHERE submission_id = ?7 AND name = ?8",
        params![sku, mr, fr, buyback_rate, sale, amount, submission_id, name],
    )?;
    if changed == 0 {
        conn.execute(
            "INSERT INTO submission_lines
                 (submission_id, name, sku, mr, fr, buyback_rate, sale, amount)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![submission_id, name, sku, mr, fr, buyback_rate, sale, amount],
        )?;
    }
    Ok(())
}

/// Re-derive a submission's totals from its current lines, after line
/// edits during review.
pub fn recompute_submission_totals(db: &DbState, submission_id: i64) -> Result<()> {
    let conn = db.lock()?;
    let changed = conn.execute(
        "UPDATE submissions SET
             total_sku = (SELECT COALESCE(SUM(sku), 0) FROM submission_lines WHERE submission_id = ?1),
             total_mr = (SELECT COALESCE(SUM(mr), 0) FROM submission_lines WHERE submission_id = ?1),
             total_fr = (SELECT COALESCE(SUM(fr), 0) FROM submission_lines WHERE submission_id = ?1),
             total_sale = (SELECT COALESCE(SUM(sale), 0) FROM submission_lines WHERE submission_id = ?1),
             total_amount = (SELECT COALESCE(SUM(amount), 0) FROM submission_lines WHERE submission_id = ?1),
             total_due = previous_balance +
                 (SELECT COALESCE(SUM(amount), 0) FROM submission_lines WHERE submission_id = ?1),
             remaining_due = previous_balance +
                 (SELECT COALESCE(SUM(amount), 0) FROM submission_lines WHERE submission_id = ?1)
                 - cash - online
         WHERE id = ?1",
        params![submission_id],
    )?;
    if changed == 0 {
        return Err(Error::not_found("submission", submission_id));
    }
    Ok(())
}

/// Lines of one submission, in insertion order.
pub fn fetch_submission_lines(db: &DbState, submission_id: i64) -> Result<Vec<SubmissionLine>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(
        "SELECT id, submission_id, name, sku, mr, fr, buyback_rate, sale, amount, ordering
         FROM submission_lines WHERE submission_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([submission_id], |row| {
            Ok(SubmissionLine {
                id: row.get(0)?,
                submission_id: row.get(1)?,
                name: row.get(2)?,
                sku: row.get(3)?,
                mr: row.get(4)?,
                fr: row.get(5)?,
                buyback_rate: row.get(6)?,
                sale: row.get(7)?,
                amount: row.get(8)?,
                ordering: row.get(9)?,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;
    Ok(rows)
}

/// One submission with its lines, for the approval review screen.
pub fn fetch_detailed_for_approval(
    db: &DbState,
    submission_id: i64,
) -> Result<(Submission, Vec<SubmissionLine>)> {
    let submission = {
        let conn = db.lock()?;
        conn.query_row(
            &format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = ?1"),
            params![submission_id],
            submission_from_row,
        )
        .optional()?
        .ok_or_else(|| Error::not_found("submission", submission_id))?
    };
    let lines = fetch_submission_lines(db, submission_id)?;
    Ok((submission, lines))
}

/// Status of a worker's newest submission for a date, if any.
pub fn today_submission_status(
    db: &DbState,
    worker_id: i64,
    for_date: &str,
) -> Result<Option<String>> {
    let conn = db.lock()?;
    let status = conn
        .query_row(
            "SELECT status FROM submissions
             WHERE user_id = ?1 AND for_date = ?2
             ORDER BY id DESC LIMIT 1",
            params![worker_id, for_date],
            |row| row.get(0),
        )
        .optional()?;
    Ok(status)
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

/// Permanently delete pending submissions dated strictly before the
/// cutoff. Lines cascade. Returns the number of submissions removed.
pub fn expire_pending_before(db: &DbState, cutoff_date: &str) -> Result<usize> {
    dates::parse_date(cutoff_date)?;
    let conn = db.lock()?;

    conn.execute_batch("BEGIN IMMEDIATE")?;
    let result = conn.execute(
        "DELETE FROM submissions WHERE status = 'pending' AND for_date < ?1",
        params![cutoff_date],
    );
    match result {
        Ok(removed) => {
            conn.execute_batch("COMMIT")?;
            if removed > 0 {
                info!("Expired {removed} stale pending submission(s) before {cutoff_date}");
            }
            Ok(removed)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e.into())
        }
    }
}

/// Delete pending submissions, all of them or one date's. Destructive.
pub fn clear_pending_submissions(db: &DbState, for_date: Option<&str>) -> Result<usize> {
    let conn = db.lock()?;
    let removed = conn.execute(
        "DELETE FROM submissions WHERE status = 'pending' AND (?1 IS NULL OR for_date = ?1)",
        params![for_date],
    )?;
    info!("Cleared {removed} pending submission(s)");
    Ok(removed)
}

// ===========================================================================
// Tests
// ===========================================================================
