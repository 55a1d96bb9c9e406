//! Read-side reporting over the submission ledger.
//!
//! Everything here is a pure derivation from stored rows. Superseded
//! submissions (older rows for the same date and location) are excluded
//! before aggregation so a worker who re-submitted does not count twice.

use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::dates;
use crate::db::DbState;
use crate::error::Result;
use crate::submissions::{self, Submission, SubmissionLine};

// Keep only the newest submission row per (date, location) with the given
// status, matching the dedupe rule used by the pending list.
const NEWEST_PER_DATE_LOCATION: &str = "s.id = (
    SELECT MAX(s2.id) FROM submissions s2
    WHERE s2.for_date = s.for_date
      AND COALESCE(s2.location, '') = COALESCE(s.location, '')
      AND s2.status = s.status
)";

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuTotal {
    pub sku_name: String,
    pub total_sold: i64,
}

/// Approved sold quantity per SKU, optionally restricted to one date.
pub fn approved_totals_by_sku(db: &DbState, for_date: Option<&str>) -> Result<Vec<SkuTotal>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT l.name, SUM(l.sku)
         FROM submissions s
         JOIN submission_lines l ON l.submission_id = s.id
         WHERE s.status = 'approved'
           AND (?1 IS NULL OR s.for_date = ?1)
           AND {NEWEST_PER_DATE_LOCATION}
         GROUP BY l.name
         ORDER BY l.name"
    ))?;
    let rows = stmt
        .query_map(params![for_date], |row| {
            Ok(SkuTotal {
                sku_name: row.get(0)?,
                total_sold: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub worker: String,
    pub mr_total: i64,
    pub sku_total: i64,
    pub mr_percent: f64,
}

/// Workers ranked by return rate over approved submissions, best (lowest
/// percentage) first. A worker with nothing sold ranks at 0%, not as an
/// arithmetic error. Ties break by worker label.
pub fn mr_ranking(db: &DbState, for_date: Option<&str>) -> Result<Vec<RankingEntry>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT COALESCE(u.location, u.username) AS worker,
                COALESCE(SUM(l.mr), 0) AS mr_total,
                COALESCE(SUM(l.sku), 0) AS sku_total,
                CASE WHEN COALESCE(SUM(l.sku), 0) = 0 THEN 0.0
                     ELSE SUM(l.mr) * 100.0 / SUM(l.sku)
                END AS mr_percent
         FROM submissions s
         JOIN users u ON u.id = s.user_id
         LEFT JOIN submission_lines l ON l.submission_id = s.id
         WHERE s.status = 'approved'
           AND (?1 IS NULL OR s.for_date = ?1)
           AND {NEWEST_PER_DATE_LOCATION}
         GROUP BY u.id
         ORDER BY mr_percent ASC, worker ASC"
    ))?;
    let rows = stmt
        .query_map(params![for_date], |row| {
            Ok(RankingEntry {
                worker: row.get(0)?,
                mr_total: row.get(1)?,
                sku_total: row.get(2)?,
                mr_percent: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Range export
// ---------------------------------------------------------------------------

/// Raw material for a date-range export: every submission in range with
/// its lines, plus the approved per-SKU totals for the same range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportBundle {
    pub start_date: String,
    pub end_date: String,
    pub submissions: Vec<Submission>,
    pub lines: Vec<SubmissionLine>,
    pub sku_totals: Vec<SkuTotal>,
    pub ranking: Vec<RankingEntry>,
}

/// Collect everything an export consumer needs for a closed date range.
pub fn export_range(db: &DbState, start_date: &str, end_date: &str) -> Result<ExportBundle> {
    dates::parse_date(start_date)?;
    dates::parse_date(end_date)?;

    let subs = submissions::fetch_submissions_in_range(db, start_date, end_date)?;
    let mut lines = Vec::new();
    for s in &subs {
        lines.extend(submissions::fetch_submission_lines(db, s.id)?);
    }

    let sku_totals = approved_totals_in_range(db, start_date, end_date)?;
    let ranking = mr_ranking(db, None)?;

    Ok(ExportBundle {
        start_date: start_date.to_string(),
        end_date: end_date.to_string(),
        submissions: subs,
        lines,
        sku_totals,
        ranking,
    })
}

fn approved_totals_in_range(
    db: &DbState,
    start_date: &str,
    end_date: &str,
) -> Result<Vec<SkuTotal>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT l.name, SUM(l.sku)
         FROM submissions s
         JOIN submission_lines l ON l.submission_id = s.id
         WHERE s.status = 'approved'
           AND s.for_date >= ?1 AND s.for_date <= ?2
           AND {NEWEST_PER_DATE_LOCATION}
         GROUP BY l.name
         ORDER BY l.name"
    ))?;
    let rows = stmt
        .query_map(params![start_date, end_date], |row| {
            Ok(SkuTotal {
                sku_name: row.get(0)?,
                total_sold: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;
    Ok(rows)
}

impl ExportBundle {
    /// The whole bundle as pretty JSON, for consumers that take the raw
    /// data instead of sheets.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Flatten into named tabular sheets, header row first. The consumer
    /// (a spreadsheet writer) decides the file format.
    pub fn sheets(&self) -> Vec<(&'static str, Vec<Vec<String>>)> {
        let mut submissions = vec![vec![
            "Date".to_string(),
            "Day".to_string(),
            "Location".to_string(),
            "Status".to_string(),
            "Total SKU".to_string(),
            "Total MR".to_string(),
            "Total FR".to_string(),
            "Total Sale".to_string(),
            "Amount".to_string(),
            "Cash".to_string(),
            "Online".to_string(),
            "Remaining".to_string(),
        ]];
        for s in &self.submissions {
            submissions.push(vec![
                s.for_date.clone(),
                s.day_of_week.clone().unwrap_or_default(),
                s.location.clone().unwrap_or_default(),
                s.status.clone(),
                s.total_sku.to_string(),
                s.total_mr.to_string(),
                s.total_fr.to_string(),
                s.total_sale.to_string(),
                format!("{:.2}", s.total_amount),
                format!("{:.2}", s.cash),
                format!("{:.2}", s.online),
                format!("{:.2}", s.remaining_due),
            ]);
        }

        let mut lines = vec![vec![
            "Submission".to_string(),
            "SKU".to_string(),
            "Qty".to_string(),
            "MR".to_string(),
            "FR".to_string(),
            "Rate".to_string(),
            "Sale".to_string(),
            "Amount".to_string(),
            "Order".to_string(),
        ]];
        for l in &self.lines {
            lines.push(vec![
                l.submission_id.to_string(),
                l.name.clone(),
                l.sku.to_string(),
                l.mr.to_string(),
                l.fr.to_string(),
                format!("{:.2}", l.buyback_rate),
                l.sale.to_string(),
                format!("{:.2}", l.amount),
                l.ordering.clone().unwrap_or_default(),
            ]);
        }

        let mut totals = vec![vec!["SKU".to_string(), "Approved Sold".to_string()]];
        for t in &self.sku_totals {
            totals.push(vec![t.sku_name.clone(), t.total_sold.to_string()]);
        }

        let mut summary = vec![vec![
            "Worker".to_string(),
            "MR".to_string(),
            "SKU".to_string(),
            "MR %".to_string(),
        ]];
        for r in &self.ranking {
            summary.push(vec![
                r.worker.clone(),
                r.mr_total.to_string(),
                r.sku_total.to_string(),
                format!("{:.2}", r.mr_percent),
            ]);
        }

        vec![
            ("Submissions", submissions),
            ("Lines", lines),
            ("Totals", totals),
            ("Summary", summary),
        ]
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::rates::set_buyback_rate;
    use crate::submissions::{approve_submission, submit_daily_entry, LineInput, PaymentInput};
    use crate::users::{self, Role};

    fn worker(state: &DbState, name: &str, location: &str) -> i64 {
        users::create_user(state, name, "pw", Role::Worker, Some(location)).unwrap()
    }

    fn line(name: &str, sku: i64, mr: i64) -> LineInput {
        LineInput {
            name: name.into(),
            sku,
            mr,
            fr: 0,
            ordering: None,
        }
    }

    fn no_payment() -> PaymentInput {
        PaymentInput {
            cash: 0.0,
            online: 0.0,
            previous_balance: 0.0,
        }
    }

    #[test]
    fn test_approved_totals_ignore_pending_and_superseded() {
        let state = db::test_state();
        let w = worker(&state, "w1", "PAREL");
        set_buyback_rate(&state, w, "BR 400", 2.0).unwrap();

        // Superseded approved row, then the one that counts, then pending.
        let first =
            submit_daily_entry(&state, w, "2025-03-14", &[line("BR 400", 99, 0)], no_payment())
                .unwrap();
        approve_submission(&state, first).unwrap();
        let second =
            submit_daily_entry(&state, w, "2025-03-14", &[line("BR 400", 40, 0)], no_payment())
                .unwrap();
        approve_submission(&state, second).unwrap();
        submit_daily_entry(&state, w, "2025-03-14", &[line("BR 400", 7, 0)], no_payment())
            .unwrap();

        let totals = approved_totals_by_sku(&state, Some("2025-03-14")).unwrap();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].total_sold, 40);
    }

    #[test]
    fn test_ranking_handles_zero_denominator_and_ties() {
        let state = db::test_state();
        let a = worker(&state, "wa", "PAREL");
        let b = worker(&state, "wb", "MAHIM");

        let sa = submit_daily_entry(
            &state,
            a,
            "2025-03-14",
            &[line("BR 400", 100, 10)],
            no_payment(),
        )
        .unwrap();
        approve_submission(&state, sa).unwrap();

        // Worker B sold nothing; percent must be 0, not NaN.
        let sb = submit_daily_entry(&state, b, "2025-03-14", &[], no_payment()).unwrap();
        approve_submission(&state, sb).unwrap();

        let ranking = mr_ranking(&state, None).unwrap();
        assert_eq!(ranking.len(), 2);
        assert_eq!(ranking[0].worker, "MAHIM");
        assert_eq!(ranking[0].mr_percent, 0.0);
        assert_eq!(ranking[1].worker, "PAREL");
        assert!((ranking[1].mr_percent - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_ranking_excludes_pending() {
        let state = db::test_state();
        let w = worker(&state, "w1", "PAREL");
        submit_daily_entry(&state, w, "2025-03-14", &[line("BR 400", 10, 5)], no_payment())
            .unwrap();

        assert!(mr_ranking(&state, None).unwrap().is_empty());
    }

    #[test]
    fn test_export_range_bundles_sheets() {
        let state = db::test_state();
        let w = worker(&state, "w1", "PAREL");
        set_buyback_rate(&state, w, "BR 400", 2.5).unwrap();
        let id = submit_daily_entry(
            &state,
            w,
            "2025-03-14",
            &[line("BR 400", 50, 5)],
            no_payment(),
        )
        .unwrap();
        approve_submission(&state, id).unwrap();
        // Outside the range, must not appear.
        submit_daily_entry(&state, w, "2025-04-01", &[line("BR 400", 1, 0)], no_payment())
            .unwrap();

        let bundle = export_range(&state, "2025-03-01", "2025-03-31").unwrap();
        assert_eq!(bundle.submissions.len(), 1);
        assert_eq!(bundle.lines.len(), 1);
        assert_eq!(bundle.sku_totals[0].total_sold, 50);

        let sheets = bundle.sheets();
        let names: Vec<&str> = sheets.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["Submissions", "Lines", "Totals", "Summary"]);
        // Header plus one data row each for the first three sheets.
        assert_eq!(sheets[0].1.len(), 2);
        assert_eq!(sheets[1].1.len(), 2);
        assert_eq!(sheets[1].1[1][1], "BR 400");

        let json = bundle.to_json().unwrap();
        assert!(json.contains("\"BR 400\""));
    }

    #[test]
    fn test_export_rejects_bad_dates() {
        let state = db::test_state();
        assert!(export_range(&state, "2025-03-01", "not-a-date").is_err());
    }
}
