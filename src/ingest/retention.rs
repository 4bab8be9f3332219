// src/ingest/retention.rs
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeZone, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use thiserror::Error;

use crate::ingest::types::Entry;

pub const DEFAULT_RETENTION_YEARS: u32 = 2;

/// Asia/Seoul. Korea has not observed DST since 1988, so a fixed offset is exact.
pub fn archive_offset() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).expect("+09:00 is a valid offset")
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid date format: {0}")]
pub struct DateFormatError(pub String);

/// First whitespace-delimited token of `value`, validated as `YYYY-MM-DD`.
pub fn extract_date_only(value: &str) -> Result<&str, DateFormatError> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());
    let token = value.split_whitespace().next().unwrap_or("");
    if re.is_match(token) {
        Ok(token)
    } else {
        Err(DateFormatError(value.to_string()))
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(ny, nm, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// Calendar date `years` before `now` in the archive zone, day clamped to the
/// target month (Feb 29 -> Feb 28 in non-leap years). Returns `YYYY-MM-DD`.
///
/// Windows reaching past year 0 saturate at year 0, so an oversized window
/// expires nothing.
pub fn compute_cutoff<Tz: TimeZone>(now: &DateTime<Tz>, years: u32) -> String {
    let local = now.with_timezone(&archive_offset()).date_naive();
    let year = i32::try_from(years)
        .ok()
        .and_then(|y| local.year().checked_sub(y))
        .map_or(0, |y| y.max(0));
    let day = local.day().min(days_in_month(year, local.month()));
    format!("{year:04}-{:02}-{day:02}", local.month())
}

pub fn compute_cutoff_utc(now: DateTime<Utc>, years: u32) -> String {
    compute_cutoff(&now, years)
}

/// Result of partitioning one feed against the cursor and the cutoff.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionOutcome {
    pub retained: Vec<Entry>,
    pub expired: usize,
    pub skipped: usize,
}

/// Drop entries at or below the cursor, then entries dated before `cutoff`.
///
/// A malformed `published_at` on an entry that reaches the date check aborts
/// the whole call.
pub fn filter_entries(
    entries: Vec<Entry>,
    cutoff: &str,
    last_processed_id: u64,
) -> Result<RetentionOutcome, DateFormatError> {
    let mut out = RetentionOutcome::default();
    for entry in entries {
        match entry.numeric_id() {
            Some(id) if id <= last_processed_id => {
                out.skipped += 1;
                continue;
            }
            Some(_) => {}
            None => {
                tracing::warn!(
                    article_id = %entry.article_id,
                    link = %entry.link,
                    "non-numeric article id; treating entry as new"
                );
            }
        }

        let date = extract_date_only(&entry.published_at)?;
        if date < cutoff {
            tracing::debug!(
                article_id = %entry.article_id,
                date,
                cutoff,
                "entry older than retention cutoff"
            );
            out.expired += 1;
            continue;
        }
        out.retained.push(entry);
    }
    Ok(out)
}
