//! Lane validity windows.
//!
//! Rate cards carry `valid_from` / `valid_to` in whatever format the sheet
//! happened to use. Parsing is fail-open: a date that cannot be read never
//! removes a candidate.

use chrono::NaiveDate;

use crate::model::{Cell, MatchCandidate};

/// Parse the date formats seen on shipments and rate cards:
/// `YYYYMMDD`, `DDMMYYYY`, `DD.MM.YYYY` and ISO `YYYY-MM-DD`. A time part
/// after a space or `T` is ignored.
pub fn parse_date(value: Option<&Cell>) -> Option<NaiveDate> {
    let raw = match value? {
        Cell::Number(n) if n.is_finite() && n.fract() == 0.0 && *n >= 0.0 => format!("{}", *n as u64),
        Cell::Number(_) => return None,
        Cell::Text(s) => s.trim().to_string(),
    };
    let date_part = raw.split([' ', 'T']).next().unwrap_or("");
    parse_date_str(date_part)
}

fn parse_date_str(s: &str) -> Option<NaiveDate> {
    if s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()) {
        return parse_compact(s);
    }
    if let Some([d, m, y]) = split3(s, '.') {
        return ymd(y, m, d);
    }
    if let Some([y, m, d]) = split3(s, '-') {
        if y.len() == 4 {
            return ymd(y, m, d);
        }
    }
    None
}

/// Eight digits: year-first when the leading four look like a plausible
/// year, otherwise day-first.
fn parse_compact(s: &str) -> Option<NaiveDate> {
    let year: i32 = s[..4].parse().ok()?;
    if (1900..=2100).contains(&year) {
        if let Some(date) = ymd(&s[..4], &s[4..6], &s[6..]) {
            return Some(date);
        }
    }
    ymd(&s[4..], &s[2..4], &s[..2])
}

fn split3(s: &str, sep: char) -> Option<[&str; 3]> {
    let mut parts = s.split(sep);
    let out = [parts.next()?, parts.next()?, parts.next()?];
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

fn ymd(y: &str, m: &str, d: &str) -> Option<NaiveDate> {
    let year: i32 = y.trim().parse().ok()?;
    let month: u32 = m.trim().parse().ok()?;
    let day: u32 = d.trim().parse().ok()?;
    if y.trim().len() != 4 {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// `Some(false)` only when all three dates parse and the ship date falls
/// outside the window. Unparseable input yields `None`.
pub fn check_window(ship_date: Option<&Cell>, valid_from: Option<&Cell>, valid_to: Option<&Cell>) -> Option<bool> {
    let ship = parse_date(ship_date)?;
    let from = parse_date(valid_from)?;
    let to = parse_date(valid_to)?;
    Some(ship >= from && ship <= to)
}

/// Result of filtering one shipment's candidates.
#[derive(Debug)]
pub enum ValidityOutcome<'a> {
    /// Candidates whose window admits the ship date (or could not be read).
    Valid(Vec<MatchCandidate<'a>>),
    /// Every candidate's window excludes the ship date.
    AllExpired,
}

/// Drop candidates whose validity window excludes the ship date.
pub fn filter_by_validity<'a>(ship_date: Option<&Cell>, candidates: Vec<MatchCandidate<'a>>) -> ValidityOutcome<'a> {
    if candidates.is_empty() {
        return ValidityOutcome::Valid(candidates);
    }
    let (kept, dropped): (Vec<_>, Vec<_>) = candidates.into_iter().partition(|c| {
        match check_window(ship_date, c.lane.valid_from.as_ref(), c.lane.valid_to.as_ref()) {
            Some(within) => within,
            None => {
                tracing::debug!(lane = %c.lane.label(), "validity check skipped, date not parseable");
                true
            }
        }
    });
    if kept.is_empty() {
        tracing::debug!(dropped = dropped.len(), "ship date outside every candidate window");
        ValidityOutcome::AllExpired
    } else {
        ValidityOutcome::Valid(kept)
    }
}
