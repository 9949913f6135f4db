//! Combining several rate cards into one batch rate table.

use std::collections::BTreeSet;

use crate::error::ReconError;
use crate::model::{Cell, Table};
use crate::normalize::normalize_column;

pub const CARRIER_AGREEMENT: &str = "Carrier agreement";
pub const VALID_FROM: &str = "Valid from";
pub const VALID_TO: &str = "Valid to";
pub const SOURCE_FILE: &str = "Source file";

/// Columns appended by [`merge_rate_cards`]. Never compared against shipments.
pub const META_COLUMNS: [&str; 4] = [CARRIER_AGREEMENT, VALID_FROM, VALID_TO, SOURCE_FILE];

const PERIOD_SEPARATORS: [&str; 6] = [" - ", " – ", " — ", "-", "–", "—"];

/// Card-level metadata from a rate card's general info.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateCardMeta {
    pub carrier_agreement: Option<String>,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
}

impl RateCardMeta {
    pub fn new(carrier_agreement: Option<&str>) -> Self {
        Self {
            carrier_agreement: carrier_agreement
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            ..Self::default()
        }
    }

    /// Split a validity period such as `01.01.2025 - 31.12.2025` into its
    /// two bounds. The first separator that yields exactly two parts wins;
    /// text that cannot be split leaves both bounds unset.
    pub fn with_validity_period(mut self, period: &str) -> Self {
        let period = period.trim();
        if period.is_empty() {
            return self;
        }
        let split = PERIOD_SEPARATORS.iter().find_map(|sep| {
            let parts: Vec<&str> = period.split(sep).collect();
            match parts.as_slice() {
                [from, to] => Some((from.trim().to_string(), to.trim().to_string())),
                _ => None,
            }
        });
        match split {
            Some((from, to)) => {
                self.valid_from = Some(from).filter(|s| !s.is_empty());
                self.valid_to = Some(to).filter(|s| !s.is_empty());
            }
            None => tracing::warn!(period, "validity period could not be split into two dates"),
        }
        self
    }
}

/// One rate card as loaded by the caller.
#[derive(Debug, Clone)]
pub struct RateCardSource {
    pub name: String,
    pub table: Table,
    pub meta: Option<RateCardMeta>,
}

impl RateCardSource {
    pub fn new(name: impl Into<String>, table: Table) -> Self {
        Self {
            name: name.into(),
            table,
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: RateCardMeta) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Stack rate cards into one table.
///
/// With `validate_columns`, every card must carry the first card's column
/// set (compared by normalized name). Without it, the merged header is the
/// union of all columns in first-seen order and absent cells are blank.
/// When any card has metadata, the [`META_COLUMNS`] are appended to every row.
pub fn merge_rate_cards(cards: &[RateCardSource], validate_columns: bool) -> Result<Table, ReconError> {
    let Some(first) = cards.first() else {
        return Err(ReconError::EmptyRateTable);
    };

    if validate_columns && cards.len() > 1 {
        let reference = column_set(&first.table);
        for card in &cards[1..] {
            let current = column_set(&card.table);
            let missing: Vec<String> = reference.difference(&current).cloned().collect();
            let extra: Vec<String> = current.difference(&reference).cloned().collect();
            if !missing.is_empty() || !extra.is_empty() {
                return Err(ReconError::ColumnMismatch {
                    card: card.name.clone(),
                    missing,
                    extra,
                });
            }
        }
    }

    let mut columns: Vec<String> = Vec::new();
    for card in cards {
        for column in &card.table.columns {
            let normalized = normalize_column(column);
            if !columns.iter().any(|c| normalize_column(c) == normalized) {
                columns.push(column.clone());
            }
        }
    }
    let with_meta = cards.iter().any(|c| c.meta.is_some());
    if with_meta {
        columns.retain(|c| !is_meta_column(c));
        columns.extend(META_COLUMNS.iter().map(|c| c.to_string()));
    }

    let mut merged = Table::new(columns.clone());
    for card in cards {
        let positions: Vec<Option<usize>> = columns
            .iter()
            .map(|c| card.table.position_normalized(&normalize_column(c)))
            .collect();
        let meta = card.meta.clone().unwrap_or_default();
        for row in &card.table.rows {
            let mut values: Vec<Option<Cell>> = positions
                .iter()
                .map(|pos| pos.and_then(|i| row.value_at(i).cloned()))
                .collect();
            if with_meta {
                let n = values.len();
                values[n - 4] = meta.carrier_agreement.as_deref().and_then(Cell::from_field);
                values[n - 3] = meta.valid_from.as_deref().and_then(Cell::from_field);
                values[n - 2] = meta.valid_to.as_deref().and_then(Cell::from_field);
                values[n - 1] = Cell::from_field(&card.name);
            }
            merged.push_row(values);
        }
        tracing::debug!(card = %card.name, rows = card.table.len(), "rate card merged");
    }

    if merged.is_empty() {
        return Err(ReconError::EmptyRateTable);
    }
    Ok(merged)
}

pub fn is_meta_column(column: &str) -> bool {
    let normalized = normalize_column(column);
    META_COLUMNS.iter().any(|c| normalize_column(c) == normalized)
}

fn column_set(table: &Table) -> BTreeSet<String> {
    table
        .columns
        .iter()
        .filter(|c| !is_meta_column(c))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(name: &str, columns: &[&str], rows: &[&[&str]]) -> RateCardSource {
        let mut table = Table::new(columns.iter().copied());
        for row in rows {
            table.push_text_row(row);
        }
        RateCardSource::new(name, table)
    }

    #[test]
    fn validity_period_separators() {
        let meta = RateCardMeta::default().with_validity_period("01.01.2025 - 31.12.2025");
        assert_eq!(meta.valid_from.as_deref(), Some("01.01.2025"));
        assert_eq!(meta.valid_to.as_deref(), Some("31.12.2025"));

        let meta = RateCardMeta::default().with_validity_period("01.01.2025–30.06.2025");
        assert_eq!(meta.valid_from.as_deref(), Some("01.01.2025"));
        assert_eq!(meta.valid_to.as_deref(), Some("30.06.2025"));

        // ISO dates contain dashes: only the spaced separator splits cleanly
        let meta = RateCardMeta::default().with_validity_period("2025-01-01 - 2025-12-31");
        assert_eq!(meta.valid_from.as_deref(), Some("2025-01-01"));
        assert_eq!(meta.valid_to.as_deref(), Some("2025-12-31"));
    }

    #[test]
    fn unsplittable_period_leaves_bounds_unset() {
        let meta = RateCardMeta::new(Some("AGR-1")).with_validity_period("whole of 2025");
        assert_eq!(meta.carrier_agreement.as_deref(), Some("AGR-1"));
        assert!(meta.valid_from.is_none());
        assert!(meta.valid_to.is_none());
    }

    #[test]
    fn merge_appends_meta_columns() {
        let a = card("ocean_a.xlsx", &["Lane #", "Origin Country"], &[&["1", "US"], &["2", "CA"]])
            .with_meta(RateCardMeta::new(Some("AGR-A")).with_validity_period("01.01.2025 - 31.12.2025"));
        let b = card("ocean_b.xlsx", &["Lane #", "Origin Country"], &[&["1", "MX"]]);
        let merged = merge_rate_cards(&[a, b], true).unwrap();

        assert_eq!(
            merged.columns,
            vec!["Lane #", "Origin Country", "Carrier agreement", "Valid from", "Valid to", "Source file"]
        );
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.rows[0].get("Carrier agreement"), Some(&Cell::text("AGR-A")));
        assert_eq!(merged.rows[1].get("Valid to"), Some(&Cell::text("31.12.2025")));
        assert_eq!(merged.rows[2].get("Carrier agreement"), None);
        assert_eq!(merged.rows[2].get("Source file"), Some(&Cell::text("ocean_b.xlsx")));
        assert_eq!(merged.rows[2].get("Origin Country"), Some(&Cell::text("MX")));
    }

    #[test]
    fn merge_without_meta_keeps_columns() {
        let a = card("a", &["Lane #", "Mode"], &[&["1", "FTL"]]);
        let merged = merge_rate_cards(&[a], true).unwrap();
        assert_eq!(merged.columns, vec!["Lane #", "Mode"]);
    }

    #[test]
    fn mismatched_columns_rejected() {
        let a = card("a", &["Lane #", "Mode", "Service"], &[&["1", "FTL", "STD"]]);
        let b = card("b", &["Lane #", "Mode", "Equipment"], &[&["1", "FTL", "53"]]);
        let err = merge_rate_cards(&[a, b], true).unwrap_err();
        match err {
            ReconError::ColumnMismatch { card, missing, extra } => {
                assert_eq!(card, "b");
                assert_eq!(missing, vec!["Service"]);
                assert_eq!(extra, vec!["Equipment"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unvalidated_merge_takes_union() {
        let a = card("a", &["Lane #", "Mode"], &[&["1", "FTL"]]);
        let b = card("b", &["Lane #", "Service"], &[&["2", "EXP"]]);
        let merged = merge_rate_cards(&[a, b], false).unwrap();
        assert_eq!(merged.columns, vec!["Lane #", "Mode", "Service"]);
        assert_eq!(merged.rows[0].get("Service"), None);
        assert_eq!(merged.rows[1].get("Service"), Some(&Cell::text("EXP")));
    }

    #[test]
    fn no_cards_is_empty() {
        assert!(matches!(merge_rate_cards(&[], true), Err(ReconError::EmptyRateTable)));
    }
}
