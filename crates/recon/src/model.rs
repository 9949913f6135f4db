use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::condition::ConditionBook;
use crate::geo::GeoRuleBook;
use crate::normalize::{normalize_column, render_number};

// ---------------------------------------------------------------------------
// Cells + records
// ---------------------------------------------------------------------------

/// A raw, non-null cell value. Absence is `None` at every use site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Text(String),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// CSV fields are untyped; blank fields are absent.
    pub fn from_field(field: &str) -> Option<Cell> {
        if field.trim().is_empty() {
            None
        } else {
            Some(Cell::Text(field.to_string()))
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) if n.is_finite() => write!(f, "{}", render_number(*n)),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// Render an optional cell the way diagnosis lines quote values.
pub fn display_value(value: Option<&Cell>) -> String {
    value.map(|c| c.to_string()).unwrap_or_else(|| "None".to_string())
}

/// Ordered attribute map for one row. Column order is the table's order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Option<Cell>)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<Cell>)>,
        K: Into<String>,
    {
        Self {
            fields: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn push(&mut self, column: impl Into<String>, value: Option<Cell>) {
        self.fields.push((column.into(), value));
    }

    /// Exact-name lookup. A missing column and a blank cell both read as `None`.
    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .and_then(|(_, v)| v.as_ref())
    }

    /// Lookup by normalized column name.
    pub fn get_normalized(&self, normalized: &str) -> Option<&Cell> {
        self.fields
            .iter()
            .find(|(name, _)| normalize_column(name) == normalized)
            .and_then(|(_, v)| v.as_ref())
    }

    pub fn value_at(&self, index: usize) -> Option<&Cell> {
        self.fields.get(index).and_then(|(_, v)| v.as_ref())
    }

    pub fn contains(&self, column: &str) -> bool {
        self.fields.iter().any(|(name, _)| name == column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Cell>)> {
        self.fields.iter().map(|(name, v)| (name.as_str(), v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A header plus rows. Every row carries every header column, in header order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

impl Table {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row of positional values. Short rows are padded with blanks,
    /// extra values are dropped.
    pub fn push_row(&mut self, values: Vec<Option<Cell>>) {
        let mut values = values.into_iter();
        let record = Record::from_pairs(
            self.columns
                .iter()
                .map(|c| (c.clone(), values.next().flatten())),
        );
        self.rows.push(record);
    }

    /// Convenience for tests and fixtures: text values, blank strings absent.
    pub fn push_text_row(&mut self, values: &[&str]) {
        self.push_row(values.iter().map(|v| Cell::from_field(v)).collect());
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the first column whose normalized name equals `normalized`.
    pub fn position_normalized(&self, normalized: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| normalize_column(c) == normalized)
    }

    /// Column name lookup by (un-normalized) name, tolerant of case, spaces
    /// and underscores.
    pub fn find_column(&self, name: &str) -> Option<&str> {
        let wanted = normalize_column(name);
        self.position_normalized(&wanted)
            .map(|i| self.columns[i].as_str())
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One shipment row, identity fields resolved from the configured columns.
#[derive(Debug, Clone)]
pub struct ShipmentRecord {
    /// Zero-based position in the shipment table.
    pub row: usize,
    pub shipment_id: Option<String>,
    pub carrier: Option<String>,
    pub lc_id: Option<String>,
    pub etof_id: Option<String>,
    /// First non-blank configured ship-date column, with its value.
    pub ship_date_column: Option<String>,
    pub ship_date: Option<Cell>,
    pub attributes: Record,
}

/// One rate-card row with its validity window and lane identifier.
#[derive(Debug, Clone)]
pub struct RateLane {
    /// Zero-based position in the rate table.
    pub index: usize,
    pub lane_id: Option<String>,
    pub valid_from: Option<Cell>,
    pub valid_to: Option<Cell>,
    pub passthrough: Option<Cell>,
    pub attributes: Record,
}

impl RateLane {
    /// Lane id when present, otherwise the 1-based row number.
    pub fn label(&self) -> String {
        self.lane_id
            .clone()
            .unwrap_or_else(|| format!("row {}", self.index + 1))
    }
}

/// Everything one batch needs: both tables and both rule books.
pub struct ReconInput {
    pub shipments: Table,
    pub rates: Table,
    pub conditions: ConditionBook,
    pub geo_rules: GeoRuleBook,
}

// ---------------------------------------------------------------------------
// Per-shipment evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    ValueMismatch,
    DateRange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discrepancy {
    pub column: String,
    pub shipment_value: Option<Cell>,
    pub lane_value: Option<Cell>,
    /// Rule text tied to the lane value, even when it did not excuse the
    /// mismatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolving_condition: Option<String>,
    /// Explicit target code named by an `equals` rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_code: Option<String>,
    pub kind: DiscrepancyKind,
}

impl Discrepancy {
    pub fn value_mismatch(
        column: impl Into<String>,
        shipment_value: Option<Cell>,
        lane_value: Option<Cell>,
    ) -> Self {
        Self {
            column: column.into(),
            shipment_value,
            lane_value,
            resolving_condition: None,
            expected_code: None,
            kind: DiscrepancyKind::ValueMismatch,
        }
    }

    /// The value the shipment should carry: the rule's explicit code when one
    /// exists, otherwise the lane cell.
    pub fn target(&self) -> String {
        match &self.expected_code {
            Some(code) => code.clone(),
            None => display_value(self.lane_value.as_ref()),
        }
    }

    pub fn date_range(column: impl Into<String>, shipment_value: Option<Cell>) -> Self {
        Self {
            column: column.into(),
            shipment_value,
            lane_value: None,
            resolving_condition: None,
            expected_code: None,
            kind: DiscrepancyKind::DateRange,
        }
    }
}

/// A lane that achieved the maximal overlap score for one shipment.
#[derive(Debug, Clone)]
pub struct MatchCandidate<'a> {
    pub lane: &'a RateLane,
    pub score: usize,
    pub discrepancies: Vec<Discrepancy>,
}

impl<'a> MatchCandidate<'a> {
    pub fn new(lane: &'a RateLane, score: usize) -> Self {
        Self {
            lane,
            score,
            discrepancies: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

pub const NO_DISCREPANCIES: &str = "No discrepancies found";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Candidates found, nothing to change.
    Clean,
    /// Itemized discrepancies for up to `max_tied_lanes` candidates.
    Discrepancies,
    /// Geography unknown to the rate card; never scored.
    GeoRejected,
    /// No lane scored above zero.
    NoMatch,
    /// Every candidate's validity window excludes the ship date.
    OutOfValidity,
    /// A candidate exceeded `max_discrepancies`.
    TooManyDiscrepancies,
    /// Too many tied lanes, discrepancies condensed to a dominant cause.
    PatternSummary,
    /// Too many tied lanes, none of them with a discrepancy.
    Ambiguous,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => write!(f, "clean"),
            Self::Discrepancies => write!(f, "discrepancies"),
            Self::GeoRejected => write!(f, "geo_rejected"),
            Self::NoMatch => write!(f, "no_match"),
            Self::OutOfValidity => write!(f, "out_of_validity"),
            Self::TooManyDiscrepancies => write!(f, "too_many_discrepancies"),
            Self::PatternSummary => write!(f, "pattern_summary"),
            Self::Ambiguous => write!(f, "ambiguous"),
        }
    }
}

/// Diagnosis lines for one shipment, before they are joined into a comment.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnosis {
    pub kind: OutcomeKind,
    pub lines: Vec<String>,
}

impl Diagnosis {
    pub fn new(kind: OutcomeKind, lines: Vec<String>) -> Self {
        Self { kind, lines }
    }

    pub fn single(kind: OutcomeKind, line: impl Into<String>) -> Self {
        Self {
            kind,
            lines: vec![line.into()],
        }
    }

    /// `\n`-joined lines; an empty diagnosis reads "No discrepancies found".
    pub fn comment(&self) -> String {
        let joined = self.lines.join("\n");
        if joined.trim().is_empty() {
            NO_DISCREPANCIES.to_string()
        } else {
            joined
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShipmentOutcome {
    pub row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carrier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lc_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etof_id: Option<String>,
    pub kind: OutcomeKind,
    pub comment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passthrough: Option<String>,
    pub candidate_count: usize,
    pub lane_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconSummary {
    pub total_shipments: usize,
    pub clean: usize,
    pub with_discrepancies: usize,
    pub geo_rejected: usize,
    pub no_match: usize,
    pub out_of_validity: usize,
    pub too_many_discrepancies: usize,
    pub pattern_summary: usize,
    pub ambiguous: usize,
    pub skipped_rows: usize,
    pub kind_counts: HashMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconResult {
    pub meta: ReconMeta,
    pub summary: ReconSummary,
    pub shipments: Vec<ShipmentOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
    pub lane_count: usize,
    pub shared_columns: Vec<String>,
    /// Rate column copied onto each shipment, when the rate table has it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passthrough_column: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_display_drops_integral_fraction() {
        assert_eq!(Cell::Number(7719.0).to_string(), "7719");
        assert_eq!(Cell::Number(1.5).to_string(), "1.5");
        assert_eq!(Cell::text("FAK").to_string(), "FAK");
        assert_eq!(display_value(None), "None");
    }

    #[test]
    fn table_rows_are_padded() {
        let mut t = Table::new(["A", "B", "C"]);
        t.push_text_row(&["1", ""]);
        assert_eq!(t.rows[0].len(), 3);
        assert_eq!(t.rows[0].get("A"), Some(&Cell::text("1")));
        assert_eq!(t.rows[0].get("B"), None);
        assert_eq!(t.rows[0].get("C"), None);
        assert!(t.rows[0].contains("C"));
    }

    #[test]
    fn normalized_lookup() {
        let t = Table::new(["Origin Country", "SHIP_DATE"]);
        assert_eq!(t.find_column("origin_country"), Some("Origin Country"));
        assert_eq!(t.find_column("Ship Date"), Some("SHIP_DATE"));
        assert_eq!(t.find_column("Carrier"), None);
    }

    #[test]
    fn empty_diagnosis_reads_clean() {
        assert_eq!(Diagnosis::new(OutcomeKind::Clean, vec![]).comment(), NO_DISCREPANCIES);
        let d = Diagnosis::new(OutcomeKind::Discrepancies, vec!["a".into(), "b".into()]);
        assert_eq!(d.comment(), "a\nb");
    }

    #[test]
    fn discrepancy_target_prefers_code() {
        let mut d = Discrepancy::value_mismatch("Rate type", Some("X".into()), Some("NAC".into()));
        assert_eq!(d.target(), "NAC");
        d.resolving_condition = Some("NAC: equals FAK".into());
        assert_eq!(d.target(), "NAC");
        d.expected_code = Some("FAK".into());
        assert_eq!(d.target(), "FAK");
    }
}
