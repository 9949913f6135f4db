//! Geographic business rules.
//!
//! A rate card may name a zone ("DE North", "EU Hubs") instead of listing
//! countries and postal codes. The rule book resolves such a name against a
//! shipment's country and postal code, and the precheck rejects shipments
//! whose countries the rate card never mentions.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::GeoColumns;
use crate::error::ReconError;
use crate::model::{Cell, Record, Table};
use crate::normalize::{normalize, normalize_column, normalize_str};

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoRuleKind {
    /// Validates country only.
    CountryRegion,
    /// Validates country and postal prefix.
    PostalZone,
}

impl std::fmt::Display for GeoRuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CountryRegion => write!(f, "country_region"),
            Self::PostalZone => write!(f, "postal_zone"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoBusinessRule {
    pub name: String,
    pub kind: GeoRuleKind,
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub postal_prefixes: Vec<String>,
    /// Listed prefixes are excluded rather than required.
    #[serde(default)]
    pub exclude: bool,
}

impl GeoBusinessRule {
    pub fn country_region(name: impl Into<String>, countries: &str) -> Self {
        Self {
            name: name.into(),
            kind: GeoRuleKind::CountryRegion,
            countries: split_list(countries),
            postal_prefixes: Vec::new(),
            exclude: false,
        }
    }

    pub fn postal_zone(name: impl Into<String>, countries: &str, prefixes: &str) -> Self {
        Self {
            name: name.into(),
            kind: GeoRuleKind::PostalZone,
            countries: split_list(countries),
            postal_prefixes: split_list(prefixes),
            exclude: false,
        }
    }

    pub fn excluding(mut self) -> Self {
        self.exclude = true;
        self
    }

    /// Membership by normalized value. A rule without countries accepts any
    /// country.
    pub fn matches_country(&self, country: Option<&Cell>) -> bool {
        let Some(country) = normalize(country) else {
            return false;
        };
        self.countries.is_empty()
            || self
                .countries
                .iter()
                .any(|c| normalize_str(c).as_deref() == Some(country.as_str()))
    }

    /// Case-insensitive prefix test. With `exclude`, a match means none of
    /// the prefixes apply.
    pub fn matches_postal(&self, postal: Option<&Cell>) -> bool {
        if self.postal_prefixes.is_empty() {
            return true;
        }
        let code = normalize(postal);
        let hit = code.as_deref().is_some_and(|code| {
            self.postal_prefixes
                .iter()
                .filter_map(|p| normalize_str(p))
                .any(|p| code.starts_with(&p))
        });
        if self.exclude {
            !hit
        } else {
            hit
        }
    }

    /// Human-readable form used as the resolving condition of geo
    /// discrepancies.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.countries.is_empty() {
            parts.push(format!("Country: {}", self.countries.join(", ")));
        }
        if !self.postal_prefixes.is_empty() {
            let mut list = self
                .postal_prefixes
                .iter()
                .take(5)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            if self.postal_prefixes.len() > 5 {
                list.push_str(&format!(", ... (+{} more)", self.postal_prefixes.len() - 5));
            }
            parts.push(format!("Postal codes starting with: {list}"));
        }
        if self.exclude {
            parts.push("(EXCLUDE)".to_string());
        }
        if parts.is_empty() {
            "No conditions".to_string()
        } else {
            parts.join(" | ")
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn rule_key(name: &str) -> String {
    name.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Column classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoSide {
    Origin,
    Destination,
}

/// Keywords checked in this order; `to` is last because it hides inside
/// many longer words.
const SIDE_KEYWORDS: &[(&str, GeoSide)] = &[
    ("origin", GeoSide::Origin),
    ("destination", GeoSide::Destination),
    ("from", GeoSide::Origin),
    ("cust", GeoSide::Destination),
    ("ship to", GeoSide::Destination),
    ("shipto", GeoSide::Destination),
    ("ship", GeoSide::Origin),
    ("to", GeoSide::Destination),
];

pub fn side_for_column(column: &str) -> Option<GeoSide> {
    let lowered = column.to_lowercase().replace(['-', '_'], " ");
    SIDE_KEYWORDS
        .iter()
        .find(|(kw, _)| lowered.contains(kw))
        .map(|(_, side)| *side)
}

/// Rule kind implied by the column name, if any.
pub fn kind_for_column(column: &str) -> Option<GeoRuleKind> {
    let lowered = column.to_lowercase();
    if lowered.contains("country") && lowered.contains("region") {
        Some(GeoRuleKind::CountryRegion)
    } else if lowered.contains("postal") || lowered.contains("zone") {
        Some(GeoRuleKind::PostalZone)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoFailureKind {
    CountryMismatch,
    /// Country matched, postal code did not.
    PostalMismatch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoFailure {
    pub kind: GeoFailureKind,
    pub rule_kind: GeoRuleKind,
    pub rule_name: String,
    /// The shipment value that failed (country or postal code).
    pub shipment_value: Option<Cell>,
    pub description: String,
}

/// Outcome of resolving one business-rule column for one lane.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoCheck {
    pub column: String,
    pub side: GeoSide,
    pub rule_name: String,
    /// Columns this check vouches for; direct comparison skips them.
    pub validated_columns: Vec<String>,
    pub failure: Option<GeoFailure>,
}

impl GeoCheck {
    pub fn matched(&self) -> bool {
        self.failure.is_none()
    }
}

// ---------------------------------------------------------------------------
// Book
// ---------------------------------------------------------------------------

/// The collaborator's lookup dictionaries, as handed over (JSON or TOML).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeoLookup {
    #[serde(default)]
    pub rule_to_country: BTreeMap<String, String>,
    #[serde(default)]
    pub rule_to_postal_codes: BTreeMap<String, Vec<String>>,
    /// Column name → rule names found in it. Derived from the rate table when
    /// empty.
    #[serde(default)]
    pub columns_containing_rules: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub excluded: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct RuleColumn {
    column: String,
    rules: Vec<String>,
}

/// Geo business rules plus the rate-card columns they appear in. Immutable
/// once a batch starts.
#[derive(Debug, Clone, Default)]
pub struct GeoRuleBook {
    rules: Vec<GeoBusinessRule>,
    by_name: HashMap<String, usize>,
    columns: BTreeMap<String, RuleColumn>,
}

impl GeoRuleBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rules(rules: impl IntoIterator<Item = GeoBusinessRule>) -> Self {
        let mut book = Self::new();
        for rule in rules {
            book.add_rule(rule);
        }
        book
    }

    /// Rules with postal codes are postal zones, the rest country regions.
    pub fn from_lookup(lookup: &GeoLookup) -> Self {
        let excluded: HashSet<String> = lookup.excluded.iter().map(|n| rule_key(n)).collect();
        let mut names: Vec<&String> = lookup
            .rule_to_country
            .keys()
            .chain(lookup.rule_to_postal_codes.keys())
            .collect();
        names.sort();
        names.dedup();

        let mut book = Self::new();
        for name in names {
            let countries = lookup
                .rule_to_country
                .get(name)
                .map(|c| split_list(c))
                .unwrap_or_default();
            let postal_prefixes = lookup.rule_to_postal_codes.get(name).cloned().unwrap_or_default();
            let kind = if postal_prefixes.is_empty() {
                GeoRuleKind::CountryRegion
            } else {
                GeoRuleKind::PostalZone
            };
            book.add_rule(GeoBusinessRule {
                name: name.clone(),
                kind,
                countries,
                postal_prefixes,
                exclude: excluded.contains(&rule_key(name)),
            });
        }
        for (column, rules) in &lookup.columns_containing_rules {
            for rule in rules {
                book.register_column(column, rule);
            }
        }
        book
    }

    /// Load the business-rules sheet export (`Rule Name`, `Section`,
    /// `Country`, `Postal Codes`, `Exclude`).
    pub fn from_csv(data: &str) -> Result<Self, ReconError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(data.as_bytes());
        let headers = reader.headers()?.clone();
        let find = |wanted: &str| headers.iter().position(|h| normalize_column(h) == wanted);
        let name_idx = find("rulename").ok_or_else(|| {
            ReconError::RulesParse("business rules sheet: missing 'Rule Name' header".into())
        })?;
        let section_idx = find("section");
        let country_idx = find("country");
        let postal_idx = find("postalcodes").or_else(|| find("postalcode"));
        let exclude_idx = find("exclude");

        let mut book = Self::new();
        for record in reader.records() {
            let record = record?;
            let field = |idx: Option<usize>| idx.and_then(|i| record.get(i)).unwrap_or("").trim();
            let name = field(Some(name_idx));
            if name.is_empty() {
                continue;
            }
            let section = field(section_idx).to_lowercase();
            let countries = split_list(field(country_idx));
            let prefixes = if section.contains("country region") {
                Vec::new()
            } else {
                split_list(field(postal_idx))
            };
            let kind = if prefixes.is_empty() {
                GeoRuleKind::CountryRegion
            } else {
                GeoRuleKind::PostalZone
            };
            let exclude = matches!(
                field(exclude_idx).to_lowercase().as_str(),
                "yes" | "true" | "1" | "x" | "exclude"
            );
            book.add_rule(GeoBusinessRule {
                name: name.to_string(),
                kind,
                countries,
                postal_prefixes: prefixes,
                exclude,
            });
        }
        Ok(book)
    }

    /// Insert or replace a rule by (case-insensitive) name.
    pub fn add_rule(&mut self, rule: GeoBusinessRule) {
        let key = rule_key(&rule.name);
        match self.by_name.get(&key) {
            Some(&i) => self.rules[i] = rule,
            None => {
                self.by_name.insert(key, self.rules.len());
                self.rules.push(rule);
            }
        }
    }

    pub fn register_column(&mut self, column: &str, rule_name: &str) {
        let entry = self
            .columns
            .entry(normalize_column(column))
            .or_insert_with(|| RuleColumn {
                column: column.to_string(),
                rules: Vec::new(),
            });
        if !entry.rules.iter().any(|r| rule_key(r) == rule_key(rule_name)) {
            entry.rules.push(rule_name.to_string());
        }
    }

    /// Record which rate columns hold rule names, by scanning every cell.
    pub fn index_rate_columns(&mut self, rates: &Table) {
        let mut found: Vec<(String, String)> = Vec::new();
        for row in &rates.rows {
            for (column, value) in row.iter() {
                let Some(value) = value else { continue };
                if let Some(rule) = self.get(&value.to_string()) {
                    found.push((column.to_string(), rule.name.clone()));
                }
            }
        }
        for (column, rule) in found {
            self.register_column(&column, &rule);
        }
        tracing::debug!(columns = self.columns.len(), "indexed business-rule columns");
    }

    /// Add rules and column registrations from another book. Rules already
    /// present by name are kept.
    pub fn merge(&mut self, other: GeoRuleBook) {
        for rule in other.rules {
            if self.get(&rule.name).is_none() {
                self.add_rule(rule);
            }
        }
        for (_, rc) in other.columns {
            for rule in &rc.rules {
                self.register_column(&rc.column, rule);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&GeoBusinessRule> {
        self.by_name.get(&rule_key(name)).map(|&i| &self.rules[i])
    }

    pub fn rules(&self) -> &[GeoBusinessRule] {
        &self.rules
    }

    pub fn is_rule_column(&self, column: &str) -> bool {
        self.columns.contains_key(&normalize_column(column))
    }

    pub fn has_rule_columns(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn rule_columns(&self) -> impl Iterator<Item = &str> {
        self.columns.values().map(|c| c.column.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn rules_for_column(&self, column: &str) -> impl Iterator<Item = &GeoBusinessRule> {
        self.columns
            .get(&normalize_column(column))
            .into_iter()
            .flat_map(|rc| rc.rules.iter())
            .filter_map(|name| self.get(name))
    }

    /// Resolve one business-rule column of a lane against a shipment.
    ///
    /// A non-blank lane cell names the rule directly. A blank cell is
    /// inferred from the first rule registered for the column that the
    /// shipment's geography satisfies; if none does, there is nothing to
    /// report. Returns `None` when the column is not geographic, the cell is
    /// not a known rule, or the shipment has no country on that side.
    pub fn resolve(
        &self,
        shipment: &Record,
        geo: &GeoColumns,
        column: &str,
        lane_value: Option<&Cell>,
    ) -> Option<GeoCheck> {
        let side = side_for_column(column)?;
        let (country_col, postal_col) = geo.for_side(side);
        let country = shipment.get_normalized(&normalize_column(country_col));
        if country.is_none() {
            return None;
        }
        let postal = shipment.get_normalized(&normalize_column(postal_col));

        let validated = |kind: GeoRuleKind| {
            let mut cols = vec![column.to_string(), country_col.to_string()];
            if kind == GeoRuleKind::PostalZone {
                cols.push(postal_col.to_string());
            }
            cols
        };
        let kind_of = |rule: &GeoBusinessRule| kind_for_column(column).unwrap_or(rule.kind);

        match lane_value.filter(|v| normalize(Some(*v)).is_some()) {
            Some(value) => {
                let rule = self.get(&value.to_string())?;
                let kind = kind_of(rule);
                let failure = if !rule.matches_country(country) {
                    Some(GeoFailure {
                        kind: GeoFailureKind::CountryMismatch,
                        rule_kind: kind,
                        rule_name: rule.name.clone(),
                        shipment_value: country.cloned(),
                        description: rule.describe(),
                    })
                } else if kind == GeoRuleKind::PostalZone && !rule.matches_postal(postal) {
                    Some(GeoFailure {
                        kind: GeoFailureKind::PostalMismatch,
                        rule_kind: kind,
                        rule_name: rule.name.clone(),
                        shipment_value: postal.cloned(),
                        description: rule.describe(),
                    })
                } else {
                    None
                };
                Some(GeoCheck {
                    column: column.to_string(),
                    side,
                    rule_name: rule.name.clone(),
                    validated_columns: validated(kind),
                    failure,
                })
            }
            None => {
                let rule = self.rules_for_column(column).find(|rule| {
                    rule.matches_country(country)
                        && (kind_of(rule) == GeoRuleKind::CountryRegion || rule.matches_postal(postal))
                })?;
                Some(GeoCheck {
                    column: column.to_string(),
                    side,
                    rule_name: rule.name.clone(),
                    validated_columns: validated(kind_of(rule)),
                    failure: None,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Precheck
// ---------------------------------------------------------------------------

/// Countries the rate card knows, built once per batch.
#[derive(Debug, Clone, Default)]
pub struct KnownGeography {
    origins: HashSet<String>,
    destinations: HashSet<String>,
    pairs: HashSet<(String, String)>,
}

impl KnownGeography {
    /// `None` when the rate table carries no country data, in which case the
    /// precheck is skipped.
    pub fn from_rates(rates: &Table, geo: &GeoColumns) -> Option<Self> {
        let origin_idx = rates.position_normalized(&normalize_column(&geo.origin_country))?;
        let dest_idx = rates.position_normalized(&normalize_column(&geo.destination_country))?;
        let mut known = Self::default();
        for row in &rates.rows {
            let origin = normalize(row.value_at(origin_idx));
            let dest = normalize(row.value_at(dest_idx));
            if let Some(o) = &origin {
                known.origins.insert(o.clone());
            }
            if let Some(d) = &dest {
                known.destinations.insert(d.clone());
            }
            if let (Some(o), Some(d)) = (origin, dest) {
                known.pairs.insert((o, d));
            }
        }
        if known.origins.is_empty() && known.destinations.is_empty() {
            None
        } else {
            Some(known)
        }
    }

    /// The rejection line for a shipment, or `None` when its geography is
    /// covered by the rate card.
    pub fn precheck(&self, shipment: &Record, geo: &GeoColumns) -> Option<String> {
        let origin_raw = shipment.get_normalized(&normalize_column(&geo.origin_country));
        let dest_raw = shipment.get_normalized(&normalize_column(&geo.destination_country));
        let Some(origin) = normalize(origin_raw) else {
            return Some("origin country is missing".into());
        };
        let Some(dest) = normalize(dest_raw) else {
            return Some("destination country is missing".into());
        };
        let origin_missing = !self.origins.contains(&origin);
        let dest_missing = !self.destinations.contains(&dest);
        match (origin_missing, dest_missing) {
            (true, true) => Some("origin-destination are missing".into()),
            (true, false) => Some(format!("Origin country '{}' is missing", display(origin_raw))),
            (false, true) => Some(format!("Destination country '{}' is missing", display(dest_raw))),
            (false, false) if !self.pairs.contains(&(origin, dest)) => {
                Some("Origin-Destination country combination is missing".into())
            }
            _ => None,
        }
    }
}

fn display(value: Option<&Cell>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
