use std::collections::BTreeMap;

use serde::Deserialize;

use crate::condition::ConditionBook;
use crate::error::ReconError;
use crate::geo::{GeoBusinessRule, GeoLookup, GeoRuleBook, GeoSide};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Batch configuration. Every section has defaults, so an empty document is
/// a valid config.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub columns: ColumnConfig,
    #[serde(default)]
    pub geo: GeoColumns,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub shipments: ShipmentFilter,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            columns: ColumnConfig::default(),
            geo: GeoColumns::default(),
            thresholds: Thresholds::default(),
            shipments: ShipmentFilter::default(),
            engine: EngineConfig::default(),
        }
    }
}

fn default_name() -> String {
    "rate card check".into()
}

// ---------------------------------------------------------------------------
// Columns
// ---------------------------------------------------------------------------

/// Identity and lane-metadata column names. Matched by normalized name.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    pub shipment_id: String,
    pub carrier: String,
    pub lc_id: String,
    pub etof_id: String,
    pub delivery_number: String,
    /// Candidate ship-date columns; the first non-blank one wins.
    pub ship_date: Vec<String>,
    pub lane_id: String,
    /// Detected from the rate table (`valid` + `from`) when unset.
    pub valid_from: Option<String>,
    /// Detected from the rate table (`valid` + `to`) when unset.
    pub valid_to: Option<String>,
    /// Rate column copied onto the output row from the first candidate.
    pub passthrough: Option<String>,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            shipment_id: "Shipment ID".into(),
            carrier: "Carrier".into(),
            lc_id: "LC #".into(),
            etof_id: "ETOF #".into(),
            delivery_number: "Delivery Number".into(),
            ship_date: vec!["SHIP_DATE".into(), "Ship Date".into(), "Loading date".into()],
            lane_id: "Lane #".into(),
            valid_from: None,
            valid_to: None,
            passthrough: Some("Carrier agreement".into()),
        }
    }
}

/// Shipment geography columns used by the precheck and the rule resolver.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeoColumns {
    pub origin_country: String,
    pub destination_country: String,
    pub origin_postal: String,
    pub destination_postal: String,
}

impl Default for GeoColumns {
    fn default() -> Self {
        Self {
            origin_country: "Origin Country".into(),
            destination_country: "Destination Country".into(),
            origin_postal: "Origin Postal Code".into(),
            destination_postal: "Destination Postal Code".into(),
        }
    }
}

impl GeoColumns {
    /// (country column, postal column) for one side.
    pub fn for_side(&self, side: GeoSide) -> (&str, &str) {
        match side {
            GeoSide::Origin => (self.origin_country.as_str(), self.origin_postal.as_str()),
            GeoSide::Destination => (
                self.destination_country.as_str(),
                self.destination_postal.as_str(),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Empirical cut-offs for ambiguity handling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// More tied lanes than this switches to pattern summarization.
    pub max_tied_lanes: usize,
    /// More discrepancies than this on any candidate gives up itemizing.
    pub max_discrepancies: usize,
    /// Share at which one column is reported as the dominant cause.
    pub dominant_share: f64,
    /// Share a small group of columns must cover to be reported jointly.
    pub joint_share: f64,
    pub joint_max_columns: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_tied_lanes: 4,
            max_discrepancies: 5,
            dominant_share: 0.7,
            joint_share: 0.8,
            joint_max_columns: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Filter + Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShipmentFilter {
    /// Rows blank in this column are not evaluated and not emitted.
    pub require_column: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Evaluate shipments on the rayon pool. Output is identical either way.
    pub parallel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { parallel: true }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.columns.ship_date.iter().all(|c| c.trim().is_empty()) {
            return Err(ReconError::ConfigValidation(
                "columns.ship_date needs at least one column name".into(),
            ));
        }
        if self.columns.lane_id.trim().is_empty() {
            return Err(ReconError::ConfigValidation("columns.lane_id is empty".into()));
        }

        for (field, value) in [
            ("geo.origin_country", &self.geo.origin_country),
            ("geo.destination_country", &self.geo.destination_country),
            ("geo.origin_postal", &self.geo.origin_postal),
            ("geo.destination_postal", &self.geo.destination_postal),
        ] {
            if value.trim().is_empty() {
                return Err(ReconError::ConfigValidation(format!("{field} is empty")));
            }
        }

        let t = &self.thresholds;
        for (field, share) in [
            ("thresholds.dominant_share", t.dominant_share),
            ("thresholds.joint_share", t.joint_share),
        ] {
            if !(share > 0.0 && share <= 1.0) {
                return Err(ReconError::ConfigValidation(format!(
                    "{field} must be in (0, 1], got {share}"
                )));
            }
        }
        if t.joint_max_columns == 0 {
            return Err(ReconError::ConfigValidation(
                "thresholds.joint_max_columns must be at least 1".into(),
            ));
        }
        if t.max_tied_lanes == 0 {
            return Err(ReconError::ConfigValidation(
                "thresholds.max_tied_lanes must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Rule set documents
// ---------------------------------------------------------------------------

/// Conditions and geo rules in one document, as TOML or JSON.
///
/// ```toml
/// [conditions]
/// "Rate type" = ["NAC: is empty", "FAK: equals FAK"]
///
/// [[geo_rules]]
/// name = "PA East"
/// kind = "postal_zone"
/// countries = ["US"]
/// postal_prefixes = ["190", "191"]
///
/// [rule_columns]
/// "Origin Postal Zone" = ["PA East"]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub conditions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub geo_rules: Vec<GeoBusinessRule>,
    /// Rate column → rule names found in it.
    #[serde(default)]
    pub rule_columns: BTreeMap<String, Vec<String>>,
    /// The collaborator's lookup dictionaries, merged after `geo_rules`.
    #[serde(default)]
    pub geo_lookup: Option<GeoLookup>,
}

impl RuleSet {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        toml::from_str(input).map_err(|e| ReconError::RulesParse(e.to_string()))
    }

    pub fn from_json(input: &str) -> Result<Self, ReconError> {
        serde_json::from_str(input).map_err(|e| ReconError::RulesParse(e.to_string()))
    }

    pub fn into_books(self) -> (ConditionBook, GeoRuleBook) {
        let conditions = ConditionBook::from_map(self.conditions);
        let mut geo = GeoRuleBook::from_rules(self.geo_rules);
        for (column, rules) in &self.rule_columns {
            for rule in rules {
                geo.register_column(column, rule);
            }
        }
        if let Some(lookup) = &self.geo_lookup {
            geo.merge(GeoRuleBook::from_lookup(lookup));
        }
        (conditions, geo)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
