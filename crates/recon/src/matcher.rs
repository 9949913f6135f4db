use std::collections::HashSet;

use crate::error::ReconError;
use crate::model::{Cell, MatchCandidate, RateLane, ShipmentRecord, Table};
use crate::normalize::{is_postal_column, normalize, normalize_column, postal_matches};

// ---------------------------------------------------------------------------
// Shared columns
// ---------------------------------------------------------------------------

/// A column present in both tables, matched by normalized name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedColumn {
    /// Name as spelled in the rate table.
    pub name: String,
    pub normalized: String,
    pub shipment_idx: usize,
    pub lane_idx: usize,
    /// Lane values are zone prefixes, compared with `starts_with`.
    pub postal: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ColumnPlan {
    pub columns: Vec<SharedColumn>,
}

impl ColumnPlan {
    /// Columns shared by both tables, in rate-table order, minus `excluded`
    /// (normalized names of lane metadata columns).
    pub fn build(shipments: &Table, rates: &Table, excluded: &HashSet<String>) -> Result<Self, ReconError> {
        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        for (lane_idx, name) in rates.columns.iter().enumerate() {
            let normalized = normalize_column(name);
            if excluded.contains(&normalized) || !seen.insert(normalized.clone()) {
                continue;
            }
            if let Some(shipment_idx) = shipments.position_normalized(&normalized) {
                columns.push(SharedColumn {
                    name: name.clone(),
                    postal: is_postal_column(name),
                    normalized,
                    shipment_idx,
                    lane_idx,
                });
            }
        }
        if columns.is_empty() {
            return Err(ReconError::NoSharedColumns);
        }
        Ok(Self { columns })
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Equality used by scoring and discrepancy detection: postal columns by
/// prefix, everything else by normalized value. Two blanks are equal.
pub fn values_match(column: &SharedColumn, shipment: Option<&Cell>, lane: Option<&Cell>) -> bool {
    keys_match(column.postal, normalize(shipment).as_deref(), normalize(lane).as_deref())
}

fn keys_match(postal: bool, shipment: Option<&str>, lane: Option<&str>) -> bool {
    if postal {
        postal_matches(shipment, lane)
    } else {
        shipment == lane
    }
}

// ---------------------------------------------------------------------------
// Lane scoring
// ---------------------------------------------------------------------------

/// Rate lanes with their shared-column values normalized once per batch.
#[derive(Debug, Clone)]
pub struct LaneIndex {
    lanes: Vec<RateLane>,
    keys: Vec<Vec<Option<String>>>,
}

impl LaneIndex {
    pub fn new(lanes: Vec<RateLane>, plan: &ColumnPlan) -> Self {
        let keys = lanes
            .iter()
            .map(|lane| {
                plan.columns
                    .iter()
                    .map(|c| normalize(lane.attributes.value_at(c.lane_idx)))
                    .collect()
            })
            .collect();
        Self { lanes, keys }
    }

    pub fn lanes(&self) -> &[RateLane] {
        &self.lanes
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Every lane reaching the maximal overlap score, in lane order. Ties are
    /// kept. Empty when no lane scores above zero.
    pub fn match_shipment<'a>(&'a self, shipment: &ShipmentRecord, plan: &ColumnPlan) -> Vec<MatchCandidate<'a>> {
        let shipment_keys: Vec<Option<String>> = plan
            .columns
            .iter()
            .map(|c| normalize(shipment.attributes.value_at(c.shipment_idx)))
            .collect();

        let mut best = 0;
        let mut candidates = Vec::new();
        for (lane, lane_keys) in self.lanes.iter().zip(&self.keys) {
            let score = plan
                .columns
                .iter()
                .zip(shipment_keys.iter().zip(lane_keys))
                .filter(|(c, (s, l))| keys_match(c.postal, s.as_deref(), l.as_deref()))
                .count();
            if score == 0 || score < best {
                continue;
            }
            if score > best {
                best = score;
                candidates.clear();
            }
            candidates.push(MatchCandidate::new(lane, score));
        }
        candidates
    }
}
