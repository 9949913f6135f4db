//! Per-candidate discrepancy synthesis.
//!
//! Geo business rules run first and vouch for the columns they validate.
//! The remaining shared columns are compared directly, each mismatch getting
//! one chance to be excused by a condition rule.

use std::collections::HashSet;

use crate::condition::ConditionBook;
use crate::config::GeoColumns;
use crate::geo::{GeoCheck, GeoFailureKind, GeoRuleBook, GeoRuleKind, GeoSide};
use crate::matcher::{values_match, ColumnPlan};
use crate::model::{Cell, Discrepancy, DiscrepancyKind, RateLane, ShipmentRecord};
use crate::normalize::normalize_column;

/// Read-only inputs shared by every candidate of every shipment.
#[derive(Debug, Clone, Copy)]
pub struct DiscrepancyRules<'a> {
    pub plan: &'a ColumnPlan,
    pub conditions: &'a ConditionBook,
    pub geo_rules: &'a GeoRuleBook,
    pub geo: &'a GeoColumns,
}

/// All discrepancies between one shipment and one lane. Geo failures come
/// first, then direct mismatches in shared-column order.
pub fn compute_discrepancies(
    rules: DiscrepancyRules<'_>,
    shipment: &ShipmentRecord,
    lane: &RateLane,
) -> Vec<Discrepancy> {
    let checks = resolve_geo(rules, shipment, lane);
    let validated: HashSet<String> = checks
        .iter()
        .flat_map(|c| c.validated_columns.iter())
        .map(|c| normalize_column(c))
        .collect();

    let direct = direct_discrepancies(rules, shipment, lane, &validated);
    let mut out = geo_discrepancies(rules.geo, &checks, &direct);
    out.extend(direct);
    out
}

fn resolve_geo(rules: DiscrepancyRules<'_>, shipment: &ShipmentRecord, lane: &RateLane) -> Vec<GeoCheck> {
    if !rules.geo_rules.has_rule_columns() {
        return Vec::new();
    }
    lane.attributes
        .iter()
        .filter(|(column, _)| rules.geo_rules.is_rule_column(column))
        .filter_map(|(column, value)| {
            rules
                .geo_rules
                .resolve(&shipment.attributes, rules.geo, column, value)
        })
        .collect()
}

fn direct_discrepancies(
    rules: DiscrepancyRules<'_>,
    shipment: &ShipmentRecord,
    lane: &RateLane,
    validated: &HashSet<String>,
) -> Vec<Discrepancy> {
    let mut out = Vec::new();
    for column in &rules.plan.columns {
        if validated.contains(&column.normalized) {
            continue;
        }
        let shipment_value = shipment.attributes.value_at(column.shipment_idx);
        let lane_value = lane.attributes.value_at(column.lane_idx);

        // rule-coded column with nothing to compare on the shipment side
        if shipment_value.is_none() && rules.geo_rules.is_rule_column(&column.name) {
            continue;
        }
        if values_match(column, shipment_value, lane_value) {
            continue;
        }
        if rules.conditions.satisfies(&column.name, shipment_value, lane_value) {
            continue;
        }

        let rule = rules.conditions.find_rule_for_value(&column.name, lane_value);
        out.push(Discrepancy {
            column: column.name.clone(),
            shipment_value: shipment_value.cloned(),
            lane_value: lane_value.cloned(),
            resolving_condition: rule.map(|r| r.text.clone()),
            expected_code: rule.and_then(|r| r.expected_code()),
            kind: DiscrepancyKind::ValueMismatch,
        });
    }
    out
}

/// Turn geo failures into discrepancies. A country-region failure is dropped
/// when its side is already covered by a postal failure or by a direct
/// discrepancy on that side's country or postal column.
fn geo_discrepancies(geo: &GeoColumns, checks: &[GeoCheck], direct: &[Discrepancy]) -> Vec<Discrepancy> {
    let side_covered = |side: GeoSide| {
        let (country_col, postal_col) = geo.for_side(side);
        let (country_col, postal_col) = (normalize_column(country_col), normalize_column(postal_col));
        let postal_failure = checks.iter().any(|c| {
            c.side == side
                && c.failure.as_ref().is_some_and(|f| {
                    f.kind == GeoFailureKind::PostalMismatch || f.rule_kind == GeoRuleKind::PostalZone
                })
        });
        postal_failure
            || direct.iter().any(|d| {
                let col = normalize_column(&d.column);
                col == country_col || col == postal_col
            })
    };

    let mut out = Vec::new();
    for check in checks {
        let Some(failure) = &check.failure else {
            continue;
        };
        let country_region_only =
            failure.rule_kind == GeoRuleKind::CountryRegion && failure.kind == GeoFailureKind::CountryMismatch;
        if country_region_only && side_covered(check.side) {
            tracing::debug!(column = %check.column, "country-region failure covered by another discrepancy");
            continue;
        }
        out.push(Discrepancy {
            column: check.column.clone(),
            shipment_value: failure.shipment_value.clone(),
            lane_value: Some(Cell::Text(failure.rule_name.clone())),
            resolving_condition: Some(failure.description.clone()),
            expected_code: None,
            kind: DiscrepancyKind::ValueMismatch,
        });
    }
    out
}
