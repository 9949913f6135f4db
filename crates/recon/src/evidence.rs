use std::collections::HashMap;

use crate::model::{OutcomeKind, ReconSummary, ShipmentOutcome};

/// Compute summary counts from per-shipment outcomes. `skipped_rows` are
/// shipments filtered out before evaluation.
pub fn compute_summary(outcomes: &[ShipmentOutcome], skipped_rows: usize) -> ReconSummary {
    let mut kind_counts: HashMap<String, usize> = HashMap::new();
    let mut summary = ReconSummary {
        total_shipments: outcomes.len(),
        skipped_rows,
        ..ReconSummary::default()
    };

    for o in outcomes {
        *kind_counts.entry(o.kind.to_string()).or_insert(0) += 1;

        match o.kind {
            OutcomeKind::Clean => summary.clean += 1,
            OutcomeKind::Discrepancies => summary.with_discrepancies += 1,
            OutcomeKind::GeoRejected => summary.geo_rejected += 1,
            OutcomeKind::NoMatch => summary.no_match += 1,
            OutcomeKind::OutOfValidity => summary.out_of_validity += 1,
            OutcomeKind::TooManyDiscrepancies => summary.too_many_discrepancies += 1,
            OutcomeKind::PatternSummary => summary.pattern_summary += 1,
            OutcomeKind::Ambiguous => summary.ambiguous += 1,
        }
    }

    summary.kind_counts = kind_counts;
    summary
}
