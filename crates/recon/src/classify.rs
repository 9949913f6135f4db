//! Turning candidates and their discrepancies into one diagnosis.
//!
//! When at most `max_tied_lanes` lanes tie, candidates are itemized one block
//! per candidate. Beyond that the pooled discrepancies are condensed to their
//! dominant column(s).

use crate::aggregate::{tally_by_column, ColumnTally};
use crate::config::Thresholds;
use crate::model::{display_value, Diagnosis, Discrepancy, DiscrepancyKind, MatchCandidate, OutcomeKind};

pub const NO_MATCH: &str = "No matching rate card entries found";
pub const TOO_MANY_DETAILS: &str = "Please recheck the shipment details. Too many shipment details to update.";
pub const TOO_MANY_LANES: &str =
    "Please recheck the shipment details. Too many possible rate lanes can be applied with changes.";

const MAX_LISTED_TARGETS: usize = 5;
const CONDITION_PREVIEW_CHARS: usize = 50;

// ---------------------------------------------------------------------------
// Terminal outcomes
// ---------------------------------------------------------------------------

pub fn no_match() -> Diagnosis {
    Diagnosis::single(OutcomeKind::NoMatch, NO_MATCH)
}

pub fn geo_rejected(line: String) -> Diagnosis {
    Diagnosis::single(OutcomeKind::GeoRejected, line)
}

/// Ship date outside every candidate's validity window.
pub fn out_of_validity(discrepancy: &Discrepancy) -> Diagnosis {
    Diagnosis::single(OutcomeKind::OutOfValidity, format_discrepancy(discrepancy))
}

// ---------------------------------------------------------------------------
// Candidate set
// ---------------------------------------------------------------------------

/// Aggregation policy over the surviving candidates of one shipment.
/// `tied_lanes` is the number of lanes that tied at scoring, before any were
/// dropped by the validity filter.
pub fn diagnose(candidates: &[MatchCandidate<'_>], tied_lanes: usize, thresholds: &Thresholds) -> Diagnosis {
    if candidates
        .iter()
        .any(|c| c.discrepancies.len() > thresholds.max_discrepancies)
    {
        return Diagnosis::single(OutcomeKind::TooManyDiscrepancies, TOO_MANY_DETAILS);
    }

    if tied_lanes > thresholds.max_tied_lanes {
        let tallies = tally_by_column(candidates.iter().flat_map(|c| c.discrepancies.iter()));
        if tallies.is_empty() {
            // several equally valid lanes is not an error
            return Diagnosis::new(OutcomeKind::Ambiguous, Vec::new());
        }
        return Diagnosis::new(OutcomeKind::PatternSummary, summarize_pattern(&tallies, thresholds));
    }

    let mut lines = Vec::new();
    for (i, candidate) in candidates.iter().enumerate() {
        if candidate.discrepancies.is_empty() {
            continue;
        }
        lines.push(format!("Discrepancies for Match {}:", i + 1));
        lines.extend(candidate.discrepancies.iter().map(format_discrepancy));
    }
    let kind = if lines.is_empty() {
        OutcomeKind::Clean
    } else {
        OutcomeKind::Discrepancies
    };
    Diagnosis::new(kind, lines)
}

/// Condense pooled per-column tallies, in order of preference:
/// one column explains everything; one column dominates and alone is named;
/// a few columns jointly cover enough; otherwise a generic recheck message.
pub fn summarize_pattern(tallies: &[ColumnTally], thresholds: &Thresholds) -> Vec<String> {
    let total: usize = tallies.iter().map(|t| t.count).sum();
    let Some(top) = tallies.first() else {
        return Vec::new();
    };

    if top.count == total {
        return vec![format!("Cause: {}", change_line(top))];
    }

    if covers(top.count, total, thresholds.dominant_share) {
        let pct = (top.count * 100 + total / 2) / total;
        return vec![format!("Dominant cause ({pct}% of differences): {}", change_line(top))];
    }

    let mut covered = 0;
    for (k, tally) in tallies.iter().take(thresholds.joint_max_columns).enumerate() {
        covered += tally.count;
        if covers(covered, total, thresholds.joint_share) {
            let joint = &tallies[..=k];
            let names: Vec<&str> = joint.iter().map(|t| t.column.as_str()).collect();
            let mut lines = vec![format!("Causes: {}", names.join(", "))];
            lines.extend(joint.iter().map(|t| format!(" {}", change_line(t))));
            return lines;
        }
    }

    vec![TOO_MANY_LANES.to_string()]
}

fn covers(count: usize, total: usize, share: f64) -> bool {
    total > 0 && count as f64 + 1e-9 >= share * total as f64
}

fn change_line(tally: &ColumnTally) -> String {
    if tally.targets.len() == 1 {
        format!(
            "{}: Shipment value '{}' needs to be changed to '{}'",
            tally.column, tally.shipment_value, tally.targets[0]
        )
    } else {
        format!(
            "{}: Shipment value '{}' needs to be changed to one of: {}",
            tally.column,
            tally.shipment_value,
            target_list(&tally.targets)
        )
    }
}

/// First five targets, then `(+k more)`.
fn target_list(targets: &[String]) -> String {
    let mut out = targets
        .iter()
        .take(MAX_LISTED_TARGETS)
        .map(|t| format!("'{t}'"))
        .collect::<Vec<_>>()
        .join(", ");
    if targets.len() > MAX_LISTED_TARGETS {
        out.push_str(&format!(" (+{} more)", targets.len() - MAX_LISTED_TARGETS));
    }
    out
}

pub fn format_discrepancy(d: &Discrepancy) -> String {
    let shipment = display_value(d.shipment_value.as_ref());
    match d.kind {
        DiscrepancyKind::DateRange => {
            format!("Date '{shipment}' is outside valid date range for all matching rate card entries")
        }
        DiscrepancyKind::ValueMismatch => {
            let mut line = format!(
                " {}: Shipment value '{shipment}' needs to be changed to '{}'",
                d.column,
                d.target()
            );
            if d.expected_code.is_none() {
                if let Some(rule) = &d.resolving_condition {
                    let preview: String = rule.chars().take(CONDITION_PREVIEW_CHARS).collect();
                    line.push_str(&format!(" (Condition: {preview}...)"));
                }
            }
            line
        }
    }
}
