//! The augmented shipment table: evaluated rows with their comment.

use std::io::Write;

use crate::config::ReconConfig;
use crate::error::ReconError;
use crate::model::{ReconResult, Table};
use crate::normalize::normalize_column;

pub const COMMENT_COLUMN: &str = "comment";

/// Output header: identity columns first, then the remaining shipment
/// columns in input order, then the passthrough column, then `comment`.
pub fn output_columns(shipments: &Table, result: &ReconResult, config: &ReconConfig) -> Vec<String> {
    let c = &config.columns;
    let ship_date = c
        .ship_date
        .iter()
        .find_map(|name| shipments.find_column(name));

    let mut priority: Vec<&str> = [&c.lc_id, &c.etof_id, &c.shipment_id, &c.delivery_number, &c.carrier]
        .into_iter()
        .filter_map(|name| shipments.find_column(name))
        .collect();
    priority.extend(ship_date);

    let mut columns: Vec<String> = Vec::new();
    for name in priority {
        push_unique(name, &mut columns);
    }
    let passthrough = result.meta.passthrough_column.as_deref();
    let tail = [passthrough, Some(COMMENT_COLUMN)];
    for name in &shipments.columns {
        let normalized = normalize_column(name);
        if tail.iter().flatten().any(|t| normalize_column(t) == normalized) {
            continue;
        }
        push_unique(name, &mut columns);
    }
    for name in tail.into_iter().flatten() {
        push_unique(name, &mut columns);
    }
    columns
}

fn push_unique(name: &str, columns: &mut Vec<String>) {
    let normalized = normalize_column(name);
    if !columns.iter().any(|c| normalize_column(c) == normalized) {
        columns.push(name.to_string());
    }
}

/// Write one CSV row per evaluated shipment, in row order.
pub fn write_csv<W: Write>(
    shipments: &Table,
    result: &ReconResult,
    config: &ReconConfig,
    writer: W,
) -> Result<(), ReconError> {
    let columns = output_columns(shipments, result, config);
    let passthrough = result.meta.passthrough_column.as_deref().map(normalize_column);
    let comment = normalize_column(COMMENT_COLUMN);

    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(&columns)?;

    for outcome in &result.shipments {
        let Some(row) = shipments.rows.get(outcome.row) else {
            tracing::warn!(row = outcome.row, "outcome row not present in shipment table");
            continue;
        };
        let record: Vec<String> = columns
            .iter()
            .map(|name| {
                let normalized = normalize_column(name);
                if normalized == comment {
                    outcome.comment.clone()
                } else if passthrough.as_deref() == Some(normalized.as_str()) {
                    outcome.passthrough.clone().unwrap_or_default()
                } else {
                    row.get(name).map(|v| v.to_string()).unwrap_or_default()
                }
            })
            .collect();
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OutcomeKind, ReconMeta, ReconSummary, ShipmentOutcome};

    fn shipments() -> Table {
        let mut t = Table::new(["Origin Country", "Carrier", "SHIP_DATE", "Shipment ID", "Mode", "ETOF #"]);
        t.push_text_row(&["US", "ACME", "20250615", "S1", "FTL", "E1"]);
        t.push_text_row(&["CA", "ACME", "20250616", "S2", "LTL", ""]);
        t.push_text_row(&["MX", "ACME", "20250617", "S3", "FTL", "E3"]);
        t
    }

    fn outcome(row: usize, comment: &str, passthrough: Option<&str>) -> ShipmentOutcome {
        ShipmentOutcome {
            row,
            shipment_id: None,
            carrier: None,
            lc_id: None,
            etof_id: None,
            kind: OutcomeKind::Clean,
            comment: comment.into(),
            passthrough: passthrough.map(str::to_string),
            candidate_count: 1,
            lane_ids: vec!["1".into()],
            warnings: Vec::new(),
        }
    }

    fn result(passthrough_column: Option<&str>, shipments: Vec<ShipmentOutcome>) -> ReconResult {
        ReconResult {
            meta: ReconMeta {
                config_name: "test".into(),
                engine_version: "0".into(),
                run_at: "2025-01-01T00:00:00Z".into(),
                lane_count: 1,
                shared_columns: vec!["Origin Country".into()],
                passthrough_column: passthrough_column.map(str::to_string),
            },
            summary: ReconSummary::default(),
            shipments,
        }
    }

    #[test]
    fn column_order() {
        let r = result(Some("Carrier agreement"), Vec::new());
        let cols = output_columns(&shipments(), &r, &ReconConfig::default());
        assert_eq!(
            cols,
            vec![
                "ETOF #",
                "Shipment ID",
                "Carrier",
                "SHIP_DATE",
                "Origin Country",
                "Mode",
                "Carrier agreement",
                "comment"
            ]
        );
    }

    #[test]
    fn writes_only_evaluated_rows() {
        let r = result(
            Some("Carrier agreement"),
            vec![
                outcome(0, "No discrepancies found", Some("AGR-1")),
                outcome(2, "Discrepancies for Match 1:\n Mode: Shipment value 'FTL' needs to be changed to 'LTL'", None),
            ],
        );
        let mut buf = Vec::new();
        write_csv(&shipments(), &r, &ReconConfig::default(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "S1");
        assert_eq!(&rows[0][6], "AGR-1");
        assert_eq!(&rows[0][7], "No discrepancies found");
        assert_eq!(&rows[1][1], "S3");
        assert_eq!(&rows[1][6], "");
        assert!(rows[1][7].contains("needs to be changed to 'LTL'"));
    }

    #[test]
    fn no_passthrough_column() {
        let r = result(None, vec![outcome(1, "No matching rate card entries found", None)]);
        let cols = output_columns(&shipments(), &r, &ReconConfig::default());
        assert_eq!(cols.last().map(String::as_str), Some("comment"));
        assert!(!cols.iter().any(|c| c == "Carrier agreement"));
    }
}
