use std::collections::HashSet;
use std::io::Read;

use rayon::prelude::*;

use crate::classify::{diagnose, geo_rejected, no_match, out_of_validity};
use crate::condition::ConditionBook;
use crate::config::ReconConfig;
use crate::discrepancy::{compute_discrepancies, DiscrepancyRules};
use crate::error::ReconError;
use crate::evidence::compute_summary;
use crate::geo::{GeoRuleBook, KnownGeography};
use crate::matcher::{ColumnPlan, LaneIndex};
use crate::model::{
    display_value, Cell, Diagnosis, Discrepancy, MatchCandidate, RateLane, ReconInput, ReconMeta,
    ReconResult, Record, ShipmentOutcome, ShipmentRecord, Table,
};
use crate::normalize::{normalize, normalize_column};
use crate::ratecard::META_COLUMNS;
use crate::validity::{filter_by_validity, parse_date, ValidityOutcome};

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// Run one batch: every shipment against every lane. Output rows follow
/// shipment row order whether or not the parallel map is used.
pub fn run(config: &ReconConfig, input: &ReconInput) -> Result<ReconResult, ReconError> {
    let batch_span = tracing::info_span!(
        "recon_batch",
        config = %config.name,
        shipments = input.shipments.len(),
        lanes = input.rates.len(),
    );
    let _guard = batch_span.enter();

    let ctx = BatchContext::build(config, input)?;
    let (shipments, skipped_rows) = shipment_records(config, &input.shipments)?;
    tracing::info!(
        shared_columns = ctx.plan.columns.len(),
        evaluated = shipments.len(),
        skipped = skipped_rows,
        parallel = config.engine.parallel,
        "batch started"
    );

    let evaluate = |shipment: &ShipmentRecord| {
        let span = tracing::debug_span!(parent: &batch_span, "shipment", row = shipment.row);
        span.in_scope(|| evaluate_shipment(&ctx, shipment))
    };
    let outcomes: Vec<ShipmentOutcome> = if config.engine.parallel {
        shipments.par_iter().map(evaluate).collect()
    } else {
        shipments.iter().map(evaluate).collect()
    };

    let summary = compute_summary(&outcomes, skipped_rows);
    tracing::info!(
        total = summary.total_shipments,
        clean = summary.clean,
        discrepancies = summary.with_discrepancies,
        geo_rejected = summary.geo_rejected,
        no_match = summary.no_match,
        out_of_validity = summary.out_of_validity,
        too_many = summary.too_many_discrepancies,
        pattern_summary = summary.pattern_summary,
        ambiguous = summary.ambiguous,
        "batch finished"
    );

    Ok(ReconResult {
        meta: ReconMeta {
            config_name: config.name.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
            lane_count: ctx.lanes.len(),
            shared_columns: ctx.plan.names(),
            passthrough_column: ctx.passthrough_column.clone(),
        },
        summary,
        shipments: outcomes,
    })
}

/// Read-only state shared by every shipment of a batch.
struct BatchContext<'a> {
    config: &'a ReconConfig,
    plan: ColumnPlan,
    lanes: LaneIndex,
    known: Option<KnownGeography>,
    conditions: &'a ConditionBook,
    geo_rules: GeoRuleBook,
    passthrough_column: Option<String>,
}

impl<'a> BatchContext<'a> {
    fn build(config: &'a ReconConfig, input: &'a ReconInput) -> Result<Self, ReconError> {
        let rates = &input.rates;
        if rates.is_empty() {
            return Err(ReconError::EmptyRateTable);
        }

        let cols = &config.columns;
        let lane_id_column = rates.find_column(&cols.lane_id).map(str::to_string);
        let valid_from = window_column(rates, cols.valid_from.as_deref(), "from");
        let valid_to = window_column(rates, cols.valid_to.as_deref(), "to");
        let passthrough_column = cols
            .passthrough
            .as_deref()
            .and_then(|name| rates.find_column(name))
            .map(str::to_string);
        if valid_from.is_none() || valid_to.is_none() {
            tracing::info!("rate table has no validity window columns, date filter disabled");
        }

        let mut excluded: HashSet<String> = META_COLUMNS.iter().map(|c| normalize_column(c)).collect();
        excluded.insert(normalize_column(&cols.lane_id));
        for column in [&valid_from, &valid_to, &passthrough_column].into_iter().flatten() {
            excluded.insert(normalize_column(column));
        }
        let plan = ColumnPlan::build(&input.shipments, rates, &excluded)?;

        let column_value = |row: &Record, column: &Option<String>| -> Option<Cell> {
            column.as_deref().and_then(|c| row.get(c)).cloned()
        };
        let lanes: Vec<RateLane> = rates
            .rows
            .iter()
            .enumerate()
            .map(|(index, row)| RateLane {
                index,
                lane_id: column_value(row, &lane_id_column).map(|v| v.to_string()),
                valid_from: column_value(row, &valid_from),
                valid_to: column_value(row, &valid_to),
                passthrough: column_value(row, &passthrough_column),
                attributes: row.clone(),
            })
            .collect();
        let lanes = LaneIndex::new(lanes, &plan);

        let mut geo_rules = input.geo_rules.clone();
        if !geo_rules.is_empty() && !geo_rules.has_rule_columns() {
            geo_rules.index_rate_columns(rates);
        }

        let geo = &config.geo;
        let shipment_has_countries = [&geo.origin_country, &geo.destination_country]
            .into_iter()
            .all(|c| input.shipments.position_normalized(&normalize_column(c)).is_some());
        let known = if shipment_has_countries {
            let known = KnownGeography::from_rates(rates, geo);
            if known.is_none() {
                tracing::info!("rate table has no country data, geography precheck disabled");
            }
            known
        } else {
            tracing::info!("shipment table has no country columns, geography precheck disabled");
            None
        };

        Ok(Self {
            config,
            plan,
            lanes,
            known,
            conditions: &input.conditions,
            geo_rules,
            passthrough_column,
        })
    }

    fn discrepancy_rules(&self) -> DiscrepancyRules<'_> {
        DiscrepancyRules {
            plan: &self.plan,
            conditions: self.conditions,
            geo_rules: &self.geo_rules,
            geo: &self.config.geo,
        }
    }
}

/// The configured validity column, or the first rate column whose name
/// mentions `valid` and `bound`.
fn window_column(rates: &Table, configured: Option<&str>, bound: &str) -> Option<String> {
    if let Some(name) = configured {
        let found = rates.find_column(name).map(str::to_string);
        if found.is_none() {
            tracing::warn!(column = name, "configured validity column not in rate table");
        }
        return found;
    }
    rates
        .columns
        .iter()
        .find(|c| {
            let n = normalize_column(c);
            n.contains("valid") && n.contains(bound)
        })
        .cloned()
}

// ---------------------------------------------------------------------------
// Shipments
// ---------------------------------------------------------------------------

/// Resolve identity fields for every shipment row that passes the row
/// filter. Returns the records and the number of rows skipped.
fn shipment_records(config: &ReconConfig, table: &Table) -> Result<(Vec<ShipmentRecord>, usize), ReconError> {
    let required = match &config.shipments.require_column {
        Some(name) => Some(table.find_column(name).map(str::to_string).ok_or_else(|| {
            ReconError::MissingColumn {
                table: "shipment".into(),
                column: name.clone(),
            }
        })?),
        None => None,
    };

    let cols = &config.columns;
    let text = |row: &Record, name: &str| {
        row.get_normalized(&normalize_column(name)).map(|v| v.to_string())
    };

    let mut records = Vec::with_capacity(table.len());
    let mut skipped = 0;
    for (i, row) in table.rows.iter().enumerate() {
        if let Some(column) = &required {
            if normalize(row.get(column)).is_none() {
                skipped += 1;
                continue;
            }
        }
        let ship_date = cols.ship_date.iter().find_map(|name| {
            let column = table.find_column(name)?;
            row.get(column).map(|v| (column.to_string(), v.clone()))
        });
        let (ship_date_column, ship_date) = match ship_date {
            Some((column, value)) => (Some(column), Some(value)),
            None => (None, None),
        };
        records.push(ShipmentRecord {
            row: i,
            shipment_id: text(row, &cols.shipment_id),
            carrier: text(row, &cols.carrier),
            lc_id: text(row, &cols.lc_id),
            etof_id: text(row, &cols.etof_id),
            ship_date_column,
            ship_date,
            attributes: row.clone(),
        });
    }
    if skipped > 0 {
        tracing::debug!(skipped, "shipment rows without required value skipped");
    }
    Ok((records, skipped))
}

/// The full per-shipment pipeline: precheck, scoring, validity filter,
/// discrepancies, diagnosis.
fn evaluate_shipment(ctx: &BatchContext<'_>, shipment: &ShipmentRecord) -> ShipmentOutcome {
    let mut warnings = Vec::new();
    if let Some(value) = &shipment.ship_date {
        if parse_date(Some(value)).is_none() {
            warnings.push(format!("ship date '{value}' could not be parsed, validity not checked"));
        }
    }

    if let Some(known) = &ctx.known {
        if let Some(line) = known.precheck(&shipment.attributes, &ctx.config.geo) {
            return outcome(shipment, geo_rejected(line), &[], warnings);
        }
    }

    let candidates = ctx.lanes.match_shipment(shipment, &ctx.plan);
    if candidates.is_empty() {
        return outcome(shipment, no_match(), &[], warnings);
    }

    let tied_lanes = candidates.len();
    let mut candidates = match filter_by_validity(shipment.ship_date.as_ref(), candidates) {
        ValidityOutcome::Valid(kept) => kept,
        ValidityOutcome::AllExpired => {
            let column = shipment.ship_date_column.clone().unwrap_or_default();
            let line = Discrepancy::date_range(column, shipment.ship_date.clone());
            return outcome(shipment, out_of_validity(&line), &[], warnings);
        }
    };

    let rules = ctx.discrepancy_rules();
    for candidate in &mut candidates {
        candidate.discrepancies = compute_discrepancies(rules, shipment, candidate.lane);
    }
    let diagnosis = diagnose(&candidates, tied_lanes, &ctx.config.thresholds);
    outcome(shipment, diagnosis, &candidates, warnings)
}

fn outcome(
    shipment: &ShipmentRecord,
    diagnosis: Diagnosis,
    candidates: &[MatchCandidate<'_>],
    warnings: Vec<String>,
) -> ShipmentOutcome {
    let comment = diagnosis.comment();
    tracing::debug!(
        row = shipment.row,
        kind = %diagnosis.kind,
        candidates = candidates.len(),
        "shipment evaluated"
    );
    ShipmentOutcome {
        row: shipment.row,
        shipment_id: shipment.shipment_id.clone(),
        carrier: shipment.carrier.clone(),
        lc_id: shipment.lc_id.clone(),
        etof_id: shipment.etof_id.clone(),
        kind: diagnosis.kind,
        comment,
        passthrough: candidates
            .first()
            .and_then(|c| c.lane.passthrough.as_ref())
            .map(|v| display_value(Some(v))),
        candidate_count: candidates.len(),
        lane_ids: candidates.iter().map(|c| c.lane.label()).collect(),
        warnings,
    }
}

// ---------------------------------------------------------------------------
// CSV loading
// ---------------------------------------------------------------------------

/// Load a CSV document into a table. Headers are trimmed, blank fields are
/// absent, short rows are padded.
pub fn load_csv_table(csv_data: &str) -> Result<Table, ReconError> {
    load_csv_reader(csv_data.as_bytes())
}

pub fn load_csv_reader<R: Read>(reader: R) -> Result<Table, ReconError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let mut table = Table::new(headers);
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        table.push_row(record.iter().map(Cell::from_field).collect());
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{NO_MATCH, TOO_MANY_LANES};
    use crate::model::{OutcomeKind, NO_DISCREPANCIES};

    const RATES: &str = "\
Lane #,Origin Country,Destination Country,Mode,Valid from,Valid to,Carrier agreement
1,US,DE,FTL,01.01.2025,31.12.2025,AGR-1
2,US,NL,FTL,01.01.2025,31.12.2025,AGR-1
3,CA,DE,FTL,01.01.2024,31.12.2024,AGR-2
";

    const SHIPMENTS: &str = "\
Shipment ID,ETOF #,Origin Country,Destination Country,Mode,SHIP_DATE
S1,E1,US,DE,FTL,20250615
S2,E2,US,DE,LTL,20250615
S3,,US,DE,FTL,20250615
S4,E4,CA,DE,FTL,20250615
S5,E5,FR,JP,FTL,20250615
";

    fn input(shipments: &str, rates: &str) -> ReconInput {
        ReconInput {
            shipments: load_csv_table(shipments).unwrap(),
            rates: load_csv_table(rates).unwrap(),
            conditions: ConditionBook::new(),
            geo_rules: GeoRuleBook::new(),
        }
    }

    fn sequential() -> ReconConfig {
        let mut config = ReconConfig::default();
        config.engine.parallel = false;
        config
    }

    #[test]
    fn load_csv_basic() {
        let table = load_csv_table(" Lane # ,Mode\n1,FTL\n\n2\n").unwrap();
        assert_eq!(table.columns, vec!["Lane #", "Mode"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[1].get("Lane #"), Some(&Cell::text("2")));
        assert_eq!(table.rows[1].get("Mode"), None);
    }

    #[test]
    fn load_csv_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(RATES.as_bytes()).unwrap();
        let table = load_csv_reader(std::fs::File::open(file.path()).unwrap()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.find_column("valid_from"), Some("Valid from"));
    }

    #[test]
    fn end_to_end_outcomes() {
        let result = run(&sequential(), &input(SHIPMENTS, RATES)).unwrap();
        assert_eq!(result.shipments.len(), 5);
        assert_eq!(result.meta.lane_count, 3);
        assert_eq!(result.meta.shared_columns, vec!["Origin Country", "Destination Country", "Mode"]);
        assert_eq!(result.meta.passthrough_column.as_deref(), Some("Carrier agreement"));

        let s1 = &result.shipments[0];
        assert_eq!(s1.kind, OutcomeKind::Clean);
        assert_eq!(s1.comment, NO_DISCREPANCIES);
        assert_eq!(s1.passthrough.as_deref(), Some("AGR-1"));
        assert_eq!(s1.lane_ids, vec!["1"]);

        let s2 = &result.shipments[1];
        assert_eq!(s2.kind, OutcomeKind::Discrepancies);
        assert_eq!(
            s2.comment,
            "Discrepancies for Match 1:\n Mode: Shipment value 'LTL' needs to be changed to 'FTL'"
        );

        // lane 3 is the only CA -> DE lane and expired in 2024
        let s4 = &result.shipments[3];
        assert_eq!(s4.kind, OutcomeKind::OutOfValidity);
        assert_eq!(
            s4.comment,
            "Date '20250615' is outside valid date range for all matching rate card entries"
        );

        let s5 = &result.shipments[4];
        assert_eq!(s5.kind, OutcomeKind::GeoRejected);
        assert_eq!(s5.comment, "origin-destination are missing");

        assert_eq!(result.summary.total_shipments, 5);
        assert_eq!(result.summary.clean, 2);
    }

    #[test]
    fn require_column_skips_rows() {
        let mut config = sequential();
        config.shipments.require_column = Some("ETOF #".into());
        let result = run(&config, &input(SHIPMENTS, RATES)).unwrap();
        assert_eq!(result.shipments.len(), 4);
        assert_eq!(result.summary.skipped_rows, 1);
        assert!(result.shipments.iter().all(|s| s.row != 2));
    }

    #[test]
    fn missing_require_column_is_fatal() {
        let mut config = sequential();
        config.shipments.require_column = Some("LC #".into());
        let err = run(&config, &input(SHIPMENTS, RATES)).unwrap_err();
        assert!(matches!(err, ReconError::MissingColumn { ref column, .. } if column == "LC #"));
    }

    #[test]
    fn parallel_matches_sequential() {
        let data = input(SHIPMENTS, RATES);
        let a = run(&sequential(), &data).unwrap();
        let b = run(&ReconConfig::default(), &data).unwrap();
        let comments = |r: &ReconResult| r.shipments.iter().map(|s| (s.row, s.comment.clone())).collect::<Vec<_>>();
        assert_eq!(comments(&a), comments(&b));
    }

    #[test]
    fn empty_rate_table_is_fatal() {
        let err = run(&sequential(), &input(SHIPMENTS, "Lane #,Mode\n")).unwrap_err();
        assert!(matches!(err, ReconError::EmptyRateTable));
    }

    #[test]
    fn disjoint_tables_are_fatal() {
        let err = run(&sequential(), &input("Weight\n10\n", RATES)).unwrap_err();
        assert!(matches!(err, ReconError::NoSharedColumns));
    }

    #[test]
    fn no_match_without_country_columns() {
        let rates = "Lane #,Mode,Service\n1,FTL,STD\n";
        let result = run(&sequential(), &input("Mode,Service\nLTL,EXP\n", rates)).unwrap();
        assert_eq!(result.shipments[0].kind, OutcomeKind::NoMatch);
        assert_eq!(result.shipments[0].comment, NO_MATCH);
        assert!(result.shipments[0].passthrough.is_none());
    }

    #[test]
    fn five_tied_lanes_are_not_enumerated() {
        let rates = "\
Lane #,Mode,Service
1,FTL,A
2,FTL,B
3,FTL,C
4,FTL,D
5,FTL,E
";
        let result = run(&sequential(), &input("Mode,Service\nFTL,Z\n", rates)).unwrap();
        let s = &result.shipments[0];
        assert_eq!(s.candidate_count, 5);
        assert_eq!(s.kind, OutcomeKind::PatternSummary);
        assert!(!s.comment.contains("Match 5"));
        assert!(s.comment.starts_with("Cause:"), "{}", s.comment);
        assert_ne!(s.comment, TOO_MANY_LANES);
    }

    #[test]
    fn shipments_without_country_columns_skip_precheck() {
        let rates = "Lane #,Origin Country,Destination Country,Mode,Service\n1,US,DE,FTL,STD\n";
        let result = run(&sequential(), &input("Mode,Service\nFTL,STD\n", rates)).unwrap();
        let s = &result.shipments[0];
        assert_eq!(s.kind, OutcomeKind::Clean);
        assert_eq!(s.comment, NO_DISCREPANCIES);
        assert_eq!(s.lane_ids, vec!["1"]);
    }

    #[test]
    fn ties_are_counted_before_expired_lanes_drop() {
        let rates = "\
Lane #,Mode,Service,Valid from,Valid to
1,FTL,A,01.01.2025,31.12.2025
2,FTL,B,01.01.2025,31.12.2025
3,FTL,C,01.01.2025,31.12.2025
4,FTL,D,01.01.2024,31.12.2024
5,FTL,E,01.01.2024,31.12.2024
";
        let result = run(&sequential(), &input("Mode,Service,SHIP_DATE\nFTL,Z,20250615\n", rates)).unwrap();
        let s = &result.shipments[0];
        assert_eq!(s.candidate_count, 3);
        assert_eq!(s.kind, OutcomeKind::PatternSummary);
        assert!(!s.comment.contains("Discrepancies for Match"), "{}", s.comment);
        assert_eq!(
            s.comment,
            "Cause: Service: Shipment value 'Z' needs to be changed to one of: 'A', 'B', 'C'"
        );
    }

    #[test]
    fn unparseable_ship_date_warns_and_keeps_lanes() {
        let shipments = "Origin Country,Destination Country,Mode,SHIP_DATE\nUS,DE,FTL,2025-13-40\n";
        let result = run(&sequential(), &input(shipments, RATES)).unwrap();
        let s = &result.shipments[0];
        assert_eq!(s.kind, OutcomeKind::Clean);
        assert_eq!(s.warnings.len(), 1);
    }
}
