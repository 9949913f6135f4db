use std::collections::BTreeMap;

use crate::model::{display_value, Discrepancy};

/// Pooled discrepancies for one column across every tied candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnTally {
    pub column: String,
    pub count: usize,
    /// The shipment's value in this column (identical across candidates).
    pub shipment_value: String,
    /// Distinct target values, first-seen order.
    pub targets: Vec<String>,
    first_seen: usize,
}

/// Group discrepancies by column. Sorted by count descending; ties keep the
/// order in which columns first appeared.
pub fn tally_by_column<'a>(discrepancies: impl IntoIterator<Item = &'a Discrepancy>) -> Vec<ColumnTally> {
    let mut groups: BTreeMap<String, ColumnTally> = BTreeMap::new();

    for (i, d) in discrepancies.into_iter().enumerate() {
        let entry = groups.entry(d.column.clone()).or_insert_with(|| ColumnTally {
            column: d.column.clone(),
            count: 0,
            shipment_value: display_value(d.shipment_value.as_ref()),
            targets: Vec::new(),
            first_seen: i,
        });
        entry.count += 1;
        let target = d.target();
        if !entry.targets.contains(&target) {
            entry.targets.push(target);
        }
    }

    let mut tallies: Vec<ColumnTally> = groups.into_values().collect();
    tallies.sort_by(|a, b| b.count.cmp(&a.count).then(a.first_seen.cmp(&b.first_seen)));
    tallies
}
