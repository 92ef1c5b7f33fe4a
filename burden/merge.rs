//! Outer merge of per-measure results into the wide table of one year.

use crate::engine::{MeasureResult, ResultRow};
use crate::types::{Measure, StratumKey};
use std::collections::BTreeMap;

/// All measures computed for one year, keyed by stratum.
///
/// A stratum that one measure dropped (below the floor, unpaired, no benchmark) but
/// another kept is present with no entry for the dropped measure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct YearResults {
    pub year: u16,
    /// Measures in the order their columns are laid out.
    pub measures: Vec<Measure>,
    pub rows: BTreeMap<StratumKey, BTreeMap<Measure, ResultRow>>,
}

impl YearResults {
    pub fn new(year: u16) -> Self {
        Self {
            year,
            ..Self::default()
        }
    }

    pub fn get(&self, key: &StratumKey, measure: Measure) -> Option<&ResultRow> {
        self.rows.get(key).and_then(|row| row.get(&measure))
    }

    /// Avertable burden of `measure` for every stratum that has one.
    pub fn avertable(&self, measure: Measure) -> impl Iterator<Item = (&StratumKey, f64)> + '_ {
        self.rows
            .iter()
            .filter_map(move |(key, row)| row.get(&measure).map(|r| (key, r.avertable)))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Merges per-measure results on their stratum keys, preserving measure order.
///
/// When the same measure is given twice, the first result is kept.
pub fn merge_measures(year: u16, results: impl IntoIterator<Item = MeasureResult>) -> YearResults {
    let mut merged = YearResults::new(year);

    for result in results {
        if merged.measures.contains(&result.measure) {
            log::warn!(
                "{} was computed twice for {}; keeping the first result",
                result.measure,
                year
            );
            continue;
        }
        merged.measures.push(result.measure);
        for (key, row) in result.rows {
            merged.rows.entry(key).or_default().insert(result.measure, row);
        }
    }

    merged
}
