//! Long-to-wide reshaping of a single measure.
//!
//! Every stratum of a measure is reported twice in the long table, once as a count
//! (`Number`) and once as a population rate (`Rate`). Pivoting pairs those two rows
//! under their [`StratumKey`]. A key seen twice for the same metric is ambiguous and
//! aborts the computation; a key seen for only one of the two metrics cannot take part
//! in any adjustment and is left out.

use crate::engine::EngineError;
use crate::types::{LongTable, Measure, Metric, StratumKey};
use std::collections::BTreeMap;

/// The paired count and rate of one stratum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumberRate {
    pub number: f64,
    pub rate: f64,
}

/// Wide strata of one measure, plus how many keys lacked one of the two metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PivotedMeasure {
    pub strata: BTreeMap<StratumKey, NumberRate>,
    pub incomplete: usize,
}

#[derive(Default)]
struct PartialStratum {
    number: Option<f64>,
    rate: Option<f64>,
}

/// Pivots the rows of `measure` into one `{Number, Rate}` pair per stratum.
///
/// Rows with any other metric (such as `Percent`) are ignored.
pub fn pivot_measure(table: &LongTable, measure: Measure) -> Result<PivotedMeasure, EngineError> {
    let mut partial: BTreeMap<StratumKey, PartialStratum> = BTreeMap::new();

    for record in table.records().iter().filter(|r| r.is_measure(measure)) {
        let is_number = match record.metric {
            Metric::Number => true,
            Metric::Rate => false,
            Metric::Percent => continue,
        };
        let slot = partial.entry(table.stratum_key(record)).or_default();
        let target = if is_number {
            &mut slot.number
        } else {
            &mut slot.rate
        };
        if target.is_some() {
            return Err(EngineError::DuplicateStratum {
                measure,
                metric: record.metric,
                key: table.stratum_key(record),
            });
        }
        *target = Some(record.value);
    }

    let mut pivoted = PivotedMeasure::default();
    for (key, slot) in partial {
        match (slot.number, slot.rate) {
            (Some(number), Some(rate)) => {
                pivoted.strata.insert(key, NumberRate { number, rate });
            }
            _ => pivoted.incomplete += 1,
        }
    }

    log::debug!(
        "Pivoted {} strata for '{}' ({} without both Number and Rate)",
        pivoted.strata.len(),
        measure,
        pivoted.incomplete
    );

    Ok(pivoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LongRecord, Sex};

    fn record(measure: &str, location: &str, metric: Metric, value: f64) -> LongRecord {
        LongRecord {
            measure: measure.to_string(),
            location: location.to_string(),
            sex: Sex::Female,
            age: "55+ years".to_string(),
            cause: "Stroke".to_string(),
            metric,
            value,
        }
    }

    #[test]
    fn pairs_number_and_rate_per_stratum() {
        let table = LongTable::new(vec![
            record("Deaths", "Chile", Metric::Number, 120.0),
            record("Deaths", "Chile", Metric::Rate, 0.04),
            record("Deaths", "Chile", Metric::Percent, 0.3),
            record("Prevalence", "Chile", Metric::Number, 900.0),
        ]);

        let pivoted = pivot_measure(&table, Measure::Deaths).unwrap();
        assert_eq!(pivoted.strata.len(), 1);
        assert_eq!(pivoted.incomplete, 0);
        let pair = pivoted.strata.values().next().unwrap();
        assert_eq!(pair.number, 120.0);
        assert_eq!(pair.rate, 0.04);
    }

    #[test]
    fn strata_missing_a_metric_are_counted_and_left_out() {
        let table = LongTable::new(vec![
            record("Deaths", "Chile", Metric::Number, 120.0),
            record("Deaths", "Peru", Metric::Number, 80.0),
            record("Deaths", "Peru", Metric::Rate, 0.02),
        ]);

        let pivoted = pivot_measure(&table, Measure::Deaths).unwrap();
        assert_eq!(pivoted.strata.len(), 1);
        assert_eq!(pivoted.incomplete, 1);
        assert_eq!(pivoted.strata.keys().next().unwrap().location, "Peru");
    }

    #[test]
    fn duplicate_metric_for_a_stratum_is_rejected() {
        let table = LongTable::new(vec![
            record("Deaths", "Chile", Metric::Rate, 0.04),
            record("Deaths", "Chile", Metric::Rate, 0.05),
        ]);

        match pivot_measure(&table, Measure::Deaths) {
            Err(EngineError::DuplicateStratum {
                measure,
                metric,
                key,
            }) => {
                assert_eq!(measure, Measure::Deaths);
                assert_eq!(metric, Metric::Rate);
                assert_eq!(key.location, "Chile");
            }
            other => panic!("Expected DuplicateStratum, got {other:?}"),
        }
    }

    #[test]
    fn short_measure_labels_select_the_same_rows() {
        let table = LongTable::new(vec![
            record("DALYs", "Chile", Metric::Number, 500.0),
            record("DALYs (Disability-Adjusted Life Years)", "Peru", Metric::Number, 400.0),
            record("DALYs", "Chile", Metric::Rate, 50.0),
            record("DALYs (Disability-Adjusted Life Years)", "Peru", Metric::Rate, 40.0),
        ]);

        let pivoted = pivot_measure(&table, Measure::Dalys).unwrap();
        assert_eq!(pivoted.strata.len(), 2);
    }
}
