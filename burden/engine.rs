//! # Benchmark Adjustment Engine
//!
//! Turns the long table of one year into per-stratum avertable burden for one measure.
//!
//! Mortality is adjusted through a counterfactual case-fatality ratio: the benchmark
//! cohort's mean of `Deaths Rate / Prevalence Rate` is applied to each stratum's
//! prevalence to obtain the deaths it would have had at benchmark performance. Every
//! other measure is adjusted through a rate ratio: the benchmark mean rate over the
//! stratum's own rate, capped at one, scales the observed burden down.
//!
//! The two branches place the reliability floor differently. Deaths are filtered after
//! the counterfactual is computed, so the benchmark mean sees every benchmark stratum.
//! Other measures are filtered before the reference rate is computed. Both placements
//! are kept as they are.

use crate::benchmark::{self, BenchmarkSpec, GroupMeans};
use crate::pivot::{self, NumberRate};
use crate::types::{AdjustmentKind, LongTable, Measure, Metric, StratumKey};
use std::collections::BTreeMap;
use thiserror::Error;

/// Strata at or below this count are too noisy to adjust and are dropped.
pub const RELIABILITY_FLOOR: f64 = 10.0;

/// Fatal failures of a single (year, measure) computation.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(
        "The required column '{0}' was not found in the input table. Please check spelling and case."
    )]
    MissingColumn(String),
    #[error(
        "Stratum {key} appears more than once for measure '{measure}' and metric '{metric}'. Each stratum may be reported once per metric."
    )]
    DuplicateStratum {
        measure: Measure,
        metric: Metric,
        key: StratumKey,
    },
}

/// Observed, expected and avertable burden of one stratum for one measure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultRow {
    /// The observed count of the measure.
    pub observed: f64,
    /// The counterfactual case-fatality ratio (Deaths) or the capped adjustment ratio.
    pub factor: f64,
    /// Burden expected at benchmark performance.
    pub adjusted: f64,
    /// Observed minus expected burden.
    pub avertable: f64,
}

/// Counts of what each stage of the computation left out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeasureDiagnostics {
    /// Strata with both a Number and a Rate (for Deaths: both sub-measures paired).
    pub pivoted: usize,
    /// Keys reported with only one of Number and Rate.
    pub incomplete: usize,
    /// Deaths strata with no matching Prevalence stratum, or the reverse.
    pub unpaired: usize,
    /// Strata dropped by the reliability floor.
    pub below_floor: usize,
    /// Groups in which the benchmark contributed no usable stratum.
    pub groups_without_benchmark: usize,
    /// Strata dropped because their group had no benchmark statistic.
    pub strata_without_benchmark: usize,
    /// Benchmark terms skipped because they were not finite.
    pub undefined_terms: usize,
}

/// The outcome of [`process_measure`].
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureResult {
    pub measure: Measure,
    pub rows: BTreeMap<StratumKey, ResultRow>,
    pub diagnostics: MeasureDiagnostics,
}

impl MeasureResult {
    pub fn adjustment(&self) -> AdjustmentKind {
        self.measure.adjustment()
    }
}

/// Computes avertable burden for `measure` against the benchmark described by `spec`.
///
/// `Deaths` follows the counterfactual case-fatality branch and needs `Prevalence` rows in
/// the same table. Every other measure follows the rate-ratio branch.
pub fn process_measure(
    table: &LongTable,
    measure: Measure,
    spec: &BenchmarkSpec,
) -> Result<MeasureResult, EngineError> {
    let result = match measure.adjustment() {
        AdjustmentKind::Counterfactual => process_deaths(table, spec)?,
        AdjustmentKind::RateRatio => process_rate_ratio(table, measure, spec)?,
    };

    let diagnostics = &result.diagnostics;
    if diagnostics.undefined_terms > 0 {
        log::warn!(
            "{}: skipped {} benchmark terms that were not finite",
            measure,
            diagnostics.undefined_terms
        );
    }
    if diagnostics.groups_without_benchmark > 0 && result.rows.is_empty() {
        log::warn!(
            "{}: none of {} groups had benchmark data; no strata were adjusted",
            measure,
            diagnostics.groups_without_benchmark
        );
    } else if diagnostics.groups_without_benchmark > 0 {
        log::info!(
            "{}: {} groups had no benchmark data; {} strata excluded",
            measure,
            diagnostics.groups_without_benchmark,
            diagnostics.strata_without_benchmark
        );
    }
    log::info!(
        "{}: {} strata adjusted ({} below the reliability floor)",
        measure,
        result.rows.len(),
        diagnostics.below_floor
    );

    Ok(result)
}

/// A paired Deaths and Prevalence stratum.
struct MortalityStratum {
    deaths: NumberRate,
    prevalence: NumberRate,
}

impl MortalityStratum {
    fn case_fatality(&self) -> f64 {
        self.deaths.rate / self.prevalence.rate
    }
}

fn process_deaths(table: &LongTable, spec: &BenchmarkSpec) -> Result<MeasureResult, EngineError> {
    let membership = benchmark::resolve(spec, table)?;
    let deaths = pivot::pivot_measure(table, Measure::Deaths)?;
    let mut prevalence = pivot::pivot_measure(table, Measure::Prevalence)?;

    let mut diagnostics = MeasureDiagnostics {
        incomplete: deaths.incomplete + prevalence.incomplete,
        ..MeasureDiagnostics::default()
    };

    let mut paired: BTreeMap<StratumKey, MortalityStratum> = BTreeMap::new();
    for (key, deaths_pair) in deaths.strata {
        match prevalence.strata.remove(&key) {
            Some(prevalence_pair) => {
                paired.insert(
                    key,
                    MortalityStratum {
                        deaths: deaths_pair,
                        prevalence: prevalence_pair,
                    },
                );
            }
            None => diagnostics.unpaired += 1,
        }
    }
    diagnostics.unpaired += prevalence.strata.len();
    diagnostics.pivoted = paired.len();

    let groups = benchmark::group_strata(&paired, spec.grouping);
    let GroupMeans {
        means,
        groups_without_benchmark,
        undefined_terms,
    } = benchmark::benchmark_means(&paired, &groups, &membership, MortalityStratum::case_fatality);
    diagnostics.groups_without_benchmark = groups_without_benchmark;
    diagnostics.undefined_terms = undefined_terms;

    let mut rows = BTreeMap::new();
    for (group, keys) in &groups {
        let Some(&counterfactual) = means.get(group) else {
            diagnostics.strata_without_benchmark += keys.len();
            continue;
        };
        for key in keys {
            let Some(stratum) = paired.get(*key) else {
                continue;
            };
            let observed = stratum.deaths.number;
            let prevalence_count = stratum.prevalence.number;
            if observed.min(prevalence_count) <= RELIABILITY_FLOOR {
                diagnostics.below_floor += 1;
                continue;
            }
            let adjusted = prevalence_count * counterfactual;
            rows.insert(
                (*key).clone(),
                ResultRow {
                    observed,
                    factor: counterfactual,
                    adjusted,
                    avertable: (observed - adjusted).max(0.0),
                },
            );
        }
    }

    Ok(MeasureResult {
        measure: Measure::Deaths,
        rows,
        diagnostics,
    })
}

fn process_rate_ratio(
    table: &LongTable,
    measure: Measure,
    spec: &BenchmarkSpec,
) -> Result<MeasureResult, EngineError> {
    let membership = benchmark::resolve(spec, table)?;
    let pivoted = pivot::pivot_measure(table, measure)?;

    let mut diagnostics = MeasureDiagnostics {
        pivoted: pivoted.strata.len(),
        incomplete: pivoted.incomplete,
        ..MeasureDiagnostics::default()
    };

    let mut reliable = BTreeMap::new();
    for (key, pair) in pivoted.strata {
        if pair.number > RELIABILITY_FLOOR {
            reliable.insert(key, pair);
        } else {
            diagnostics.below_floor += 1;
        }
    }

    let groups = benchmark::group_strata(&reliable, spec.grouping);
    let GroupMeans {
        means,
        groups_without_benchmark,
        undefined_terms,
    } = benchmark::benchmark_means(&reliable, &groups, &membership, |pair| pair.rate);
    diagnostics.groups_without_benchmark = groups_without_benchmark;
    diagnostics.undefined_terms = undefined_terms;

    let mut rows = BTreeMap::new();
    for (group, keys) in &groups {
        let Some(&reference_rate) = means.get(group) else {
            diagnostics.strata_without_benchmark += keys.len();
            continue;
        };
        for key in keys {
            let Some(pair) = reliable.get(*key) else {
                continue;
            };
            // f64::min resolves a NaN quotient (0 / 0) to the cap.
            let ratio = (reference_rate / pair.rate).min(1.0);
            let adjusted = pair.number * ratio;
            rows.insert(
                (*key).clone(),
                ResultRow {
                    observed: pair.number,
                    factor: ratio,
                    adjusted,
                    avertable: pair.number - adjusted,
                },
            );
        }
    }

    Ok(MeasureResult {
        measure,
        rows,
        diagnostics,
    })
}
