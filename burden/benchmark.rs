// ========================================================================================
//
//                               Benchmark cohort and reference statistics
//
// ========================================================================================

use crate::engine::EngineError;
use crate::types::{AttributeColumn, GroupKey, Grouping, LongTable, StratumKey};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Default life expectancy a location must exceed to join the benchmark cohort.
pub const DEFAULT_LIFE_EXPECTANCY_THRESHOLD: f64 = 80.0;

/// The set of locations whose rates serve as the reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Cohort {
    /// An explicit list of locations, e.g. those above a life-expectancy threshold.
    Locations(BTreeSet<String>),
    /// Locations flagged in the table's `regional_benchmark` column.
    RegionalFlag,
    /// Locations flagged in the table's `global_benchmark` column.
    GlobalFlag,
}

impl Cohort {
    fn required_column(&self) -> Option<AttributeColumn> {
        match self {
            Self::Locations(_) => None,
            Self::RegionalFlag => Some(AttributeColumn::RegionalBenchmark),
            Self::GlobalFlag => Some(AttributeColumn::GlobalBenchmark),
        }
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locations(names) => write!(f, "{} listed locations", names.len()),
            Self::RegionalFlag => f.write_str("regional_benchmark flag"),
            Self::GlobalFlag => f.write_str("global_benchmark flag"),
        }
    }
}

/// Which locations form the benchmark, and how strata are pooled to compute its statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkSpec {
    pub cohort: Cohort,
    pub grouping: Grouping,
}

impl BenchmarkSpec {
    pub fn new(cohort: Cohort, grouping: Grouping) -> Self {
        Self { cohort, grouping }
    }

    /// A globally pooled benchmark over an explicit list of locations.
    pub fn locations<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            Cohort::Locations(names.into_iter().map(Into::into).collect()),
            Grouping::Global,
        )
    }
}

/// Benchmark membership resolved against a concrete table.
pub(crate) struct Membership<'a> {
    table: &'a LongTable,
    cohort: &'a Cohort,
}

impl Membership<'_> {
    pub(crate) fn contains(&self, location: &str) -> bool {
        match self.cohort {
            Cohort::Locations(names) => names.contains(location),
            Cohort::RegionalFlag => self
                .table
                .attributes()
                .get(location)
                .is_some_and(|attribute| attribute.regional_benchmark),
            Cohort::GlobalFlag => self
                .table
                .attributes()
                .get(location)
                .is_some_and(|attribute| attribute.global_benchmark),
        }
    }
}

/// Checks that `table` carries the columns `spec` relies on. A cohort with no member in the
/// table is only logged; every group then goes without a benchmark statistic.
pub(crate) fn resolve<'a>(
    spec: &'a BenchmarkSpec,
    table: &'a LongTable,
) -> Result<Membership<'a>, EngineError> {
    if let Some(column) = spec.cohort.required_column() {
        if !table.attributes().has_column(column) {
            return Err(EngineError::MissingColumn(column.name().to_string()));
        }
    }
    if spec.grouping == Grouping::Regional
        && !table.attributes().has_column(AttributeColumn::Region)
    {
        return Err(EngineError::MissingColumn(
            AttributeColumn::Region.name().to_string(),
        ));
    }

    let membership = Membership {
        table,
        cohort: &spec.cohort,
    };
    if !table
        .locations()
        .into_iter()
        .any(|location| membership.contains(location))
    {
        log::warn!(
            "No location in the table belongs to the benchmark cohort ({}); every group will be left without a benchmark",
            spec.cohort
        );
    }
    Ok(membership)
}

/// Buckets stratum keys by the group their benchmark statistic is pooled over.
pub fn group_strata<T>(
    strata: &BTreeMap<StratumKey, T>,
    grouping: Grouping,
) -> BTreeMap<GroupKey, Vec<&StratumKey>> {
    let mut groups: BTreeMap<GroupKey, Vec<&StratumKey>> = BTreeMap::new();
    for key in strata.keys() {
        groups.entry(key.group_key(grouping)).or_default().push(key);
    }
    groups
}

/// Per-group benchmark means together with what had to be left out.
#[derive(Debug, Default)]
pub(crate) struct GroupMeans {
    pub means: BTreeMap<GroupKey, f64>,
    pub groups_without_benchmark: usize,
    pub undefined_terms: usize,
}

/// Averages `term` over the benchmark members of every group.
///
/// Non-finite terms are skipped rather than poisoning the mean. A group whose members
/// contribute no finite term has no mean at all. Summation follows key order, so the
/// result does not depend on how the caller schedules work.
pub(crate) fn benchmark_means<T, F>(
    strata: &BTreeMap<StratumKey, T>,
    groups: &BTreeMap<GroupKey, Vec<&StratumKey>>,
    membership: &Membership<'_>,
    term: F,
) -> GroupMeans
where
    F: Fn(&T) -> f64,
{
    let mut result = GroupMeans::default();

    for (group, keys) in groups {
        let mut sum = 0.0;
        let mut count = 0usize;
        for key in keys {
            if !membership.contains(&key.location) {
                continue;
            }
            let Some(stratum) = strata.get(*key) else {
                continue;
            };
            let value = term(stratum);
            if !value.is_finite() {
                log::debug!("Skipping undefined benchmark term {value} for stratum {key}");
                result.undefined_terms += 1;
                continue;
            }
            sum += value;
            count += 1;
        }

        if count == 0 {
            result.groups_without_benchmark += 1;
            continue;
        }
        result.means.insert(group.clone(), sum / count as f64);
    }

    result
}

/// Locations whose life expectancy is strictly above `threshold`.
pub fn cohort_above_threshold(
    life_expectancy: &BTreeMap<String, f64>,
    threshold: f64,
) -> BTreeSet<String> {
    life_expectancy
        .iter()
        .filter(|(_, years)| **years > threshold)
        .map(|(location, _)| location.clone())
        .collect()
}
