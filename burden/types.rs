// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// Types shared between the engine, the loaders and the report layer live here.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Failure to interpret a categorical label read from an input table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    #[error("Unrecognized sex label '{0}'. Expected 'Male', 'Female' or 'Both'.")]
    Sex(String),
    #[error("Unrecognized metric label '{0}'. Expected 'Number', 'Rate' or 'Percent'.")]
    Metric(String),
    #[error(
        "Unrecognized measure label '{0}'. Expected Deaths, DALYs, YLDs, YLLs, Prevalence or Incidence (short or full GBD label)."
    )]
    Measure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
    Both,
}

impl Sex {
    pub fn label(self) -> &'static str {
        match self {
            Self::Male => "Male",
            Self::Female => "Female",
            Self::Both => "Both",
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Sex {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(Self::Male),
            "female" => Ok(Self::Female),
            "both" => Ok(Self::Both),
            _ => Err(LabelError::Sex(s.trim().to_string())),
        }
    }
}

/// The unit a long-table value is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    Number,
    Rate,
    Percent,
}

impl Metric {
    pub fn label(self) -> &'static str {
        match self {
            Self::Number => "Number",
            Self::Rate => "Rate",
            Self::Percent => "Percent",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Metric {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "number" => Ok(Self::Number),
            "rate" => Ok(Self::Rate),
            "percent" => Ok(Self::Percent),
            _ => Err(LabelError::Metric(s.trim().to_string())),
        }
    }
}

/// How a measure's expected burden is derived from the benchmark cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentKind {
    /// Benchmark case-fatality applied to the stratum's prevalence.
    Counterfactual,
    /// Benchmark rate over stratum rate, capped at one.
    RateRatio,
}

/// A burden measure as labelled in the source statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Measure {
    Deaths,
    Dalys,
    Ylds,
    Ylls,
    Prevalence,
    Incidence,
}

impl Measure {
    /// The four burden measures in the order the result tables are assembled.
    pub const BURDEN: [Measure; 4] = [Self::Dalys, Self::Ylds, Self::Deaths, Self::Ylls];

    /// Full label as it appears in the source files and in result column headers.
    pub fn label(self) -> &'static str {
        match self {
            Self::Deaths => "Deaths",
            Self::Dalys => "DALYs (Disability-Adjusted Life Years)",
            Self::Ylds => "YLDs (Years Lived with Disability)",
            Self::Ylls => "YLLs (Years of Life Lost)",
            Self::Prevalence => "Prevalence",
            Self::Incidence => "Incidence",
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Self::Deaths => "Deaths",
            Self::Dalys => "DALYs",
            Self::Ylds => "YLDs",
            Self::Ylls => "YLLs",
            Self::Prevalence => "Prevalence",
            Self::Incidence => "Incidence",
        }
    }

    pub fn adjustment(self) -> AdjustmentKind {
        match self {
            Self::Deaths => AdjustmentKind::Counterfactual,
            _ => AdjustmentKind::RateRatio,
        }
    }

    const ALL: [Measure; 6] = [
        Self::Deaths,
        Self::Dalys,
        Self::Ylds,
        Self::Ylls,
        Self::Prevalence,
        Self::Incidence,
    ];
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Measure {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| {
                m.label().eq_ignore_ascii_case(trimmed)
                    || m.short_name().eq_ignore_ascii_case(trimmed)
            })
            .ok_or_else(|| LabelError::Measure(trimmed.to_string()))
    }
}

impl TryFrom<String> for Measure {
    type Error = LabelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Measure> for String {
    fn from(value: Measure) -> Self {
        value.label().to_string()
    }
}

/// Whether benchmark statistics are pooled across all locations or within each region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grouping {
    #[default]
    Global,
    Regional,
}

/// One row of the long-format input table.
#[derive(Debug, Clone, PartialEq)]
pub struct LongRecord {
    pub measure: String,
    pub location: String,
    pub sex: Sex,
    pub age: String,
    pub cause: String,
    pub metric: Metric,
    pub value: f64,
}

impl LongRecord {
    /// True when the record's measure label names `measure`, in short or full form.
    pub fn is_measure(&self, measure: Measure) -> bool {
        self.measure.parse::<Measure>().is_ok_and(|m| m == measure)
    }
}

/// Identifies one stratum of the working table after pivoting.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StratumKey {
    pub location: String,
    pub sex: Sex,
    pub age: String,
    pub cause: String,
    pub region: Option<String>,
}

impl StratumKey {
    pub fn group_key(&self, grouping: Grouping) -> GroupKey {
        GroupKey {
            sex: self.sex,
            age: self.age.clone(),
            cause: self.cause.clone(),
            region: match grouping {
                Grouping::Global => None,
                Grouping::Regional => self.region.clone(),
            },
        }
    }
}

impl fmt::Display for StratumKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {}",
            self.location, self.sex, self.age, self.cause
        )?;
        if let Some(region) = &self.region {
            write!(f, ", {region}")?;
        }
        f.write_str(")")
    }
}

/// The key benchmark statistics are pooled over.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub sex: Sex,
    pub age: String,
    pub cause: String,
    pub region: Option<String>,
}

/// Optional per-location columns a long table may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeColumn {
    Region,
    RegionalBenchmark,
    GlobalBenchmark,
}

impl AttributeColumn {
    pub const ALL: [AttributeColumn; 3] = [
        Self::Region,
        Self::RegionalBenchmark,
        Self::GlobalBenchmark,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Region => "region",
            Self::RegionalBenchmark => "regional_benchmark",
            Self::GlobalBenchmark => "global_benchmark",
        }
    }
}

/// Region and benchmark flags of a single location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationAttribute {
    pub region: Option<String>,
    pub regional_benchmark: bool,
    pub global_benchmark: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Location '{location}' carries conflicting region or benchmark attributes ({first:?} vs {second:?}). These are properties of the location and must agree on every row."
)]
pub struct AttributeConflict {
    pub location: String,
    pub first: LocationAttribute,
    pub second: LocationAttribute,
}

/// Region and benchmark membership for every location of a run.
#[derive(Debug, Clone, Default)]
pub struct LocationAttributes {
    columns: BTreeSet<AttributeColumn>,
    by_location: AHashMap<String, LocationAttribute>,
}

impl LocationAttributes {
    pub fn new(columns: impl IntoIterator<Item = AttributeColumn>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
            by_location: AHashMap::new(),
        }
    }

    /// Records the attributes of `location`. Repeating identical attributes is accepted.
    pub fn insert(
        &mut self,
        location: &str,
        attribute: LocationAttribute,
    ) -> Result<(), AttributeConflict> {
        match self.by_location.get(location) {
            Some(existing) if *existing != attribute => Err(AttributeConflict {
                location: location.to_string(),
                first: existing.clone(),
                second: attribute,
            }),
            Some(_) => Ok(()),
            None => {
                self.by_location.insert(location.to_string(), attribute);
                Ok(())
            }
        }
    }

    pub fn get(&self, location: &str) -> Option<&LocationAttribute> {
        self.by_location.get(location)
    }

    pub fn has_column(&self, column: AttributeColumn) -> bool {
        self.columns.contains(&column)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_location.len()
    }

    /// Combines two attribute sources column by column. Every column `overrides` carries
    /// replaces the same column here; columns it lacks are kept.
    pub fn overlay(mut self, overrides: &LocationAttributes) -> Self {
        let locations: BTreeSet<String> = self
            .by_location
            .keys()
            .chain(overrides.by_location.keys())
            .cloned()
            .collect();
        for location in locations {
            let base = self.by_location.remove(&location).unwrap_or_default();
            let top = overrides.get(&location).cloned().unwrap_or_default();
            let pick = |column: AttributeColumn| overrides.has_column(column);
            let merged = LocationAttribute {
                region: if pick(AttributeColumn::Region) {
                    top.region
                } else {
                    base.region
                },
                regional_benchmark: if pick(AttributeColumn::RegionalBenchmark) {
                    top.regional_benchmark
                } else {
                    base.regional_benchmark
                },
                global_benchmark: if pick(AttributeColumn::GlobalBenchmark) {
                    top.global_benchmark
                } else {
                    base.global_benchmark
                },
            };
            self.by_location.insert(location, merged);
        }
        self.columns.extend(overrides.columns.iter().copied());
        self
    }
}

/// The long-format table for one year: all measures, all metrics.
#[derive(Debug, Clone, Default)]
pub struct LongTable {
    records: Vec<LongRecord>,
    attributes: LocationAttributes,
}

impl LongTable {
    pub fn new(records: Vec<LongRecord>) -> Self {
        Self {
            records,
            attributes: LocationAttributes::default(),
        }
    }

    pub fn with_attributes(mut self, attributes: LocationAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Lays an external attribute file over the attributes read from the table itself.
    pub fn with_attribute_overrides(mut self, overrides: &LocationAttributes) -> Self {
        self.attributes = std::mem::take(&mut self.attributes).overlay(overrides);
        self
    }

    pub fn records(&self) -> &[LongRecord] {
        &self.records
    }

    pub fn attributes(&self) -> &LocationAttributes {
        &self.attributes
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The region a location's strata are keyed under, if the table carries regions.
    pub fn region_of(&self, location: &str) -> Option<String> {
        if !self.attributes.has_column(AttributeColumn::Region) {
            return None;
        }
        self.attributes
            .get(location)
            .and_then(|attribute| attribute.region.clone())
    }

    pub fn stratum_key(&self, record: &LongRecord) -> StratumKey {
        StratumKey {
            location: record.location.clone(),
            sex: record.sex,
            age: record.age.clone(),
            cause: record.cause.clone(),
            region: self.region_of(&record.location),
        }
    }

    /// Distinct locations in first-seen order.
    pub fn locations(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        let mut ordered = Vec::new();
        for record in &self.records {
            if seen.insert(record.location.as_str()) {
                ordered.push(record.location.as_str());
            }
        }
        ordered
    }
}
