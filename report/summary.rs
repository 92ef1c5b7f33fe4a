// ========================================================================================
//
//                         Dashboard aggregations over year results
//
// ========================================================================================

// Every function here reads one `Avertable <Measure>` column across the loaded years,
// restricted by a `Selection`. Strata a measure dropped carry no value and are skipped.

use crate::merge::YearResults;
use crate::types::{Measure, Sex, StratumKey};
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Label under which `top_n_with_other` collects everything outside the top entries.
pub const OTHER_LABEL: &str = "Other";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SummaryError {
    #[error("Unknown dimension '{0}'. Expected location, sex, age, cause or year.")]
    UnknownDimension(String),
    #[error("None of the loaded result files contains a column for '{0}'.")]
    MeasureNotComputed(Measure),
}

/// A column results can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Location,
    Sex,
    Age,
    Cause,
    Year,
}

impl Dimension {
    fn label_of(self, year: u16, key: &StratumKey) -> String {
        match self {
            Self::Location => key.location.clone(),
            Self::Sex => key.sex.label().to_string(),
            Self::Age => key.age.clone(),
            Self::Cause => key.cause.clone(),
            Self::Year => year.to_string(),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Location => "Location",
            Self::Sex => "Sex",
            Self::Age => "Age",
            Self::Cause => "Cause",
            Self::Year => "Year",
        })
    }
}

impl FromStr for Dimension {
    type Err = SummaryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "location" => Ok(Self::Location),
            "sex" => Ok(Self::Sex),
            "age" => Ok(Self::Age),
            "cause" => Ok(Self::Cause),
            "year" => Ok(Self::Year),
            _ => Err(SummaryError::UnknownDimension(s.trim().to_string())),
        }
    }
}

/// Filters on the key columns and the year. An empty list accepts every value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub sexes: Vec<Sex>,
    pub ages: Vec<String>,
    pub causes: Vec<String>,
    pub locations: Vec<String>,
    pub years: Vec<u16>,
}

impl Selection {
    pub fn matches(&self, year: u16, key: &StratumKey) -> bool {
        fn accepts<T: PartialEq>(allowed: &[T], value: &T) -> bool {
            allowed.is_empty() || allowed.contains(value)
        }
        accepts(&self.years, &year)
            && accepts(&self.sexes, &key.sex)
            && accepts(&self.ages, &key.age)
            && accepts(&self.causes, &key.cause)
            && accepts(&self.locations, &key.location)
    }
}

fn ensure_computed(results: &[YearResults], measure: Measure) -> Result<(), SummaryError> {
    if results.iter().any(|r| r.measures.contains(&measure)) {
        Ok(())
    } else {
        Err(SummaryError::MeasureNotComputed(measure))
    }
}

fn selected<'a>(
    results: &'a [YearResults],
    measure: Measure,
    selection: &'a Selection,
) -> impl Iterator<Item = (u16, &'a StratumKey, f64)> + 'a {
    results.iter().flat_map(move |year_results| {
        let year = year_results.year;
        year_results
            .avertable(measure)
            .filter(move |(key, value)| value.is_finite() && selection.matches(year, key))
            .map(move |(key, value)| (year, key, value))
    })
}

fn descending(totals: BTreeMap<String, f64>) -> Vec<(String, f64)> {
    totals
        .into_iter()
        .sorted_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
        .collect()
}

/// Sums the avertable burden of `measure` per value of `dimension`, largest first.
pub fn totals_by(
    results: &[YearResults],
    measure: Measure,
    selection: &Selection,
    dimension: Dimension,
) -> Result<Vec<(String, f64)>, SummaryError> {
    ensure_computed(results, measure)?;
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for (year, key, value) in selected(results, measure, selection) {
        *totals.entry(dimension.label_of(year, key)).or_default() += value;
    }
    Ok(descending(totals))
}

/// Sums per year and per value of `dimension`, for plotting a dimension over time.
pub fn yearly_totals_by(
    results: &[YearResults],
    measure: Measure,
    selection: &Selection,
    dimension: Dimension,
) -> Result<BTreeMap<(u16, String), f64>, SummaryError> {
    ensure_computed(results, measure)?;
    let mut totals = BTreeMap::new();
    for (year, key, value) in selected(results, measure, selection) {
        *totals
            .entry((year, dimension.label_of(year, key)))
            .or_default() += value;
    }
    Ok(totals)
}

/// Keeps the `n` largest totals and appends an `Other` entry with the rest.
pub fn top_n_with_other(totals: &[(String, f64)], n: usize) -> Vec<(String, f64)> {
    let ordered: Vec<(String, f64)> = totals
        .iter()
        .cloned()
        .sorted_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
        .collect();
    let grand_total: f64 = ordered.iter().map(|(_, value)| value).sum();
    let mut top: Vec<(String, f64)> = ordered.into_iter().take(n).collect();
    let top_total: f64 = top.iter().map(|(_, value)| value).sum();
    top.push((OTHER_LABEL.to_string(), grand_total - top_total));
    top
}

/// The `n` causes with the largest summed burden over `locations` in `year`.
pub fn top_causes(
    results: &[YearResults],
    measure: Measure,
    locations: &[String],
    year: u16,
    n: usize,
) -> Result<Vec<String>, SummaryError> {
    let selection = Selection {
        locations: locations.to_vec(),
        years: vec![year],
        ..Selection::default()
    };
    Ok(totals_by(results, measure, &selection, Dimension::Cause)?
        .into_iter()
        .take(n)
        .map(|(cause, _)| cause)
        .collect())
}

/// For each location, the percentage each of the top `n` causes contributes to the
/// location's burden over those causes. Locations with no burden are left out.
pub fn cause_shares(
    results: &[YearResults],
    measure: Measure,
    locations: &[String],
    year: u16,
    n: usize,
) -> Result<BTreeMap<String, BTreeMap<String, f64>>, SummaryError> {
    let causes: BTreeSet<String> = top_causes(results, measure, locations, year, n)?
        .into_iter()
        .collect();
    let selection = Selection {
        locations: locations.to_vec(),
        years: vec![year],
        ..Selection::default()
    };

    let mut sums: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
    for (_, key, value) in selected(results, measure, &selection) {
        if causes.contains(&key.cause) {
            *sums
                .entry(key.location.clone())
                .or_default()
                .entry(key.cause.clone())
                .or_default() += value;
        }
    }

    let mut shares = BTreeMap::new();
    for (location, by_cause) in sums {
        let total: f64 = by_cause.values().sum();
        if total == 0.0 {
            continue;
        }
        let percentages = by_cause
            .into_iter()
            .map(|(cause, value)| (cause, value / total * 100.0))
            .collect();
        shares.insert(location, percentages);
    }
    Ok(shares)
}

/// Sample variance across locations of per-location totals, per year. `None` when a
/// year has fewer than two locations.
pub fn disparity_by_year(
    results: &[YearResults],
    measure: Measure,
    selection: &Selection,
) -> Result<BTreeMap<u16, Option<f64>>, SummaryError> {
    let per_location = yearly_totals_by(results, measure, selection, Dimension::Location)?;
    let mut by_year: BTreeMap<u16, Vec<f64>> = BTreeMap::new();
    for ((year, _), total) in per_location {
        by_year.entry(year).or_default().push(total);
    }

    Ok(by_year
        .into_iter()
        .map(|(year, totals)| {
            if totals.len() < 2 {
                return (year, None);
            }
            let n = totals.len() as f64;
            let mean = totals.iter().sum::<f64>() / n;
            let squares: f64 = totals.iter().map(|t| (t - mean).powi(2)).sum();
            (year, Some(squares / (n - 1.0)))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ResultRow;
    use approx::assert_abs_diff_eq;

    fn key(location: &str, sex: Sex, age: &str, cause: &str) -> StratumKey {
        StratumKey {
            location: location.to_string(),
            sex,
            age: age.to_string(),
            cause: cause.to_string(),
            region: None,
        }
    }

    fn year(year: u16, rows: &[(&str, Sex, &str, &str, f64)]) -> YearResults {
        let mut results = YearResults::new(year);
        results.measures = vec![Measure::Dalys];
        for (location, sex, age, cause, avertable) in rows {
            results.rows.entry(key(location, *sex, age, cause)).or_default().insert(
                Measure::Dalys,
                ResultRow {
                    observed: *avertable * 2.0,
                    factor: 0.5,
                    adjusted: *avertable,
                    avertable: *avertable,
                },
            );
        }
        results
    }

    fn sample() -> Vec<YearResults> {
        vec![
            year(
                2018,
                &[
                    ("Chile", Sex::Female, "55+ years", "Stroke", 10.0),
                    ("Chile", Sex::Male, "55+ years", "Stroke", 5.0),
                    ("Peru", Sex::Female, "55+ years", "Stroke", 30.0),
                    ("Peru", Sex::Female, "55+ years", "Asthma", 20.0),
                    ("Bolivia", Sex::Female, "<5 years", "Asthma", 2.0),
                ],
            ),
            year(
                2021,
                &[
                    ("Chile", Sex::Female, "55+ years", "Stroke", 12.0),
                    ("Peru", Sex::Female, "55+ years", "Stroke", 24.0),
                ],
            ),
        ]
    }

    #[test]
    fn totals_respect_the_selection() {
        let selection = Selection {
            sexes: vec![Sex::Female],
            ages: vec!["55+ years".to_string()],
            years: vec![2018],
            ..Selection::default()
        };
        let totals = totals_by(&sample(), Measure::Dalys, &selection, Dimension::Location).unwrap();
        assert_eq!(
            totals,
            vec![("Peru".to_string(), 50.0), ("Chile".to_string(), 10.0)]
        );

        let by_year =
            totals_by(&sample(), Measure::Dalys, &Selection::default(), Dimension::Year).unwrap();
        assert_eq!(
            by_year,
            vec![("2018".to_string(), 67.0), ("2021".to_string(), 36.0)]
        );
    }

    #[test]
    fn uncomputed_measure_is_an_error() {
        assert_eq!(
            totals_by(&sample(), Measure::Deaths, &Selection::default(), Dimension::Cause),
            Err(SummaryError::MeasureNotComputed(Measure::Deaths))
        );
    }

    #[test]
    fn top_n_collects_the_remainder_under_other() {
        let totals = vec![
            ("A".to_string(), 1.0),
            ("B".to_string(), 5.0),
            ("C".to_string(), 3.0),
            ("D".to_string(), 2.0),
        ];
        let top = top_n_with_other(&totals, 2);
        assert_eq!(
            top,
            vec![
                ("B".to_string(), 5.0),
                ("C".to_string(), 3.0),
                ("Other".to_string(), 3.0),
            ]
        );
        let everything = top_n_with_other(&totals, 10);
        assert_eq!(everything.last().unwrap(), &("Other".to_string(), 0.0));
    }

    #[test]
    fn top_causes_sum_across_the_given_locations() {
        let locations = vec!["Chile".to_string(), "Peru".to_string()];
        let causes = top_causes(&sample(), Measure::Dalys, &locations, 2018, 1).unwrap();
        assert_eq!(causes, vec!["Stroke".to_string()]);
    }

    #[test]
    fn cause_shares_are_percentages_per_location() {
        let locations = vec!["Chile".to_string(), "Peru".to_string()];
        let shares = cause_shares(&sample(), Measure::Dalys, &locations, 2018, 2).unwrap();
        assert_abs_diff_eq!(shares["Peru"]["Stroke"], 60.0, epsilon = 1e-9);
        assert_abs_diff_eq!(shares["Peru"]["Asthma"], 40.0, epsilon = 1e-9);
        assert_abs_diff_eq!(shares["Chile"]["Stroke"], 100.0, epsilon = 1e-9);
        assert!(!shares.contains_key("Bolivia"));
    }

    #[test]
    fn disparity_is_the_sample_variance_of_location_totals() {
        let disparity =
            disparity_by_year(&sample(), Measure::Dalys, &Selection::default()).unwrap();
        // 2018 totals: Bolivia 2, Chile 15, Peru 50 -> mean 22.333...
        let mean: f64 = 67.0 / 3.0;
        let expected = ((2.0 - mean).powi(2) + (15.0 - mean).powi(2) + (50.0 - mean).powi(2)) / 2.0;
        assert_abs_diff_eq!(disparity[&2018].unwrap(), expected, epsilon = 1e-9);
        // 2021 totals: Chile 12, Peru 24 -> variance 72
        assert_abs_diff_eq!(disparity[&2021].unwrap(), 72.0, epsilon = 1e-9);

        let one_location = Selection {
            locations: vec!["Peru".to_string()],
            ..Selection::default()
        };
        let disparity = disparity_by_year(&sample(), Measure::Dalys, &one_location).unwrap();
        assert_eq!(disparity[&2021], None);
    }

    #[test]
    fn dimensions_parse_case_insensitively() {
        assert_eq!("Cause".parse::<Dimension>().unwrap(), Dimension::Cause);
        assert_eq!(
            "country".parse::<Dimension>(),
            Err(SummaryError::UnknownDimension("country".to_string()))
        );
    }
}
