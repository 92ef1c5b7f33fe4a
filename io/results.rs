//! Persistence of per-year result tables.
//!
//! A result file holds the key columns `Location, Sex, Age, Cause` (plus `region` when
//! strata were keyed by region), followed by four columns for each measure in run order.
//! Cells of a measure that dropped a stratum are left empty.

use crate::engine::ResultRow;
use crate::merge::YearResults;
use crate::types::{LabelError, Measure, Sex, StratumKey};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

const AVERTABLE_PREFIX: &str = "Avertable ";

#[derive(Error, Debug)]
pub enum ResultsError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("The result file is missing the column '{0}'.")]
    ColumnNotFound(String),
    #[error("Row {row} of the result file: {source}")]
    Label { row: usize, source: LabelError },
    #[error("Stratum {0} appears more than once in the result file.")]
    DuplicateStratum(StratumKey),
    #[error("No result files for the requested years were found in '{0}'.")]
    NoResults(PathBuf),
}

pub fn results_file_name(year: u16) -> String {
    format!("results_aggregatedGDB_{year}.csv")
}

/// Headers of the four columns written for `measure`: observed, factor, adjusted, avertable.
pub fn measure_columns(measure: Measure) -> [String; 4] {
    let label = measure.label();
    let factor = match measure {
        Measure::Deaths => "Counterfactual CF".to_string(),
        _ => format!("AdjustRatio {label}"),
    };
    [
        label.to_string(),
        factor,
        format!("Adjusted {label}"),
        format!("{AVERTABLE_PREFIX}{label}"),
    ]
}

/// Writes `results` to `dir`, returning the path of the file.
pub fn write_year_results(dir: &Path, results: &YearResults) -> Result<PathBuf, ResultsError> {
    let has_region = results.rows.keys().any(|key| key.region.is_some());
    let keys: Vec<&StratumKey> = results.rows.keys().collect();

    let mut columns: Vec<Column> = vec![
        Series::new(
            "Location".into(),
            keys.iter().map(|k| k.location.as_str()).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "Sex".into(),
            keys.iter().map(|k| k.sex.label()).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "Age".into(),
            keys.iter().map(|k| k.age.as_str()).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "Cause".into(),
            keys.iter().map(|k| k.cause.as_str()).collect::<Vec<_>>(),
        )
        .into(),
    ];
    if has_region {
        columns.push(
            Series::new(
                "region".into(),
                keys.iter().map(|k| k.region.as_deref()).collect::<Vec<_>>(),
            )
            .into(),
        );
    }

    for measure in &results.measures {
        let cells: Vec<Option<&ResultRow>> = keys
            .iter()
            .map(|key| results.get(key, *measure))
            .collect();
        let fields: [fn(&ResultRow) -> f64; 4] = [
            |r| r.observed,
            |r| r.factor,
            |r| r.adjusted,
            |r| r.avertable,
        ];
        for (name, field) in measure_columns(*measure).into_iter().zip(fields) {
            let values: Vec<Option<f64>> = cells.iter().map(|cell| cell.map(field)).collect();
            columns.push(Series::new(name.into(), values).into());
        }
    }

    let mut df = DataFrame::new(columns)?;
    let path = dir.join(results_file_name(results.year));
    let mut file = File::create(&path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut df)?;
    log::info!(
        "Wrote {} strata for {} to '{}'",
        results.len(),
        results.year,
        path.display()
    );
    Ok(path)
}

/// Reads a result file back, recognising measures by their `Avertable <label>` headers.
pub fn read_year_results(path: &Path, year: u16) -> Result<YearResults, ResultsError> {
    let file = File::open(path)?;
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .into_reader_with_file_handle(file)
        .finish()?;
    let headers: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|name| name.as_str().to_string())
        .collect();

    let measures: Vec<Measure> = headers
        .iter()
        .filter_map(|h| h.strip_prefix(AVERTABLE_PREFIX))
        .filter_map(|label| label.parse::<Measure>().ok())
        .collect();

    let locations = string_column(&df, "Location")?;
    let sexes = string_column(&df, "Sex")?;
    let ages = string_column(&df, "Age")?;
    let causes = string_column(&df, "Cause")?;
    let regions = if has_column(&df, "region") {
        Some(string_column(&df, "region")?)
    } else {
        None
    };

    let mut keys = Vec::with_capacity(df.height());
    for index in 0..df.height() {
        let row = index + 1;
        let text = |values: &[Option<String>]| values[index].clone().unwrap_or_default();
        keys.push(StratumKey {
            location: text(&locations),
            sex: text(&sexes)
                .parse::<Sex>()
                .map_err(|source| ResultsError::Label { row, source })?,
            age: text(&ages),
            cause: text(&causes),
            region: regions.as_ref().and_then(|r| r[index].clone()),
        });
    }

    let mut per_measure: Vec<(Measure, [Vec<Option<f64>>; 4])> = Vec::new();
    for measure in &measures {
        let [observed, factor, adjusted, avertable] = measure_columns(*measure);
        per_measure.push((
            *measure,
            [
                float_column(&df, &observed)?,
                float_column(&df, &factor)?,
                float_column(&df, &adjusted)?,
                float_column(&df, &avertable)?,
            ],
        ));
    }

    let mut results = YearResults::new(year);
    results.measures = measures;
    for (index, key) in keys.into_iter().enumerate() {
        let mut row: BTreeMap<Measure, ResultRow> = BTreeMap::new();
        for (measure, [observed, factor, adjusted, avertable]) in &per_measure {
            if let (Some(observed), Some(factor), Some(adjusted), Some(avertable)) = (
                observed[index],
                factor[index],
                adjusted[index],
                avertable[index],
            ) {
                row.insert(
                    *measure,
                    ResultRow {
                        observed,
                        factor,
                        adjusted,
                        avertable,
                    },
                );
            }
        }
        if results.rows.contains_key(&key) {
            return Err(ResultsError::DuplicateStratum(key));
        }
        results.rows.insert(key, row);
    }
    Ok(results)
}

/// Loads the result files of `years` from `dir`. Missing years are skipped with a warning.
pub fn load_results(dir: &Path, years: &[u16]) -> Result<Vec<YearResults>, ResultsError> {
    let mut loaded = Vec::new();
    for year in years {
        let path = dir.join(results_file_name(*year));
        if !path.is_file() {
            log::warn!("No result file for {} at '{}'; skipping", year, path.display());
            continue;
        }
        loaded.push(read_year_results(&path, *year)?);
    }
    if loaded.is_empty() {
        return Err(ResultsError::NoResults(dir.to_path_buf()));
    }
    Ok(loaded)
}

fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

fn string_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, ResultsError> {
    if !has_column(df, name) {
        return Err(ResultsError::ColumnNotFound(name.to_string()));
    }
    let casted = df.column(name)?.cast(&DataType::String)?;
    Ok(casted
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

fn float_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, ResultsError> {
    if !has_column(df, name) {
        return Err(ResultsError::ColumnNotFound(name.to_string()));
    }
    let casted = df.column(name)?.cast(&DataType::Float64)?;
    Ok(casted.f64()?.into_iter().collect())
}
