//! # Long-Table Loading and Validation
//!
//! Entry point for every tabular input other than the raw sources: the aggregated long
//! table of a year, an optional per-location attribute file and the life-expectancy table
//! that defines the default benchmark cohort.
//!
//! - Column names are matched case-insensitively; the canonical spelling is
//!   `Measure, Location, Sex, Age, Cause, Metric, Value`.
//! - Failures are assumed to be user-input errors and `DataError` says which column or
//!   row is at fault.

use crate::io::ingest::{self, IngestError};
use crate::types::{
    AttributeColumn, AttributeConflict, LabelError, LocationAttribute, LocationAttributes,
    LongRecord, LongTable, Metric, Sex,
};
use polars::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the required column '{0}'. Every row must carry a value."
    )]
    MissingValuesFound(String),
    #[error("Row {row}: {source}")]
    Label { row: usize, source: LabelError },
    #[error(
        "Row {row}: '{value}' in column '{column}' is not a benchmark flag. Use true/false, yes/no or 1/0."
    )]
    InvalidFlag {
        row: usize,
        column: &'static str,
        value: String,
    },
    #[error(transparent)]
    AttributeConflict(#[from] AttributeConflict),
    #[error(
        "The attribute file '{0}' has none of the columns 'region', 'regional_benchmark' or 'global_benchmark'."
    )]
    NoAttributeColumns(PathBuf),
    #[error("Failed to aggregate raw source files: {0}")]
    Ingest(#[from] IngestError),
}

/// Loads an aggregated long table, including any region and benchmark-flag columns.
pub fn load_long_table(path: &Path) -> Result<LongTable, DataError> {
    let df = read_csv(path)?;
    let names = build_case_insensitive_map(&df);

    let measures = extract_string_column(&df, &names, "Measure")?;
    let locations = extract_string_column(&df, &names, "Location")?;
    let sexes = extract_string_column(&df, &names, "Sex")?;
    let ages = extract_string_column(&df, &names, "Age")?;
    let causes = extract_string_column(&df, &names, "Cause")?;
    let metrics = extract_string_column(&df, &names, "Metric")?;
    let values = extract_f64_column(&df, &names, "Value")?;

    let mut records = Vec::with_capacity(df.height());
    for (index, value) in values.into_iter().enumerate() {
        let row = index + 1;
        records.push(LongRecord {
            measure: measures[index].clone(),
            location: locations[index].clone(),
            sex: sexes[index]
                .parse::<Sex>()
                .map_err(|source| DataError::Label { row, source })?,
            age: ages[index].clone(),
            cause: causes[index].clone(),
            metric: metrics[index]
                .parse::<Metric>()
                .map_err(|source| DataError::Label { row, source })?,
            value,
        });
    }

    let attributes = read_attributes(&df, &names, &locations)?;
    log::info!(
        "Loaded {} rows from '{}' ({} locations with attributes)",
        records.len(),
        path.display(),
        attributes.len()
    );
    Ok(LongTable::new(records).with_attributes(attributes))
}

/// Loads per-location region and benchmark flags from a separate file with a
/// `Location` column.
pub fn load_location_attributes(path: &Path) -> Result<LocationAttributes, DataError> {
    let df = read_csv(path)?;
    let names = build_case_insensitive_map(&df);
    let locations = extract_string_column(&df, &names, "Location")?;
    let attributes = read_attributes(&df, &names, &locations)?;
    if attributes.is_empty() {
        return Err(DataError::NoAttributeColumns(path.to_path_buf()));
    }
    Ok(attributes)
}

/// Reads the life expectancy of every country in `year` from a table with a
/// `Country Name` column and one column per year. Empty or non-numeric cells are skipped.
pub fn load_life_expectancy(path: &Path, year: u16) -> Result<BTreeMap<String, f64>, DataError> {
    let df = read_csv(path)?;
    let names = build_case_insensitive_map(&df);
    let countries = extract_string_column(&df, &names, "Country Name")?;

    let year_key = year.to_string();
    let actual = names
        .get(&year_key)
        .ok_or_else(|| DataError::ColumnNotFound(year_key.clone()))?;
    // Non-strict cast: unparsable cells become null and are skipped below.
    let casted = df.column(actual)?.cast(&DataType::Float64)?;
    let values = casted.f64()?;

    let mut life_expectancy = BTreeMap::new();
    for (country, value) in countries.into_iter().zip(values.into_iter()) {
        if let Some(years) = value.filter(|v| v.is_finite()) {
            life_expectancy.insert(country, years);
        }
    }
    log::debug!(
        "Read life expectancy for {} countries in {}",
        life_expectancy.len(),
        year
    );
    Ok(life_expectancy)
}

/// Returns the long table of `year`, from the cache in `data_dir` if present, otherwise by
/// ingesting the raw sources and writing the cache.
pub fn load_or_aggregate(data_dir: &Path, year: u16) -> Result<LongTable, DataError> {
    let cache = data_dir.join(ingest::aggregated_file_name(year));
    if cache.is_file() {
        log::info!("Reusing aggregated table '{}'", cache.display());
        return load_long_table(&cache);
    }

    let table = ingest::ingest_year(data_dir, year)?;
    ingest::write_long_table(&cache, &table)?;
    log::info!(
        "Aggregated {} rows for {} into '{}'",
        table.len(),
        year,
        cache.display()
    );
    Ok(table)
}

fn read_csv(path: &Path) -> Result<DataFrame, DataError> {
    let file = File::open(path)?;
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .into_reader_with_file_handle(file)
        .finish()
        .map_err(DataError::from)
}

fn build_case_insensitive_map(df: &DataFrame) -> HashMap<String, String> {
    df.get_column_names()
        .into_iter()
        .map(|name| {
            let original = name.as_str().to_string();
            (original.trim().to_ascii_lowercase(), original)
        })
        .collect()
}

fn resolve<'a>(map: &'a HashMap<String, String>, key: &str) -> Result<&'a String, DataError> {
    map.get(&key.to_ascii_lowercase())
        .ok_or_else(|| DataError::ColumnNotFound(key.to_string()))
}

fn extract_optional_strings(df: &DataFrame, actual: &str) -> Result<Vec<Option<String>>, DataError> {
    let casted = df.column(actual)?.cast(&DataType::String)?;
    let values = casted.str()?;
    Ok(values
        .into_iter()
        .map(|v| v.map(|text| text.trim().to_string()))
        .collect())
}

fn extract_string_column(
    df: &DataFrame,
    map: &HashMap<String, String>,
    key: &str,
) -> Result<Vec<String>, DataError> {
    let actual = resolve(map, key)?;
    extract_optional_strings(df, actual)?
        .into_iter()
        .map(|v| v.ok_or_else(|| DataError::MissingValuesFound(actual.clone())))
        .collect()
}

fn extract_f64_column(
    df: &DataFrame,
    map: &HashMap<String, String>,
    key: &str,
) -> Result<Vec<f64>, DataError> {
    let actual = resolve(map, key)?;
    let series = df.column(actual)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(actual.clone()));
    }
    let casted = series
        .cast(&DataType::Float64)
        .map_err(|_| DataError::ColumnWrongType {
            column_name: actual.clone(),
            expected_type: "f64 (numeric)",
            found_type: series.dtype().to_string(),
        })?;
    if casted.null_count() > 0 {
        return Err(DataError::ColumnWrongType {
            column_name: actual.clone(),
            expected_type: "f64 (numeric)",
            found_type: series.dtype().to_string(),
        });
    }
    Ok(casted.f64()?.into_no_null_iter().collect())
}

fn parse_flag(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" | "" => Some(false),
        _ => None,
    }
}

/// Reads a benchmark flag column. Missing cells count as "not a member".
fn extract_flag_column(
    df: &DataFrame,
    actual: &str,
    column: AttributeColumn,
) -> Result<Vec<bool>, DataError> {
    let series = df.column(actual)?;
    match series.dtype() {
        DataType::Boolean => Ok(series
            .bool()?
            .into_iter()
            .map(|v| v.unwrap_or(false))
            .collect()),
        DataType::String => series
            .str()?
            .into_iter()
            .enumerate()
            .map(|(index, v)| match v {
                None => Ok(false),
                Some(text) => parse_flag(text).ok_or_else(|| DataError::InvalidFlag {
                    row: index + 1,
                    column: column.name(),
                    value: text.to_string(),
                }),
            })
            .collect(),
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64
        | DataType::Float32
        | DataType::Float64 => {
            let casted = series.cast(&DataType::Float64)?;
            Ok(casted
                .f64()?
                .into_iter()
                .map(|v| v.is_some_and(|x| x != 0.0))
                .collect())
        }
        other => Err(DataError::ColumnWrongType {
            column_name: actual.to_string(),
            expected_type: "boolean flag",
            found_type: other.to_string(),
        }),
    }
}

fn read_attributes(
    df: &DataFrame,
    map: &HashMap<String, String>,
    locations: &[String],
) -> Result<LocationAttributes, DataError> {
    let present: Vec<(AttributeColumn, &String)> = AttributeColumn::ALL
        .into_iter()
        .filter_map(|column| map.get(column.name()).map(|actual| (column, actual)))
        .collect();
    let mut attributes = LocationAttributes::new(present.iter().map(|(column, _)| *column));
    if present.is_empty() {
        return Ok(attributes);
    }

    let mut regions: Option<Vec<Option<String>>> = None;
    let mut regional: Option<Vec<bool>> = None;
    let mut global: Option<Vec<bool>> = None;
    for (column, actual) in &present {
        match column {
            AttributeColumn::Region => {
                regions = Some(extract_optional_strings(df, actual)?);
            }
            AttributeColumn::RegionalBenchmark => {
                regional = Some(extract_flag_column(df, actual, *column)?);
            }
            AttributeColumn::GlobalBenchmark => {
                global = Some(extract_flag_column(df, actual, *column)?);
            }
        }
    }

    for (index, location) in locations.iter().enumerate() {
        let attribute = LocationAttribute {
            region: regions
                .as_ref()
                .and_then(|values| values[index].clone())
                .filter(|region| !region.is_empty()),
            regional_benchmark: regional.as_ref().is_some_and(|values| values[index]),
            global_benchmark: global.as_ref().is_some_and(|values| values[index]),
        };
        attributes.insert(location, attribute)?;
    }
    Ok(attributes)
}
