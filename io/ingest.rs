//! # Raw Source Ingestion
//!
//! The raw statistics arrive as many `IHME*.csv` extracts (optionally gzipped), each
//! covering some slice of measures, causes and years. Ingestion keeps the rows of one
//! target year, projects them onto the seven long-table columns and concatenates the
//! files in natural filename order. The result is cached as `aggregatedGDB_<year>.csv`
//! so later runs skip this step.

use crate::pipeline::create_progress_bar;
use crate::types::{LabelError, LongRecord, LongTable, Metric, Sex};
use flate2::read::MultiGzDecoder;
use natord::compare;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Prefix shared by every raw source file name.
pub const SOURCE_PREFIX: &str = "IHME";

/// Canonical header of the aggregated long table.
pub const LONG_TABLE_COLUMNS: [&str; 7] =
    ["Measure", "Location", "Sex", "Age", "Cause", "Metric", "Value"];

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error(
        "No raw source files were found in '{0}'. Expected files named IHME*.csv or IHME*.csv.gz; unpack any downloaded archives first."
    )]
    NoSourceFiles(PathBuf),
    #[error("The source file '{file}' has no '{column}' column.")]
    MissingColumn { file: PathBuf, column: &'static str },
    #[error("Line {line} of '{file}': could not read '{value}' as the {column}.")]
    InvalidValue {
        file: PathBuf,
        line: u64,
        column: &'static str,
        value: String,
    },
    #[error("Line {line} of '{file}': {source}")]
    Label {
        file: PathBuf,
        line: u64,
        source: LabelError,
    },
}

/// Name of the cached long table for `year`.
pub fn aggregated_file_name(year: u16) -> String {
    format!("aggregatedGDB_{year}.csv")
}

fn is_source_file(name: &str) -> bool {
    name.starts_with(SOURCE_PREFIX) && (name.ends_with(".csv") || name.ends_with(".csv.gz"))
}

/// Lists the raw source files in `data_dir`, in natural filename order.
pub fn source_files(data_dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let mut files: Vec<(String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(data_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_source_file(&name) && entry.file_type()?.is_file() {
            files.push((name, entry.path()));
        }
    }
    if files.is_empty() {
        return Err(IngestError::NoSourceFiles(data_dir.to_path_buf()));
    }
    files.sort_by(|a, b| compare(&a.0, &b.0));
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

/// Positions of the needed fields within one source file's header.
struct SourceColumns {
    measure: usize,
    location: usize,
    sex: usize,
    age: usize,
    cause: usize,
    metric: usize,
    year: usize,
    value: usize,
}

impl SourceColumns {
    fn resolve(headers: &csv::StringRecord, file: &Path) -> Result<Self, IngestError> {
        let normalized: Vec<String> = headers
            .iter()
            .map(|h| h.trim().trim_start_matches('\u{feff}').to_ascii_lowercase())
            .collect();
        let find = |column: &'static str| -> Result<usize, IngestError> {
            let suffixed = format!("{column}_name");
            normalized
                .iter()
                .position(|h| h == column)
                .or_else(|| normalized.iter().position(|h| *h == suffixed))
                .ok_or_else(|| IngestError::MissingColumn {
                    file: file.to_path_buf(),
                    column,
                })
        };
        Ok(Self {
            measure: find("measure")?,
            location: find("location")?,
            sex: find("sex")?,
            age: find("age")?,
            cause: find("cause")?,
            metric: find("metric")?,
            year: find("year")?,
            value: find("val")?,
        })
    }
}

fn open_source(path: &Path) -> Result<Box<dyn Read + Send>, IngestError> {
    let file = File::open(path)?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(MultiGzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Reads the rows of `year` from one raw source file.
pub fn read_source_file(path: &Path, year: u16) -> Result<Vec<LongRecord>, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(BufReader::new(open_source(path)?));
    let columns = SourceColumns::resolve(reader.headers()?, path)?;

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for row in reader.records() {
        let row = row?;
        let line = row.position().map_or(0, |p| p.line());
        let field = |index: usize| row.get(index).unwrap_or("");
        let invalid = |column: &'static str, value: &str| IngestError::InvalidValue {
            file: path.to_path_buf(),
            line,
            column,
            value: value.to_string(),
        };
        let label = |source: LabelError| IngestError::Label {
            file: path.to_path_buf(),
            line,
            source,
        };

        let year_field = field(columns.year);
        let row_year = year_field
            .parse::<u16>()
            .map_err(|_| invalid("year", year_field))?;
        if row_year != year {
            skipped += 1;
            continue;
        }

        let value_field = field(columns.value);
        records.push(LongRecord {
            measure: field(columns.measure).to_string(),
            location: field(columns.location).to_string(),
            sex: field(columns.sex).parse::<Sex>().map_err(label)?,
            age: field(columns.age).to_string(),
            cause: field(columns.cause).to_string(),
            metric: field(columns.metric).parse::<Metric>().map_err(label)?,
            value: value_field
                .parse::<f64>()
                .map_err(|_| invalid("value", value_field))?,
        });
    }

    log::debug!(
        "{}: kept {} rows for {}, skipped {} from other years",
        path.display(),
        records.len(),
        year,
        skipped
    );
    Ok(records)
}

/// Ingests every raw source file in `data_dir` for `year` into one long table.
pub fn ingest_year(data_dir: &Path, year: u16) -> Result<LongTable, IngestError> {
    let files = source_files(data_dir)?;
    log::info!("Ingesting {} source files for {}", files.len(), year);

    let pb = create_progress_bar(files.len() as u64, &format!("Ingesting {year}"));
    let per_file: Vec<Result<Vec<LongRecord>, IngestError>> = files
        .par_iter()
        .map(|path| {
            let result = read_source_file(path, year);
            pb.inc(1);
            result
        })
        .collect();
    pb.finish_and_clear();

    let mut records = Vec::new();
    for result in per_file {
        records.extend(result?);
    }
    Ok(LongTable::new(records))
}

/// Writes `table` with the canonical long-table header.
pub fn write_long_table(path: &Path, table: &LongTable) -> Result<(), IngestError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(LONG_TABLE_COLUMNS)?;
    for record in table.records() {
        writer.write_record([
            record.measure.as_str(),
            record.location.as_str(),
            record.sex.label(),
            record.age.as_str(),
            record.cause.as_str(),
            record.metric.label(),
            record.value.to_string().as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
