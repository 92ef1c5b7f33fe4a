//! Run configuration, read from and written to TOML.
//!
//! ```toml
//! data_dir = "data"
//! years = [2018, 2021]
//! measures = ["DALYs", "YLDs", "Deaths", "YLLs"]
//! parallel = true
//!
//! [benchmark]
//! grouping = "global"
//!
//! [benchmark.cohort]
//! kind = "life_expectancy"
//! file = "data/LifeExpectancy.csv"
//! threshold = 80.0
//! ```

use crate::benchmark::DEFAULT_LIFE_EXPECTANCY_THRESHOLD;
use crate::types::{Grouping, Measure};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("The configuration lists no years. Add at least one year to 'years'.")]
    NoYears,
    #[error("The configuration lists no measures. Add at least one measure to 'measures'.")]
    NoMeasures,
    #[error(
        "'{0}' cannot be adjusted on its own. Prevalence only serves as the denominator of the Deaths counterfactual."
    )]
    UnsupportedMeasure(Measure),
    #[error("The benchmark cohort 'locations' lists no location names.")]
    EmptyLocationList,
    #[error("The life-expectancy threshold must be a finite number of years (found {0}).")]
    InvalidThreshold(f64),
}

/// How the benchmark cohort is chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CohortConfig {
    /// Locations whose life expectancy in the run year is above `threshold`.
    LifeExpectancy {
        file: PathBuf,
        #[serde(default = "default_threshold")]
        threshold: f64,
    },
    RegionalFlag,
    GlobalFlag,
    Locations {
        names: Vec<String>,
    },
}

fn default_threshold() -> f64 {
    DEFAULT_LIFE_EXPECTANCY_THRESHOLD
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    #[serde(default)]
    pub grouping: Grouping,
    pub cohort: CohortConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Folder holding the raw source files and the aggregated cache.
    pub data_dir: PathBuf,
    /// Where result files are written. Defaults to `data_dir`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    pub years: Vec<u16>,
    #[serde(default = "default_measures")]
    pub measures: Vec<Measure>,
    /// Optional file with per-location `region` and benchmark flag columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_attributes: Option<PathBuf>,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    pub benchmark: BenchmarkConfig,
}

fn default_measures() -> Vec<Measure> {
    Measure::BURDEN.to_vec()
}

fn default_parallel() -> bool {
    true
}

/// Rejects measures that cannot be adjusted on their own. Prevalence only feeds the Deaths
/// counterfactual.
pub fn check_measures(measures: &[Measure]) -> Result<(), ConfigError> {
    match measures
        .iter()
        .find(|m| !Measure::BURDEN.contains(m) && **m != Measure::Incidence)
    {
        Some(measure) => Err(ConfigError::UnsupportedMeasure(*measure)),
        None => Ok(()),
    }
}

impl RunConfig {
    /// Loads and validates a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.years.is_empty() {
            return Err(ConfigError::NoYears);
        }
        if self.measures.is_empty() {
            return Err(ConfigError::NoMeasures);
        }
        check_measures(&self.measures)?;
        match &self.benchmark.cohort {
            CohortConfig::Locations { names } if names.is_empty() => {
                return Err(ConfigError::EmptyLocationList);
            }
            CohortConfig::LifeExpectancy { threshold, .. } if !threshold.is_finite() => {
                return Err(ConfigError::InvalidThreshold(*threshold));
            }
            _ => {}
        }
        Ok(())
    }

    pub fn output_dir(&self) -> &Path {
        self.output_dir.as_deref().unwrap_or(&self.data_dir)
    }
}
