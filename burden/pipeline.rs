// ========================================================================================
//
//                               Multi-year orchestration
//
// ========================================================================================

use crate::benchmark::{self, BenchmarkSpec, Cohort};
use crate::engine::{self, EngineError, MeasureResult};
use crate::io::config::{BenchmarkConfig, CohortConfig, RunConfig};
use crate::io::data::{self, DataError};
use crate::io::results::{self, ResultsError};
use crate::merge::{self, YearResults};
use crate::types::{LocationAttributes, LongTable, Measure};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rayon::prelude::*;
use std::fs;
use std::io::IsTerminal;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to load input data: {0}")]
    Data(#[from] DataError),
    #[error("Failed to compute '{measure}': {source}")]
    Engine {
        measure: Measure,
        source: EngineError,
    },
    #[error("Failed to write results: {0}")]
    Results(#[from] ResultsError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a multi-year run produced.
#[derive(Debug, Default)]
pub struct RunReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<(u16, PipelineError)>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub(crate) fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());

    pb
}

/// Resolves the configured cohort for `year`. A life-expectancy cohort is re-evaluated
/// every year.
pub fn benchmark_spec(config: &BenchmarkConfig, year: u16) -> Result<BenchmarkSpec, PipelineError> {
    let cohort = match &config.cohort {
        CohortConfig::LifeExpectancy { file, threshold } => {
            let life_expectancy = data::load_life_expectancy(file, year)?;
            let members = benchmark::cohort_above_threshold(&life_expectancy, *threshold);
            log::info!(
                "{} locations have a life expectancy above {} in {}",
                members.len(),
                threshold,
                year
            );
            Cohort::Locations(members)
        }
        CohortConfig::RegionalFlag => Cohort::RegionalFlag,
        CohortConfig::GlobalFlag => Cohort::GlobalFlag,
        CohortConfig::Locations { names } => Cohort::Locations(names.iter().cloned().collect()),
    };
    Ok(BenchmarkSpec::new(cohort, config.grouping))
}

/// Runs every measure on one year's table and merges the results in measure order.
pub fn compute_year(
    table: &LongTable,
    year: u16,
    measures: &[Measure],
    spec: &BenchmarkSpec,
    parallel: bool,
) -> Result<YearResults, PipelineError> {
    let compute = |measure: &Measure| {
        engine::process_measure(table, *measure, spec).map_err(|source| PipelineError::Engine {
            measure: *measure,
            source,
        })
    };

    let outcomes: Vec<Result<MeasureResult, PipelineError>> = if parallel {
        measures.par_iter().map(compute).collect()
    } else {
        measures.iter().map(compute).collect()
    };
    let computed = outcomes.into_iter().collect::<Result<Vec<_>, _>>()?;
    Ok(merge::merge_measures(year, computed))
}

fn run_year(
    config: &RunConfig,
    year: u16,
    attributes: Option<&LocationAttributes>,
) -> Result<PathBuf, PipelineError> {
    let mut table = data::load_or_aggregate(&config.data_dir, year)?;
    if let Some(attributes) = attributes {
        table = table.with_attribute_overrides(attributes);
    }
    let spec = benchmark_spec(&config.benchmark, year)?;
    let year_results = compute_year(&table, year, &config.measures, &spec, config.parallel)?;
    Ok(results::write_year_results(config.output_dir(), &year_results)?)
}

/// Runs the configured years one after another. A failing year is recorded in the report
/// and the remaining years still run.
pub fn run(config: &RunConfig) -> Result<RunReport, PipelineError> {
    fs::create_dir_all(config.output_dir())?;
    let attributes = match &config.location_attributes {
        Some(path) => Some(data::load_location_attributes(path)?),
        None => None,
    };

    let mut report = RunReport::default();
    let pb = create_progress_bar(config.years.len() as u64, "Processing years");
    for &year in &config.years {
        pb.set_message(format!("Processing {year}"));
        match run_year(config, year, attributes.as_ref()) {
            Ok(path) => report.written.push(path),
            Err(e) => {
                log::error!("{year} failed: {e}");
                report.failed.push((year, e));
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Grouping;
    use std::path::Path;
    use tempfile::tempdir;

    const AGGREGATED: &str = "\
Measure,Location,Sex,Age,Cause,Metric,Value
Deaths,Japan,Female,55+ years,Stroke,Number,25
Deaths,Japan,Female,55+ years,Stroke,Rate,0.5
Prevalence,Japan,Female,55+ years,Stroke,Number,100
Prevalence,Japan,Female,55+ years,Stroke,Rate,2
Deaths,Peru,Female,55+ years,Stroke,Number,300
Deaths,Peru,Female,55+ years,Stroke,Rate,3
Prevalence,Peru,Female,55+ years,Stroke,Number,1000
Prevalence,Peru,Female,55+ years,Stroke,Rate,4
DALYs (Disability-Adjusted Life Years),Japan,Female,55+ years,Stroke,Number,400
DALYs (Disability-Adjusted Life Years),Japan,Female,55+ years,Stroke,Rate,20
DALYs (Disability-Adjusted Life Years),Peru,Female,55+ years,Stroke,Number,1000
DALYs (Disability-Adjusted Life Years),Peru,Female,55+ years,Stroke,Rate,50
";

    fn config(data_dir: &Path, years: Vec<u16>, cohort: CohortConfig) -> RunConfig {
        RunConfig {
            data_dir: data_dir.to_path_buf(),
            output_dir: None,
            years,
            measures: vec![Measure::Dalys, Measure::Deaths],
            location_attributes: None,
            parallel: true,
            benchmark: BenchmarkConfig {
                grouping: Grouping::Global,
                cohort,
            },
        }
    }

    #[test]
    fn parallel_and_sequential_runs_agree() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aggregatedGDB_2021.csv");
        fs::write(&path, AGGREGATED).unwrap();
        let table = data::load_long_table(&path).unwrap();
        let spec = BenchmarkSpec::locations(["Japan"]);
        let measures = [Measure::Dalys, Measure::Ylds, Measure::Deaths];

        let parallel = compute_year(&table, 2021, &measures, &spec, true).unwrap();
        let sequential = compute_year(&table, 2021, &measures, &spec, false).unwrap();
        assert_eq!(parallel, sequential);
        assert_eq!(parallel.measures, measures.to_vec());
    }

    #[test]
    fn run_writes_each_year_and_reports_failures() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("aggregatedGDB_2021.csv"), AGGREGATED).unwrap();
        let config = config(
            dir.path(),
            vec![2021, 2020],
            CohortConfig::Locations {
                names: vec!["Japan".to_string()],
            },
        );

        let report = run(&config).unwrap();
        assert_eq!(report.written, vec![dir.path().join("results_aggregatedGDB_2021.csv")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, 2020);
        assert!(!report.is_success());

        let written = results::read_year_results(&report.written[0], 2021).unwrap();
        let peru = written
            .rows
            .iter()
            .find(|(key, _)| key.location == "Peru")
            .map(|(_, row)| row)
            .unwrap();
        assert_eq!(peru[&Measure::Deaths].avertable, 50.0);
        assert_eq!(peru[&Measure::Dalys].avertable, 600.0);
    }

    #[test]
    fn life_expectancy_cohort_is_evaluated_per_year() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("LifeExpectancy.csv");
        fs::write(&file, "Country Name,2018,2021\nJapan,84.1,84.5\nChile,80.5,79.5\n").unwrap();
        let benchmark = BenchmarkConfig {
            grouping: Grouping::Global,
            cohort: CohortConfig::LifeExpectancy {
                file,
                threshold: 80.0,
            },
        };

        let members = |year| match benchmark_spec(&benchmark, year).unwrap().cohort {
            Cohort::Locations(names) => names.into_iter().collect::<Vec<_>>(),
            other => panic!("Expected a location cohort, got {other:?}"),
        };
        assert_eq!(members(2018), vec!["Chile", "Japan"]);
        assert_eq!(members(2021), vec!["Japan"]);
    }

    #[test]
    fn engine_failure_names_the_measure() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("aggregatedGDB_2021.csv"), AGGREGATED).unwrap();
        let config = config(dir.path(), vec![2021], CohortConfig::GlobalFlag);

        let report = run(&config).unwrap();
        match &report.failed[..] {
            [(2021, PipelineError::Engine { measure, source })] => {
                assert_eq!(*measure, Measure::Dalys);
                assert!(
                    matches!(source, EngineError::MissingColumn(column) if column == "global_benchmark")
                );
            }
            other => panic!("Expected one engine failure, got {other:?}"),
        }
    }

    #[test]
    fn absent_cohort_still_writes_the_year() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("aggregatedGDB_2021.csv"), AGGREGATED).unwrap();
        let config = config(
            dir.path(),
            vec![2021],
            CohortConfig::Locations {
                names: vec!["Atlantis".to_string()],
            },
        );

        let report = run(&config).unwrap();
        assert!(report.is_success());
        let written = results::read_year_results(&report.written[0], 2021).unwrap();
        assert!(written.is_empty());
    }

    #[test]
    fn regional_run_uses_regions_from_the_table() {
        let dir = tempdir().unwrap();
        let table = "\
Measure,Location,Sex,Age,Cause,Metric,Value,region,regional_benchmark
DALYs,Japan,Female,55+ years,Stroke,Number,400,Asia,true
DALYs,Japan,Female,55+ years,Stroke,Rate,20,Asia,true
DALYs,Korea,Female,55+ years,Stroke,Number,1000,Asia,false
DALYs,Korea,Female,55+ years,Stroke,Rate,50,Asia,false
DALYs,Chile,Female,55+ years,Stroke,Number,500,Andes,true
DALYs,Chile,Female,55+ years,Stroke,Rate,10,Andes,true
DALYs,Peru,Female,55+ years,Stroke,Number,1000,Andes,false
DALYs,Peru,Female,55+ years,Stroke,Rate,40,Andes,false
";
        fs::write(dir.path().join("aggregatedGDB_2021.csv"), table).unwrap();
        let mut config = config(dir.path(), vec![2021], CohortConfig::RegionalFlag);
        config.measures = vec![Measure::Dalys];
        config.benchmark.grouping = Grouping::Regional;

        let report = run(&config).unwrap();
        assert!(report.is_success(), "{:?}", report.failed);
        let written = results::read_year_results(&report.written[0], 2021).unwrap();
        let avertable = |location: &str| {
            written
                .avertable(Measure::Dalys)
                .find(|(key, _)| key.location == location)
                .map(|(key, value)| (key.region.clone(), value))
                .unwrap()
        };
        assert_eq!(avertable("Korea"), (Some("Asia".to_string()), 600.0));
        assert_eq!(avertable("Peru"), (Some("Andes".to_string()), 750.0));
    }

    #[test]
    fn attribute_file_keeps_the_table_columns_it_lacks() {
        let dir = tempdir().unwrap();
        let table = "\
Measure,Location,Sex,Age,Cause,Metric,Value,region
DALYs,Japan,Female,55+ years,Stroke,Number,400,Asia
DALYs,Japan,Female,55+ years,Stroke,Rate,20,Asia
DALYs,Korea,Female,55+ years,Stroke,Number,1000,Asia
DALYs,Korea,Female,55+ years,Stroke,Rate,50,Asia
";
        fs::write(dir.path().join("aggregatedGDB_2021.csv"), table).unwrap();
        let flags = dir.path().join("flags.csv");
        fs::write(&flags, "Location,regional_benchmark\nJapan,true\nKorea,false\n").unwrap();
        let mut config = config(dir.path(), vec![2021], CohortConfig::RegionalFlag);
        config.measures = vec![Measure::Dalys];
        config.benchmark.grouping = Grouping::Regional;
        config.location_attributes = Some(flags);

        let report = run(&config).unwrap();
        assert!(report.is_success(), "{:?}", report.failed);
        let written = results::read_year_results(&report.written[0], 2021).unwrap();
        let korea: Vec<_> = written
            .avertable(Measure::Dalys)
            .filter(|(key, _)| key.location == "Korea")
            .collect();
        assert_eq!(korea.len(), 1);
        assert_eq!(korea[0].0.region.as_deref(), Some("Asia"));
        assert_eq!(korea[0].1, 600.0);
    }
}
