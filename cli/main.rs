#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process;

use avertable::io::config::{BenchmarkConfig, CohortConfig, RunConfig, check_measures};
use avertable::io::data::{load_location_attributes, load_long_table};
use avertable::io::ingest::{aggregated_file_name, ingest_year, write_long_table};
use avertable::io::results::{load_results, write_year_results};
use avertable::pipeline::{benchmark_spec, compute_year, run};
use avertable::report::summary::{
    Dimension, Selection, cause_shares, disparity_by_year, top_n_with_other, totals_by,
    yearly_totals_by,
};
use avertable::types::{Grouping, Measure, Sex};

#[derive(Clone, Copy, ValueEnum)]
pub enum GroupingCli {
    Global,
    Regional,
}

impl From<GroupingCli> for Grouping {
    fn from(value: GroupingCli) -> Self {
        match value {
            GroupingCli::Global => Grouping::Global,
            GroupingCli::Regional => Grouping::Regional,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum BenchmarkFlagCli {
    /// Locations flagged in the `regional_benchmark` column
    Regional,
    /// Locations flagged in the `global_benchmark` column
    Global,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SummaryView {
    /// Summed avertable burden per value of --by
    Totals,
    /// Summed avertable burden per year and value of --by
    Yearly,
    /// Variance across locations of per-location totals, per year
    Disparity,
    /// Percentage share of each top cause within each location
    CauseShares,
}

/// Exactly one way of choosing the benchmark cohort
#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct CohortArgs {
    /// Benchmark location (repeat for several)
    #[arg(long = "benchmark-location", value_name = "NAME")]
    pub locations: Vec<String>,

    /// Use a benchmark flag column from the table or attribute file
    #[arg(long = "benchmark-flag", value_enum)]
    pub flag: Option<BenchmarkFlagCli>,

    /// Life-expectancy table with a "Country Name" column and one column per year
    #[arg(long, value_name = "PATH")]
    pub life_expectancy: Option<PathBuf>,
}

#[derive(Args)]
pub struct ComputeArgs {
    /// Aggregated long table (Measure,Location,Sex,Age,Cause,Metric,Value)
    #[arg(value_name = "TABLE")]
    pub table: PathBuf,

    /// Year the table describes; names the output file
    #[arg(long)]
    pub year: u16,

    /// Measure to adjust (repeat for several; defaults to DALYs, YLDs, Deaths, YLLs)
    #[arg(long = "measure", value_name = "MEASURE")]
    pub measures: Vec<Measure>,

    #[command(flatten)]
    pub cohort: CohortArgs,

    /// Life-expectancy threshold in years; locations strictly above it form the benchmark
    #[arg(long, default_value_t = 80.0)]
    pub threshold: f64,

    /// Pool benchmark statistics globally or within each region
    #[arg(long, value_enum, default_value_t = GroupingCli::Global)]
    pub grouping: GroupingCli,

    /// Per-location region and benchmark flags, overriding any in the table
    #[arg(long, value_name = "PATH")]
    pub attributes: Option<PathBuf>,

    /// Output directory (defaults to the table's directory)
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Compute measures one after another instead of in parallel
    #[arg(long)]
    pub sequential: bool,
}

#[derive(Args)]
pub struct SummarizeArgs {
    /// Directory holding results_aggregatedGDB_<year>.csv files
    #[arg(long, value_name = "DIR")]
    pub results_dir: PathBuf,

    /// Years to load (repeat for several)
    #[arg(long = "year", value_name = "YEAR", required = true)]
    pub years: Vec<u16>,

    /// Measure whose avertable burden is summarized
    #[arg(long, default_value = "DALYs")]
    pub measure: Measure,

    #[arg(long, value_enum, default_value_t = SummaryView::Totals)]
    pub view: SummaryView,

    /// Grouping dimension for the totals and yearly views: location, sex, age, cause or year
    #[arg(long, default_value = "location")]
    pub by: Dimension,

    /// Keep the N largest entries and collect the rest under "Other"
    /// (for cause-shares: the number of top causes)
    #[arg(long, value_name = "N")]
    pub top: Option<usize>,

    #[arg(long = "sex")]
    pub sexes: Vec<Sex>,

    #[arg(long = "age")]
    pub ages: Vec<String>,

    #[arg(long = "cause")]
    pub causes: Vec<String>,

    #[arg(long = "location")]
    pub locations: Vec<String>,
}

#[derive(Parser)]
#[command(
    name = "avertable",
    about = "Benchmark-adjusted avertable burden of disease",
    long_about = "Compares every location's mortality and disability burden against a benchmark \
                 cohort of best-performing locations and reports the burden that would be \
                 avoided at benchmark performance."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured year end to end
    #[command(about = "Run the multi-year pipeline (outputs: results_aggregatedGDB_<year>.csv)")]
    Run {
        /// TOML run configuration
        #[arg(long, value_name = "PATH")]
        config: PathBuf,
    },

    /// Adjust an existing aggregated long table
    #[command(about = "Compute avertable burden for one aggregated table")]
    Compute(ComputeArgs),

    /// Aggregate raw IHME*.csv[.gz] sources for one year
    #[command(about = "Aggregate raw sources (outputs: aggregatedGDB_<year>.csv)")]
    Aggregate {
        /// Folder holding the raw source files
        #[arg(long, value_name = "DIR")]
        data_dir: PathBuf,

        #[arg(long)]
        year: u16,
    },

    /// Summarize persisted results as tab-separated text
    #[command(about = "Summarize result files (prints TSV)")]
    Summarize(SummarizeArgs),

    /// Display version and build information
    #[command(about = "Display version and build information")]
    Version,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Run { config }) => run_config(&config),
        Some(Commands::Compute(args)) => compute(args),
        Some(Commands::Aggregate { data_dir, year }) => aggregate(&data_dir, year),
        Some(Commands::Summarize(args)) => summarize(args),
        Some(Commands::Version) => {
            print_version_info();
            Ok(())
        }
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = RunConfig::load(path)?;
    eprintln!(
        "> Running {} years x {} measures from '{}'",
        config.years.len(),
        config.measures.len(),
        config.data_dir.display()
    );

    let report = run(&config)?;
    for path in &report.written {
        println!("Results written to {}", path.display());
    }
    if !report.is_success() {
        for (year, e) in &report.failed {
            eprintln!("> {year}: {e}");
        }
        return Err(format!(
            "{} of {} years failed",
            report.failed.len(),
            config.years.len()
        )
        .into());
    }
    Ok(())
}

fn compute(args: ComputeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut table = load_long_table(&args.table)?;
    if let Some(path) = &args.attributes {
        table = table.with_attribute_overrides(&load_location_attributes(path)?);
    }

    let cohort = match (args.cohort.life_expectancy, args.cohort.flag) {
        (Some(file), _) => CohortConfig::LifeExpectancy {
            file,
            threshold: args.threshold,
        },
        (None, Some(BenchmarkFlagCli::Regional)) => CohortConfig::RegionalFlag,
        (None, Some(BenchmarkFlagCli::Global)) => CohortConfig::GlobalFlag,
        (None, None) => CohortConfig::Locations {
            names: args.cohort.locations,
        },
    };
    let benchmark = BenchmarkConfig {
        grouping: args.grouping.into(),
        cohort,
    };
    let spec = benchmark_spec(&benchmark, args.year)?;

    let measures = if args.measures.is_empty() {
        Measure::BURDEN.to_vec()
    } else {
        args.measures
    };
    check_measures(&measures)?;
    let results = compute_year(&table, args.year, &measures, &spec, !args.sequential)?;

    let out = match args.out {
        Some(dir) => dir,
        None => args
            .table
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };
    std::fs::create_dir_all(&out)?;
    let path = write_year_results(&out, &results)?;
    println!(
        "{} strata written to {}",
        results.len(),
        path.display()
    );
    Ok(())
}

fn aggregate(data_dir: &Path, year: u16) -> Result<(), Box<dyn std::error::Error>> {
    let table = ingest_year(data_dir, year)?;
    let path = data_dir.join(aggregated_file_name(year));
    write_long_table(&path, &table)?;
    println!("{} rows aggregated into {}", table.len(), path.display());
    Ok(())
}

fn summarize(args: SummarizeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let results = load_results(&args.results_dir, &args.years)?;
    let selection = Selection {
        sexes: args.sexes,
        ages: args.ages,
        causes: args.causes,
        locations: args.locations,
        years: Vec::new(),
    };
    let column = format!("Avertable {}", args.measure.label());

    match args.view {
        SummaryView::Totals => {
            let mut totals = totals_by(&results, args.measure, &selection, args.by)?;
            if let Some(n) = args.top {
                totals = top_n_with_other(&totals, n);
            }
            println!("{}\t{column}", args.by);
            for (label, total) in totals {
                println!("{label}\t{total}");
            }
        }
        SummaryView::Yearly => {
            println!("Year\t{}\t{column}", args.by);
            let totals = yearly_totals_by(&results, args.measure, &selection, args.by)?;
            for ((year, label), total) in totals {
                println!("{year}\t{label}\t{total}");
            }
        }
        SummaryView::Disparity => {
            println!("Year\tVariance of {column}");
            for (year, variance) in disparity_by_year(&results, args.measure, &selection)? {
                match variance {
                    Some(v) => println!("{year}\t{v}"),
                    None => println!("{year}\t"),
                }
            }
        }
        SummaryView::CauseShares => {
            let year = args.years[0];
            let shares = cause_shares(
                &results,
                args.measure,
                &selection.locations,
                year,
                args.top.unwrap_or(10),
            )?;
            println!("Location\tCause\tPercent of {column} ({year})");
            for (location, by_cause) in shares {
                for (cause, percent) in by_cause {
                    println!("{location}\t{cause}\t{percent:.2}");
                }
            }
        }
    }
    Ok(())
}

/// Format seconds into a human-readable duration like "2.4 hours ago"
fn format_duration_ago(seconds: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;
    const WEEK: u64 = 7 * DAY;
    const MONTH: u64 = 30 * DAY;
    const YEAR: u64 = 365 * DAY;

    if seconds < MINUTE {
        format!("{} seconds ago", seconds)
    } else if seconds < HOUR {
        format!("{:.1} minutes ago", seconds as f64 / MINUTE as f64)
    } else if seconds < DAY {
        format!("{:.1} hours ago", seconds as f64 / HOUR as f64)
    } else if seconds < WEEK {
        format!("{:.1} days ago", seconds as f64 / DAY as f64)
    } else if seconds < MONTH {
        format!("{:.1} weeks ago", seconds as f64 / WEEK as f64)
    } else if seconds < YEAR {
        format!("{:.1} months ago", seconds as f64 / MONTH as f64)
    } else {
        format!("{:.1} years ago", seconds as f64 / YEAR as f64)
    }
}

fn print_version_info() {
    let version = env!("CARGO_PKG_VERSION");
    let release_tag = option_env!("AVERTABLE_RELEASE_TAG");
    let build_timestamp: u64 = env!("AVERTABLE_BUILD_TIMESTAMP").parse().unwrap_or(0);

    println!("avertable {}", version);

    match release_tag {
        Some(tag) => println!("Release: {}", tag),
        None => println!("Release: development build"),
    }

    if build_timestamp > 0 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        if now > build_timestamp {
            println!("Built: {}", format_duration_ago(now - build_timestamp));
        } else {
            println!("Built: just now");
        }
    }
}
