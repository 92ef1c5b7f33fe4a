use std::fs;
use std::path::Path;
use std::process::{Command, Output};

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

fn run_cli(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_avertable"))
        .current_dir(dir)
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .expect("run avertable cli")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn compute_then_summarize_prints_totals() {
    let tmp = tempdir().expect("temporary directory");
    let table = tmp.path().join("aggregatedGDB_2021.csv");
    fs::write(&table, AGGREGATED).expect("write table");
    let out = tmp.path().join("results");

    let computed = run_cli(
        tmp.path(),
        &[
            "compute",
            table.to_str().expect("path str"),
            "--year",
            "2021",
            "--measure",
            "DALYs",
            "--measure",
            "Deaths",
            "--benchmark-location",
            "Japan",
            "--out",
            out.to_str().expect("path str"),
        ],
    );
    assert!(computed.status.success(), "compute failed: {computed:?}");
    let results = out.join("results_aggregatedGDB_2021.csv");
    assert!(results.exists(), "result file missing");

    let summary = run_cli(
        tmp.path(),
        &[
            "summarize",
            "--results-dir",
            out.to_str().expect("path str"),
            "--year",
            "2021",
            "--measure",
            "Deaths",
        ],
    );
    assert!(summary.status.success(), "summarize failed: {summary:?}");
    let text = stdout(&summary);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec!["Location\tAvertable Deaths", "Peru\t50", "Japan\t0"]
    );
}

#[test]
fn cohort_options_are_mutually_exclusive() {
    let tmp = tempdir().expect("temporary directory");
    let table = tmp.path().join("aggregatedGDB_2021.csv");
    fs::write(&table, AGGREGATED).expect("write table");

    let output = run_cli(
        tmp.path(),
        &[
            "compute",
            table.to_str().expect("path str"),
            "--year",
            "2021",
            "--benchmark-location",
            "Japan",
            "--benchmark-flag",
            "global",
        ],
    );
    assert!(!output.status.success());
}

#[test]
fn cohort_missing_from_the_table_writes_an_empty_result() {
    let tmp = tempdir().expect("temporary directory");
    let table = tmp.path().join("aggregatedGDB_2021.csv");
    fs::write(&table, AGGREGATED).expect("write table");

    let output = run_cli(
        tmp.path(),
        &[
            "compute",
            table.to_str().expect("path str"),
            "--year",
            "2021",
            "--measure",
            "DALYs",
            "--benchmark-location",
            "Atlantis",
        ],
    );
    assert!(output.status.success(), "compute failed: {output:?}");
    let written = fs::read_to_string(tmp.path().join("results_aggregatedGDB_2021.csv"))
        .expect("read results");
    assert_eq!(written.lines().count(), 1, "expected only a header: {written}");
}

#[test]
fn missing_flag_column_fails_with_an_error() {
    let tmp = tempdir().expect("temporary directory");
    let table = tmp.path().join("aggregatedGDB_2021.csv");
    fs::write(&table, AGGREGATED).expect("write table");

    let output = run_cli(
        tmp.path(),
        &[
            "compute",
            table.to_str().expect("path str"),
            "--year",
            "2021",
            "--benchmark-flag",
            "global",
        ],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error:"), "stderr was: {stderr}");
    assert!(stderr.contains("global_benchmark"), "stderr was: {stderr}");
    assert!(!tmp.path().join("results_aggregatedGDB_2021.csv").exists());
}

#[test]
fn prevalence_cannot_be_computed_on_its_own() {
    let tmp = tempdir().expect("temporary directory");
    let table = tmp.path().join("aggregatedGDB_2021.csv");
    fs::write(&table, AGGREGATED).expect("write table");

    let output = run_cli(
        tmp.path(),
        &[
            "compute",
            table.to_str().expect("path str"),
            "--year",
            "2021",
            "--measure",
            "Prevalence",
            "--benchmark-location",
            "Japan",
        ],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Prevalence"), "stderr was: {stderr}");
    assert!(!tmp.path().join("results_aggregatedGDB_2021.csv").exists());
}

#[test]
fn yearly_view_sums_per_year_and_dimension() {
    let tmp = tempdir().expect("temporary directory");
    let out = tmp.path().join("results");
    for year in ["2019", "2021"] {
        let table = tmp.path().join(format!("aggregatedGDB_{year}.csv"));
        fs::write(&table, AGGREGATED).expect("write table");
        let computed = run_cli(
            tmp.path(),
            &[
                "compute",
                table.to_str().expect("path str"),
                "--year",
                year,
                "--measure",
                "DALYs",
                "--benchmark-location",
                "Japan",
                "--out",
                out.to_str().expect("path str"),
            ],
        );
        assert!(computed.status.success(), "compute failed: {computed:?}");
    }

    let summary = run_cli(
        tmp.path(),
        &[
            "summarize",
            "--results-dir",
            out.to_str().expect("path str"),
            "--year",
            "2019",
            "--year",
            "2021",
            "--view",
            "yearly",
            "--by",
            "sex",
        ],
    );
    assert!(summary.status.success(), "summarize failed: {summary:?}");
    let text = stdout(&summary);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![
            "Year\tSex\tAvertable DALYs (Disability-Adjusted Life Years)",
            "2019\tFemale\t600",
            "2021\tFemale\t600",
        ]
    );
}

#[test]
fn aggregate_keeps_only_the_requested_year() {
    let tmp = tempdir().expect("temporary directory");
    let raw = "\
measure_name,location_name,sex_name,age_name,cause_name,metric_name,year,val
Deaths,Peru,Female,55+ years,Stroke,Number,2021,250
Deaths,Peru,Female,55+ years,Stroke,Rate,2021,0.5
Deaths,Peru,Female,55+ years,Stroke,Number,2019,240
";
    fs::write(tmp.path().join("IHME-GBD_2021_DATA-1.csv"), raw).expect("write source");

    let output = run_cli(
        tmp.path(),
        &[
            "aggregate",
            "--data-dir",
            tmp.path().to_str().expect("path str"),
            "--year",
            "2021",
        ],
    );
    assert!(output.status.success(), "aggregate failed: {output:?}");

    let aggregated = fs::read_to_string(tmp.path().join("aggregatedGDB_2021.csv"))
        .expect("read aggregated table");
    let lines: Vec<&str> = aggregated.lines().collect();
    assert_eq!(lines[0], "Measure,Location,Sex,Age,Cause,Metric,Value");
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|line| !line.contains("240")));
}

#[test]
fn run_command_processes_every_configured_year() {
    let tmp = tempdir().expect("temporary directory");
    fs::write(tmp.path().join("aggregatedGDB_2021.csv"), AGGREGATED).expect("write table");
    let config = format!(
        "data_dir = {:?}\nyears = [2021]\nmeasures = [\"DALYs\"]\n\n[benchmark.cohort]\nkind = \"locations\"\nnames = [\"Japan\"]\n",
        tmp.path().to_str().expect("path str")
    );
    let config_path = tmp.path().join("run.toml");
    fs::write(&config_path, config).expect("write config");

    let output = run_cli(
        tmp.path(),
        &["run", "--config", config_path.to_str().expect("path str")],
    );
    assert!(output.status.success(), "run failed: {output:?}");
    let written = fs::read_to_string(tmp.path().join("results_aggregatedGDB_2021.csv"))
        .expect("read results");
    assert!(written.starts_with("Location,Sex,Age,Cause,DALYs"));
    assert!(!written.contains("Avertable Deaths"));
}

#[test]
fn version_reports_the_package_version() {
    let tmp = tempdir().expect("temporary directory");
    let output = run_cli(tmp.path(), &["version"]);
    assert!(output.status.success());
    assert!(
        stdout(&output).starts_with(&format!("avertable {}", env!("CARGO_PKG_VERSION")))
    );
}
