//! adoption-runner: headless runner for one diffusion scenario.
//!
//! Usage:
//!   adoption-runner --data-dir ./scenario --db scenario.db
//!   adoption-runner --data-dir ./scenario --workers 4 --keep-workspace --json

use adoption_core::{
    config::ScenarioInputs,
    event::LogSink,
    store::ScenarioStore,
    workspace::{run_scenario, RunRequest, RunSummary},
};
use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(serde::Serialize)]
struct YearLine {
    year: u32,
    new_adopters: f64,
    number_of_adopters: f64,
    system_kw_cum: f64,
    system_kw_added: f64,
}

#[derive(serde::Serialize)]
struct SummaryJson {
    run_id: String,
    schema: String,
    finished_at: String,
    years: Vec<YearLine>,
    nem_sunsets: Vec<(String, u32)>,
    snapshots: Vec<PathBuf>,
    retained_workspace: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let data_dir = arg_value(&args, "--data-dir").unwrap_or("./scenario");
    let db = arg_value(&args, "--db").unwrap_or(":memory:");
    let json = args.iter().any(|a| a == "--json");

    let mut inputs = ScenarioInputs::load(data_dir)?;
    inputs.settings.chunk_workers = parse_arg(&args, "--workers", inputs.settings.chunk_workers);
    if args.iter().any(|a| a == "--keep-workspace") {
        inputs.settings.delete_output_schema = false;
    }
    if let Some(dir) = arg_value(&args, "--workspace-dir") {
        inputs.settings.workspace_dir = Some(PathBuf::from(dir));
    }
    if let Some(dir) = arg_value(&args, "--output-dir") {
        inputs.settings.output_dir = PathBuf::from(dir);
    }

    if !json {
        println!("adoption-runner");
        println!("  scenario:  {}", inputs.context.scenario_name);
        println!("  data_dir:  {data_dir}");
        println!("  db:        {db}");
        println!("  years:     {:?}", inputs.context.model_years);
        println!("  workers:   {}", inputs.settings.chunk_workers);
        println!();
    }

    let store = if db == ":memory:" {
        ScenarioStore::in_memory()?
    } else {
        ScenarioStore::open(db)?
    };
    store.migrate()?;
    store.seed_starting_capacities(&inputs.starting_capacities)?;

    let summary = run_scenario(store, RunRequest::with_profile_simulator(inputs), &LogSink)?;
    log::info!("run {} finished: {} model years", summary.run_id, summary.years_completed());

    if json {
        println!("{}", serde_json::to_string_pretty(&to_json(&summary))?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("=== Run {} ===", summary.run_id);
    println!("{:>6} {:>14} {:>14} {:>14} {:>14}", "year", "new", "adopters", "kW", "kW added");
    for y in &summary.years {
        println!(
            "{:>6} {:>14.1} {:>14.1} {:>14.1} {:>14.1}",
            y.year, y.new_adopters, y.number_of_adopters, y.system_kw_cum, y.system_kw_added
        );
    }
    for (geo, year) in &summary.nem_sunsets {
        println!("net metering sunset: {geo} in {year}");
    }
    if let Some(path) = &summary.retained_workspace {
        println!("workspace kept at {}", path.display());
    }
}

fn to_json(summary: &RunSummary) -> SummaryJson {
    SummaryJson {
        run_id: summary.run_id.clone(),
        schema: summary.schema.clone(),
        finished_at: chrono::Utc::now().to_rfc3339(),
        years: summary
            .years
            .iter()
            .map(|y| YearLine {
                year: y.year,
                new_adopters: y.new_adopters,
                number_of_adopters: y.number_of_adopters,
                system_kw_cum: y.system_kw_cum,
                system_kw_added: y.system_kw_added,
            })
            .collect(),
        nem_sunsets: summary.nem_sunsets.clone(),
        snapshots: summary.snapshots.clone(),
        retained_workspace: summary.retained_workspace.clone(),
    }
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
