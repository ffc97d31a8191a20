//! Invariants every agent must hold in every model year.

use adoption_core::{
    agent::AgentRecord,
    config::ScenarioInputs,
    event::LogSink,
    snapshot,
    store::ScenarioStore,
    types::HOURS_PER_YEAR,
    workspace::{run_scenario, RunRequest, RunSummary},
};
use std::collections::BTreeMap;

const EPS: f64 = 1e-9;

fn run(out: &std::path::Path) -> (RunSummary, Vec<Vec<AgentRecord>>) {
    let mut inputs = ScenarioInputs::default_test();
    inputs.settings.write_annual_agents = true;
    inputs.settings.output_dir = out.to_path_buf();

    let store = ScenarioStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store.seed_starting_capacities(&inputs.starting_capacities).expect("seed starting capacities");
    let summary = run_scenario(store, RunRequest::with_profile_simulator(inputs), &LogSink).expect("scenario run");
    let years = summary
        .snapshots
        .iter()
        .map(|path| snapshot::read_year(path).expect("read snapshot").into_records())
        .collect();
    (summary, years)
}

#[test]
fn every_year_respects_bounds() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (_, years) = run(dir.path());
    assert_eq!(years.len(), 3);

    for agents in &years {
        for a in agents {
            let id = a.agent_id;
            assert!(a.new_adopters >= 0.0, "agent {id} negative new adopters");
            assert!(a.number_of_adopters >= 0.0);
            assert!(a.number_of_adopters <= a.customers_in_bin + EPS, "agent {id} over population");
            assert!((0.0..=1.0).contains(&a.market_share));
            assert!(a.market_share <= a.market_share_ceiling + EPS, "agent {id} above its ceiling");
            assert!(a.market_share_last_year <= a.market_share + EPS);
            assert!(a.system_kw_cum >= a.system_kw_cum_last_year - EPS);
            assert!(a.system_kw_cum >= 0.0 && a.batt_kw_cum >= 0.0 && a.batt_kwh_cum >= 0.0);
            let expected_gen = a.system_kw_cum * HOURS_PER_YEAR * a.capacity_factor;
            assert!((a.total_gen_kwh - expected_gen).abs() <= 1e-6 * expected_gen.max(1.0));
            assert!(a.avoided_co2_tonnes >= 0.0);
        }
    }
}

#[test]
fn cumulative_state_never_decreases() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (_, years) = run(dir.path());

    for pair in years.windows(2) {
        let before: BTreeMap<u64, &AgentRecord> = pair[0].iter().map(|a| (a.agent_id, a)).collect();
        for a in &pair[1] {
            let prev = before[&a.agent_id];
            assert!(a.number_of_adopters >= prev.number_of_adopters - EPS, "agent {}", a.agent_id);
            assert!(a.market_share >= prev.market_share - EPS);
            assert!(a.system_kw_cum >= prev.system_kw_cum - EPS);
            assert_eq!(a.market_share_last_year, prev.market_share, "carry-forward of agent {}", a.agent_id);
            assert_eq!(a.system_kw_cum_last_year, prev.system_kw_cum);
            assert!(
                (a.number_of_adopters - prev.number_of_adopters - a.new_adopters).abs() < 1e-6,
                "adopters must add up for agent {}",
                a.agent_id
            );
            assert_eq!(a.customers_in_bin, prev.customers_in_bin);
        }
    }
}

#[test]
fn first_year_has_no_new_adopters() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (summary, years) = run(dir.path());

    assert!(years[0].iter().all(|a| a.new_adopters == 0.0));
    assert!(summary.years[0].first_year);
    assert_eq!(summary.years[0].new_adopters, 0.0);
    assert!(summary.years[1..].iter().all(|y| !y.first_year));
    assert!(
        summary.years.iter().skip(1).any(|y| y.new_adopters > 0.0),
        "diffusion must add adopters after the first year"
    );
}

#[test]
fn summary_totals_match_the_agents() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (summary, years) = run(dir.path());

    for (result, agents) in summary.years.iter().zip(&years) {
        let adopters: f64 = agents.iter().map(|a| a.number_of_adopters).sum();
        let kw: f64 = agents.iter().map(|a| a.system_kw_cum).sum();
        assert!((result.number_of_adopters - adopters).abs() < 1e-6);
        assert!((result.system_kw_cum - kw).abs() < 1e-6);
        assert!(agents.iter().all(|a| a.year == result.year));
    }
}
