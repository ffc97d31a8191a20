//! Year snapshots: what a completed year leaves on disk.

use adoption_core::{
    agent::AgentStore,
    config::ScenarioInputs,
    diffusion::{aggregate_capacity, MarketLastYear},
    engine::DiffusionModel,
    nem::NetMeteringPolicy,
    performance::ProfileSimulator,
    reference::{ReferenceTables, StartingCapacities},
    snapshot,
};

fn model<'a>(inputs: &'a ScenarioInputs, simulator: &'a ProfileSimulator) -> DiffusionModel<'a> {
    let refs = ReferenceTables::index(&inputs.reference).expect("index reference tables");
    let nem = NetMeteringPolicy::new(
        &inputs.reference.nem_state_limits,
        &inputs.reference.nem_sector_limits,
    )
    .expect("net metering policy");
    let starting = StartingCapacities::new(inputs.starting_capacities.clone()).expect("starting capacities");
    DiffusionModel::new(&inputs.context, &inputs.settings, refs, nem, starting, simulator)
}

#[test]
fn snapshot_restores_the_public_state() {
    let dir = tempfile::tempdir().expect("temp dir");
    let inputs = ScenarioInputs::default_test();
    let mut store = AgentStore::new(inputs.agents).expect("agent store");
    store.begin_year(2022);
    store
        .on_rows(|a| {
            a.market_share = 0.125;
            a.number_of_adopters = a.customers_in_bin * a.developable_frac * 0.125;
            a.npv = -1.0 / 3.0;
            a.working.economic_ceiling = 0.9;
            Ok(())
        })
        .unwrap();

    let path = snapshot::write_year(dir.path(), "test_scenario", &store).expect("write snapshot");
    assert_eq!(path, snapshot::snapshot_path(dir.path(), 2022));
    assert!(path.ends_with("agent_df_2022.json"));

    let restored = snapshot::read_year(&path).expect("read snapshot");
    assert_eq!(restored.year(), Some(2022));
    assert_eq!(restored.len(), store.len());
    for (before, after) in store.iter().zip(restored.iter()) {
        assert_eq!(before.agent_id, after.agent_id);
        assert_eq!(before.npv.to_bits(), after.npv.to_bits());
        assert_eq!(before.number_of_adopters, after.number_of_adopters);
        assert_eq!(before.key, after.key);
        // Working columns are never written.
        assert_eq!(after.working.economic_ceiling, 0.0);
    }
}

#[test]
fn snapshot_json_has_no_working_columns() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut store = AgentStore::new(ScenarioInputs::default_test().agents).expect("agent store");
    store.begin_year(2020);
    let path = snapshot::write_year(dir.path(), "test_scenario", &store).expect("write snapshot");

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(json["scenario_name"], "test_scenario");
    assert_eq!(json["year"], 2020);
    let first = &json["agents"][0];
    assert!(first.get("working").is_none());
    assert!(first.get("economic_ceiling").is_none());
    assert_eq!(first["geography"], "CA");
    assert_eq!(first["sector"], "residential");
}

#[test]
fn reading_a_missing_snapshot_fails() {
    let dir = tempfile::tempdir().expect("temp dir");
    assert!(snapshot::read_year(&snapshot::snapshot_path(dir.path(), 2030)).is_err());
}

#[test]
fn reloaded_snapshot_continues_like_the_live_store() {
    let dir = tempfile::tempdir().expect("temp dir");
    let inputs = ScenarioInputs::default_test();
    let simulator = ProfileSimulator::new(inputs.resource_profiles.clone().into_iter().collect());

    let mut live_model = model(&inputs, &simulator);
    let mut live = AgentStore::new(inputs.agents.clone()).expect("agent store");
    live_model.compute_year(&mut live, 2020).expect("year 2020");

    let path = snapshot::write_year(dir.path(), "test_scenario", &live).expect("write snapshot");
    let mut reloaded = snapshot::read_year(&path).expect("read snapshot");
    let carry = live_model.carry().expect("carry after 2020");
    assert_eq!(MarketLastYear::capture(&reloaded), carry.market);
    assert_eq!(aggregate_capacity(&reloaded), carry.capacity);

    // A second model at the same point, continuing from the reloaded rows.
    let mut resumed_model = model(&inputs, &simulator);
    let mut scratch = AgentStore::new(inputs.agents.clone()).expect("agent store");
    resumed_model.compute_year(&mut scratch, 2020).expect("year 2020");
    assert_eq!(resumed_model.carry(), live_model.carry());

    let live_next = live_model.compute_year(&mut live, 2022).expect("live 2022");
    let resumed_next = resumed_model.compute_year(&mut reloaded, 2022).expect("resumed 2022");
    assert_eq!(live_next, resumed_next);
    assert_eq!(live.agents(), reloaded.agents());
}
