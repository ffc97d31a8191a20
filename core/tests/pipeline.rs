//! Mutation pipeline: stage order and per-year attribute transforms.

use adoption_core::{
    agent::{AgentRecord, AgentStore},
    config::ScenarioInputs,
    engine::DiffusionModel,
    error::{ErrorKind, ModelError, ModelResult},
    mutation::{MutationPipeline, MutationStage, YearContext},
    nem::NetMeteringPolicy,
    performance::ProfileSimulator,
    reference::{ReferenceTables, StartingCapacities},
    types::{Sector, Technology, Year},
};

struct Fixture {
    inputs: ScenarioInputs,
    refs: ReferenceTables,
    nem: NetMeteringPolicy,
}

impl Fixture {
    fn new() -> Self {
        Self::from_inputs(ScenarioInputs::default_test())
    }

    fn from_inputs(inputs: ScenarioInputs) -> Self {
        let refs = ReferenceTables::index(&inputs.reference).expect("index reference tables");
        let nem = NetMeteringPolicy::new(
            &inputs.reference.nem_state_limits,
            &inputs.reference.nem_sector_limits,
        )
        .unwrap();
        Self { inputs, refs, nem }
    }

    fn ctx(&self, year: Year) -> YearContext<'_> {
        YearContext {
            year,
            first_year: 2020,
            technology: Technology::Solar,
            refs: &self.refs,
            nem: &self.nem,
        }
    }

    fn run(&self, pipeline: &MutationPipeline, year: Year) -> ModelResult<AgentStore> {
        let mut store = AgentStore::new(self.inputs.agents.clone())?;
        store.begin_year(year);
        pipeline.apply(&mut store, &self.ctx(year))?;
        Ok(store)
    }
}

fn find(store: &AgentStore, geo: &str, sector: Sector) -> AgentRecord {
    store
        .iter()
        .find(|a| a.geography() == geo && a.sector() == sector)
        .cloned()
        .unwrap()
}

#[test]
fn standard_stages_run_in_documented_order() {
    assert_eq!(
        MutationPipeline::standard().stage_names(),
        vec![
            "load_growth",
            "export_tariff",
            "elec_price_escalation",
            "technology_performance",
            "technology_prices",
            "value_of_resiliency",
            "depreciation",
            "carbon_intensity",
            "wholesale_prices",
            "financing_terms",
            "state_incentives",
        ]
    );
}

#[test]
fn retail_price_follows_the_index() {
    let fx = Fixture::new();
    let store = fx.run(&MutationPipeline::standard(), 2030).unwrap();
    let a = find(&store, "CA", Sector::Residential);

    assert!((a.elec_price_usd_per_kwh - a.elec_price_usd_per_kwh_initial * 1.2).abs() < 1e-12);
    let expected = (1.4f64 / 1.2).powf(1.0 / 10.0) - 1.0;
    assert!((a.working.elec_price_escalator - expected).abs() < 1e-12);
}

#[test]
fn first_year_price_is_the_initial_price() {
    let fx = Fixture::new();
    let store = fx.run(&MutationPipeline::standard(), 2020).unwrap();
    for a in store.iter() {
        assert_eq!(a.elec_price_usd_per_kwh, a.elec_price_usd_per_kwh_initial);
        assert!(a.working.elec_price_escalator > 0.0);
    }
}

#[test]
fn load_grows_from_the_initial_load() {
    let fx = Fixture::new();
    let store = fx.run(&MutationPipeline::standard(), 2024).unwrap();
    for a in store.iter() {
        assert!((a.load_kwh_per_customer_in_bin - a.load_kwh_per_customer_in_bin_initial * 1.04).abs() < 1e-9);
    }
}

#[test]
fn only_businesses_depreciate() {
    let fx = Fixture::new();
    let store = fx.run(&MutationPipeline::standard(), 2022).unwrap();
    for a in store.iter() {
        match a.sector() {
            Sector::Residential => assert!(a.working.depreciation_schedule.is_empty()),
            _ => assert_eq!(a.working.depreciation_schedule.len(), 6),
        }
    }
}

#[test]
fn incentives_apply_only_inside_their_window() {
    let fx = Fixture::new();
    let during = fx.run(&MutationPipeline::standard(), 2022).unwrap();
    let after = fx.run(&MutationPipeline::standard(), 2024).unwrap();

    let ny = find(&during, "NY", Sector::Residential);
    assert_eq!(ny.working.cbi_usd_per_kw, 200.0);
    assert_eq!(ny.working.cbi_max_usd, 2_000.0);
    assert_eq!(find(&during, "CA", Sector::Residential).working.cbi_usd_per_kw, 0.0);
    assert_eq!(find(&after, "NY", Sector::Residential).working.cbi_usd_per_kw, 0.0);
}

#[test]
fn export_tariff_tracks_the_sunset() {
    let fx = Fixture::new();
    let before = fx.run(&MutationPipeline::standard(), 2024).unwrap();
    let after = fx.run(&MutationPipeline::standard(), 2030).unwrap();

    let ny = find(&before, "NY", Sector::Residential);
    assert!(ny.working.nem_active);
    assert_eq!(ny.working.nem_system_kw_limit, Some(12.0));

    let ny = find(&after, "NY", Sector::Residential);
    assert!(!ny.working.nem_active);
    assert_eq!(ny.working.nem_system_kw_limit, None);
}

#[test]
fn resiliency_defaults_to_zero() {
    let fx = Fixture::new();
    let store = fx.run(&MutationPipeline::standard(), 2020).unwrap();
    assert_eq!(find(&store, "CA", Sector::Residential).working.resiliency_usd_per_kwh_yr, 15.0);
    assert_eq!(find(&store, "NY", Sector::Commercial).working.resiliency_usd_per_kwh_yr, 0.0);
}

#[test]
fn missing_reference_row_names_the_stage() {
    let mut inputs = ScenarioInputs::default_test();
    inputs.reference.wholesale_prices.retain(|r| r.geography != "NY");
    let fx = Fixture::from_inputs(inputs);

    let err = fx.run(&MutationPipeline::standard(), 2020).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Computation);
    let message = err.to_string();
    assert!(message.contains("wholesale_prices") && message.contains("2020"), "{message}");
}

#[test]
fn reference_lookup_before_the_first_point_fails() {
    let fx = Fixture::new();
    let err = fx.run(&MutationPipeline::standard(), 2015).unwrap_err();
    assert!(err.to_string().contains("load_growth"), "{err}");
}

struct Halt;

impl MutationStage for Halt {
    fn name(&self) -> &'static str {
        "halt"
    }

    fn apply_row(&self, agent: &mut AgentRecord, _ctx: &YearContext<'_>) -> ModelResult<()> {
        Err(anyhow::anyhow!("agent {} rejected", agent.agent_id).into())
    }
}

struct Touch;

impl MutationStage for Touch {
    fn name(&self) -> &'static str {
        "touch"
    }

    fn apply_row(&self, agent: &mut AgentRecord, _ctx: &YearContext<'_>) -> ModelResult<()> {
        agent.working.carbon_t_per_kwh = 1.0;
        Ok(())
    }
}

#[test]
fn failing_stage_stops_the_pipeline() {
    let fx = Fixture::new();
    let mut pipeline = MutationPipeline::new();
    pipeline.register(Box::new(Halt));
    pipeline.register(Box::new(Touch));
    assert_eq!(pipeline.stage_names(), vec!["halt", "touch"]);

    let mut store = AgentStore::new(fx.inputs.agents.clone()).expect("agent store");
    store.begin_year(2020);
    let err = pipeline.apply(&mut store, &fx.ctx(2020)).unwrap_err();

    match &err {
        ModelError::Computation { stage, year, .. } => {
            assert_eq!(*stage, "halt");
            assert_eq!(*year, 2020);
        }
        other => panic!("expected a computation error, got {other:?}"),
    }
    assert!(store.iter().all(|a| a.working.carbon_t_per_kwh == 0.0), "later stages must not run");
}

#[test]
fn driver_runs_the_registered_pipeline() {
    let fx = Fixture::new();
    let simulator = ProfileSimulator::new(fx.inputs.resource_profiles.clone().into_iter().collect());
    let starting = StartingCapacities::new(fx.inputs.starting_capacities.clone()).expect("starting capacities");
    let mut pipeline = MutationPipeline::new();
    pipeline.register(Box::new(Halt));

    let mut model = DiffusionModel::new(
        &fx.inputs.context,
        &fx.inputs.settings,
        fx.refs.clone(),
        fx.nem.clone(),
        starting,
        &simulator,
    )
    .with_pipeline(pipeline);
    let mut store = AgentStore::new(fx.inputs.agents.clone()).expect("agent store");

    let err = model.compute_year(&mut store, 2020).unwrap_err();
    assert!(
        matches!(err, ModelError::Computation { stage: "halt", year: 2020, .. }),
        "{err:?}"
    );
    assert!(model.carry().is_none(), "a failed year hands nothing forward");
}
