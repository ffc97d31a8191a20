//! Bass diffusion: the per-agent step and the seeded first year.

use adoption_core::{
    agent::{AgentRecord, AgentSeed, AgentStore},
    config::ScenarioInputs,
    diffusion::{step, AgentCarry, DiffusionEngine, DiffusionInput, MarketLastYear},
    engine::DiffusionModel,
    error::ErrorKind,
    nem::NetMeteringPolicy,
    performance::ProfileSimulator,
    reference::{MarketShareRow, ReferenceTables, StartingCapacities, StartingCapacityRow},
    types::{AgentKey, Sector},
};

fn resident(customers: f64) -> AgentRecord {
    AgentRecord::new(
        1,
        AgentKey {
            geography: "CA".into(),
            sector: Sector::Residential,
            building_type: "single_family".into(),
            bin: 0,
        },
        AgentSeed {
            customers_in_bin: customers,
            developable_frac: 1.0,
            load_kwh_per_customer: 9_000.0,
            developable_roof_sqft: 600.0,
            elec_price_usd_per_kwh: 0.18,
            resource_profile: "sunny".into(),
        },
    )
}

fn single_agent(customers: f64, ceiling: f64, system_kw: f64) -> AgentRecord {
    let mut a = resident(customers);
    a.year = 2021;
    a.developable_customers_in_bin = customers;
    a.working.economic_ceiling = ceiling;
    a.system_kw = system_kw;
    a
}

fn carry(share: f64, adopters: f64, kw: f64) -> AgentCarry {
    AgentCarry {
        market_share: share,
        number_of_adopters: adopters,
        system_kw_cum: kw,
        batt_kw_cum: 0.0,
        batt_kwh_cum: 0.0,
    }
}

#[test]
fn bass_step_moves_share_toward_ceiling() {
    let mut a = single_agent(1_000.0, 0.5, 5.0);
    step(&mut a, &carry(0.05, 50.0, 250.0), 0.03, 0.38);

    // d = 0.03 + 0.38 * 0.05 = 0.049; s = 0.05 + 0.049 * 0.45
    let expected = 0.05 + 0.049 * 0.45;
    assert!((a.market_share - expected).abs() < 1e-12, "share {}", a.market_share);
    assert!(a.market_share > 0.05 && a.market_share < 0.5);
    assert!(a.new_adopters <= 500.0);
    assert!((a.new_adopters - (expected - 0.05) * 1_000.0).abs() < 1e-9);
    assert!((a.number_of_adopters - 50.0 - a.new_adopters).abs() < 1e-9);
    assert_eq!(a.market_share_last_year, 0.05);
    assert_eq!(a.system_kw_cum_last_year, 250.0);
    assert!((a.system_kw_cum - (250.0 + a.new_adopters * 5.0)).abs() < 1e-9);
}

#[test]
fn falling_ceiling_holds_last_share() {
    let mut a = single_agent(1_000.0, 0.03, 5.0);
    step(&mut a, &carry(0.05, 50.0, 250.0), 0.03, 0.38);

    assert_eq!(a.market_share, 0.05);
    assert_eq!(a.new_adopters, 0.0);
    assert_eq!(a.number_of_adopters, 50.0);
    assert_eq!(a.system_kw_cum, 250.0);
    // The reported ceiling never sits below the share already reached.
    assert_eq!(a.market_share_ceiling, 0.05);
}

#[test]
fn adopters_never_exceed_customers() {
    let mut a = single_agent(100.0, 1.0, 4.0);
    step(&mut a, &carry(0.9, 99.0, 396.0), 0.5, 1.0);

    assert_eq!(a.market_share, 1.0);
    assert_eq!(a.number_of_adopters, 100.0);
    assert_eq!(a.new_adopters, 1.0);
}

#[test]
fn zero_coefficients_produce_no_adoption() {
    let mut a = single_agent(1_000.0, 0.5, 5.0);
    step(&mut a, &carry(0.0, 0.0, 0.0), 0.0, 0.0);
    assert_eq!(a.market_share, 0.0);
    assert_eq!(a.new_adopters, 0.0);
}

fn seeded_store(inputs: &ScenarioInputs) -> AgentStore {
    let mut store = AgentStore::new(inputs.agents.clone()).expect("agent store");
    store.begin_year(2020);
    store
}

#[test]
fn first_year_distributes_the_starting_base() {
    let inputs = ScenarioInputs::default_test();
    let refs = ReferenceTables::index(&inputs.reference).expect("index reference tables");
    let starting = StartingCapacities::new(inputs.starting_capacities.clone()).expect("starting capacities");
    let mut store = seeded_store(&inputs);

    let market = DiffusionEngine::new(&refs)
        .diffuse(&mut store, DiffusionInput::Seeded(&starting))
        .unwrap();

    for row in &inputs.starting_capacities {
        let (adopters, kw): (f64, f64) = store
            .iter()
            .filter(|a| *a.geography() == row.geography && a.sector() == row.sector)
            .fold((0.0, 0.0), |(n, kw), a| (n + a.number_of_adopters, kw + a.system_kw_cum));
        assert!((adopters - row.number_of_adopters).abs() < 1e-9, "{}/{}", row.geography, row.sector);
        assert!((kw - row.system_kw_cum).abs() < 1e-9);
    }
    for a in store.iter() {
        assert_eq!(a.new_adopters, 0.0);
        assert_eq!(a.market_share_last_year, a.market_share);
        assert_eq!(a.system_kw_cum_last_year, a.system_kw_cum);
        assert!(a.market_share <= a.market_share_ceiling);
        assert_eq!(a.developable_customers_in_bin, a.customers_in_bin * a.developable_frac);
    }
    assert_eq!(market.year, 2020);
    assert_eq!(market.by_agent.len(), store.len());
}

#[test]
fn missing_carry_fails_in_the_diffusion_stage() {
    let inputs = ScenarioInputs::default_test();
    let refs = ReferenceTables::index(&inputs.reference).expect("index reference tables");
    let mut store = seeded_store(&inputs);

    let empty = MarketLastYear {
        year: 2019,
        ..MarketLastYear::default()
    };
    let err = DiffusionEngine::new(&refs)
        .diffuse(&mut store, DiffusionInput::Diffusing(&empty))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Computation);
    assert!(err.to_string().contains("diffusion"), "{err}");
}

/// One Californian residential segment of 1000 customers: p = 0.03,
/// q = 0.38, a flat 0.50 ceiling and 50 seeded adopters (share 0.05).
fn two_year_scenario() -> ScenarioInputs {
    let mut inputs = ScenarioInputs::default_test();
    inputs.context.sectors = vec![Sector::Residential];
    inputs.context.model_years = vec![2020, 2021];
    inputs.agents = vec![resident(1_000.0)];

    let reference = &mut inputs.reference;
    for row in &mut reference.bass_params {
        if row.geography == "CA" && row.sector == Sector::Residential {
            row.p = 0.03;
            row.q = 0.38;
        }
    }
    reference.max_market_share.retain(|r| r.sector != Sector::Residential);
    reference.max_market_share.push(MarketShareRow {
        sector: Sector::Residential,
        payback_period: 0.0,
        max_market_share: 0.5,
    });
    inputs.starting_capacities = vec![StartingCapacityRow {
        geography: "CA".into(),
        sector: Sector::Residential,
        system_kw_cum: 250.0,
        batt_kw_cum: 0.0,
        batt_kwh_cum: 0.0,
        number_of_adopters: 50.0,
    }];
    inputs
}

#[test]
fn two_year_run_moves_share_toward_the_ceiling() {
    let inputs = two_year_scenario();
    let simulator = ProfileSimulator::new(inputs.resource_profiles.clone().into_iter().collect());
    let refs = ReferenceTables::index(&inputs.reference).expect("index reference tables");
    let nem = NetMeteringPolicy::new(
        &inputs.reference.nem_state_limits,
        &inputs.reference.nem_sector_limits,
    )
    .expect("net metering policy");
    let starting = StartingCapacities::new(inputs.starting_capacities.clone()).expect("starting capacities");
    let mut model = DiffusionModel::new(&inputs.context, &inputs.settings, refs, nem, starting, &simulator);
    let mut store = AgentStore::new(inputs.agents.clone()).expect("agent store");

    let seeded = model.compute_year(&mut store, 2020).expect("seeded year");
    assert!(seeded.first_year);
    assert_eq!(seeded.new_adopters, 0.0);
    assert_eq!(seeded.system_kw_added, 250.0, "the whole base counts as added in the first year");
    assert_eq!(store.agents()[0].market_share, 0.05);

    let year = model.compute_year(&mut store, 2021).expect("second year");
    let a = &store.agents()[0];
    let expected = 0.05 + 0.049 * 0.45;
    assert!(!year.first_year);
    assert!(a.market_share > 0.05 && a.market_share < 0.5, "share {}", a.market_share);
    assert!((a.market_share - expected).abs() < 1e-12, "share {}", a.market_share);
    assert_eq!(a.market_share_last_year, 0.05);
    assert_eq!(a.market_share_ceiling, 0.5);
    assert!(year.new_adopters <= 500.0);
    assert!((year.new_adopters - (expected - 0.05) * 1_000.0).abs() < 1e-9);
    assert!(year.system_kw_added > 0.0);
    assert!((year.system_kw_cum - (seeded.system_kw_cum + year.system_kw_added)).abs() < 1e-9);
    assert_eq!(model.nem().sunset_year(&"CA".into()), None, "CA stays under its cap");
    assert_eq!(model.carry().map(|c| c.market.year), Some(2021));
}
