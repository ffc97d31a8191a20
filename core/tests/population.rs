//! Synthetic population generation.

use adoption_core::{
    error::ErrorKind,
    population::{PopulationSpec, SegmentSpec},
    types::Sector,
};

fn segment(geography: &str, sector: Sector, customers: f64) -> SegmentSpec {
    SegmentSpec {
        geography: geography.into(),
        sector,
        building_type: "single_family".into(),
        total_customers: customers,
        developable_frac_min: 0.3,
        developable_frac_max: 0.6,
        load_kwh_per_customer: 9_000.0,
        roof_sqft_per_customer: 600.0,
        spread: 0.25,
        elec_price_usd_per_kwh: 0.18,
        resource_profile: "sunny".into(),
    }
}

fn spec() -> PopulationSpec {
    PopulationSpec {
        bins_per_segment: 4,
        segments: vec![
            segment("CA", Sector::Residential, 40_000.0),
            segment("NY", Sector::Commercial, 2_000.0),
        ],
    }
}

#[test]
fn same_seed_generates_identical_agents() {
    let a = spec().generate(42).unwrap();
    let b = spec().generate(42).unwrap();
    assert_eq!(a, b);
}

#[test]
fn different_seeds_generate_different_agents() {
    let a = spec().generate(42).unwrap();
    let b = spec().generate(99).unwrap();
    assert!(
        a.iter().zip(&b).any(|(x, y)| x.developable_frac != y.developable_frac),
        "different seeds produced identical agents; the seed is not being used"
    );
}

#[test]
fn bins_split_customers_and_ids_are_sequential() {
    let agents = spec().generate(7).unwrap();
    assert_eq!(agents.len(), 8);
    let ids: Vec<u64> = agents.iter().map(|a| a.agent_id).collect();
    assert_eq!(ids, (1..=8).collect::<Vec<_>>());

    let ca_total: f64 = agents
        .iter()
        .filter(|a| a.geography() == "CA")
        .map(|a| a.customers_in_bin)
        .sum();
    assert!((ca_total - 40_000.0).abs() < 1e-6);

    for a in &agents {
        assert!((0.3..0.6).contains(&a.developable_frac), "agent {}", a.agent_id);
        assert!((6_750.0..=11_250.0).contains(&a.load_kwh_per_customer_in_bin));
        assert_eq!(a.load_kwh_per_customer_in_bin, a.load_kwh_per_customer_in_bin_initial);
        assert_eq!(a.year, 0);
        assert_eq!(a.number_of_adopters, 0.0);
    }
}

#[test]
fn appending_a_segment_keeps_earlier_agents() {
    let base = spec().generate(42).unwrap();
    let mut extended = spec();
    extended.segments.push(segment("TX", Sector::Industrial, 500.0));
    let longer = extended.generate(42).unwrap();

    assert_eq!(longer.len(), base.len() + 4);
    assert_eq!(&longer[..base.len()], &base[..]);
}

#[test]
fn invalid_segments_are_configuration_errors() {
    let mut zero_bins = spec();
    zero_bins.bins_per_segment = 0;
    assert_eq!(zero_bins.generate(1).unwrap_err().kind(), ErrorKind::Configuration);

    let mut inverted = spec();
    inverted.segments[0].developable_frac_min = 0.8;
    assert_eq!(inverted.generate(1).unwrap_err().kind(), ErrorKind::Configuration);

    let mut negative = spec();
    negative.segments[1].total_customers = -1.0;
    assert_eq!(negative.validate().unwrap_err().kind(), ErrorKind::Configuration);
}
