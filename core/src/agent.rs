//! The agent store — one typed record per customer segment, versioned per
//! model year.
//!
//! RULE: a year starts from last year's public record and nothing else.
//! Everything a single year's pipeline computes that is not part of the
//! public agent schema lives in `WorkingColumns`, which is reset by
//! `begin_year()` and never serialized.

use crate::{
    error::{ModelError, ModelResult},
    types::{AgentId, AgentKey, GeographyId, Sector, Year},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRecord {
    pub agent_id: AgentId,
    #[serde(flatten)]
    pub key: AgentKey,
    pub year: Year,

    // ── Base schema ───────────────────────────────────────────
    pub customers_in_bin: f64,
    pub developable_frac: f64,
    pub load_kwh_per_customer_in_bin_initial: f64,
    pub load_kwh_per_customer_in_bin: f64,
    pub developable_roof_sqft: f64,
    pub elec_price_usd_per_kwh_initial: f64,
    pub elec_price_usd_per_kwh: f64,
    pub resource_profile: String,

    // ── Financial outcome (per adopter) ───────────────────────
    pub system_kw: f64,
    pub batt_kw: f64,
    pub batt_kwh: f64,
    pub annual_energy_production_kwh: f64,
    pub capacity_factor: f64,
    pub first_year_bill_savings_usd: f64,
    pub npv: f64,
    pub payback_period: f64,
    pub market_share_ceiling: f64,

    // ── Diffusion state ───────────────────────────────────────
    pub developable_customers_in_bin: f64,
    pub market_share_last_year: f64,
    pub market_share: f64,
    pub new_adopters: f64,
    pub number_of_adopters: f64,
    pub system_kw_cum_last_year: f64,
    pub system_kw_cum: f64,
    pub batt_kw_cum_last_year: f64,
    pub batt_kw_cum: f64,
    pub batt_kwh_cum_last_year: f64,
    pub batt_kwh_cum: f64,
    pub total_gen_kwh: f64,
    pub avoided_co2_tonnes: f64,

    #[serde(skip)]
    pub working: WorkingColumns,
}

/// Per-year scratch columns written by the mutation pipeline and the
/// financial engine. Dropped before the next year's pipeline runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkingColumns {
    pub elec_price_escalator: f64,
    pub pv_degradation_rate: f64,
    pub pv_power_density_w_per_sqft: f64,
    pub pv_capex_usd_per_kw: f64,
    pub pv_om_usd_per_kw_yr: f64,
    pub batt_kwh_per_pv_kw: f64,
    pub batt_kw_per_kwh: f64,
    pub batt_round_trip_efficiency: f64,
    pub batt_capex_usd_per_kwh: f64,
    pub batt_capex_usd_per_kw: f64,
    pub batt_om_usd_per_kw_yr: f64,
    pub resiliency_usd_per_kwh_yr: f64,
    pub depreciation_schedule: Vec<f64>,
    pub carbon_t_per_kwh: f64,
    pub wholesale_usd_per_kwh: f64,
    pub financing: Option<FinancingParams>,
    pub inflation_rate: f64,
    pub nem_active: bool,
    pub nem_system_kw_limit: Option<f64>,
    pub cbi_usd_per_kw: f64,
    pub cbi_max_usd: f64,
    pub economic_ceiling: f64,
    pub cash_flow: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinancingParams {
    pub loan_interest_rate: f64,
    pub loan_term_yrs: u32,
    pub down_payment_fraction: f64,
    pub real_discount_rate: f64,
    pub tax_rate: f64,
    pub economic_lifetime_yrs: u32,
    pub itc_fraction: f64,
}

impl AgentRecord {
    /// A fresh agent as it enters the model, before any year is computed.
    pub fn new(agent_id: AgentId, key: AgentKey, seed: AgentSeed) -> Self {
        Self {
            agent_id,
            key,
            year: 0,
            customers_in_bin: seed.customers_in_bin,
            developable_frac: seed.developable_frac,
            load_kwh_per_customer_in_bin_initial: seed.load_kwh_per_customer,
            load_kwh_per_customer_in_bin: seed.load_kwh_per_customer,
            developable_roof_sqft: seed.developable_roof_sqft,
            elec_price_usd_per_kwh_initial: seed.elec_price_usd_per_kwh,
            elec_price_usd_per_kwh: seed.elec_price_usd_per_kwh,
            resource_profile: seed.resource_profile,
            system_kw: 0.0,
            batt_kw: 0.0,
            batt_kwh: 0.0,
            annual_energy_production_kwh: 0.0,
            capacity_factor: 0.0,
            first_year_bill_savings_usd: 0.0,
            npv: 0.0,
            payback_period: 0.0,
            market_share_ceiling: 0.0,
            developable_customers_in_bin: 0.0,
            market_share_last_year: 0.0,
            market_share: 0.0,
            new_adopters: 0.0,
            number_of_adopters: 0.0,
            system_kw_cum_last_year: 0.0,
            system_kw_cum: 0.0,
            batt_kw_cum_last_year: 0.0,
            batt_kw_cum: 0.0,
            batt_kwh_cum_last_year: 0.0,
            batt_kwh_cum: 0.0,
            total_gen_kwh: 0.0,
            avoided_co2_tonnes: 0.0,
            working: WorkingColumns::default(),
        }
    }

    pub fn geography(&self) -> &GeographyId {
        &self.key.geography
    }

    pub fn sector(&self) -> Sector {
        self.key.sector
    }

    pub fn annual_load_kwh(&self) -> f64 {
        self.load_kwh_per_customer_in_bin
    }
}

/// The input-side attributes of an agent (agent file / population generator).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSeed {
    pub customers_in_bin: f64,
    pub developable_frac: f64,
    pub load_kwh_per_customer: f64,
    pub developable_roof_sqft: f64,
    pub elec_price_usd_per_kwh: f64,
    pub resource_profile: String,
}

/// One row of an agent input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInput {
    pub agent_id: AgentId,
    #[serde(flatten)]
    pub key: AgentKey,
    #[serde(flatten)]
    pub seed: AgentSeed,
}

impl From<AgentInput> for AgentRecord {
    fn from(input: AgentInput) -> Self {
        AgentRecord::new(input.agent_id, input.key, input.seed)
    }
}

#[derive(Debug)]
pub struct AgentStore {
    year: Option<Year>,
    agents: Vec<AgentRecord>,
}

impl AgentStore {
    /// Build a store from an input population, validating the base schema.
    pub fn new(agents: Vec<AgentRecord>) -> ModelResult<Self> {
        let mut seen = BTreeSet::new();
        for a in &agents {
            if !seen.insert(a.agent_id) {
                return Err(ModelError::ingestion(
                    "agents",
                    format!("duplicate agent_id {}", a.agent_id),
                ));
            }
            if !(a.customers_in_bin >= 0.0 && a.customers_in_bin.is_finite()) {
                return Err(ModelError::ingestion(
                    "agents",
                    format!("agent {} has invalid customers_in_bin", a.agent_id),
                ));
            }
            if !(0.0..=1.0).contains(&a.developable_frac) {
                return Err(ModelError::ingestion(
                    "agents",
                    format!("agent {} developable_frac outside [0, 1]", a.agent_id),
                ));
            }
        }
        Ok(Self { year: None, agents })
    }

    /// The model year the records currently describe, if any.
    pub fn year(&self) -> Option<Year> {
        self.year
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn agents(&self) -> &[AgentRecord] {
        &self.agents
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentRecord> {
        self.agents.iter()
    }

    /// Move the store onto `year`: stamp every record and drop the
    /// previous year's working columns.
    pub fn begin_year(&mut self, year: Year) {
        for a in &mut self.agents {
            a.year = year;
            a.working = WorkingColumns::default();
        }
        self.year = Some(year);
    }

    /// Apply a fallible row-wise transform to every record in order.
    pub fn on_rows<F>(&mut self, mut transform: F) -> ModelResult<()>
    where
        F: FnMut(&mut AgentRecord) -> ModelResult<()>,
    {
        for a in &mut self.agents {
            transform(a)?;
        }
        Ok(())
    }

    pub(crate) fn agents_mut(&mut self) -> &mut [AgentRecord] {
        &mut self.agents
    }

    /// Sum of `(developable customers)` per geography × sector.
    pub fn developable_by_segment(&self) -> BTreeMap<(GeographyId, Sector), f64> {
        let mut totals = BTreeMap::new();
        for a in &self.agents {
            *totals
                .entry((a.key.geography.clone(), a.key.sector))
                .or_insert(0.0) += a.developable_customers_in_bin;
        }
        totals
    }

    /// Restore a store from persisted records (e.g. a year snapshot).
    pub fn from_records(year: Year, agents: Vec<AgentRecord>) -> ModelResult<Self> {
        let mut store = Self::new(agents)?;
        store.year = Some(year);
        Ok(store)
    }

    pub fn into_records(self) -> Vec<AgentRecord> {
        self.agents
    }
}
