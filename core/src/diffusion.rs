//! Diffusion engine — bounded Bass diffusion of adopters.
//!
//! STATES per agent-year:
//!   Seeded    (first model year)  market share and adopters come straight
//!                                 from the starting-capacity baseline.
//!   Diffusing (every later year)  s_t = max(s_{t-1}, min(c_t, s_{t-1} + d·(c_t − s_{t-1})))
//!                                 with d = clamp(p + q·s_{t-1}, 0, 1).
//!
//! The returned `MarketLastYear` is the only thing year t hands to year
//! t+1. Years therefore run strictly in order, never concurrently.

use crate::{
    agent::{AgentRecord, AgentStore},
    error::{ModelError, ModelResult},
    nem::{CapacitySnapshot, GeographyCapacity},
    reference::{ReferenceTables, StartingCapacities},
    types::{AgentId, GeographyId, Sector, Year, HOURS_PER_YEAR},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DIFFUSION_STAGE: &str = "diffusion";

/// Last year's market state of one agent lineage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentCarry {
    pub market_share: f64,
    pub number_of_adopters: f64,
    pub system_kw_cum: f64,
    pub batt_kw_cum: f64,
    pub batt_kwh_cum: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketLastYear {
    pub year: Year,
    pub by_agent: BTreeMap<AgentId, AgentCarry>,
}

impl MarketLastYear {
    /// Capture the carry-forward state from a diffused store.
    pub fn capture(agents: &AgentStore) -> Self {
        let by_agent = agents
            .iter()
            .map(|a| {
                (
                    a.agent_id,
                    AgentCarry {
                        market_share: a.market_share,
                        number_of_adopters: a.number_of_adopters,
                        system_kw_cum: a.system_kw_cum,
                        batt_kw_cum: a.batt_kw_cum,
                        batt_kwh_cum: a.batt_kwh_cum,
                    },
                )
            })
            .collect();
        Self {
            year: agents.year().unwrap_or_default(),
            by_agent,
        }
    }
}

/// Aggregate installed capacity per geography.
pub fn aggregate_capacity(agents: &AgentStore) -> CapacitySnapshot {
    let mut by_geography: BTreeMap<GeographyId, GeographyCapacity> = BTreeMap::new();
    for a in agents.iter() {
        let entry = by_geography.entry(a.geography().clone()).or_default();
        entry.system_kw_cum += a.system_kw_cum;
        entry.batt_kw_cum += a.batt_kw_cum;
        entry.batt_kwh_cum += a.batt_kwh_cum;
    }
    CapacitySnapshot {
        year: agents.year().unwrap_or_default(),
        by_geography,
    }
}

/// Everything the year carries forward: per-agent market state and
/// per-geography installed capacity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CarryForward {
    pub market: MarketLastYear,
    pub capacity: CapacitySnapshot,
}

pub enum DiffusionInput<'a> {
    Seeded(&'a StartingCapacities),
    Diffusing(&'a MarketLastYear),
}

pub struct DiffusionEngine<'a> {
    refs: &'a ReferenceTables,
}

impl<'a> DiffusionEngine<'a> {
    pub fn new(refs: &'a ReferenceTables) -> Self {
        Self { refs }
    }

    /// Diffuse one year over the whole store and return the state the next
    /// year will start from.
    pub fn diffuse(&self, agents: &mut AgentStore, input: DiffusionInput<'_>) -> ModelResult<MarketLastYear> {
        let year = agents.year().unwrap_or_default();
        agents
            .on_rows(|a| {
                a.developable_customers_in_bin = a.customers_in_bin * a.developable_frac;
                Ok(())
            })
            .map_err(|e| e.in_stage(DIFFUSION_STAGE, year))?;

        match input {
            DiffusionInput::Seeded(starting) => self.seed(agents, starting),
            DiffusionInput::Diffusing(last) => self.advance(agents, last),
        }
        .map_err(|e| e.in_stage(DIFFUSION_STAGE, year))?;

        agents
            .on_rows(|a| {
                a.total_gen_kwh = a.system_kw_cum * HOURS_PER_YEAR * a.capacity_factor;
                a.avoided_co2_tonnes = a.total_gen_kwh * a.working.carbon_t_per_kwh;
                Ok(())
            })
            .map_err(|e| e.in_stage(DIFFUSION_STAGE, year))?;

        Ok(MarketLastYear::capture(agents))
    }

    fn seed(&self, agents: &mut AgentStore, starting: &StartingCapacities) -> ModelResult<()> {
        let developable: BTreeMap<(GeographyId, Sector), f64> = agents.developable_by_segment();
        agents.on_rows(|a| {
            let segment_total = developable
                .get(&(a.geography().clone(), a.sector()))
                .copied()
                .unwrap_or(0.0);
            let weight = if segment_total > 0.0 {
                a.developable_customers_in_bin / segment_total
            } else {
                0.0
            };
            let base = starting.get(a.geography(), a.sector());
            let adopters = base
                .map_or(0.0, |b| b.number_of_adopters * weight)
                .min(a.developable_customers_in_bin);
            let share = if a.developable_customers_in_bin > 0.0 {
                adopters / a.developable_customers_in_bin
            } else {
                0.0
            };

            a.market_share_last_year = share;
            a.market_share = share;
            a.market_share_ceiling = a.working.economic_ceiling.max(share);
            a.new_adopters = 0.0;
            a.number_of_adopters = adopters;
            a.system_kw_cum = base.map_or(0.0, |b| b.system_kw_cum * weight);
            a.batt_kw_cum = base.map_or(0.0, |b| b.batt_kw_cum * weight);
            a.batt_kwh_cum = base.map_or(0.0, |b| b.batt_kwh_cum * weight);
            a.system_kw_cum_last_year = a.system_kw_cum;
            a.batt_kw_cum_last_year = a.batt_kw_cum;
            a.batt_kwh_cum_last_year = a.batt_kwh_cum;
            Ok(())
        })
    }

    fn advance(&self, agents: &mut AgentStore, last: &MarketLastYear) -> ModelResult<()> {
        agents.on_rows(|a| {
            let carry = last.by_agent.get(&a.agent_id).ok_or_else(|| {
                ModelError::Other(anyhow::anyhow!(
                    "agent {} has no market state from {}",
                    a.agent_id,
                    last.year
                ))
            })?;
            let bass = self.refs.bass_params(a.geography(), a.sector())?;
            step(a, carry, bass.p, bass.q);
            Ok(())
        })
    }
}

/// One Bass step for one agent, given last year's carry and the economic
/// ceiling already on the row.
pub fn step(a: &mut AgentRecord, carry: &AgentCarry, p: f64, q: f64) {
    let prev = carry.market_share;
    let ceiling = a.working.economic_ceiling;

    let share = if ceiling > prev {
        let d = (p + q * prev).clamp(0.0, 1.0);
        (prev + d * (ceiling - prev)).min(ceiling).max(prev)
    } else {
        prev
    };

    let raw_new = ((share - prev) * a.developable_customers_in_bin).max(0.0);
    let cumulative = (carry.number_of_adopters + raw_new)
        .min(a.customers_in_bin)
        .max(carry.number_of_adopters);
    let new_adopters = cumulative - carry.number_of_adopters;

    a.market_share_last_year = prev;
    a.market_share = share;
    a.market_share_ceiling = ceiling.max(prev);
    a.new_adopters = new_adopters;
    a.number_of_adopters = cumulative;

    a.system_kw_cum_last_year = carry.system_kw_cum;
    a.batt_kw_cum_last_year = carry.batt_kw_cum;
    a.batt_kwh_cum_last_year = carry.batt_kwh_cum;
    a.system_kw_cum = carry.system_kw_cum + new_adopters * a.system_kw;
    a.batt_kw_cum = carry.batt_kw_cum + new_adopters * a.batt_kw;
    a.batt_kwh_cum = carry.batt_kwh_cum + new_adopters * a.batt_kwh;
}
