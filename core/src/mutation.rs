//! The mutation pipeline — per-year attribute transforms on the agent store.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Load growth
//!   2. Export tariff (net-metering state)
//!   3. Electricity price multiplier and escalator
//!   4. Technology performance (PV, battery)
//!   5. Technology prices (PV, battery)
//!   6. Value of resiliency
//!   7. Depreciation schedule
//!   8. Carbon intensity
//!   9. Wholesale electricity prices
//!  10. Financing terms
//!  11. State incentives
//!
//! RULES:
//!   - Every stage is a pure function of (rows, reference tables, year).
//!   - No stage reads anything the diffusion engine produced.
//!   - Stages write only `WorkingColumns` and the year-dependent base
//!     columns (load, retail price).

use crate::{
    agent::{AgentRecord, AgentStore},
    error::ModelResult,
    nem::NetMeteringPolicy,
    reference::ReferenceTables,
    types::{Technology, Year},
};

/// Everything a stage may read besides the rows themselves.
pub struct YearContext<'a> {
    pub year: Year,
    pub first_year: Year,
    pub technology: Technology,
    pub refs: &'a ReferenceTables,
    pub nem: &'a NetMeteringPolicy,
}

/// The contract every pipeline stage fulfills.
pub trait MutationStage: Send {
    /// Unique stable name, used in logs and error context.
    fn name(&self) -> &'static str;

    /// Transform one agent row for the context's year.
    fn apply_row(&self, agent: &mut AgentRecord, ctx: &YearContext<'_>) -> ModelResult<()>;
}

pub struct MutationPipeline {
    stages: Vec<Box<dyn MutationStage>>,
}

impl MutationPipeline {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// The standard pipeline with every stage registered in order.
    pub fn standard() -> Self {
        let mut pipeline = Self::new();
        pipeline.register(Box::new(LoadGrowth));
        pipeline.register(Box::new(ExportTariff));
        pipeline.register(Box::new(ElecPriceEscalation));
        pipeline.register(Box::new(TechnologyPerformance));
        pipeline.register(Box::new(TechnologyPrices));
        pipeline.register(Box::new(ValueOfResiliency));
        pipeline.register(Box::new(Depreciation));
        pipeline.register(Box::new(CarbonIntensity));
        pipeline.register(Box::new(WholesalePrices));
        pipeline.register(Box::new(FinancingTerms));
        pipeline.register(Box::new(StateIncentives));
        pipeline
    }

    /// Register a stage. Call in the documented execution order.
    pub fn register(&mut self, stage: Box<dyn MutationStage>) {
        self.stages.push(stage);
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage over the whole store, stage by stage.
    pub fn apply(&self, agents: &mut AgentStore, ctx: &YearContext<'_>) -> ModelResult<()> {
        for stage in &self.stages {
            agents
                .on_rows(|agent| stage.apply_row(agent, ctx))
                .map_err(|e| e.in_stage(stage.name(), ctx.year))?;
            log::debug!("year={} stage={} applied", ctx.year, stage.name());
        }
        Ok(())
    }
}

impl Default for MutationPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

// ── Stages ─────────────────────────────────────────────────────

pub struct LoadGrowth;

impl MutationStage for LoadGrowth {
    fn name(&self) -> &'static str {
        "load_growth"
    }

    fn apply_row(&self, agent: &mut AgentRecord, ctx: &YearContext<'_>) -> ModelResult<()> {
        let multiplier = *ctx.refs.load_growth.at(&agent.sector(), ctx.year)?;
        agent.load_kwh_per_customer_in_bin = agent.load_kwh_per_customer_in_bin_initial * multiplier;
        Ok(())
    }
}

pub struct ExportTariff;

impl MutationStage for ExportTariff {
    fn name(&self) -> &'static str {
        "export_tariff"
    }

    fn apply_row(&self, agent: &mut AgentRecord, ctx: &YearContext<'_>) -> ModelResult<()> {
        let active = ctx.nem.is_active(agent.geography(), ctx.year);
        agent.working.nem_active = active;
        agent.working.nem_system_kw_limit = if active {
            ctx.nem.system_kw_limit(agent.geography(), agent.sector())
        } else {
            None
        };
        Ok(())
    }
}

pub struct ElecPriceEscalation;

impl ElecPriceEscalation {
    /// Years over which the escalator is annualised.
    const HORIZON_YRS: Year = 25;
}

impl MutationStage for ElecPriceEscalation {
    fn name(&self) -> &'static str {
        "elec_price_escalation"
    }

    fn apply_row(&self, agent: &mut AgentRecord, ctx: &YearContext<'_>) -> ModelResult<()> {
        let key = (agent.geography().clone(), agent.sector());
        let series = &ctx.refs.elec_price_index;
        let base = *series.at(&key, ctx.first_year)?;
        let now = *series.at(&key, ctx.year)?;
        agent.elec_price_usd_per_kwh = if base > 0.0 {
            agent.elec_price_usd_per_kwh_initial * now / base
        } else {
            agent.elec_price_usd_per_kwh_initial
        };

        let horizon = ctx.year + Self::HORIZON_YRS;
        agent.working.elec_price_escalator = match series.span(&key, ctx.year + 1, horizon).last() {
            Some((end_year, &end)) if now > 0.0 && end > 0.0 => {
                let n = f64::from(end_year - ctx.year);
                (end / now).powf(1.0 / n) - 1.0
            }
            _ => 0.0,
        };
        Ok(())
    }
}

pub struct TechnologyPerformance;

impl MutationStage for TechnologyPerformance {
    fn name(&self) -> &'static str {
        "technology_performance"
    }

    fn apply_row(&self, agent: &mut AgentRecord, ctx: &YearContext<'_>) -> ModelResult<()> {
        let pv = ctx.refs.pv.at(&agent.sector(), ctx.year)?;
        agent.working.pv_degradation_rate = pv.degradation_rate;
        agent.working.pv_power_density_w_per_sqft = pv.power_density_w_per_sqft;

        if ctx.technology.includes_storage() {
            let batt = ctx.refs.battery.at(&agent.sector(), ctx.year)?;
            agent.working.batt_kwh_per_pv_kw = batt.kwh_per_pv_kw;
            agent.working.batt_kw_per_kwh = batt.kw_per_kwh;
            agent.working.batt_round_trip_efficiency = batt.round_trip_efficiency;
        }
        Ok(())
    }
}

pub struct TechnologyPrices;

impl MutationStage for TechnologyPrices {
    fn name(&self) -> &'static str {
        "technology_prices"
    }

    fn apply_row(&self, agent: &mut AgentRecord, ctx: &YearContext<'_>) -> ModelResult<()> {
        let pv = ctx.refs.pv.at(&agent.sector(), ctx.year)?;
        agent.working.pv_capex_usd_per_kw = pv.capex_usd_per_kw;
        agent.working.pv_om_usd_per_kw_yr = pv.om_usd_per_kw_yr;

        if ctx.technology.includes_storage() {
            let batt = ctx.refs.battery.at(&agent.sector(), ctx.year)?;
            agent.working.batt_capex_usd_per_kwh = batt.capex_usd_per_kwh;
            agent.working.batt_capex_usd_per_kw = batt.capex_usd_per_kw;
            agent.working.batt_om_usd_per_kw_yr = batt.om_usd_per_kw_yr;
        }
        Ok(())
    }
}

pub struct ValueOfResiliency;

impl MutationStage for ValueOfResiliency {
    fn name(&self) -> &'static str {
        "value_of_resiliency"
    }

    fn apply_row(&self, agent: &mut AgentRecord, ctx: &YearContext<'_>) -> ModelResult<()> {
        agent.working.resiliency_usd_per_kwh_yr =
            ctx.refs.resiliency_value(agent.geography(), agent.sector());
        Ok(())
    }
}

pub struct Depreciation;

impl MutationStage for Depreciation {
    fn name(&self) -> &'static str {
        "depreciation"
    }

    fn apply_row(&self, agent: &mut AgentRecord, ctx: &YearContext<'_>) -> ModelResult<()> {
        agent.working.depreciation_schedule = if agent.sector().claims_depreciation() {
            ctx.refs.depreciation.at(&agent.sector(), ctx.year)?.clone()
        } else {
            Vec::new()
        };
        Ok(())
    }
}

pub struct CarbonIntensity;

impl MutationStage for CarbonIntensity {
    fn name(&self) -> &'static str {
        "carbon_intensity"
    }

    fn apply_row(&self, agent: &mut AgentRecord, ctx: &YearContext<'_>) -> ModelResult<()> {
        agent.working.carbon_t_per_kwh = *ctx.refs.carbon_intensity.at(agent.geography(), ctx.year)?;
        Ok(())
    }
}

pub struct WholesalePrices;

impl MutationStage for WholesalePrices {
    fn name(&self) -> &'static str {
        "wholesale_prices"
    }

    fn apply_row(&self, agent: &mut AgentRecord, ctx: &YearContext<'_>) -> ModelResult<()> {
        agent.working.wholesale_usd_per_kwh =
            *ctx.refs.wholesale_prices.at(agent.geography(), ctx.year)?;
        Ok(())
    }
}

pub struct FinancingTerms;

impl MutationStage for FinancingTerms {
    fn name(&self) -> &'static str {
        "financing_terms"
    }

    fn apply_row(&self, agent: &mut AgentRecord, ctx: &YearContext<'_>) -> ModelResult<()> {
        agent.working.financing = Some(*ctx.refs.financing.at(&agent.sector(), ctx.year)?);
        agent.working.inflation_rate = ctx.refs.inflation_rate;
        Ok(())
    }
}

pub struct StateIncentives;

impl MutationStage for StateIncentives {
    fn name(&self) -> &'static str {
        "state_incentives"
    }

    fn apply_row(&self, agent: &mut AgentRecord, ctx: &YearContext<'_>) -> ModelResult<()> {
        let (per_kw, max) = ctx
            .refs
            .active_incentive(agent.geography(), agent.sector(), ctx.year)
            .map_or((0.0, 0.0), |i| (i.cbi_usd_per_kw, i.max_cbi_usd));
        agent.working.cbi_usd_per_kw = per_kw;
        agent.working.cbi_max_usd = max;
        Ok(())
    }
}
