//! The year driver — advances the agent store one model year at a time.
//!
//! EXECUTION ORDER per year (fixed, documented, never reordered):
//!   1. Begin year        (stamp year, drop last year's working columns)
//!   2. Mutation pipeline (all eleven stages, in registration order)
//!   3. Financial performance (through the chunk executor)
//!   4. Diffusion         (seeded in the first year, Bass afterwards)
//!   5. Capacity aggregation against last year's snapshot, then
//!      net-metering caps
//!   6. Persist           (one transaction), then the year snapshot
//!
//! RULES:
//!   - Years run strictly in order; year t+1 sees only the carry-forward
//!     state of year t.
//!   - Every stage error is wrapped with its stage name and year and
//!     propagated. Nothing here catches errors.
//!   - Nothing is written until steps 1-5 have succeeded for the year.

use crate::{
    agent::AgentStore,
    chunk::ChunkExecutor,
    config::{ModelSettings, ScenarioContext},
    diffusion::{aggregate_capacity, CarryForward, DiffusionEngine, DiffusionInput},
    error::{ModelError, ModelResult},
    financial::{FinancialEngine, FinancialSettings},
    mutation::{MutationPipeline, YearContext},
    nem::{NetMeteringPolicy, CAPACITY_CAP_STAGE},
    performance::PerformanceSimulator,
    reference::{ReferenceTables, StartingCapacities},
    snapshot,
    store::{ScenarioStore, SchemaName},
    types::{GeographyId, Year},
};
use std::path::PathBuf;

/// What one computed year produced, before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct YearResult {
    pub year: Year,
    pub first_year: bool,
    pub new_adopters: f64,
    pub number_of_adopters: f64,
    pub system_kw_cum: f64,
    /// Capacity installed this year (the whole seeded base in the first year).
    pub system_kw_added: f64,
    /// Geographies whose net metering sunset this year.
    pub nem_sunsets: Vec<GeographyId>,
}

pub struct DiffusionModel<'a> {
    context: &'a ScenarioContext,
    settings: &'a ModelSettings,
    refs: ReferenceTables,
    nem: NetMeteringPolicy,
    starting: StartingCapacities,
    pipeline: MutationPipeline,
    executor: ChunkExecutor,
    simulator: &'a dyn PerformanceSimulator,
    carry: Option<CarryForward>,
}

impl<'a> DiffusionModel<'a> {
    pub fn new(
        context: &'a ScenarioContext,
        settings: &'a ModelSettings,
        refs: ReferenceTables,
        nem: NetMeteringPolicy,
        starting: StartingCapacities,
        simulator: &'a dyn PerformanceSimulator,
    ) -> Self {
        Self {
            context,
            settings,
            refs,
            nem,
            starting,
            pipeline: MutationPipeline::standard(),
            executor: ChunkExecutor::new(settings.chunk_workers),
            simulator,
            carry: None,
        }
    }

    /// Replace the standard pipeline. Stages still run in registration order.
    pub fn with_pipeline(mut self, pipeline: MutationPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn nem(&self) -> &NetMeteringPolicy {
        &self.nem
    }

    pub fn carry(&self) -> Option<&CarryForward> {
        self.carry.as_ref()
    }

    /// Run steps 1-5 for `year`.
    pub fn compute_year(&mut self, agents: &mut AgentStore, year: Year) -> ModelResult<YearResult> {
        let first_year = self
            .context
            .first_year()
            .ok_or_else(|| ModelError::Configuration("no model years".into()))?;
        if let Some(carry) = &self.carry {
            if year <= carry.market.year {
                return Err(ModelError::Configuration(format!(
                    "model year {year} does not follow {}",
                    carry.market.year
                )));
            }
        }

        agents.begin_year(year);

        let ctx = YearContext {
            year,
            first_year,
            technology: self.context.technology,
            refs: &self.refs,
            nem: &self.nem,
        };
        self.pipeline.apply(agents, &ctx)?;

        let financial = FinancialEngine::new(
            FinancialSettings {
                technology: self.context.technology,
                payback_cap_years: self.settings.payback_cap_years,
                self_consumption_fraction: self.settings.self_consumption_fraction,
            },
            self.refs.market_share_curves(),
            self.simulator,
        );
        self.executor.run_financial(agents, &financial)?;
        log::debug!("year={year} financial performance evaluated on {} worker(s)", self.executor.workers());

        let input = match &self.carry {
            None => DiffusionInput::Seeded(&self.starting),
            Some(carry) => DiffusionInput::Diffusing(&carry.market),
        };
        let market = DiffusionEngine::new(&self.refs).diffuse(agents, input)?;

        let capacity = aggregate_capacity(agents);
        let system_kw_added = match &self.carry {
            None => capacity.total_kw(),
            Some(carry) => capacity
                .added_since(&carry.capacity)
                .map_err(|e| e.in_stage(CAPACITY_CAP_STAGE, year))?,
        };
        let nem_sunsets = self.nem.apply_capacity_caps(year, &capacity);
        for geo in &nem_sunsets {
            log::warn!("net metering capacity cap reached in {geo}; sunset set to {year}");
        }

        let result = YearResult {
            year,
            first_year: self.carry.is_none(),
            new_adopters: agents.iter().map(|a| a.new_adopters).sum(),
            number_of_adopters: agents.iter().map(|a| a.number_of_adopters).sum(),
            system_kw_cum: capacity.total_kw(),
            system_kw_added,
            nem_sunsets,
        };
        self.carry = Some(CarryForward { market, capacity });
        Ok(result)
    }

    /// Step 6: commit the year's rows, record any sunsets in the workspace,
    /// and write the year snapshot when enabled.
    pub fn persist_year(
        &self,
        store: &ScenarioStore,
        schema: &SchemaName,
        agents: &AgentStore,
        result: &YearResult,
    ) -> ModelResult<Option<PathBuf>> {
        let year = result.year;
        store.write_year_outputs(schema, year, agents, result.first_year)?;
        for geo in &result.nem_sunsets {
            store
                .update_nem_sunset(schema, geo, year)
                .map_err(|e| e.persisting(year))?;
        }
        if !self.settings.write_annual_agents {
            return Ok(None);
        }
        let dir = self.settings.scenario_output_dir(&self.context.scenario_name);
        let path = snapshot::write_year(&dir, &self.context.scenario_name, agents)
            .map_err(|e| e.persisting(year))?;
        Ok(Some(path))
    }
}
