//! Scenario workspace manager — the run lifecycle and its single catch
//! point.
//!
//! PHASES:
//!   Initializing → Populating → Computing ⇄ Persisting → Completed
//!   any non-terminal phase → Failed
//!
//! RULES:
//!   - Every run gets its own workspace under a freshly generated schema
//!     name. Nothing outside the run ever writes to it.
//!   - Teardown runs exactly once, at the first terminal event, and also
//!     if the run unwinds from a panic. It drops the workspace (unless a
//!     successful run asked to keep it), records the run status and closes
//!     the scenario connection.
//!   - Errors are logged with context here and re-raised unchanged.

use crate::{
    agent::AgentStore,
    config::ScenarioInputs,
    engine::{DiffusionModel, YearResult},
    error::{ModelError, ModelResult},
    event::{ProgressSink, RunEvent, RunPhase},
    nem::NetMeteringPolicy,
    performance::{PerformanceSimulator, ProfileSimulator},
    reference::{ReferenceTables, StartingCapacities},
    store::{RunStatus, ScenarioStore, SchemaName, WorkspaceLocation},
    types::{GeographyId, RunId, Year},
};
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a front end hands to `run_scenario`.
pub struct RunRequest {
    pub inputs: ScenarioInputs,
    pub simulator: Arc<dyn PerformanceSimulator>,
}

impl RunRequest {
    pub fn new(inputs: ScenarioInputs, simulator: Arc<dyn PerformanceSimulator>) -> Self {
        Self { inputs, simulator }
    }

    /// Use the bundled profile simulator built from the scenario's
    /// resource profiles.
    pub fn with_profile_simulator(inputs: ScenarioInputs) -> Self {
        let simulator = ProfileSimulator::new(
            inputs
                .resource_profiles
                .iter()
                .map(|(name, cf)| (name.clone(), *cf))
                .collect(),
        );
        Self::new(inputs, Arc::new(simulator))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: RunId,
    pub schema: String,
    pub years: Vec<YearResult>,
    pub nem_sunsets: Vec<(GeographyId, Year)>,
    pub snapshots: Vec<PathBuf>,
    /// Workspace file kept because `delete_output_schema` was off.
    pub retained_workspace: Option<PathBuf>,
}

impl RunSummary {
    pub fn years_completed(&self) -> usize {
        self.years.len()
    }

    pub fn final_year(&self) -> Option<&YearResult> {
        self.years.last()
    }
}

struct Workspace {
    schema: SchemaName,
    location: WorkspaceLocation,
}

struct WorkspaceManager<'s> {
    run_id: RunId,
    phase: RunPhase,
    store: Option<ScenarioStore>,
    workspace: Option<Workspace>,
    delete_output_schema: bool,
    sink: &'s dyn ProgressSink,
}

impl<'s> WorkspaceManager<'s> {
    fn new(store: ScenarioStore, delete_output_schema: bool, sink: &'s dyn ProgressSink) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            phase: RunPhase::Initializing,
            store: Some(store),
            workspace: None,
            delete_output_schema,
            sink,
        }
    }

    fn store(&self) -> ModelResult<&ScenarioStore> {
        self.store
            .as_ref()
            .ok_or_else(|| ModelError::Other(anyhow::anyhow!("scenario connection already closed")))
    }

    fn advance(&mut self, next: RunPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal run phase transition {:?} -> {:?}",
            self.phase,
            next
        );
        self.sink.emit(&RunEvent::PhaseChanged { from: self.phase, to: next });
        self.phase = next;
    }

    /// Create and attach the run's workspace and register the run.
    fn create_workspace(&mut self, inputs: &ScenarioInputs) -> ModelResult<SchemaName> {
        let schema = SchemaName::generate(chrono::Utc::now());
        let location = WorkspaceLocation::for_schema(inputs.settings.workspace_dir.as_deref(), &schema);
        let store = self.store()?;
        store.insert_run(&self.run_id, &inputs.context.scenario_name, schema.as_str())?;
        store.attach_workspace(&schema, &location)?;
        self.workspace = Some(Workspace {
            schema: schema.clone(),
            location,
        });
        self.store()?
            .create_output_table(&schema)
            .map_err(|e| e.workspace(schema.as_str(), "create"))?;
        log::info!("run {} attached workspace {schema}", self.run_id);
        Ok(schema)
    }

    /// Tear the run down. Runs once; later calls are no-ops.
    fn teardown(&mut self, failure: Option<&ModelError>) -> ModelResult<Option<PathBuf>> {
        let Some(store) = self.store.take() else {
            return Ok(None);
        };
        let mut retained = None;
        let mut cleanup_error = None;

        if let Some(ws) = self.workspace.take() {
            let keep = failure.is_none() && !self.delete_output_schema;
            match store.drop_workspace(&ws.schema, &ws.location, !keep) {
                Ok(_) => {
                    if keep {
                        retained = ws.location.file_path().map(|p| p.to_path_buf());
                    }
                    log::debug!("workspace {} released (kept: {keep})", ws.schema);
                }
                Err(e) => {
                    log::warn!("could not drop workspace {}: {e}", ws.schema);
                    cleanup_error = Some(e);
                }
            }
        }

        let (status, message) = match failure {
            Some(err) => (RunStatus::Failed, Some(err.to_string())),
            None if cleanup_error.is_some() => (RunStatus::Failed, cleanup_error.as_ref().map(|e| e.to_string())),
            None => (RunStatus::Completed, None),
        };
        if let Err(e) = store.finish_run(&self.run_id, status, message.as_deref()) {
            log::warn!("could not record status of run {}: {e}", self.run_id);
        }
        if let Err(e) = store.close() {
            log::warn!("closing the scenario connection failed: {e}");
        }

        match cleanup_error {
            Some(e) if failure.is_none() => Err(e),
            _ => Ok(retained),
        }
    }

    fn fail(&mut self, err: ModelError) -> ModelError {
        log::error!("run {} failed during {}: {err}", self.run_id, self.phase.as_str());
        if !self.phase.is_terminal() {
            self.advance(RunPhase::Failed);
        }
        self.sink.emit(&RunEvent::RunFailed {
            run_id: self.run_id.clone(),
            error: err.to_string(),
        });
        // Teardown problems on this path are logged; the original error wins.
        let _ = self.teardown(Some(&err));
        err
    }
}

impl Drop for WorkspaceManager<'_> {
    fn drop(&mut self) {
        if self.store.is_some() {
            let aborted = ModelError::Other(anyhow::anyhow!("run aborted before reaching a terminal phase"));
            log::error!("run {}: {aborted}", self.run_id);
            let _ = self.teardown(Some(&aborted));
        }
    }
}

/// Run one scenario end to end on `store`. The store's connection is
/// closed when this returns, on success and on failure alike.
pub fn run_scenario(
    store: ScenarioStore,
    request: RunRequest,
    sink: &dyn ProgressSink,
) -> ModelResult<RunSummary> {
    let RunRequest { inputs, simulator } = request;
    let mut manager = WorkspaceManager::new(store, inputs.settings.delete_output_schema, sink);

    match execute(&mut manager, &inputs, simulator.as_ref()) {
        Ok(mut summary) => {
            manager.advance(RunPhase::Completed);
            sink.emit(&RunEvent::RunCompleted {
                run_id: manager.run_id.clone(),
                years_completed: summary.years.len(),
            });
            match manager.teardown(None) {
                Ok(retained) => {
                    summary.retained_workspace = retained;
                    Ok(summary)
                }
                Err(e) => {
                    log::error!("run {} completed but teardown failed: {e}", manager.run_id);
                    Err(e)
                }
            }
        }
        Err(e) => Err(manager.fail(e)),
    }
}

fn execute(
    manager: &mut WorkspaceManager<'_>,
    inputs: &ScenarioInputs,
    simulator: &dyn PerformanceSimulator,
) -> ModelResult<RunSummary> {
    let context = &inputs.context;
    context.validate()?;
    inputs.settings.validate()?;

    let schema = manager.create_workspace(inputs)?;
    manager.sink.emit(&RunEvent::RunStarted {
        run_id: manager.run_id.clone(),
        scenario_name: context.scenario_name.clone(),
        schema: schema.to_string(),
        years: context.model_years.clone(),
    });

    // ── Populate ──────────────────────────────────────────────
    manager.advance(RunPhase::Populating);
    let store = manager.store()?;
    store.ingest_reference(&schema, &inputs.reference)?;
    let reference = store.load_reference(&schema)?;
    let refs = ReferenceTables::index(&reference)?;
    let nem = NetMeteringPolicy::new(&reference.nem_state_limits, &reference.nem_sector_limits)?;
    let starting = StartingCapacities::new(store.starting_capacities()?)?;

    let agents: Vec<_> = inputs
        .agents
        .iter()
        .filter(|a| context.includes_sector(a.sector()))
        .cloned()
        .collect();
    if agents.len() < inputs.agents.len() {
        log::debug!(
            "{} agents outside the selected sectors were skipped",
            inputs.agents.len() - agents.len()
        );
    }
    let mut agents = AgentStore::new(agents)?;
    log::info!("run {} populated: {} agents", manager.run_id, agents.len());

    // ── Year loop ─────────────────────────────────────────────
    let mut model = DiffusionModel::new(context, &inputs.settings, refs, nem, starting, simulator);
    let mut summary = RunSummary {
        run_id: manager.run_id.clone(),
        schema: schema.to_string(),
        years: Vec::with_capacity(context.model_years.len()),
        nem_sunsets: Vec::new(),
        snapshots: Vec::new(),
        retained_workspace: None,
    };

    for &year in &context.model_years {
        manager.advance(RunPhase::Computing);
        manager.sink.emit(&RunEvent::YearStarted { year });
        let result = model.compute_year(&mut agents, year)?;

        manager.advance(RunPhase::Persisting);
        let snapshot = model.persist_year(manager.store()?, &schema, &agents, &result)?;
        manager.store()?.record_year_completed(&manager.run_id, summary.years.len() + 1)?;

        for geo in &result.nem_sunsets {
            manager.sink.emit(&RunEvent::NemSunset {
                geography: geo.clone(),
                year,
            });
            summary.nem_sunsets.push((geo.clone(), year));
        }
        manager.sink.emit(&RunEvent::YearCompleted {
            year,
            new_adopters: result.new_adopters,
            number_of_adopters: result.number_of_adopters,
            system_kw_cum: result.system_kw_cum,
        });
        summary.snapshots.extend(snapshot);
        summary.years.push(result);
    }
    Ok(summary)
}
