//! Parallel chunk executor for the financial performance stage.
//!
//! RULES:
//!   - A pure map: each worker reads only its own rows and returns owned
//!     results. No worker sees another chunk's rows or output.
//!   - Results are merged back into original row order on the calling
//!     thread, so any worker count gives bit-identical output.
//!   - With one worker (or when no pool can be built) the map runs inline.

use crate::{
    agent::{AgentRecord, AgentStore},
    error::{ModelError, ModelResult},
    financial::{FinancialEngine, FinancialOutcome},
    types::Sector,
};
use rayon::prelude::*;
use std::collections::BTreeMap;

pub const FINANCIAL_STAGE: &str = "financial_performance";

pub struct ChunkExecutor {
    workers: usize,
    pool: Option<rayon::ThreadPool>,
}

impl ChunkExecutor {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let pool = if workers > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("financial-worker-{i}"))
                .build()
            {
                Ok(pool) => Some(pool),
                Err(e) => {
                    log::warn!("cannot start {workers} financial workers ({e}); running sequentially");
                    None
                }
            }
        } else {
            None
        };
        Self { workers, pool }
    }

    pub fn sequential() -> Self {
        Self::new(1)
    }

    /// Effective number of workers (1 when running inline).
    pub fn workers(&self) -> usize {
        if self.pool.is_some() {
            self.workers
        } else {
            1
        }
    }

    /// Split row indices by sector, then each sector group into at most
    /// `workers` contiguous slices. Chunks are disjoint and cover every row.
    pub fn partition(agents: &[AgentRecord], workers: usize) -> Vec<Vec<usize>> {
        let mut by_sector: BTreeMap<Sector, Vec<usize>> = BTreeMap::new();
        for (i, a) in agents.iter().enumerate() {
            by_sector.entry(a.sector()).or_default().push(i);
        }
        let workers = workers.max(1);
        let mut chunks = Vec::new();
        for indices in by_sector.into_values() {
            let size = indices.len().div_ceil(workers).max(1);
            chunks.extend(indices.chunks(size).map(<[usize]>::to_vec));
        }
        chunks
    }

    /// Map `f` over every row, returning results in row order. On failure
    /// the error of the lowest failing row is returned.
    pub fn map<T, F>(&self, agents: &[AgentRecord], f: F) -> ModelResult<Vec<T>>
    where
        T: Send,
        F: Fn(&AgentRecord) -> ModelResult<T> + Sync,
    {
        let Some(pool) = &self.pool else {
            return agents.iter().map(&f).collect();
        };

        let chunks = Self::partition(agents, self.workers);
        let evaluated: Vec<Result<Vec<(usize, T)>, (usize, ModelError)>> = pool.install(|| {
            chunks
                .par_iter()
                .map(|indices| {
                    indices
                        .iter()
                        .map(|&i| f(&agents[i]).map(|out| (i, out)).map_err(|e| (i, e)))
                        .collect()
                })
                .collect()
        });

        let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(agents.len()).collect();
        let mut first_error: Option<(usize, ModelError)> = None;
        for chunk in evaluated {
            match chunk {
                Ok(results) => {
                    for (i, out) in results {
                        slots[i] = Some(out);
                    }
                }
                Err((i, e)) => {
                    if first_error.as_ref().map_or(true, |(j, _)| i < *j) {
                        first_error = Some((i, e));
                    }
                }
            }
        }
        if let Some((_, e)) = first_error {
            return Err(e);
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| {
                    ModelError::Other(anyhow::anyhow!("row {i} missing from merged chunk output"))
                })
            })
            .collect()
    }

    /// Evaluate the financial engine for every agent and write the
    /// outcomes back in row order.
    pub fn run_financial(&self, agents: &mut AgentStore, engine: &FinancialEngine<'_>) -> ModelResult<()> {
        let year = agents.year().unwrap_or_default();
        let outcomes: Vec<FinancialOutcome> = self
            .map(agents.agents(), |agent| engine.evaluate(agent))
            .map_err(|e| e.in_stage(FINANCIAL_STAGE, year))?;
        for (agent, outcome) in agents.agents_mut().iter_mut().zip(outcomes) {
            outcome.apply(agent);
        }
        Ok(())
    }
}
