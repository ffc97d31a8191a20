//! Per-year agent snapshots — the full public agent table to/from JSON.
//!
//! A snapshot is written after a year has been persisted. It holds every
//! record minus working columns, which is exactly the state the next year's
//! pipeline starts from, so a run can be inspected or resumed from any
//! completed year.

use crate::{
    agent::{AgentRecord, AgentStore},
    error::ModelResult,
    types::Year,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YearSnapshot {
    pub scenario_name: String,
    pub year: Year,
    pub agents: Vec<AgentRecord>,
}

/// `<dir>/agent_df_<year>.json`
pub fn snapshot_path(dir: &Path, year: Year) -> PathBuf {
    dir.join(format!("agent_df_{year}.json"))
}

pub fn write_year(dir: &Path, scenario_name: &str, agents: &AgentStore) -> ModelResult<PathBuf> {
    let year = agents.year().unwrap_or_default();
    std::fs::create_dir_all(dir)?;
    let snapshot = YearSnapshot {
        scenario_name: scenario_name.to_string(),
        year,
        agents: agents.agents().to_vec(),
    };
    let path = snapshot_path(dir, year);
    let json = serde_json::to_string(&snapshot)?;
    std::fs::write(&path, json)?;
    log::debug!("snapshot for {year} saved to {}", path.display());
    Ok(path)
}

pub fn read_year(path: &Path) -> ModelResult<AgentStore> {
    let content = std::fs::read_to_string(path)?;
    let snapshot: YearSnapshot = serde_json::from_str(&content)?;
    AgentStore::from_records(snapshot.year, snapshot.agents)
}
