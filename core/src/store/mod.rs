//! SQLite persistence layer.
//!
//! RULE: only the store talks to the database. The engine and the
//! workspace manager call store methods; they never execute SQL directly.
//!
//! One connection per run, opened on the scenario database. The run's
//! workspace is a second database ATTACHed to that connection under its
//! generated schema name, so every workspace table is addressed as
//! `"<schema>"."<table>"`.

mod outputs;
mod reference;
mod table;
mod workspace;

pub use outputs::{OUTPUT_COLUMNS, OUTPUT_TABLE};
pub use reference::NEM_STATE_TABLE;
pub use table::{Column, ColumnType, TableRow};
pub use workspace::{SchemaName, WorkspaceLocation, SCHEMA_PREFIX};

use crate::{
    error::{ModelError, ModelResult},
    reference::StartingCapacityRow,
    types::{RunId, Sector},
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

pub struct ScenarioStore {
    conn: Connection,
    path: Option<PathBuf>, // None for :memory:, Some(path) for file
}

/// Lifecycle status of a run in the `model_run` registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub run_id: RunId,
    pub scenario_name: String,
    pub schema_name: String,
    pub status: RunStatus,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub years_completed: u32,
    pub error: Option<String>,
}

impl ScenarioStore {
    /// Open (or create) the scenario database at `path`.
    pub fn open(path: impl AsRef<Path>) -> ModelResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> ModelResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> ModelResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_scenario.sql"))?;
        Ok(())
    }

    /// Close the connection, surfacing any error SQLite reports on close.
    pub fn close(self) -> ModelResult<()> {
        self.conn.close().map_err(|(_, e)| ModelError::Database(e))
    }

    // ── Run registry ───────────────────────────────────────────

    pub fn insert_run(&self, run_id: &str, scenario_name: &str, schema_name: &str) -> ModelResult<()> {
        self.conn.execute(
            "INSERT INTO model_run (run_id, scenario_name, schema_name, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run_id,
                scenario_name,
                schema_name,
                RunStatus::Running.as_str(),
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn record_year_completed(&self, run_id: &str, years_completed: usize) -> ModelResult<()> {
        self.conn.execute(
            "UPDATE model_run SET years_completed = ?2 WHERE run_id = ?1",
            params![run_id, years_completed as i64],
        )?;
        Ok(())
    }

    pub fn finish_run(&self, run_id: &str, status: RunStatus, error: Option<&str>) -> ModelResult<()> {
        self.conn.execute(
            "UPDATE model_run SET status = ?2, finished_at = ?3, error = ?4 WHERE run_id = ?1",
            params![run_id, status.as_str(), chrono::Utc::now().to_rfc3339(), error],
        )?;
        Ok(())
    }

    pub fn run_record(&self, run_id: &str) -> ModelResult<Option<RunRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT run_id, scenario_name, schema_name, status, started_at,
                        finished_at, years_completed, error
                 FROM model_run WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, Option<String>>(7)?,
                    ))
                },
            )
            .optional()?;
        let Some((run_id, scenario_name, schema_name, status, started_at, finished_at, years, error)) = row
        else {
            return Ok(None);
        };
        let status = RunStatus::parse(&status).ok_or_else(|| {
            ModelError::Other(anyhow::anyhow!("unknown run status '{status}' for {run_id}"))
        })?;
        Ok(Some(RunRecord {
            run_id,
            scenario_name,
            schema_name,
            status,
            started_at,
            finished_at,
            years_completed: years as u32,
            error,
        }))
    }

    // ── Starting capacities ────────────────────────────────────

    /// Replace the installed-base table with `rows`.
    pub fn seed_starting_capacities(&self, rows: &[StartingCapacityRow]) -> ModelResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM starting_capacities", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO starting_capacities
                 (geography, sector, system_kw_cum, batt_kw_cum, batt_kwh_cum, number_of_adopters)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for r in rows {
                stmt.execute(params![
                    r.geography,
                    r.sector.abbr(),
                    r.system_kw_cum,
                    r.batt_kw_cum,
                    r.batt_kwh_cum,
                    r.number_of_adopters,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn starting_capacities(&self) -> ModelResult<Vec<StartingCapacityRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT geography, sector, system_kw_cum, batt_kw_cum, batt_kwh_cum, number_of_adopters
             FROM starting_capacities ORDER BY geography, sector",
        )?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(geography, sector, system_kw_cum, batt_kw_cum, batt_kwh_cum, number_of_adopters)| {
                let sector = Sector::from_abbr(&sector).ok_or_else(|| {
                    ModelError::ingestion("starting_capacities", format!("unknown sector '{sector}'"))
                })?;
                Ok(StartingCapacityRow {
                    geography,
                    sector,
                    system_kw_cum,
                    batt_kw_cum,
                    batt_kwh_cum,
                    number_of_adopters,
                })
            })
            .collect()
    }
}
