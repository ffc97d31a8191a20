//! Store methods for the per-run workspace database.

use crate::error::{ModelError, ModelResult};
use chrono::{DateTime, Utc};
use rusqlite::params;
use std::fmt;
use std::path::{Path, PathBuf};

use super::ScenarioStore;

pub const SCHEMA_PREFIX: &str = "diffusion_results_";

/// Longest identifier accepted for a workspace schema.
const MAX_SCHEMA_LEN: usize = 63;

/// A validated workspace schema name. Safe to quote into DDL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaName(String);

impl SchemaName {
    /// `diffusion_results_<yyyymmdd_hhmmss>_<8 hex>`. The random suffix keeps
    /// names of runs started in the same second disjoint.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!(
            "{SCHEMA_PREFIX}{}_{}",
            now.format("%Y%m%d_%H%M%S"),
            &suffix[..8]
        ))
    }

    pub fn parse(name: &str) -> ModelResult<Self> {
        if is_identifier(name) && name.len() <= MAX_SCHEMA_LEN {
            Ok(Self(name.to_string()))
        } else {
            Err(ModelError::Configuration(format!("invalid workspace schema name '{name}'")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `"<schema>"."<table>"`. Table names are compile-time constants.
    pub fn qualify(&self, table: &str) -> String {
        debug_assert!(is_identifier(table), "table name '{table}' is not an identifier");
        format!("\"{}\".\"{}\"", self.0, table)
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Where the workspace database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceLocation {
    InMemory,
    File(PathBuf),
}

impl WorkspaceLocation {
    /// `<dir>/<schema>.db`, or in memory when no directory is configured.
    pub fn for_schema(dir: Option<&Path>, schema: &SchemaName) -> Self {
        match dir {
            Some(dir) => Self::File(dir.join(format!("{schema}.db"))),
            None => Self::InMemory,
        }
    }

    pub fn file_path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path),
            Self::InMemory => None,
        }
    }

    fn attach_target(&self) -> String {
        match self {
            Self::InMemory => ":memory:".to_string(),
            Self::File(path) => path.to_string_lossy().into_owned(),
        }
    }
}

impl ScenarioStore {
    /// Attach a fresh workspace. Fails if the schema is already attached or
    /// a file-backed workspace with that name already exists on disk.
    pub fn attach_workspace(&self, schema: &SchemaName, location: &WorkspaceLocation) -> ModelResult<()> {
        let attach = || -> ModelResult<()> {
            if self.workspace_exists(schema)? {
                return Err(ModelError::Other(anyhow::anyhow!("schema is already attached")));
            }
            if let Some(path) = location.file_path() {
                if path.exists() {
                    return Err(ModelError::Other(anyhow::anyhow!(
                        "{} already exists",
                        path.display()
                    )));
                }
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            self.conn.execute(
                "ATTACH DATABASE ?1 AS ?2",
                params![location.attach_target(), schema.as_str()],
            )?;
            Ok(())
        };
        attach().map_err(|e| e.workspace(schema.as_str(), "create"))
    }

    /// Re-attach a workspace file kept by an earlier run. The schema name is
    /// the file stem.
    pub fn attach_retained_workspace(&self, path: &Path) -> ModelResult<SchemaName> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ModelError::Configuration(format!("bad workspace path {}", path.display())))?;
        let schema = SchemaName::parse(stem)?;
        if !path.exists() {
            return Err(ModelError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            ))
            .workspace(schema.as_str(), "attach"));
        }
        self.conn
            .execute(
                "ATTACH DATABASE ?1 AS ?2",
                params![path.to_string_lossy().into_owned(), schema.as_str()],
            )
            .map_err(|e| ModelError::from(e).workspace(schema.as_str(), "attach"))?;
        Ok(schema)
    }

    pub fn workspace_exists(&self, schema: &SchemaName) -> ModelResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pragma_database_list WHERE name = ?1",
            params![schema.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn detach_workspace(&self, schema: &SchemaName) -> ModelResult<()> {
        self.conn
            .execute("DETACH DATABASE ?1", params![schema.as_str()])
            .map_err(|e| ModelError::from(e).workspace(schema.as_str(), "detach"))?;
        Ok(())
    }

    /// Detach the workspace if attached and, when `delete_file` is set,
    /// remove its file. Safe to call on an already dropped workspace.
    /// Returns whether anything was removed.
    pub fn drop_workspace(
        &self,
        schema: &SchemaName,
        location: &WorkspaceLocation,
        delete_file: bool,
    ) -> ModelResult<bool> {
        let mut dropped = false;
        if self.workspace_exists(schema)? {
            self.detach_workspace(schema)?;
            dropped = true;
        }
        if let (true, Some(path)) = (delete_file, location.file_path()) {
            for candidate in [path.to_path_buf(), journal_path(path)] {
                match std::fs::remove_file(&candidate) {
                    Ok(()) => dropped = true,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(ModelError::Io(e).workspace(schema.as_str(), "drop"));
                    }
                }
            }
        }
        Ok(dropped)
    }
}

fn journal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push("-journal");
    PathBuf::from(name)
}
