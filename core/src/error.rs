use crate::types::{AgentId, Year};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Workspace '{schema}' {action} failed: {source}")]
    WorkspaceLifecycle {
        schema: String,
        action: &'static str,
        #[source]
        source: Box<ModelError>,
    },

    #[error("Failed to ingest reference table '{table}': {reason}")]
    DataIngestion { table: String, reason: String },

    #[error("Stage '{stage}' failed in model year {year}: {source}")]
    Computation {
        stage: &'static str,
        year: Year,
        #[source]
        source: Box<ModelError>,
    },

    #[error("Failed to persist model year {year}: {source}")]
    Persistence {
        year: Year,
        #[source]
        source: Box<ModelError>,
    },

    #[error("No reference data in '{table}' for {key}")]
    MissingReference { table: &'static str, key: String },

    #[error("Performance simulation failed for agent {agent_id}: {reason}")]
    Performance { agent_id: AgentId, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The five error classes a caller can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    WorkspaceLifecycle,
    DataIngestion,
    Computation,
    Persistence,
}

impl ModelError {
    /// Wrap a stage failure with the stage name and model year.
    /// Already-wrapped errors pass through untouched.
    pub fn in_stage(self, stage: &'static str, year: Year) -> Self {
        match self {
            err @ (Self::Computation { .. }
            | Self::Persistence { .. }
            | Self::Configuration(_)
            | Self::WorkspaceLifecycle { .. }) => err,
            other => Self::Computation {
                stage,
                year,
                source: Box::new(other),
            },
        }
    }

    pub fn persisting(self, year: Year) -> Self {
        match self {
            err @ Self::Persistence { .. } => err,
            other => Self::Persistence {
                year,
                source: Box::new(other),
            },
        }
    }

    pub fn workspace(self, schema: &str, action: &'static str) -> Self {
        match self {
            err @ Self::WorkspaceLifecycle { .. } => err,
            other => Self::WorkspaceLifecycle {
                schema: schema.to_string(),
                action,
                source: Box::new(other),
            },
        }
    }

    pub fn ingestion(table: &str, reason: impl Into<String>) -> Self {
        Self::DataIngestion {
            table: table.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::WorkspaceLifecycle { .. } => ErrorKind::WorkspaceLifecycle,
            Self::DataIngestion { .. } => ErrorKind::DataIngestion,
            Self::Persistence { .. } => ErrorKind::Persistence,
            _ => ErrorKind::Computation,
        }
    }
}

pub type ModelResult<T> = Result<T, ModelError>;
