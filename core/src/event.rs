//! Run progress events.
//!
//! RULE: front ends observe a run ONLY through these events. The core
//! never calls into a UI, and a sink never influences the run.

use crate::types::{GeographyId, RunId, Year};
use serde::{Deserialize, Serialize};

/// Lifecycle phase of one model run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Initializing,
    Populating,
    Computing,
    Persisting,
    Completed,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Legal forward transitions. Any non-terminal phase may fail.
    pub fn can_advance_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Initializing, Populating)
            | (Populating, Computing)
            | (Computing, Persisting)
            | (Persisting, Computing)
            | (Persisting, Completed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Populating => "populating",
            Self::Computing => "computing",
            Self::Persisting => "persisting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Every event emitted during a run.
/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: RunId,
        scenario_name: String,
        schema: String,
        years: Vec<Year>,
    },
    PhaseChanged {
        from: RunPhase,
        to: RunPhase,
    },
    YearStarted {
        year: Year,
    },
    YearCompleted {
        year: Year,
        new_adopters: f64,
        number_of_adopters: f64,
        system_kw_cum: f64,
    },
    NemSunset {
        geography: GeographyId,
        year: Year,
    },
    RunCompleted {
        run_id: RunId,
        years_completed: usize,
    },
    RunFailed {
        run_id: RunId,
        error: String,
    },
}

/// Receives progress events. Implementations must not block for long; the
/// year loop waits on them.
pub trait ProgressSink {
    fn emit(&self, event: &RunEvent);
}

/// Default sink: forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn emit(&self, event: &RunEvent) {
        match event {
            RunEvent::RunStarted {
                run_id,
                scenario_name,
                schema,
                years,
            } => log::info!(
                "run {run_id} started: scenario '{scenario_name}', workspace {schema}, {} model years",
                years.len()
            ),
            RunEvent::PhaseChanged { from, to } => {
                log::debug!("phase {} -> {}", from.as_str(), to.as_str())
            }
            RunEvent::YearStarted { year } => log::info!("model year {year} started"),
            RunEvent::YearCompleted {
                year,
                new_adopters,
                number_of_adopters,
                system_kw_cum,
            } => log::info!(
                "model year {year} done: {new_adopters:.1} new adopters, {number_of_adopters:.1} total, {system_kw_cum:.1} kW installed"
            ),
            RunEvent::NemSunset { geography, year } => {
                log::warn!("net metering in {geography} sunsets in {year}: capacity cap reached")
            }
            RunEvent::RunCompleted {
                run_id,
                years_completed,
            } => log::info!("run {run_id} completed after {years_completed} model years"),
            RunEvent::RunFailed { run_id, error } => log::error!("run {run_id} failed: {error}"),
        }
    }
}

/// Collects events in memory. Used by tests and embedding front ends.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<RunEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: &RunEvent) {
        LogSink.emit(event);
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn years_alternate_between_computing_and_persisting() {
        use RunPhase::*;
        assert!(Initializing.can_advance_to(Populating));
        assert!(Computing.can_advance_to(Persisting));
        assert!(Persisting.can_advance_to(Computing));
        assert!(!Computing.can_advance_to(Completed), "a computed year must be persisted first");
        assert!(!Populating.can_advance_to(Persisting));
    }

    #[test]
    fn terminal_phases_are_final() {
        use RunPhase::*;
        for from in [Initializing, Populating, Computing, Persisting] {
            assert!(from.can_advance_to(Failed));
        }
        for next in [Initializing, Populating, Computing, Persisting, Completed, Failed] {
            assert!(!Completed.can_advance_to(next));
            assert!(!Failed.can_advance_to(next));
        }
    }
}
