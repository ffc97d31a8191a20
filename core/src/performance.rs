//! Boundary to the external technology-performance simulation.
//!
//! The model treats the simulator as a pure function: design parameters and
//! a load/weather profile reference in, annual generation figures out. A
//! failure is reported for that agent and is never substituted.

use crate::types::{AgentId, GeographyId, Sector, Year, HOURS_PER_YEAR};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct DesignParameters<'a> {
    pub agent_id: AgentId,
    pub year: Year,
    pub geography: &'a GeographyId,
    pub sector: Sector,
    pub system_kw: f64,
    pub degradation_rate: f64,
    pub resource_profile: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceEstimate {
    pub annual_generation_kwh: f64,
    pub capacity_factor: f64,
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{0}")]
pub struct PerformanceFailure(pub String);

pub trait PerformanceSimulator: Send + Sync {
    fn simulate(&self, design: &DesignParameters<'_>)
        -> Result<PerformanceEstimate, PerformanceFailure>;
}

/// Looks the capacity factor up by resource profile and scales linearly
/// with system size.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileSimulator {
    capacity_factors: HashMap<String, f64>,
}

impl ProfileSimulator {
    pub fn new(capacity_factors: HashMap<String, f64>) -> Self {
        Self { capacity_factors }
    }
}

impl PerformanceSimulator for ProfileSimulator {
    fn simulate(
        &self,
        design: &DesignParameters<'_>,
    ) -> Result<PerformanceEstimate, PerformanceFailure> {
        let cf = self
            .capacity_factors
            .get(design.resource_profile)
            .copied()
            .ok_or_else(|| {
                PerformanceFailure(format!("unknown resource profile '{}'", design.resource_profile))
            })?;
        if !(0.0..=1.0).contains(&cf) {
            return Err(PerformanceFailure(format!(
                "capacity factor {cf} for '{}' is outside [0, 1]",
                design.resource_profile
            )));
        }
        Ok(PerformanceEstimate {
            annual_generation_kwh: design.system_kw * cf * HOURS_PER_YEAR,
            capacity_factor: cf,
        })
    }
}
