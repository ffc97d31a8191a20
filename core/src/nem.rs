//! Net-metering policy state.
//!
//! RULE: the only mutation is one-way. Once a geography's cumulative
//! capacity crosses its cap, its sunset year is fixed to that model year
//! and is never cleared or moved for the rest of the run.

use crate::{
    error::{ModelError, ModelResult},
    reference::{NemSectorRow, NemStateRow},
    types::{GeographyId, Sector, Year},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CAPACITY_CAP_STAGE: &str = "capacity_caps";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NemStateLimit {
    pub cap_kw: Option<f64>,
    pub sunset_year: Option<Year>,
}

/// Installed capacity totals of one geography.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeographyCapacity {
    pub system_kw_cum: f64,
    pub batt_kw_cum: f64,
    pub batt_kwh_cum: f64,
}

/// Per-geography installed capacity at the end of one model year.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    pub year: Year,
    pub by_geography: BTreeMap<GeographyId, GeographyCapacity>,
}

impl CapacitySnapshot {
    pub fn total_kw(&self) -> f64 {
        self.by_geography.values().map(|c| c.system_kw_cum).sum()
    }

    /// Capacity installed since `previous` (last year's snapshot). Installed
    /// capacity never shrinks; a geography below last year's total is an
    /// error.
    pub fn added_since(&self, previous: &CapacitySnapshot) -> ModelResult<f64> {
        for (geo, last) in &previous.by_geography {
            let now = self.by_geography.get(geo).map_or(0.0, |c| c.system_kw_cum);
            if now < last.system_kw_cum {
                return Err(ModelError::Other(anyhow::anyhow!(
                    "installed capacity in {geo} fell from {} kW in {} to {now} kW",
                    last.system_kw_cum,
                    previous.year
                )));
            }
        }
        Ok(self.total_kw() - previous.total_kw())
    }
}

#[derive(Debug, Clone)]
pub struct NetMeteringPolicy {
    states: BTreeMap<GeographyId, NemStateLimit>,
    sector_limits: BTreeMap<(GeographyId, Sector), f64>,
}

impl NetMeteringPolicy {
    pub fn new(states: &[NemStateRow], sectors: &[NemSectorRow]) -> ModelResult<Self> {
        let mut state_map = BTreeMap::new();
        for s in states {
            if s.cap_kw.is_some_and(|cap| !(cap >= 0.0)) {
                return Err(ModelError::ingestion(
                    "nem_state_limits",
                    format!("invalid cap for {}", s.geography),
                ));
            }
            let limit = NemStateLimit {
                cap_kw: s.cap_kw,
                sunset_year: s.sunset_year,
            };
            if state_map.insert(s.geography.clone(), limit).is_some() {
                return Err(ModelError::ingestion(
                    "nem_state_limits",
                    format!("duplicate geography {}", s.geography),
                ));
            }
        }
        let sector_limits = sectors
            .iter()
            .map(|r| ((r.geography.clone(), r.sector), r.system_kw_limit))
            .collect();
        Ok(Self {
            states: state_map,
            sector_limits,
        })
    }

    /// Net metering is available in `year` when the geography has a policy
    /// and that policy has not yet sunset.
    pub fn is_active(&self, geography: &GeographyId, year: Year) -> bool {
        self.states
            .get(geography)
            .is_some_and(|s| s.sunset_year.map_or(true, |sunset| year < sunset))
    }

    pub fn system_kw_limit(&self, geography: &GeographyId, sector: Sector) -> Option<f64> {
        self.sector_limits.get(&(geography.clone(), sector)).copied()
    }

    pub fn sunset_year(&self, geography: &GeographyId) -> Option<Year> {
        self.states.get(geography).and_then(|s| s.sunset_year)
    }

    /// Sunset every geography whose cumulative capacity has passed its cap
    /// and whose sunset year is still unset. Returns the newly sunset
    /// geographies.
    pub fn apply_capacity_caps(&mut self, year: Year, capacity: &CapacitySnapshot) -> Vec<GeographyId> {
        let mut sunset = Vec::new();
        for (geo, limit) in &mut self.states {
            let (Some(cap), None) = (limit.cap_kw, limit.sunset_year) else {
                continue;
            };
            let installed = capacity
                .by_geography
                .get(geo)
                .map_or(0.0, |c| c.system_kw_cum);
            if installed > cap {
                limit.sunset_year = Some(year);
                sunset.push(geo.clone());
            }
        }
        sunset
    }
}
