//! Shared primitive types used across the entire model.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A model year (calendar year, e.g. 2020).
pub type Year = u32;

/// A geography identifier (state abbreviation in the bundled data).
pub type GeographyId = String;

/// The canonical run identifier.
pub type RunId = String;

/// A stable agent lineage identifier. Survives every year of a run.
pub type AgentId = u64;

/// Hours in a non-leap year; used to turn capacity factors into energy.
pub const HOURS_PER_YEAR: f64 = 8760.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Sector {
    Residential,
    Commercial,
    Industrial,
}

impl Sector {
    pub const ALL: [Sector; 3] = [Sector::Residential, Sector::Commercial, Sector::Industrial];

    /// Short stable code used in the relational store.
    pub fn abbr(&self) -> &'static str {
        match self {
            Self::Residential => "res",
            Self::Commercial => "com",
            Self::Industrial => "ind",
        }
    }

    pub fn from_abbr(abbr: &str) -> Option<Self> {
        match abbr {
            "res" => Some(Self::Residential),
            "com" => Some(Self::Commercial),
            "ind" => Some(Self::Industrial),
            _ => None,
        }
    }

    /// Businesses may depreciate the system; households may not.
    pub fn claims_depreciation(&self) -> bool {
        !matches!(self, Self::Residential)
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbr())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Technology {
    Solar,
    SolarPlusStorage,
}

impl Technology {
    pub fn includes_storage(&self) -> bool {
        matches!(self, Self::SolarPlusStorage)
    }
}

/// The composite segment key of an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AgentKey {
    pub geography: GeographyId,
    pub sector: Sector,
    pub building_type: String,
    pub bin: u32,
}

impl fmt::Display for AgentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.geography, self.sector, self.building_type, self.bin
        )
    }
}
