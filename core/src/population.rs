//! Synthetic agent population, generated from a segment spec and the
//! scenario seed when no explicit agent file is supplied.

use crate::{
    agent::{AgentRecord, AgentSeed},
    error::{ModelError, ModelResult},
    rng::PopulationRng,
    types::{AgentId, AgentKey, GeographyId, Sector},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PopulationSpec {
    pub bins_per_segment: u32,
    pub segments: Vec<SegmentSpec>,
}

/// One geography × sector × building type and how its customers are
/// spread over bins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentSpec {
    pub geography: GeographyId,
    pub sector: Sector,
    pub building_type: String,
    pub total_customers: f64,
    pub developable_frac_min: f64,
    pub developable_frac_max: f64,
    pub load_kwh_per_customer: f64,
    pub roof_sqft_per_customer: f64,
    /// Relative +/- spread applied to load and roof area per bin.
    #[serde(default = "default_spread")]
    pub spread: f64,
    pub elec_price_usd_per_kwh: f64,
    pub resource_profile: String,
}

fn default_spread() -> f64 {
    0.25
}

impl PopulationSpec {
    pub fn validate(&self) -> ModelResult<()> {
        if self.bins_per_segment == 0 {
            return Err(ModelError::Configuration(
                "population needs at least one bin per segment".into(),
            ));
        }
        for s in &self.segments {
            let fracs_ok = (0.0..=1.0).contains(&s.developable_frac_min)
                && (0.0..=1.0).contains(&s.developable_frac_max)
                && s.developable_frac_min <= s.developable_frac_max;
            if !fracs_ok || !(s.total_customers >= 0.0) || !(s.spread >= 0.0) {
                return Err(ModelError::Configuration(format!(
                    "invalid population segment {}/{}/{}",
                    s.geography, s.sector, s.building_type
                )));
            }
        }
        Ok(())
    }

    /// Generate every agent. Identical (spec, seed) pairs always produce
    /// identical agents with identical ids.
    pub fn generate(&self, seed: u64) -> ModelResult<Vec<AgentRecord>> {
        self.validate()?;
        let bins = self.bins_per_segment;
        let mut agents = Vec::with_capacity(self.segments.len() * bins as usize);
        let mut next_id: AgentId = 1;

        for (idx, s) in self.segments.iter().enumerate() {
            let mut rng = PopulationRng::new(seed, idx as u64);
            let customers = s.total_customers / f64::from(bins);
            for bin in 0..bins {
                let key = AgentKey {
                    geography: s.geography.clone(),
                    sector: s.sector,
                    building_type: s.building_type.clone(),
                    bin,
                };
                let agent_seed = AgentSeed {
                    customers_in_bin: customers,
                    developable_frac: rng.uniform(s.developable_frac_min, s.developable_frac_max),
                    load_kwh_per_customer: rng.jitter(s.load_kwh_per_customer, s.spread),
                    developable_roof_sqft: rng.jitter(s.roof_sqft_per_customer, s.spread),
                    elec_price_usd_per_kwh: s.elec_price_usd_per_kwh,
                    resource_profile: s.resource_profile.clone(),
                };
                agents.push(AgentRecord::new(next_id, key, agent_seed));
                next_id += 1;
            }
        }
        log::debug!("generated {} agents from {} segments", agents.len(), self.segments.len());
        Ok(agents)
    }
}
