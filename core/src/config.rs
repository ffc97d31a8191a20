use crate::{
    agent::{AgentInput, AgentRecord, AgentSeed, FinancingParams},
    error::{ModelError, ModelResult},
    population::PopulationSpec,
    reference::*,
    types::{AgentKey, Sector, Technology, Year},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Immutable description of one scenario run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioContext {
    pub scenario_name: String,
    pub technology: Technology,
    pub region: String,
    pub sectors: Vec<Sector>,
    #[serde(default)]
    pub model_years: Vec<Year>,
    #[serde(default)]
    pub random_seed: u64,
}

impl ScenarioContext {
    pub fn validate(&self) -> ModelResult<()> {
        if self.scenario_name.trim().is_empty() {
            return Err(ModelError::Configuration("scenario_name is empty".into()));
        }
        // The name becomes a directory under output_dir.
        let name = self.scenario_name.as_str();
        if name == "." || name.contains("..") || name.contains(['/', '\\', ':']) {
            return Err(ModelError::Configuration(format!(
                "scenario_name '{name}' must be a plain directory name"
            )));
        }
        if self.sectors.is_empty() {
            return Err(ModelError::Configuration("no sectors selected".into()));
        }
        if self.model_years.is_empty() {
            return Err(ModelError::Configuration("no model years".into()));
        }
        if let Some(pair) = self.model_years.windows(2).find(|w| w[1] <= w[0]) {
            return Err(ModelError::Configuration(format!(
                "model years must strictly increase ({} then {})",
                pair[0], pair[1]
            )));
        }
        Ok(())
    }

    pub fn first_year(&self) -> Option<Year> {
        self.model_years.first().copied()
    }

    pub fn includes_sector(&self, sector: Sector) -> bool {
        self.sectors.contains(&sector)
    }
}

/// Inclusive `start..=end` stepping by `step`.
pub fn create_model_years(start: Year, end: Year, step: Year) -> ModelResult<Vec<Year>> {
    if step == 0 || end < start {
        return Err(ModelError::Configuration(format!(
            "invalid model year range {start}..={end} step {step}"
        )));
    }
    Ok((start..=end).step_by(step as usize).collect())
}

/// Tunables of the run that are not part of the scenario definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    pub payback_cap_years: f64,
    pub chunk_workers: usize,
    pub output_dir: PathBuf,
    /// `None` keeps the workspace in memory.
    pub workspace_dir: Option<PathBuf>,
    pub delete_output_schema: bool,
    pub write_annual_agents: bool,
    pub self_consumption_fraction: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            payback_cap_years: 30.0,
            chunk_workers: 1,
            output_dir: PathBuf::from("runs"),
            workspace_dir: None,
            delete_output_schema: true,
            write_annual_agents: true,
            self_consumption_fraction: 0.5,
        }
    }
}

impl ModelSettings {
    pub fn validate(&self) -> ModelResult<()> {
        if !(self.payback_cap_years > 0.0) {
            return Err(ModelError::Configuration("payback_cap_years must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.self_consumption_fraction) {
            return Err(ModelError::Configuration(
                "self_consumption_fraction must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Directory that receives this scenario's per-year agent snapshots.
    pub fn scenario_output_dir(&self, scenario_name: &str) -> PathBuf {
        self.output_dir.join(scenario_name)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct YearRange {
    start: Year,
    end: Year,
    step: Year,
}

#[derive(Debug, Clone, Deserialize)]
struct ScenarioFile {
    context: ScenarioContext,
    #[serde(default)]
    years: Option<YearRange>,
    #[serde(default)]
    settings: ModelSettings,
}

/// Everything a run needs, loaded from a scenario directory.
#[derive(Debug, Clone)]
pub struct ScenarioInputs {
    pub context: ScenarioContext,
    pub settings: ModelSettings,
    pub agents: Vec<AgentRecord>,
    pub reference: ReferenceInputs,
    pub starting_capacities: Vec<StartingCapacityRow>,
    /// Capacity factor per resource profile, for the bundled simulator.
    pub resource_profiles: BTreeMap<String, f64>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", path.display()))?;
    serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Cannot parse {}: {e}", path.display()))
}

impl ScenarioInputs {
    /// Load from a scenario directory.
    /// In tests, use ScenarioInputs::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let dir = Path::new(data_dir);

        let file: ScenarioFile = read_json(&dir.join("scenario.json"))?;
        let mut context = file.context;
        if let Some(range) = file.years {
            context.model_years = create_model_years(range.start, range.end, range.step)?;
        }
        context.validate()?;
        file.settings.validate()?;

        let agents_path = dir.join("agents.json");
        let agents = if agents_path.exists() {
            let rows: Vec<AgentInput> = read_json(&agents_path)?;
            rows.into_iter().map(AgentRecord::from).collect()
        } else {
            let spec: PopulationSpec = read_json(&dir.join("population.json"))?;
            spec.generate(context.random_seed)?
        };

        let reference: ReferenceInputs = read_json(&dir.join("reference.json"))?;

        let starting_path = dir.join("starting_capacities.json");
        let starting_capacities = if starting_path.exists() {
            read_json(&starting_path)?
        } else {
            log::warn!("{} not found; every segment starts from zero", starting_path.display());
            Vec::new()
        };

        let resource_profiles = read_json(&dir.join("resource_profiles.json"))?;

        log::info!(
            "loaded scenario '{}' from {data_dir}: {} agents, {} model years",
            context.scenario_name,
            agents.len(),
            context.model_years.len()
        );

        Ok(Self {
            context,
            settings: file.settings,
            agents,
            reference,
            starting_capacities,
            resource_profiles,
        })
    }

    /// Small two-state scenario with hardcoded inputs, for use in tests.
    pub fn default_test() -> Self {
        let context = ScenarioContext {
            scenario_name: "test_scenario".into(),
            technology: Technology::Solar,
            region: "test_region".into(),
            sectors: vec![Sector::Residential, Sector::Commercial],
            model_years: vec![2020, 2022, 2024],
            random_seed: 42,
        };
        let settings = ModelSettings {
            write_annual_agents: false,
            ..ModelSettings::default()
        };

        let agent = |id: u64,
                     geo: &str,
                     sector: Sector,
                     bin: u32,
                     customers: f64,
                     frac: f64,
                     load: f64,
                     roof: f64,
                     price: f64,
                     profile: &str| {
            AgentRecord::new(
                id,
                AgentKey {
                    geography: geo.into(),
                    sector,
                    building_type: if sector == Sector::Residential {
                        "single_family".into()
                    } else {
                        "office".into()
                    },
                    bin,
                },
                AgentSeed {
                    customers_in_bin: customers,
                    developable_frac: frac,
                    load_kwh_per_customer: load,
                    developable_roof_sqft: roof,
                    elec_price_usd_per_kwh: price,
                    resource_profile: profile.into(),
                },
            )
        };
        use Sector::{Commercial as Com, Residential as Res};
        let agents = vec![
            agent(1, "CA", Res, 0, 10_000.0, 0.60, 9_000.0, 600.0, 0.18, "sunny"),
            agent(2, "CA", Res, 1, 10_000.0, 0.55, 11_000.0, 700.0, 0.18, "sunny"),
            agent(3, "CA", Com, 0, 800.0, 0.50, 120_000.0, 8_000.0, 0.14, "sunny"),
            agent(4, "CA", Com, 1, 800.0, 0.45, 90_000.0, 6_000.0, 0.14, "sunny"),
            agent(5, "NY", Res, 0, 12_000.0, 0.40, 7_500.0, 500.0, 0.20, "cloudy"),
            agent(6, "NY", Res, 1, 12_000.0, 0.35, 8_500.0, 550.0, 0.20, "cloudy"),
            agent(7, "NY", Com, 0, 900.0, 0.45, 100_000.0, 7_000.0, 0.16, "cloudy"),
            agent(8, "NY", Com, 1, 900.0, 0.40, 80_000.0, 5_000.0, 0.16, "cloudy"),
        ];

        let geos = ["CA", "NY"];
        let sectors = [Res, Com];
        let mut reference = ReferenceInputs {
            financial_scalars: vec![FinancialScalarsRow { inflation_rate: 0.025 }],
            ..ReferenceInputs::default()
        };

        for sector in sectors {
            reference.load_growth.push(LoadGrowthRow { sector, year: 2020, load_multiplier: 1.0 });
            reference.load_growth.push(LoadGrowthRow { sector, year: 2024, load_multiplier: 1.04 });

            let (capex_2020, capex_2024, om) = if sector == Res {
                (3_000.0, 2_600.0, 20.0)
            } else {
                (2_200.0, 1_900.0, 18.0)
            };
            for (year, capex) in [(2020, capex_2020), (2024, capex_2024)] {
                reference.pv_trajectories.push(PvTrajectoryRow {
                    sector,
                    year,
                    capex_usd_per_kw: capex,
                    om_usd_per_kw_yr: om,
                    degradation_rate: 0.005,
                    power_density_w_per_sqft: 15.0,
                });
            }
            reference.battery_trajectories.push(BatteryTrajectoryRow {
                sector,
                year: 2020,
                capex_usd_per_kwh: 600.0,
                capex_usd_per_kw: 300.0,
                om_usd_per_kw_yr: 10.0,
                kwh_per_pv_kw: 1.5,
                kw_per_kwh: 0.5,
                round_trip_efficiency: 0.9,
            });

            let terms = if sector == Res {
                FinancingParams {
                    loan_interest_rate: 0.06,
                    loan_term_yrs: 20,
                    down_payment_fraction: 0.2,
                    real_discount_rate: 0.05,
                    tax_rate: 0.3,
                    economic_lifetime_yrs: 25,
                    itc_fraction: 0.3,
                }
            } else {
                FinancingParams {
                    loan_interest_rate: 0.07,
                    loan_term_yrs: 15,
                    down_payment_fraction: 0.2,
                    real_discount_rate: 0.07,
                    tax_rate: 0.35,
                    economic_lifetime_yrs: 25,
                    itc_fraction: 0.3,
                }
            };
            reference.financing_terms.push(FinancingRow { sector, year: 2020, terms });

            for (payback_period, max_market_share) in
                [(0.0, 0.9), (5.0, 0.6), (10.0, 0.3), (15.0, 0.12), (20.0, 0.05), (30.0, 0.0)]
            {
                reference.max_market_share.push(MarketShareRow {
                    sector,
                    payback_period,
                    max_market_share,
                });
            }

            for geo in geos {
                for (year, index) in [(2020, 1.0), (2030, 1.2), (2040, 1.4)] {
                    reference.elec_prices.push(ElecPriceRow {
                        geography: geo.into(),
                        sector,
                        year,
                        price_index: index,
                    });
                }
                reference.bass_params.push(BassParamRow {
                    geography: geo.into(),
                    sector,
                    p: 0.0015,
                    q: if sector == Res { 0.3 } else { 0.25 },
                });
            }
        }

        reference.depreciation_schedules.push(DepreciationRow {
            sector: Com,
            year: 2020,
            schedule: vec![0.2, 0.32, 0.192, 0.1152, 0.1152, 0.0576],
        });
        for (geo, wholesale, carbon) in [("CA", 0.04, 0.0002), ("NY", 0.045, 0.0003)] {
            reference.wholesale_prices.push(WholesalePriceRow {
                geography: geo.into(),
                year: 2020,
                usd_per_kwh: wholesale,
            });
            reference.carbon_intensities.push(CarbonIntensityRow {
                geography: geo.into(),
                year: 2020,
                t_co2_per_kwh: carbon,
            });
        }
        reference.value_of_resiliency.push(ResiliencyRow {
            geography: "CA".into(),
            sector: Res,
            usd_per_kwh_yr: 15.0,
        });
        reference.state_incentives.push(StateIncentiveRow {
            geography: "NY".into(),
            sector: Res,
            cbi_usd_per_kw: 200.0,
            max_cbi_usd: 2_000.0,
            start_year: 2020,
            end_year: 2022,
        });
        reference.nem_state_limits = vec![
            NemStateRow { geography: "CA".into(), cap_kw: Some(2_600.0), sunset_year: None },
            NemStateRow { geography: "NY".into(), cap_kw: None, sunset_year: Some(2030) },
        ];
        for (geo, res_kw, com_kw) in [("CA", 10.0, 1_000.0), ("NY", 12.0, 2_000.0)] {
            reference.nem_sector_limits.push(NemSectorRow {
                geography: geo.into(),
                sector: Res,
                system_kw_limit: res_kw,
            });
            reference.nem_sector_limits.push(NemSectorRow {
                geography: geo.into(),
                sector: Com,
                system_kw_limit: com_kw,
            });
        }

        let starting = |geo: &str, sector: Sector, adopters: f64, kw: f64| StartingCapacityRow {
            geography: geo.into(),
            sector,
            system_kw_cum: kw,
            batt_kw_cum: 0.0,
            batt_kwh_cum: 0.0,
            number_of_adopters: adopters,
        };
        let starting_capacities = vec![
            starting("CA", Res, 300.0, 1_500.0),
            starting("CA", Com, 20.0, 1_000.0),
            starting("NY", Res, 200.0, 1_000.0),
            starting("NY", Com, 10.0, 500.0),
        ];

        let resource_profiles = BTreeMap::from([
            ("sunny".to_string(), 0.20),
            ("cloudy".to_string(), 0.14),
        ]);

        Self {
            context,
            settings,
            agents,
            reference,
            starting_capacities,
            resource_profiles,
        }
    }
}
