//! Reference (price / performance / financing / policy) tables.
//!
//! Rows arrive as `ReferenceInputs`, are ingested into the run's workspace,
//! read back, and indexed into `ReferenceTables`. After indexing the tables
//! are read-only for the rest of the run.

use crate::{
    agent::FinancingParams,
    error::{ModelError, ModelResult},
    types::{GeographyId, Sector, Year},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

// ── Raw rows ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadGrowthRow {
    pub sector: Sector,
    pub year: Year,
    pub load_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElecPriceRow {
    pub geography: GeographyId,
    pub sector: Sector,
    pub year: Year,
    /// Retail price relative to an arbitrary base year.
    pub price_index: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WholesalePriceRow {
    pub geography: GeographyId,
    pub year: Year,
    pub usd_per_kwh: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PvTrajectoryRow {
    pub sector: Sector,
    pub year: Year,
    pub capex_usd_per_kw: f64,
    pub om_usd_per_kw_yr: f64,
    pub degradation_rate: f64,
    pub power_density_w_per_sqft: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatteryTrajectoryRow {
    pub sector: Sector,
    pub year: Year,
    pub capex_usd_per_kwh: f64,
    pub capex_usd_per_kw: f64,
    pub om_usd_per_kw_yr: f64,
    pub kwh_per_pv_kw: f64,
    pub kw_per_kwh: f64,
    pub round_trip_efficiency: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancingRow {
    pub sector: Sector,
    pub year: Year,
    #[serde(flatten)]
    pub terms: FinancingParams,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DepreciationRow {
    pub sector: Sector,
    pub year: Year,
    /// Fraction of the depreciable basis claimed in each year of service.
    pub schedule: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CarbonIntensityRow {
    pub geography: GeographyId,
    pub year: Year,
    pub t_co2_per_kwh: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResiliencyRow {
    pub geography: GeographyId,
    pub sector: Sector,
    pub usd_per_kwh_yr: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateIncentiveRow {
    pub geography: GeographyId,
    pub sector: Sector,
    pub cbi_usd_per_kw: f64,
    pub max_cbi_usd: f64,
    pub start_year: Year,
    pub end_year: Year,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketShareRow {
    pub sector: Sector,
    pub payback_period: f64,
    pub max_market_share: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BassParamRow {
    pub geography: GeographyId,
    pub sector: Sector,
    pub p: f64,
    pub q: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NemStateRow {
    pub geography: GeographyId,
    pub cap_kw: Option<f64>,
    pub sunset_year: Option<Year>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NemSectorRow {
    pub geography: GeographyId,
    pub sector: Sector,
    pub system_kw_limit: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancialScalarsRow {
    pub inflation_rate: f64,
}

/// Installed base at the start of the run, read from the scenario database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartingCapacityRow {
    pub geography: GeographyId,
    pub sector: Sector,
    pub system_kw_cum: f64,
    pub batt_kw_cum: f64,
    pub batt_kwh_cum: f64,
    pub number_of_adopters: f64,
}

/// Every reference table of a scenario, as loaded from disk or the workspace.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReferenceInputs {
    pub financial_scalars: Vec<FinancialScalarsRow>,
    pub load_growth: Vec<LoadGrowthRow>,
    pub elec_prices: Vec<ElecPriceRow>,
    pub wholesale_prices: Vec<WholesalePriceRow>,
    pub pv_trajectories: Vec<PvTrajectoryRow>,
    pub battery_trajectories: Vec<BatteryTrajectoryRow>,
    pub financing_terms: Vec<FinancingRow>,
    pub depreciation_schedules: Vec<DepreciationRow>,
    pub carbon_intensities: Vec<CarbonIntensityRow>,
    pub value_of_resiliency: Vec<ResiliencyRow>,
    pub state_incentives: Vec<StateIncentiveRow>,
    pub max_market_share: Vec<MarketShareRow>,
    pub bass_params: Vec<BassParamRow>,
    pub nem_state_limits: Vec<NemStateRow>,
    pub nem_sector_limits: Vec<NemSectorRow>,
}

// ── Indexed tables ─────────────────────────────────────────────

/// A keyed time series. Lookups return the latest point at or before the
/// requested year.
#[derive(Debug, Clone)]
pub struct YearSeries<K: Ord, V> {
    table: &'static str,
    points: BTreeMap<K, BTreeMap<Year, V>>,
}

impl<K: Ord + Debug, V> YearSeries<K, V> {
    fn build<I>(table: &'static str, rows: I) -> ModelResult<Self>
    where
        I: IntoIterator<Item = (K, Year, V)>,
    {
        let mut points: BTreeMap<K, BTreeMap<Year, V>> = BTreeMap::new();
        for (key, year, value) in rows {
            let series = points.entry(key).or_default();
            if series.insert(year, value).is_some() {
                return Err(ModelError::ingestion(table, format!("duplicate row for year {year}")));
            }
        }
        Ok(Self { table, points })
    }

    pub fn at(&self, key: &K, year: Year) -> ModelResult<&V> {
        self.points
            .get(key)
            .and_then(|series| series.range(..=year).next_back())
            .map(|(_, v)| v)
            .ok_or_else(|| ModelError::MissingReference {
                table: self.table,
                key: format!("{key:?} at {year}"),
            })
    }

    /// Every point of one key's series from `from` through `to` inclusive.
    pub fn span(&self, key: &K, from: Year, to: Year) -> impl Iterator<Item = (Year, &V)> {
        self.points
            .get(key)
            .into_iter()
            .flat_map(move |series| series.range(from..=to).map(|(y, v)| (*y, v)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BassParams {
    pub p: f64,
    pub q: f64,
}

/// Calibrated payback → maximum market share curve for one sector.
/// Points are sorted by payback and the share never increases with payback.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketShareCurve {
    points: Vec<(f64, f64)>,
}

impl MarketShareCurve {
    pub fn new(mut points: Vec<(f64, f64)>) -> ModelResult<Self> {
        const TABLE: &str = "max_market_share";
        if points.is_empty() {
            return Err(ModelError::ingestion(TABLE, "curve has no points"));
        }
        if points.iter().any(|(pb, s)| !pb.is_finite() || !(0.0..=1.0).contains(s)) {
            return Err(ModelError::ingestion(TABLE, "share outside [0, 1] or non-finite payback"));
        }
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        for pair in points.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(ModelError::ingestion(
                    TABLE,
                    format!("duplicate payback point {}", pair[0].0),
                ));
            }
            if pair[1].1 > pair[0].1 {
                return Err(ModelError::ingestion(
                    TABLE,
                    format!(
                        "share rises from {} to {} between payback {} and {}",
                        pair[0].1, pair[1].1, pair[0].0, pair[1].0
                    ),
                ));
            }
        }
        Ok(Self { points })
    }

    /// Maximum market share for a payback period, linearly interpolated and
    /// held flat outside the calibrated range.
    pub fn ceiling(&self, payback: f64) -> f64 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if payback <= first.0 {
            return first.1;
        }
        if payback >= last.0 {
            return last.1;
        }
        let idx = self.points.partition_point(|(pb, _)| *pb <= payback);
        let (x0, y0) = self.points[idx - 1];
        let (x1, y1) = self.points[idx];
        y0 + (y1 - y0) * (payback - x0) / (x1 - x0)
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceTables {
    pub inflation_rate: f64,
    pub load_growth: YearSeries<Sector, f64>,
    pub elec_price_index: YearSeries<(GeographyId, Sector), f64>,
    pub wholesale_prices: YearSeries<GeographyId, f64>,
    pub pv: YearSeries<Sector, PvTrajectoryRow>,
    pub battery: YearSeries<Sector, BatteryTrajectoryRow>,
    pub financing: YearSeries<Sector, FinancingParams>,
    pub depreciation: YearSeries<Sector, Vec<f64>>,
    pub carbon_intensity: YearSeries<GeographyId, f64>,
    resiliency: BTreeMap<(GeographyId, Sector), f64>,
    incentives: BTreeMap<(GeographyId, Sector), Vec<StateIncentiveRow>>,
    curves: BTreeMap<Sector, MarketShareCurve>,
    bass: BTreeMap<(GeographyId, Sector), BassParams>,
}

impl ReferenceTables {
    /// Index and validate raw reference rows.
    pub fn index(inputs: &ReferenceInputs) -> ModelResult<Self> {
        let inflation_rate = match inputs.financial_scalars.as_slice() {
            [only] => only.inflation_rate,
            rows => {
                return Err(ModelError::ingestion(
                    "financial_scalars",
                    format!("expected exactly one row, found {}", rows.len()),
                ))
            }
        };

        for f in &inputs.financing_terms {
            let t = &f.terms;
            let fractions = [t.down_payment_fraction, t.tax_rate, t.itc_fraction];
            if fractions.iter().any(|v| !(0.0..=1.0).contains(v)) || t.economic_lifetime_yrs == 0 {
                return Err(ModelError::ingestion(
                    "financing_terms",
                    format!("invalid terms for {} {}", f.sector, f.year),
                ));
            }
        }

        let mut curve_points: BTreeMap<Sector, Vec<(f64, f64)>> = BTreeMap::new();
        for r in &inputs.max_market_share {
            curve_points
                .entry(r.sector)
                .or_default()
                .push((r.payback_period, r.max_market_share));
        }
        let curves = curve_points
            .into_iter()
            .map(|(sector, pts)| Ok((sector, MarketShareCurve::new(pts)?)))
            .collect::<ModelResult<BTreeMap<_, _>>>()?;

        let mut bass = BTreeMap::new();
        for r in &inputs.bass_params {
            if !(r.p >= 0.0 && r.q >= 0.0) {
                return Err(ModelError::ingestion(
                    "bass_params",
                    format!("negative coefficient for {} {}", r.geography, r.sector),
                ));
            }
            let prior = bass.insert((r.geography.clone(), r.sector), BassParams { p: r.p, q: r.q });
            if prior.is_some() {
                return Err(ModelError::ingestion(
                    "bass_params",
                    format!("duplicate row for {} {}", r.geography, r.sector),
                ));
            }
        }

        let mut incentives: BTreeMap<(GeographyId, Sector), Vec<StateIncentiveRow>> =
            BTreeMap::new();
        for r in &inputs.state_incentives {
            incentives
                .entry((r.geography.clone(), r.sector))
                .or_default()
                .push(r.clone());
        }

        Ok(Self {
            inflation_rate,
            load_growth: YearSeries::build(
                "load_growth",
                inputs.load_growth.iter().map(|r| (r.sector, r.year, r.load_multiplier)),
            )?,
            elec_price_index: YearSeries::build(
                "elec_prices",
                inputs
                    .elec_prices
                    .iter()
                    .map(|r| ((r.geography.clone(), r.sector), r.year, r.price_index)),
            )?,
            wholesale_prices: YearSeries::build(
                "wholesale_prices",
                inputs
                    .wholesale_prices
                    .iter()
                    .map(|r| (r.geography.clone(), r.year, r.usd_per_kwh)),
            )?,
            pv: YearSeries::build(
                "pv_trajectories",
                inputs.pv_trajectories.iter().map(|r| (r.sector, r.year, r.clone())),
            )?,
            battery: YearSeries::build(
                "battery_trajectories",
                inputs.battery_trajectories.iter().map(|r| (r.sector, r.year, r.clone())),
            )?,
            financing: YearSeries::build(
                "financing_terms",
                inputs.financing_terms.iter().map(|r| (r.sector, r.year, r.terms)),
            )?,
            depreciation: YearSeries::build(
                "depreciation_schedules",
                inputs
                    .depreciation_schedules
                    .iter()
                    .map(|r| (r.sector, r.year, r.schedule.clone())),
            )?,
            carbon_intensity: YearSeries::build(
                "carbon_intensities",
                inputs
                    .carbon_intensities
                    .iter()
                    .map(|r| (r.geography.clone(), r.year, r.t_co2_per_kwh)),
            )?,
            resiliency: inputs
                .value_of_resiliency
                .iter()
                .map(|r| ((r.geography.clone(), r.sector), r.usd_per_kwh_yr))
                .collect(),
            incentives,
            curves,
            bass,
        })
    }

    pub fn bass_params(&self, geography: &GeographyId, sector: Sector) -> ModelResult<BassParams> {
        self.bass
            .get(&(geography.clone(), sector))
            .copied()
            .ok_or_else(|| ModelError::MissingReference {
                table: "bass_params",
                key: format!("{geography}/{sector}"),
            })
    }

    pub fn market_share_curves(&self) -> &BTreeMap<Sector, MarketShareCurve> {
        &self.curves
    }

    /// Resiliency value is optional: segments without a row get nothing.
    pub fn resiliency_value(&self, geography: &GeographyId, sector: Sector) -> f64 {
        self.resiliency
            .get(&(geography.clone(), sector))
            .copied()
            .unwrap_or(0.0)
    }

    /// The capacity-based incentive in force for a segment in `year`, if any.
    pub fn active_incentive(
        &self,
        geography: &GeographyId,
        sector: Sector,
        year: Year,
    ) -> Option<&StateIncentiveRow> {
        self.incentives
            .get(&(geography.clone(), sector))
            .and_then(|rows| {
                rows.iter()
                    .find(|r| (r.start_year..=r.end_year).contains(&year))
            })
    }
}

/// Starting installed base per geography × sector.
#[derive(Debug, Clone, Default)]
pub struct StartingCapacities {
    rows: BTreeMap<(GeographyId, Sector), StartingCapacityRow>,
}

impl StartingCapacities {
    pub fn new(rows: Vec<StartingCapacityRow>) -> ModelResult<Self> {
        let mut map = BTreeMap::new();
        for r in rows {
            if r.system_kw_cum < 0.0 || r.number_of_adopters < 0.0 {
                return Err(ModelError::ingestion(
                    "starting_capacities",
                    format!("negative starting capacity for {} {}", r.geography, r.sector),
                ));
            }
            let key = (r.geography.clone(), r.sector);
            if map.insert(key, r).is_some() {
                return Err(ModelError::ingestion("starting_capacities", "duplicate segment"));
            }
        }
        Ok(Self { rows: map })
    }

    /// Segments without a row start from zero installed capacity.
    pub fn get(&self, geography: &GeographyId, sector: Sector) -> Option<&StartingCapacityRow> {
        self.rows.get(&(geography.clone(), sector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_interpolates_and_holds_flat_outside() {
        let curve = MarketShareCurve::new(vec![(10.0, 0.3), (0.0, 0.9), (5.0, 0.6)]).unwrap();
        assert_eq!(curve.ceiling(-1.0), 0.9);
        assert_eq!(curve.ceiling(5.0), 0.6);
        assert!((curve.ceiling(7.5) - 0.45).abs() < 1e-12);
        assert_eq!(curve.ceiling(40.0), 0.3);
    }

    #[test]
    fn rising_curve_is_rejected() {
        assert!(MarketShareCurve::new(vec![(0.0, 0.2), (5.0, 0.4)]).is_err());
        assert!(MarketShareCurve::new(vec![(0.0, 0.2), (0.0, 0.1)]).is_err());
        assert!(MarketShareCurve::new(vec![]).is_err());
    }

    #[test]
    fn series_returns_latest_point_at_or_before_year() {
        let series = YearSeries::build(
            "load_growth",
            [(Sector::Residential, 2020, 1.0), (Sector::Residential, 2030, 1.2)],
        )
        .unwrap();
        assert_eq!(*series.at(&Sector::Residential, 2025).unwrap(), 1.0);
        assert_eq!(*series.at(&Sector::Residential, 2030).unwrap(), 1.2);
        assert!(series.at(&Sector::Residential, 2019).is_err());
        assert!(series.at(&Sector::Commercial, 2025).is_err());
    }
}
