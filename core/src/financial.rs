//! Financial performance engine — system sizing, cash flow, NPV, payback
//! and the economic market-share ceiling of one agent.
//!
//! This stage is side-effect free: `evaluate()` reads a fully mutated row
//! and returns a `FinancialOutcome`; `apply()` writes it back. Re-running
//! it on the same row yields the same outcome bit for bit.

use crate::{
    agent::{AgentRecord, FinancingParams},
    error::{ModelError, ModelResult},
    performance::{DesignParameters, PerformanceSimulator},
    reference::MarketShareCurve,
    types::{Sector, Technology},
};
use std::collections::BTreeMap;

/// Days per year a battery can cycle to shift exports into self-consumption.
const BATTERY_CYCLES_PER_YEAR: f64 = 365.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinancialSettings {
    pub technology: Technology,
    pub payback_cap_years: f64,
    /// Share of generation consumed on site when exports are not net metered.
    pub self_consumption_fraction: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinancialOutcome {
    pub system_kw: f64,
    pub batt_kw: f64,
    pub batt_kwh: f64,
    pub annual_energy_production_kwh: f64,
    pub capacity_factor: f64,
    pub first_year_bill_savings_usd: f64,
    pub npv: f64,
    pub payback_period: f64,
    pub economic_ceiling: f64,
    pub cash_flow: Vec<f64>,
}

impl FinancialOutcome {
    pub fn apply(self, agent: &mut AgentRecord) {
        agent.system_kw = self.system_kw;
        agent.batt_kw = self.batt_kw;
        agent.batt_kwh = self.batt_kwh;
        agent.annual_energy_production_kwh = self.annual_energy_production_kwh;
        agent.capacity_factor = self.capacity_factor;
        agent.first_year_bill_savings_usd = self.first_year_bill_savings_usd;
        agent.npv = self.npv;
        agent.payback_period = self.payback_period;
        agent.working.economic_ceiling = self.economic_ceiling;
        agent.working.cash_flow = self.cash_flow;
    }
}

pub struct FinancialEngine<'a> {
    settings: FinancialSettings,
    curves: &'a BTreeMap<Sector, MarketShareCurve>,
    simulator: &'a dyn PerformanceSimulator,
}

impl<'a> FinancialEngine<'a> {
    pub fn new(
        settings: FinancialSettings,
        curves: &'a BTreeMap<Sector, MarketShareCurve>,
        simulator: &'a dyn PerformanceSimulator,
    ) -> Self {
        Self {
            settings,
            curves,
            simulator,
        }
    }

    pub fn evaluate(&self, agent: &AgentRecord) -> ModelResult<FinancialOutcome> {
        let w = &agent.working;
        let curve = self
            .curves
            .get(&agent.sector())
            .ok_or_else(|| ModelError::MissingReference {
                table: "max_market_share",
                key: agent.sector().to_string(),
            })?;
        let fin = w.financing.ok_or_else(|| ModelError::MissingReference {
            table: "financing_terms",
            key: agent.key.to_string(),
        })?;

        // Performance of a 1 kW reference design; generation scales with size.
        let reference = self
            .simulator
            .simulate(&DesignParameters {
                agent_id: agent.agent_id,
                year: agent.year,
                geography: agent.geography(),
                sector: agent.sector(),
                system_kw: 1.0,
                degradation_rate: w.pv_degradation_rate,
                resource_profile: &agent.resource_profile,
            })
            .map_err(|e| ModelError::Performance {
                agent_id: agent.agent_id,
                reason: e.to_string(),
            })?;
        let naep = reference.annual_generation_kwh;

        let load = agent.annual_load_kwh();
        let roof_kw = agent.developable_roof_sqft * w.pv_power_density_w_per_sqft / 1000.0;
        let mut system_kw = if naep > 0.0 { (load / naep).min(roof_kw) } else { 0.0 };
        if let Some(limit) = w.nem_system_kw_limit {
            system_kw = system_kw.min(limit);
        }
        if !(system_kw > 0.0) || !system_kw.is_finite() {
            return Ok(self.no_system(curve, reference.capacity_factor));
        }

        let (batt_kw, batt_kwh) = if self.settings.technology.includes_storage() {
            let kwh = system_kw * w.batt_kwh_per_pv_kw;
            (kwh * w.batt_kw_per_kwh, kwh)
        } else {
            (0.0, 0.0)
        };

        let generation = system_kw * naep;
        let self_share = if w.nem_active {
            1.0
        } else {
            let shifted = batt_kwh * w.batt_round_trip_efficiency * BATTERY_CYCLES_PER_YEAR / generation;
            (self.settings.self_consumption_fraction + shifted).min(1.0)
        };

        let capex = system_kw * w.pv_capex_usd_per_kw
            + batt_kwh * w.batt_capex_usd_per_kwh
            + batt_kw * w.batt_capex_usd_per_kw;
        let cbi = if w.cbi_max_usd > 0.0 {
            (system_kw * w.cbi_usd_per_kw).min(w.cbi_max_usd)
        } else {
            system_kw * w.cbi_usd_per_kw
        };
        let net_capex = (capex - cbi).max(0.0);
        let itc = fin.itc_fraction * net_capex;
        let depreciable_basis = net_capex * (1.0 - fin.itc_fraction / 2.0);

        let lifetime = fin.economic_lifetime_yrs as usize;
        let (down_payment, loan_payment) = loan_terms(&fin, net_capex);

        let mut financed = Vec::with_capacity(lifetime + 1);
        let mut cash = Vec::with_capacity(lifetime + 1);
        financed.push(-down_payment);
        cash.push(-net_capex);
        let mut first_year_savings = 0.0;

        for t in 1..=lifetime {
            let age = (t - 1) as i32;
            let gen_t = generation * (1.0 - w.pv_degradation_rate).powi(age);
            let retail_t = agent.elec_price_usd_per_kwh * (1.0 + w.elec_price_escalator).powi(age);
            let inflator = (1.0 + w.inflation_rate).powi(age);

            let self_kwh = (gen_t * self_share).min(load);
            let savings = self_kwh * retail_t + (gen_t - self_kwh) * w.wholesale_usd_per_kwh * inflator;
            if t == 1 {
                first_year_savings = savings;
            }
            let om = (system_kw * w.pv_om_usd_per_kw_yr + batt_kw * w.batt_om_usd_per_kw_yr) * inflator;
            let resiliency = batt_kwh * w.resiliency_usd_per_kwh_yr * inflator;
            let credit = if t == 1 { itc } else { 0.0 };
            let depreciation = w
                .depreciation_schedule
                .get(t - 1)
                .map_or(0.0, |frac| frac * depreciable_basis * fin.tax_rate);

            let operating = savings - om + resiliency + credit + depreciation;
            cash.push(operating);
            let debt_service = if t as u32 <= fin.loan_term_yrs { loan_payment } else { 0.0 };
            financed.push(operating - debt_service);
        }

        let discount = (1.0 + fin.real_discount_rate) * (1.0 + w.inflation_rate) - 1.0;
        let npv = net_present_value(&financed, discount);
        let payback_period = simple_payback(&cash, self.settings.payback_cap_years);

        Ok(FinancialOutcome {
            system_kw,
            batt_kw,
            batt_kwh,
            annual_energy_production_kwh: generation,
            capacity_factor: reference.capacity_factor,
            first_year_bill_savings_usd: first_year_savings,
            npv,
            payback_period,
            economic_ceiling: curve.ceiling(payback_period),
            cash_flow: financed,
        })
    }

    fn no_system(&self, curve: &MarketShareCurve, capacity_factor: f64) -> FinancialOutcome {
        let cap = self.settings.payback_cap_years;
        FinancialOutcome {
            system_kw: 0.0,
            batt_kw: 0.0,
            batt_kwh: 0.0,
            annual_energy_production_kwh: 0.0,
            capacity_factor,
            first_year_bill_savings_usd: 0.0,
            npv: 0.0,
            payback_period: cap,
            economic_ceiling: curve.ceiling(cap),
            cash_flow: Vec::new(),
        }
    }
}

/// Down payment and level annual debt service for a financed purchase.
pub fn loan_terms(fin: &FinancingParams, net_capex: f64) -> (f64, f64) {
    if fin.loan_term_yrs == 0 {
        return (net_capex, 0.0);
    }
    let down = net_capex * fin.down_payment_fraction;
    let principal = net_capex - down;
    (down, annuity_payment(principal, fin.loan_interest_rate, fin.loan_term_yrs))
}

pub fn annuity_payment(principal: f64, rate: f64, term_yrs: u32) -> f64 {
    if principal <= 0.0 || term_yrs == 0 {
        return 0.0;
    }
    if rate == 0.0 {
        return principal / f64::from(term_yrs);
    }
    principal * rate / (1.0 - (1.0 + rate).powi(-(term_yrs as i32)))
}

/// Cash flows are indexed by year, year 0 first.
pub fn net_present_value(cash_flows: &[f64], discount_rate: f64) -> f64 {
    cash_flows
        .iter()
        .enumerate()
        .map(|(t, cf)| cf / (1.0 + discount_rate).powi(t as i32))
        .sum()
}

/// Years until cumulative cash flow turns non-negative, interpolated within
/// the crossing year and rounded to 0.1. A system that never pays back, or
/// pays back later than `cap`, reports `cap`.
pub fn simple_payback(cash_flows: &[f64], cap: f64) -> f64 {
    let mut cumulative = 0.0;
    for (t, cf) in cash_flows.iter().enumerate() {
        let before = cumulative;
        cumulative += cf;
        if cumulative >= 0.0 {
            let years = if t == 0 {
                0.0
            } else {
                (t - 1) as f64 + (-before / cf)
            };
            let rounded = (years * 10.0).round() / 10.0;
            return if rounded.is_finite() { rounded.clamp(0.0, cap) } else { cap };
        }
    }
    cap
}
