//! Store methods for reference tables held in the workspace.

use crate::{
    error::{ModelError, ModelResult},
    reference::*,
    types::Year,
};
use rusqlite::params;

use super::table::{self, int, json, nullable, real, text, Column, TableRow};
use super::{ScenarioStore, SchemaName};

pub const NEM_STATE_TABLE: &str = "nem_state_limits";

macro_rules! reference_table {
    ($row:ty, $table:expr, [$($col:expr),+ $(,)?]) => {
        impl TableRow for $row {
            const TABLE: &'static str = $table;
            const COLUMNS: &'static [Column] = &[$($col),+];
        }
    };
}

reference_table!(FinancialScalarsRow, "financial_scalars", [real("inflation_rate")]);
reference_table!(LoadGrowthRow, "load_growth", [text("sector"), int("year"), real("load_multiplier")]);
reference_table!(
    ElecPriceRow,
    "elec_prices",
    [text("geography"), text("sector"), int("year"), real("price_index")]
);
reference_table!(
    WholesalePriceRow,
    "wholesale_prices",
    [text("geography"), int("year"), real("usd_per_kwh")]
);
reference_table!(
    PvTrajectoryRow,
    "pv_trajectories",
    [
        text("sector"),
        int("year"),
        real("capex_usd_per_kw"),
        real("om_usd_per_kw_yr"),
        real("degradation_rate"),
        real("power_density_w_per_sqft"),
    ]
);
reference_table!(
    BatteryTrajectoryRow,
    "battery_trajectories",
    [
        text("sector"),
        int("year"),
        real("capex_usd_per_kwh"),
        real("capex_usd_per_kw"),
        real("om_usd_per_kw_yr"),
        real("kwh_per_pv_kw"),
        real("kw_per_kwh"),
        real("round_trip_efficiency"),
    ]
);
reference_table!(
    FinancingRow,
    "financing_terms",
    [
        text("sector"),
        int("year"),
        real("loan_interest_rate"),
        int("loan_term_yrs"),
        real("down_payment_fraction"),
        real("real_discount_rate"),
        real("tax_rate"),
        int("economic_lifetime_yrs"),
        real("itc_fraction"),
    ]
);
reference_table!(
    DepreciationRow,
    "depreciation_schedules",
    [text("sector"), int("year"), json("schedule")]
);
reference_table!(
    CarbonIntensityRow,
    "carbon_intensities",
    [text("geography"), int("year"), real("t_co2_per_kwh")]
);
reference_table!(
    ResiliencyRow,
    "value_of_resiliency",
    [text("geography"), text("sector"), real("usd_per_kwh_yr")]
);
reference_table!(
    StateIncentiveRow,
    "state_incentives",
    [
        text("geography"),
        text("sector"),
        real("cbi_usd_per_kw"),
        real("max_cbi_usd"),
        int("start_year"),
        int("end_year"),
    ]
);
reference_table!(
    MarketShareRow,
    "max_market_share",
    [text("sector"), real("payback_period"), real("max_market_share")]
);
reference_table!(
    BassParamRow,
    "bass_params",
    [text("geography"), text("sector"), real("p"), real("q")]
);
reference_table!(
    NemStateRow,
    NEM_STATE_TABLE,
    [text("geography"), nullable(real("cap_kw")), nullable(int("sunset_year"))]
);
reference_table!(
    NemSectorRow,
    "nem_sector_limits",
    [text("geography"), text("sector"), real("system_kw_limit")]
);

impl ScenarioStore {
    /// Create a reference table in the workspace and load `rows` into it.
    pub fn ingest_table<T: TableRow>(&self, schema: &SchemaName, rows: &[T]) -> ModelResult<()> {
        let qualified = schema.qualify(T::TABLE);
        let load = || -> ModelResult<()> {
            let tx = self.conn.unchecked_transaction()?;
            tx.execute_batch(&table::create_sql::<T>(&qualified))?;
            {
                let mut stmt = tx.prepare(&table::insert_sql::<T>(&qualified))?;
                for row in rows {
                    stmt.execute(rusqlite::params_from_iter(table::row_values(row)?))?;
                }
            }
            tx.commit()?;
            Ok(())
        };
        load().map_err(|e| match e {
            err @ ModelError::DataIngestion { .. } => err,
            other => ModelError::ingestion(T::TABLE, other.to_string()),
        })?;
        log::debug!("ingested {} rows into {qualified}", rows.len());
        Ok(())
    }

    /// Read a reference table back from the workspace in insertion order.
    pub fn load_table<T: TableRow>(&self, schema: &SchemaName) -> ModelResult<Vec<T>> {
        let sql = table::select_sql::<T>(&schema.qualify(T::TABLE));
        let mut stmt = self.conn.prepare(&format!("{sql} ORDER BY rowid"))?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(table::from_sql_row::<T>(row)?);
        }
        Ok(out)
    }

    /// Ingest every reference table of a scenario into the workspace.
    pub fn ingest_reference(&self, schema: &SchemaName, inputs: &ReferenceInputs) -> ModelResult<()> {
        self.ingest_table(schema, &inputs.financial_scalars)?;
        self.ingest_table(schema, &inputs.load_growth)?;
        self.ingest_table(schema, &inputs.elec_prices)?;
        self.ingest_table(schema, &inputs.wholesale_prices)?;
        self.ingest_table(schema, &inputs.pv_trajectories)?;
        self.ingest_table(schema, &inputs.battery_trajectories)?;
        self.ingest_table(schema, &inputs.financing_terms)?;
        self.ingest_table(schema, &inputs.depreciation_schedules)?;
        self.ingest_table(schema, &inputs.carbon_intensities)?;
        self.ingest_table(schema, &inputs.value_of_resiliency)?;
        self.ingest_table(schema, &inputs.state_incentives)?;
        self.ingest_table(schema, &inputs.max_market_share)?;
        self.ingest_table(schema, &inputs.bass_params)?;
        self.ingest_table(schema, &inputs.nem_state_limits)?;
        self.ingest_table(schema, &inputs.nem_sector_limits)?;
        Ok(())
    }

    pub fn load_reference(&self, schema: &SchemaName) -> ModelResult<ReferenceInputs> {
        Ok(ReferenceInputs {
            financial_scalars: self.load_table(schema)?,
            load_growth: self.load_table(schema)?,
            elec_prices: self.load_table(schema)?,
            wholesale_prices: self.load_table(schema)?,
            pv_trajectories: self.load_table(schema)?,
            battery_trajectories: self.load_table(schema)?,
            financing_terms: self.load_table(schema)?,
            depreciation_schedules: self.load_table(schema)?,
            carbon_intensities: self.load_table(schema)?,
            value_of_resiliency: self.load_table(schema)?,
            state_incentives: self.load_table(schema)?,
            max_market_share: self.load_table(schema)?,
            bass_params: self.load_table(schema)?,
            nem_state_limits: self.load_table(schema)?,
            nem_sector_limits: self.load_table(schema)?,
        })
    }

    /// Record a net-metering sunset. Only an unset sunset year is ever
    /// written; an existing one is left untouched.
    pub fn update_nem_sunset(&self, schema: &SchemaName, geography: &str, year: Year) -> ModelResult<bool> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE {} SET sunset_year = ?2 WHERE geography = ?1 AND sunset_year IS NULL",
                schema.qualify(NEM_STATE_TABLE)
            ),
            params![geography, year],
        )?;
        Ok(changed > 0)
    }
}
