//! Store methods for the per-year agent output table.

use crate::{
    agent::{AgentRecord, AgentStore},
    error::ModelResult,
    types::Year,
};
use rusqlite::params;

use super::table::{self, int, real, text, Column, TableRow};
use super::{ScenarioStore, SchemaName};

pub const OUTPUT_TABLE: &str = "agent_outputs";

/// The public agent schema, in column order. Working columns never appear
/// here and are never persisted.
pub const OUTPUT_COLUMNS: &[Column] = &[
    int("agent_id"),
    text("geography"),
    text("sector"),
    text("building_type"),
    int("bin"),
    int("year"),
    real("customers_in_bin"),
    real("developable_frac"),
    real("load_kwh_per_customer_in_bin_initial"),
    real("load_kwh_per_customer_in_bin"),
    real("developable_roof_sqft"),
    real("elec_price_usd_per_kwh_initial"),
    real("elec_price_usd_per_kwh"),
    text("resource_profile"),
    real("system_kw"),
    real("batt_kw"),
    real("batt_kwh"),
    real("annual_energy_production_kwh"),
    real("capacity_factor"),
    real("first_year_bill_savings_usd"),
    real("npv"),
    real("payback_period"),
    real("market_share_ceiling"),
    real("developable_customers_in_bin"),
    real("market_share_last_year"),
    real("market_share"),
    real("new_adopters"),
    real("number_of_adopters"),
    real("system_kw_cum_last_year"),
    real("system_kw_cum"),
    real("batt_kw_cum_last_year"),
    real("batt_kw_cum"),
    real("batt_kwh_cum_last_year"),
    real("batt_kwh_cum"),
    real("total_gen_kwh"),
    real("avoided_co2_tonnes"),
];

impl TableRow for AgentRecord {
    const TABLE: &'static str = OUTPUT_TABLE;
    const COLUMNS: &'static [Column] = OUTPUT_COLUMNS;
}

impl ScenarioStore {
    pub fn create_output_table(&self, schema: &SchemaName) -> ModelResult<()> {
        let qualified = schema.qualify(OUTPUT_TABLE);
        self.conn.execute_batch(&table::create_sql::<AgentRecord>(&qualified))?;
        self.conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS \"{schema}\".idx_agent_outputs_year ON {OUTPUT_TABLE}(year);"
        ))?;
        Ok(())
    }

    /// Write one year's rows in a single transaction. The first model year
    /// replaces whatever the table held; later years append.
    pub fn write_year_outputs(
        &self,
        schema: &SchemaName,
        year: Year,
        agents: &AgentStore,
        replace: bool,
    ) -> ModelResult<usize> {
        let qualified = schema.qualify(OUTPUT_TABLE);
        let write = || -> ModelResult<usize> {
            let tx = self.conn.unchecked_transaction()?;
            if replace {
                tx.execute(&format!("DELETE FROM {qualified}"), [])?;
            }
            {
                let mut stmt = tx.prepare(&table::insert_sql::<AgentRecord>(&qualified))?;
                for agent in agents.iter() {
                    stmt.execute(rusqlite::params_from_iter(table::row_values(agent)?))?;
                }
            }
            tx.commit()?;
            Ok(agents.len())
        };
        let written = write().map_err(|e| e.persisting(year))?;
        log::debug!("persisted {written} agent rows for {year} into {qualified}");
        Ok(written)
    }

    /// Read one year's persisted rows, ordered by agent id.
    pub fn agent_outputs(&self, schema: &SchemaName, year: Year) -> ModelResult<Vec<AgentRecord>> {
        let sql = table::select_sql::<AgentRecord>(&schema.qualify(OUTPUT_TABLE));
        let mut stmt = self
            .conn
            .prepare(&format!("{sql} WHERE year = ?1 ORDER BY agent_id"))?;
        let mut rows = stmt.query(params![year])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(table::from_sql_row::<AgentRecord>(row)?);
        }
        Ok(out)
    }

    pub fn output_row_count(&self, schema: &SchemaName, year: Year) -> ModelResult<i64> {
        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE year = ?1",
                schema.qualify(OUTPUT_TABLE)
            ),
            params![year],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
