use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_outcome, parse_station, to_i64, to_u64},
    models::VerdictRecord,
};

fn row_to_verdict(row: &Row) -> Result<VerdictRecord> {
    let station: String = row.get("station")?;
    let roller_id: i64 = row.get("roller_id")?;
    let defect_names: String = row.get("defect_names")?;
    let outcome: String = row.get("outcome")?;
    let finalized_at: String = row.get("finalized_at")?;

    Ok(VerdictRecord {
        id: row.get("id")?,
        run_id: row.get("run_id")?,
        station: parse_station(&station)?,
        roller_id: to_u64(roller_id, "roller_id")?,
        defective: row.get("defective")?,
        defect_names: serde_json::from_str(&defect_names)
            .context("failed to parse defect_names")?,
        outcome: parse_outcome(&outcome)?,
        finalized_at: parse_datetime(&finalized_at, "finalized_at")?,
    })
}

impl Database {
    pub async fn insert_verdict(&self, verdict: &VerdictRecord) -> Result<i64> {
        let record = verdict.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO roller_verdicts (run_id, station, roller_id, defective, defect_names, outcome, finalized_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.run_id,
                    record.station.as_str(),
                    to_i64(record.roller_id)?,
                    record.defective,
                    serde_json::to_string(&record.defect_names)?,
                    record.outcome.as_str(),
                    record.finalized_at.to_rfc3339(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn list_verdicts(&self, run_id: &str) -> Result<Vec<VerdictRecord>> {
        let run_id = run_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, run_id, station, roller_id, defective, defect_names, outcome, finalized_at
                 FROM roller_verdicts
                 WHERE run_id = ?1
                 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query(params![run_id])?;
            let mut verdicts = Vec::new();
            while let Some(row) = rows.next()? {
                verdicts.push(row_to_verdict(row)?);
            }
            Ok(verdicts)
        })
        .await
    }
}
