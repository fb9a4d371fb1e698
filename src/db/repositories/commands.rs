use anyhow::Result;
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_action, parse_datetime, parse_station, to_i64, to_u64},
    models::CommandRecord,
};

fn row_to_command(row: &Row) -> Result<CommandRecord> {
    let station: String = row.get("station")?;
    let action: String = row.get("action")?;
    let roller_id: i64 = row.get("roller_id")?;
    let issued_at: String = row.get("issued_at")?;

    Ok(CommandRecord {
        id: row.get("id")?,
        run_id: row.get("run_id")?,
        station: parse_station(&station)?,
        action: parse_action(&action)?,
        roller_id: to_u64(roller_id, "roller_id")?,
        success: row.get("success")?,
        error: row.get("error")?,
        issued_at: parse_datetime(&issued_at, "issued_at")?,
    })
}

impl Database {
    pub async fn insert_command(&self, command: &CommandRecord) -> Result<i64> {
        let record = command.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO plc_commands (run_id, station, action, roller_id, success, error, issued_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.run_id,
                    record.station.as_str(),
                    record.action.as_str(),
                    to_i64(record.roller_id)?,
                    record.success,
                    record.error,
                    record.issued_at.to_rfc3339(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn list_commands(&self, run_id: &str) -> Result<Vec<CommandRecord>> {
        let run_id = run_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, run_id, station, action, roller_id, success, error, issued_at
                 FROM plc_commands
                 WHERE run_id = ?1
                 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query(params![run_id])?;
            let mut commands = Vec::new();
            while let Some(row) = rows.next()? {
                commands.push(row_to_command(row)?);
            }
            Ok(commands)
        })
        .await
    }
}
