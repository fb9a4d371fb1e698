use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime, parse_run_status},
    models::{InspectionRun, RunStatus},
};

fn row_to_run(row: &Row) -> Result<InspectionRun> {
    let started_at: String = row.get("started_at")?;
    let stopped_at: Option<String> = row.get("stopped_at")?;
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(InspectionRun {
        id: row.get("id")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        stopped_at: parse_optional_datetime(stopped_at, "stopped_at")?,
        status: parse_run_status(&status)?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    pub async fn insert_run(&self, run: &InspectionRun) -> Result<()> {
        let record = run.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO inspection_runs (id, started_at, stopped_at, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    record.started_at.to_rfc3339(),
                    record.stopped_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.status.as_str(),
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn mark_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        stopped_at: Option<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let run_id = run_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE inspection_runs
                 SET status = ?1,
                     stopped_at = ?2,
                     updated_at = ?3
                 WHERE id = ?4",
                params![
                    status.as_str(),
                    stopped_at.map(|dt| dt.to_rfc3339()),
                    updated_at.to_rfc3339(),
                    run_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Closes every run a previous process left `Running`. Returns how many
    /// were closed.
    pub async fn interrupt_running_runs(&self, now: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let changed = conn.execute(
                "UPDATE inspection_runs
                 SET status = 'Interrupted',
                     stopped_at = COALESCE(stopped_at, ?1),
                     updated_at = ?1
                 WHERE status = 'Running'",
                params![now.to_rfc3339()],
            )?;
            Ok(changed)
        })
        .await
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<InspectionRun>> {
        let run_id = run_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, started_at, stopped_at, status, created_at, updated_at
                 FROM inspection_runs
                 WHERE id = ?1",
            )?;
            let row = stmt
                .query_row(params![run_id], |row| Ok(row_to_run(row)))
                .optional()?;
            row.transpose()
        })
        .await
    }

    pub async fn list_runs(&self, limit: u32) -> Result<Vec<InspectionRun>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, started_at, stopped_at, status, created_at, updated_at
                 FROM inspection_runs
                 ORDER BY started_at DESC
                 LIMIT ?1",
            )?;
            let mut rows = stmt.query(params![limit])?;
            let mut runs = Vec::new();
            while let Some(row) = rows.next()? {
                runs.push(row_to_run(row)?);
            }
            Ok(runs)
        })
        .await
    }
}
