use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use crate::db::models::{RunStatus, VerdictOutcome};
use crate::models::{Action, Station};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_run_status(value: &str) -> Result<RunStatus> {
    match value {
        "Running" => Ok(RunStatus::Running),
        "Completed" => Ok(RunStatus::Completed),
        "Interrupted" => Ok(RunStatus::Interrupted),
        other => Err(anyhow!("unknown run status {other}")),
    }
}

pub fn parse_outcome(value: &str) -> Result<VerdictOutcome> {
    match value {
        "Forwarded" => Ok(VerdictOutcome::Forwarded),
        "SkippedUpstreamReject" => Ok(VerdictOutcome::SkippedUpstreamReject),
        "HandoffViolation" => Ok(VerdictOutcome::HandoffViolation),
        other => Err(anyhow!("unknown verdict outcome {other}")),
    }
}

pub fn parse_station(value: &str) -> Result<Station> {
    match value {
        "bigface" => Ok(Station::Bigface),
        "od" => Ok(Station::Od),
        other => Err(anyhow!("unknown station {other}")),
    }
}

pub fn parse_action(value: &str) -> Result<Action> {
    match value {
        "accept" => Ok(Action::Accept),
        "reject" => Ok(Action::Reject),
        other => Err(anyhow!("unknown action {other}")),
    }
}
