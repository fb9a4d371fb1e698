use chrono::Utc;

use crate::models::{Intent, Verdict};

use super::{CommandRecord, Database, VerdictOutcome, VerdictRecord};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "journal";

use crate::log_warn;

/// Fire-and-forget writer for one inspection run. Every call returns
/// immediately; the row is written on a spawned task.
#[derive(Clone)]
pub struct Journal {
    db: Database,
    run_id: String,
}

impl Journal {
    pub fn new(db: Database, run_id: impl Into<String>) -> Self {
        Self {
            db,
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn record_verdict(&self, verdict: &Verdict, outcome: VerdictOutcome) {
        let record = VerdictRecord {
            id: None,
            run_id: self.run_id.clone(),
            station: verdict.station,
            roller_id: verdict.roller_id,
            defective: verdict.defective,
            defect_names: verdict.defect_names.clone(),
            outcome,
            finalized_at: Utc::now(),
        };
        let db = self.db.clone();
        tokio::spawn(async move {
            if let Err(err) = db.insert_verdict(&record).await {
                log_warn!(
                    "failed to journal {} verdict for roller {}: {err:#}",
                    record.station,
                    record.roller_id
                );
            }
        });
    }

    pub fn record_command(&self, intent: &Intent, error: Option<String>) {
        let record = CommandRecord {
            id: None,
            run_id: self.run_id.clone(),
            station: intent.target,
            action: intent.action,
            roller_id: intent.roller_id,
            success: error.is_none(),
            error,
            issued_at: Utc::now(),
        };
        let db = self.db.clone();
        tokio::spawn(async move {
            if let Err(err) = db.insert_command(&record).await {
                log_warn!("failed to journal command {}_{}: {err:#}", record.action, record.station);
            }
        });
    }
}
