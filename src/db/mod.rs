//! Inspection journal: runs, finalized verdicts and issued PLC commands.

mod connection;
mod helpers;
mod journal;
mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;
pub use journal::Journal;
pub use models::{CommandRecord, InspectionRun, RunStatus, VerdictOutcome, VerdictRecord};
