pub mod command;
pub mod run;
pub mod verdict;

pub use command::CommandRecord;
pub use run::{InspectionRun, RunStatus};
pub use verdict::{VerdictOutcome, VerdictRecord};
