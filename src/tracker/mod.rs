pub mod assign;
mod loop_worker;
mod state;

pub use assign::{match_defect, FramePartition};
pub use loop_worker::{station_loop, HandoffRole, HeadStage, StationContext};
pub use state::{FrameOutcome, RollerTracker};
