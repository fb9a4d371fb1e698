pub mod command;
pub mod detection;
pub mod roller;
pub mod sensor;

pub use command::{Action, Intent, Station};
pub use detection::{BBox, Detection};
pub use roller::{RollerRecord, Verdict, NO_DEFECT};
pub use sensor::{Edge, EdgeDetector, SensorSnapshot, Signal};
