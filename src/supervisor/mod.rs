pub mod controller;

pub use controller::{Backends, InspectionController};
