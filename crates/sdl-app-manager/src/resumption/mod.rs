//! Resumption Controller (§4.5): persistence and restoration of
//! application state across ignition cycles.

pub mod controller;
pub mod storage;

pub use controller::ResumeController;
pub use storage::{InMemoryResumptionStorage, JsonFileResumptionStorage, ResumptionStorage};
