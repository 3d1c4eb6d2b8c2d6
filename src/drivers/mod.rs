// src/drivers/mod.rs
pub mod error;
pub mod source;

pub use error::AcquisitionError;
pub use source::{ManualSource, SampleBatch, SampleSource, SimulatedSource};
