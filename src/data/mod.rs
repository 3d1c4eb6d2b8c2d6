// src/data/mod.rs
pub mod bus;
pub mod signal;
pub mod store;

pub use bus::{ListenerId, NotificationBus};
pub use signal::Signal;
pub use store::{Sample, SampleRange, SampleStore, DEFAULT_CHUNK_SIZE};
