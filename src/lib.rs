//! Streaming derived channels for instrument acquisition.
//!
//! Source channels are fed by acquisition threads; math channels recompute
//! incrementally, index-aligned, whenever any of their inputs grows or is
//! cleared. See [`session::Session`] for the entry point.

pub mod acquisition;
pub mod channels;
pub mod config;
pub mod data;
pub mod drivers;
pub mod error;
pub mod recorder;
pub mod session;
pub mod types;

pub use acquisition::{spawn_acquisition, AcquisitionHandle, AcquisitionStats, Pacing};
pub use channels::{
    Channel, DerivedChannel, DerivedChannelEngine, DomainErrorPolicy, MathKind, SourceChannel,
};
pub use config::{load_config, save_config, SessionConfig};
pub use data::{NotificationBus, Sample, SampleRange, SampleStore, Signal};
pub use error::{ChannelError, ConfigError, SessionError, StoreError};
pub use session::Session;
pub use types::{ChannelConfig, Colour, Rgba, SignalEvent, SignalId, StoreEvent};
