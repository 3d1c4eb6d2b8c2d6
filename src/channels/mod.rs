// src/channels/mod.rs
pub mod derived;
pub mod engine;
pub mod math;
pub mod operators;
pub mod source;

use std::sync::Arc;

use crate::data::Signal;
use crate::types::{ChannelConfig, ChannelType, SignalId};

pub use derived::DerivedChannel;
pub use engine::{DerivedChannelEngine, DomainErrorPolicy, PassReport};
pub use math::MathKind;
pub use operators::{Arity, Operator};
pub use source::SourceChannel;

/// Node of the channel graph. Every channel owns exactly one signal.
pub trait Channel: Send + Sync {
    fn signal(&self) -> &Arc<Signal>;

    fn config(&self) -> &ChannelConfig;

    fn id(&self) -> SignalId {
        self.signal().id()
    }

    fn name(&self) -> String {
        self.signal().name()
    }

    fn channel_type(&self) -> ChannelType {
        self.signal().channel_type()
    }
}
