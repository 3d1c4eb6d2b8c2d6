// src/types.rs
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

/// Stable handle of a signal (and of the channel that owns it) inside a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SignalId(pub u32);

impl SignalId {
    /// Allocates a process-wide unique id.
    pub fn next() -> Self {
        static NEXT_ID: AtomicU32 = AtomicU32::new(1);
        SignalId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where the samples of a channel come from.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize)]
pub enum ChannelType {
    /// Fed directly by acquisition.
    Source,
    /// Computed from other channels.
    Derived,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Colour {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Colour {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Picks a colour from the default palette, cycling by index.
    pub fn for_index(idx: usize) -> Self {
        const PALETTE: [Colour; 6] = [
            Colour::rgb(0x3b, 0x82, 0xf6),
            Colour::rgb(0x10, 0xb9, 0x81),
            Colour::rgb(0xf5, 0x93, 0x00),
            Colour::rgb(0xef, 0x44, 0x44),
            Colour::rgb(0x8b, 0x5c, 0xff),
            Colour::rgb(0x6b, 0x72, 0x80),
        ];
        PALETTE[idx % PALETTE.len()]
    }
}

/// A [`Colour`] with an alpha channel, used for translucent backgrounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Colour {
    /// Alpha of a signal's background colour, about 8% opaque.
    pub const BG_ALPHA: u8 = 20;

    pub const fn with_alpha(self, a: u8) -> Rgba {
        Rgba {
            r: self.r,
            g: self.g,
            b: self.b,
            a,
        }
    }
}

impl Default for Colour {
    fn default() -> Self {
        Colour::for_index(0)
    }
}

// Quantity, flags and unit are carried as opaque tags; the engine never interprets them.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(pub String);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuantityFlag(pub String);

#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Unit(pub String);

/// Creation-time description of a channel. Immutable for the channel's lifetime.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub name: String,
    pub channel_group: String,
    pub quantity: Quantity,
    pub quantity_flags: BTreeSet<QuantityFlag>,
    pub unit: Unit,
    pub start_timestamp: f64,
    pub colour: Option<Colour>,
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_quantity(mut self, quantity: &str, unit: &str) -> Self {
        self.quantity = Quantity(quantity.to_owned());
        self.unit = Unit(unit.to_owned());
        self
    }
}

// Events published by a SampleStore.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreEvent {
    SamplesAdded { segment: usize, start: u64, end: u64 },
    SamplesCleared,
    MinMaxChanged { min: f32, max: f32 },
}

// Events re-broadcast by a Signal to its observers.
#[derive(Clone, Debug, PartialEq)]
pub enum SignalEvent {
    SamplesAdded {
        signal: SignalId,
        segment: usize,
        start: u64,
        end: u64,
    },
    SamplesCleared {
        signal: SignalId,
    },
    MinMaxChanged {
        signal: SignalId,
        min: f32,
        max: f32,
    },
    EnabledChanged {
        signal: SignalId,
        enabled: bool,
    },
    NameChanged {
        signal: SignalId,
        name: String,
    },
    ColourChanged {
        signal: SignalId,
        colour: Colour,
    },
}

impl SignalEvent {
    pub fn signal(&self) -> SignalId {
        match self {
            SignalEvent::SamplesAdded { signal, .. }
            | SignalEvent::SamplesCleared { signal }
            | SignalEvent::MinMaxChanged { signal, .. }
            | SignalEvent::EnabledChanged { signal, .. }
            | SignalEvent::NameChanged { signal, .. }
            | SignalEvent::ColourChanged { signal, .. } => *signal,
        }
    }
}
