use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::data::bus::{ListenerId, NotificationBus};
use crate::data::store::SampleStore;
use crate::types::{
    ChannelConfig, ChannelType, Colour, Quantity, QuantityFlag, Rgba, SignalEvent, SignalId,
    StoreEvent, Unit,
};

struct SignalMeta {
    name: String,
    colour: Colour,
}

/// Metadata shell around an exclusively owned [`SampleStore`].
///
/// Store events are re-broadcast on the signal's own bus, tagged with the
/// signal id. Nothing is recomputed here.
pub struct Signal {
    id: SignalId,
    channel_type: ChannelType,
    internal_name: String,
    quantity: Quantity,
    quantity_flags: BTreeSet<QuantityFlag>,
    unit: Unit,
    meta: RwLock<SignalMeta>,
    enabled: AtomicBool,
    store: Arc<SampleStore>,
    events: Arc<NotificationBus<SignalEvent>>,
}

impl Signal {
    pub fn new(
        id: SignalId,
        channel_type: ChannelType,
        config: &ChannelConfig,
        store: SampleStore,
    ) -> Self {
        let events = Arc::new(NotificationBus::new());
        let store = Arc::new(store);
        let relay = Arc::clone(&events);
        store.subscribe(move |ev: &StoreEvent| {
            let out = match *ev {
                StoreEvent::SamplesAdded {
                    segment,
                    start,
                    end,
                } => SignalEvent::SamplesAdded {
                    signal: id,
                    segment,
                    start,
                    end,
                },
                StoreEvent::SamplesCleared => SignalEvent::SamplesCleared { signal: id },
                StoreEvent::MinMaxChanged { min, max } => SignalEvent::MinMaxChanged {
                    signal: id,
                    min,
                    max,
                },
            };
            relay.publish(&out);
        });

        let internal_name = if config.channel_group.is_empty() {
            config.name.clone()
        } else {
            format!("{}.{}", config.channel_group, config.name)
        };
        Self {
            id,
            channel_type,
            internal_name,
            quantity: config.quantity.clone(),
            quantity_flags: config.quantity_flags.clone(),
            unit: config.unit.clone(),
            meta: RwLock::new(SignalMeta {
                name: config.name.clone(),
                colour: config.colour.unwrap_or_default(),
            }),
            enabled: AtomicBool::new(true),
            store,
            events,
        }
    }

    pub fn id(&self) -> SignalId {
        self.id
    }

    pub fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Toggles participation in computation. Stored samples are kept either way.
    pub fn set_enabled(&self, enabled: bool) {
        if self.enabled.swap(enabled, Ordering::AcqRel) != enabled {
            log::debug!("signal {} enabled={}", self.id, enabled);
            self.events.publish(&SignalEvent::EnabledChanged {
                signal: self.id,
                enabled,
            });
        }
    }

    pub fn name(&self) -> String {
        self.meta.read().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.meta.write().name = name.clone();
        self.events.publish(&SignalEvent::NameChanged {
            signal: self.id,
            name,
        });
    }

    /// Name assigned by the driver or the channel group, never renamed.
    pub fn internal_name(&self) -> &str {
        &self.internal_name
    }

    pub fn colour(&self) -> Colour {
        self.meta.read().colour
    }

    /// The signal colour at [`Colour::BG_ALPHA`], for filled backgrounds.
    /// Follows [`Signal::set_colour`].
    pub fn bgcolour(&self) -> Rgba {
        self.colour().with_alpha(Colour::BG_ALPHA)
    }

    pub fn set_colour(&self, colour: Colour) {
        self.meta.write().colour = colour;
        self.events.publish(&SignalEvent::ColourChanged {
            signal: self.id,
            colour,
        });
    }

    pub fn quantity(&self) -> &Quantity {
        &self.quantity
    }

    pub fn quantity_flags(&self) -> &BTreeSet<QuantityFlag> {
        &self.quantity_flags
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    pub fn analog_data(&self) -> &Arc<SampleStore> {
        &self.store
    }

    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&SignalEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    pub fn subscribe_channel(&self) -> (ListenerId, Receiver<SignalEvent>) {
        self.events.subscribe_channel()
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn listener_count(&self) -> usize {
        self.events.listener_count()
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("type", &self.channel_type)
            .field("count", &self.store.count())
            .finish()
    }
}
