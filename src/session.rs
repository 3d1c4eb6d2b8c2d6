// src/session.rs
use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use crate::channels::{Channel, DerivedChannel, DomainErrorPolicy, MathKind, SourceChannel};
use crate::config::{MathChannelConfig, SessionConfig};
use crate::data::{ListenerId, NotificationBus, SampleStore, Signal};
use crate::error::{ConfigError, SessionError, SessionResult};
use crate::types::{ChannelConfig, Colour, SignalEvent, SignalId};

#[derive(Clone)]
enum ChannelEntry {
    Source(Arc<SourceChannel>),
    Derived(Arc<DerivedChannel>),
}

impl ChannelEntry {
    fn as_channel(&self) -> Arc<dyn Channel> {
        match self {
            ChannelEntry::Source(c) => Arc::clone(c) as Arc<dyn Channel>,
            ChannelEntry::Derived(c) => Arc::clone(c) as Arc<dyn Channel>,
        }
    }
}

/// Registry of the channels of one acquisition session.
///
/// Channels are addressed by [`SignalId`]. Every signal's events are also
/// relayed onto a session-wide bus for observers. Derived channels are
/// detached before they are dropped, newest first.
pub struct Session {
    chunk_size: usize,
    policy: DomainErrorPolicy,
    channels: HashMap<SignalId, ChannelEntry>,
    order: Vec<SignalId>,
    relays: HashMap<SignalId, ListenerId>,
    events: Arc<NotificationBus<SignalEvent>>,
}

impl Session {
    /// Empty session using the chunk size and domain-error policy of
    /// `config`. Channels listed in it are not created; see
    /// [`Session::from_config`].
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            policy: config.domain_error_policy,
            channels: HashMap::new(),
            order: Vec::new(),
            relays: HashMap::new(),
            events: Arc::new(NotificationBus::new()),
        }
    }

    /// Builds every source and math channel listed in `config`.
    pub fn from_config(config: &SessionConfig) -> SessionResult<Self> {
        config.validate()?;
        let mut session = Self::new(config);
        for src in &config.sources {
            session.add_source_channel(src.channel.clone());
        }
        for math in &config.math_channels {
            session.add_math_channel_named(math)?;
        }
        log::info!(
            "session ready: {} sources, {} math channels",
            config.sources.len(),
            config.math_channels.len()
        );
        Ok(session)
    }

    pub fn add_source_channel(&mut self, mut config: ChannelConfig) -> Arc<SourceChannel> {
        config.colour.get_or_insert_with(|| Colour::for_index(self.order.len()));
        let channel = Arc::new(SourceChannel::new(SignalId::next(), config, self.new_store()));
        log::debug!("added source channel {} ({})", channel.id(), channel.name());
        self.register(ChannelEntry::Source(Arc::clone(&channel)));
        channel
    }

    pub fn add_math_channel(
        &mut self,
        mut config: ChannelConfig,
        kind: MathKind,
    ) -> SessionResult<Arc<DerivedChannel>> {
        let inputs = kind
            .inputs()
            .into_iter()
            .map(|id| self.signal(*id))
            .collect::<SessionResult<Vec<Arc<Signal>>>>()?;
        config.colour.get_or_insert_with(|| Colour::for_index(self.order.len()));
        let channel = Arc::new(DerivedChannel::new(
            SignalId::next(),
            config,
            kind,
            inputs,
            self.policy,
            self.new_store(),
        )?);
        self.register(ChannelEntry::Derived(Arc::clone(&channel)));
        Ok(channel)
    }

    /// Like [`Session::add_math_channel`], with inputs given by channel name.
    pub fn add_math_channel_named(
        &mut self,
        config: &MathChannelConfig,
    ) -> SessionResult<Arc<DerivedChannel>> {
        let kind = config.kind.clone().try_map(|name| {
            self.find(&name).ok_or_else(|| {
                SessionError::from(ConfigError::Invalid(format!("unknown channel {name}")))
            })
        })?;
        self.add_math_channel(config.channel.clone(), kind)
    }

    pub fn signal(&self, id: SignalId) -> SessionResult<Arc<Signal>> {
        self.channels
            .get(&id)
            .map(|e| Arc::clone(e.as_channel().signal()))
            .ok_or(SessionError::UnknownSignal(id))
    }

    pub fn channel(&self, id: SignalId) -> Option<Arc<dyn Channel>> {
        self.channels.get(&id).map(ChannelEntry::as_channel)
    }

    pub fn source(&self, id: SignalId) -> Option<Arc<SourceChannel>> {
        match self.channels.get(&id) {
            Some(ChannelEntry::Source(c)) => Some(Arc::clone(c)),
            _ => None,
        }
    }

    pub fn derived(&self, id: SignalId) -> Option<Arc<DerivedChannel>> {
        match self.channels.get(&id) {
            Some(ChannelEntry::Derived(c)) => Some(Arc::clone(c)),
            _ => None,
        }
    }

    /// Looks a channel up by its display name.
    pub fn find(&self, name: &str) -> Option<SignalId> {
        self.order
            .iter()
            .copied()
            .find(|id| self.channel(*id).map_or(false, |c| c.name() == name))
    }

    /// Channel ids in creation order.
    pub fn channel_ids(&self) -> &[SignalId] {
        &self.order
    }

    pub fn derived_channels(&self) -> Vec<Arc<DerivedChannel>> {
        self.order.iter().filter_map(|id| self.derived(*id)).collect()
    }

    /// Removes a channel. Refused while a derived channel still reads it.
    pub fn remove_channel(&mut self, id: SignalId) -> SessionResult<()> {
        if !self.channels.contains_key(&id) {
            return Err(SessionError::UnknownSignal(id));
        }
        if let Some(dependent) = self
            .derived_channels()
            .iter()
            .find(|d| d.depends_on(id))
        {
            return Err(SessionError::ChannelInUse {
                channel: id,
                dependent: dependent.id(),
            });
        }
        self.unregister(id);
        log::info!("removed channel {id}");
        Ok(())
    }

    /// Receiver of every event of every signal in the session.
    pub fn observe(&self) -> Receiver<SignalEvent> {
        self.events.subscribe_channel().1
    }

    pub fn events(&self) -> &NotificationBus<SignalEvent> {
        &self.events
    }

    /// Detaches every derived channel (newest first) and forgets all channels.
    pub fn teardown(&mut self) {
        if self.order.is_empty() {
            return;
        }
        for id in self.order.clone().into_iter().rev() {
            self.unregister(id);
        }
        self.events.clear();
        log::info!("session torn down");
    }

    fn new_store(&self) -> SampleStore {
        SampleStore::with_chunk_size(self.chunk_size)
    }

    fn register(&mut self, entry: ChannelEntry) {
        let channel = entry.as_channel();
        let id = channel.id();
        let bus = Arc::clone(&self.events);
        let relay = channel.signal().subscribe(move |ev| bus.publish(ev));
        self.relays.insert(id, relay);
        self.channels.insert(id, entry);
        self.order.push(id);
    }

    fn unregister(&mut self, id: SignalId) {
        let Some(entry) = self.channels.remove(&id) else {
            return;
        };
        if let ChannelEntry::Derived(d) = &entry {
            d.detach();
        }
        if let Some(relay) = self.relays.remove(&id) {
            entry.as_channel().signal().unsubscribe(relay);
        }
        self.order.retain(|x| *x != id);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Sample;

    fn power_supply() -> (Session, Arc<SourceChannel>, Arc<SourceChannel>) {
        let mut session = Session::new(&SessionConfig {
            chunk_size: 8,
            ..SessionConfig::default()
        });
        let v = session.add_source_channel(ChannelConfig::new("V").with_quantity("voltage", "V"));
        let i = session.add_source_channel(ChannelConfig::new("I").with_quantity("current", "A"));
        (session, v, i)
    }

    #[test]
    fn builds_math_channels_from_ids() {
        let (mut session, v, i) = power_supply();
        let r = session
            .add_math_channel(
                ChannelConfig::new("R"),
                MathKind::Divide {
                    dividend: v.id(),
                    divisor: i.id(),
                },
            )
            .unwrap();
        v.push_samples(&[Sample::new(0.0, 10.0), Sample::new(1.0, 20.0)])
            .unwrap();
        i.push_samples(&[Sample::new(0.0, 2.0), Sample::new(1.0, 0.0)])
            .unwrap();
        assert_eq!(r.signal().analog_data().count(), 1);
        assert_eq!(session.find("R"), Some(r.id()));
        assert_eq!(session.channel_ids(), &[v.id(), i.id(), r.id()]);
        assert_ne!(v.signal().colour(), i.signal().colour());
    }

    #[test]
    fn unknown_input_is_rejected() {
        let (mut session, v, _) = power_supply();
        let err = session
            .add_math_channel(
                ChannelConfig::new("bad"),
                MathKind::Multiply {
                    a: v.id(),
                    b: SignalId(u32::MAX),
                },
            )
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::UnknownSignal(SignalId(u32::MAX))));
    }

    #[test]
    fn channel_in_use_cannot_be_removed() {
        let (mut session, v, i) = power_supply();
        let p = session
            .add_math_channel(
                ChannelConfig::new("P"),
                MathKind::Multiply { a: v.id(), b: i.id() },
            )
            .unwrap();
        assert!(matches!(
            session.remove_channel(v.id()),
            Err(SessionError::ChannelInUse { dependent, .. }) if dependent == p.id()
        ));
        session.remove_channel(p.id()).unwrap();
        assert!(p.engine().is_detached());
        session.remove_channel(v.id()).unwrap();
        assert!(session.channel(v.id()).is_none());
        assert!(matches!(
            session.remove_channel(v.id()),
            Err(SessionError::UnknownSignal(_))
        ));
    }

    #[test]
    fn observers_see_all_signals() {
        let (mut session, v, i) = power_supply();
        let rx = session.observe();
        let r = session
            .add_math_channel(
                ChannelConfig::new("R"),
                MathKind::Divide {
                    dividend: v.id(),
                    divisor: i.id(),
                },
            )
            .unwrap();
        v.push_sample(0.0, 4.0).unwrap();
        i.push_sample(0.0, 2.0).unwrap();
        let added: Vec<SignalId> = rx
            .try_iter()
            .filter_map(|e| match e {
                SignalEvent::SamplesAdded { signal, .. } => Some(signal),
                _ => None,
            })
            .collect();
        // The relay on I was registered before R's engine, so it fires first.
        assert_eq!(added, vec![v.id(), i.id(), r.id()]);
    }

    #[test]
    fn teardown_detaches_everything() {
        let (mut session, v, i) = power_supply();
        let r = session
            .add_math_channel(
                ChannelConfig::new("R"),
                MathKind::Divide {
                    dividend: v.id(),
                    divisor: i.id(),
                },
            )
            .unwrap();
        session.teardown();
        assert!(r.engine().is_detached());
        assert_eq!(v.signal().listener_count(), 0);
        assert!(session.channel_ids().is_empty());
        v.push_sample(0.0, 1.0).unwrap();
        i.push_sample(0.0, 1.0).unwrap();
        assert_eq!(r.signal().analog_data().count(), 0);
    }

    #[test]
    fn from_default_config() {
        let session = Session::from_config(&SessionConfig::default()).unwrap();
        let e = session.find("E").and_then(|id| session.derived(id)).unwrap();
        assert_eq!(e.describe(), "∫ P dt  (y0 = 0)");
        let v = session.source(session.find("V").unwrap()).unwrap();
        let i = session.source(session.find("I").unwrap()).unwrap();
        for k in 0..3 {
            v.push_sample(k as f64, 2.0).unwrap();
            i.push_sample(k as f64, 1.0).unwrap();
        }
        // P = 2 W held for 2 s.
        assert_eq!(e.signal().analog_data().last().unwrap().value, 4.0);
    }
}
