use std::ops::Range;
use std::sync::Arc;

use crate::channels::Channel;
use crate::data::{Sample, SampleStore, Signal};
use crate::error::StoreResult;
use crate::types::{ChannelConfig, ChannelType, SignalId};

/// Channel fed directly by acquisition.
pub struct SourceChannel {
    config: ChannelConfig,
    signal: Arc<Signal>,
}

impl SourceChannel {
    pub fn new(id: SignalId, config: ChannelConfig, store: SampleStore) -> Self {
        let signal = Arc::new(Signal::new(id, ChannelType::Source, &config, store));
        Self { config, signal }
    }

    /// Appends one sample. Returns `false` when the channel is disabled and
    /// the sample was dropped.
    pub fn push_sample(&self, timestamp: f64, value: f64) -> StoreResult<bool> {
        Ok(self
            .push_samples(&[Sample::new(timestamp, value)])?
            .is_some())
    }

    /// Appends a batch with a single notification. `None` when disabled.
    pub fn push_samples(&self, samples: &[Sample]) -> StoreResult<Option<Range<u64>>> {
        if !self.signal.enabled() {
            log::trace!(
                "{} disabled, dropping {} samples",
                self.signal.id(),
                samples.len()
            );
            return Ok(None);
        }
        self.signal.analog_data().append_batch(samples).map(Some)
    }

    /// Marks the start of a new acquisition run.
    pub fn begin_segment(&self) {
        self.signal.analog_data().begin_segment();
    }

    pub fn clear(&self) {
        log::debug!("clearing source channel {}", self.signal.id());
        self.signal.analog_data().clear();
    }
}

impl Channel for SourceChannel {
    fn signal(&self) -> &Arc<Signal> {
        &self.signal
    }

    fn config(&self) -> &ChannelConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_channel_drops_incoming_samples() {
        let ch = SourceChannel::new(SignalId::next(), ChannelConfig::new("V"), SampleStore::new());
        assert!(ch.push_sample(0.0, 1.0).unwrap());
        ch.signal().set_enabled(false);
        assert!(!ch.push_sample(1.0, 2.0).unwrap());
        assert_eq!(ch.signal().analog_data().count(), 1);
        ch.signal().set_enabled(true);
        assert_eq!(
            ch.push_samples(&[Sample::new(2.0, 3.0), Sample::new(3.0, 4.0)])
                .unwrap(),
            Some(1..3)
        );
        assert_eq!(ch.channel_type(), ChannelType::Source);
        assert_eq!(ch.name(), "V");
    }
}
