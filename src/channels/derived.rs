use std::sync::Arc;

use crate::channels::engine::{DerivedChannelEngine, DomainErrorPolicy, PassReport};
use crate::channels::math::MathKind;
use crate::channels::Channel;
use crate::data::{SampleStore, Signal};
use crate::error::ChannelResult;
use crate::types::{ChannelConfig, ChannelType, SignalId};

/// Math channel: owns an output signal and the engine that fills it.
///
/// Dropping the channel detaches the engine from its inputs first, so no
/// notification can reach a half-destroyed channel.
pub struct DerivedChannel {
    config: ChannelConfig,
    kind: MathKind,
    engine: Arc<DerivedChannelEngine>,
}

impl DerivedChannel {
    /// `inputs` must be the signals named by `kind.inputs()`, in that order.
    pub fn new(
        id: SignalId,
        config: ChannelConfig,
        kind: MathKind,
        inputs: Vec<Arc<Signal>>,
        policy: DomainErrorPolicy,
        store: SampleStore,
    ) -> ChannelResult<Self> {
        debug_assert!(kind
            .inputs()
            .iter()
            .zip(&inputs)
            .all(|(want, got)| **want == got.id()));
        let output = Arc::new(Signal::new(id, ChannelType::Derived, &config, store));
        let engine = DerivedChannelEngine::new(inputs, output, kind.operator(), policy)?;
        engine.attach();
        let channel = Self {
            config,
            kind,
            engine,
        };
        // Inputs may already hold samples.
        let report = channel.recompute()?;
        log::info!(
            "math channel {} = {} ({} initial samples)",
            channel.id(),
            channel.describe(),
            report.produced
        );
        Ok(channel)
    }

    pub fn kind(&self) -> &MathKind {
        &self.kind
    }

    pub fn inputs(&self) -> &[Arc<Signal>] {
        self.engine.inputs()
    }

    pub fn engine(&self) -> &Arc<DerivedChannelEngine> {
        &self.engine
    }

    pub fn depends_on(&self, id: SignalId) -> bool {
        self.inputs().iter().any(|s| s.id() == id)
    }

    pub fn recompute(&self) -> ChannelResult<PassReport> {
        self.engine.on_input_appended()
    }

    pub fn detach(&self) {
        self.engine.detach();
    }

    pub fn describe(&self) -> String {
        let names: Vec<String> = self.inputs().iter().map(|s| s.name()).collect();
        self.kind.describe(&names)
    }
}

impl Channel for DerivedChannel {
    fn signal(&self) -> &Arc<Signal> {
        self.engine.output()
    }

    fn config(&self) -> &ChannelConfig {
        &self.config
    }
}

impl Drop for DerivedChannel {
    fn drop(&mut self) {
        self.engine.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::SourceChannel;

    fn source(name: &str) -> SourceChannel {
        SourceChannel::new(SignalId::next(), ChannelConfig::new(name), SampleStore::new())
    }

    #[test]
    fn catches_up_on_existing_input_data() {
        let v = source("V");
        let i = source("I");
        for k in 0..4 {
            v.push_sample(k as f64, 12.0).unwrap();
            i.push_sample(k as f64, 3.0).unwrap();
        }
        let r = DerivedChannel::new(
            SignalId::next(),
            ChannelConfig::new("R").with_quantity("resistance", "Ohm"),
            MathKind::Divide {
                dividend: v.id(),
                divisor: i.id(),
            },
            vec![Arc::clone(v.signal()), Arc::clone(i.signal())],
            DomainErrorPolicy::Skip,
            SampleStore::new(),
        )
        .unwrap();
        assert_eq!(r.signal().analog_data().count(), 4);
        assert_eq!(r.describe(), "V / I");
        assert_eq!(r.channel_type(), ChannelType::Derived);
        assert!(r.depends_on(v.id()));

        v.push_sample(4.0, 6.0).unwrap();
        i.push_sample(4.0, 3.0).unwrap();
        assert_eq!(r.signal().analog_data().last().unwrap().value, 2.0);
    }

    #[test]
    fn drop_detaches_from_inputs() {
        let v = source("V");
        let before = v.signal().listener_count();
        let avg = DerivedChannel::new(
            SignalId::next(),
            ChannelConfig::new("avg"),
            MathKind::MovingAverage {
                input: v.id(),
                window: 3,
            },
            vec![Arc::clone(v.signal())],
            DomainErrorPolicy::Skip,
            SampleStore::new(),
        )
        .unwrap();
        assert_eq!(v.signal().listener_count(), before + 1);
        drop(avg);
        assert_eq!(v.signal().listener_count(), before);
        v.push_sample(0.0, 1.0).unwrap();
    }
}
