use std::collections::VecDeque;
use std::f64::consts::TAU;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SimulationConfig;
use crate::data::Sample;
use crate::drivers::AcquisitionError;

/// Samples of one channel delivered together.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleBatch {
    pub samples: Vec<Sample>,
}

impl SampleBatch {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Builds a batch from `(timestamp, value)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (f64, f64)>) -> Self {
        Self::new(pairs.into_iter().map(Sample::from).collect())
    }

    pub fn validate(&self) -> Result<(), AcquisitionError> {
        let mut last = f64::NEG_INFINITY;
        for (index, s) in self.samples.iter().enumerate() {
            if !s.timestamp.is_finite() || s.timestamp < last {
                return Err(AcquisitionError::UnorderedBatch { index });
            }
            last = s.timestamp;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Time covered by the batch, first to last timestamp.
    pub fn duration(&self) -> Option<Duration> {
        let first = self.samples.first()?;
        let last = self.samples.last()?;
        Duration::try_from_secs_f64(last.timestamp - first.timestamp).ok()
    }
}

/// Something that can yield sample batches on demand. `Ok(None)` means the
/// source is exhausted.
pub trait SampleSource {
    fn next_batch(&mut self) -> Result<Option<SampleBatch>, AcquisitionError>;
}

/// In-memory source for tests and deterministic playback.
pub struct ManualSource {
    queue: VecDeque<SampleBatch>,
}

impl ManualSource {
    pub fn new(batches: impl IntoIterator<Item = SampleBatch>) -> Self {
        Self {
            queue: batches.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl SampleSource for ManualSource {
    fn next_batch(&mut self) -> Result<Option<SampleBatch>, AcquisitionError> {
        Ok(self.queue.pop_front())
    }
}

/// Sine generator: `offset + amplitude * sin(2π f t)` plus optional uniform
/// noise, sampled at a fixed rate starting from `t0`.
pub struct SimulatedSource {
    config: SimulationConfig,
    t0: f64,
    emitted: u64,
    rng: StdRng,
}

impl SimulatedSource {
    pub fn new(config: SimulationConfig, t0: f64) -> Result<Self, AcquisitionError> {
        if config.sample_rate_hz.is_nan() || config.sample_rate_hz <= 0.0 {
            return Err(AcquisitionError::InvalidSampleRate);
        }
        Ok(Self {
            config,
            t0,
            emitted: 0,
            rng: StdRng::from_entropy(),
        })
    }

    /// Same as [`SimulatedSource::new`] with a reproducible noise sequence.
    pub fn with_seed(
        config: SimulationConfig,
        t0: f64,
        seed: u64,
    ) -> Result<Self, AcquisitionError> {
        let mut source = Self::new(config, t0)?;
        source.rng = StdRng::seed_from_u64(seed);
        Ok(source)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Wall-clock time one batch represents.
    pub fn batch_period(&self) -> Duration {
        Duration::from_secs_f64(self.config.batch_size.max(1) as f64 / self.config.sample_rate_hz)
    }

    fn sample_at(&mut self, k: u64) -> Sample {
        let c = &self.config;
        let t = self.t0 + k as f64 / c.sample_rate_hz;
        let mut value = c.offset + c.amplitude * (TAU * c.frequency_hz * t).sin();
        if c.noise > 0.0 {
            value += self.rng.gen_range(-c.noise..=c.noise);
        }
        Sample::new(t, value)
    }
}

impl SampleSource for SimulatedSource {
    fn next_batch(&mut self) -> Result<Option<SampleBatch>, AcquisitionError> {
        let mut n = self.config.batch_size.max(1) as u64;
        if let Some(limit) = self.config.max_samples {
            n = n.min(limit.saturating_sub(self.emitted));
        }
        if n == 0 {
            return Ok(None);
        }
        let start = self.emitted;
        let samples = (start..start + n).map(|k| self.sample_at(k)).collect();
        self.emitted += n;
        Ok(Some(SampleBatch::new(samples)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_source_replays_in_order() {
        let mut src = ManualSource::new(vec![
            SampleBatch::from_pairs([(0.0, 1.0)]),
            SampleBatch::from_pairs([(1.0, 2.0), (2.0, 3.0)]),
        ]);
        assert_eq!(src.next_batch().unwrap().unwrap().len(), 1);
        assert_eq!(src.remaining(), 1);
        assert_eq!(src.next_batch().unwrap().unwrap().len(), 2);
        assert!(src.next_batch().unwrap().is_none());
    }

    #[test]
    fn batch_validation() {
        assert!(SampleBatch::from_pairs([(0.0, 1.0), (0.0, 2.0), (1.0, 0.0)])
            .validate()
            .is_ok());
        assert!(matches!(
            SampleBatch::from_pairs([(1.0, 1.0), (0.5, 2.0)]).validate(),
            Err(AcquisitionError::UnorderedBatch { index: 1 })
        ));
        assert_eq!(
            SampleBatch::from_pairs([(1.0, 0.0), (1.5, 0.0)]).duration(),
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn simulated_source_respects_limit_and_rate() {
        let config = SimulationConfig {
            amplitude: 1.0,
            frequency_hz: 1.0,
            offset: 2.0,
            sample_rate_hz: 4.0,
            batch_size: 3,
            max_samples: Some(5),
            noise: 0.0,
        };
        let mut src = SimulatedSource::new(config, 10.0).unwrap();
        let first = src.next_batch().unwrap().unwrap();
        let second = src.next_batch().unwrap().unwrap();
        assert!(src.next_batch().unwrap().is_none());
        assert_eq!((first.len(), second.len()), (3, 2));
        let ts: Vec<f64> = first
            .samples
            .iter()
            .chain(&second.samples)
            .map(|s| s.timestamp)
            .collect();
        assert_eq!(ts, vec![10.0, 10.25, 10.5, 10.75, 11.0]);
        // sin(2π·10.25) = 1
        assert!((first.samples[1].value - 3.0).abs() < 1e-9);
        assert_eq!(src.emitted(), 5);
    }

    #[test]
    fn noise_stays_in_bounds() {
        let config = SimulationConfig {
            amplitude: 0.0,
            noise: 0.1,
            batch_size: 50,
            ..SimulationConfig::default()
        };
        let mut src = SimulatedSource::with_seed(config, 0.0, 7).unwrap();
        let batch = src.next_batch().unwrap().unwrap();
        assert!(batch.samples.iter().all(|s| s.value.abs() <= 0.1));
    }

    #[test]
    fn rejects_zero_rate() {
        let config = SimulationConfig {
            sample_rate_hz: 0.0,
            ..SimulationConfig::default()
        };
        assert!(matches!(
            SimulatedSource::new(config, 0.0),
            Err(AcquisitionError::InvalidSampleRate)
        ));
    }
}
