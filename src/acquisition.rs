// src/acquisition.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::channels::{Channel, SourceChannel};
use crate::drivers::{AcquisitionError, SampleSource};

/// How the worker spaces out calls to `next_batch`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pacing {
    /// Pull the next batch as soon as the previous one is stored.
    Unpaced,
    /// Sleep this long after every batch.
    Fixed(Duration),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    pub batches: u64,
    pub stored: u64,
    /// Samples dropped because the channel was disabled.
    pub dropped: u64,
}

/// Running acquisition worker. Dropping the handle asks the worker to stop
/// without waiting for it.
pub struct AcquisitionHandle {
    channel: Arc<SourceChannel>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<Result<AcquisitionStats, AcquisitionError>>>,
}

impl AcquisitionHandle {
    pub fn channel(&self) -> &Arc<SourceChannel> {
        &self.channel
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the worker. Does not request a stop: call [`stop`](Self::stop)
    /// first for an endless source.
    pub fn join(mut self) -> Result<AcquisitionStats, AcquisitionError> {
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| AcquisitionError::WorkerPanicked)?,
            None => Ok(AcquisitionStats::default()),
        }
    }
}

impl Drop for AcquisitionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawns a thread that pumps `source` into `channel` until the source is
/// exhausted, an error occurs or the handle is stopped.
pub fn spawn_acquisition<S>(
    channel: Arc<SourceChannel>,
    source: S,
    pacing: Pacing,
) -> AcquisitionHandle
where
    S: SampleSource + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let worker = {
        let channel = Arc::clone(&channel);
        let stop = Arc::clone(&stop);
        thread::Builder::new()
            .name(format!("acq-{}", channel.name()))
            .spawn(move || pump(&channel, source, pacing, &stop))
    };
    let worker = match worker {
        Ok(worker) => Some(worker),
        Err(e) => {
            log::error!("failed to spawn acquisition thread: {e}");
            None
        }
    };
    AcquisitionHandle {
        channel,
        stop,
        worker,
    }
}

fn pump<S: SampleSource>(
    channel: &SourceChannel,
    mut source: S,
    pacing: Pacing,
    stop: &AtomicBool,
) -> Result<AcquisitionStats, AcquisitionError> {
    let mut stats = AcquisitionStats::default();
    if !channel.signal().analog_data().is_empty() {
        channel.begin_segment();
    }
    log::info!("acquisition started on {}", channel.name());
    while !stop.load(Ordering::Acquire) {
        let batch = match source.next_batch() {
            Ok(Some(batch)) => batch,
            Ok(None) => {
                log::info!("source for {} exhausted", channel.name());
                break;
            }
            Err(e) => {
                log::error!("acquisition on {} failed: {e}", channel.name());
                return Err(e);
            }
        };
        batch.validate()?;
        stats.batches += 1;
        match channel.push_samples(&batch.samples)? {
            Some(range) => stats.stored += range.end - range.start,
            None => stats.dropped += batch.len() as u64,
        }
        if let Pacing::Fixed(period) = pacing {
            thread::sleep(period);
        }
    }
    log::info!(
        "acquisition stopped on {}: {} batches, {} samples stored, {} dropped",
        channel.name(),
        stats.batches,
        stats.stored,
        stats.dropped
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::data::SampleStore;
    use crate::drivers::{ManualSource, SampleBatch, SimulatedSource};
    use crate::types::{ChannelConfig, SignalId};

    fn channel(name: &str) -> Arc<SourceChannel> {
        Arc::new(SourceChannel::new(
            SignalId::next(),
            ChannelConfig::new(name),
            SampleStore::with_chunk_size(4),
        ))
    }

    #[test]
    fn pumps_manual_source_to_completion() {
        let ch = channel("V");
        let source = ManualSource::new(vec![
            SampleBatch::from_pairs([(0.0, 1.0), (1.0, 2.0)]),
            SampleBatch::from_pairs([(2.0, 3.0)]),
        ]);
        let stats = spawn_acquisition(Arc::clone(&ch), source, Pacing::Unpaced)
            .join()
            .unwrap();
        assert_eq!(
            stats,
            AcquisitionStats {
                batches: 2,
                stored: 3,
                dropped: 0
            }
        );
        assert_eq!(ch.signal().analog_data().count(), 3);
    }

    #[test]
    fn second_run_starts_a_new_segment() {
        let ch = channel("V");
        ch.push_sample(0.0, 0.0).unwrap();
        let source = ManualSource::new(vec![SampleBatch::from_pairs([(5.0, 1.0)])]);
        spawn_acquisition(Arc::clone(&ch), source, Pacing::Unpaced)
            .join()
            .unwrap();
        assert_eq!(ch.signal().analog_data().segment_starts(), vec![0.0, 5.0]);
    }

    #[test]
    fn out_of_order_batch_stops_the_worker() {
        let ch = channel("V");
        let source = ManualSource::new(vec![
            SampleBatch::from_pairs([(1.0, 1.0)]),
            SampleBatch::from_pairs([(0.5, 1.0)]),
        ]);
        let err = spawn_acquisition(Arc::clone(&ch), source, Pacing::Unpaced)
            .join()
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::Store(_)));
        assert_eq!(ch.signal().analog_data().count(), 1);
    }

    #[test]
    fn stop_ends_an_endless_source() {
        let ch = channel("sine");
        let source = SimulatedSource::new(SimulationConfig::default(), 0.0).unwrap();
        let pacing = Pacing::Fixed(Duration::from_millis(1));
        let handle = spawn_acquisition(Arc::clone(&ch), source, pacing);
        thread::sleep(Duration::from_millis(20));
        handle.stop();
        let stats = handle.join().unwrap();
        assert_eq!(stats.stored, ch.signal().analog_data().count());
        assert!(stats.batches > 0);
    }

    #[test]
    fn disabled_channel_counts_dropped_samples() {
        let ch = channel("V");
        ch.signal().set_enabled(false);
        let source = ManualSource::new(vec![SampleBatch::from_pairs([(0.0, 1.0), (1.0, 1.0)])]);
        let stats = spawn_acquisition(Arc::clone(&ch), source, Pacing::Unpaced)
            .join()
            .unwrap();
        assert_eq!(stats.dropped, 2);
        assert!(ch.signal().analog_data().is_empty());
    }
}
