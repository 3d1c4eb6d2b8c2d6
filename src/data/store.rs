use std::ops::Range;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::data::bus::{ListenerId, NotificationBus};
use crate::error::{StoreError, StoreResult};
use crate::types::StoreEvent;

pub const DEFAULT_CHUNK_SIZE: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: f64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: f64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

impl From<(f64, f64)> for Sample {
    fn from((timestamp, value): (f64, f64)) -> Self {
        Self { timestamp, value }
    }
}

/// Contiguous run of samples. Full chunks are sealed and shared with readers;
/// only the active chunk is still growing.
struct Segment {
    first_index: u64,
    start_timestamp: f64,
    sealed: Vec<Arc<[Sample]>>,
    active: Vec<Sample>,
}

impl Segment {
    fn new(first_index: u64, start_timestamp: f64, chunk_size: usize) -> Self {
        Self {
            first_index,
            start_timestamp,
            sealed: Vec::new(),
            active: Vec::with_capacity(chunk_size),
        }
    }

    fn len(&self, chunk_size: usize) -> u64 {
        (self.sealed.len() * chunk_size + self.active.len()) as u64
    }

    fn push(&mut self, sample: Sample, chunk_size: usize) {
        self.active.push(sample);
        if self.active.len() == chunk_size {
            let full = std::mem::replace(&mut self.active, Vec::with_capacity(chunk_size));
            self.sealed.push(full.into());
        }
    }

    fn get(&self, local: usize, chunk_size: usize) -> Sample {
        let chunk = local / chunk_size;
        let offset = local % chunk_size;
        match self.sealed.get(chunk) {
            Some(sealed) => sealed[offset],
            None => self.active[offset],
        }
    }

    /// Collects shared handles covering `local` (segment-relative indices).
    fn collect_parts(
        &self,
        local: Range<usize>,
        chunk_size: usize,
        out: &mut Vec<(Arc<[Sample]>, Range<usize>)>,
    ) {
        let mut pos = local.start;
        while pos < local.end {
            let chunk = pos / chunk_size;
            let offset = pos % chunk_size;
            let take = (chunk_size - offset).min(local.end - pos);
            match self.sealed.get(chunk) {
                Some(sealed) => out.push((Arc::clone(sealed), offset..offset + take)),
                None => {
                    let copied: Arc<[Sample]> = self.active[offset..offset + take].into();
                    out.push((copied, 0..take));
                }
            }
            pos += take;
        }
    }
}

struct StoreInner {
    segments: Vec<Segment>,
    count: u64,
    min: f32,
    max: f32,
    last_timestamp: Option<f64>,
    generation: u64,
    segment_pending: bool,
}

impl StoreInner {
    fn new() -> Self {
        Self {
            segments: Vec::new(),
            count: 0,
            min: f32::MAX,
            max: f32::MIN,
            last_timestamp: None,
            generation: 0,
            segment_pending: true,
        }
    }

    fn locate(&self, index: u64) -> usize {
        // Last segment whose first index is <= index.
        self.segments
            .partition_point(|seg| seg.first_index <= index)
            .saturating_sub(1)
    }
}

/// Append-only, segment-based store of timestamped samples.
///
/// One writer appends; any number of readers may call `read_range`, `get`,
/// `count` and `min_max` concurrently. Events are published after the write
/// lock has been released.
pub struct SampleStore {
    inner: RwLock<StoreInner>,
    chunk_size: usize,
    events: NotificationBus<StoreEvent>,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner::new()),
            chunk_size: chunk_size.max(1),
            events: NotificationBus::new(),
        }
    }

    pub fn append(&self, timestamp: f64, value: f64) -> StoreResult<()> {
        self.append_batch(&[Sample { timestamp, value }]).map(|_| ())
    }

    /// Appends all samples or none; returns the index range they occupy.
    pub fn append_batch(&self, samples: &[Sample]) -> StoreResult<Range<u64>> {
        let (range, events) = self.append_deferred(samples)?;
        self.publish_all(&events);
        Ok(range)
    }

    pub fn clear(&self) {
        let events = self.clear_deferred();
        self.publish_all(&events);
    }

    /// Starts a new segment for the next append without discarding data.
    pub fn begin_segment(&self) {
        let mut inner = self.inner.write();
        if inner.segments.last().map_or(false, |s| s.len(self.chunk_size) > 0) {
            inner.segment_pending = true;
        }
    }

    pub fn read_range(&self, start: u64, end: u64) -> StoreResult<SampleRange> {
        let inner = self.inner.read();
        if start > end || end > inner.count {
            return Err(StoreError::Range {
                start,
                end,
                count: inner.count,
            });
        }
        let mut parts = Vec::new();
        if start < end {
            let mut seg_idx = inner.locate(start);
            while seg_idx < inner.segments.len() {
                let seg = &inner.segments[seg_idx];
                if seg.first_index >= end {
                    break;
                }
                let seg_end = seg.first_index + seg.len(self.chunk_size);
                let lo = start.max(seg.first_index) - seg.first_index;
                let hi = end.min(seg_end) - seg.first_index;
                seg.collect_parts(lo as usize..hi as usize, self.chunk_size, &mut parts);
                seg_idx += 1;
            }
        }
        Ok(SampleRange {
            start,
            len: (end - start) as usize,
            parts,
        })
    }

    pub fn get(&self, index: u64) -> StoreResult<Sample> {
        let inner = self.inner.read();
        if index >= inner.count {
            return Err(StoreError::Range {
                start: index,
                end: index + 1,
                count: inner.count,
            });
        }
        let seg = &inner.segments[inner.locate(index)];
        Ok(seg.get((index - seg.first_index) as usize, self.chunk_size))
    }

    pub fn last(&self) -> Option<Sample> {
        let count = self.count();
        count.checked_sub(1).and_then(|idx| self.get(idx).ok())
    }

    pub fn count(&self) -> u64 {
        self.inner.read().count
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Incremented by every clear.
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Count and generation observed under the same lock.
    pub fn count_and_generation(&self) -> (u64, u64) {
        let inner = self.inner.read();
        (inner.count, inner.generation)
    }

    pub fn segment_count(&self) -> usize {
        self.inner.read().segments.len()
    }

    /// Start timestamps of all segments, in order.
    pub fn segment_starts(&self) -> Vec<f64> {
        self.inner
            .read()
            .segments
            .iter()
            .map(|s| s.start_timestamp)
            .collect()
    }

    /// Running extremes since the last clear; `None` while empty.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        let inner = self.inner.read();
        (inner.count > 0).then_some((inner.min, inner.max))
    }

    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn events(&self) -> &NotificationBus<StoreEvent> {
        &self.events
    }

    pub(crate) fn append_deferred(
        &self,
        samples: &[Sample],
    ) -> StoreResult<(Range<u64>, Vec<StoreEvent>)> {
        let mut inner = self.inner.write();
        let start = inner.count;
        if samples.is_empty() {
            return Ok((start..start, Vec::new()));
        }

        let mut last = inner.last_timestamp;
        for s in samples {
            if !s.timestamp.is_finite() {
                return Err(StoreError::NonFiniteTimestamp(s.timestamp));
            }
            if let Some(prev) = last {
                if s.timestamp < prev {
                    return Err(StoreError::OutOfOrder {
                        timestamp: s.timestamp,
                        last: prev,
                    });
                }
            }
            last = Some(s.timestamp);
        }

        if inner.segment_pending || inner.segments.is_empty() {
            let seg = Segment::new(start, samples[0].timestamp, self.chunk_size);
            inner.segments.push(seg);
            inner.segment_pending = false;
        }
        let segment = inner.segments.len() - 1;

        let (old_min, old_max) = (inner.min, inner.max);
        let (mut min, mut max) = (old_min, old_max);
        let chunk_size = self.chunk_size;
        if let Some(seg) = inner.segments.last_mut() {
            for s in samples {
                seg.push(*s, chunk_size);
                let v = s.value as f32;
                min = min.min(v);
                max = max.max(v);
            }
        }
        inner.count += samples.len() as u64;
        inner.last_timestamp = last;
        inner.min = min;
        inner.max = max;
        let end = inner.count;
        drop(inner);

        let mut events = vec![StoreEvent::SamplesAdded {
            segment,
            start,
            end,
        }];
        if min != old_min || max != old_max {
            events.push(StoreEvent::MinMaxChanged { min, max });
        }
        Ok((start..end, events))
    }

    pub(crate) fn clear_deferred(&self) -> Vec<StoreEvent> {
        let mut inner = self.inner.write();
        let generation = inner.generation + 1;
        *inner = StoreInner::new();
        inner.generation = generation;
        vec![StoreEvent::SamplesCleared]
    }

    pub(crate) fn publish_all(&self, events: &[StoreEvent]) {
        for event in events {
            self.events.publish(event);
        }
    }
}

impl Default for SampleStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of `[start, start + len)`.
///
/// Holds shared chunk handles rather than the store lock, so writers are
/// never blocked by a live view.
#[derive(Clone, Debug)]
pub struct SampleRange {
    start: u64,
    len: usize,
    parts: Vec<(Arc<[Sample]>, Range<usize>)>,
}

impl SampleRange {
    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.start + self.len as u64
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sample at `offset` relative to the start of the view.
    pub fn get(&self, mut offset: usize) -> Option<Sample> {
        for (chunk, range) in &self.parts {
            if offset < range.len() {
                return Some(chunk[range.start + offset]);
            }
            offset -= range.len();
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = Sample> + '_ {
        self.parts
            .iter()
            .flat_map(|(chunk, range)| chunk[range.clone()].iter().copied())
    }

    pub fn to_vec(&self) -> Vec<Sample> {
        self.iter().collect()
    }
}
