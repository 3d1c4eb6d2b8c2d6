//! Incremental recomputation of a derived channel.
//!
//! Inputs are aligned by sample index, not by timestamp. A pass always runs
//! from the highest cursor to the lowest input count, produces at most one
//! output sample per consumed tuple, and runs entirely inside the engine's
//! lock. Each pass takes a sequence number under that lock; its output
//! events are queued and published in sequence order after the lock is
//! released. Whichever thread finds the queue idle drains it, so no engine
//! lock is held while listeners run.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::channels::operators::Operator;
use crate::data::{ListenerId, Sample, SampleRange, Signal};
use crate::error::{ChannelError, ChannelResult};
use crate::types::{SignalEvent, SignalId, StoreEvent};

/// What to do with a tuple the operator cannot evaluate (for example a zero
/// divisor or a non-finite result). Shared by every operator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum DomainErrorPolicy {
    /// Produce no output sample for the tuple.
    #[default]
    Skip,
    /// Produce the given value instead.
    Sentinel(f64),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PassReport {
    /// Cursors were reset and the output cleared before this pass.
    pub reset: bool,
    pub consumed: u64,
    pub produced: u64,
    pub skipped: u64,
    /// Output index range appended by this pass.
    pub range: Option<Range<u64>>,
}

struct EngineState {
    cursors: Vec<u64>,
    generations: Vec<u64>,
    operator: Box<dyn Operator>,
    next_seq: u64,
}

/// Output events of finished passes waiting to be published, keyed by pass
/// sequence number.
#[derive(Default)]
struct Outbox {
    next: u64,
    pending: BTreeMap<u64, Vec<StoreEvent>>,
    draining: bool,
}

pub struct DerivedChannelEngine {
    inputs: Vec<Arc<Signal>>,
    output: Arc<Signal>,
    policy: DomainErrorPolicy,
    state: Mutex<EngineState>,
    outbox: Mutex<Outbox>,
    subscriptions: Mutex<Vec<(Arc<Signal>, ListenerId)>>,
    detached: AtomicBool,
}

impl DerivedChannelEngine {
    pub fn new(
        inputs: Vec<Arc<Signal>>,
        output: Arc<Signal>,
        operator: Box<dyn Operator>,
        policy: DomainErrorPolicy,
    ) -> ChannelResult<Arc<Self>> {
        operator.check_arity(inputs.len())?;
        let generations = inputs.iter().map(|s| s.analog_data().generation()).collect();
        Ok(Arc::new(Self {
            state: Mutex::new(EngineState {
                cursors: vec![0; inputs.len()],
                generations,
                operator,
                next_seq: 0,
            }),
            inputs,
            output,
            policy,
            outbox: Mutex::new(Outbox::default()),
            subscriptions: Mutex::new(Vec::new()),
            detached: AtomicBool::new(false),
        }))
    }

    /// Registers the engine on its inputs' buses (and on its output's
    /// enable toggle). Listeners hold only a weak handle to the engine.
    pub fn attach(self: &Arc<Self>) {
        let mut subs = self.subscriptions.lock();
        for input in &self.inputs {
            let weak = Arc::downgrade(self);
            let id = input.subscribe(move |ev| match ev {
                SignalEvent::SamplesAdded { .. } => {
                    Self::dispatch(&weak, |e| e.on_input_appended())
                }
                SignalEvent::SamplesCleared { .. } => {
                    Self::dispatch(&weak, |e| e.on_input_cleared())
                }
                _ => {}
            });
            subs.push((Arc::clone(input), id));
        }
        let weak = Arc::downgrade(self);
        let id = self.output.subscribe(move |ev| {
            if let SignalEvent::EnabledChanged { enabled: true, .. } = ev {
                Self::dispatch(&weak, |e| e.on_input_appended());
            }
        });
        subs.push((Arc::clone(&self.output), id));
        log::debug!(
            "engine for {} attached to {} inputs",
            self.output.id(),
            self.inputs.len()
        );
    }

    /// Unsubscribes from every bus. Further notifications are no-ops.
    pub fn detach(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        for (signal, id) in self.subscriptions.lock().drain(..) {
            signal.unsubscribe(id);
        }
        log::debug!("engine for {} detached", self.output.id());
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    pub fn id(&self) -> SignalId {
        self.output.id()
    }

    pub fn inputs(&self) -> &[Arc<Signal>] {
        &self.inputs
    }

    pub fn output(&self) -> &Arc<Signal> {
        &self.output
    }

    pub fn policy(&self) -> DomainErrorPolicy {
        self.policy
    }

    pub fn cursors(&self) -> Vec<u64> {
        self.state.lock().cursors.clone()
    }

    pub fn on_input_appended(&self) -> ChannelResult<PassReport> {
        self.run_pass()
    }

    /// A cleared input is picked up through its store generation, so this
    /// is the same pass: reset, clear the output, then consume what exists.
    pub fn on_input_cleared(&self) -> ChannelResult<PassReport> {
        self.run_pass()
    }

    fn dispatch<F>(weak: &Weak<Self>, f: F)
    where
        F: FnOnce(&Self) -> ChannelResult<PassReport>,
    {
        let Some(engine) = weak.upgrade() else {
            log::debug!("notification for a dropped derived channel ignored");
            return;
        };
        match f(&engine) {
            Ok(report) => log::trace!("pass for {}: {:?}", engine.id(), report),
            Err(ChannelError::Lifecycle(id)) => {
                log::debug!("notification for detached channel {id} ignored")
            }
            Err(err) => log::warn!("pass for {} failed: {err}", engine.id()),
        }
    }

    fn run_pass(&self) -> ChannelResult<PassReport> {
        if self.is_detached() {
            return Err(ChannelError::Lifecycle(self.output.id()));
        }

        let mut state = self.state.lock();
        let mut events = Vec::new();
        let result = self.compute(&mut state, &mut events);
        let seq = state.next_seq;
        state.next_seq += 1;
        drop(state);

        self.publish_in_order(seq, events);
        result
    }

    /// Queues the events of pass `seq` and, unless another thread is already
    /// draining, publishes every consecutive queued pass. Every pass queues
    /// exactly once, even with no events, so the sequence has no gaps.
    fn publish_in_order(&self, seq: u64, events: Vec<StoreEvent>) {
        let mut outbox = self.outbox.lock();
        outbox.pending.insert(seq, events);
        if outbox.draining {
            return;
        }
        outbox.draining = true;
        loop {
            let next = outbox.next;
            let Some(batch) = outbox.pending.remove(&next) else {
                outbox.draining = false;
                return;
            };
            outbox.next += 1;
            if !batch.is_empty() {
                MutexGuard::unlocked(&mut outbox, || {
                    self.output.analog_data().publish_all(&batch)
                });
            }
        }
    }

    fn compute(
        &self,
        state: &mut EngineState,
        events: &mut Vec<StoreEvent>,
    ) -> ChannelResult<PassReport> {
        let mut report = PassReport::default();
        let observed: Vec<(u64, u64)> = self
            .inputs
            .iter()
            .map(|s| s.analog_data().count_and_generation())
            .collect();

        if self.needs_reset(state, &observed) {
            state.cursors.iter_mut().for_each(|c| *c = 0);
            state.generations = observed.iter().map(|(_, g)| *g).collect();
            state.operator.reset();
            events.extend(self.output.analog_data().clear_deferred());
            report.reset = true;
        }

        if !self.output.enabled() {
            return Ok(report);
        }

        let available = observed.iter().map(|(c, _)| *c).min().unwrap_or(0);
        let start = state.cursors.iter().copied().max().unwrap_or(0);
        if available <= start {
            return Ok(report);
        }

        let views = self
            .inputs
            .iter()
            .map(|s| s.analog_data().read_range(start, available))
            .collect::<Result<Vec<SampleRange>, _>>();
        let views = match views {
            Ok(v) if !self.generation_moved(state) => v,
            // An input was cleared mid-pass; its clear notification resets us.
            _ => return Ok(report),
        };

        let mut produced = Vec::with_capacity((available - start) as usize);
        let mut iters: Vec<_> = views.iter().map(|v| v.iter()).collect();
        let mut tuple: Vec<Sample> = Vec::with_capacity(iters.len());
        for index in start..available {
            tuple.clear();
            tuple.extend(iters.iter_mut().filter_map(|it| it.next()));
            let value = state
                .operator
                .apply(index, &tuple)
                .and_then(|v| finite(index, v));
            match (value, self.policy) {
                (Ok(v), _) => produced.push(Sample::new(tuple[0].timestamp, v)),
                (Err(ChannelError::Domain { .. }), DomainErrorPolicy::Sentinel(v)) => {
                    produced.push(Sample::new(tuple[0].timestamp, v))
                }
                (Err(ChannelError::Domain { index, reason }), DomainErrorPolicy::Skip) => {
                    log::trace!("{}: skipping tuple {index}: {reason}", self.output.id());
                    report.skipped += 1;
                }
                (Err(err), _) => return Err(err),
            }
        }

        let (range, added) = self.output.analog_data().append_deferred(&produced)?;
        events.extend(added);
        state.cursors.iter_mut().for_each(|c| *c = available);
        report.consumed = available - start;
        report.produced = produced.len() as u64;
        if !range.is_empty() {
            report.range = Some(range);
        }
        Ok(report)
    }

    fn needs_reset(&self, state: &EngineState, observed: &[(u64, u64)]) -> bool {
        let mut reset = false;
        for (i, (count, generation)) in observed.iter().enumerate() {
            let cursor = state.cursors[i];
            if *generation != state.generations[i] {
                log::debug!(
                    "{}: input {} cleared, resetting cursors",
                    self.output.id(),
                    self.inputs[i].id()
                );
                reset = true;
            } else if *count < cursor {
                let err = ChannelError::Alignment {
                    input: self.inputs[i].id(),
                    count: *count,
                    cursor,
                };
                log::warn!("{}: {err}; resetting cursors", self.output.id());
                reset = true;
            }
        }
        reset
    }

    fn generation_moved(&self, state: &EngineState) -> bool {
        self.inputs
            .iter()
            .zip(&state.generations)
            .any(|(s, g)| s.analog_data().generation() != *g)
    }
}

fn finite(index: u64, v: f64) -> ChannelResult<f64> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(ChannelError::Domain {
            index,
            reason: "non-finite result",
        })
    }
}
