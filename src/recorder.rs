use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::data::{ListenerId, SampleRange, SampleStore, Signal};
use crate::types::SignalEvent;

/// Writes the current contents of `signal` as `timestamp,value` rows.
pub fn export_csv<W: Write>(signal: &Signal, mut writer: W) -> io::Result<u64> {
    let store = signal.analog_data();
    let snapshot = store
        .read_range(0, store.count())
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    writeln!(writer, "timestamp,{}", signal.internal_name())?;
    write_rows(&mut writer, &snapshot)?;
    writer.flush()?;
    Ok(snapshot.len() as u64)
}

fn write_rows<W: Write>(w: &mut W, range: &SampleRange) -> io::Result<()> {
    for s in range.iter() {
        writeln!(w, "{:.6},{}", s.timestamp, s.value)?;
    }
    Ok(())
}

/// Marker row written when the recorded signal is cleared.
pub const CLEARED_MARKER: &str = "# cleared";

/// File state shared with the listener. `written` is the store index up to
/// which rows have been written in the current `generation`.
struct Live {
    writer: Option<BufWriter<File>>,
    generation: u64,
    written: u64,
}

impl Live {
    /// Catches up with a clear of the store, if there was one.
    fn sync_generation(&mut self, generation: u64) -> io::Result<()> {
        if generation == self.generation {
            return Ok(());
        }
        self.generation = generation;
        self.written = 0;
        match self.writer.as_mut() {
            Some(w) => writeln!(w, "{CLEARED_MARKER}"),
            None => Ok(()),
        }
    }

    fn on_event(
        &mut self,
        store: &SampleStore,
        ev: &SignalEvent,
        rows: &AtomicU64,
    ) -> io::Result<()> {
        if self.writer.is_none() {
            return Ok(());
        }
        let (count, generation) = store.count_and_generation();
        self.sync_generation(generation)?;
        let SignalEvent::SamplesAdded { end, .. } = ev else {
            return Ok(());
        };
        let end = (*end).min(count);
        if end <= self.written {
            return Ok(());
        }
        let Ok(range) = store.read_range(self.written, end) else {
            return Ok(());
        };
        // Rows read across a clear belong to neither generation.
        if store.generation() != generation {
            return Ok(());
        }
        if let Some(w) = self.writer.as_mut() {
            write_rows(w, &range)?;
        }
        self.written = end;
        rows.fetch_add(range.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

type SharedLive = Arc<Mutex<Live>>;

/// Live CSV recorder: appends a row for every sample added to a signal
/// while it is running. A clear of the signal writes [`CLEARED_MARKER`] and
/// recording restarts from the first sample of the new data.
pub struct DataRecorder {
    signal: Arc<Signal>,
    path: PathBuf,
    live: SharedLive,
    rows: Arc<AtomicU64>,
    listener: Option<ListenerId>,
}

impl DataRecorder {
    pub fn start(signal: &Arc<Signal>, path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut w = BufWriter::new(File::create(&path)?);
        writeln!(w, "timestamp,{}", signal.internal_name())?;
        let (written, generation) = signal.analog_data().count_and_generation();
        let live: SharedLive = Arc::new(Mutex::new(Live {
            writer: Some(w),
            generation,
            written,
        }));
        let rows = Arc::new(AtomicU64::new(0));

        let listener = {
            let live = Arc::clone(&live);
            let rows = Arc::clone(&rows);
            let store = Arc::clone(signal.analog_data());
            let name = signal.internal_name().to_string();
            signal.subscribe(move |ev| {
                if !matches!(
                    ev,
                    SignalEvent::SamplesAdded { .. } | SignalEvent::SamplesCleared { .. }
                ) {
                    return;
                }
                let mut live = live.lock();
                if let Err(e) = live.on_event(&store, ev, &rows) {
                    log::warn!("recording {name} failed, closing file: {e}");
                    live.writer = None;
                }
            })
        };
        log::info!("recording {} to {}", signal.internal_name(), path.display());
        Ok(Self {
            signal: Arc::clone(signal),
            path,
            live,
            rows,
            listener: Some(listener),
        })
    }

    /// Starts recording into `dir`, naming the file after the signal and the
    /// current time.
    pub fn start_in_dir(signal: &Arc<Signal>, dir: impl AsRef<Path>) -> io::Result<Self> {
        let timestamp = SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let file = format!("{}_{}.csv", signal.internal_name().replace('.', "_"), timestamp);
        Self::start(signal, dir.as_ref().join(file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    pub fn is_recording(&self) -> bool {
        self.listener.is_some()
    }

    /// Unsubscribes and flushes the file. Idempotent.
    pub fn stop(&mut self) -> io::Result<()> {
        let Some(listener) = self.listener.take() else {
            return Ok(());
        };
        self.signal.unsubscribe(listener);
        if let Some(mut w) = self.live.lock().writer.take() {
            w.flush()?;
        }
        log::info!(
            "recording saved: {} ({} rows)",
            self.path.display(),
            self.rows_written()
        );
        Ok(())
    }
}

impl Drop for DataRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("failed to flush {}: {e}", self.path.display());
        }
    }
}
