// src/main.rs
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use mathstream::drivers::SimulatedSource;
use mathstream::recorder::DataRecorder;
use mathstream::{
    load_config, spawn_acquisition, Channel, Pacing, Session, SessionConfig, SignalEvent,
};

fn main() -> Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => load_config(&path).with_context(|| format!("loading config {path}"))?,
        None => {
            log::info!("no config given, using built-in power supply demo");
            SessionConfig::default()
        }
    };

    let session = Session::from_config(&config).context("building session")?;
    let events = session.observe();

    let mut recorders = Vec::new();
    if let Some(dir) = &config.record_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating record dir {}", dir.display()))?;
        for derived in session.derived_channels() {
            recorders.push(DataRecorder::start_in_dir(derived.signal(), dir)?);
        }
    }

    let mut workers = Vec::new();
    for src in &config.sources {
        let channel = session
            .find(&src.channel.name)
            .and_then(|id| session.source(id))
            .with_context(|| format!("source {} missing from session", src.channel.name))?;
        let source = SimulatedSource::new(src.simulation.clone(), src.channel.start_timestamp)?;
        let pacing = Pacing::Fixed(source.batch_period());
        workers.push(spawn_acquisition(channel, source, pacing));
    }

    let deadline = Instant::now() + Duration::from_secs_f64(config.run_seconds);
    let mut clears = 0usize;
    while Instant::now() < deadline && !workers.iter().all(|w| w.is_finished()) {
        std::thread::sleep(Duration::from_millis(250));
        clears += events
            .try_iter()
            .filter(|e| matches!(e, SignalEvent::SamplesCleared { .. }))
            .count();
        for derived in session.derived_channels() {
            let store = derived.signal().analog_data();
            log::debug!("{} = {}: {} samples", derived.name(), derived.describe(), store.count());
        }
    }

    for worker in &workers {
        worker.stop();
    }
    for worker in workers {
        let name = worker.channel().name();
        match worker.join() {
            Ok(stats) => log::info!("{name}: {} samples acquired", stats.stored),
            Err(e) => log::error!("{name}: acquisition failed: {e}"),
        }
    }
    for mut recorder in recorders {
        recorder.stop()?;
    }

    for derived in session.derived_channels() {
        let store = derived.signal().analog_data();
        let (min, max) = store.min_max().unwrap_or((f32::NAN, f32::NAN));
        log::info!(
            "{} = {}: {} samples, min {min}, max {max}, last {:?}",
            derived.name(),
            derived.describe(),
            store.count(),
            store.last().map(|s| s.value)
        );
    }
    log::info!("{clears} clears observed");
    Ok(())
}
