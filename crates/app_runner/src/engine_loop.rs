use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use core_types::SystemState;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::persist;
use crate::state::{EngineCommand, EngineHandle, UiSnapshot};

const QUEUE_CAPACITY: usize = 256;

/// Spawns the single-writer engine loop. The task exclusively owns the
/// [`SystemState`]; every mutation arrives over the queue and its
/// side-effects (snapshot publish, persistence, reply) are visible before
/// the next event is dispatched. When the last handle drops the loop drains
/// what is queued, persists once more and exits.
pub(crate) fn spawn_engine(
    mut state: SystemState,
    snapshot: Arc<RwLock<UiSnapshot>>,
    state_path: PathBuf,
) -> (EngineHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(QUEUE_CAPACITY);
    publish(&snapshot, &state);

    let task = tokio::spawn(async move {
        let mut persist_degraded = false;
        while let Some(command) = rx.recv().await {
            match command {
                EngineCommand::Tick(tick, reply) => {
                    metrics::counter!("engine.ticks_total").increment(1);
                    let response = grid_engine::decide_tick(&mut state, &tick, unix_now());
                    if !response.is_wait() {
                        metrics::counter!("engine.actions_total").increment(1);
                    }
                    commit(&mut state, &snapshot, &state_path, &mut persist_degraded);
                    let _ = reply.send(response);
                }
                EngineCommand::UpdateSettings(incoming, reply) => {
                    let result = grid_engine::apply_settings(&mut state, incoming);
                    if result.is_ok() {
                        commit(&mut state, &snapshot, &state_path, &mut persist_degraded);
                    }
                    let _ = reply.send(result.map(|()| state.settings.clone()));
                }
                EngineCommand::Control(request, reply) => {
                    let outcome = grid_engine::apply_control(&mut state, &request);
                    commit(&mut state, &snapshot, &state_path, &mut persist_degraded);
                    let _ = reply.send(outcome);
                }
            }
        }

        if let Err(err) = persist::write_state_atomic(&state_path, &state) {
            tracing::error!(?err, "final snapshot write failed");
        }
        tracing::info!("engine loop drained; exiting");
    });

    (EngineHandle { tx }, task)
}

fn commit(
    state: &mut SystemState,
    snapshot: &Arc<RwLock<UiSnapshot>>,
    path: &Path,
    persist_degraded: &mut bool,
) {
    state.last_update = Utc::now().to_rfc3339();
    publish(snapshot, state);
    match persist::write_state_atomic(path, state) {
        Ok(()) => {
            if *persist_degraded {
                tracing::info!("snapshot writes recovered");
                *persist_degraded = false;
            }
        }
        Err(err) => {
            metrics::counter!("engine.snapshot_write_failures").increment(1);
            if !*persist_degraded {
                tracing::error!(?err, "snapshot write failed; in-memory state stays authoritative");
                *persist_degraded = true;
            }
        }
    }
}

fn publish(snapshot: &Arc<RwLock<UiSnapshot>>, state: &SystemState) {
    *snapshot.write() = UiSnapshot {
        settings: state.settings.clone(),
        runtime: state.runtime.clone(),
        market: state.runtime.market,
        last_update: state.last_update.clone(),
    };
}

/// Engine time: UNIX seconds with sub-second precision.
pub(crate) fn unix_now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1_000.0
}
