//! Tracing and metrics bootstrap for the engine binary.

use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Decision logs from the engine crates at info, everything else at warn.
/// Overridable through `RUST_LOG`.
const DEFAULT_FILTER: &str = "app_runner=info,grid_engine=info,warn";

/// Installs the global tracing subscriber over a non-blocking stdout writer.
/// The returned guard must live as long as the process, or the tail of the
/// log is lost on shutdown.
pub fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true)
        .try_init();

    guard
}

/// Installs the Prometheus recorder once and pre-registers the engine's
/// counters so `/metrics` exposes them at zero before the first heartbeat.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PROM_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("install prometheus recorder")
        })
        .clone();

    metrics::describe_counter!("engine.ticks_total", "Heartbeats processed");
    metrics::describe_counter!("engine.actions_total", "Non-WAIT actions emitted");
    metrics::describe_counter!(
        "engine.snapshot_write_failures",
        "Failed state snapshot writes"
    );
    metrics::counter!("engine.ticks_total").absolute(0);
    metrics::counter!("engine.actions_total").absolute(0);
    metrics::counter!("engine.snapshot_write_failures").absolute(0);

    handle
}
