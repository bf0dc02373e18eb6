use core_types::{
    ActionResponse, ControlRequest, EngineError, MarketView, RuntimeState, TickData, UserSettings,
};
use grid_engine::ControlOutcome;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Shared handle set for the HTTP surface. Handlers never touch engine state
/// directly; every mutation goes through the [`EngineHandle`] queue and the
/// read side sees only the committed [`UiSnapshot`].
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) engine: EngineHandle,
    pub(crate) snapshot: Arc<RwLock<UiSnapshot>>,
    pub(crate) prometheus: PrometheusHandle,
}

/// Read-consistent copy of the committed state, rebuilt by the engine loop
/// after every applied event. The UI polls this at 1 Hz.
#[derive(Debug, Clone, Serialize, Default)]
pub(crate) struct UiSnapshot {
    pub(crate) settings: UserSettings,
    pub(crate) runtime: RuntimeState,
    pub(crate) market: MarketView,
    pub(crate) last_update: String,
}

/// One serialized engine event with its reply channel.
pub(crate) enum EngineCommand {
    Tick(TickData, oneshot::Sender<ActionResponse>),
    UpdateSettings(
        UserSettings,
        oneshot::Sender<Result<UserSettings, EngineError>>,
    ),
    Control(ControlRequest, oneshot::Sender<ControlOutcome>),
}

/// Cloneable sender side of the single-writer event queue. A `None` reply
/// means the engine loop has shut down.
#[derive(Clone)]
pub(crate) struct EngineHandle {
    pub(crate) tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub(crate) async fn tick(&self, tick: TickData) -> Option<ActionResponse> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(EngineCommand::Tick(tick, reply)).await.ok()?;
        rx.await.ok()
    }

    pub(crate) async fn update_settings(
        &self,
        incoming: UserSettings,
    ) -> Option<Result<UserSettings, EngineError>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::UpdateSettings(incoming, reply))
            .await
            .ok()?;
        rx.await.ok()
    }

    pub(crate) async fn control(&self, request: ControlRequest) -> Option<ControlOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Control(request, reply))
            .await
            .ok()?;
        rx.await.ok()
    }
}
