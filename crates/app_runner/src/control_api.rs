use super::*;

pub(super) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/tick", post(tick))
        .route("/api/ui-data", get(ui_data))
        .route("/api/update-settings", post(update_settings))
        .route("/api/control", post(control))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "running",
        "system": "grid-dca-engine",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.snapshot.read().clone();
    Json(serde_json::json!({
        "status": if snapshot.runtime.error_status.is_empty() { "healthy" } else { "error" },
        "error": snapshot.runtime.error_status,
        "buy": snapshot.runtime.buy.on,
        "sell": snapshot.runtime.sell.on,
        "price": snapshot.market.mid,
    }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}

async fn tick(State(state): State<AppState>, Json(tick): Json<TickData>) -> impl IntoResponse {
    match state.engine.tick(tick).await {
        Some(response) => Json(response).into_response(),
        None => engine_unavailable(),
    }
}

async fn ui_data(State(state): State<AppState>) -> Json<UiSnapshot> {
    Json(state.snapshot.read().clone())
}

async fn update_settings(
    State(state): State<AppState>,
    Json(incoming): Json<UserSettings>,
) -> impl IntoResponse {
    match state.engine.update_settings(incoming).await {
        Some(Ok(accepted)) => Json(accepted).into_response(),
        Some(Err(err)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": err.to_string()})),
        )
            .into_response(),
        None => engine_unavailable(),
    }
}

async fn control(
    State(state): State<AppState>,
    Json(request): Json<ControlRequest>,
) -> impl IntoResponse {
    match state.engine.control(request).await {
        Some(ControlOutcome::Emergency) => {
            Json(serde_json::json!({"status": "emergency"})).into_response()
        }
        Some(ControlOutcome::Applied) => Json(serde_json::json!({"status": "ok"})).into_response(),
        None => engine_unavailable(),
    }
}

fn engine_unavailable() -> axum::response::Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({"error": "engine unavailable"})),
    )
        .into_response()
}
