use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use core_types::{ControlRequest, TickData, UserSettings};
use grid_engine::ControlOutcome;
use tower_http::cors::CorsLayer;

use crate::state::{AppState, UiSnapshot};

mod bootstrap;
mod control_api;
mod engine_loop;
mod persist;
mod state;


#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::async_main().await
}
