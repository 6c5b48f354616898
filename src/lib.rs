pub mod config;
pub mod errors;
pub mod models;
pub mod plugins;
pub mod routes;
pub mod server;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use axum::{http::StatusCode, Json};
use config::Config;
use plugins::SystemStatus;
use server::DavServer;

#[derive(Clone)]
pub struct AppState {
    pub server: Arc<DavServer>,
    pub status: Arc<SystemStatus>,
    pub config: Config,
}

/// Health check endpoint for monitoring
pub async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(serde_json::json!({"status": "ok"})))
}
