//! HTTP 路由（axum）

use crate::api::{ClientGeometry, ControlApi, ControlResponse, DataResponse, HealthResponse};
use crate::error::ApiError;
use axum::Router;
use axum::extract::{Path, State};
use axum::response::Json;
use axum::routing::get;
use sonar_driver::MetricsSnapshot;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// 构建路由
pub fn router(api: Arc<ControlApi>) -> Router {
    Router::new()
        .route("/data", get(data))
        .route("/control/:cmd", get(control))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/config", get(config))
        .with_state(api)
}

async fn data(State(api): State<Arc<ControlApi>>) -> Json<DataResponse> {
    Json(api.snapshot())
}

async fn control(
    State(api): State<Arc<ControlApi>>,
    Path(cmd): Path<String>,
) -> Result<Json<ControlResponse>, ApiError> {
    debug!("GET /control/{}", cmd);
    api.command_str(&cmd).map(Json)
}

async fn health(State(api): State<Arc<ControlApi>>) -> Json<HealthResponse> {
    Json(api.health())
}

async fn metrics(State(api): State<Arc<ControlApi>>) -> Json<MetricsSnapshot> {
    Json(api.metrics())
}

async fn config(State(api): State<Arc<ControlApi>>) -> Json<ClientGeometry> {
    Json(api.geometry())
}

/// 在已绑定的监听器上提供服务，直到 `shutdown` 完成
pub async fn serve(
    listener: TcpListener,
    api: Arc<ControlApi>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Control API listening on http://{}", addr);
    }
    axum::serve(listener, router(api))
        .with_graceful_shutdown(shutdown)
        .await
}
