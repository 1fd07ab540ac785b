//! # Sonar API
//!
//! 远程客户端的 HTTP 接口：
//!
//! | 路由 | 说明 |
//! |---|---|
//! | `GET /data` | `{angle, distance, state, stale, seq}` |
//! | `GET /control/start`、`GET /control/stop` | 设置运行状态，返回 `{state}` |
//! | `GET /health` | 采集线程存活状态 |
//! | `GET /metrics` | 采集计数器 |
//! | `GET /config` | 客户端绘图所需的扫描几何 |
//!
//! 控制接口没有鉴权。

mod api;
mod error;
mod routes;

pub use api::{
    ClientGeometry, ControlApi, ControlCommand, ControlResponse, DataResponse, HealthResponse,
};
pub use error::ApiError;
pub use routes::{router, serve};
