//! 控制 API 逻辑（与 HTTP 框架无关）

use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use sonar_driver::{MetricsSnapshot, RunState, SonarContext};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::info;

/// 远程命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Stop,
}

impl ControlCommand {
    /// 命令对应的目标状态
    pub fn target(self) -> RunState {
        match self {
            Self::Start => RunState::Running,
            Self::Stop => RunState::Stopped,
        }
    }
}

impl FromStr for ControlCommand {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            other => Err(ApiError::UnknownCommand(other.to_string())),
        }
    }
}

/// `GET /data` 响应
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataResponse {
    pub angle: f64,
    pub distance: f64,
    /// `true` = 运行中
    pub state: bool,
    pub stale: bool,
    pub seq: u64,
}

/// `GET /control/{cmd}` 响应
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub state: bool,
}

/// `GET /health` 响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub acquisition_alive: bool,
}

/// 可视化客户端所需的扫描几何
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClientGeometry {
    /// 客户端绘制的角度单位（度）
    pub angle_unit_deg: f64,
    pub max_range_cm: f64,
    pub min_angle_deg: f64,
    pub max_angle_deg: f64,
}

impl Default for ClientGeometry {
    fn default() -> Self {
        Self::new(9.0, 400.0)
    }
}

impl ClientGeometry {
    pub fn new(angle_unit_deg: f64, max_range_cm: f64) -> Self {
        Self {
            angle_unit_deg,
            max_range_cm,
            min_angle_deg: 0.0,
            max_angle_deg: 180.0,
        }
    }
}

/// 控制 API
#[derive(Debug, Clone)]
pub struct ControlApi {
    ctx: Arc<SonarContext>,
    geometry: ClientGeometry,
}

impl ControlApi {
    pub fn new(ctx: Arc<SonarContext>, geometry: ClientGeometry) -> Self {
        Self { ctx, geometry }
    }

    /// 最新快照；`state` 取实时运行状态
    pub fn snapshot(&self) -> DataResponse {
        let snap = self.ctx.telemetry.read();
        DataResponse {
            angle: snap.angle_degrees,
            distance: snap.distance_cm,
            state: self.ctx.run_state.current().is_running(),
            stale: snap.stale,
            seq: snap.seq,
        }
    }

    /// 执行远程命令（幂等）
    pub fn command(&self, cmd: ControlCommand) -> ControlResponse {
        self.ctx
            .metrics
            .remote_commands
            .fetch_add(1, Ordering::Relaxed);
        let target = cmd.target();
        let previous = self.ctx.run_state.set(target);
        if previous != target {
            info!("Remote command {:?}: {} -> {}", cmd, previous, target);
        }
        ControlResponse {
            state: self.ctx.run_state.current().is_running(),
        }
    }

    /// 解析并执行命令字符串
    pub fn command_str(&self, cmd: &str) -> Result<ControlResponse, ApiError> {
        Ok(self.command(cmd.parse()?))
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".to_string(),
            acquisition_alive: self.ctx.is_acquisition_alive(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    pub fn geometry(&self) -> ClientGeometry {
        self.geometry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> ControlApi {
        ControlApi::new(Arc::new(SonarContext::default()), ClientGeometry::default())
    }

    #[test]
    fn test_parse_command() {
        assert_eq!("start".parse::<ControlCommand>(), Ok(ControlCommand::Start));
        assert_eq!("stop".parse::<ControlCommand>(), Ok(ControlCommand::Stop));
        assert_eq!(
            "START".parse::<ControlCommand>(),
            Err(ApiError::UnknownCommand("START".into()))
        );
    }

    #[test]
    fn test_start_when_running_is_noop() {
        let api = api();
        assert_eq!(
            api.command(ControlCommand::Start),
            ControlResponse { state: true }
        );
        assert!(api.snapshot().state);
        assert_eq!(api.metrics().remote_commands, 1);
    }

    #[test]
    fn test_stop_then_start() {
        let api = api();
        assert!(!api.command(ControlCommand::Stop).state);
        assert!(!api.snapshot().state);
        assert!(api.command(ControlCommand::Start).state);
        assert!(api.snapshot().state);
    }

    #[test]
    fn test_initial_snapshot_matches_boot_values() {
        let data = api().snapshot();
        assert_eq!(data.angle, 90.0);
        assert_eq!(data.distance, 0.0);
        assert!(data.state);
        assert!(data.stale);
    }

    #[test]
    fn test_unknown_command_does_not_touch_state() {
        let api = api();
        assert!(api.command_str("reboot").is_err());
        assert!(api.snapshot().state);
        assert_eq!(api.metrics().remote_commands, 0);
    }
}
