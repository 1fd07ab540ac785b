//! # Sonar Driver
//!
//! 扫描式超声波测距仪的驱动层：
//! - 单次 ping 测距与故障分类（[`Ranger`]）
//! - 每个角度的批量采样与中位数过滤（[`SampleAggregator`]）
//! - 三角波扫描调度（[`SweepScheduler`]）
//! - 按键/远程双触发源的运行状态机（[`RunStateMachine`]）
//! - 无锁遥测快照（[`TelemetryStore`]，ArcSwap）
//! - 采集线程生命周期（[`Sonar`]）
//!
//! # 线程模型
//!
//! 采集线程独占全部引脚，是遥测的唯一写者；
//! API 层只通过 [`SonarContext`] 读取快照和设置运行状态。

pub mod aggregator;
mod config;
mod error;
pub mod metrics;
pub mod pipeline;
pub mod ranger;
pub mod run_state;
mod sonar;
pub mod state;
pub mod sweep;

pub use aggregator::{BatchSummary, SampleAggregator, SampleVerdict, median};
pub use config::{
    ButtonConfig, CycleConfig, DriverConfig, RangerConfig, SamplingConfig, ShutdownConfig,
    SweepConfig,
};
pub use error::DriverError;
pub use metrics::{MetricsSnapshot, SonarMetrics};
pub use pipeline::{Acquisition, CycleOutcome, acquisition_loop};
pub use ranger::{Measurement, MeasurementFault, Ranger};
pub use run_state::{ButtonEvents, RunEvent, RunState, RunStateMachine};
pub use sonar::Sonar;
pub use state::{SonarContext, TelemetrySnapshot, TelemetryStore};
pub use sweep::{SweepDirection, SweepPosition, SweepScheduler};
