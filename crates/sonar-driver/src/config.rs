//! 驱动配置
//!
//! 所有时序常量都在这里具名配置，默认值与原型机一致：
//! 回波超时 28ms（4m 往返约 24ms）、读数偏差 9cm、最大量程 400cm、
//! 每个角度 7 次采样、采样间隔 60ms、每步 650ms。

use crate::error::DriverError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 测距仪配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangerConfig {
    /// 触发脉冲宽度（微秒）
    pub trigger_pulse_us: u64,
    /// 等待回波上升沿/下降沿的超时（微秒，两段各自计时）
    pub echo_timeout_us: u64,
    /// 声速（厘米/微秒）
    pub speed_of_sound_cm_per_us: f64,
    /// 固定读数偏差（厘米），从换算结果中减去
    pub offset_cm: f64,
}

impl Default for RangerConfig {
    fn default() -> Self {
        Self {
            trigger_pulse_us: 10,
            echo_timeout_us: 28_000,
            speed_of_sound_cm_per_us: 0.0343,
            offset_cm: 9.0,
        }
    }
}

impl RangerConfig {
    /// 回波高电平时长 → 距离（厘米），可能为负
    pub fn distance_cm(&self, duration_us: u64) -> f64 {
        (self.speed_of_sound_cm_per_us * duration_us as f64) / 2.0 - self.offset_cm
    }

    pub fn trigger_pulse(&self) -> Duration {
        Duration::from_micros(self.trigger_pulse_us)
    }
}

/// 采样聚合配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// 每个扫描位置的 ping 次数
    pub batch_size: usize,
    /// 相邻 ping 之间的静置时间（毫秒），避免前一次回波串扰
    pub settle_ms: u64,
    /// 最大有效量程（厘米，不含）
    pub max_range_cm: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            batch_size: 7,
            settle_ms: 60,
            max_range_cm: 400.0,
        }
    }
}

impl SamplingConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// 扫描几何（舵机脉宽，微秒）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub min_pulse_us: i32,
    pub max_pulse_us: i32,
    /// 每步的脉宽增量（取绝对值）
    pub step_us: i32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            min_pulse_us: 500,
            max_pulse_us: 2500,
            step_us: 100,
        }
    }
}

/// 采集循环节拍
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// 每个扫描步的固定时间预算（毫秒），测量提前完成时补齐等待
    pub iteration_budget_ms: u64,
    /// 停止状态下轮询运行状态的间隔（毫秒）
    pub stopped_poll_ms: u64,
    /// 启动时是否直接进入运行状态
    pub start_running: bool,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            iteration_budget_ms: 650,
            stopped_poll_ms: 100,
            start_running: true,
        }
    }
}

/// 物理按键
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ButtonConfig {
    /// 去抖窗口（毫秒）
    pub debounce_ms: u64,
    /// 按键事件通道容量（满时丢弃新事件）
    pub event_capacity: usize,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 50,
            event_capacity: 16,
        }
    }
}

/// 退出流程
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// 归中脉宽（微秒）
    pub neutral_pulse_us: u32,
    /// 归中后保持时间（毫秒），之后释放舵机
    pub hold_ms: u64,
    /// 等待采集线程退出的上限（毫秒）
    pub join_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            neutral_pulse_us: 1500,
            hold_ms: 1000,
            join_timeout_ms: 5000,
        }
    }
}

/// 驱动完整配置
///
/// # Example
///
/// ```
/// use sonar_driver::DriverConfig;
///
/// let mut config = DriverConfig::default();
/// config.sampling.batch_size = 5;
/// assert!(config.validate().is_ok());
///
/// config.sweep.step_us = 300; // 2000 不能被 300 整除
/// assert!(config.validate().is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub ranger: RangerConfig,
    pub sampling: SamplingConfig,
    pub sweep: SweepConfig,
    pub cycle: CycleConfig,
    pub button: ButtonConfig,
    pub shutdown: ShutdownConfig,
}

impl DriverConfig {
    /// 校验配置一致性
    pub fn validate(&self) -> Result<(), DriverError> {
        let invalid = |msg: String| -> Result<(), DriverError> {
            Err(DriverError::InvalidConfig(msg))
        };

        let r = &self.ranger;
        if r.echo_timeout_us == 0 {
            return invalid("ranger.echo_timeout_us must be positive".into());
        }
        if r.trigger_pulse_us == 0 {
            return invalid("ranger.trigger_pulse_us must be positive".into());
        }
        if !(r.speed_of_sound_cm_per_us.is_finite() && r.speed_of_sound_cm_per_us > 0.0) {
            return invalid(format!(
                "ranger.speed_of_sound_cm_per_us must be positive, got {}",
                r.speed_of_sound_cm_per_us
            ));
        }
        if !r.offset_cm.is_finite() {
            return invalid("ranger.offset_cm must be finite".into());
        }

        let s = &self.sampling;
        if s.batch_size == 0 {
            return invalid("sampling.batch_size must be at least 1".into());
        }
        if !(s.max_range_cm.is_finite() && s.max_range_cm > 0.0) {
            return invalid(format!(
                "sampling.max_range_cm must be positive, got {}",
                s.max_range_cm
            ));
        }

        let w = &self.sweep;
        if w.step_us <= 0 {
            return invalid(format!("sweep.step_us must be positive, got {}", w.step_us));
        }
        if w.min_pulse_us < 0 || w.min_pulse_us >= w.max_pulse_us {
            return invalid(format!(
                "sweep bounds must satisfy 0 <= min < max, got [{}, {}]",
                w.min_pulse_us, w.max_pulse_us
            ));
        }
        if (w.max_pulse_us - w.min_pulse_us) % w.step_us != 0 {
            return invalid(format!(
                "sweep range {} is not a multiple of step {}",
                w.max_pulse_us - w.min_pulse_us,
                w.step_us
            ));
        }

        if self.cycle.iteration_budget_ms == 0 || self.cycle.stopped_poll_ms == 0 {
            return invalid("cycle intervals must be positive".into());
        }
        if self.button.event_capacity == 0 {
            return invalid("button.event_capacity must be at least 1".into());
        }

        let neutral = self.shutdown.neutral_pulse_us as i64;
        if neutral < w.min_pulse_us as i64 || neutral > w.max_pulse_us as i64 {
            return invalid(format!(
                "shutdown.neutral_pulse_us {} outside sweep bounds [{}, {}]",
                neutral, w.min_pulse_us, w.max_pulse_us
            ));
        }

        Ok(())
    }
}
