//! 三角波扫描调度
//!
//! 舵机指令值在 `[min, max]` 之间往返，到达边界时先反向再移动，永不越界。
//! 角度是指令值的纯函数：全量程线性映射到 0°..=180°。

use crate::config::SweepConfig;
use crate::error::DriverError;

/// 扫描方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepDirection {
    Up,
    Down,
}

impl SweepDirection {
    /// +1 / -1
    pub fn sign(self) -> i32 {
        match self {
            Self::Up => 1,
            Self::Down => -1,
        }
    }
}

/// 一个扫描位置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepPosition {
    /// 舵机指令值（脉宽，微秒）
    pub command_value: i32,
    /// 发出该位置时的扫描方向
    pub direction: SweepDirection,
    pub angle_degrees: f64,
}

/// 扫描调度器
#[derive(Debug, Clone)]
pub struct SweepScheduler {
    min: i32,
    max: i32,
    step: i32,
    /// 全量程的步数
    steps: i32,
    command_value: i32,
    direction: SweepDirection,
}

impl SweepScheduler {
    /// 从 `min` 开始向上扫描
    pub fn new(config: &SweepConfig) -> Result<Self, DriverError> {
        let step = config.step_us.abs();
        if step == 0 || config.min_pulse_us >= config.max_pulse_us {
            return Err(DriverError::InvalidConfig(format!(
                "invalid sweep geometry [{}, {}] step {}",
                config.min_pulse_us, config.max_pulse_us, config.step_us
            )));
        }
        let span = config.max_pulse_us - config.min_pulse_us;
        if span % step != 0 {
            return Err(DriverError::InvalidConfig(format!(
                "sweep range {} is not a multiple of step {}",
                span, step
            )));
        }

        Ok(Self {
            min: config.min_pulse_us,
            max: config.max_pulse_us,
            step,
            steps: span / step,
            command_value: config.min_pulse_us,
            direction: SweepDirection::Up,
        })
    }

    /// 每步对应的角度
    pub fn step_degrees(&self) -> f64 {
        180.0 / self.steps as f64
    }

    /// 一个单程包含的位置数（含两端）
    pub fn positions_per_leg(&self) -> usize {
        self.steps as usize + 1
    }

    /// 下一次 `advance()` 将发出的指令值
    pub fn peek(&self) -> i32 {
        self.command_value
    }

    /// 指令值 → 角度
    ///
    /// 先做整数乘法再除，保证两端精确落在 0° 和 180°。
    pub fn angle_for(&self, command_value: i32) -> f64 {
        let k = (command_value.clamp(self.min, self.max) - self.min) / self.step;
        (k as f64 * 180.0) / self.steps as f64
    }

    /// 发出当前位置并前进一步
    pub fn advance(&mut self) -> SweepPosition {
        let current = self.command_value;
        if current >= self.max {
            self.direction = SweepDirection::Down;
        } else if current <= self.min {
            self.direction = SweepDirection::Up;
        }

        let position = SweepPosition {
            command_value: current,
            direction: self.direction,
            angle_degrees: self.angle_for(current),
        };

        self.command_value = current + self.direction.sign() * self.step;
        position
    }
}
