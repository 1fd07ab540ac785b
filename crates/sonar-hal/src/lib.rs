//! # Sonar HAL
//!
//! 扫描式超声波测距仪的硬件抽象层，提供统一的引脚/舵机/时钟接口。
//!
//! - [`TriggerOutput`] / [`EchoInput`]：HC-SR04 类传感器的触发与回波线
//! - [`ServoOutput`]：舵机脉宽输出
//! - [`StatusIndicator`]：运行/停止指示灯
//! - [`EdgeSource`]：按键下降沿事件源
//! - [`Clock`]：单调时钟（微秒）与延时
//!
//! 后端：
//! - [`sim`]：纯软件模拟板（测试与无硬件运行）
//! - `rpi`：树莓派 GPIO（需要 `rpi` feature，仅 Linux）

use std::sync::Arc;

mod clock;
mod error;
pub mod sim;

#[cfg(all(target_os = "linux", feature = "rpi"))]
pub mod rpi;

pub use clock::{Clock, SystemClock};
pub use error::{HalError, HalErrorKind};

/// 触发线（输出）
///
/// 写电平不会失败（与 GPIO 寄存器写入语义一致）。
pub trait TriggerOutput: Send {
    fn set_high(&mut self);
    fn set_low(&mut self);
}

/// 回波线（输入）
///
/// 使用 `&mut self`：模拟后端在每次采样时推进虚拟时间。
pub trait EchoInput: Send {
    fn is_high(&mut self) -> bool;
}

/// 舵机输出
pub trait ServoOutput: Send {
    /// 设置脉宽（微秒），例如 500..=2500
    fn set_pulse_width(&mut self, pulse_us: u32) -> Result<(), HalError>;

    /// 停止输出脉冲（舵机断电/不再保持位置）
    fn release(&mut self) -> Result<(), HalError>;
}

/// 运行状态指示灯
pub trait StatusIndicator: Send {
    /// `true`：运行（绿灯），`false`：停止（红灯）
    fn show(&mut self, running: bool);

    /// 全部熄灭
    fn off(&mut self);
}

/// 边沿回调
///
/// 在平台的中断/回调线程中执行，必须在有界时间内返回。
pub type EdgeCallback = Box<dyn FnMut() + Send + 'static>;

/// 按键下降沿事件源
pub trait EdgeSource: Send {
    /// 注册下降沿回调（替换已有回调）
    fn on_falling_edge(&mut self, callback: EdgeCallback) -> Result<(), HalError>;

    /// 注销回调
    fn clear(&mut self) -> Result<(), HalError>;
}

/// 一块完整的扫描板
///
/// 所有引脚由采集线程独占；`clock` 可被多处共享。
pub struct Board {
    pub trigger: Box<dyn TriggerOutput>,
    pub echo: Box<dyn EchoInput>,
    pub servo: Box<dyn ServoOutput>,
    pub indicator: Box<dyn StatusIndicator>,
    /// 物理按键（可选，没有按键时只能远程控制）
    pub button: Option<Box<dyn EdgeSource>>,
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Board")
            .field("has_button", &self.button.is_some())
            .finish_non_exhaustive()
    }
}
