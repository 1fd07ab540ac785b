//! 运行状态机
//!
//! 两个独立的触发源：
//! - 物理按键：去抖后的下降沿无条件翻转状态
//! - 远程命令：设置显式目标状态（幂等）
//!
//! 按键回调运行在平台的中断线程里，它从不直接修改状态，
//! 只通过有界通道发送 [`RunEvent`]，由采集线程在每次轮询/每个扫描步开始时取出并应用。

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use serde::{Deserialize, Serialize};
use sonar_hal::Clock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum RunState {
    /// 停止：不扫描、不测距，红灯亮
    Stopped = 0,
    /// 运行（默认）：扫描测距，绿灯亮
    #[default]
    Running = 1,
}

impl RunState {
    /// 从 u8 转换，无效值视为 Stopped
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_running(self) -> bool {
        self == Self::Running
    }

    /// 翻转后的状态
    pub fn toggled(self) -> Self {
        match self {
            Self::Running => Self::Stopped,
            Self::Stopped => Self::Running,
        }
    }

    pub fn from_bool(running: bool) -> Self {
        if running { Self::Running } else { Self::Stopped }
    }
}

impl From<RunState> for bool {
    fn from(state: RunState) -> Self {
        state.is_running()
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// 发往采集线程的状态事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    /// 一次已去抖的按键按下
    ButtonPressed,
}

/// 运行状态机
///
/// # 示例
///
/// ```rust
/// use sonar_driver::{RunState, RunStateMachine};
///
/// let sm = RunStateMachine::new(RunState::Running, 16);
/// assert_eq!(sm.set(RunState::Stopped), RunState::Running);
/// assert_eq!(sm.current(), RunState::Stopped);
/// assert_eq!(sm.toggle_from_button(), RunState::Running);
/// ```
#[derive(Debug)]
pub struct RunStateMachine {
    state: AtomicU8,
    events_tx: Sender<RunEvent>,
    events_rx: Receiver<RunEvent>,
}

impl RunStateMachine {
    /// `event_capacity`：按键事件通道容量，至少为 1
    pub fn new(initial: RunState, event_capacity: usize) -> Self {
        let (events_tx, events_rx) = bounded(event_capacity.max(1));
        Self {
            state: AtomicU8::new(initial.as_u8()),
            events_tx,
            events_rx,
        }
    }

    pub fn current(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// 设置目标状态，返回之前的状态
    ///
    /// 目标与当前相同时是空操作。
    pub fn set(&self, target: RunState) -> RunState {
        let previous = RunState::from_u8(self.state.swap(target.as_u8(), Ordering::AcqRel));
        if previous != target {
            info!("Run state: {} -> {} (remote)", previous, target);
        } else {
            debug!("Run state already {}", target);
        }
        previous
    }

    /// 无条件翻转，返回新状态
    pub fn toggle_from_button(&self) -> RunState {
        let previous = RunState::from_u8(self.state.fetch_xor(1, Ordering::AcqRel));
        let current = previous.toggled();
        info!("Run state: {} -> {} (button)", previous, current);
        current
    }

    /// 为按键回调创建事件发送端
    pub fn button_events(&self, clock: Arc<dyn Clock>, debounce: Duration) -> ButtonEvents {
        ButtonEvents {
            tx: self.events_tx.clone(),
            debouncer: EdgeDebouncer::new(clock, debounce),
        }
    }

    /// 取出并应用所有待处理事件，返回已应用的数量
    ///
    /// 只应在采集线程中调用。
    pub fn apply_pending_events(&self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                RunEvent::ButtonPressed => {
                    self.toggle_from_button();
                },
            }
            applied += 1;
        }
        applied
    }
}

/// 边沿去抖
///
/// 距上一次被接受的边沿不足 `window` 的边沿被丢弃。
pub struct EdgeDebouncer {
    clock: Arc<dyn Clock>,
    window_us: u64,
    last_accepted_us: Option<u64>,
}

impl EdgeDebouncer {
    pub fn new(clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            clock,
            window_us: window.as_micros() as u64,
            last_accepted_us: None,
        }
    }

    /// 记录一次边沿，返回是否接受
    pub fn accept(&mut self) -> bool {
        let now = self.clock.now_us();
        match self.last_accepted_us {
            Some(last) if now.saturating_sub(last) < self.window_us => false,
            _ => {
                self.last_accepted_us = Some(now);
                true
            },
        }
    }
}

/// 按键事件发送端（在边沿回调上下文中使用）
pub struct ButtonEvents {
    tx: Sender<RunEvent>,
    debouncer: EdgeDebouncer,
}

impl ButtonEvents {
    /// 处理一次下降沿：去抖后非阻塞地发送事件
    ///
    /// 返回事件是否已入队。通道已满时丢弃事件并记录告警。
    pub fn notify(&mut self) -> bool {
        if !self.debouncer.accept() {
            return false;
        }
        match self.tx.try_send(RunEvent::ButtonPressed) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Button event queue full, dropping press");
                false
            },
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}
