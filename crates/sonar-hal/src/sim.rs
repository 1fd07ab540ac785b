//! 模拟扫描板
//!
//! 无硬件依赖的完整后端，用于单元/集成测试以及 `sonard --backend sim`。
//!
//! # 回波模型
//!
//! 每次触发线下降沿时，场景（[`SimScene`]）决定本次 ping 的回波形态
//! （[`EchoResponse`]）：
//! - 脚本模式：按顺序弹出预设响应（测试精确控制时序）
//! - 剖面模式：根据当前舵机角度查询障碍物距离，换算成回波宽度
//!
//! 回波线电平完全由「距触发下降沿的经过时间」决定，因此在 [`SimClock`]
//! （虚拟时间）和 [`SystemClock`](crate::SystemClock)（真实时间）下行为一致。
//!
//! # 虚拟时间
//!
//! 使用 [`SimClock`] 时，每次读取回波线都会把虚拟时间推进 `poll_cost`，
//! 模拟轮询本身的耗时；这样超时循环总能在有限次轮询内结束。

use crate::{
    Board, Clock, EchoInput, EdgeCallback, EdgeSource, HalError, ServoOutput, StatusIndicator,
    TriggerOutput,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

/// 虚拟单调时钟
///
/// `sleep()` 立即返回并推进虚拟时间；读取不推进时间。
#[derive(Debug, Default)]
pub struct SimClock {
    now_us: AtomicU64,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// 手动推进虚拟时间
    pub fn advance(&self, duration: Duration) {
        self.now_us.fetch_add(duration.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Clock for SimClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// 单次 ping 的回波形态（时间均相对触发下降沿）
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EchoResponse {
    /// 回波线从未拉高（无目标或目标过近）
    Silent,
    /// 回波线拉高后不再回落
    StuckHigh { rise_after_us: u64 },
    /// 正常回波脉冲
    Pulse { rise_after_us: u64, width_us: u64 },
}

impl EchoResponse {
    /// HC-SR04 在触发后约 200µs 发出声波串并拉高回波线
    pub const DEFAULT_RISE_US: u64 = 200;

    /// 按往返距离构造回波脉冲
    ///
    /// `reading_offset_cm` 模拟传感器的固定读数偏差（测量值 = 真实值 + 偏差）。
    pub fn for_distance(distance_cm: f64, speed_cm_per_us: f64, reading_offset_cm: f64) -> Self {
        let apparent = (distance_cm + reading_offset_cm).max(0.0);
        let width_us = (2.0 * apparent / speed_cm_per_us).round() as u64;
        Self::Pulse {
            rise_after_us: Self::DEFAULT_RISE_US,
            width_us,
        }
    }

    /// 给定经过时间（自触发下降沿）时的回波电平
    pub fn level_at(&self, elapsed_us: u64) -> bool {
        match *self {
            Self::Silent => false,
            Self::StuckHigh { rise_after_us } => elapsed_us >= rise_after_us,
            Self::Pulse {
                rise_after_us,
                width_us,
            } => elapsed_us >= rise_after_us && elapsed_us < rise_after_us + width_us,
        }
    }
}

/// 障碍物距离剖面：角度（度）→ 距离（厘米），`None` 表示该方向无回波
pub type DistanceProfile = Arc<dyn Fn(f64) -> Option<f64> + Send + Sync>;

enum EchoSource {
    Scripted {
        queue: VecDeque<EchoResponse>,
        fallback: EchoResponse,
    },
    Profile {
        profile: DistanceProfile,
        speed_cm_per_us: f64,
        reading_offset_cm: f64,
        noise_cm: f64,
        rng: StdRng,
    },
}

struct SceneState {
    source: EchoSource,
    /// 舵机脉宽 → 角度映射所用的量程
    pulse_range_us: (u32, u32),
    servo_pulse_us: Option<u32>,
    trigger_high: bool,
    trigger_fall_us: Option<u64>,
    current: EchoResponse,
    pings: u64,
}

impl SceneState {
    fn servo_angle(&self) -> f64 {
        let (min, max) = self.pulse_range_us;
        let pulse = self.servo_pulse_us.unwrap_or((min + max) / 2);
        let span = max.saturating_sub(min).max(1) as f64;
        ((pulse.saturating_sub(min)) as f64 / span * 180.0).clamp(0.0, 180.0)
    }

    fn next_response(&mut self) -> EchoResponse {
        let angle = self.servo_angle();
        match &mut self.source {
            EchoSource::Scripted { queue, fallback } => queue.pop_front().unwrap_or(*fallback),
            EchoSource::Profile {
                profile,
                speed_cm_per_us,
                reading_offset_cm,
                noise_cm,
                rng,
            } => match profile(angle) {
                Some(distance) => {
                    let jitter = if *noise_cm > 0.0 {
                        rng.gen_range(-*noise_cm..=*noise_cm)
                    } else {
                        0.0
                    };
                    EchoResponse::for_distance(
                        distance + jitter,
                        *speed_cm_per_us,
                        *reading_offset_cm,
                    )
                },
                None => EchoResponse::Silent,
            },
        }
    }
}

/// 模拟场景（可克隆句柄，所有模拟引脚共享）
#[derive(Clone)]
pub struct SimScene {
    inner: Arc<Mutex<SceneState>>,
}

impl SimScene {
    fn with_source(source: EchoSource) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SceneState {
                source,
                pulse_range_us: (500, 2500),
                servo_pulse_us: None,
                trigger_high: false,
                trigger_fall_us: None,
                current: EchoResponse::Silent,
                pings: 0,
            })),
        }
    }

    /// 脚本模式：队列耗尽后一律返回 [`EchoResponse::Silent`]
    pub fn scripted() -> Self {
        Self::with_source(EchoSource::Scripted {
            queue: VecDeque::new(),
            fallback: EchoResponse::Silent,
        })
    }

    /// 剖面模式
    pub fn with_profile(
        profile: DistanceProfile,
        speed_cm_per_us: f64,
        reading_offset_cm: f64,
    ) -> Self {
        Self::with_source(EchoSource::Profile {
            profile,
            speed_cm_per_us,
            reading_offset_cm,
            noise_cm: 0.0,
            rng: StdRng::seed_from_u64(0x5EED),
        })
    }

    /// 剖面模式下叠加均匀噪声（±`noise_cm`）
    pub fn set_noise(&self, noise_cm: f64) {
        if let EchoSource::Profile { noise_cm: n, .. } = &mut self.inner.lock().source {
            *n = noise_cm.abs();
        }
    }

    /// 追加脚本响应（仅脚本模式有效）
    pub fn push(&self, response: EchoResponse) {
        if let EchoSource::Scripted { queue, .. } = &mut self.inner.lock().source {
            queue.push_back(response);
        }
    }

    /// 连续追加 `n` 个相同响应
    pub fn push_repeated(&self, response: EchoResponse, n: usize) {
        for _ in 0..n {
            self.push(response);
        }
    }

    /// 脚本耗尽后的默认响应
    pub fn set_fallback(&self, response: EchoResponse) {
        if let EchoSource::Scripted { fallback, .. } = &mut self.inner.lock().source {
            *fallback = response;
        }
    }

    /// 舵机脉宽量程（用于剖面模式的角度换算）
    pub fn set_pulse_range(&self, min_us: u32, max_us: u32) {
        self.inner.lock().pulse_range_us = (min_us, max_us);
    }

    /// 已完成的触发次数
    pub fn ping_count(&self) -> u64 {
        self.inner.lock().pings
    }

    fn trigger(&self, high: bool, now_us: u64) {
        let mut state = self.inner.lock();
        if state.trigger_high && !high {
            state.trigger_fall_us = Some(now_us);
            state.current = state.next_response();
            state.pings += 1;
            trace!("sim: trigger released at {}us -> {:?}", now_us, state.current);
        }
        state.trigger_high = high;
    }

    fn echo_level(&self, now_us: u64) -> bool {
        let state = self.inner.lock();
        match state.trigger_fall_us {
            Some(fall) => state.current.level_at(now_us.saturating_sub(fall)),
            None => false,
        }
    }

    fn set_servo(&self, pulse_us: Option<u32>) {
        self.inner.lock().servo_pulse_us = pulse_us;
    }
}

struct SimTrigger {
    scene: SimScene,
    clock: Arc<dyn Clock>,
}

impl TriggerOutput for SimTrigger {
    fn set_high(&mut self) {
        self.scene.trigger(true, self.clock.now_us());
    }

    fn set_low(&mut self) {
        self.scene.trigger(false, self.clock.now_us());
    }
}

struct SimEcho {
    scene: SimScene,
    clock: Arc<dyn Clock>,
    /// 虚拟时钟下每次采样推进的时间
    virtual_clock: Option<(Arc<SimClock>, Duration)>,
}

impl EchoInput for SimEcho {
    fn is_high(&mut self) -> bool {
        if let Some((clock, cost)) = &self.virtual_clock {
            clock.advance(*cost);
        }
        self.scene.echo_level(self.clock.now_us())
    }
}

/// 舵机指令记录（`None` 表示释放）
#[derive(Clone, Default)]
pub struct ServoLog {
    inner: Arc<Mutex<Vec<Option<u32>>>>,
}

impl ServoLog {
    pub fn commands(&self) -> Vec<Option<u32>> {
        self.inner.lock().clone()
    }

    pub fn last(&self) -> Option<Option<u32>> {
        self.inner.lock().last().copied()
    }
}

struct SimServo {
    scene: SimScene,
    log: ServoLog,
}

impl ServoOutput for SimServo {
    fn set_pulse_width(&mut self, pulse_us: u32) -> Result<(), HalError> {
        self.scene.set_servo(Some(pulse_us));
        self.log.inner.lock().push(Some(pulse_us));
        Ok(())
    }

    fn release(&mut self) -> Result<(), HalError> {
        self.scene.set_servo(None);
        self.log.inner.lock().push(None);
        Ok(())
    }
}

/// 指示灯状态记录（`Some(true)` 运行，`Some(false)` 停止，`None` 熄灭）
#[derive(Clone, Default)]
pub struct IndicatorLog {
    inner: Arc<Mutex<Vec<Option<bool>>>>,
}

impl IndicatorLog {
    pub fn states(&self) -> Vec<Option<bool>> {
        self.inner.lock().clone()
    }

    pub fn last(&self) -> Option<Option<bool>> {
        self.inner.lock().last().copied()
    }
}

struct SimIndicator {
    log: IndicatorLog,
}

impl StatusIndicator for SimIndicator {
    fn show(&mut self, running: bool) {
        self.log.inner.lock().push(Some(running));
    }

    fn off(&mut self) {
        self.log.inner.lock().push(None);
    }
}

/// 模拟按键（按下时在调用线程中执行已注册的回调）
#[derive(Clone, Default)]
pub struct SimButton {
    callback: Arc<Mutex<Option<EdgeCallback>>>,
}

impl SimButton {
    /// 产生一次下降沿
    ///
    /// 返回是否有回调被执行。
    pub fn press(&self) -> bool {
        match self.callback.lock().as_mut() {
            Some(cb) => {
                cb();
                true
            },
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.callback.lock().is_some()
    }
}

impl EdgeSource for SimButton {
    fn on_falling_edge(&mut self, callback: EdgeCallback) -> Result<(), HalError> {
        *self.callback.lock() = Some(callback);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), HalError> {
        *self.callback.lock() = None;
        Ok(())
    }
}

/// 模拟板构建器
///
/// # Example
///
/// ```
/// use sonar_hal::sim::{EchoResponse, SimBoard, SimScene};
///
/// let sim = SimBoard::virtual_time(SimScene::scripted());
/// sim.scene().push(EchoResponse::Pulse { rise_after_us: 200, width_us: 400 });
/// let board = sim.board();
/// assert!(board.button.is_some());
/// ```
pub struct SimBoard {
    scene: SimScene,
    clock: Arc<dyn Clock>,
    virtual_clock: Option<Arc<SimClock>>,
    poll_cost: Duration,
    servo_log: ServoLog,
    indicator_log: IndicatorLog,
    button: SimButton,
}

impl SimBoard {
    /// 虚拟时间模拟板（测试用）
    pub fn virtual_time(scene: SimScene) -> Self {
        let clock = Arc::new(SimClock::new());
        Self {
            scene,
            clock: clock.clone(),
            virtual_clock: Some(clock),
            poll_cost: Duration::from_micros(1),
            servo_log: ServoLog::default(),
            indicator_log: IndicatorLog::default(),
            button: SimButton::default(),
        }
    }

    /// 真实时间模拟板（无硬件运行守护进程）
    pub fn realtime(scene: SimScene, clock: Arc<dyn Clock>) -> Self {
        Self {
            scene,
            clock,
            virtual_clock: None,
            poll_cost: Duration::ZERO,
            servo_log: ServoLog::default(),
            indicator_log: IndicatorLog::default(),
            button: SimButton::default(),
        }
    }

    pub fn scene(&self) -> SimScene {
        self.scene.clone()
    }

    pub fn sim_clock(&self) -> Option<Arc<SimClock>> {
        self.virtual_clock.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn servo_log(&self) -> ServoLog {
        self.servo_log.clone()
    }

    pub fn indicator_log(&self) -> IndicatorLog {
        self.indicator_log.clone()
    }

    pub fn button(&self) -> SimButton {
        self.button.clone()
    }

    /// 生成一组引脚（可重复调用，每次共享同一场景与记录）
    pub fn board(&self) -> Board {
        Board {
            trigger: Box::new(SimTrigger {
                scene: self.scene.clone(),
                clock: self.clock.clone(),
            }),
            echo: Box::new(SimEcho {
                scene: self.scene.clone(),
                clock: self.clock.clone(),
                virtual_clock: self.virtual_clock.clone().map(|c| (c, self.poll_cost)),
            }),
            servo: Box::new(SimServo {
                scene: self.scene.clone(),
                log: self.servo_log.clone(),
            }),
            indicator: Box::new(SimIndicator {
                log: self.indicator_log.clone(),
            }),
            button: Some(Box::new(self.button.clone())),
            clock: self.clock.clone(),
        }
    }
}

/// 演示用房间剖面：三面墙与一段开口（开口方向无回波）
pub fn demo_room() -> DistanceProfile {
    Arc::new(|angle: f64| {
        if (80.0..=100.0).contains(&angle) {
            None
        } else if angle < 45.0 {
            Some(60.0 / (angle.to_radians().cos()).max(0.2))
        } else if angle > 135.0 {
            Some(60.0 / ((180.0 - angle).to_radians().cos()).max(0.2))
        } else {
            Some(150.0 + (angle - 90.0).abs())
        }
    })
}
