//! 采集循环
//!
//! 运行在专用线程中，独占舵机、触发/回波线与指示灯。
//!
//! ```text
//! ┌─ apply_pending_events ─┐
//! │                        ▼
//! │   Stopped: 红灯，每 stopped_poll_ms 轮询一次
//! │   Running: advance → 舵机 → aggregate → 写遥测 → 补齐到 iteration_budget_ms
//! └────────────────────────┘
//! ```
//!
//! 所有等待都有上界，并以不超过 10ms 的切片检查运行标志，退出请求能被及时观察到。

use crate::aggregator::{BatchSummary, SampleAggregator};
use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::ranger::Ranger;
use crate::run_state::RunState;
use crate::state::SonarContext;
use crate::sweep::{SweepPosition, SweepScheduler};
use sonar_hal::{Board, Clock, EdgeSource, ServoOutput, StatusIndicator};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// 可中断等待的最大切片
pub const PACE_SLICE: Duration = Duration::from_millis(10);

/// 一次 `step()` 的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// 处于停止状态，未扫描
    Idle,
    /// 完成一个扫描步并发布了新距离
    Measured {
        position: SweepPosition,
        summary: BatchSummary,
    },
    /// 完成一个扫描步，但整批无有效采样
    NoValidSamples { position: SweepPosition },
}

/// 采集流水线
pub struct Acquisition {
    ranger: Ranger,
    aggregator: SampleAggregator,
    sweep: SweepScheduler,
    servo: Box<dyn ServoOutput>,
    indicator: Box<dyn StatusIndicator>,
    button: Option<Box<dyn EdgeSource>>,
    clock: Arc<dyn Clock>,
    ctx: Arc<SonarContext>,
    iteration_budget: Duration,
    stopped_poll: Duration,
    neutral_pulse_us: u32,
    neutral_hold: Duration,
    /// 指示灯当前显示的状态
    shown: Option<RunState>,
}

impl Acquisition {
    /// 接管一块扫描板
    ///
    /// 如果板上有按键，这里注册其下降沿回调（去抖 + 投递事件）。
    pub fn new(
        board: Board,
        ctx: Arc<SonarContext>,
        config: &DriverConfig,
    ) -> Result<Self, DriverError> {
        let sweep = SweepScheduler::new(&config.sweep)?;

        let Board {
            trigger,
            echo,
            servo,
            indicator,
            mut button,
            clock,
        } = board;

        let ranger = Ranger::new(trigger, echo, clock.clone(), config.ranger.clone());
        let aggregator =
            SampleAggregator::new(config.sampling.clone(), clock.clone(), ctx.metrics.clone());

        if let Some(edge) = button.as_mut() {
            let mut events = ctx
                .run_state
                .button_events(clock.clone(), Duration::from_millis(config.button.debounce_ms));
            edge.on_falling_edge(Box::new(move || {
                events.notify();
            }))?;
            debug!(
                "Button callback registered (debounce {}ms)",
                config.button.debounce_ms
            );
        }

        Ok(Self {
            ranger,
            aggregator,
            sweep,
            servo,
            indicator,
            button,
            clock,
            ctx,
            iteration_budget: Duration::from_millis(config.cycle.iteration_budget_ms),
            stopped_poll: Duration::from_millis(config.cycle.stopped_poll_ms),
            neutral_pulse_us: config.shutdown.neutral_pulse_us,
            neutral_hold: Duration::from_millis(config.shutdown.hold_ms),
            shown: None,
        })
    }

    pub fn context(&self) -> &Arc<SonarContext> {
        &self.ctx
    }

    /// 执行一次循环迭代
    ///
    /// `is_running` 为 `false` 时中断等待（已开始的采样批次会完成）。
    pub fn step(&mut self, is_running: &AtomicBool) -> CycleOutcome {
        let toggles = self.ctx.run_state.apply_pending_events();
        if toggles > 0 {
            self.ctx
                .metrics
                .button_toggles
                .fetch_add(toggles as u64, Ordering::Relaxed);
        }

        let state = self.ctx.run_state.current();
        self.sync_indicator(state);

        if !state.is_running() {
            let deadline = self.clock.now_us() + self.stopped_poll.as_micros() as u64;
            pace_until(self.clock.as_ref(), deadline, is_running);
            return CycleOutcome::Idle;
        }

        let started_at = self.clock.now_us();
        let position = self.sweep.advance();
        self.drive_servo(position.command_value);

        let outcome = match self.aggregator.aggregate(&mut self.ranger) {
            Ok(summary) => {
                self.ctx.telemetry.record_success(
                    position.angle_degrees,
                    summary.distance_cm,
                    state,
                    self.clock.now_us(),
                );
                debug!(
                    "{:>5.1}° -> {:.1}cm ({}/{} samples)",
                    position.angle_degrees, summary.distance_cm, summary.included, summary.total
                );
                CycleOutcome::Measured { position, summary }
            },
            Err(e) => {
                let snapshot = self.ctx.telemetry.record_failure(state);
                warn!(
                    "{} at {:.1}° ({} consecutive)",
                    e, position.angle_degrees, snapshot.consecutive_failures
                );
                CycleOutcome::NoValidSamples { position }
            },
        };
        self.ctx.metrics.cycles.fetch_add(1, Ordering::Relaxed);

        let deadline = started_at + self.iteration_budget.as_micros() as u64;
        let now = self.clock.now_us();
        if now > deadline {
            self.ctx
                .metrics
                .budget_overruns
                .fetch_add(1, Ordering::Relaxed);
            warn!(
                "Sweep step overran budget: {}us > {:?}",
                now - started_at,
                self.iteration_budget
            );
        } else {
            pace_until(self.clock.as_ref(), deadline, is_running);
        }

        outcome
    }

    /// 退出流程：舵机归中、保持、断开，熄灯，注销按键回调
    pub fn shutdown(&mut self) {
        info!(
            "Parking servo at {}us for {:?}",
            self.neutral_pulse_us, self.neutral_hold
        );
        self.drive_servo(self.neutral_pulse_us as i32);
        self.clock.sleep(self.neutral_hold);
        if let Err(e) = self.servo.release() {
            warn!("Failed to release servo: {}", e);
        }
        self.indicator.off();
        if let Some(edge) = self.button.as_mut()
            && let Err(e) = edge.clear()
        {
            warn!("Failed to unregister button callback: {}", e);
        }
    }

    fn drive_servo(&mut self, command_value: i32) {
        let pulse = command_value.max(0) as u32;
        if let Err(e) = self.servo.set_pulse_width(pulse) {
            self.ctx.metrics.servo_errors.fetch_add(1, Ordering::Relaxed);
            warn!("Servo write {}us failed: {}", pulse, e);
        }
    }

    fn sync_indicator(&mut self, state: RunState) {
        if self.shown == Some(state) {
            return;
        }
        self.indicator.show(state.is_running());
        if self.ctx.telemetry.read().run_state != state {
            self.ctx.telemetry.record_run_state(state);
        }
        if self.shown.is_some() {
            info!("Acquisition {}", state);
        }
        self.shown = Some(state);
    }
}

impl std::fmt::Debug for Acquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquisition")
            .field("sweep", &self.sweep)
            .field("shown", &self.shown)
            .finish_non_exhaustive()
    }
}

/// 等待到 `deadline_us`，每片最多 [`PACE_SLICE`]
///
/// 返回 `false` 表示因运行标志清除而提前返回。
pub fn pace_until(clock: &dyn Clock, deadline_us: u64, is_running: &AtomicBool) -> bool {
    let slice_us = PACE_SLICE.as_micros() as u64;
    loop {
        if !is_running.load(Ordering::Acquire) {
            return false;
        }
        let now = clock.now_us();
        if now >= deadline_us {
            return true;
        }
        clock.sleep(Duration::from_micros((deadline_us - now).min(slice_us)));
    }
}

/// 采集线程存活标记（退出或 panic 时清除）
struct AliveGuard<'a>(&'a AtomicBool);

impl Drop for AliveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 采集线程主循环
///
/// 运行直到 `is_running` 被清除，然后执行退出流程。
pub fn acquisition_loop(mut acquisition: Acquisition, is_running: Arc<AtomicBool>) {
    let ctx = acquisition.ctx.clone();
    ctx.acquisition_alive.store(true, Ordering::Release);
    let _alive = AliveGuard(&ctx.acquisition_alive);

    info!("Acquisition loop started ({})", ctx.run_state.current());
    while is_running.load(Ordering::Acquire) {
        let outcome = acquisition.step(&is_running);
        trace!("cycle: {:?}", outcome);
    }

    acquisition.shutdown();
    info!("Acquisition loop exited");
}
