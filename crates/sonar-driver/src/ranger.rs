//! 超声波测距（单次 ping）
//!
//! 时序：
//!
//! ```text
//! trigger  ──┐10µs┌──────────────────────────────
//!            └────┘
//! echo     ───────────┐   duration_us   ┌────────
//!                     └─────────────────┘
//!                 ^ 上升沿超时计时      ^ 下降沿超时计时（重新开始）
//! ```
//!
//! 两段等待都是「单调时钟截止时间 + 有界轮询」，任何情况下都不会无限阻塞。
//! Ranger 本身不重试、不掩盖故障，故障作为数据交给聚合器过滤。

use crate::config::RangerConfig;
use sonar_hal::{Clock, EchoInput, TriggerOutput};
use std::sync::Arc;
use tracing::{debug, trace};

/// 单次测量的故障类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MeasurementFault {
    /// 无故障
    #[default]
    None,
    /// 超时内未观察到回波上升沿（目标过近或传感器被遮挡）
    EchoHighTimeout,
    /// 回波线拉高后超时未回落（回波异常长/无效）
    EchoLowTimeout,
}

impl MeasurementFault {
    pub fn is_fault(self) -> bool {
        self != Self::None
    }
}

/// 单次 ping 的结果（不可变）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// 回波高电平时长（微秒），故障时为 `None`
    pub duration_us: Option<u64>,
    /// 换算距离（厘米），故障时为 0；可能为负（偏差大于实测值）
    pub distance_cm: f64,
    pub fault: MeasurementFault,
}

impl Measurement {
    /// 成功的回波
    pub fn echo(duration_us: u64, distance_cm: f64) -> Self {
        Self {
            duration_us: Some(duration_us),
            distance_cm,
            fault: MeasurementFault::None,
        }
    }

    /// 故障测量（距离固定为 0）
    pub fn faulted(fault: MeasurementFault) -> Self {
        Self {
            duration_us: None,
            distance_cm: 0.0,
            fault,
        }
    }

    pub fn is_fault(&self) -> bool {
        self.fault.is_fault()
    }

    /// 显式结果：成功返回距离，否则返回故障
    pub fn outcome(&self) -> Result<f64, MeasurementFault> {
        match self.fault {
            MeasurementFault::None => Ok(self.distance_cm),
            fault => Err(fault),
        }
    }
}

/// 测距仪
///
/// 独占触发/回波线，只能在采集线程中使用。
pub struct Ranger {
    trigger: Box<dyn TriggerOutput>,
    echo: Box<dyn EchoInput>,
    clock: Arc<dyn Clock>,
    config: RangerConfig,
}

impl Ranger {
    pub fn new(
        trigger: Box<dyn TriggerOutput>,
        echo: Box<dyn EchoInput>,
        clock: Arc<dyn Clock>,
        config: RangerConfig,
    ) -> Self {
        Self {
            trigger,
            echo,
            clock,
            config,
        }
    }

    /// 执行一次 ping
    ///
    /// 最坏耗时约为 `trigger_pulse + 2 × echo_timeout`。
    pub fn ping(&mut self) -> Measurement {
        self.trigger.set_high();
        self.clock.sleep(self.config.trigger_pulse());
        self.trigger.set_low();

        let released_at = self.clock.now_us();
        let Some(rise_at) = self.wait_for_echo(true, released_at) else {
            debug!(
                "Echo high timeout after {}us: object too close or missing",
                self.config.echo_timeout_us
            );
            return Measurement::faulted(MeasurementFault::EchoHighTimeout);
        };

        let Some(fall_at) = self.wait_for_echo(false, rise_at) else {
            debug!("Echo low timeout after {}us", self.config.echo_timeout_us);
            return Measurement::faulted(MeasurementFault::EchoLowTimeout);
        };

        let duration_us = fall_at.saturating_sub(rise_at);
        let distance_cm = self.config.distance_cm(duration_us);
        trace!("ping: {}us -> {:.2}cm", duration_us, distance_cm);
        Measurement::echo(duration_us, distance_cm)
    }

    /// 轮询回波线直到电平为 `high`，返回到达时刻；超过超时返回 `None`
    fn wait_for_echo(&mut self, high: bool, since_us: u64) -> Option<u64> {
        loop {
            if self.echo.is_high() == high {
                return Some(self.clock.now_us());
            }
            if self.clock.elapsed_us(since_us) > self.config.echo_timeout_us {
                return None;
            }
        }
    }
}

impl std::fmt::Debug for Ranger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ranger")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonar_hal::sim::{EchoResponse, SimBoard, SimScene};

    fn ranger_for(sim: &SimBoard) -> Ranger {
        let board = sim.board();
        Ranger::new(
            board.trigger,
            board.echo,
            board.clock,
            RangerConfig::default(),
        )
    }

    #[test]
    fn test_measurement_outcome() {
        assert_eq!(Measurement::echo(1000, 8.15).outcome(), Ok(8.15));
        assert_eq!(
            Measurement::faulted(MeasurementFault::EchoLowTimeout).outcome(),
            Err(MeasurementFault::EchoLowTimeout)
        );
        let m = Measurement::faulted(MeasurementFault::EchoHighTimeout);
        assert!(m.is_fault());
        assert_eq!(m.distance_cm, 0.0);
        assert_eq!(m.duration_us, None);
    }

    #[test]
    fn test_ping_measures_echo_width() {
        let sim = SimBoard::virtual_time(SimScene::scripted());
        sim.scene().push(EchoResponse::Pulse {
            rise_after_us: 200,
            width_us: 400,
        });
        let mut ranger = ranger_for(&sim);

        let m = ranger.ping();
        assert_eq!(m.fault, MeasurementFault::None);
        assert_eq!(m.duration_us, Some(400));
        // (0.0343 × 400) / 2 − 9 = −2.14：Ranger 原样上报，由聚合器拒绝
        assert!((m.distance_cm - (-2.14)).abs() < 1e-9, "{}", m.distance_cm);
    }

    #[test]
    fn test_ping_without_echo_times_out_high() {
        let sim = SimBoard::virtual_time(SimScene::scripted());
        let clock = sim.sim_clock().unwrap();
        let mut ranger = ranger_for(&sim);

        let before = clock.now_us();
        let m = ranger.ping();
        let spent = clock.now_us() - before;

        assert_eq!(m.fault, MeasurementFault::EchoHighTimeout);
        assert_eq!(m.distance_cm, 0.0);
        // 10µs 触发 + 28000µs 超时 + 一次轮询
        assert!(spent <= 10 + 28_000 + 1, "spent {}us", spent);
        assert!(spent > 28_000, "spent {}us", spent);
    }

    #[test]
    fn test_ping_stuck_echo_times_out_low() {
        let sim = SimBoard::virtual_time(SimScene::scripted());
        sim.scene()
            .push(EchoResponse::StuckHigh { rise_after_us: 300 });
        let clock = sim.sim_clock().unwrap();
        let mut ranger = ranger_for(&sim);

        let before = clock.now_us();
        let m = ranger.ping();
        let spent = clock.now_us() - before;

        assert_eq!(m.fault, MeasurementFault::EchoLowTimeout);
        assert_eq!(m.duration_us, None);
        assert!(spent <= 10 + 300 + 28_000 + 1, "spent {}us", spent);
    }

    #[test]
    fn test_consecutive_pings_are_independent() {
        let sim = SimBoard::virtual_time(SimScene::scripted());
        let scene = sim.scene();
        scene.push(EchoResponse::Silent);
        scene.push(EchoResponse::Pulse {
            rise_after_us: 150,
            width_us: 2000,
        });
        let mut ranger = ranger_for(&sim);

        assert!(ranger.ping().is_fault());
        let m = ranger.ping();
        assert_eq!(m.duration_us, Some(2000));
        assert!((m.distance_cm - (0.0343 * 2000.0 / 2.0 - 9.0)).abs() < 1e-9);
        assert_eq!(scene.ping_count(), 2);
    }
}
