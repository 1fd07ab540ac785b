//! 采集指标
//!
//! 原子计数器，可在任何线程读取，不引入锁竞争。

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// 采集链路实时指标
///
/// # 使用示例
///
/// ```rust
/// use sonar_driver::SonarMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = SonarMetrics::new();
/// metrics.pings.fetch_add(7, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().pings, 7);
/// ```
#[derive(Debug, Default)]
pub struct SonarMetrics {
    /// 已完成的扫描步数
    pub cycles: AtomicU64,
    /// 已发出的 ping 总数
    pub pings: AtomicU64,
    /// 回波上升沿超时次数
    pub echo_high_timeouts: AtomicU64,
    /// 回波下降沿超时次数
    pub echo_low_timeouts: AtomicU64,
    /// 被拒绝的无故障读数（负距离或超量程）
    pub rejected_samples: AtomicU64,
    /// 整批无有效采样的次数
    pub no_valid_samples: AtomicU64,
    /// 测量耗时超过单步时间预算的次数
    pub budget_overruns: AtomicU64,
    /// 舵机写入失败次数
    pub servo_errors: AtomicU64,
    /// 已生效的按键切换次数
    pub button_toggles: AtomicU64,
    /// 远程命令次数（含幂等的空操作）
    pub remote_commands: AtomicU64,
}

impl SonarMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取指标快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            pings: self.pings.load(Ordering::Relaxed),
            echo_high_timeouts: self.echo_high_timeouts.load(Ordering::Relaxed),
            echo_low_timeouts: self.echo_low_timeouts.load(Ordering::Relaxed),
            rejected_samples: self.rejected_samples.load(Ordering::Relaxed),
            no_valid_samples: self.no_valid_samples.load(Ordering::Relaxed),
            budget_overruns: self.budget_overruns.load(Ordering::Relaxed),
            servo_errors: self.servo_errors.load(Ordering::Relaxed),
            button_toggles: self.button_toggles.load(Ordering::Relaxed),
            remote_commands: self.remote_commands.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.cycles.store(0, Ordering::Relaxed);
        self.pings.store(0, Ordering::Relaxed);
        self.echo_high_timeouts.store(0, Ordering::Relaxed);
        self.echo_low_timeouts.store(0, Ordering::Relaxed);
        self.rejected_samples.store(0, Ordering::Relaxed);
        self.no_valid_samples.store(0, Ordering::Relaxed);
        self.budget_overruns.store(0, Ordering::Relaxed);
        self.servo_errors.store(0, Ordering::Relaxed);
        self.button_toggles.store(0, Ordering::Relaxed);
        self.remote_commands.store(0, Ordering::Relaxed);
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub cycles: u64,
    pub pings: u64,
    pub echo_high_timeouts: u64,
    pub echo_low_timeouts: u64,
    pub rejected_samples: u64,
    pub no_valid_samples: u64,
    pub budget_overruns: u64,
    pub servo_errors: u64,
    pub button_toggles: u64,
    pub remote_commands: u64,
}

impl MetricsSnapshot {
    /// ping 故障率（百分比），没有 ping 时返回 0
    pub fn fault_rate(&self) -> f64 {
        if self.pings == 0 {
            return 0.0;
        }
        ((self.echo_high_timeouts + self.echo_low_timeouts) as f64 / self.pings as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_reset() {
        let m = SonarMetrics::new();
        m.pings.fetch_add(10, Ordering::Relaxed);
        m.echo_high_timeouts.fetch_add(2, Ordering::Relaxed);
        m.echo_low_timeouts.fetch_add(3, Ordering::Relaxed);

        let s = m.snapshot();
        assert_eq!(s.pings, 10);
        assert_eq!(s.fault_rate(), 50.0);

        m.reset();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_fault_rate_without_pings() {
        assert_eq!(MetricsSnapshot::default().fault_rate(), 0.0);
    }
}
