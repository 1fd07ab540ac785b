//! 共享状态
//!
//! 采集线程是唯一写者，HTTP 处理器是任意数量的读者。
//! 遥测数据作为一个整体快照通过 `ArcSwap` 原子替换，读者永远不会看到角度与距离来自不同批次。

use crate::metrics::SonarMetrics;
use crate::run_state::{RunState, RunStateMachine};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// 遥测快照
///
/// 更新时机：每个扫描步完成一批采样之后，以及运行状态变化时。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    /// 版本号，每次写入加一
    pub seq: u64,
    /// 角度（度，0..=180）
    pub angle_degrees: f64,
    /// 最近一次成功批次的中位数距离（厘米）
    pub distance_cm: f64,
    /// 写入时的运行状态
    pub run_state: RunState,
    /// 最近一批没有有效采样时为 `true`，此时角度/距离仍是上一次成功批次的值
    pub stale: bool,
    /// 连续失败批次数
    pub consecutive_failures: u32,
    /// 角度/距离被采集的时刻（单调时钟，微秒）
    pub captured_at_us: u64,
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self {
            seq: 0,
            angle_degrees: 90.0,
            distance_cm: 0.0,
            run_state: RunState::Running,
            stale: true,
            consecutive_failures: 0,
            captured_at_us: 0,
        }
    }
}

/// 遥测存储
#[derive(Debug)]
pub struct TelemetryStore {
    inner: ArcSwap<TelemetrySnapshot>,
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new(TelemetrySnapshot::default())
    }
}

impl TelemetryStore {
    pub fn new(initial: TelemetrySnapshot) -> Self {
        Self {
            inner: ArcSwap::from_pointee(initial),
        }
    }

    /// 读取当前快照（无锁）
    pub fn read(&self) -> TelemetrySnapshot {
        **self.inner.load()
    }

    /// 写入完整快照，`seq` 由存储分配
    ///
    /// 返回实际发布的快照。
    pub fn write(&self, snapshot: TelemetrySnapshot) -> TelemetrySnapshot {
        self.update(|prev| TelemetrySnapshot {
            seq: prev.seq + 1,
            ..snapshot
        })
    }

    /// 发布一批成功采样的结果
    pub fn record_success(
        &self,
        angle_degrees: f64,
        distance_cm: f64,
        run_state: RunState,
        captured_at_us: u64,
    ) -> TelemetrySnapshot {
        self.update(|prev| TelemetrySnapshot {
            seq: prev.seq + 1,
            angle_degrees,
            distance_cm,
            run_state,
            stale: false,
            consecutive_failures: 0,
            captured_at_us,
        })
    }

    /// 记录一批失败：保留上一次的角度/距离，标记为过期
    pub fn record_failure(&self, run_state: RunState) -> TelemetrySnapshot {
        self.update(|prev| TelemetrySnapshot {
            seq: prev.seq + 1,
            run_state,
            stale: true,
            consecutive_failures: prev.consecutive_failures.saturating_add(1),
            ..*prev
        })
    }

    /// 只更新运行状态
    pub fn record_run_state(&self, run_state: RunState) -> TelemetrySnapshot {
        self.update(|prev| TelemetrySnapshot {
            seq: prev.seq + 1,
            run_state,
            ..*prev
        })
    }

    fn update(&self, f: impl Fn(&TelemetrySnapshot) -> TelemetrySnapshot) -> TelemetrySnapshot {
        let prev = self.inner.rcu(|current| Arc::new(f(current)));
        f(&prev)
    }
}

/// 驱动上下文
///
/// 采集线程与 API 层之间共享的全部可变状态。
#[derive(Debug)]
pub struct SonarContext {
    pub telemetry: TelemetryStore,
    pub run_state: RunStateMachine,
    pub metrics: Arc<SonarMetrics>,
    /// 采集线程是否存活（线程退出或 panic 时清除）
    pub acquisition_alive: AtomicBool,
}

impl SonarContext {
    pub fn new(initial: RunState, event_capacity: usize) -> Self {
        Self {
            telemetry: TelemetryStore::new(TelemetrySnapshot {
                run_state: initial,
                ..TelemetrySnapshot::default()
            }),
            run_state: RunStateMachine::new(initial, event_capacity),
            metrics: Arc::new(SonarMetrics::new()),
            acquisition_alive: AtomicBool::new(false),
        }
    }

    pub fn is_acquisition_alive(&self) -> bool {
        self.acquisition_alive.load(Ordering::Acquire)
    }
}

impl Default for SonarContext {
    fn default() -> Self {
        Self::new(RunState::Running, 16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_snapshot() {
        let store = TelemetryStore::default();
        let s = store.read();
        assert_eq!(s.seq, 0);
        assert_eq!(s.angle_degrees, 90.0);
        assert_eq!(s.distance_cm, 0.0);
        assert!(s.stale);
    }

    #[test]
    fn test_failure_keeps_last_pair_and_marks_stale() {
        let store = TelemetryStore::default();
        let ok = store.record_success(45.0, 120.5, RunState::Running, 1_000);
        assert_eq!(ok.seq, 1);
        assert!(!ok.stale);

        let f1 = store.record_failure(RunState::Running);
        let f2 = store.record_failure(RunState::Running);
        assert_eq!(f2.seq, 3);
        assert_eq!(f1.consecutive_failures, 1);
        assert_eq!(f2.consecutive_failures, 2);
        assert!(f2.stale);
        assert_eq!(f2.angle_degrees, 45.0);
        assert_eq!(f2.distance_cm, 120.5);
        assert_eq!(f2.captured_at_us, 1_000);

        let back = store.record_success(54.0, 99.0, RunState::Running, 2_000);
        assert!(!back.stale);
        assert_eq!(back.consecutive_failures, 0);
        assert_eq!(store.read(), back);
    }

    #[test]
    fn test_write_assigns_seq() {
        let store = TelemetryStore::default();
        store.record_run_state(RunState::Stopped);
        let written = store.write(TelemetrySnapshot {
            seq: 999,
            angle_degrees: 10.0,
            ..TelemetrySnapshot::default()
        });
        assert_eq!(written.seq, 2);
        assert_eq!(store.read().angle_degrees, 10.0);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let store = TelemetryStore::default();
        store.record_success(45.0, 120.5, RunState::Running, 1_000);
        let json = serde_json::to_value(store.record_failure(RunState::Stopped)).unwrap();
        assert_eq!(json["seq"], 2);
        assert_eq!(json["angle_degrees"], 45.0);
        assert_eq!(json["distance_cm"], 120.5);
        assert_eq!(json["run_state"], "stopped");
        assert_eq!(json["stale"], true);
        assert_eq!(json["consecutive_failures"], 1);
    }

    #[test]
    fn test_context_initial_state() {
        let ctx = SonarContext::new(RunState::Stopped, 4);
        assert_eq!(ctx.run_state.current(), RunState::Stopped);
        assert_eq!(ctx.telemetry.read().run_state, RunState::Stopped);
        assert!(!ctx.is_acquisition_alive());
    }
}
