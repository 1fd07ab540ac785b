//! Sonar 驱动句柄
//!
//! 持有采集线程与共享上下文；drop 时通知线程退出并等待其完成停机流程。

use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::metrics::MetricsSnapshot;
use crate::pipeline::{Acquisition, acquisition_loop};
use crate::run_state::RunState;
use crate::state::{SonarContext, TelemetrySnapshot};
use sonar_hal::Board;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info};

/// Extension trait for timeout-capable thread joins
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::other(
                "Watchdog thread disconnected",
            ))),
        }
    }
}

/// Sonar 驱动
///
/// # 示例
///
/// ```rust
/// use sonar_driver::{DriverConfig, RunState, Sonar};
/// use sonar_hal::sim::{SimBoard, SimScene};
///
/// let sim = SimBoard::virtual_time(SimScene::scripted());
/// let sonar = Sonar::start(sim.board(), DriverConfig::default()).unwrap();
///
/// sonar.set_run_state(RunState::Stopped);
/// assert_eq!(sonar.run_state(), RunState::Stopped);
/// sonar.shutdown().unwrap();
/// ```
pub struct Sonar {
    ctx: Arc<SonarContext>,
    is_running: Arc<AtomicBool>,
    acquisition_thread: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl Sonar {
    /// 校验配置、接管扫描板并启动采集线程
    ///
    /// 配置或硬件错误时不会启动线程。
    pub fn start(board: Board, config: DriverConfig) -> Result<Self, DriverError> {
        config.validate()?;

        let initial = RunState::from_bool(config.cycle.start_running);
        let ctx = Arc::new(SonarContext::new(initial, config.button.event_capacity));
        let acquisition = Acquisition::new(board, ctx.clone(), &config)?;

        let is_running = Arc::new(AtomicBool::new(true));
        let is_running_clone = is_running.clone();
        // 返回句柄前即视为存活，线程退出时由 AliveGuard 清除
        ctx.acquisition_alive.store(true, Ordering::Release);
        let handle = thread::Builder::new()
            .name("sonar-acquisition".into())
            .spawn(move || acquisition_loop(acquisition, is_running_clone))
            .map_err(|e| {
                ctx.acquisition_alive.store(false, Ordering::Release);
                DriverError::AcquisitionThread(format!("failed to spawn: {}", e))
            })?;

        info!(
            "Sonar started: sweep {}..{}us step {}us, batch {}, budget {}ms",
            config.sweep.min_pulse_us,
            config.sweep.max_pulse_us,
            config.sweep.step_us,
            config.sampling.batch_size,
            config.cycle.iteration_budget_ms
        );

        Ok(Self {
            ctx,
            is_running,
            acquisition_thread: Some(handle),
            join_timeout: Duration::from_millis(config.shutdown.join_timeout_ms),
        })
    }

    /// 共享上下文（供 API 层使用）
    pub fn context(&self) -> Arc<SonarContext> {
        self.ctx.clone()
    }

    /// 采集线程是否仍在运行
    pub fn is_healthy(&self) -> bool {
        self.ctx.is_acquisition_alive()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.ctx.telemetry.read()
    }

    pub fn run_state(&self) -> RunState {
        self.ctx.run_state.current()
    }

    /// 设置运行状态，返回之前的状态
    pub fn set_run_state(&self, state: RunState) -> RunState {
        self.ctx.run_state.set(state)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    /// 停止采集线程并等待停机流程完成
    pub fn shutdown(mut self) -> Result<(), DriverError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        self.is_running.store(false, Ordering::Release);

        let Some(handle) = self.acquisition_thread.take() else {
            return Ok(());
        };
        handle.join_timeout(self.join_timeout).map_err(|_| {
            DriverError::AcquisitionThread(format!(
                "panicked or failed to shut down within {:?}",
                self.join_timeout
            ))
        })?;
        info!("Sonar stopped");
        Ok(())
    }
}

impl Drop for Sonar {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("{}", e);
        }
    }
}

impl std::fmt::Debug for Sonar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sonar")
            .field("run_state", &self.run_state())
            .field("healthy", &self.is_healthy())
            .finish_non_exhaustive()
    }
}
