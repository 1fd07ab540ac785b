//! sonard：扫描式超声波测距守护进程
//!
//! 采集线程持续扫描测距，HTTP 接口提供最新快照与启停控制。
//!
//! 退出码：
//! - 0：正常退出
//! - 2：配置错误
//! - 3：硬件初始化失败
//! - 4：HTTP 监听/服务失败
//! - 5：采集线程异常（panic 或未能在超时内停止）

mod backend;
mod config;

use anyhow::{Context, anyhow};
use backend::Backend;
use clap::Parser;
use config::DaemonConfig;
use sonar_api::{ClientGeometry, ControlApi};
use sonar_driver::{DriverError, Sonar};
use sonar_hal::SystemClock;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// 主线程检查服务/采集线程状态的间隔
const SUPERVISE_INTERVAL: Duration = Duration::from_millis(500);

/// 扫描式超声波测距守护进程
#[derive(Parser, Debug)]
#[command(name = "sonard")]
#[command(about = "Sweeping ultrasonic ranger daemon with an HTTP control API", long_about = None)]
struct Args {
    /// 配置文件（TOML）
    ///
    /// 默认: 使用内置默认值
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 硬件后端
    #[arg(long, value_enum, default_value = "rpi")]
    backend: Backend,

    /// HTTP 监听地址，覆盖配置文件中的 server.bind
    ///
    /// 格式: IP:PORT (例如: 127.0.0.1:5000)
    #[arg(long)]
    bind: Option<String>,

    /// 日志过滤（覆盖 RUST_LOG），例如 `debug` 或 `sonar_driver=trace`
    #[arg(long)]
    log_level: Option<String>,
}

/// 带退出码的失败
#[derive(Debug)]
struct Failure {
    code: u8,
    error: anyhow::Error,
}

impl Failure {
    const CONFIG: u8 = 2;
    const HARDWARE: u8 = 3;
    const SERVE: u8 = 4;
    const ACQUISITION: u8 = 5;

    fn with(code: u8) -> impl FnOnce(anyhow::Error) -> Self {
        move |error| Self { code, error }
    }
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();
}

fn load_config(args: &Args) -> anyhow::Result<(DaemonConfig, SocketAddr)> {
    let mut config = match &args.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    let addr = config.validate()?;
    Ok((config, addr))
}

/// `Sonar::start` 的错误分类
fn start_failure(e: DriverError) -> Failure {
    let code = match &e {
        DriverError::Hal(_) => Failure::HARDWARE,
        DriverError::InvalidConfig(_) => Failure::CONFIG,
        _ => Failure::ACQUISITION,
    };
    Failure {
        code,
        error: anyhow::Error::new(e).context("Failed to start acquisition"),
    }
}

/// 安装 SIGINT/SIGTERM 处理器，信号转为通道消息
fn install_signal_handler() -> crossbeam_channel::Receiver<()> {
    let (signal_tx, signal_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = signal_tx.try_send(());
    })
    .expect("Failed to set signal handler");
    signal_rx
}

fn run(args: Args) -> Result<(), Failure> {
    let (config, addr) = load_config(&args).map_err(Failure::with(Failure::CONFIG))?;
    if !addr.ip().is_loopback() {
        warn!(
            "Control API on {} is reachable from the network and unauthenticated",
            addr
        );
    }
    let angle_unit = config
        .angle_unit_deg()
        .map_err(|e| Failure::with(Failure::CONFIG)(e.into()))?;

    // 先于接管硬件安装，启动期间的中断信号会留在通道里由监督循环处理
    let signal_rx = install_signal_handler();

    let clock = Arc::new(SystemClock::new());
    let board = backend::open(args.backend, &config, clock)
        .with_context(|| format!("Failed to open {:?} backend", args.backend))
        .map_err(Failure::with(Failure::HARDWARE))?;

    let sonar = Sonar::start(board, config.driver.clone()).map_err(start_failure)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("sonar-http")
        .build()
        .context("Failed to build async runtime")
        .map_err(Failure::with(Failure::SERVE))?;

    let listener = runtime
        .block_on(tokio::net::TcpListener::bind(addr))
        .with_context(|| format!("Failed to bind {}", addr))
        .map_err(Failure::with(Failure::SERVE))?;

    let api = Arc::new(ControlApi::new(
        sonar.context(),
        ClientGeometry::new(angle_unit, config.driver.sampling.max_range_cm),
    ));
    let server = runtime.spawn(sonar_api::serve(listener, api, std::future::pending()));

    info!("sonard running. Press Ctrl+C to stop.");
    let outcome = loop {
        if signal_rx.recv_timeout(SUPERVISE_INTERVAL).is_ok() {
            info!("Received interrupt signal. Shutting down...");
            break Ok(());
        }
        if server.is_finished() {
            let error = match runtime.block_on(server) {
                Ok(Ok(())) => anyhow!("HTTP server exited unexpectedly"),
                Ok(Err(e)) => anyhow::Error::new(e).context("HTTP server failed"),
                Err(e) => anyhow::Error::new(e).context("HTTP server task failed"),
            };
            break Err(Failure::with(Failure::SERVE)(error));
        }
        if !sonar.is_healthy() {
            break Err(Failure::with(Failure::ACQUISITION)(anyhow!(
                "Acquisition thread exited unexpectedly"
            )));
        }
    };

    let stopped = sonar
        .shutdown()
        .context("Acquisition shutdown failed")
        .map_err(Failure::with(Failure::ACQUISITION));
    runtime.shutdown_background();

    outcome.and(stopped)
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    match run(args) {
        Ok(()) => {
            info!("sonard stopped");
            ExitCode::SUCCESS
        },
        Err(failure) => {
            error!("{:#}", failure.error);
            ExitCode::from(failure.code)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonar_hal::{HalError, HalErrorKind};

    #[test]
    fn test_start_failure_exit_codes() {
        let hal = DriverError::Hal(HalError::new(HalErrorKind::Pin, "GPIO 23 busy"));
        assert_eq!(start_failure(hal).code, Failure::HARDWARE);
        assert_eq!(
            start_failure(DriverError::InvalidConfig("x".into())).code,
            Failure::CONFIG
        );
        assert_eq!(
            start_failure(DriverError::AcquisitionThread("spawn".into())).code,
            Failure::ACQUISITION
        );
    }

    #[test]
    fn test_args_and_bind_override() {
        let args = Args::parse_from(["sonard", "--backend", "sim", "--bind", "127.0.0.1:0"]);
        assert_eq!(args.backend, Backend::Sim);
        let (config, addr) = load_config(&args).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:0");
        assert!(addr.ip().is_loopback());
    }

    #[cfg(not(all(target_os = "linux", feature = "rpi")))]
    #[test]
    fn test_signal_handler_installed_before_hardware() {
        let args = Args::parse_from(["sonard", "--backend", "rpi", "--bind", "127.0.0.1:0"]);
        let failure = run(args).unwrap_err();
        assert_eq!(failure.code, Failure::HARDWARE);
        // 硬件打开失败时处理器已经装好
        assert!(matches!(
            ctrlc::set_handler(|| {}),
            Err(ctrlc::Error::MultipleHandlers)
        ));
    }

    #[test]
    fn test_bad_bind_is_config_error() {
        let args = Args::parse_from(["sonard", "--bind", "nowhere"]);
        assert!(load_config(&args).is_err());
    }
}
