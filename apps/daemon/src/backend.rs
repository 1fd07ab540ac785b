//! 硬件后端选择

use crate::config::DaemonConfig;
use clap::ValueEnum;
use sonar_hal::sim::{SimBoard, SimScene, demo_room};
use sonar_hal::{Board, Clock, HalError};
use std::sync::Arc;
use tracing::info;

/// 硬件后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// 树莓派 GPIO（需要 `rpi` feature）
    Rpi,
    /// 模拟板（演示房间剖面，真实时间）
    Sim,
}

/// 打开扫描板
pub fn open(
    backend: Backend,
    config: &DaemonConfig,
    clock: Arc<dyn Clock>,
) -> Result<Board, HalError> {
    match backend {
        Backend::Sim => Ok(open_sim(config, clock)),
        Backend::Rpi => open_rpi(config, clock),
    }
}

fn open_sim(config: &DaemonConfig, clock: Arc<dyn Clock>) -> Board {
    let ranger = &config.driver.ranger;
    let scene = SimScene::with_profile(
        demo_room(),
        ranger.speed_of_sound_cm_per_us,
        ranger.offset_cm,
    );
    scene.set_noise(1.5);
    let sweep = &config.driver.sweep;
    scene.set_pulse_range(sweep.min_pulse_us.max(0) as u32, sweep.max_pulse_us.max(0) as u32);

    info!("Using simulated board (demo room)");
    SimBoard::realtime(scene, clock).board()
}

#[cfg(all(target_os = "linux", feature = "rpi"))]
fn open_rpi(config: &DaemonConfig, clock: Arc<dyn Clock>) -> Result<Board, HalError> {
    use sonar_hal::rpi::{RpiPins, open_board};

    let p = &config.pins;
    let pins = RpiPins {
        servo: p.servo,
        trigger: p.trigger,
        echo: p.echo,
        green_led: p.green_led,
        red_led: p.red_led,
        button: p.button,
    };
    open_board(&pins, clock)
}

#[cfg(not(all(target_os = "linux", feature = "rpi")))]
fn open_rpi(_config: &DaemonConfig, _clock: Arc<dyn Clock>) -> Result<Board, HalError> {
    Err(HalError::new(
        sonar_hal::HalErrorKind::Unavailable,
        "built without the `rpi` feature (try --backend sim)",
    ))
}
