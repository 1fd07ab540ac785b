//! 树莓派 GPIO 后端（rppal）
//!
//! 引脚编号均为 BCM 编号。舵机使用软件 PWM（50Hz），与任意 GPIO 兼容。

use crate::{
    Board, Clock, EchoInput, EdgeCallback, EdgeSource, HalError, HalErrorKind, ServoOutput,
    StatusIndicator, TriggerOutput,
};
use rppal::gpio::{Gpio, InputPin, OutputPin, Trigger};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 舵机 PWM 周期（50Hz）
const SERVO_PERIOD: Duration = Duration::from_millis(20);

/// 引脚分配（BCM 编号）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpiPins {
    pub servo: u8,
    pub trigger: u8,
    pub echo: u8,
    pub green_led: u8,
    pub red_led: u8,
    /// 按键（上拉输入，按下为低电平）
    pub button: Option<u8>,
}

struct RpiTrigger(OutputPin);

impl TriggerOutput for RpiTrigger {
    fn set_high(&mut self) {
        self.0.set_high();
    }

    fn set_low(&mut self) {
        self.0.set_low();
    }
}

struct RpiEcho(InputPin);

impl EchoInput for RpiEcho {
    fn is_high(&mut self) -> bool {
        self.0.is_high()
    }
}

struct RpiServo(OutputPin);

impl ServoOutput for RpiServo {
    fn set_pulse_width(&mut self, pulse_us: u32) -> Result<(), HalError> {
        self.0
            .set_pwm(SERVO_PERIOD, Duration::from_micros(pulse_us as u64))
            .map_err(|e| HalError::new(HalErrorKind::Pwm, e.to_string()))
    }

    fn release(&mut self) -> Result<(), HalError> {
        self.0
            .clear_pwm()
            .map_err(|e| HalError::new(HalErrorKind::Pwm, e.to_string()))?;
        self.0.set_low();
        Ok(())
    }
}

struct RpiIndicator {
    green: OutputPin,
    red: OutputPin,
}

impl StatusIndicator for RpiIndicator {
    fn show(&mut self, running: bool) {
        if running {
            self.red.set_low();
            self.green.set_high();
        } else {
            self.green.set_low();
            self.red.set_high();
        }
    }

    fn off(&mut self) {
        self.green.set_low();
        self.red.set_low();
    }
}

struct RpiButton(InputPin);

impl EdgeSource for RpiButton {
    fn on_falling_edge(&mut self, mut callback: EdgeCallback) -> Result<(), HalError> {
        // 去抖在驱动层完成，这里不使用 rppal 的 debounce
        self.0
            .set_async_interrupt(Trigger::FallingEdge, None, move |_event| callback())
            .map_err(HalError::from)
    }

    fn clear(&mut self) -> Result<(), HalError> {
        self.0.clear_async_interrupt().map_err(HalError::from)
    }
}

/// 打开树莓派 GPIO 并组装扫描板
///
/// # 错误
/// - `HalErrorKind::Unavailable`：不是树莓派或没有 `/dev/gpiomem` 权限
/// - `HalErrorKind::Pin`：引脚被占用或编号无效
pub fn open_board(pins: &RpiPins, clock: Arc<dyn Clock>) -> Result<Board, HalError> {
    let gpio = Gpio::new()?;

    let mut trigger = gpio.get(pins.trigger)?.into_output();
    trigger.set_low();
    let echo = gpio.get(pins.echo)?.into_input();
    let servo = gpio.get(pins.servo)?.into_output_low();
    let green = gpio.get(pins.green_led)?.into_output_low();
    let red = gpio.get(pins.red_led)?.into_output_low();

    let button: Option<Box<dyn EdgeSource>> = match pins.button {
        Some(pin) => Some(Box::new(RpiButton(gpio.get(pin)?.into_input_pullup()))),
        None => None,
    };

    info!(
        "GPIO opened: servo={} trigger={} echo={} leds=({}, {}) button={:?}",
        pins.servo, pins.trigger, pins.echo, pins.green_led, pins.red_led, pins.button
    );

    Ok(Board {
        trigger: Box::new(RpiTrigger(trigger)),
        echo: Box::new(RpiEcho(echo)),
        servo: Box::new(RpiServo(servo)),
        indicator: Box::new(RpiIndicator { green, red }),
        button,
        clock,
    })
}
