//! HAL 错误类型

use thiserror::Error;

/// 硬件错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalErrorKind {
    /// GPIO 外设不可用（非树莓派、权限不足等）
    Unavailable,
    /// 引脚被占用或编号无效
    Pin,
    /// PWM 输出失败
    Pwm,
    /// 中断注册失败
    Interrupt,
}

/// 硬件抽象层统一错误类型
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct HalError {
    pub kind: HalErrorKind,
    pub message: String,
}

impl HalError {
    pub fn new(kind: HalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[cfg(all(target_os = "linux", feature = "rpi"))]
impl From<rppal::gpio::Error> for HalError {
    fn from(e: rppal::gpio::Error) -> Self {
        use rppal::gpio::Error as GpioError;
        let kind = match &e {
            GpioError::PinUsed(_) | GpioError::PinNotAvailable(_) => HalErrorKind::Pin,
            GpioError::UnknownModel | GpioError::PermissionDenied(_) | GpioError::Io(_) => {
                HalErrorKind::Unavailable
            },
            _ => HalErrorKind::Interrupt,
        };
        Self::new(kind, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hal_error_display() {
        let e = HalError::new(HalErrorKind::Pwm, "channel busy");
        let msg = format!("{}", e);
        assert!(msg.contains("Pwm") && msg.contains("channel busy"), "{}", msg);
    }
}
