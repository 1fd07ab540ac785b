//! 驱动层错误类型定义

use sonar_hal::HalError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 硬件错误（初始化失败时采集线程不会启动）
    #[error("Hardware error: {0}")]
    Hal(#[from] HalError),

    /// 一批采样中没有任何可用值
    ///
    /// 与「测得 0cm」严格区分：调用方不得把它当作距离。
    #[error("No valid samples: {faulted} faulted, {rejected} rejected out of {total}")]
    NoValidSamples {
        total: usize,
        faulted: usize,
        rejected: usize,
    },

    /// 配置不合法
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// 采集线程错误（启动失败、panic、退出超时）
    #[error("Acquisition thread error: {0}")]
    AcquisitionThread(String),
}

impl DriverError {
    /// 是否为「本批无有效采样」
    pub fn is_no_valid_samples(&self) -> bool {
        matches!(self, Self::NoValidSamples { .. })
    }
}
