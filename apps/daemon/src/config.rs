//! 守护进程配置
//!
//! TOML 文件，所有段均可省略。驱动参数（`ranger`、`sampling`、`sweep`、`cycle`、
//! `button`、`shutdown`）与引脚、服务、客户端参数位于同一层级。

use serde::{Deserialize, Serialize};
use sonar_driver::{DriverConfig, DriverError, SweepScheduler};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid bind address '{0}'")]
    Bind(String),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// 引脚分配（BCM 编号）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    pub servo: u8,
    pub trigger: u8,
    pub echo: u8,
    pub green_led: u8,
    pub red_led: u8,
    /// 省略时不使用物理按键
    pub button: Option<u8>,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            servo: 18,
            trigger: 23,
            echo: 24,
            green_led: 20,
            red_led: 21,
            button: Some(25),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
        }
    }
}

/// 可视化客户端参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// 角度单位（度），省略时等于扫描步进角
    pub angle_unit_deg: Option<f64>,
}

/// 完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub pins: PinConfig,
    pub server: ServerConfig,
    pub client: ClientConfig,
    #[serde(flatten)]
    pub driver: DriverConfig,
}

impl DaemonConfig {
    /// 从 TOML 文件加载（不校验）
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 校验并解析监听地址
    pub fn validate(&self) -> Result<SocketAddr, ConfigError> {
        self.driver.validate()?;
        if let Some(unit) = self.client.angle_unit_deg
            && !(unit.is_finite() && unit > 0.0)
        {
            return Err(DriverError::InvalidConfig(format!(
                "client.angle_unit_deg must be positive, got {}",
                unit
            ))
            .into());
        }
        self.server
            .bind
            .parse()
            .map_err(|_| ConfigError::Bind(self.server.bind.clone()))
    }

    /// 客户端角度单位
    pub fn angle_unit_deg(&self) -> Result<f64, ConfigError> {
        match self.client.angle_unit_deg {
            Some(unit) => Ok(unit),
            None => Ok(SweepScheduler::new(&self.driver.sweep)?.step_degrees()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_reproduce_prototype() {
        let c = DaemonConfig::default();
        assert_eq!(c.pins.servo, 18);
        assert_eq!(c.pins.button, Some(25));
        assert_eq!(c.validate().unwrap().port(), 5000);
        assert_eq!(c.angle_unit_deg().unwrap(), 9.0);
    }

    #[test]
    fn test_example_file_parses() {
        let c: DaemonConfig = toml::from_str(include_str!("../sonard.example.toml")).unwrap();
        assert_eq!(c, DaemonConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
bind = "127.0.0.1:8080"

[sweep]
step_us = 200

[client]
angle_unit_deg = 18.0
"#
        )
        .unwrap();

        let c = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(c.server.bind, "127.0.0.1:8080");
        assert_eq!(c.driver.sweep.step_us, 200);
        assert_eq!(c.driver.sweep.min_pulse_us, 500);
        assert_eq!(c.driver.sampling.batch_size, 7);
        assert_eq!(c.pins, PinConfig::default());
        assert!(c.validate().unwrap().ip().is_loopback());
        assert_eq!(c.angle_unit_deg().unwrap(), 18.0);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut c = DaemonConfig::default();
        c.server.bind = "not-an-address".into();
        assert!(matches!(c.validate(), Err(ConfigError::Bind(_))));

        let mut c = DaemonConfig::default();
        c.driver.sweep.step_us = 300;
        assert!(matches!(c.validate(), Err(ConfigError::Driver(_))));

        let mut c = DaemonConfig::default();
        c.client.angle_unit_deg = Some(0.0);
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_load_reports_missing_file_and_bad_toml() {
        let err = DaemonConfig::load(Path::new("/nonexistent/sonard.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sweep]\nstep_us = \"fast\"").unwrap();
        let err = DaemonConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
