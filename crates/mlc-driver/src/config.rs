//! 设备配置（TOML）
//!
//! ```toml
//! [collimator]
//! number_of_pairs = 16
//! layers = "two"
//!
//! [device]
//! queue_capacity = 256
//! max_retransmits = 1
//! response_timeout_ms = 200
//!
//! [device.ports]
//! layer1 = "/dev/ttyUSB0"
//! layer2 = "/dev/ttyUSB1"
//! ```

use crate::dispatcher::RetryPolicy;
use crate::error::DriverError;
use crate::pipeline::PipelineConfig;
use mlc_model::{Layer, MlcConfig};
use mlc_serial::LinkSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 每层的串口路径
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerPorts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer2: Option<String>,
}

impl LayerPorts {
    pub fn get(&self, layer: Layer) -> Option<&str> {
        match layer {
            Layer::Layer1 => self.layer1.as_deref(),
            Layer::Layer2 => self.layer2.as_deref(),
        }
    }

    pub fn set(&mut self, layer: Layer, port: impl Into<String>) {
        let slot = match layer {
            Layer::Layer1 => &mut self.layer1,
            Layer::Layer2 => &mut self.layer2,
        };
        *slot = Some(port.into());
    }
}

/// 串口与调度参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub ports: LayerPorts,
    pub queue_capacity: usize,
    pub max_retransmits: u32,
    /// 应答超时（毫秒），0 表示不超时
    pub response_timeout_ms: u64,
    /// IO 循环空闲休眠（毫秒）
    pub poll_interval_ms: u64,
    /// 串口读超时（毫秒）
    pub read_timeout_ms: u64,
    /// 空闲状态查询间隔（毫秒），缺省为关闭
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_poll_interval_ms: Option<u64>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            ports: LayerPorts::default(),
            queue_capacity: 256,
            max_retransmits: RetryPolicy::DEFAULT_MAX_RETRANSMITS,
            response_timeout_ms: RetryPolicy::DEFAULT_RESPONSE_TIMEOUT.as_millis() as u64,
            poll_interval_ms: 2,
            read_timeout_ms: 2,
            state_poll_interval_ms: None,
        }
    }
}

impl DeviceConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retransmits: self.max_retransmits,
            response_timeout: (self.response_timeout_ms > 0)
                .then(|| Duration::from_millis(self.response_timeout_ms)),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            queue_capacity: self.queue_capacity,
            retry: self.retry_policy(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            state_poll_interval: self.state_poll_interval_ms.map(Duration::from_millis),
        }
    }

    /// 固定的 38400 8N1 链路参数，仅读超时取自配置
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings::default().with_read_timeout(Duration::from_millis(self.read_timeout_ms))
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        if self.queue_capacity == 0 {
            return Err(DriverError::Config(
                "queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// 完整会话配置：准直器几何 + 设备参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub collimator: MlcConfig,
    pub device: DeviceConfig,
}

impl SessionConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DriverError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, DriverError> {
        let config: Self = toml::from_str(content)?;
        config.collimator.validate()?;
        config.device.validate()?;
        Ok(config)
    }
}
