//! 驱动层错误类型定义

use mlc_model::{Layer, ModelError};
use mlc_protocol::ProtocolError;
use mlc_serial::SerialError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 串口错误
    #[error("Serial error: {0}")]
    Serial(#[from] SerialError),

    /// 协议解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 叶片模型错误
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// 打开某层串口失败
    #[error("Device not connected: {layer} on '{port}' ({source})")]
    ChannelUnavailable {
        layer: Layer,
        port: String,
        #[source]
        source: SerialError,
    },

    /// 该层没有打开的通道
    #[error("Layer {0} is not open")]
    LayerNotOpen(Layer),

    /// 指令队列已满
    #[error("Command queue full for {layer} (capacity: {capacity})")]
    QueueFull { layer: Layer, capacity: usize },

    /// 命令通道已关闭（IO 线程退出）
    #[error("Command channel closed")]
    ChannelClosed,

    /// 锁被毒化（线程 panic）
    #[error("Poisoned lock (thread panic)")]
    PoisonedLock,

    /// 操作超时
    #[error("Operation timeout")]
    Timeout,

    /// 配置错误
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlc_serial::{SerialDeviceError, SerialDeviceErrorKind};

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::ChannelUnavailable {
            layer: Layer::Layer2,
            port: "/dev/ttyUSB1".to_string(),
            source: SerialError::Device(SerialDeviceError::new(
                SerialDeviceErrorKind::NotFound,
                "no such port",
            )),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Device not connected"), "{}", msg);
        assert!(msg.contains("layer2") && msg.contains("/dev/ttyUSB1"));

        let err = DriverError::QueueFull {
            layer: Layer::Layer1,
            capacity: 4,
        };
        assert_eq!(err.to_string(), "Command queue full for layer1 (capacity: 4)");

        assert_eq!(DriverError::ChannelClosed.to_string(), "Command channel closed");
        assert_eq!(DriverError::Timeout.to_string(), "Operation timeout");
    }

    #[test]
    fn test_from_model_error() {
        let err: DriverError = ModelError::CalibrationIncomplete {
            layer: Layer::Layer1,
        }
        .into();
        assert!(matches!(
            err,
            DriverError::Model(ModelError::CalibrationIncomplete { .. })
        ));
    }

    #[test]
    fn test_from_protocol_error() {
        let err: DriverError = ProtocolError::CrcMismatch {
            expected: 0x1234,
            actual: 0x4321,
        }
        .into();
        match err {
            DriverError::Protocol(ProtocolError::CrcMismatch { expected, actual }) => {
                assert_eq!(expected, 0x1234);
                assert_eq!(actual, 0x4321);
            },
            other => panic!("Expected Protocol variant, got {:?}", other),
        }
    }
}
