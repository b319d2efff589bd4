//! # MLC Serial Adapter Layer
//!
//! 串口硬件抽象层，每个叶片层对应一条独立的串口通道。
//!
//! - `SerialPortAdapter`：基于 `serialport` 的真实串口（38400 8N1，无流控）
//! - `MockSerialAdapter`：内存链路与模拟设备（feature `mock`）

use std::time::Duration;
use thiserror::Error;

// 重新导出 mlc-protocol 中的 MlcFrame
pub use mlc_protocol::MlcFrame;

pub mod port;

pub use port::{PortInfo, SerialPortAdapter, available_ports};

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockLink, MockSerialAdapter, SimulatedDevice};

/// 串口适配层统一错误类型
#[derive(Error, Debug)]
pub enum SerialError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] SerialDeviceError),
    #[error("Read timeout")]
    Timeout,
    #[error("Port closed")]
    Closed,
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialDeviceErrorKind {
    Unknown,
    NotFound,
    NoDevice,
    AccessDenied,
    Busy,
    UnsupportedConfig,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct SerialDeviceError {
    pub kind: SerialDeviceErrorKind,
    pub message: String,
}

impl SerialDeviceError {
    pub fn new(kind: SerialDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// 设备不存在或无权访问，重试没有意义
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            SerialDeviceErrorKind::NoDevice
                | SerialDeviceErrorKind::AccessDenied
                | SerialDeviceErrorKind::NotFound
        )
    }
}

impl From<serialport::Error> for SerialDeviceError {
    fn from(err: serialport::Error) -> Self {
        let kind = match err.kind {
            serialport::ErrorKind::NoDevice => SerialDeviceErrorKind::NoDevice,
            serialport::ErrorKind::InvalidInput => SerialDeviceErrorKind::UnsupportedConfig,
            serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                SerialDeviceErrorKind::NotFound
            },
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                SerialDeviceErrorKind::AccessDenied
            },
            serialport::ErrorKind::Io(std::io::ErrorKind::ResourceBusy) => {
                SerialDeviceErrorKind::Busy
            },
            serialport::ErrorKind::Io(_) => SerialDeviceErrorKind::Backend,
            serialport::ErrorKind::Unknown => SerialDeviceErrorKind::Unknown,
        };
        Self::new(kind, err.description)
    }
}

impl From<serialport::Error> for SerialError {
    fn from(err: serialport::Error) -> Self {
        SerialError::Device(err.into())
    }
}

impl From<String> for SerialDeviceError {
    fn from(message: String) -> Self {
        Self::new(SerialDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for SerialDeviceError {
    fn from(message: &str) -> Self {
        Self::new(SerialDeviceErrorKind::Unknown, message)
    }
}

/// 串口链路参数
///
/// 设备固定为 38400 波特率、8 数据位、无校验、1 停止位、无流控，
/// 只有读超时可以调整（它决定 IO 线程一次轮询的最长阻塞时间）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    pub baud_rate: u32,
    pub data_bits: serialport::DataBits,
    pub parity: serialport::Parity,
    pub stop_bits: serialport::StopBits,
    pub flow_control: serialport::FlowControl,
    pub read_timeout: Duration,
}

impl LinkSettings {
    pub const DEFAULT_BAUD_RATE: u32 = 38_400;

    /// 调整读超时（其余参数保持固定）
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: Self::DEFAULT_BAUD_RATE,
            data_bits: serialport::DataBits::Eight,
            parity: serialport::Parity::None,
            stop_bits: serialport::StopBits::One,
            flow_control: serialport::FlowControl::None,
            read_timeout: Duration::from_millis(2),
        }
    }
}

/// 串口通道抽象
///
/// 每层一条通道，由该层的 IO 线程独占。
pub trait SerialAdapter {
    /// 写出一整帧
    ///
    /// 返回 `Ok(())` 即表示发送完成（字节已经离开本端缓冲区）。
    fn write_frame(&mut self, frame: &MlcFrame) -> Result<(), SerialError>;

    /// 读取当前可用的字节
    ///
    /// 最多阻塞一个读超时；超时没有数据时返回 `Ok(0)`。
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, SerialError>;

    /// 丢弃收发缓冲区中的残留数据
    fn clear(&mut self) -> Result<(), SerialError> {
        Ok(())
    }

    /// 通道名称（用于日志）
    fn name(&self) -> &str {
        "serial"
    }
}

impl<T: SerialAdapter + ?Sized> SerialAdapter for Box<T> {
    fn write_frame(&mut self, frame: &MlcFrame) -> Result<(), SerialError> {
        (**self).write_frame(frame)
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        (**self).read_available(buf)
    }

    fn clear(&mut self) -> Result<(), SerialError> {
        (**self).clear()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
