//! # MLC Protocol
//!
//! 多叶准直器（MLC）串口总线协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `constants`: 帧长度、字节偏移、广播地址等协议常量
//! - `crc`: CRC16 校验（反射多项式 0xA001，初值 0xFFFF，与 Modbus CRC16 一致）
//! - `control`: 下行指令帧构建（设置参数 / 查询状态 / 启动 / 停止 / 广播）
//! - `feedback`: 上行状态帧解析
//!
//! ## 帧格式
//!
//! 上下行共用固定 11 字节帧：`[地址, 指令码, 标志位, 数据 x6, CRC 低字节, CRC 高字节]`。
//! CRC 覆盖字节 0-8，小端附加在偏移 9、10。
//!
//! ## 字节序
//!
//! 下行指令的步数字段为小端（Byte 4 低字节，Byte 5 高字节）；
//! 上行状态帧的 16 位字段为大端（高字节在前）。两者不可混用。

pub mod constants;
pub mod control;
pub mod crc;
pub mod feedback;

// 重新导出常用类型
pub use constants::*;
pub use control::*;
pub use crc::{check_crc16, crc16, update_crc16};
pub use feedback::*;

use thiserror::Error;

/// 串口总线帧的统一抽象
///
/// `MlcFrame` 是协议层和串口层之间的中间抽象：
/// - 协议层通过 `to_frame()` 构建、通过 `TryFrom<MlcFrame>` 解析
/// - 串口层只负责把 11 字节原样写出 / 读入
///
/// # 设计特性
///
/// - **Copy trait**：固定 11 字节，无堆分配
/// - **构建即带 CRC**：`from_payload()` 自动计算并附加 CRC16
/// - **接收不校验**：`from_bytes()` 只检查长度，CRC 由调用方通过 `has_valid_crc()` 检查，
///   以便区分"长度不足"与"校验失败"两类错误
///
/// ```rust
/// use mlc_protocol::MlcFrame;
///
/// let frame = MlcFrame::from_payload([2, 1, 0, 0, 0, 0, 0, 0, 0]);
/// assert_eq!(frame.address(), 2);
/// assert!(frame.has_valid_crc());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MlcFrame {
    /// 原始帧数据（含 CRC）
    pub data: [u8; FRAME_LEN],
}

impl MlcFrame {
    /// 由前 9 字节负载构建帧，自动附加 CRC16
    pub fn from_payload(payload: [u8; PAYLOAD_LEN]) -> Self {
        let mut data = [0u8; FRAME_LEN];
        data[..PAYLOAD_LEN].copy_from_slice(&payload);
        let crc = crc16(&payload);
        data[OFFSET_CRC_LOW] = (crc & 0x00FF) as u8;
        data[OFFSET_CRC_HIGH] = (crc >> 8) as u8;
        Self { data }
    }

    /// 由原始字节构建帧（不校验 CRC）
    ///
    /// 只取前 11 字节；不足 11 字节返回 `InvalidLength`。
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < FRAME_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: FRAME_LEN,
                actual: bytes.len(),
            });
        }
        let mut data = [0u8; FRAME_LEN];
        data.copy_from_slice(&bytes[..FRAME_LEN]);
        Ok(Self { data })
    }

    /// Byte 0: 目标地址（下行）/ 应答地址（上行）
    pub fn address(&self) -> u8 {
        self.data[OFFSET_ADDRESS]
    }

    /// Byte 1: 指令码（下行）/ 原始状态码（上行）
    pub fn code(&self) -> u8 {
        self.data[OFFSET_CODE]
    }

    /// Byte 2: 标志位
    pub fn flags(&self) -> u8 {
        self.data[OFFSET_FLAGS]
    }

    /// 是否为广播帧（地址 0，无应答）
    pub fn is_broadcast(&self) -> bool {
        self.address() == BROADCAST_ADDRESS
    }

    /// 帧内携带的 CRC（Byte 9 低字节，Byte 10 高字节）
    pub fn crc(&self) -> u16 {
        u16::from_le_bytes([self.data[OFFSET_CRC_LOW], self.data[OFFSET_CRC_HIGH]])
    }

    /// 按字节 0-8 重新计算的 CRC
    pub fn computed_crc(&self) -> u16 {
        crc16(&self.data[..PAYLOAD_LEN])
    }

    /// CRC 是否一致
    pub fn has_valid_crc(&self) -> bool {
        check_crc16(&self.data)
    }

    /// 校验 CRC，不一致时返回 `CrcMismatch`
    pub fn validate_crc(&self) -> Result<(), ProtocolError> {
        let expected = self.computed_crc();
        let actual = self.crc();
        if expected != actual {
            return Err(ProtocolError::CrcMismatch { expected, actual });
        }
        Ok(())
    }

    /// 获取完整数据
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.data
    }
}

impl From<MlcFrame> for [u8; FRAME_LEN] {
    fn from(frame: MlcFrame) -> Self {
        frame.data
    }
}

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("CRC16 mismatch: computed 0x{expected:04X}, frame carries 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error("Address mismatch: expected {expected}, got {actual}")]
    AddressMismatch { expected: u8, actual: u8 },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: String, value: u8 },
}

/// 大端字节序转 u16（上行帧 16 位字段）
pub fn bytes_to_u16_be(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}

/// u16 转小端字节序（下行帧步数字段）
pub fn u16_to_bytes_le(value: u16) -> [u8; 2] {
    value.to_le_bytes()
}
