//! 对外事件
//!
//! IO 线程在确认叶片状态变化时产生 `MlcEvent`，通过钩子分发给订阅者。

use mlc_model::{Layer, Side};
use mlc_protocol::{LeafStateReport, MlcFrame};
use std::fmt;

/// 一条在途指令失败的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFault {
    /// 应答 CRC 错误
    CrcMismatch,
    /// 应答地址与在途指令不一致
    AddressMismatch { expected: u8, actual: u8 },
    /// 等待应答超时
    Timeout,
    /// 写串口失败
    WriteFailed,
}

impl fmt::Display for ResponseFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseFault::CrcMismatch => write!(f, "CRC mismatch"),
            ResponseFault::AddressMismatch { expected, actual } => {
                write!(f, "address mismatch (expected {}, got {})", expected, actual)
            },
            ResponseFault::Timeout => write!(f, "response timeout"),
            ResponseFault::WriteFailed => write!(f, "write failed"),
        }
    }
}

/// 驱动事件
#[derive(Debug, Clone, PartialEq)]
pub enum MlcEvent {
    /// 叶片实际位置变化（`None` 表示位置未知）
    PositionChanged {
        address: u8,
        layer: Layer,
        side: Side,
        position: Option<i32>,
    },
    /// 限位开关状态变化
    SwitchChanged {
        address: u8,
        layer: Layer,
        side: Side,
        pressed: bool,
    },
    /// 成功解码的一帧应答（诊断用）
    FrameDecoded { layer: Layer, report: LeafStateReport },
    /// 指令在用尽重发次数后被丢弃
    CommandDropped {
        layer: Layer,
        frame: MlcFrame,
        fault: ResponseFault,
    },
}

impl MlcEvent {
    pub fn layer(&self) -> Layer {
        match self {
            MlcEvent::PositionChanged { layer, .. }
            | MlcEvent::SwitchChanged { layer, .. }
            | MlcEvent::FrameDecoded { layer, .. }
            | MlcEvent::CommandDropped { layer, .. } => *layer,
        }
    }

    /// 事件涉及的叶片地址（广播指令为 0）
    pub fn address(&self) -> u8 {
        match self {
            MlcEvent::PositionChanged { address, .. } | MlcEvent::SwitchChanged { address, .. } => {
                *address
            },
            MlcEvent::FrameDecoded { report, .. } => report.address,
            MlcEvent::CommandDropped { frame, .. } => frame.address(),
        }
    }
}
