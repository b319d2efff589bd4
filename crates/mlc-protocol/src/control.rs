//! 控制帧结构体定义
//!
//! 包含所有下行指令帧的结构体，提供构建指令的方法
//! 和转换为 `MlcFrame` 的方法。

use crate::{BROADCAST_ADDRESS, MlcFrame, OFFSET_FLAGS, PAYLOAD_LEN, ProtocolError, u16_to_bytes_le};
use bilge::prelude::*;

// ============================================================================
// 指令码
// ============================================================================

/// 下行指令码（Byte 1）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, num_enum::IntoPrimitive)]
#[repr(u8)]
pub enum CommandCode {
    /// 设置运动参数（频率、细分、方向、复位、使能、步数）
    SetParameters = 0x00,
    /// 查询状态
    GetState = 0x01,
    /// 单叶片启动
    Start = 0x02,
    /// 单叶片停止
    Stop = 0x03,
    /// 广播：全部打开（回零）
    BroadcastOpen = 0x05,
    /// 广播：全部停止
    BroadcastStop = 0x06,
    /// 广播：全部启动
    BroadcastStart = 0x09,
}

impl CommandCode {
    /// 该指令码是否只能以广播形式发送
    pub fn is_broadcast_only(self) -> bool {
        matches!(
            self,
            CommandCode::BroadcastOpen | CommandCode::BroadcastStop | CommandCode::BroadcastStart
        )
    }
}

impl TryFrom<u8> for CommandCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(CommandCode::SetParameters),
            0x01 => Ok(CommandCode::GetState),
            0x02 => Ok(CommandCode::Start),
            0x03 => Ok(CommandCode::Stop),
            0x05 => Ok(CommandCode::BroadcastOpen),
            0x06 => Ok(CommandCode::BroadcastStop),
            0x09 => Ok(CommandCode::BroadcastStart),
            _ => Err(ProtocolError::InvalidValue {
                field: "CommandCode".to_string(),
                value,
            }),
        }
    }
}

/// 运动方向
///
/// 方向位为 1 表示离开限位开关，为 0 表示朝向限位开关。
/// 上下行的方向位语义一致，只是所在的 bit 不同。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MotionDirection {
    /// 朝向限位开关（回零方向）
    #[default]
    TowardSwitch,
    /// 离开限位开关
    AwayFromSwitch,
}

impl MotionDirection {
    pub fn from_bit(bit: bool) -> Self {
        if bit {
            MotionDirection::AwayFromSwitch
        } else {
            MotionDirection::TowardSwitch
        }
    }

    pub fn as_bit(self) -> bool {
        matches!(self, MotionDirection::AwayFromSwitch)
    }

    /// 反方向
    pub fn reversed(self) -> Self {
        Self::from_bit(!self.as_bit())
    }
}

// ============================================================================
// 设置参数指令
// ============================================================================

/// 下行标志位域（Byte 2）
///
/// 协议定义：
/// - Bit 0-3: 频率码
/// - Bit 4: 细分模式
/// - Bit 5: 方向（1 离开开关，0 朝向开关）
/// - Bit 6: 复位
/// - Bit 7: 使能
///
/// 注意：上行状态帧的标志位布局与此不同，见 `ReportFlags`。
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct CommandFlags {
    pub frequency: u4,   // Bit 0-3: 频率码
    pub step_mode: bool, // Bit 4: 细分模式
    pub direction: bool, // Bit 5: 方向
    pub reset: bool,     // Bit 6: 复位
    pub enabled: bool,   // Bit 7: 使能
}

/// 设置参数指令（指令码 0x00）
///
/// 绝对定位与相对定位共用同一帧格式，区别只在于步数与方向的来源，
/// 由上层（叶片模型）决定。
///
/// 帧布局：`[地址, 0x00, 标志位, 0x00, 步数低, 步数高, 0, 0, 0, CRC 低, CRC 高]`
#[derive(Debug, Clone, Copy)]
pub struct SetParametersCommand {
    pub address: u8,         // Byte 0: 目标地址
    pub flags: CommandFlags, // Byte 2: 标志位域
    pub steps: u16,          // Byte 4-5: 步数（小端）
}

impl SetParametersCommand {
    /// 创建设置参数指令（使能、其余标志位为 0）
    pub fn new(address: u8, steps: u16) -> Self {
        let mut flags = CommandFlags::from(u8::new(0));
        flags.set_enabled(true);
        Self {
            address,
            flags,
            steps,
        }
    }

    /// 设置频率码（只取低 4 位）
    pub fn with_frequency(mut self, frequency: u8) -> Self {
        self.flags.set_frequency(u4::new(frequency & crate::MAX_FREQUENCY_CODE));
        self
    }

    pub fn with_step_mode(mut self, step_mode: bool) -> Self {
        self.flags.set_step_mode(step_mode);
        self
    }

    pub fn with_direction(mut self, direction: MotionDirection) -> Self {
        self.flags.set_direction(direction.as_bit());
        self
    }

    pub fn with_reset(mut self, reset: bool) -> Self {
        self.flags.set_reset(reset);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.flags.set_enabled(enabled);
        self
    }

    pub fn frequency(&self) -> u8 {
        self.flags.frequency().value()
    }

    pub fn direction(&self) -> MotionDirection {
        MotionDirection::from_bit(self.flags.direction())
    }

    /// 转换为串口帧
    pub fn to_frame(self) -> MlcFrame {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload[0] = self.address;
        payload[1] = CommandCode::SetParameters.into();
        payload[OFFSET_FLAGS] = u8::from(self.flags).value();
        // Byte 3: 保留，已初始化为 0
        let steps = u16_to_bytes_le(self.steps);
        payload[4..6].copy_from_slice(&steps);

        MlcFrame::from_payload(payload)
    }
}

// ============================================================================
// 查询 / 启停指令
// ============================================================================

/// 查询状态指令（指令码 0x01）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetStateCommand {
    pub address: u8,
}

impl GetStateCommand {
    pub fn new(address: u8) -> Self {
        Self { address }
    }

    pub fn to_frame(self) -> MlcFrame {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload[0] = self.address;
        payload[1] = CommandCode::GetState.into();
        MlcFrame::from_payload(payload)
    }
}

/// 单叶片启停动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MotionAction {
    Start,
    Stop,
}

/// 单叶片启动 / 停止指令（指令码 0x02 / 0x03）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionCommand {
    pub address: u8,
    pub action: MotionAction,
}

impl MotionCommand {
    pub fn start(address: u8) -> Self {
        Self {
            address,
            action: MotionAction::Start,
        }
    }

    pub fn stop(address: u8) -> Self {
        Self {
            address,
            action: MotionAction::Stop,
        }
    }

    pub fn code(&self) -> CommandCode {
        match self.action {
            MotionAction::Start => CommandCode::Start,
            MotionAction::Stop => CommandCode::Stop,
        }
    }

    pub fn to_frame(self) -> MlcFrame {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload[0] = self.address;
        payload[1] = self.code().into();
        MlcFrame::from_payload(payload)
    }
}

/// 广播指令种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BroadcastKind {
    /// 全部叶片打开（回零）
    Open,
    /// 全部叶片停止
    Stop,
    /// 全部叶片启动
    Start,
}

/// 广播指令（地址 0，设备不应答）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastCommand {
    pub kind: BroadcastKind,
}

impl BroadcastCommand {
    pub fn new(kind: BroadcastKind) -> Self {
        Self { kind }
    }

    pub fn code(&self) -> CommandCode {
        match self.kind {
            BroadcastKind::Open => CommandCode::BroadcastOpen,
            BroadcastKind::Stop => CommandCode::BroadcastStop,
            BroadcastKind::Start => CommandCode::BroadcastStart,
        }
    }

    pub fn to_frame(self) -> MlcFrame {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload[0] = BROADCAST_ADDRESS;
        payload[1] = self.code().into();
        MlcFrame::from_payload(payload)
    }
}

// ============================================================================
// 下行帧解析（用于模拟设备与诊断）
// ============================================================================

/// 解析后的下行指令
#[derive(Debug, Clone, Copy)]
pub enum OutboundCommand {
    SetParameters(SetParametersCommand),
    GetState(GetStateCommand),
    Motion(MotionCommand),
    Broadcast(BroadcastCommand),
}

impl OutboundCommand {
    /// 指令的目标地址（广播为 0）
    pub fn address(&self) -> u8 {
        match self {
            OutboundCommand::SetParameters(cmd) => cmd.address,
            OutboundCommand::GetState(cmd) => cmd.address,
            OutboundCommand::Motion(cmd) => cmd.address,
            OutboundCommand::Broadcast(_) => BROADCAST_ADDRESS,
        }
    }
}

impl TryFrom<MlcFrame> for OutboundCommand {
    type Error = ProtocolError;

    fn try_from(frame: MlcFrame) -> Result<Self, Self::Error> {
        frame.validate_crc()?;

        let code = CommandCode::try_from(frame.code())?;
        let address = frame.address();

        // 广播指令码必须配广播地址，反之亦然
        if code.is_broadcast_only() != (address == BROADCAST_ADDRESS) {
            return Err(ProtocolError::InvalidValue {
                field: "address".to_string(),
                value: address,
            });
        }

        let command = match code {
            CommandCode::SetParameters => {
                let steps = u16::from_le_bytes([frame.data[4], frame.data[5]]);
                OutboundCommand::SetParameters(SetParametersCommand {
                    address,
                    flags: CommandFlags::from(u8::new(frame.flags())),
                    steps,
                })
            },
            CommandCode::GetState => OutboundCommand::GetState(GetStateCommand::new(address)),
            CommandCode::Start => OutboundCommand::Motion(MotionCommand::start(address)),
            CommandCode::Stop => OutboundCommand::Motion(MotionCommand::stop(address)),
            CommandCode::BroadcastOpen => {
                OutboundCommand::Broadcast(BroadcastCommand::new(BroadcastKind::Open))
            },
            CommandCode::BroadcastStop => {
                OutboundCommand::Broadcast(BroadcastCommand::new(BroadcastKind::Stop))
            },
            CommandCode::BroadcastStart => {
                OutboundCommand::Broadcast(BroadcastCommand::new(BroadcastKind::Start))
            },
        };
        Ok(command)
    }
}
