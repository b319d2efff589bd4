//! 上行状态帧解析
//!
//! 设备对每条寻址指令回送一帧状态报告（11 字节），
//! 16 位字段均为大端，标志位中有三位是反相的。

use crate::{
    MlcFrame, MotionDirection, OFFSET_CURRENT_POSITION, OFFSET_ENCODER_COUNTS, OFFSET_FLAGS,
    OFFSET_STEPS_LEFT, PAYLOAD_LEN, POSITION_NOT_ESTABLISHED, ProtocolError, bytes_to_u16_be,
};
use bilge::prelude::*;

/// 上行标志位域（Byte 2，线上原始值）
///
/// 协议定义：
/// - Bit 0: 编码器方向（反相）
/// - Bit 1: 限位开关（反相，0 表示按下）
/// - Bit 2: 复位（反相）
/// - Bit 3: 细分模式
/// - Bit 4: 方向
/// - Bit 5: 使能
/// - Bit 6-7: 保留
///
/// 与下行 `CommandFlags` 的 bit 分配和极性都不同，两张表独立维护。
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct ReportFlags {
    pub encoder_direction_n: bool, // Bit 0: 编码器方向（反相）
    pub switch_n: bool,            // Bit 1: 限位开关（反相）
    pub reset_n: bool,             // Bit 2: 复位（反相）
    pub step_mode: bool,           // Bit 3: 细分模式
    pub direction: bool,           // Bit 4: 方向
    pub enabled: bool,             // Bit 5: 使能
    pub reserved: u2,              // Bit 6-7: 保留
}

/// 叶片状态报告
///
/// 标志位已经按极性还原为逻辑值。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LeafStateReport {
    pub address: u8,                          // Byte 0: 应答地址
    pub status: u8,                           // Byte 1: 原始状态码（不解释）
    pub encoder_direction: MotionDirection,   // Byte 2 Bit 0（反相）
    pub switch_pressed: bool,                 // Byte 2 Bit 1（反相）
    pub reset: bool,                          // Byte 2 Bit 2（反相）
    pub step_mode: bool,                      // Byte 2 Bit 3
    pub direction: MotionDirection,           // Byte 2 Bit 4
    pub enabled: bool,                        // Byte 2 Bit 5
    pub steps_left: u16,                      // Byte 3-4: 剩余步数
    pub encoder_counts: u16,                  // Byte 5-6: 外部编码器计数
    pub current_position: Option<u16>,        // Byte 7-8: 当前位置，0xFFFF 表示未建立
}

impl LeafStateReport {
    /// 解析应答帧并检查应答地址
    ///
    /// 先校验 CRC，再比较地址；两者分别返回 `CrcMismatch` / `AddressMismatch`。
    pub fn parse_response(frame: MlcFrame, expected_address: u8) -> Result<Self, ProtocolError> {
        let report = Self::try_from(frame)?;
        if report.address != expected_address {
            return Err(ProtocolError::AddressMismatch {
                expected: expected_address,
                actual: report.address,
            });
        }
        Ok(report)
    }

    /// 还原线上标志位（用于模拟设备回送状态）
    pub fn report_flags(&self) -> ReportFlags {
        let mut flags = ReportFlags::from(u8::new(0));
        flags.set_encoder_direction_n(!self.encoder_direction.as_bit());
        flags.set_switch_n(!self.switch_pressed);
        flags.set_reset_n(!self.reset);
        flags.set_step_mode(self.step_mode);
        flags.set_direction(self.direction.as_bit());
        flags.set_enabled(self.enabled);
        flags
    }

    /// 叶片是否仍在运动
    pub fn is_moving(&self) -> bool {
        self.steps_left > 0
    }

    /// 编码为上行帧
    pub fn to_frame(&self) -> MlcFrame {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload[0] = self.address;
        payload[1] = self.status;
        payload[OFFSET_FLAGS] = u8::from(self.report_flags()).value();
        payload[OFFSET_STEPS_LEFT..OFFSET_STEPS_LEFT + 2]
            .copy_from_slice(&self.steps_left.to_be_bytes());
        payload[OFFSET_ENCODER_COUNTS..OFFSET_ENCODER_COUNTS + 2]
            .copy_from_slice(&self.encoder_counts.to_be_bytes());
        let position = self.current_position.unwrap_or(POSITION_NOT_ESTABLISHED);
        payload[OFFSET_CURRENT_POSITION..OFFSET_CURRENT_POSITION + 2]
            .copy_from_slice(&position.to_be_bytes());
        MlcFrame::from_payload(payload)
    }
}

impl Default for LeafStateReport {
    fn default() -> Self {
        Self {
            address: 0,
            status: 0,
            encoder_direction: MotionDirection::TowardSwitch,
            switch_pressed: false,
            reset: false,
            step_mode: false,
            direction: MotionDirection::TowardSwitch,
            enabled: true,
            steps_left: 0,
            encoder_counts: 0,
            current_position: None,
        }
    }
}

impl TryFrom<MlcFrame> for LeafStateReport {
    type Error = ProtocolError;

    fn try_from(frame: MlcFrame) -> Result<Self, Self::Error> {
        frame.validate_crc()?;

        let flags = ReportFlags::from(u8::new(frame.flags()));
        let read_u16 = |offset: usize| bytes_to_u16_be([frame.data[offset], frame.data[offset + 1]]);
        let raw_position = read_u16(OFFSET_CURRENT_POSITION);

        Ok(Self {
            address: frame.address(),
            status: frame.code(),
            encoder_direction: MotionDirection::from_bit(!flags.encoder_direction_n()),
            switch_pressed: !flags.switch_n(),
            reset: !flags.reset_n(),
            step_mode: flags.step_mode(),
            direction: MotionDirection::from_bit(flags.direction()),
            enabled: flags.enabled(),
            steps_left: read_u16(OFFSET_STEPS_LEFT),
            encoder_counts: read_u16(OFFSET_ENCODER_COUNTS),
            current_position: (raw_position != POSITION_NOT_ESTABLISHED).then_some(raw_position),
        })
    }
}
