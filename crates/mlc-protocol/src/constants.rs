//! 协议常量定义

/// 帧总长度（字节），上下行一致
pub const FRAME_LEN: usize = 11;

/// CRC 覆盖的负载长度（字节 0-8）
pub const PAYLOAD_LEN: usize = 9;

/// 广播地址（广播指令无应答）
pub const BROADCAST_ADDRESS: u8 = 0;

// ============================================================================
// 字节偏移
// ============================================================================

pub const OFFSET_ADDRESS: usize = 0;
pub const OFFSET_CODE: usize = 1;
pub const OFFSET_FLAGS: usize = 2;

/// 下行：保留字节（恒为 0）
pub const OFFSET_RESERVED: usize = 3;
/// 下行：步数低字节
pub const OFFSET_STEPS_LOW: usize = 4;
/// 下行：步数高字节
pub const OFFSET_STEPS_HIGH: usize = 5;

/// 上行：剩余步数（大端，Byte 3-4）
pub const OFFSET_STEPS_LEFT: usize = 3;
/// 上行：外部编码器计数（大端，Byte 5-6）
pub const OFFSET_ENCODER_COUNTS: usize = 5;
/// 上行：当前位置（大端，Byte 7-8）
pub const OFFSET_CURRENT_POSITION: usize = 7;

pub const OFFSET_CRC_LOW: usize = 9;
pub const OFFSET_CRC_HIGH: usize = 10;

/// 上行当前位置字段的"未建立"标记值
///
/// 上电后、回零之前设备无法给出绝对位置，此时该字段为 0xFFFF。
pub const POSITION_NOT_ESTABLISHED: u16 = 0xFFFF;

/// 下行频率字段最大值（4 bit）
pub const MAX_FREQUENCY_CODE: u8 = 0x0F;
