//! CRC16 校验
//!
//! 初值 0xFFFF，逐字节异或后右移 8 次，移出位为 1 时异或 0xA001。

use crate::constants::{FRAME_LEN, OFFSET_CRC_HIGH, OFFSET_CRC_LOW, PAYLOAD_LEN};

/// CRC16 初值
pub const CRC16_INIT: u16 = 0xFFFF;

/// 反射多项式
pub const CRC16_POLY: u16 = 0xA001;

/// 单字节更新
#[inline]
pub fn update_crc16(mut crc: u16, byte: u8) -> u16 {
    crc ^= byte as u16;
    for _ in 0..8 {
        if crc & 1 != 0 {
            crc = (crc >> 1) ^ CRC16_POLY;
        } else {
            crc >>= 1;
        }
    }
    crc
}

/// 计算整段数据的 CRC16
pub fn crc16(bytes: &[u8]) -> u16 {
    bytes.iter().fold(CRC16_INIT, |crc, &b| update_crc16(crc, b))
}

/// 校验一帧的 CRC
///
/// 长度不是 11 字节时直接返回 `false`。
pub fn check_crc16(frame: &[u8]) -> bool {
    if frame.len() != FRAME_LEN {
        return false;
    }
    let computed = crc16(&frame[..PAYLOAD_LEN]);
    let carried = u16::from_le_bytes([frame[OFFSET_CRC_LOW], frame[OFFSET_CRC_HIGH]]);
    computed == carried
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_modbus_check_value() {
        // Modbus CRC16 标准校验值
        assert_eq!(crc16(b"123456789"), 0x4B37);
    }

    #[test]
    fn test_crc16_empty_is_init() {
        assert_eq!(crc16(&[]), CRC16_INIT);
    }

    #[test]
    fn test_update_is_incremental() {
        let data = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        let mut crc = CRC16_INIT;
        for b in data {
            crc = update_crc16(crc, b);
        }
        assert_eq!(crc, crc16(&data));
        // 01 03 00 00 00 0A 的 Modbus CRC 为 0xCDC5（线上字节序 C5 CD）
        assert_eq!(crc, 0xCDC5);
    }

    #[test]
    fn test_check_crc16_wrong_length() {
        assert!(!check_crc16(&[0u8; 10]));
        assert!(!check_crc16(&[0u8; 12]));
    }
}
