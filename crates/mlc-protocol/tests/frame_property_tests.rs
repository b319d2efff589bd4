//! 帧编码的属性测试
//!
//! 使用 proptest 验证 CRC16 与帧字段的性质。

use mlc_protocol::{
    LeafStateReport, MlcFrame, MotionDirection, OutboundCommand, SetParametersCommand,
    check_crc16, crc16,
};
use proptest::prelude::*;

proptest! {
    /// 正确附加 CRC 的帧必须通过校验
    #[test]
    fn crc_accepts_appended_checksum(payload in prop::array::uniform9(any::<u8>())) {
        let frame = MlcFrame::from_payload(payload);
        prop_assert!(check_crc16(&frame.data));
        prop_assert_eq!(frame.crc(), crc16(&payload));
    }

    /// 字节 0-10 中任意单 bit 翻转都必须被拒绝
    #[test]
    fn crc_rejects_single_bit_flip(
        payload in prop::array::uniform9(any::<u8>()),
        byte in 0usize..11,
        bit in 0u8..8,
    ) {
        let mut frame = MlcFrame::from_payload(payload);
        frame.data[byte] ^= 1 << bit;
        prop_assert!(!check_crc16(&frame.data));
        prop_assert!(frame.validate_crc().is_err());
    }

    /// 设置参数指令的步数以小端写入 Byte 4-5
    #[test]
    fn set_parameters_steps_little_endian(address in 1u8..=255, steps in any::<u16>()) {
        let frame = SetParametersCommand::new(address, steps).to_frame();
        prop_assert_eq!(frame.data[4], (steps & 0xFF) as u8);
        prop_assert_eq!(frame.data[5], (steps >> 8) as u8);
        prop_assert_eq!(frame.data[3], 0);
    }

    /// 下行帧可以被解析回同样的参数
    #[test]
    fn set_parameters_parse_back(
        address in 1u8..=255,
        steps in any::<u16>(),
        frequency in 0u8..16,
        step_mode in any::<bool>(),
        away in any::<bool>(),
        reset in any::<bool>(),
        enabled in any::<bool>(),
    ) {
        let frame = SetParametersCommand::new(address, steps)
            .with_frequency(frequency)
            .with_step_mode(step_mode)
            .with_direction(MotionDirection::from_bit(away))
            .with_reset(reset)
            .with_enabled(enabled)
            .to_frame();

        let OutboundCommand::SetParameters(cmd) = OutboundCommand::try_from(frame).unwrap() else {
            return Err(TestCaseError::fail("not a SetParameters frame"));
        };
        prop_assert_eq!(cmd.address, address);
        prop_assert_eq!(cmd.steps, steps);
        prop_assert_eq!(cmd.frequency(), frequency);
        prop_assert_eq!(cmd.flags.step_mode(), step_mode);
        prop_assert_eq!(cmd.direction(), MotionDirection::from_bit(away));
        prop_assert_eq!(cmd.flags.reset(), reset);
        prop_assert_eq!(cmd.flags.enabled(), enabled);
    }

    /// 上行帧的 16 位字段为大端
    #[test]
    fn report_fields_big_endian(
        steps_left in any::<u16>(),
        encoder_counts in any::<u16>(),
        position in 0u16..0xFFFF,
    ) {
        let mut payload = [0u8; 9];
        payload[0] = 8;
        payload[2] = 0x07;
        payload[3..5].copy_from_slice(&steps_left.to_be_bytes());
        payload[5..7].copy_from_slice(&encoder_counts.to_be_bytes());
        payload[7..9].copy_from_slice(&position.to_be_bytes());
        let report = LeafStateReport::try_from(MlcFrame::from_payload(payload)).unwrap();
        prop_assert_eq!(report.steps_left, steps_left);
        prop_assert_eq!(report.encoder_counts, encoder_counts);
        prop_assert_eq!(report.current_position, Some(position));
    }
}
