//! 叶片与叶片对

use crate::{Layer, ModelError, Side};
use mlc_protocol::{
    GetStateCommand, LeafStateReport, MotionCommand, MotionDirection, SetParametersCommand,
};

/// 单个叶片
///
/// `address`、`side`、`layer` 在创建后不可修改，其余字段由
/// 上层（形状生成、指令下发）和状态应答共同更新。
///
/// 位置单位均为内部步数；0 表示完全退回到本侧限位开关。
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    address: u8,
    side: Side,
    layer: Layer,

    // === 指令意图（下发设置参数指令时使用） ===
    /// 目标位置（步数）
    pub required_position: i32,
    /// 频率码（4 bit）
    pub frequency: u8,
    pub step_mode: bool,
    pub direction: MotionDirection,
    pub reset: bool,
    pub enabled: bool,

    // === 标定 ===
    /// 标定步数（未标定为 `None`）
    pub calibration_steps: Option<i32>,

    // === 最近一次状态应答 ===
    /// 设备报告的当前位置，`None` 表示上电后尚未建立
    pub current_position: Option<i32>,
    pub status: u8,
    pub encoder_counts: u16,
    pub steps_left: u16,
    /// 限位开关是否按下
    pub switch_state: bool,
    pub encoder_direction: MotionDirection,
    pub state_direction: MotionDirection,
    pub state_step_mode: bool,
    pub state_reset: bool,
    pub state_enabled: bool,
}

/// 应用一次状态应答后发生的变化
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeafChanges {
    /// 实际位置是否变化（含已知 ↔ 未知）
    pub position_changed: bool,
    /// 限位开关状态是否变化
    pub switch_changed: bool,
}

impl LeafChanges {
    pub fn any(&self) -> bool {
        self.position_changed || self.switch_changed
    }
}

impl Leaf {
    pub const DEFAULT_FREQUENCY: u8 = 7;

    pub fn new(address: u8, side: Side, layer: Layer) -> Self {
        Self {
            address,
            side,
            layer,
            required_position: 0,
            frequency: Self::DEFAULT_FREQUENCY,
            step_mode: false,
            direction: MotionDirection::AwayFromSwitch,
            reset: false,
            enabled: true,
            calibration_steps: None,
            current_position: None,
            status: 0,
            encoder_counts: 0,
            steps_left: 0,
            switch_state: false,
            encoder_direction: MotionDirection::TowardSwitch,
            state_direction: MotionDirection::TowardSwitch,
            state_step_mode: false,
            state_reset: false,
            state_enabled: false,
        }
    }

    pub fn with_calibration(mut self, calibration_steps: i32) -> Self {
        self.calibration_steps = Some(calibration_steps);
        self
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    /// 叶片是否正在运动
    pub fn is_moving(&self) -> bool {
        self.steps_left > 0
    }

    /// 实际当前位置（步数）
    ///
    /// - 限位开关按下：0（覆盖设备报告的旧位置）
    /// - 位置未建立：`None`
    /// - 静止：设备报告的位置
    /// - 离开开关运动（指令方向与编码器方向一致）：位置 + 2×编码器计数
    /// - 朝向开关运动：位置 − 2×编码器计数
    /// - 两个方向不一致：`None`
    pub fn actual_current_position(&self) -> Option<i32> {
        if self.switch_state {
            return Some(0);
        }
        let position = self.current_position?;
        if !self.is_moving() {
            return Some(position);
        }

        let correction = 2 * i32::from(self.encoder_counts);
        match (self.state_direction, self.encoder_direction) {
            (MotionDirection::AwayFromSwitch, MotionDirection::AwayFromSwitch) => {
                Some(position + correction)
            },
            (MotionDirection::TowardSwitch, MotionDirection::TowardSwitch) => {
                Some(position - correction)
            },
            _ => None,
        }
    }

    /// 目标位置与实际位置之差
    ///
    /// 实际位置未知时返回 0，调用方需先检查 `actual_current_position()`。
    pub fn relative_movement(&self) -> i32 {
        match self.actual_current_position() {
            Some(actual) => self.required_position - actual,
            None => 0,
        }
    }

    /// 绝对定位：以 `required_position` 为步数的设置参数指令
    pub fn set_parameters_command(&self) -> SetParametersCommand {
        self.parameters_with(clamp_steps(self.required_position), self.direction)
    }

    /// 相对定位：以 `|relative_movement()|` 为步数，方向由符号决定
    ///
    /// 差值为 0 时沿用叶片当前的方向位。
    pub fn set_relative_parameters_command(&self) -> SetParametersCommand {
        let movement = self.relative_movement();
        let direction = match movement.signum() {
            1 => MotionDirection::AwayFromSwitch,
            -1 => MotionDirection::TowardSwitch,
            _ => self.direction,
        };
        self.parameters_with(clamp_steps(movement.saturating_abs()), direction)
    }

    pub fn get_state_command(&self) -> GetStateCommand {
        GetStateCommand::new(self.address)
    }

    pub fn start_command(&self) -> MotionCommand {
        MotionCommand::start(self.address)
    }

    pub fn stop_command(&self) -> MotionCommand {
        MotionCommand::stop(self.address)
    }

    fn parameters_with(&self, steps: u16, direction: MotionDirection) -> SetParametersCommand {
        SetParametersCommand::new(self.address, steps)
            .with_frequency(self.frequency)
            .with_step_mode(self.step_mode)
            .with_direction(direction)
            .with_reset(self.reset)
            .with_enabled(self.enabled)
    }

    /// 应用一帧状态应答
    ///
    /// 调用方负责保证应答地址与本叶片一致。
    pub fn apply_report(&mut self, report: &LeafStateReport) -> LeafChanges {
        let old_position = self.actual_current_position();
        let old_switch = self.switch_state;

        self.status = report.status;
        self.encoder_direction = report.encoder_direction;
        self.switch_state = report.switch_pressed;
        self.state_reset = report.reset;
        self.state_step_mode = report.step_mode;
        self.state_direction = report.direction;
        self.state_enabled = report.enabled;
        self.steps_left = report.steps_left;
        self.encoder_counts = report.encoder_counts;
        self.current_position = report.current_position.map(i32::from);

        LeafChanges {
            position_changed: old_position != self.actual_current_position(),
            switch_changed: old_switch != self.switch_state,
        }
    }
}

fn clamp_steps(steps: i32) -> u16 {
    steps.clamp(0, i32::from(u16::MAX)) as u16
}

/// 叶片对：同一层、同一序号上相对的两片叶片
#[derive(Debug, Clone, PartialEq)]
pub struct PairOfLeaves {
    side1: Leaf,
    side2: Leaf,
}

impl PairOfLeaves {
    /// 创建叶片对，两片叶片必须同层且分别位于两侧
    pub fn new(side1: Leaf, side2: Leaf) -> Result<Self, ModelError> {
        if side1.side() != Side::Side1 || side2.side() != Side::Side2 {
            return Err(ModelError::InvalidPair(format!(
                "expected (side1, side2), got ({}, {})",
                side1.side(),
                side2.side()
            )));
        }
        if side1.layer() != side2.layer() {
            return Err(ModelError::InvalidPair(format!(
                "leaves belong to different layers ({} vs {})",
                side1.layer(),
                side2.layer()
            )));
        }
        Ok(Self { side1, side2 })
    }

    pub fn layer(&self) -> Layer {
        self.side1.layer()
    }

    pub fn leaf(&self, side: Side) -> &Leaf {
        match side {
            Side::Side1 => &self.side1,
            Side::Side2 => &self.side2,
        }
    }

    pub fn leaf_mut(&mut self, side: Side) -> &mut Leaf {
        match side {
            Side::Side1 => &mut self.side1,
            Side::Side2 => &mut self.side2,
        }
    }

    pub fn leaves(&self) -> [&Leaf; 2] {
        [&self.side1, &self.side2]
    }

    /// 按地址查找本对中的叶片
    pub fn side_of(&self, address: u8) -> Option<Side> {
        Side::ALL
            .into_iter()
            .find(|&side| self.leaf(side).address() == address)
    }
}
