//! Mock 串口（无硬件依赖）
//!
//! `MockLink` 是一条内存链路：记录所有写出的帧，并把脚本化的应答字节
//! 交给 `MockSerialAdapter::read_available`。可以挂一个应答器
//! （`Responder`），在每次写帧时自动生成应答。
//!
//! `SimulatedDevice` 是一个现成的应答器，模拟一整层叶片的行为。

use crate::{MlcFrame, SerialAdapter, SerialError};
use mlc_protocol::{
    BroadcastKind, LeafStateReport, MotionAction, MotionDirection, OutboundCommand,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// 写帧时触发的应答器，返回需要放入接收缓冲区的字节
pub type Responder = Box<dyn FnMut(&MlcFrame) -> Vec<u8> + Send>;

#[derive(Default)]
struct LinkState {
    written: Vec<MlcFrame>,
    rx: VecDeque<u8>,
    responder: Option<Responder>,
    fail_writes: bool,
    closed: bool,
}

/// 共享的内存链路句柄（测试端与适配器各持一份）
#[derive(Clone, Default)]
pub struct MockLink {
    state: Arc<Mutex<LinkState>>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 基于该链路创建适配器
    pub fn adapter(&self) -> MockSerialAdapter {
        MockSerialAdapter {
            link: self.clone(),
            read_timeout: Duration::from_millis(1),
            name: "mock".to_string(),
        }
    }

    /// 向接收缓冲区追加字节（模拟设备发来的数据）
    pub fn push_rx(&self, bytes: &[u8]) {
        self.state.lock().rx.extend(bytes.iter().copied());
    }

    /// 追加一帧应答
    pub fn push_frame(&self, frame: &MlcFrame) {
        self.push_rx(frame.as_bytes());
    }

    /// 已写出的全部帧（按时间顺序）
    pub fn written_frames(&self) -> Vec<MlcFrame> {
        self.state.lock().written.clone()
    }

    /// 取走并清空已写出的帧
    pub fn take_written(&self) -> Vec<MlcFrame> {
        std::mem::take(&mut self.state.lock().written)
    }

    /// 接收缓冲区中尚未被读取的字节数
    pub fn pending_rx(&self) -> usize {
        self.state.lock().rx.len()
    }

    pub fn set_responder(&self, responder: impl FnMut(&MlcFrame) -> Vec<u8> + Send + 'static) {
        self.state.lock().responder = Some(Box::new(responder));
    }

    pub fn clear_responder(&self) {
        self.state.lock().responder = None;
    }

    /// 让之后的写操作失败（模拟串口拔出）
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// 关闭链路，之后的读写返回 `SerialError::Closed`
    pub fn close(&self) {
        self.state.lock().closed = true;
    }
}

/// 内存链路上的串口适配器
pub struct MockSerialAdapter {
    link: MockLink,
    read_timeout: Duration,
    name: String,
}

impl MockSerialAdapter {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn link(&self) -> &MockLink {
        &self.link
    }
}

impl SerialAdapter for MockSerialAdapter {
    fn write_frame(&mut self, frame: &MlcFrame) -> Result<(), SerialError> {
        let mut guard = self.link.state.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(SerialError::Closed);
        }
        if state.fail_writes {
            return Err(SerialError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }
        trace!("{} TX {:02X?}", self.name, frame.data);
        state.written.push(*frame);
        if let Some(responder) = state.responder.as_mut() {
            let reply = responder(frame);
            state.rx.extend(reply);
        }
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        {
            let mut state = self.link.state.lock();
            if state.closed {
                return Err(SerialError::Closed);
            }
            if !state.rx.is_empty() {
                let n = buf.len().min(state.rx.len());
                for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
        }
        // 模拟读超时
        if !self.read_timeout.is_zero() {
            std::thread::sleep(self.read_timeout);
        }
        Ok(0)
    }

    fn clear(&mut self) -> Result<(), SerialError> {
        self.link.state.lock().rx.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// 模拟设备
// ============================================================================

/// 单个模拟叶片
#[derive(Debug, Clone, Copy)]
struct SimLeaf {
    position: u16,
    pending_steps: u16,
    direction: MotionDirection,
    step_mode: bool,
    enabled: bool,
    frequency: u8,
}

impl SimLeaf {
    fn at_home() -> Self {
        Self {
            position: 0,
            pending_steps: 0,
            direction: MotionDirection::TowardSwitch,
            step_mode: false,
            enabled: true,
            frequency: 7,
        }
    }

    /// 立即走完待执行的步数
    fn run(&mut self) {
        self.position = match self.direction {
            MotionDirection::AwayFromSwitch => self.position.saturating_add(self.pending_steps),
            MotionDirection::TowardSwitch => self.position.saturating_sub(self.pending_steps),
        };
        self.pending_steps = 0;
    }

    fn report(&self, address: u8) -> LeafStateReport {
        LeafStateReport {
            address,
            status: self.frequency,
            encoder_direction: self.direction,
            switch_pressed: self.position == 0,
            reset: false,
            step_mode: self.step_mode,
            direction: self.direction,
            enabled: self.enabled,
            steps_left: 0,
            encoder_counts: 0,
            current_position: Some(self.position),
        }
    }
}

/// 模拟一层叶片的应答器
///
/// 每个叶片立即完成运动：启动指令到达时位置直接跳到终点。
/// 对寻址指令回送该叶片的状态报告，对广播指令不应答。
#[derive(Debug, Clone, Default)]
pub struct SimulatedDevice {
    leaves: BTreeMap<u8, SimLeaf>,
}

impl SimulatedDevice {
    /// 创建模拟设备，所有叶片位于零位（限位开关按下）
    pub fn new(addresses: impl IntoIterator<Item = u8>) -> Self {
        Self {
            leaves: addresses
                .into_iter()
                .map(|address| (address, SimLeaf::at_home()))
                .collect(),
        }
    }

    /// 模拟叶片的当前位置
    pub fn position(&self, address: u8) -> Option<u16> {
        self.leaves.get(&address).map(|leaf| leaf.position)
    }

    /// 处理一帧下行指令，返回应答字节
    pub fn respond(&mut self, frame: &MlcFrame) -> Vec<u8> {
        let Ok(command) = OutboundCommand::try_from(*frame) else {
            // 设备丢弃无法解析的帧
            return Vec::new();
        };

        if let OutboundCommand::Broadcast(cmd) = command {
            for leaf in self.leaves.values_mut() {
                match cmd.kind {
                    BroadcastKind::Start => leaf.run(),
                    BroadcastKind::Stop => leaf.pending_steps = 0,
                    BroadcastKind::Open => {
                        leaf.position = 0;
                        leaf.pending_steps = 0;
                    },
                }
            }
            return Vec::new();
        }

        let address = command.address();
        let Some(leaf) = self.leaves.get_mut(&address) else {
            return Vec::new();
        };

        match command {
            OutboundCommand::SetParameters(cmd) => {
                leaf.pending_steps = cmd.steps;
                leaf.direction = cmd.direction();
                leaf.step_mode = cmd.flags.step_mode();
                leaf.enabled = cmd.flags.enabled();
                leaf.frequency = cmd.frequency();
            },
            OutboundCommand::Motion(cmd) => match cmd.action {
                MotionAction::Start => leaf.run(),
                MotionAction::Stop => leaf.pending_steps = 0,
            },
            OutboundCommand::GetState(_) | OutboundCommand::Broadcast(_) => {},
        }

        leaf.report(address).to_frame().data.to_vec()
    }

    /// 挂到链路上，之后每次写帧自动应答
    pub fn attach(self, link: &MockLink) -> Arc<Mutex<SimulatedDevice>> {
        let shared = Arc::new(Mutex::new(self));
        let device = shared.clone();
        link.set_responder(move |frame| device.lock().respond(frame));
        shared
    }
}
