//! 指令调度器
//!
//! 单层串口上的指令状态机，本身不做任何 IO：
//!
//! ```text
//! Idle ──enqueue──► Ready ──poll_transmit──► Transmitting ──on_transmit_complete──► AwaitingResponse
//!   ▲                                            │ (广播：直接完成)                     │
//!   └──────────────── 应答通过 CRC + 地址校验 ◄───┴──────────────────────────────────────┘
//!                                                                                       │ CRC/地址错误、超时
//!                                                              RetransmitPending ◄──────┘ (未用尽重发次数)
//! ```
//!
//! - 同一时刻最多一条指令在途；队头指令发出时即出队，保存为在途副本
//! - 应答校验失败时不重新入队，而是在队列之外重发同一帧，
//!   次数由 [`RetryPolicy::max_retransmits`] 决定；用尽后产生 `CommandDropped`
//! - 广播指令（地址 0）没有应答，写出即完成
//! - 不足一帧的应答字节留在缓冲区，等待后续字节

use crate::error::DriverError;
use crate::event::{MlcEvent, ResponseFault};
use mlc_model::{Layer, Leaf, LeavesCollection};
use mlc_protocol::{FRAME_LEN, LeafStateReport, MlcFrame, ProtocolError};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// 应答校验失败后的重发策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 每条指令在队列之外最多重发的次数
    pub max_retransmits: u32,
    /// 等待应答的超时，`None` 表示一直等待
    pub response_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_RETRANSMITS: u32 = 1;
    pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(200);
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retransmits: Self::DEFAULT_MAX_RETRANSMITS,
            response_timeout: Some(Self::DEFAULT_RESPONSE_TIMEOUT),
        }
    }
}

/// 调度器状态（对外观察用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// 队列为空且没有在途指令
    Idle,
    /// 队列非空，等待下一次发送
    Ready,
    /// 在途指令正在写出
    Transmitting,
    /// 等待在途指令的应答
    AwaitingResponse,
    /// 应答校验失败，等待重发
    RetransmitPending,
}

/// 调度统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// 首次发出的指令数（不含重发）
    pub sent: u64,
    /// 收到有效应答的指令数
    pub confirmed: u64,
    /// 重发次数
    pub retransmitted: u64,
    /// 被丢弃的指令数
    pub dropped: u64,
    /// 完成的广播指令数
    pub broadcasts: u64,
    /// 丢弃的多余 / 无主应答字节数
    pub discarded_bytes: u64,
    /// 当前排队的指令数
    pub queued: usize,
    /// 当前是否有在途指令
    pub in_flight: bool,
}

impl DispatchStats {
    /// 已结束（确认、丢弃或广播完成）的指令数
    pub fn completed(&self) -> u64 {
        self.confirmed + self.dropped + self.broadcasts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Transmitting,
    AwaitingResponse,
    RetransmitPending,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    frame: MlcFrame,
    retransmits: u32,
    phase: Phase,
    sent_at: Instant,
}

/// 单层指令调度器
pub struct CommandDispatcher {
    layer: Layer,
    queue: VecDeque<MlcFrame>,
    capacity: usize,
    policy: RetryPolicy,
    in_flight: Option<InFlight>,
    rx_buffer: Vec<u8>,
    stats: DispatchStats,
}

impl CommandDispatcher {
    pub fn new(layer: Layer, capacity: usize, policy: RetryPolicy) -> Self {
        Self {
            layer,
            queue: VecDeque::with_capacity(capacity),
            capacity,
            policy,
            in_flight: None,
            rx_buffer: Vec::with_capacity(FRAME_LEN * 2),
            stats: DispatchStats::default(),
        }
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 排队中的指令数（不含在途指令）
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn has_capacity(&self) -> bool {
        self.queue.len() < self.capacity
    }

    /// 队列为空且没有在途指令
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_none()
    }

    /// 当前在途指令
    pub fn in_flight(&self) -> Option<&MlcFrame> {
        self.in_flight.as_ref().map(|f| &f.frame)
    }

    pub fn state(&self) -> DispatchState {
        match &self.in_flight {
            None if self.queue.is_empty() => DispatchState::Idle,
            None => DispatchState::Ready,
            Some(f) => match f.phase {
                Phase::Transmitting => DispatchState::Transmitting,
                Phase::AwaitingResponse => DispatchState::AwaitingResponse,
                Phase::RetransmitPending => DispatchState::RetransmitPending,
            },
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            queued: self.queue.len(),
            in_flight: self.in_flight.is_some(),
            ..self.stats
        }
    }

    /// 指令入队
    pub fn enqueue(&mut self, frame: MlcFrame) -> Result<(), DriverError> {
        if !self.has_capacity() {
            return Err(DriverError::QueueFull {
                layer: self.layer,
                capacity: self.capacity,
            });
        }
        self.queue.push_back(frame);
        Ok(())
    }

    /// 取出下一帧需要写出的数据
    ///
    /// 有待重发的在途指令时返回它；否则在空闲时弹出队头。
    /// 在途指令等待应答期间返回 `None`。
    pub fn poll_transmit(&mut self, now: Instant) -> Option<MlcFrame> {
        if let Some(in_flight) = self.in_flight.as_mut() {
            if in_flight.phase != Phase::RetransmitPending {
                return None;
            }
            in_flight.retransmits += 1;
            in_flight.phase = Phase::Transmitting;
            in_flight.sent_at = now;
            self.stats.retransmitted += 1;
            debug!(
                "{}: retransmitting command for address {} ({}/{})",
                self.layer,
                in_flight.frame.address(),
                in_flight.retransmits,
                self.policy.max_retransmits
            );
            return Some(in_flight.frame);
        }

        let frame = self.queue.pop_front()?;
        self.in_flight = Some(InFlight {
            frame,
            retransmits: 0,
            phase: Phase::Transmitting,
            sent_at: now,
        });
        self.stats.sent += 1;
        trace!(
            "{}: sending code {} to address {}",
            self.layer,
            frame.code(),
            frame.address()
        );
        Some(frame)
    }

    /// 在途指令已写出
    ///
    /// 广播指令至此完成；其它指令开始等待应答。
    pub fn on_transmit_complete(&mut self, now: Instant) {
        let Some(in_flight) = self.in_flight.as_mut() else {
            return;
        };
        if in_flight.phase != Phase::Transmitting {
            return;
        }

        if in_flight.frame.is_broadcast() {
            debug!("{}: broadcast code {} complete", self.layer, in_flight.frame.code());
            self.in_flight = None;
            self.stats.broadcasts += 1;
            return;
        }

        in_flight.phase = Phase::AwaitingResponse;
        in_flight.sent_at = now;
        if !self.rx_buffer.is_empty() {
            self.stats.discarded_bytes += self.rx_buffer.len() as u64;
            self.rx_buffer.clear();
        }
    }

    /// 在途指令写出失败，直接丢弃
    pub fn on_transmit_failed(&mut self) -> Option<MlcEvent> {
        let in_flight = self.in_flight.take()?;
        self.stats.dropped += 1;
        error!(
            "{}: dropping command for address {}: write failed",
            self.layer,
            in_flight.frame.address()
        );
        Some(MlcEvent::CommandDropped {
            layer: self.layer,
            frame: in_flight.frame,
            fault: ResponseFault::WriteFailed,
        })
    }

    /// 处理收到的字节
    ///
    /// 凑满一帧后校验 CRC 与地址；通过则把状态写入叶片集合并产生事件。
    pub fn on_bytes_received(
        &mut self,
        bytes: &[u8],
        leaves: &mut LeavesCollection,
    ) -> Vec<MlcEvent> {
        let mut events = Vec::new();

        let awaiting = matches!(
            self.in_flight,
            Some(InFlight {
                phase: Phase::AwaitingResponse,
                ..
            })
        );
        if !awaiting {
            let stale = self.rx_buffer.len() + bytes.len();
            if stale > 0 {
                trace!("{}: discarding {} unsolicited bytes", self.layer, stale);
                self.stats.discarded_bytes += stale as u64;
                self.rx_buffer.clear();
            }
            return events;
        }

        self.rx_buffer.extend_from_slice(bytes);
        if self.rx_buffer.len() < FRAME_LEN {
            return events;
        }
        let Ok(frame) = MlcFrame::from_bytes(&self.rx_buffer) else {
            return events;
        };
        let extra = self.rx_buffer.len() - FRAME_LEN;
        if extra > 0 {
            trace!("{}: discarding {} trailing bytes", self.layer, extra);
            self.stats.discarded_bytes += extra as u64;
        }
        self.rx_buffer.clear();

        let Some(in_flight) = self.in_flight else {
            return events;
        };
        match LeafStateReport::parse_response(frame, in_flight.frame.address()) {
            Ok(report) => {
                self.in_flight = None;
                self.stats.confirmed += 1;
                trace!("{}: confirmed address {}", self.layer, report.address);
                events.push(MlcEvent::FrameDecoded {
                    layer: self.layer,
                    report,
                });
                self.apply_report(&report, leaves, &mut events);
            },
            Err(ProtocolError::AddressMismatch { expected, actual }) => {
                warn!(
                    "{}: response address {} does not match command address {}",
                    self.layer, actual, expected
                );
                events.extend(self.fail_in_flight(ResponseFault::AddressMismatch { expected, actual }));
            },
            Err(e) => {
                warn!(
                    "{}: invalid response for address {}: {}",
                    self.layer,
                    in_flight.frame.address(),
                    e
                );
                events.extend(self.fail_in_flight(ResponseFault::CrcMismatch));
            },
        }
        events
    }

    /// 周期检查应答超时
    pub fn on_tick(&mut self, now: Instant) -> Option<MlcEvent> {
        let timeout = self.policy.response_timeout?;
        let in_flight = self.in_flight.as_ref()?;
        if in_flight.phase != Phase::AwaitingResponse
            || now.saturating_duration_since(in_flight.sent_at) < timeout
        {
            return None;
        }

        warn!(
            "{}: no response from address {} within {:?}",
            self.layer,
            in_flight.frame.address(),
            timeout
        );
        if !self.rx_buffer.is_empty() {
            self.stats.discarded_bytes += self.rx_buffer.len() as u64;
            self.rx_buffer.clear();
        }
        self.fail_in_flight(ResponseFault::Timeout)
    }

    /// 清空队列、在途指令与接收缓冲区，返回丢弃的指令数
    pub fn reset(&mut self) -> usize {
        let discarded = self.queue.len() + usize::from(self.in_flight.is_some());
        self.queue.clear();
        self.in_flight = None;
        self.rx_buffer.clear();
        if discarded > 0 {
            debug!("{}: discarded {} pending commands", self.layer, discarded);
        }
        discarded
    }

    fn fail_in_flight(&mut self, fault: ResponseFault) -> Option<MlcEvent> {
        let in_flight = self.in_flight.as_mut()?;
        if in_flight.retransmits < self.policy.max_retransmits {
            in_flight.phase = Phase::RetransmitPending;
            return None;
        }

        let frame = in_flight.frame;
        let retransmits = in_flight.retransmits;
        self.in_flight = None;
        self.stats.dropped += 1;
        error!(
            "{}: dropping command for address {} after {} retransmit(s): {}",
            self.layer,
            frame.address(),
            retransmits,
            fault
        );
        Some(MlcEvent::CommandDropped {
            layer: self.layer,
            frame,
            fault,
        })
    }

    fn apply_report(
        &self,
        report: &LeafStateReport,
        leaves: &mut LeavesCollection,
        events: &mut Vec<MlcEvent>,
    ) {
        let Some((_, side, changes)) = leaves.apply_report(self.layer, report) else {
            warn!(
                "{}: response from unknown address {}",
                self.layer, report.address
            );
            return;
        };

        if changes.position_changed {
            let position = leaves
                .leaf_by_address(report.address, self.layer)
                .and_then(Leaf::actual_current_position);
            events.push(MlcEvent::PositionChanged {
                address: report.address,
                layer: self.layer,
                side,
                position,
            });
        }
        if changes.switch_changed {
            events.push(MlcEvent::SwitchChanged {
                address: report.address,
                layer: self.layer,
                side,
                pressed: report.switch_pressed,
            });
        }
    }
}
