//! Pipeline IO 循环模块
//!
//! 每层一个 IO 线程：从命令通道取指令交给调度器，写串口、读应答、
//! 检查超时，并把事件分发给钩子。

use crate::dispatcher::{CommandDispatcher, DispatchStats, RetryPolicy};
use crate::event::MlcEvent;
use crate::hooks::HookManager;
use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, TryRecvError};
use mlc_model::{Layer, LeavesCollection};
use mlc_protocol::MlcFrame;
use mlc_serial::{SerialAdapter, SerialError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// Pipeline 配置
///
/// ```
/// use mlc_driver::PipelineConfig;
/// use std::time::Duration;
///
/// let config = PipelineConfig {
///     state_poll_interval: Some(Duration::from_millis(500)),
///     ..Default::default()
/// };
/// assert_eq!(config.queue_capacity, 256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// 调度队列容量（命令通道容量相同）
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
    /// 空闲时一次循环的休眠时间
    pub poll_interval: Duration,
    /// 队列空闲多久后自动查询整层状态，`None` 表示关闭
    pub state_poll_interval: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(2),
            state_poll_interval: None,
        }
    }
}

/// 单层共享上下文（会话线程与 IO 线程之间）
pub struct LayerContext {
    pub layer: Layer,
    /// 本层的叶片（IO 线程写入应答，会话线程读取或修改目标位置）
    pub leaves: RwLock<LeavesCollection>,
    pub hooks: RwLock<HookManager>,
    /// 最近一次发布的调度统计
    pub stats: ArcSwap<DispatchStats>,
    /// 提交给本层的指令总数（含自动状态查询）
    pub submitted: AtomicU64,
}

impl LayerContext {
    pub fn new(layer: Layer, leaves: LeavesCollection) -> Self {
        Self {
            layer,
            leaves: RwLock::new(leaves),
            hooks: RwLock::new(HookManager::new()),
            stats: ArcSwap::from_pointee(DispatchStats::default()),
            submitted: AtomicU64::new(0),
        }
    }

    /// 所有已提交的指令都已结束
    pub fn is_settled(&self) -> bool {
        self.stats.load().completed() >= self.submitted.load(Ordering::Acquire)
    }

    fn publish(&self, events: &[MlcEvent]) {
        if events.is_empty() {
            return;
        }
        if let Ok(hooks) = self.hooks.read() {
            for event in events {
                hooks.trigger_all(event);
            }
        }
    }
}

/// IO 线程循环
///
/// 命令通道断开或 `is_running` 变为 false 时退出，退出前丢弃所有未完成的指令。
pub fn io_loop(
    mut adapter: impl SerialAdapter,
    cmd_rx: Receiver<MlcFrame>,
    ctx: Arc<LayerContext>,
    config: PipelineConfig,
    is_running: Arc<AtomicBool>,
) {
    let layer = ctx.layer;
    let mut dispatcher = CommandDispatcher::new(layer, config.queue_capacity, config.retry);
    let mut buf = [0u8; 64];
    let mut idle_since: Option<Instant> = None;

    debug!("{}: IO loop started on {}", layer, adapter.name());

    loop {
        if !is_running.load(Ordering::Acquire) {
            trace!("{}: is_running flag is false, exiting", layer);
            break;
        }

        // ============================================================
        // 1. 命令通道 → 调度队列
        // ============================================================
        if drain_command_channel(&cmd_rx, &mut dispatcher) {
            trace!("{}: command channel disconnected, exiting", layer);
            break;
        }

        // ============================================================
        // 2. 写出（广播完成后连续发送下一条）
        // ============================================================
        let mut events = Vec::new();
        while let Some(frame) = dispatcher.poll_transmit(Instant::now()) {
            match adapter.write_frame(&frame) {
                Ok(()) => {
                    dispatcher.on_transmit_complete(Instant::now());
                    if let Ok(hooks) = ctx.hooks.read() {
                        hooks.trigger_all_sent(layer, &frame);
                    }
                },
                Err(e) => {
                    error!("{}: failed to write frame: {}", layer, e);
                    events.extend(dispatcher.on_transmit_failed());
                },
            }
        }

        // ============================================================
        // 3. 读应答
        // ============================================================
        let received = match adapter.read_available(&mut buf) {
            Ok(n) => n,
            Err(SerialError::Timeout) => 0,
            Err(e) => {
                error!("{}: serial read error: {}", layer, e);
                if is_fatal(&e) {
                    is_running.store(false, Ordering::Release);
                    break;
                }
                0
            },
        };
        if received > 0 {
            match ctx.leaves.write() {
                Ok(mut leaves) => {
                    events.extend(dispatcher.on_bytes_received(&buf[..received], &mut leaves));
                },
                Err(_) => {
                    error!("{}: leaves lock poisoned, exiting", layer);
                    break;
                },
            }
        }

        // ============================================================
        // 4. 超时
        // ============================================================
        events.extend(dispatcher.on_tick(Instant::now()));

        ctx.publish(&events);
        ctx.stats.store(Arc::new(dispatcher.stats()));

        // ============================================================
        // 5. 空闲：定时查询整层状态
        // ============================================================
        if dispatcher.is_idle() && cmd_rx.is_empty() {
            if let Some(interval) = config.state_poll_interval {
                let since = *idle_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= interval {
                    enqueue_state_poll(&ctx, &mut dispatcher);
                    idle_since = None;
                }
            }
            if received == 0 {
                spin_sleep::sleep(config.poll_interval);
            }
        } else {
            idle_since = None;
        }
    }

    let discarded = dispatcher.reset();
    if discarded > 0 {
        warn!("{}: discarded {} unfinished commands on close", layer, discarded);
    }
    ctx.stats.store(Arc::new(dispatcher.stats()));
    debug!("{}: IO loop exited", layer);
}

/// 从命令通道取出指令直到调度队列满
///
/// 返回命令通道是否已断开。
fn drain_command_channel(cmd_rx: &Receiver<MlcFrame>, dispatcher: &mut CommandDispatcher) -> bool {
    while dispatcher.has_capacity() {
        match cmd_rx.try_recv() {
            Ok(frame) => {
                // has_capacity 已检查
                let _ = dispatcher.enqueue(frame);
            },
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => return true,
        }
    }
    false
}

fn enqueue_state_poll(ctx: &LayerContext, dispatcher: &mut CommandDispatcher) {
    let frames = match ctx.leaves.read() {
        Ok(leaves) => leaves.states_for_layer(ctx.layer),
        Err(_) => return,
    };
    let mut queued = 0u64;
    for frame in frames {
        if dispatcher.enqueue(frame).is_err() {
            break;
        }
        queued += 1;
    }
    ctx.submitted.fetch_add(queued, Ordering::AcqRel);
    trace!("{}: queued {} state queries", ctx.layer, queued);
}

fn is_fatal(err: &SerialError) -> bool {
    match err {
        SerialError::Closed => true,
        SerialError::Device(e) => e.is_fatal(),
        SerialError::Io(_) | SerialError::Timeout => false,
    }
}
