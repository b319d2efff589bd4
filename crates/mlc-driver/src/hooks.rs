//! 钩子系统
//!
//! IO 线程在产生事件、写出帧时调用已注册的回调。
//! 回调在 IO 线程内同步执行，必须立即返回；需要耗时处理时使用
//! [`ChannelEventHook`] 把事件转发到通道，由订阅者线程消费。
//!
//! ```rust
//! use mlc_driver::hooks::{ChannelEventHook, EventCallback, HookManager};
//! use std::sync::Arc;
//!
//! let mut hooks = HookManager::new();
//! let (hook, rx) = ChannelEventHook::new(1024);
//! hooks.add_callback(Arc::new(hook));
//! assert_eq!(hooks.len(), 1);
//! # drop(rx);
//! ```

use crate::event::MlcEvent;
use crossbeam_channel::{
    Receiver, RecvTimeoutError, Sender, TryIter, TryRecvError, TrySendError, bounded,
};
use mlc_model::Layer;
use mlc_protocol::MlcFrame;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// 事件回调
pub trait EventCallback: Send + Sync {
    /// 收到事件时调用（IO 线程内，不得阻塞）
    fn on_event(&self, event: &MlcEvent);

    /// 一帧写入串口成功后调用
    fn on_frame_sent(&self, layer: Layer, frame: &MlcFrame) {
        let _ = (layer, frame);
    }
}

/// 钩子管理器
///
/// 本身不是线程安全的，由 `RwLock<HookManager>` 保护。
#[derive(Default)]
pub struct HookManager {
    callbacks: Vec<Arc<dyn EventCallback>>,
}

impl HookManager {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    pub fn add_callback(&mut self, callback: Arc<dyn EventCallback>) {
        self.callbacks.push(callback);
    }

    pub fn clear(&mut self) {
        self.callbacks.clear();
    }

    /// 把事件分发给所有回调
    pub fn trigger_all(&self, event: &MlcEvent) {
        for callback in self.callbacks.iter() {
            callback.on_event(event);
        }
    }

    /// 通知所有回调一帧已写出
    pub fn trigger_all_sent(&self, layer: Layer, frame: &MlcFrame) {
        for callback in self.callbacks.iter() {
            callback.on_frame_sent(layer, frame);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

/// 把事件转发到有界通道的钩子
///
/// 通道满时丢弃事件并计数，不阻塞 IO 线程。
pub struct ChannelEventHook {
    tx: Sender<MlcEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ChannelEventHook {
    /// 创建钩子和对应的接收端
    pub fn new(capacity: usize) -> (Self, Receiver<MlcEvent>) {
        let (tx, rx) = bounded(capacity);
        let hook = Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        };
        (hook, rx)
    }

    /// 因通道满而丢弃的事件数
    pub fn dropped_events(&self) -> &Arc<AtomicU64> {
        &self.dropped_events
    }
}

impl EventCallback for ChannelEventHook {
    fn on_event(&self, event: &MlcEvent) {
        match self.tx.try_send(event.clone()) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {},
            Err(TrySendError::Full(_)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
            },
        }
    }
}

/// 事件订阅：接收端加上对应钩子的丢弃计数
///
/// 由 [`MlcSession::subscribe`](crate::MlcSession::subscribe) 创建。
#[derive(Debug, Clone)]
pub struct Subscription {
    events: Receiver<MlcEvent>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    pub fn new(events: Receiver<MlcEvent>, dropped: Arc<AtomicU64>) -> Self {
        Self { events, dropped }
    }

    pub fn try_recv(&self) -> Result<MlcEvent, TryRecvError> {
        self.events.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<MlcEvent, RecvTimeoutError> {
        self.events.recv_timeout(timeout)
    }

    /// 取出当前已排队的全部事件（不阻塞）
    pub fn try_iter(&self) -> TryIter<'_, MlcEvent> {
        self.events.try_iter()
    }

    pub fn receiver(&self) -> &Receiver<MlcEvent> {
        &self.events
    }

    /// 通道满而被丢弃的事件总数
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ResponseFault;
    use mlc_model::Side;
    use mlc_protocol::GetStateCommand;

    #[derive(Debug)]
    struct CountingCallback {
        events: Arc<AtomicU64>,
        sent: Arc<AtomicU64>,
    }

    impl EventCallback for CountingCallback {
        fn on_event(&self, _event: &MlcEvent) {
            self.events.fetch_add(1, Ordering::Relaxed);
        }

        fn on_frame_sent(&self, _layer: Layer, _frame: &MlcFrame) {
            self.sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn switch_event() -> MlcEvent {
        MlcEvent::SwitchChanged {
            address: 1,
            layer: Layer::Layer1,
            side: Side::Side1,
            pressed: true,
        }
    }

    #[test]
    fn test_hook_manager_trigger() {
        let mut hooks = HookManager::new();
        assert!(hooks.is_empty());

        let events = Arc::new(AtomicU64::new(0));
        let sent = Arc::new(AtomicU64::new(0));
        hooks.add_callback(Arc::new(CountingCallback {
            events: events.clone(),
            sent: sent.clone(),
        }));
        assert_eq!(hooks.len(), 1);

        hooks.trigger_all(&switch_event());
        hooks.trigger_all_sent(Layer::Layer1, &GetStateCommand::new(1).to_frame());
        assert_eq!(events.load(Ordering::Relaxed), 1);
        assert_eq!(sent.load(Ordering::Relaxed), 1);

        hooks.clear();
        assert!(hooks.is_empty());
    }

    #[test]
    fn test_channel_hook_forwards_and_counts_drops() {
        let (hook, rx) = ChannelEventHook::new(1);
        let dropped = hook.dropped_events().clone();

        hook.on_event(&switch_event());
        hook.on_event(&MlcEvent::CommandDropped {
            layer: Layer::Layer1,
            frame: GetStateCommand::new(1).to_frame(),
            fault: ResponseFault::CrcMismatch,
        });

        assert_eq!(rx.try_recv().unwrap(), switch_event());
        assert!(rx.try_recv().is_err());
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_channel_hook_ignores_closed_receiver() {
        let (hook, rx) = ChannelEventHook::new(1);
        drop(rx);
        hook.on_event(&switch_event());
        assert_eq!(hook.dropped_events().load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_subscription_reports_drops() {
        let (hook, rx) = ChannelEventHook::new(2);
        let subscription = Subscription::new(rx, hook.dropped_events().clone());

        for _ in 0..5 {
            hook.on_event(&switch_event());
        }
        assert_eq!(subscription.try_iter().count(), 2);
        assert_eq!(subscription.dropped_events(), 3);

        hook.on_event(&switch_event());
        assert_eq!(subscription.try_recv().unwrap(), switch_event());
        assert_eq!(subscription.dropped_events(), 3);
    }
}
