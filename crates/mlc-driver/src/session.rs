//! 设备会话
//!
//! 每层一条串口、一个 IO 线程、一个调度器。会话打开时清空链路缓冲区并
//! 以全新的叶片状态启动；关闭（或 drop）时丢弃排队与在途指令并等待线程退出。

use crate::config::{DeviceConfig, SessionConfig};
use crate::dispatcher::DispatchStats;
use crate::error::DriverError;
use crate::hooks::{ChannelEventHook, EventCallback, Subscription};
use crate::pipeline::{LayerContext, PipelineConfig, io_loop};
use crossbeam_channel::{Sender, TrySendError};
use mlc_model::{
    Layer, LeavesCollection, MlcConfig, ModelError, PositionTable, PredefinedShape,
};
use mlc_protocol::{BroadcastCommand, BroadcastKind, MlcFrame};
use mlc_serial::{LinkSettings, SerialAdapter, SerialPortAdapter};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// 带超时的线程 join
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        let (tx, rx) = std::sync::mpsc::channel();
        spawn(move || {
            let _ = tx.send(self.join());
        });
        match rx.recv_timeout(timeout) {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "thread join timeout",
            ))),
        }
    }
}

/// 已打开的串口通道（交给 IO 线程独占）
pub type BoxedAdapter = Box<dyn SerialAdapter + Send>;

/// 单层的通道句柄
struct LayerHandle {
    /// drop 时必须先于 join 关闭，IO 线程才能看到 Disconnected
    cmd_tx: ManuallyDrop<Sender<MlcFrame>>,
    ctx: Arc<LayerContext>,
    io_thread: Option<JoinHandle<()>>,
    is_running: Arc<AtomicBool>,
    port: String,
    capacity: usize,
    /// 入队互斥：批量入队的容量检查与发送之间不能插入其他提交
    submit: Mutex<()>,
}

impl Drop for LayerHandle {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::Release);
        // SAFETY: cmd_tx 只在这里释放一次，之后不再访问
        unsafe {
            ManuallyDrop::drop(&mut self.cmd_tx);
        }

        let join_timeout = Duration::from_secs(2);
        if let Some(handle) = self.io_thread.take()
            && handle.join_timeout(join_timeout).is_err()
        {
            error!(
                "{}: IO thread panicked or failed to shut down within {:?}",
                self.ctx.layer, join_timeout
            );
        }
        info!("{}: closed {}", self.ctx.layer, self.port);
    }
}

/// 准直器设备会话
pub struct MlcSession {
    config: MlcConfig,
    layers: BTreeMap<Layer, LayerHandle>,
}

impl MlcSession {
    pub fn builder() -> MlcSessionBuilder {
        MlcSessionBuilder::new()
    }

    /// 在已打开的通道上启动会话
    ///
    /// 配置中的每一层都必须有对应的通道。
    pub fn open_with_adapters(
        config: MlcConfig,
        adapters: Vec<(Layer, String, BoxedAdapter)>,
        pipeline: PipelineConfig,
    ) -> Result<Self, DriverError> {
        let mut parts = LeavesCollection::from_config(&config)?.split_layers();
        let mut adapters: BTreeMap<Layer, (String, BoxedAdapter)> = adapters
            .into_iter()
            .map(|(layer, port, adapter)| (layer, (port, adapter)))
            .collect();

        for &layer in config.layers.layers() {
            if !adapters.contains_key(&layer) {
                return Err(DriverError::Config(format!(
                    "no serial channel for {}",
                    layer
                )));
            }
        }

        // 先全部清空链路缓冲区，任何一层失败都不启动线程
        for (&layer, (port, adapter)) in adapters.iter_mut() {
            adapter
                .clear()
                .map_err(|source| DriverError::ChannelUnavailable {
                    layer,
                    port: port.clone(),
                    source,
                })?;
        }

        let mut layers = BTreeMap::new();
        for &layer in config.layers.layers() {
            let (Some((port, adapter)), Some(leaves)) =
                (adapters.remove(&layer), parts.remove(&layer))
            else {
                continue;
            };

            let ctx = Arc::new(LayerContext::new(layer, leaves));
            let (cmd_tx, cmd_rx) = crossbeam_channel::bounded(pipeline.queue_capacity);
            let is_running = Arc::new(AtomicBool::new(true));

            let io_thread = {
                let ctx = ctx.clone();
                let is_running = is_running.clone();
                let pipeline = pipeline.clone();
                spawn(move || io_loop(adapter, cmd_rx, ctx, pipeline, is_running))
            };
            info!("{}: opened {}", layer, port);

            layers.insert(
                layer,
                LayerHandle {
                    cmd_tx: ManuallyDrop::new(cmd_tx),
                    ctx,
                    io_thread: Some(io_thread),
                    is_running,
                    port,
                    capacity: pipeline.queue_capacity,
                    submit: Mutex::new(()),
                },
            );
        }

        Ok(Self { config, layers })
    }

    /// 关闭会话（等价于 drop）
    pub fn close(self) {}

    pub fn config(&self) -> &MlcConfig {
        &self.config
    }

    /// 已打开的层
    pub fn layers(&self) -> Vec<Layer> {
        self.layers.keys().copied().collect()
    }

    pub fn port(&self, layer: Layer) -> Option<&str> {
        self.layers.get(&layer).map(|h| h.port.as_str())
    }

    /// 所有 IO 线程是否都在运行
    pub fn is_healthy(&self) -> bool {
        self.layers
            .values()
            .all(|h| h.is_running.load(Ordering::Acquire))
    }

    fn handle(&self, layer: Layer) -> Result<&LayerHandle, DriverError> {
        self.layers
            .get(&layer)
            .ok_or(DriverError::LayerNotOpen(layer))
    }

    // ========================================================================
    // 指令
    // ========================================================================

    /// 把一帧指令放入某层队列
    pub fn enqueue(&self, layer: Layer, frame: MlcFrame) -> Result<(), DriverError> {
        let handle = self.handle(layer)?;
        let _guard = handle.submit.lock();
        Self::push(layer, handle, frame)
    }

    /// 整批放入某层队列，返回放入的数量
    ///
    /// 要么全部入队，要么一帧都不入队：剩余容量不足时返回
    /// [`DriverError::QueueFull`]，队列保持原样。
    pub fn enqueue_all(
        &self,
        layer: Layer,
        frames: impl IntoIterator<Item = MlcFrame>,
    ) -> Result<usize, DriverError> {
        let handle = self.handle(layer)?;
        let frames: Vec<MlcFrame> = frames.into_iter().collect();

        let _guard = handle.submit.lock();
        // IO 线程只会取走帧，持锁期间剩余容量只增不减
        let free = handle.capacity.saturating_sub(handle.cmd_tx.len());
        if frames.len() > free {
            debug!(
                "{}: batch of {} frames rejected, {} slots free",
                layer,
                frames.len(),
                free
            );
            return Err(DriverError::QueueFull {
                layer,
                capacity: handle.capacity,
            });
        }

        let count = frames.len();
        for frame in frames {
            Self::push(layer, handle, frame)?;
        }
        Ok(count)
    }

    fn push(layer: Layer, handle: &LayerHandle, frame: MlcFrame) -> Result<(), DriverError> {
        handle.ctx.submitted.fetch_add(1, Ordering::AcqRel);
        match handle.cmd_tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(e) => {
                handle.ctx.submitted.fetch_sub(1, Ordering::AcqRel);
                Err(match e {
                    TrySendError::Full(_) => DriverError::QueueFull {
                        layer,
                        capacity: handle.capacity,
                    },
                    TrySendError::Disconnected(_) => DriverError::ChannelClosed,
                })
            },
        }
    }

    /// 下发整层的绝对定位参数
    pub fn send_parameters(&self, layer: Layer) -> Result<usize, DriverError> {
        let frames = self.with_leaves(layer, |l| l.parameters_for_layer(layer))?;
        self.enqueue_all(layer, frames)
    }

    /// 下发整层位置已知叶片的相对定位参数
    pub fn send_relative_parameters(&self, layer: Layer) -> Result<usize, DriverError> {
        let frames = self.with_leaves(layer, |l| l.relative_parameters_for_layer(layer))?;
        self.enqueue_all(layer, frames)
    }

    /// 查询整层状态
    pub fn query_state(&self, layer: Layer) -> Result<usize, DriverError> {
        let frames = self.with_leaves(layer, |l| l.states_for_layer(layer))?;
        self.enqueue_all(layer, frames)
    }

    /// 查询单个叶片状态
    pub fn query_leaf(&self, layer: Layer, address: u8) -> Result<(), DriverError> {
        let frame = self.leaf_frame(layer, address, |leaf| leaf.get_state_command().to_frame())?;
        self.enqueue(layer, frame)
    }

    pub fn start(&self, layer: Layer, address: u8) -> Result<(), DriverError> {
        let frame = self.leaf_frame(layer, address, |leaf| leaf.start_command().to_frame())?;
        self.enqueue(layer, frame)
    }

    pub fn stop(&self, layer: Layer, address: u8) -> Result<(), DriverError> {
        let frame = self.leaf_frame(layer, address, |leaf| leaf.stop_command().to_frame())?;
        self.enqueue(layer, frame)
    }

    /// 在某层广播开启 / 停止 / 启动
    pub fn broadcast(&self, layer: Layer, kind: BroadcastKind) -> Result<(), DriverError> {
        self.enqueue(layer, BroadcastCommand::new(kind).to_frame())
    }

    /// 把单个叶片移动到指定距离（mm）：设置参数后立即启动
    ///
    /// 两帧一起入队；队列放不下时都不发送，目标位置也保持不变。
    pub fn move_leaf(
        &self,
        layer: Layer,
        address: u8,
        distance_mm: f64,
    ) -> Result<(), DriverError> {
        let (previous, frames) = self.with_leaves_mut(layer, |leaves| {
            let steps = leaves.scale().distance_to_internal_steps(distance_mm);
            let leaf = leaves
                .leaf_by_address_mut(address, layer)
                .ok_or(ModelError::LeafNotFound { address, layer })?;
            let previous = std::mem::replace(&mut leaf.required_position, steps);
            let frames = [
                leaf.set_parameters_command().to_frame(),
                leaf.start_command().to_frame(),
            ];
            Ok::<_, ModelError>((previous, frames))
        })??;

        if let Err(e) = self.enqueue_all(layer, frames) {
            self.with_leaves_mut(layer, |leaves| {
                if let Some(leaf) = leaves.leaf_by_address_mut(address, layer) {
                    leaf.required_position = previous;
                }
            })?;
            return Err(e);
        }
        Ok(())
    }

    /// 按预定义形状设置整层目标位置（不下发）
    pub fn apply_shape(
        &self,
        layer: Layer,
        shape: PredefinedShape,
        table: &mut impl PositionTable,
    ) -> Result<(), DriverError> {
        self.with_leaves_mut(layer, |leaves| {
            leaves.apply_predefined_shape(layer, shape, table)
        })??;
        Ok(())
    }

    fn leaf_frame(
        &self,
        layer: Layer,
        address: u8,
        build: impl FnOnce(&mlc_model::Leaf) -> MlcFrame,
    ) -> Result<MlcFrame, DriverError> {
        self.with_leaves(layer, |leaves| {
            leaves
                .leaf_by_address(address, layer)
                .map(build)
                .ok_or(ModelError::LeafNotFound { address, layer })
        })?
        .map_err(DriverError::from)
    }

    // ========================================================================
    // 状态
    // ========================================================================

    /// 读取某层叶片
    pub fn with_leaves<R>(
        &self,
        layer: Layer,
        f: impl FnOnce(&LeavesCollection) -> R,
    ) -> Result<R, DriverError> {
        let handle = self.handle(layer)?;
        let leaves = handle
            .ctx
            .leaves
            .read()
            .map_err(|_| DriverError::PoisonedLock)?;
        Ok(f(&leaves))
    }

    /// 修改某层叶片（目标位置、标定等）
    pub fn with_leaves_mut<R>(
        &self,
        layer: Layer,
        f: impl FnOnce(&mut LeavesCollection) -> R,
    ) -> Result<R, DriverError> {
        let handle = self.handle(layer)?;
        let mut leaves = handle
            .ctx
            .leaves
            .write()
            .map_err(|_| DriverError::PoisonedLock)?;
        Ok(f(&mut leaves))
    }

    /// 所有层叶片的快照
    pub fn leaves_snapshot(&self) -> Result<LeavesCollection, DriverError> {
        let mut snapshot: Option<LeavesCollection> = None;
        for &layer in self.layers.keys() {
            let part = self.with_leaves(layer, LeavesCollection::clone)?;
            match snapshot.as_mut() {
                Some(all) => all.merge(part),
                None => snapshot = Some(part),
            }
        }
        snapshot.ok_or_else(|| DriverError::Config("session has no open layers".to_string()))
    }

    /// 叶片到目标位置的距离（mm），标定不全或位置未知时为 `None`
    pub fn position_gap(&self, layer: Layer, address: u8) -> Result<Option<f64>, DriverError> {
        self.with_leaves(layer, |leaves| leaves.position_gap(address, layer))
    }

    pub fn stats(&self, layer: Layer) -> Option<DispatchStats> {
        self.layers.get(&layer).map(|h| **h.ctx.stats.load())
    }

    /// 等待所有层的指令全部结束
    pub fn wait_idle(&self, timeout: Duration) -> Result<(), DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.layers.values().all(|h| h.ctx.is_settled()) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout);
            }
            if !self.is_healthy() {
                return Err(DriverError::ChannelClosed);
            }
            spin_sleep::sleep(Duration::from_millis(1));
        }
    }

    // ========================================================================
    // 事件
    // ========================================================================

    /// 在所有层注册回调
    pub fn add_callback(&self, callback: Arc<dyn EventCallback>) -> Result<(), DriverError> {
        for handle in self.layers.values() {
            handle
                .ctx
                .hooks
                .write()
                .map_err(|_| DriverError::PoisonedLock)?
                .add_callback(callback.clone());
        }
        Ok(())
    }

    /// 订阅所有层的事件
    ///
    /// 订阅方消费过慢时新事件被丢弃，可通过
    /// [`Subscription::dropped_events`] 查看丢弃数量。
    pub fn subscribe(&self, capacity: usize) -> Result<Subscription, DriverError> {
        let (hook, rx) = ChannelEventHook::new(capacity);
        let dropped = hook.dropped_events().clone();
        self.add_callback(Arc::new(hook))?;
        Ok(Subscription::new(rx, dropped))
    }
}

/// 会话构建器
///
/// ```no_run
/// use mlc_driver::MlcSession;
/// use mlc_model::{Layer, LayerCount, MlcConfig};
///
/// let config = MlcConfig {
///     layers: LayerCount::One,
///     ..Default::default()
/// };
/// let session = MlcSession::builder()
///     .collimator(config)
///     .port(Layer::Layer1, "/dev/ttyUSB0")
///     .build()
///     .unwrap();
/// session.query_state(Layer::Layer1).unwrap();
/// ```
pub struct MlcSessionBuilder {
    collimator: MlcConfig,
    device: DeviceConfig,
    adapters: Vec<(Layer, String, BoxedAdapter)>,
    link_settings: Option<LinkSettings>,
}

impl MlcSessionBuilder {
    pub fn new() -> Self {
        Self {
            collimator: MlcConfig::default(),
            device: DeviceConfig::default(),
            adapters: Vec::new(),
            link_settings: None,
        }
    }

    pub fn from_config(config: SessionConfig) -> Self {
        Self::new().collimator(config.collimator).device(config.device)
    }

    pub fn collimator(mut self, config: MlcConfig) -> Self {
        self.collimator = config;
        self
    }

    pub fn device(mut self, config: DeviceConfig) -> Self {
        self.device = config;
        self
    }

    /// 设置某层的串口路径
    pub fn port(mut self, layer: Layer, path: impl Into<String>) -> Self {
        self.device.ports.set(layer, path);
        self
    }

    /// 覆盖默认链路参数
    pub fn link_settings(mut self, settings: LinkSettings) -> Self {
        self.link_settings = Some(settings);
        self
    }

    /// 直接提供某层的通道（优先于串口路径）
    pub fn adapter(
        mut self,
        layer: Layer,
        name: impl Into<String>,
        adapter: impl SerialAdapter + Send + 'static,
    ) -> Self {
        self.adapters.retain(|(l, _, _)| *l != layer);
        self.adapters.push((layer, name.into(), Box::new(adapter)));
        self
    }

    /// 打开所有层的通道并启动会话
    ///
    /// 任何一层打开失败都返回 `ChannelUnavailable`，不会启动任何线程。
    pub fn build(self) -> Result<MlcSession, DriverError> {
        self.collimator.validate()?;
        self.device.validate()?;
        let settings = self
            .link_settings
            .unwrap_or_else(|| self.device.link_settings());

        let mut adapters = self.adapters;
        for &layer in self.collimator.layers.layers() {
            if adapters.iter().any(|(l, _, _)| *l == layer) {
                continue;
            }
            let port = self
                .device
                .ports
                .get(layer)
                .ok_or_else(|| DriverError::Config(format!("no serial port configured for {}", layer)))?
                .to_string();
            let adapter = SerialPortAdapter::open(&port, &settings).map_err(|source| {
                DriverError::ChannelUnavailable {
                    layer,
                    port: port.clone(),
                    source,
                }
            })?;
            adapters.push((layer, port, Box::new(adapter)));
        }

        MlcSession::open_with_adapters(self.collimator, adapters, self.device.pipeline_config())
    }
}

impl Default for MlcSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
