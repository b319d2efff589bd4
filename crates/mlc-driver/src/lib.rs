//! # MLC Driver
//!
//! 多叶准直器的驱动层：
//!
//! - `CommandDispatcher`：单条在途指令的发送队列，负责应答匹配、
//!   CRC 错误重发和超时
//! - `io_loop`：每层一个 IO 线程，驱动调度器并分发事件
//! - `MlcSession`：打开每层的串口通道、启动 IO 线程，对外提供
//!   指令下发、状态读取和事件订阅
//!
//! ```no_run
//! use mlc_driver::{MlcSessionBuilder, SessionConfig};
//! use mlc_model::Layer;
//! use std::time::Duration;
//!
//! let config = SessionConfig::load("mlc.toml").unwrap();
//! let session = MlcSessionBuilder::from_config(config).build().unwrap();
//! let events = session.subscribe(1024).unwrap();
//!
//! session.query_state(Layer::Layer1).unwrap();
//! session.wait_idle(Duration::from_secs(1)).unwrap();
//! while let Ok(event) = events.try_recv() {
//!     println!("{:?}", event);
//! }
//! ```

mod config;
pub mod dispatcher;
mod error;
pub mod event;
pub mod hooks;
pub mod pipeline;
mod session;

pub use config::{DeviceConfig, LayerPorts, SessionConfig};
pub use dispatcher::{CommandDispatcher, DispatchState, DispatchStats, RetryPolicy};
pub use error::DriverError;
pub use event::{MlcEvent, ResponseFault};
pub use hooks::{ChannelEventHook, EventCallback, HookManager, Subscription};
pub use pipeline::{LayerContext, PipelineConfig, io_loop};
pub use session::{BoxedAdapter, MlcSession, MlcSessionBuilder};

#[cfg(feature = "mock")]
pub use mlc_serial::{MockLink, SimulatedDevice};
