//! # MLC Model
//!
//! 多叶准直器的内存模型：
//!
//! - `Leaf` / `PairOfLeaves`：单个叶片及一对相对的叶片
//! - `LeavesCollection`：按 `(叶片对序号, 层)` 组织的全部叶片，
//!   提供地址查找、标定范围聚合、预定义形状、批量指令构建
//! - `MotionScale`：步数 / 编码器计数与毫米之间的换算
//! - `MlcConfig`：从 TOML 加载的几何与地址配置
//!
//! 本 crate 不做任何 IO，只负责状态和算术。

mod collection;
mod config;
mod error;
mod leaf;
mod scale;
mod shape;
mod types;

pub use collection::{Geometry, LeavesCollection};
pub use config::{LayerCount, LeafAssignment, MlcConfig};
pub use error::ModelError;
pub use leaf::{Leaf, LeafChanges, PairOfLeaves};
pub use scale::MotionScale;
pub use shape::{PositionTable, PredefinedShape};
pub use types::{Layer, PairKey, Side};

// 协议层中与模型直接相关的类型
pub use mlc_protocol::{LeafStateReport, MlcFrame, MotionDirection};
