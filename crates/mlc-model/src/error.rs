//! 模型层错误类型定义

use crate::{Layer, Side};
use thiserror::Error;

/// 模型层错误类型
#[derive(Error, Debug)]
pub enum ModelError {
    /// 该层某一侧仍有叶片缺少标定数据
    #[error("Calibration incomplete in {layer}")]
    CalibrationIncomplete { layer: Layer },

    /// 地址 0 保留给广播
    #[error("Address 0 is reserved for broadcast ({layer}, pair {pair}, {side})")]
    ReservedAddress { layer: Layer, pair: usize, side: Side },

    /// 同一层内地址重复
    #[error("Duplicate leaf address {address} in {layer}")]
    DuplicateAddress { address: u8, layer: Layer },

    /// 叶片对序号越界
    #[error("Pair index {index} out of range (number of pairs: {number_of_pairs})")]
    PairIndexOutOfRange { index: usize, number_of_pairs: usize },

    /// 层未配置
    #[error("Layer {0} is not configured")]
    LayerNotConfigured(Layer),

    /// 叶片对中两片叶片的层或侧不匹配
    #[error("Invalid pair: {0}")]
    InvalidPair(String),

    /// 按地址找不到叶片
    #[error("No leaf with address {address} in {layer}")]
    LeafNotFound { address: u8, layer: Layer },

    /// 配置内容非法
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// 配置文件读取失败
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 配置文件解析失败
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
