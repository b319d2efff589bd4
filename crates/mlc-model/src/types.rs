//! 基础枚举与复合键

use serde::{Deserialize, Serialize};
use std::fmt;

/// 叶片所在的一侧
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Side1,
    Side2,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Side1, Side::Side2];

    /// 对侧
    pub fn opposite(self) -> Self {
        match self {
            Side::Side1 => Side::Side2,
            Side::Side2 => Side::Side1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Side1 => write!(f, "side1"),
            Side::Side2 => write!(f, "side2"),
        }
    }
}

/// 叶片层（最多两层叠放）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Layer1,
    Layer2,
}

impl Layer {
    pub const ALL: [Layer; 2] = [Layer::Layer1, Layer::Layer2];

    /// 0 起始的层序号
    pub fn index(self) -> usize {
        match self {
            Layer::Layer1 => 0,
            Layer::Layer2 => 1,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Layer::Layer1),
            1 => Some(Layer::Layer2),
            _ => None,
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Layer1 => write!(f, "layer1"),
            Layer::Layer2 => write!(f, "layer2"),
        }
    }
}

/// 叶片对的复合键
///
/// 先按层、再按序号排序，遍历时同一层的叶片对连续出现。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairKey {
    pub layer: Layer,
    pub index: usize,
}

impl PairKey {
    pub fn new(index: usize, layer: Layer) -> Self {
        Self { layer, index }
    }

    /// 扁平序号：`index + number_of_pairs × layer`
    pub fn flat_index(&self, number_of_pairs: usize) -> usize {
        self.index + number_of_pairs * self.layer.index()
    }
}
