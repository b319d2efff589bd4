//! 准直器几何与地址配置（TOML）
//!
//! ```toml
//! number_of_pairs = 16
//! layers = "two"
//! pitch_mm = 5.0
//!
//! [[leaves]]
//! pair = 0
//! layer = "layer1"
//! side = "side1"
//! address = 1
//! calibration_steps = 19300
//! ```

use crate::{Layer, MotionScale, ModelError, Side};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// 配置的层数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerCount {
    One,
    #[default]
    Two,
}

impl LayerCount {
    pub fn count(self) -> usize {
        match self {
            LayerCount::One => 1,
            LayerCount::Two => 2,
        }
    }

    /// 已配置的层
    pub fn layers(self) -> &'static [Layer] {
        match self {
            LayerCount::One => &Layer::ALL[..1],
            LayerCount::Two => &Layer::ALL[..],
        }
    }

    pub fn contains(self, layer: Layer) -> bool {
        layer.index() < self.count()
    }
}

/// 单个叶片的显式地址 / 标定配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafAssignment {
    pub pair: usize,
    pub layer: Layer,
    pub side: Side,
    pub address: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration_steps: Option<i32>,
}

/// 准直器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlcConfig {
    /// 每层叶片对数
    pub number_of_pairs: usize,
    pub layers: LayerCount,
    /// 叶片对宽度（mm）
    pub pitch_mm: f64,
    /// 边缘形状的最大开口（mm）
    pub side_opening_mm: f64,
    /// 等中心偏移（mm）
    pub isocenter_offset_mm: f64,
    /// 第二层相对第一层的偏移（mm）
    pub layer_offset_mm: f64,
    pub steps_per_mm: f64,
    pub counts_per_mm: f64,
    pub default_frequency: u8,
    /// 边缘形状的起始步数偏移
    pub edge_offset_steps: i32,
    /// 显式叶片配置；未列出的叶片使用顺序地址
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub leaves: Vec<LeafAssignment>,
}

impl Default for MlcConfig {
    fn default() -> Self {
        Self {
            number_of_pairs: 16,
            layers: LayerCount::Two,
            pitch_mm: 5.0,
            side_opening_mm: 80.0,
            isocenter_offset_mm: 0.0,
            layer_offset_mm: 0.0,
            steps_per_mm: MotionScale::DEFAULT_STEPS_PER_MM,
            counts_per_mm: MotionScale::DEFAULT_COUNTS_PER_MM,
            default_frequency: 7,
            edge_offset_steps: 400,
            leaves: Vec::new(),
        }
    }
}

impl MlcConfig {
    /// 从 TOML 文件加载并校验
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 从 TOML 字符串解析并校验
    pub fn from_toml_str(content: &str) -> Result<Self, ModelError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn scale(&self) -> MotionScale {
        MotionScale::new(self.steps_per_mm, self.counts_per_mm)
    }

    /// 顺序地址：第 `l` 层第 `i` 对，Side1 = 2·(i + N·l) + 1，Side2 = Side1 + 1
    pub fn default_address(&self, pair: usize, layer: Layer, side: Side) -> usize {
        let base = 2 * (pair + self.number_of_pairs * layer.index());
        match side {
            Side::Side1 => base + 1,
            Side::Side2 => base + 2,
        }
    }

    /// 某个叶片的显式配置
    pub fn assignment(&self, pair: usize, layer: Layer, side: Side) -> Option<&LeafAssignment> {
        self.leaves
            .iter()
            .find(|a| a.pair == pair && a.layer == layer && a.side == side)
    }

    /// 某个叶片最终使用的地址
    pub fn address_of(&self, pair: usize, layer: Layer, side: Side) -> Result<u8, ModelError> {
        if let Some(assignment) = self.assignment(pair, layer, side) {
            return Ok(assignment.address);
        }
        let address = self.default_address(pair, layer, side);
        u8::try_from(address).map_err(|_| {
            ModelError::InvalidConfig(format!(
                "default address {} for {} pair {} {} exceeds 255",
                address, layer, pair, side
            ))
        })
    }

    /// 校验几何参数与地址分配
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.number_of_pairs == 0 {
            return Err(ModelError::InvalidConfig(
                "number_of_pairs must be positive".to_string(),
            ));
        }
        for (name, value) in [
            ("pitch_mm", self.pitch_mm),
            ("steps_per_mm", self.steps_per_mm),
            ("counts_per_mm", self.counts_per_mm),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ModelError::InvalidConfig(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        if self.default_frequency > mlc_protocol::MAX_FREQUENCY_CODE {
            return Err(ModelError::InvalidConfig(format!(
                "default_frequency must fit in 4 bits, got {}",
                self.default_frequency
            )));
        }

        let mut seen_slots = HashSet::new();
        for a in &self.leaves {
            if a.pair >= self.number_of_pairs {
                return Err(ModelError::PairIndexOutOfRange {
                    index: a.pair,
                    number_of_pairs: self.number_of_pairs,
                });
            }
            if !self.layers.contains(a.layer) {
                return Err(ModelError::LayerNotConfigured(a.layer));
            }
            if !seen_slots.insert((a.pair, a.layer, a.side)) {
                return Err(ModelError::InvalidConfig(format!(
                    "{} pair {} {} is listed twice",
                    a.layer, a.pair, a.side
                )));
            }
        }

        for &layer in self.layers.layers() {
            let mut addresses = HashSet::new();
            for pair in 0..self.number_of_pairs {
                for side in Side::ALL {
                    let address = self.address_of(pair, layer, side)?;
                    if address == mlc_protocol::BROADCAST_ADDRESS {
                        return Err(ModelError::ReservedAddress { layer, pair, side });
                    }
                    if !addresses.insert(address) {
                        return Err(ModelError::DuplicateAddress { address, layer });
                    }
                }
            }
        }
        Ok(())
    }
}
