//! 预定义形状

use crate::{PairKey, Side};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 预定义形状
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredefinedShape {
    /// Side1 单侧斜坡，Side2 退回
    Side1Edge,
    /// Side2 单侧斜坡，Side1 退回
    Side2Edge,
    /// 两侧对称斜坡（楔形）
    DoubleSidedEdge,
    /// 居中方形开口
    Square,
    /// 居中圆形开口
    Circle,
    /// 全部退回
    Open,
    /// 在行程中点闭合
    Close,
}

impl PredefinedShape {
    pub const ALL: [PredefinedShape; 7] = [
        PredefinedShape::Side1Edge,
        PredefinedShape::Side2Edge,
        PredefinedShape::DoubleSidedEdge,
        PredefinedShape::Square,
        PredefinedShape::Circle,
        PredefinedShape::Open,
        PredefinedShape::Close,
    ];

    /// 是否依赖标定范围
    pub fn needs_calibration(self) -> bool {
        !matches!(self, PredefinedShape::Open)
    }

    fn name(self) -> &'static str {
        match self {
            PredefinedShape::Side1Edge => "side1-edge",
            PredefinedShape::Side2Edge => "side2-edge",
            PredefinedShape::DoubleSidedEdge => "double-sided-edge",
            PredefinedShape::Square => "square",
            PredefinedShape::Circle => "circle",
            PredefinedShape::Open => "open",
            PredefinedShape::Close => "close",
        }
    }
}

impl fmt::Display for PredefinedShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PredefinedShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        PredefinedShape::ALL
            .into_iter()
            .find(|shape| shape.name() == normalized)
            .ok_or_else(|| format!("unknown shape '{}'", s))
    }
}

/// 外部位置表（形状生成后发布每片叶片的目标距离，单位 mm）
pub trait PositionTable {
    fn set_required_distance(&mut self, key: PairKey, side: Side, distance_mm: f64);
}

impl PositionTable for BTreeMap<(PairKey, Side), f64> {
    fn set_required_distance(&mut self, key: PairKey, side: Side, distance_mm: f64) {
        self.insert((key, side), distance_mm);
    }
}

/// 不关心位置表时使用
impl PositionTable for () {
    fn set_required_distance(&mut self, _key: PairKey, _side: Side, _distance_mm: f64) {}
}

/// 形状生成所需的几何参数（单层）
#[derive(Debug, Clone, Copy)]
pub(crate) struct ShapeParams {
    pub number_of_pairs: usize,
    pub pitch_mm: f64,
    pub side_opening_mm: f64,
    pub steps_per_mm: f64,
    pub edge_offset_steps: i32,
    /// 标定范围（Side1 最小 + Side2 最小）；`Open` 不需要
    pub range: i32,
}

impl ShapeParams {
    /// 第 `i` 对的斜坡步数
    fn ramp(&self, i: usize) -> i32 {
        let n = self.number_of_pairs as f64;
        let tangent = self.side_opening_mm / (self.pitch_mm * n);
        (self.steps_per_mm * (i as f64 * self.pitch_mm) * tangent) as i32 + self.edge_offset_steps
    }

    /// 第 `i` 对中心相对轴线的横向坐标（mm）
    fn center_offset(&self, i: usize) -> f64 {
        let n = self.number_of_pairs as f64;
        (i as f64 + 0.5) * self.pitch_mm - n * self.pitch_mm / 2.0
    }

    /// 开口半宽（mm）：开口宽度为 N·pitch/2
    fn aperture_half_width(&self) -> f64 {
        self.number_of_pairs as f64 * self.pitch_mm / 4.0
    }

    fn mm_to_steps(&self, mm: f64) -> i32 {
        (mm * self.steps_per_mm) as i32
    }

    /// 第 `i` 对两侧的目标步数 `(side1, side2)`
    pub fn targets(&self, shape: PredefinedShape, i: usize) -> (i32, i32) {
        let full = self.range.max(0);
        let half = full / 2;
        match shape {
            PredefinedShape::Side1Edge => (self.ramp(i).clamp(0, full), 0),
            PredefinedShape::Side2Edge => (0, self.ramp(i).clamp(0, full)),
            PredefinedShape::DoubleSidedEdge => {
                let steps = (self.ramp(i) / 2).clamp(0, half);
                (steps, steps)
            },
            PredefinedShape::Square => {
                let a = self.aperture_half_width();
                let steps = if self.center_offset(i).abs() < a {
                    (half - self.mm_to_steps(a)).clamp(0, full)
                } else {
                    half
                };
                (steps, steps)
            },
            PredefinedShape::Circle => {
                let r = self.aperture_half_width();
                let x = self.center_offset(i);
                let steps = if x.abs() < r {
                    let h = (r * r - x * x).sqrt();
                    (half - self.mm_to_steps(h)).clamp(0, full)
                } else {
                    half
                };
                (steps, steps)
            },
            PredefinedShape::Open => (0, 0),
            PredefinedShape::Close => (half, half),
        }
    }
}
