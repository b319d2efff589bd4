//! 步数 / 计数与毫米之间的换算

use serde::{Deserialize, Serialize};

/// 运动换算系数
///
/// - 内部步数：电机步数，默认 200 步/圈 ÷ 0.8 mm/圈 = 250 步/mm
/// - 外部计数：独立编码器计数，默认 100 计数/圈 ÷ 0.8 mm/圈 = 125 计数/mm
///
/// 毫米 → 步数方向向零截断。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionScale {
    pub steps_per_mm: f64,
    pub counts_per_mm: f64,
}

impl MotionScale {
    /// 200 步/圈 ÷ 0.8 mm/圈
    pub const DEFAULT_STEPS_PER_MM: f64 = 250.0;
    /// 100 计数/圈 ÷ 0.8 mm/圈
    pub const DEFAULT_COUNTS_PER_MM: f64 = 125.0;

    pub fn new(steps_per_mm: f64, counts_per_mm: f64) -> Self {
        Self {
            steps_per_mm,
            counts_per_mm,
        }
    }

    /// 内部步数 → 毫米
    pub fn internal_distance(&self, steps: i32) -> f64 {
        f64::from(steps) / self.steps_per_mm
    }

    /// 毫米 → 内部步数（向零截断）
    pub fn distance_to_internal_steps(&self, distance_mm: f64) -> i32 {
        (distance_mm * self.steps_per_mm) as i32
    }

    /// 外部计数 → 毫米
    pub fn external_distance(&self, counts: i32) -> f64 {
        f64::from(counts) / self.counts_per_mm
    }

    /// 毫米 → 外部计数（向零截断）
    pub fn distance_to_external_steps(&self, distance_mm: f64) -> i32 {
        (distance_mm * self.counts_per_mm) as i32
    }
}

impl Default for MotionScale {
    fn default() -> Self {
        Self::new(Self::DEFAULT_STEPS_PER_MM, Self::DEFAULT_COUNTS_PER_MM)
    }
}
