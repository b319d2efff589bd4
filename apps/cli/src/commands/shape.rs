//! 形状命令
//!
//! 按预定义形状计算目标位置，下发设置参数指令后广播启动。

use crate::commands::state::render_layer;
use crate::connection::{ConnectArgs, parse_layer, target_layers};
use anyhow::{Context, Result};
use clap::Args;
use mlc_model::{Layer, PairKey, PredefinedShape, Side};
use mlc_protocol::BroadcastKind;
use std::collections::BTreeMap;
use std::time::Duration;

/// 形状命令参数
#[derive(Args, Debug)]
pub struct ShapeCommand {
    /// 形状：side1-edge / side2-edge / double-sided-edge / square / circle / open / close
    pub shape: PredefinedShape,

    /// 只作用于某一层（1 或 2）
    #[arg(short, long, value_parser = parse_layer)]
    pub layer: Option<Layer>,

    /// 为缺少标定的叶片补上标定步数
    #[arg(long)]
    pub calibration: Option<i32>,

    /// 使用相对定位（需要已知的当前位置）
    #[arg(long)]
    pub relative: bool,

    /// 只下发参数，不广播启动
    #[arg(long)]
    pub no_start: bool,

    /// 等待完成的超时（毫秒）
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,
}

impl ShapeCommand {
    pub fn execute(&self, connect: &ConnectArgs) -> Result<()> {
        let session = connect.open()?;
        let timeout = Duration::from_millis(self.timeout_ms);
        let layers = target_layers(&session, self.layer);

        for &layer in &layers {
            if let Some(steps) = self.calibration {
                session.with_leaves_mut(layer, |leaves| {
                    for address in leaves.addresses_in_layer(layer) {
                        if let Some(leaf) = leaves.leaf_by_address_mut(address, layer) {
                            leaf.calibration_steps.get_or_insert(steps);
                        }
                    }
                })?;
            }

            let mut table: BTreeMap<(PairKey, Side), f64> = BTreeMap::new();
            session
                .apply_shape(layer, self.shape, &mut table)
                .with_context(|| format!("cannot form {} on {}", self.shape, layer))?;
            println!("📐 {} {}:", layer, self.shape);
            for ((key, side), mm) in &table {
                println!("  pair {:>3} {}: {:>8.2} mm", key.index, side, mm);
            }

            if self.relative {
                // 相对定位依赖当前位置
                session.query_state(layer)?;
                session.wait_idle(timeout)?;
                session.send_relative_parameters(layer)?;
            } else {
                session.send_parameters(layer)?;
            }
            if !self.no_start {
                session.broadcast(layer, BroadcastKind::Start)?;
            }
        }
        session.wait_idle(timeout)?;

        if !self.no_start {
            println!("⏳ 确认位置...");
            for &layer in &layers {
                session.query_state(layer)?;
            }
            session.wait_idle(timeout)?;
            for &layer in &layers {
                print!("{}", session.with_leaves(layer, |leaves| render_layer(leaves, layer))?);
            }
        }
        println!("✅ 完成");
        Ok(())
    }
}
