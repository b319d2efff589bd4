//! 移动命令
//!
//! 设置单个叶片的目标距离并启动，随后查询一次状态确认位置。

use crate::connection::{ConnectArgs, parse_layer};
use anyhow::{Context, Result};
use clap::Args;
use mlc_model::Layer;
use std::time::Duration;

/// 移动命令参数
#[derive(Args, Debug)]
pub struct MoveCommand {
    /// 叶片所在层（1 或 2）
    #[arg(short, long, value_parser = parse_layer, default_value = "1")]
    pub layer: Layer,

    /// 叶片地址
    #[arg(short, long)]
    pub address: u8,

    /// 目标距离（mm，从限位开关起算）
    #[arg(short, long)]
    pub distance: f64,

    /// 等待完成的超时（毫秒）
    #[arg(long, default_value_t = 2000)]
    pub timeout_ms: u64,
}

impl MoveCommand {
    pub fn validate(&self) -> Result<()> {
        if !self.distance.is_finite() || self.distance < 0.0 {
            anyhow::bail!("distance must be a non-negative number of millimetres");
        }
        Ok(())
    }

    pub fn execute(&self, connect: &ConnectArgs) -> Result<()> {
        self.validate()?;
        let session = connect.open()?;
        let timeout = Duration::from_millis(self.timeout_ms);

        println!(
            "🚀 移动叶片 #{} ({}) 到 {:.2} mm...",
            self.address, self.layer, self.distance
        );
        session
            .move_leaf(self.layer, self.address, self.distance)
            .with_context(|| format!("failed to move leaf #{}", self.address))?;
        session.wait_idle(timeout)?;

        session.query_leaf(self.layer, self.address)?;
        session.wait_idle(timeout)?;

        match session.position_gap(self.layer, self.address)? {
            Some(gap) => println!("✅ 完成，距离目标 {:.2} mm", gap),
            None => {
                let position = session.with_leaves(self.layer, |leaves| {
                    leaves
                        .leaf_by_address(self.address, self.layer)
                        .and_then(|leaf| leaf.actual_current_position())
                        .map(|steps| leaves.scale().internal_distance(steps))
                })?;
                match position {
                    Some(mm) => println!("✅ 完成，当前位置 {:.2} mm", mm),
                    None => println!("⚠️  已发送，位置未知"),
                }
            },
        }
        Ok(())
    }
}
