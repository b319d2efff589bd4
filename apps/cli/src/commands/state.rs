//! 状态查询命令

use crate::connection::{ConnectArgs, parse_layer, target_layers};
use anyhow::Result;
use clap::Args;
use mlc_model::{Layer, Leaf, LeavesCollection};
use std::time::Duration;

/// 状态查询命令参数
#[derive(Args, Debug)]
pub struct StateCommand {
    /// 只查询某一层（1 或 2）
    #[arg(short, long, value_parser = parse_layer)]
    pub layer: Option<Layer>,

    /// 等待应答的超时（毫秒）
    #[arg(long, default_value_t = 2000)]
    pub timeout_ms: u64,
}

impl StateCommand {
    pub fn execute(&self, connect: &ConnectArgs) -> Result<()> {
        let session = connect.open()?;
        let layers = target_layers(&session, self.layer);

        println!("⏳ 正在查询叶片状态...");
        for &layer in &layers {
            session.query_state(layer)?;
        }
        session.wait_idle(Duration::from_millis(self.timeout_ms))?;

        for &layer in &layers {
            let table = session.with_leaves(layer, |leaves| render_layer(leaves, layer))?;
            print!("{}", table);
        }
        Ok(())
    }
}

/// 渲染一层叶片的状态表
pub fn render_layer(leaves: &LeavesCollection, layer: Layer) -> String {
    let mut out = format!("📊 {}:\n", layer);
    out.push_str("  pair  side1                    side2\n");
    for (index, pair) in leaves.pairs_in_layer(layer) {
        let [side1, side2] = pair.leaves();
        out.push_str(&format!(
            "  {:>4}  {:<24} {}\n",
            index,
            describe_leaf(leaves, side1),
            describe_leaf(leaves, side2)
        ));
    }
    out
}

fn describe_leaf(leaves: &LeavesCollection, leaf: &Leaf) -> String {
    let position = match leaf.actual_current_position() {
        Some(steps) => format!("{:>8.2} mm", leaves.scale().internal_distance(steps)),
        None => format!("{:>11}", "?"),
    };
    let marker = if leaf.switch_state {
        " ⌂"
    } else if leaf.is_moving() {
        " →"
    } else {
        ""
    };
    format!("#{:<3} {}{}", leaf.address(), position, marker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlc_model::{LayerCount, MlcConfig};

    #[test]
    fn test_render_unknown_positions() {
        let config = MlcConfig {
            number_of_pairs: 2,
            layers: LayerCount::One,
            ..Default::default()
        };
        let leaves = LeavesCollection::from_config(&config).unwrap();
        let table = render_layer(&leaves, Layer::Layer1);

        assert!(table.starts_with("📊 layer1:"));
        assert_eq!(table.lines().count(), 4);
        assert!(table.contains("#1"));
        assert!(table.contains("#4"));
        assert!(table.contains('?'));
    }
}
