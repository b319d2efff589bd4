//! 广播命令

use crate::connection::{ConnectArgs, parse_layer, target_layers};
use anyhow::Result;
use clap::{Args, ValueEnum};
use mlc_model::Layer;
use mlc_protocol::BroadcastKind;
use std::time::Duration;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastAction {
    /// 全部叶片回到限位开关
    Open,
    /// 全部叶片停止
    Stop,
    /// 全部叶片按已下发的参数启动
    Start,
}

impl From<BroadcastAction> for BroadcastKind {
    fn from(action: BroadcastAction) -> Self {
        match action {
            BroadcastAction::Open => BroadcastKind::Open,
            BroadcastAction::Stop => BroadcastKind::Stop,
            BroadcastAction::Start => BroadcastKind::Start,
        }
    }
}

/// 广播命令参数
#[derive(Args, Debug)]
pub struct BroadcastCommand {
    #[arg(value_enum)]
    pub action: BroadcastAction,

    /// 只广播到某一层（1 或 2）
    #[arg(short, long, value_parser = parse_layer)]
    pub layer: Option<Layer>,
}

impl BroadcastCommand {
    pub fn execute(&self, connect: &ConnectArgs) -> Result<()> {
        let session = connect.open()?;
        for layer in target_layers(&session, self.layer) {
            println!("📣 {} {:?}", layer, self.action);
            session.broadcast(layer, self.action.into())?;
        }
        // 广播写出即完成
        session.wait_idle(Duration::from_secs(1))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_mapping() {
        assert_eq!(BroadcastKind::from(BroadcastAction::Open), BroadcastKind::Open);
        assert_eq!(BroadcastKind::from(BroadcastAction::Stop), BroadcastKind::Stop);
        assert_eq!(BroadcastKind::from(BroadcastAction::Start), BroadcastKind::Start);
    }

    #[test]
    fn test_broadcast_to_simulated_layers() {
        let connect = ConnectArgs {
            pairs: Some(2),
            simulate: true,
            ..Default::default()
        };
        let cmd = BroadcastCommand {
            action: BroadcastAction::Stop,
            layer: None,
        };
        cmd.execute(&connect).unwrap();
    }
}
