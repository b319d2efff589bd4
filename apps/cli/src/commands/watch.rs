//! 监控命令
//!
//! 周期性查询状态并打印位置变化、开关变化和被丢弃的指令，Ctrl-C 退出。

use crate::connection::{ConnectArgs, target_layers};
use anyhow::{Context, Result};
use clap::Args;
use mlc_driver::{MlcEvent, MlcSession};
use mlc_model::MotionScale;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

/// 监控命令参数
#[derive(Args, Debug)]
pub struct WatchCommand {
    /// 查询间隔（毫秒）
    #[arg(short, long, default_value_t = 500)]
    pub interval_ms: u64,

    /// 查询轮数后退出（缺省为一直运行）
    #[arg(short = 'n', long)]
    pub rounds: Option<u64>,
}

impl WatchCommand {
    pub fn execute(&self, connect: &ConnectArgs) -> Result<()> {
        let session = connect.open()?;
        let scale = session.config().scale();
        let events = session.subscribe(4096)?;

        let running = Arc::new(AtomicBool::new(true));
        {
            let running = running.clone();
            ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
                .context("failed to install Ctrl-C handler")?;
        }

        println!("👀 监控中（Ctrl-C 退出）...");
        let interval = Duration::from_millis(self.interval_ms);
        let mut round = 0u64;
        let mut lost = 0u64;
        while running.load(Ordering::SeqCst) && self.rounds.is_none_or(|n| round < n) {
            self.poll_once(&session)?;
            round += 1;

            for event in events.try_iter() {
                if let Some(line) = describe_event(&event, &scale) {
                    println!("{}", line);
                }
            }
            if let Some(missed) = newly_dropped(&mut lost, events.dropped_events()) {
                warn!("{} events dropped, output is incomplete", missed);
            }
            if !session.is_healthy() {
                anyhow::bail!("serial channel closed");
            }
            std::thread::sleep(interval);
        }
        println!("👋 已退出");
        Ok(())
    }

    fn poll_once(&self, session: &MlcSession) -> Result<()> {
        for layer in target_layers(session, None) {
            session.query_state(layer)?;
        }
        if let Err(e) = session.wait_idle(Duration::from_secs(2)) {
            warn!("state query did not settle: {}", e);
        }
        Ok(())
    }
}

/// 自上次检查以来新增的丢弃事件数
fn newly_dropped(seen: &mut u64, total: u64) -> Option<u64> {
    let missed = total.saturating_sub(*seen);
    *seen = total;
    (missed > 0).then_some(missed)
}

/// 需要打印的事件
pub fn describe_event(event: &MlcEvent, scale: &MotionScale) -> Option<String> {
    match event {
        MlcEvent::PositionChanged {
            address,
            layer,
            side,
            position,
        } => Some(match position {
            Some(steps) => format!(
                "  {} #{:<3} {} → {:.2} mm",
                layer,
                address,
                side,
                scale.internal_distance(*steps)
            ),
            None => format!("  {} #{:<3} {} → ?", layer, address, side),
        }),
        MlcEvent::SwitchChanged {
            address,
            layer,
            side,
            pressed,
        } => Some(format!(
            "  {} #{:<3} {} switch {}",
            layer,
            address,
            side,
            if *pressed { "pressed" } else { "released" }
        )),
        MlcEvent::CommandDropped { layer, frame, fault } => Some(format!(
            "⚠️  {} command to #{} dropped: {}",
            layer,
            frame.address(),
            fault
        )),
        MlcEvent::FrameDecoded { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlc_driver::ResponseFault;
    use mlc_model::{Layer, MlcConfig, Side};
    use mlc_protocol::GetStateCommand;

    #[test]
    fn test_describe_events() {
        let scale = MlcConfig::default().scale();
        let moved = MlcEvent::PositionChanged {
            address: 3,
            layer: Layer::Layer1,
            side: Side::Side1,
            position: Some(2500),
        };
        assert_eq!(
            describe_event(&moved, &scale).unwrap(),
            "  layer1 #3   side1 → 10.00 mm"
        );

        let dropped = MlcEvent::CommandDropped {
            layer: Layer::Layer2,
            frame: GetStateCommand::new(40).to_frame(),
            fault: ResponseFault::CrcMismatch,
        };
        let line = describe_event(&dropped, &scale).unwrap();
        assert!(line.contains("#40"));
        assert!(line.contains("layer2"));
    }

    #[test]
    fn test_newly_dropped_counts_increments() {
        let mut seen = 0;
        assert_eq!(newly_dropped(&mut seen, 0), None);
        assert_eq!(newly_dropped(&mut seen, 7), Some(7));
        assert_eq!(newly_dropped(&mut seen, 7), None);
        assert_eq!(newly_dropped(&mut seen, 9), Some(2));
    }

    #[test]
    fn test_watch_fixed_rounds() {
        let connect = ConnectArgs {
            pairs: Some(2),
            single_layer: true,
            simulate: true,
            ..Default::default()
        };
        let cmd = WatchCommand {
            interval_ms: 1,
            rounds: Some(2),
        };
        cmd.execute(&connect).unwrap();
    }
}
