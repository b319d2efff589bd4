//! 会话参数与连接

use anyhow::{Context, Result};
use clap::Args;
use mlc_driver::{MlcSession, MlcSessionBuilder, MockLink, SessionConfig, SimulatedDevice};
use mlc_model::{Layer, LayerCount, LeavesCollection};
use std::path::PathBuf;
use tracing::info;

/// 所有命令共用的连接参数
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectArgs {
    /// 会话配置文件（TOML）
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 第一层串口（覆盖配置）
    #[arg(long, global = true)]
    pub port1: Option<String>,

    /// 第二层串口（覆盖配置）
    #[arg(long, global = true)]
    pub port2: Option<String>,

    /// 每层叶片对数（覆盖配置）
    #[arg(long, global = true)]
    pub pairs: Option<usize>,

    /// 只使用第一层
    #[arg(long, global = true)]
    pub single_layer: bool,

    /// 用内存中的模拟设备代替串口
    #[arg(long, global = true)]
    pub simulate: bool,
}

impl ConnectArgs {
    /// 加载配置文件并应用命令行覆盖
    pub fn session_config(&self) -> Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => SessionConfig::default(),
        };

        if let Some(port) = &self.port1 {
            config.device.ports.set(Layer::Layer1, port.clone());
        }
        if let Some(port) = &self.port2 {
            config.device.ports.set(Layer::Layer2, port.clone());
        }
        if let Some(pairs) = self.pairs {
            config.collimator.number_of_pairs = pairs;
        }
        if self.single_layer {
            config.collimator.layers = LayerCount::One;
        }
        config.collimator.validate()?;
        Ok(config)
    }

    /// 打开会话
    pub fn open(&self) -> Result<MlcSession> {
        let config = self.session_config()?;
        let mut builder = MlcSessionBuilder::from_config(config.clone());

        if self.simulate {
            let leaves = LeavesCollection::from_config(&config.collimator)?;
            for &layer in config.collimator.layers.layers() {
                let link = MockLink::new();
                SimulatedDevice::new(leaves.addresses_in_layer(layer)).attach(&link);
                builder = builder.adapter(layer, format!("sim:{}", layer), link.adapter());
            }
            info!("using simulated device");
        }

        let session = builder.build().context("failed to open collimator session")?;
        Ok(session)
    }
}

/// 解析层号：`1` / `2` / `layer1` / `layer2`
pub fn parse_layer(s: &str) -> Result<Layer, String> {
    let digits = s.trim().trim_start_matches("layer");
    digits
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(Layer::from_index)
        .ok_or_else(|| format!("invalid layer '{}', expected 1 or 2", s))
}

/// 未指定层时使用会话中全部已打开的层
pub fn target_layers(session: &MlcSession, layer: Option<Layer>) -> Vec<Layer> {
    match layer {
        Some(layer) => vec![layer],
        None => session.layers(),
    }
}
