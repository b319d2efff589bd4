//! # MLC CLI
//!
//! 多叶准直器命令行工具。每个命令打开一次会话，执行后关闭。
//!
//! ```bash
//! # 列出串口
//! mlc-cli ports
//!
//! # 查询两层全部叶片
//! mlc-cli --config mlc.toml state
//!
//! # 第一层形成方形开口并启动
//! mlc-cli --config mlc.toml shape square --layer 1
//!
//! # 不接硬件，用模拟设备试运行
//! mlc-cli --simulate --pairs 4 move --address 3 --distance 12.5
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod connection;

use commands::{BroadcastCommand, MoveCommand, ShapeCommand, StateCommand, WatchCommand};
use connection::ConnectArgs;

/// MLC CLI - 多叶准直器命令行工具
#[derive(Parser, Debug)]
#[command(name = "mlc-cli")]
#[command(about = "Command-line interface for multi-leaf collimator control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    connect: ConnectArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 列出本机串口
    Ports,

    /// 查询叶片状态
    State {
        #[command(flatten)]
        args: StateCommand,
    },

    /// 移动单个叶片
    Move {
        #[command(flatten)]
        args: MoveCommand,
    },

    /// 形成预定义形状
    Shape {
        #[command(flatten)]
        args: ShapeCommand,
    },

    /// 广播开启 / 停止 / 启动
    Broadcast {
        #[command(flatten)]
        args: BroadcastCommand,
    },

    /// 持续监控叶片状态（Ctrl-C 退出）
    Watch {
        #[command(flatten)]
        args: WatchCommand,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mlc_cli=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ports => commands::ports::execute(),
        Commands::State { args } => args.execute(&cli.connect),
        Commands::Move { args } => args.execute(&cli.connect),
        Commands::Shape { args } => args.execute(&cli.connect),
        Commands::Broadcast { args } => args.execute(&cli.connect),
        Commands::Watch { args } => args.execute(&cli.connect),
    }
}
