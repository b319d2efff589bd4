//! 命令定义和实现

pub mod broadcast;
pub mod r#move;
pub mod ports;
pub mod shape;
pub mod state;
pub mod watch;

pub use broadcast::BroadcastCommand;
pub use r#move::MoveCommand;
pub use shape::ShapeCommand;
pub use state::StateCommand;
pub use watch::WatchCommand;
