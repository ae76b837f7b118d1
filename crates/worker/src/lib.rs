//! Worker执行面
//!
//! 从运行器领取分配、在隔离工作目录里执行候选项命令、用后台
//! 心跳维持租约、上报终态结果。与控制面的全部契约是core crate
//! 里的协议类型，Worker自身不接触数据库。

pub mod client;
pub mod executor;
pub mod heartbeat;
pub mod service;

pub use client::CoordinatorClient;
pub use executor::{RunExecutor, ShellExecutor};
pub use heartbeat::{start_heartbeat, HeartbeatGuard};
pub use service::WorkerService;
