//! 运行调度服务
//!
//! 本crate承载运行器（调度面）的全部业务组件：候选项扫描入队、
//! 运行分配与租约管理、结果摄取与重试决策、过期租约回收，以及
//! 把这些循环组装起来的控制器。协议层（axum路由）在api crate，
//! 仓储实现在infrastructure crate。

pub mod broker;
pub mod controller;
pub mod ingestion;
pub mod queue_manager;
pub mod reclaimer;
pub mod retry_service;

pub use broker::AssignmentBroker;
pub use controller::DispatcherController;
pub use ingestion::ResultIngestion;
pub use queue_manager::QueueManager;
pub use reclaimer::LeaseReclaimer;
pub use retry_service::{RetryDecision, RetryPolicy};
