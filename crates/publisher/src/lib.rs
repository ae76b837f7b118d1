//! 发布协调服务
//!
//! 成功运行到对外提案之间的全部决策都在这里：目标级分布式互斥、
//! 按host的滑动窗口限流、开放提案的替换与幂等检查、发布失败的
//! 有界退避，以及回看外部论坛状态的提案监视循环。协议层在api
//! crate，锁与发布机制的实现在infrastructure crate。

pub mod controller;
pub mod proposal_monitor;
pub mod rate_limiter;
pub mod state_machine;

pub use controller::PublisherController;
pub use proposal_monitor::ProposalMonitor;
pub use rate_limiter::{RateLimitDecision, RateLimiter, SlidingWindowRateLimiter};
pub use state_machine::PublishStateMachine;
