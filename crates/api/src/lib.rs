//! HTTP接口层
//!
//! 暴露两个独立的服务面：runner 面承接 Worker 的领取/心跳/
//! 交结果协议与运行查询，publisher 面承接手动发布触发。业务
//! 逻辑全部在注入的服务 trait 后面，这一层只做路由、参数提取
//! 和错误到状态码的映射。

pub mod error;
pub mod handlers;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use routes::{publisher_routes, runner_routes, PublisherState, RunnerState};
