//! 外部发布机制实现
//!
//! 发布状态机通过 HTTP 网关执行实际的分支推送与提案创建，
//! 网关封装对代码托管方的访问凭据。

pub mod http_publisher;

pub use http_publisher::HttpPublishMechanism;
