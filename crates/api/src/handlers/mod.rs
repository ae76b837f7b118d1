//! HTTP处理器

pub mod assignment;
pub mod health;
pub mod publish;
pub mod runs;
