pub mod lock_service;
pub mod publish;
pub mod repository;
pub mod services;

pub use lock_service::*;
pub use publish::*;
pub use repository::*;
pub use services::*;
