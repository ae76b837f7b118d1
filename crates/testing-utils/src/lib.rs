//! # Conductor Testing Utils
//!
//! Shared testing utilities for the campaign control plane.
//! This crate provides mock implementations, test containers, and data
//! builders that can be used across all other crates in the workspace.
//!
//! ## Features
//!
//! - **Mock Repositories**: In-memory implementations of all repository traits
//! - **Mock Services**: Test doubles for the lock service and publish mechanism
//! - **Database Test Containers**: PostgreSQL test container with migrations
//! - **Test Data Builders**: Utilities for creating test entities
//!
//! ## Usage
//!
//! Add this crate as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! conductor-testing-utils = { path = "../testing-utils" }
//! ```
//!
//! Then use the mocks in your tests:
//!
//! ```rust
//! use conductor_testing_utils::mocks::*;
//! use conductor_testing_utils::builders::CandidateBuilder;
//! ```

pub mod builders;
pub mod containers;
pub mod helpers;
pub mod mocks;

// Re-export commonly used items
pub use builders::*;
pub use containers::*;
pub use helpers::*;
pub use mocks::*;
