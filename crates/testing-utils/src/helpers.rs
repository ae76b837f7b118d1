//! Test helper utilities and common testing patterns
//!
//! This module provides utilities for setting up test environments,
//! managing test data, and implementing common testing patterns.

use chrono::{DateTime, Utc};
use conductor_core::config::AppConfig;
use std::time::Duration;
use tokio::time::sleep;

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    ///
    /// This is useful for integration tests where you need to wait for
    /// asynchronous operations to complete.
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(50)).await;
        }

        false
    }

    /// Generate unique test names based on timestamp
    pub fn unique_name(prefix: &str) -> String {
        let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or(0);
        format!("{}_{}", prefix, timestamp)
    }

    /// Generate test timestamps with offsets from now
    pub fn timestamp_with_offset(offset_seconds: i64) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(offset_seconds)
    }
}

/// Assertion helpers for common testing patterns
pub struct TestAssertions;

impl TestAssertions {
    /// Assert that a collection contains exactly the expected items (order independent)
    pub fn assert_contains_exactly<T: PartialEq + std::fmt::Debug>(actual: &[T], expected: &[T]) {
        assert_eq!(
            actual.len(),
            expected.len(),
            "Collections have different lengths. Actual: {:?}, Expected: {:?}",
            actual,
            expected
        );

        for expected_item in expected {
            assert!(
                actual.contains(expected_item),
                "Expected item {:?} not found in actual collection {:?}",
                expected_item,
                actual
            );
        }
    }
}

/// Integration test setup helpers
pub struct IntegrationTestSetup;

impl IntegrationTestSetup {
    /// Set up logging for tests (call once per test binary)
    pub fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init();
    }

    /// Create a configuration for in-process service tests
    ///
    /// Uses in-memory SQLite, the in-process lock backend and short
    /// intervals so tests finish quickly without external services.
    pub fn create_test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.store.url = "sqlite::memory:".to_string();
        // In-memory SQLite needs a single connection or each
        // connection sees its own empty database
        config.store.max_connections = 1;
        config.store.min_connections = 1;
        config.lock.url = "memory:".to_string();
        config.runner.candidate_scan_interval_seconds = 1;
        config.runner.reclaim_interval_seconds = 1;
        config.runner.lease_ttl_seconds = 5;
        config.publisher.scan_interval_seconds = 1;
        config.publisher.proposal_check_interval_seconds = 1;
        config.worker.poll_interval_seconds = 1;
        config.worker.heartbeat_interval_seconds = 1;
        config.observability.metrics_enabled = false;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::config::ConfigValidator;

    #[tokio::test]
    async fn test_wait_for_eventually_true() {
        let mut counter = 0;
        let condition = || {
            counter += 1;
            let done = counter >= 3;
            async move { done }
        };

        let result = TestEnv::wait_for(condition, Duration::from_millis(500)).await;
        assert!(result);
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let result = TestEnv::wait_for(|| async { false }, Duration::from_millis(120)).await;
        assert!(!result);
    }

    #[test]
    fn test_unique_names_differ() {
        let a = TestEnv::unique_name("campaign");
        let b = TestEnv::unique_name("campaign");
        assert_ne!(a, b);
        assert!(a.starts_with("campaign_"));
    }

    #[test]
    fn test_create_test_config_is_valid() {
        let config = IntegrationTestSetup::create_test_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.url, "sqlite::memory:");
        assert_eq!(config.store.max_connections, 1);
    }
}
