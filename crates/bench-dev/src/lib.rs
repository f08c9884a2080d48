//! # bench-dev
//!
//! Development and testing utilities for benchctl.
//!
//! This crate provides:
//! - A mock orchestrator with scripted pod lifecycles and a mutation counter
//! - A mock node host with scripted join failures
//! - Fixture logs for every built-in benchmark kind
//! - Test logging and configuration helpers

pub mod fixtures;
pub mod mock_host;
pub mod mock_orchestrator;
pub mod utils;

// Re-export commonly used types
pub use mock_host::{MockJoinFailure, MockNodeHost};
pub use mock_orchestrator::{MockJobPlan, MockOrchestrator, MockOutcome};
pub use utils::{setup_test_logging, test_config};
