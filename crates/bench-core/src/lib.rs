//! # bench-core
//!
//! Core types, traits, and utilities for benchctl - a supervisor that drives a
//! bare-metal accelerator cluster and runs benchmark workloads on it.
//!
//! This crate provides the foundational pieces shared by every other crate:
//!
//! - The data model: node roles and states, join credentials, benchmark job
//!   specifications, job runs, and metric records
//! - The [`Orchestrator`] and [`NodeHost`] traits through which all cluster and
//!   node state is read and mutated
//! - Layered configuration loading
//! - The unified error type
//! - A bounded poll/backoff utility shared by every waiting component

pub mod config;
pub mod error;
pub mod job;
pub mod metrics;
pub mod poll;
pub mod traits;
pub mod types;

// Re-export commonly used types at the crate root
pub use config::{
    BenchmarkDefinition, ClusterConfig, Config, KeyValue, LoggingConfig, NodeConfig, RetryConfig,
    SupervisorConfig, Threshold,
};
pub use error::{Error, ErrorContext, Result};
pub use job::{BenchmarkJobSpec, JobRun, JobState, ResourceRequirements, RunMode, WorkloadRef};
pub use metrics::{MetricRecord, MetricValue};
pub use poll::{poll_until, retry_transient, PollError, PollPolicy, Probe};
pub use traits::{
    JobManifest, JobStatus, NodeHost, NodeInfo, NodeInspection, Orchestrator, PodPhase, PodStatus,
};
pub use types::{ClusterState, JoinCredential, NodeRole, NodeState};
