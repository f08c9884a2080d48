//! # bench-cluster
//!
//! Node lifecycle and cluster gating for benchctl.
//!
//! This crate provides:
//! - The node reconciler, which drives the local node to a joined state in
//!   its role and resets partial state instead of patching it
//! - The preflight validator, which checks cluster invariants before any
//!   workload runs and grants a [`Clearance`]
//! - Live cluster state observation
//! - Production collaborators: [`KubectlOrchestrator`] and [`LocalNodeHost`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use bench_cluster::{KubectlOrchestrator, PreflightValidator};
//! use bench_core::Config;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(None)?;
//!     let orchestrator = Arc::new(KubectlOrchestrator::new(&config.cluster));
//!
//!     let validator = PreflightValidator::new(orchestrator, config.cluster.clone(), config.retry.policy());
//!     let report = validator.validate(false).await;
//!     let clearance = report.into_clearance()?;
//!     println!("cleared at {}", clearance.checked_at());
//!
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod host;
pub mod kubectl;
pub mod preflight;
pub mod reconciler;
pub mod state;

pub use host::LocalNodeHost;
pub use kubectl::KubectlOrchestrator;
pub use preflight::{CheckResult, CheckStatus, Clearance, PreflightReport, PreflightValidator};
pub use reconciler::{detect_state, NodeReconciler, ReconcileOutcome};
pub use state::{observe_cluster_state, require_ready};
