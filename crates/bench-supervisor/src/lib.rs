//! # bench-supervisor
//!
//! Benchmark job execution for benchctl.
//!
//! This crate provides:
//! - The [`JobSupervisor`], which submits a workload with delete-then-create
//!   semantics, waits for scheduling, supervises execution under a
//!   wall-clock deadline, and records a terminal [`bench_core::JobRun`]
//! - Job manifest rendering
//! - Run-scoped artifact directories
//! - A cancellable log tee and failure diagnostics

pub mod artifacts;
pub mod diagnostics;
pub mod logs;
pub mod manifest;
pub mod supervisor;

pub use artifacts::{JobArtifacts, RunDirectory};
pub use logs::LogTee;
pub use manifest::render_job;
pub use supervisor::JobSupervisor;
