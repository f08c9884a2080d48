//! # bench-results
//!
//! Turns captured workload output into structured metrics and merges the
//! job runs of one invocation into a persisted [`RunSummary`].
//!
//! Extraction is a synchronous pass over already-captured text. Each benchmark
//! kind registers an ordered list of [`ExtractionRule`]s; adding a benchmark
//! means registering rules, nothing else.

pub mod aggregate;
pub mod extract;

pub use aggregate::{aggregate, new_run_id, RunEntry, RunSummary, Verdict, SUMMARY_FILE};
pub use extract::{Anchor, ExtractionRule, ExtractorRegistry};
