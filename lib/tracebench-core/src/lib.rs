//! Trace-latency decomposition and the per-test-case collection pipeline.
//!
//! A test case is one load and interference configuration measured over a bounded time window. For each test case,
//! the [`pipeline::CollectionPipeline`] pulls raw observations from the trace, usage and throughput collaborators,
//! turns them into structured records, and appends them to CSV stores. The [`executor::AsyncExecutor`] runs those
//! pipelines on a bounded pool so collection can overlap with the next test case's load phase.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod error;
pub mod executor;
pub mod pipeline;
pub mod sources;
pub mod store;
pub mod table;
pub mod test_case;
pub mod trace;
pub mod usage;

#[cfg(test)]
mod testing;
