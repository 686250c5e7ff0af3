//! Collaborators that supply raw observations.
//!
//! The core never talks to a tracing back end, a metrics back end or a load generator directly. Each is reached through
//! one of these traits, so that deployments can plug in their own fetchers and tests can use in-memory fakes.

use async_trait::async_trait;
use tracebench_error::GenericError;

use crate::{
    test_case::TimeWindow,
    trace::TraceExport,
    usage::{ResourceKind, UsageSeries},
};

/// A source of distributed traces.
#[async_trait]
pub trait TraceSource: Send + Sync {
    /// Fetches up to `limit` traces that started within `window`, optionally restricted to one operation.
    ///
    /// # Errors
    ///
    /// If the traces could not be fetched or decoded, an error is returned.
    async fn fetch_traces(
        &self, window: &TimeWindow, operation: Option<&str>, limit: usize,
    ) -> Result<TraceExport, GenericError>;
}

/// A source of per-pod resource usage.
#[async_trait]
pub trait UsageSource: Send + Sync {
    /// Fetches usage samples of the given resource for the pods of the given microservices within `window`.
    ///
    /// Sample values are fractions of the pod's limit, nominally in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// If the usage could not be fetched or decoded, an error is returned.
    async fn fetch_usage(
        &self, resource: ResourceKind, microservices: &[String], window: &TimeWindow,
    ) -> Result<UsageSeries, GenericError>;
}

/// A source of achieved workload throughput.
#[async_trait]
pub trait ThroughputSource: Send + Sync {
    /// Fetches the throughput achieved by the named test case, in requests per second.
    ///
    /// # Errors
    ///
    /// If the throughput could not be read, an error is returned.
    async fn fetch_throughput(&self, test_case_name: &str) -> Result<f64, GenericError>;
}
