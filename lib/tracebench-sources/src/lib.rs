//! Reference collaborators for the collection pipeline.
//!
//! - [`JaegerTraceSource`] queries the Jaeger query API for traces.
//! - [`PrometheusUsageSource`] queries Prometheus for per-pod CPU and memory usage.
//! - [`WrkThroughputSource`] reads the throughput that the `wrk` workload generator wrote to disk.
#![deny(warnings)]
#![deny(missing_docs)]

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracebench_error::{generic_error, ErrorContext as _, GenericError};

mod jaeger;
pub use self::jaeger::JaegerTraceSource;

mod prometheus;
pub use self::prometheus::PrometheusUsageSource;

mod wrk;
pub use self::wrk::WrkThroughputSource;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn build_client() -> Result<Client, GenericError> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .error_context("Failed to build HTTP client.")
}

async fn process_response(response: reqwest::Response) -> Result<reqwest::Response, GenericError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_else(|_| String::from("<no body>"));
        Err(generic_error!("Received non-success response ({}): {}.", status, body))
    }
}

async fn decode_response<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T, GenericError> {
    let body = response
        .bytes()
        .await
        .with_error_context(|| format!("Failed to read {} response.", what))?;
    decode_body(&body, what)
}

fn decode_body<T: DeserializeOwned>(body: &[u8], what: &str) -> Result<T, GenericError> {
    serde_json::from_slice(body).with_error_context(|| format!("Failed to decode {} response.", what))
}
