use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracebench_core::{
    sources::UsageSource,
    test_case::TimeWindow,
    usage::{ResourceKind, UsageSeries},
};
use tracebench_error::{generic_error, ErrorContext as _, GenericError};
use tracing::debug;

use crate::{build_client, decode_response, process_response};

/// A [`UsageSource`] backed by the Prometheus HTTP API.
///
/// Usage is the ratio of a container's consumption to its resource limit, sampled with a range query over the
/// collection window. The queries rely on the recording rules shipped with `kube-prometheus`.
pub struct PrometheusUsageSource {
    client: Client,
    url: String,
    namespace: String,
    step_secs: u64,
}

impl PrometheusUsageSource {
    /// Creates a new `PrometheusUsageSource` for the Prometheus server at `endpoint`, e.g. `http://prometheus:9090`.
    ///
    /// `step_secs` is the resolution of the range query. A step of zero is treated as one second.
    ///
    /// # Errors
    ///
    /// If the HTTP client cannot be built, an error is returned.
    pub fn new<E, N>(endpoint: E, namespace: N, step_secs: u64) -> Result<Self, GenericError>
    where
        E: AsRef<str>,
        N: Into<String>,
    {
        Ok(Self {
            client: build_client()?,
            url: format!("{}/api/v1/query_range", endpoint.as_ref().trim_end_matches('/')),
            namespace: namespace.into(),
            step_secs: step_secs.max(1),
        })
    }

    fn query(&self, resource: ResourceKind, microservices: &[String]) -> String {
        let constraint = format!(
            r#"namespace="{}", container!="POD", container!="", pod=~"{}""#,
            self.namespace,
            pod_selector(microservices)
        );
        match resource {
            ResourceKind::Cpu => format!(
                "sum(node_namespace_pod_container:container_cpu_usage_seconds_total:sum_irate{{{c}}}) \
                 by (container, pod) / \
                 sum(kube_pod_container_resource_limits{{{c}, resource=\"cpu\"}}) by (container, pod)",
                c = constraint
            ),
            ResourceKind::Memory => format!(
                "sum(node_namespace_pod_container:container_memory_working_set_bytes{{{c}}}) by (pod) / \
                 sum(kube_pod_container_resource_limits{{{c}, resource=\"memory\"}}) by (pod)",
                c = constraint
            ),
        }
    }
}

#[async_trait]
impl UsageSource for PrometheusUsageSource {
    async fn fetch_usage(
        &self, resource: ResourceKind, microservices: &[String], window: &TimeWindow,
    ) -> Result<UsageSeries, GenericError> {
        let params = [
            ("query", self.query(resource, microservices)),
            ("start", window.start_secs().to_string()),
            ("end", window.end_secs().to_string()),
            ("step", self.step_secs.to_string()),
        ];
        let response = self
            .client
            .get(&self.url)
            .query(&params)
            .send()
            .await
            .with_error_context(|| format!("Failed to query Prometheus for {} usage.", resource))?;
        debug!(url = %response.url(), %resource, "Fetched resource usage.");

        let response = process_response(response).await?;
        let body = decode_response::<QueryResponse>(response, "Prometheus").await?;
        parse_series(body)
    }
}

/// Matches the pods of the given microservices by name prefix, or every pod when none are given.
fn pod_selector(microservices: &[String]) -> String {
    if microservices.is_empty() {
        return ".*".to_string();
    }
    microservices
        .iter()
        .map(|microservice| format!("{}.*", microservice))
        .collect::<Vec<_>>()
        .join("|")
}

#[derive(Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<QueryData>,
}

#[derive(Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<RangeSeries>,
}

#[derive(Deserialize)]
struct RangeSeries {
    #[serde(default)]
    metric: Metric,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

#[derive(Default, Deserialize)]
struct Metric {
    pod: Option<String>,
}

fn parse_series(response: QueryResponse) -> Result<UsageSeries, GenericError> {
    if response.status != "success" {
        return Err(generic_error!(
            "Prometheus query failed: {}",
            response.error.unwrap_or_else(|| response.status.clone())
        ));
    }

    let mut series = UsageSeries::default();
    for result in response.data.map(|data| data.result).unwrap_or_default() {
        // Aggregations that dropped the pod label cannot be attributed.
        let Some(pod) = result.metric.pod else {
            continue;
        };

        let samples = result
            .values
            .iter()
            .map(|(_, value)| {
                value
                    .parse::<f64>()
                    .with_error_context(|| format!("Invalid sample value '{}' for pod '{}'.", value, pod))
            })
            .collect::<Result<Vec<_>, _>>()?;
        series.extend(pod, samples);
    }

    Ok(series)
}
