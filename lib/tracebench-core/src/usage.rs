//! Per-pod resource usage.

use std::{collections::BTreeMap, fmt, sync::Arc};

use tracing::debug;

use crate::{
    error::CollectError,
    sources::UsageSource,
    table::TableRecord,
    test_case::TimeWindow,
};

/// A kind of resource whose usage is collected.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ResourceKind {
    /// CPU, as a fraction of the container's CPU limit.
    Cpu,

    /// Memory, as a fraction of the container's memory limit.
    Memory,
}

impl ResourceKind {
    /// Returns the short name of this resource kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Usage samples keyed by pod name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UsageSeries {
    samples: BTreeMap<String, Vec<f64>>,
}

impl UsageSeries {
    /// Adds samples for the given pod.
    ///
    /// Samples for a pod that already has some are appended.
    pub fn extend<S, I>(&mut self, pod: S, samples: I)
    where
        S: Into<String>,
        I: IntoIterator<Item = f64>,
    {
        self.samples.entry(pod.into()).or_default().extend(samples);
    }

    /// Returns `true` if no pod has samples.
    pub fn is_empty(&self) -> bool {
        self.samples.values().all(Vec::is_empty)
    }

    /// Returns an iterator over pods and their samples, ordered by pod name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.samples
            .iter()
            .map(|(pod, samples)| (pod.as_str(), samples.as_slice()))
    }
}

impl<S: Into<String>> FromIterator<(S, Vec<f64>)> for UsageSeries {
    fn from_iter<T: IntoIterator<Item = (S, Vec<f64>)>>(iter: T) -> Self {
        let mut series = Self::default();
        for (pod, samples) in iter {
            series.extend(pod, samples);
        }
        series
    }
}

/// Peak usage of one pod for one resource kind.
#[derive(Clone, Debug, PartialEq)]
pub struct UsageRecord {
    /// Microservice the pod belongs to.
    pub microservice: String,

    /// Pod name.
    pub pod: String,

    /// Usage, in `[0, 1]`.
    pub usage: f64,
}

/// CPU and memory usage of one pod.
#[derive(Clone, Debug, PartialEq)]
pub struct HardwareRecord {
    /// Microservice the pod belongs to.
    pub microservice: String,

    /// Pod name.
    pub pod: String,

    /// Peak CPU usage, in `[0, 1]`.
    pub cpu_usage: f64,

    /// Peak memory usage, in `[0, 1]`.
    pub mem_usage: f64,
}

impl TableRecord for HardwareRecord {
    fn columns() -> &'static [&'static str] {
        &["microservice", "pod", "cpu_usage", "mem_usage"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.microservice.clone(),
            self.pod.clone(),
            self.cpu_usage.to_string(),
            self.mem_usage.to_string(),
        ]
    }
}

/// Derives the microservice name from a pod name.
///
/// Deployment-managed pods are named `<microservice>-<replica set hash>-<pod hash>`, so the last two hyphen-delimited
/// segments are stripped. Names with fewer than three segments yield an empty string.
pub fn microservice_from_pod(pod: &str) -> String {
    let segments = pod.split('-').collect::<Vec<_>>();
    if segments.len() < 3 {
        return String::new();
    }
    segments[..segments.len() - 2].join("-")
}

/// Reduces a usage series to one record per pod.
///
/// Each pod's usage is its largest finite sample, clamped to `[0, 1]`. Pods without any finite sample are skipped.
pub fn usage_records(series: &UsageSeries) -> Vec<UsageRecord> {
    series
        .iter()
        .filter_map(|(pod, samples)| {
            let peak = samples
                .iter()
                .copied()
                .filter(|sample| sample.is_finite())
                .reduce(f64::max)?;
            Some(UsageRecord {
                microservice: microservice_from_pod(pod),
                pod: pod.to_string(),
                usage: peak.clamp(0.0, 1.0),
            })
        })
        .collect()
}

/// Joins CPU and memory records on `(microservice, pod)`.
///
/// Only pods present in both inputs are kept, in the order of `cpu`.
pub fn join_hardware(cpu: &[UsageRecord], mem: &[UsageRecord]) -> Vec<HardwareRecord> {
    let mem_by_pod = mem
        .iter()
        .map(|record| ((record.microservice.as_str(), record.pod.as_str()), record.usage))
        .collect::<BTreeMap<_, _>>();

    cpu.iter()
        .filter_map(|record| {
            let mem_usage = mem_by_pod.get(&(record.microservice.as_str(), record.pod.as_str()))?;
            Some(HardwareRecord {
                microservice: record.microservice.clone(),
                pod: record.pod.clone(),
                cpu_usage: record.usage,
                mem_usage: *mem_usage,
            })
        })
        .collect()
}

/// Correlates observed microservices with their pods' resource usage.
#[derive(Clone)]
pub struct UsageJoiner {
    source: Arc<dyn UsageSource>,
}

impl UsageJoiner {
    /// Creates a new `UsageJoiner` backed by the given usage source.
    pub fn new(source: Arc<dyn UsageSource>) -> Self {
        Self { source }
    }

    /// Collects peak usage of one resource kind for the pods of the given microservices.
    ///
    /// Empty and duplicate microservice names are ignored. Pods reported by the source that do not map back to one of
    /// the requested microservices are kept.
    ///
    /// # Errors
    ///
    /// If the usage source fails, [`CollectError::TransientIo`] is returned. If it answered with samples that could not
    /// be decoded, [`CollectError::MalformedInput`] is returned instead.
    pub async fn collect(
        &self, resource: ResourceKind, microservices: &[String], window: &TimeWindow,
    ) -> Result<Vec<UsageRecord>, CollectError> {
        let microservices = unique_microservices(microservices);
        let series = self
            .source
            .fetch_usage(resource, &microservices, window)
            .await
            .map_err(|e| CollectError::from_fetch(resource_what(resource), e))?;

        let records = usage_records(&series);
        debug!(%resource, requested = microservices.len(), pods = records.len(), "Collected resource usage.");
        Ok(records)
    }

    /// Collects CPU and memory usage and joins them per pod.
    ///
    /// # Errors
    ///
    /// If either query fails, the error of [`collect`][Self::collect] is returned.
    pub async fn collect_hardware(
        &self, microservices: &[String], window: &TimeWindow,
    ) -> Result<Vec<HardwareRecord>, CollectError> {
        let cpu = self.collect(ResourceKind::Cpu, microservices, window).await?;
        let mem = self.collect(ResourceKind::Memory, microservices, window).await?;
        Ok(join_hardware(&cpu, &mem))
    }
}

fn resource_what(resource: ResourceKind) -> &'static str {
    match resource {
        ResourceKind::Cpu => "CPU usage",
        ResourceKind::Memory => "memory usage",
    }
}

fn unique_microservices(microservices: &[String]) -> Vec<String> {
    let mut unique = Vec::with_capacity(microservices.len());
    for microservice in microservices {
        if !microservice.is_empty() && !unique.contains(microservice) {
            unique.push(microservice.clone());
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{window, FixedUsageSource};

    #[test]
    fn pod_names_map_to_microservices() {
        assert_eq!(microservice_from_pod("frontend-5d8f9c-abcde"), "frontend");
        assert_eq!(microservice_from_pod("user-timeline-service-79c4d8-bbbbb"), "user-timeline-service");
        assert_eq!(microservice_from_pod("redis-0"), "");
        assert_eq!(microservice_from_pod(""), "");
    }

    #[test]
    fn peak_samples_are_clamped() {
        let series = [
            ("cart-79c4d8-bbbbb", vec![0.2, 1.7, 0.4]),
            ("frontend-5d8f9c-aaaaa", vec![-0.5, f64::NAN]),
            ("idle-79c4d8-ccccc", vec![f64::NAN]),
        ]
        .into_iter()
        .collect::<UsageSeries>();

        let records = usage_records(&series);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].microservice, "cart");
        assert_eq!(records[0].usage, 1.0);
        assert_eq!(records[1].usage, 0.0);
    }

    #[test]
    fn hardware_is_an_inner_join() {
        let cpu = vec![
            UsageRecord {
                microservice: "cart".into(),
                pod: "cart-a-b".into(),
                usage: 0.5,
            },
            UsageRecord {
                microservice: "user".into(),
                pod: "user-a-b".into(),
                usage: 0.1,
            },
        ];
        let mem = vec![UsageRecord {
            microservice: "cart".into(),
            pod: "cart-a-b".into(),
            usage: 0.25,
        }];

        let joined = join_hardware(&cpu, &mem);
        assert_eq!(
            joined,
            [HardwareRecord {
                microservice: "cart".into(),
                pod: "cart-a-b".into(),
                cpu_usage: 0.5,
                mem_usage: 0.25,
            }]
        );
    }

    #[tokio::test]
    async fn joiner_queries_each_resource_with_unique_names() {
        let mut series: BTreeMap<ResourceKind, UsageSeries> = BTreeMap::new();
        series.insert(
            ResourceKind::Cpu,
            [("cart-79c4d8-bbbbb", vec![0.3]), ("sidecar-1-2", vec![0.9])]
                .into_iter()
                .collect(),
        );
        series.insert(
            ResourceKind::Memory,
            [("cart-79c4d8-bbbbb", vec![0.6]), ("sidecar-1-2", vec![0.1])]
                .into_iter()
                .collect(),
        );
        let source = Arc::new(FixedUsageSource::new(series));
        let joiner = UsageJoiner::new(source.clone());

        let names = vec!["cart".to_string(), String::new(), "cart".to_string()];
        let records = joiner.collect_hardware(&names, &window()).await.unwrap();

        assert_eq!(source.requested(), [vec!["cart".to_string()], vec!["cart".to_string()]]);
        // Pods outside the requested microservices are kept.
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].microservice, "sidecar");
        assert_eq!(records[1].mem_usage, 0.1);
    }

    #[tokio::test]
    async fn source_failure_is_transient_io() {
        let joiner = UsageJoiner::new(Arc::new(FixedUsageSource::failing()));
        let err = joiner
            .collect(ResourceKind::Cpu, &["cart".to_string()], &window())
            .await
            .unwrap_err();
        assert!(matches!(err, CollectError::TransientIo { what: "CPU usage", .. }));
    }
}
