use std::{collections::BTreeMap, fmt};

use crate::{table::Table, trace::DecomposedEdge};

/// A quantile in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Quantile(f64);

impl Quantile {
    /// The median.
    pub const P50: Quantile = Quantile(0.5);

    /// The 95th percentile.
    pub const P95: Quantile = Quantile(0.95);

    /// Creates a new `Quantile`.
    ///
    /// Returns `None` if `q` is not a finite value in `[0, 1]`.
    pub fn new(q: f64) -> Option<Self> {
        (q.is_finite() && (0.0..=1.0).contains(&q)).then_some(Self(q))
    }

    /// Returns the quantile as a fraction.
    pub fn value(&self) -> f64 {
        self.0
    }

    /// Returns the output column name for this quantile, e.g. `p50` or `p99.9`.
    pub fn label(&self) -> String {
        let percent = (self.0 * 100.0 * 1_000_000.0).round() / 1_000_000.0;
        format!("p{}", percent)
    }
}

impl fmt::Display for Quantile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Latency quantiles of one pod of one microservice.
#[derive(Clone, Debug, PartialEq)]
pub struct StatisticalRecord {
    /// Microservice name.
    pub microservice: String,

    /// Pod name.
    pub pod: String,

    /// Latency per quantile, in the aggregator's quantile order.
    pub latencies: Vec<(Quantile, f64)>,
}

impl StatisticalRecord {
    /// Returns the latency at the given quantile, if it was computed.
    pub fn latency(&self, quantile: Quantile) -> Option<f64> {
        self.latencies
            .iter()
            .find(|(q, _)| *q == quantile)
            .map(|(_, latency)| *latency)
    }
}

type PodKey = (String, String);

/// Computes per-pod latency quantiles from decomposed call edges.
///
/// Every pod is observed from two perspectives. As a parent, its latency is the exclusive duration of its spans. As a
/// child, its latency is the inclusive duration of its spans as seen by the caller. Within each perspective, the
/// latencies of a pod are first averaged per trace and then reduced to quantiles across traces. When a pod shows up in
/// both perspectives, the parent perspective wins.
#[derive(Clone, Debug)]
pub struct LatencyAggregator {
    quantiles: Vec<Quantile>,
}

impl LatencyAggregator {
    /// Creates a new `LatencyAggregator` computing the given quantiles, in order.
    pub fn new(quantiles: Vec<Quantile>) -> Self {
        Self { quantiles }
    }

    /// Returns the configured quantiles.
    pub fn quantiles(&self) -> &[Quantile] {
        &self.quantiles
    }

    /// Aggregates decomposed edges into one record per `(microservice, pod)`.
    ///
    /// Records from the parent perspective come first, sorted by microservice and pod, followed by the pods only seen
    /// as children, sorted the same way.
    pub fn aggregate(&self, edges: &[DecomposedEdge]) -> Vec<StatisticalRecord> {
        let parents = self.perspective(edges.iter().map(|row| {
            (
                (row.edge.parent_ms.as_str(), row.edge.parent_pod.as_str()),
                row.edge.trace_id.as_str(),
                row.exact_parent_duration as f64,
            )
        }));
        let children = self.perspective(edges.iter().map(|row| {
            (
                (row.edge.child_ms.as_str(), row.edge.child_pod.as_str()),
                row.edge.trace_id.as_str(),
                row.edge.child_duration as f64,
            )
        }));

        let child_only = children
            .into_iter()
            .filter(|(key, _)| !parents.contains_key(key))
            .collect::<Vec<_>>();

        parents
            .into_iter()
            .chain(child_only)
            .map(|((microservice, pod), latencies)| StatisticalRecord {
                microservice,
                pod,
                latencies,
            })
            .collect()
    }

    /// Lays out records as a table with `microservice`, `pod` and one column per quantile.
    pub fn to_table(&self, records: &[StatisticalRecord]) -> Table {
        let mut columns = vec!["microservice".to_string(), "pod".to_string()];
        columns.extend(self.quantiles.iter().map(Quantile::label));

        let mut table = Table::new(columns);
        for record in records {
            let mut row = vec![record.microservice.clone(), record.pod.clone()];
            row.extend(
                self.quantiles
                    .iter()
                    .map(|q| record.latency(*q).map(|l| l.to_string()).unwrap_or_default()),
            );
            table.push_row(row);
        }
        table
    }

    fn perspective<'a, I>(&self, samples: I) -> BTreeMap<PodKey, Vec<(Quantile, f64)>>
    where
        I: Iterator<Item = ((&'a str, &'a str), &'a str, f64)>,
    {
        // (sum, count) per pod and trace.
        let mut per_trace: BTreeMap<((&str, &str), &str), (f64, usize)> = BTreeMap::new();
        for (pod, trace_id, latency) in samples {
            let entry = per_trace.entry((pod, trace_id)).or_insert((0.0, 0));
            entry.0 += latency;
            entry.1 += 1;
        }

        let mut per_pod: BTreeMap<(&str, &str), Vec<f64>> = BTreeMap::new();
        for ((pod, _), (sum, count)) in per_trace {
            per_pod.entry(pod).or_default().push(sum / count as f64);
        }

        per_pod
            .into_iter()
            .map(|((microservice, pod), mut means)| {
                means.sort_by(f64::total_cmp);
                let latencies = self
                    .quantiles
                    .iter()
                    .map(|q| (*q, interpolate(&means, q.value())))
                    .collect();
                ((microservice.to_string(), pod.to_string()), latencies)
            })
            .collect()
    }
}

impl Default for LatencyAggregator {
    fn default() -> Self {
        Self::new(vec![Quantile::P50, Quantile::P95])
    }
}

/// Linear interpolation between closest ranks over sorted, non-empty `values`.
fn interpolate(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let fraction = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}
