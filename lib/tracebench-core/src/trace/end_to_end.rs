use std::collections::{BTreeMap, HashSet};

use crate::{table::TableRecord, trace::CallEdge};

/// End-to-end latency of one trace.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EndToEndRecord {
    /// Trace ID.
    pub trace_id: String,

    /// Duration of the trace's root span, in microseconds.
    pub trace_duration: i64,
}

impl TableRecord for EndToEndRecord {
    fn columns() -> &'static [&'static str] {
        &["trace_id", "trace_duration"]
    }

    fn cells(&self) -> Vec<String> {
        vec![self.trace_id.clone(), self.trace_duration.to_string()]
    }
}

/// Derives one end-to-end latency per trace.
///
/// Root rows are the edges whose parent never appears as a child anywhere in `edges`. The latency of a trace is the
/// largest parent duration among its root rows. Records are sorted by trace ID.
pub fn extract_end_to_end<'a, I>(edges: I) -> Vec<EndToEndRecord>
where
    I: IntoIterator<Item = &'a CallEdge>,
    I::IntoIter: Clone,
{
    let edges = edges.into_iter();
    let children = edges.clone().map(|edge| edge.child_id.as_str()).collect::<HashSet<_>>();

    let mut durations: BTreeMap<&str, i64> = BTreeMap::new();
    for edge in edges.filter(|edge| !children.contains(edge.parent_id.as_str())) {
        let duration = durations.entry(edge.trace_id.as_str()).or_insert(edge.parent_duration);
        *duration = (*duration).max(edge.parent_duration);
    }

    durations
        .into_iter()
        .map(|(trace_id, trace_duration)| EndToEndRecord {
            trace_id: trace_id.to_string(),
            trace_duration,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::edge;

    #[test]
    fn single_root_duration_is_end_to_end_latency() {
        let edges = vec![
            edge("t1", ("root", "frontend", 120), ("c1", "cart", 10, 40)),
            edge("t1", ("root", "frontend", 120), ("c2", "user", 50, 60)),
            edge("t1", ("c1", "cart", 30), ("r1", "redis", 12, 20)),
        ];

        let records = extract_end_to_end(&edges);
        assert_eq!(
            records,
            [EndToEndRecord {
                trace_id: "t1".into(),
                trace_duration: 120
            }]
        );
    }

    #[test]
    fn records_are_sorted_by_trace_id() {
        let edges = vec![
            edge("t2", ("b", "frontend", 80), ("c2", "cart", 0, 10)),
            edge("t1", ("a", "frontend", 90), ("c1", "cart", 0, 10)),
        ];

        let ids = extract_end_to_end(&edges)
            .into_iter()
            .map(|record| record.trace_id)
            .collect::<Vec<_>>();
        assert_eq!(ids, ["t1", "t2"]);
    }

    #[test]
    fn largest_root_duration_wins() {
        // The parent of a dropped subtree looks like a second root.
        let edges = vec![
            edge("t1", ("root", "frontend", 100), ("c1", "cart", 0, 10)),
            edge("t1", ("lost", "cart", 150), ("c9", "redis", 0, 10)),
        ];

        assert_eq!(extract_end_to_end(&edges)[0].trace_duration, 150);
    }

    #[test]
    fn no_edges_no_records() {
        assert!(extract_end_to_end(&Vec::<CallEdge>::new()).is_empty());
    }
}
