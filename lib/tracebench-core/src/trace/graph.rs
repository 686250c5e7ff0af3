use std::collections::HashMap;

use crate::{
    error::CollectError,
    table::TableRecord,
    trace::{Span, Trace, TraceExport},
};

/// A parent/child call between two spans of the same trace.
#[derive(Clone, Debug, PartialEq)]
pub struct CallEdge {
    /// Trace ID.
    pub trace_id: String,

    /// Start time of the trace's root span, if the root span was exported.
    pub trace_time: Option<i64>,

    /// Parent span ID.
    pub parent_id: String,

    /// Child span ID.
    pub child_id: String,

    /// Parent operation name.
    pub parent_operation: String,

    /// Child operation name.
    pub child_operation: String,

    /// Microservice of the parent span.
    pub parent_ms: String,

    /// Pod of the parent span.
    pub parent_pod: String,

    /// Microservice of the child span.
    pub child_ms: String,

    /// Pod of the child span.
    pub child_pod: String,

    /// Child start time, in microseconds since the Unix epoch.
    pub start_time: i64,

    /// Child end time, in microseconds since the Unix epoch.
    pub end_time: i64,

    /// Parent duration, in microseconds.
    pub parent_duration: i64,

    /// Child duration, in microseconds.
    pub child_duration: i64,
}

impl TableRecord for CallEdge {
    fn columns() -> &'static [&'static str] {
        &[
            "trace_id",
            "trace_time",
            "start_time",
            "end_time",
            "parent_id",
            "child_id",
            "child_operation",
            "parent_operation",
            "child_ms",
            "child_pod",
            "parent_ms",
            "parent_pod",
            "parent_duration",
            "child_duration",
        ]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.trace_id.clone(),
            self.trace_time.map(|t| t.to_string()).unwrap_or_default(),
            self.start_time.to_string(),
            self.end_time.to_string(),
            self.parent_id.clone(),
            self.child_id.clone(),
            self.child_operation.clone(),
            self.parent_operation.clone(),
            self.child_ms.clone(),
            self.child_pod.clone(),
            self.parent_ms.clone(),
            self.parent_pod.clone(),
            self.parent_duration.to_string(),
            self.child_duration.to_string(),
        ]
    }
}

/// Counters describing how an export was turned into call edges.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct GraphSummary {
    /// Number of traces in the export.
    pub traces: usize,

    /// Number of spans in the export.
    pub spans: usize,

    /// Number of spans without a parent reference.
    pub root_spans: usize,

    /// Number of spans whose parent span was not part of the export.
    pub orphaned_spans: usize,
}

/// Call edges of a trace export.
#[derive(Clone, Debug, Default)]
pub struct SpanGraph {
    /// One edge per span that has a parent in the export, in export order.
    pub edges: Vec<CallEdge>,

    /// Build counters.
    pub summary: GraphSummary,
}

struct ProcessIdentity {
    microservice: String,
    pod: String,
}

/// Flattens a trace export into parent/child call edges.
///
/// Each span with a parent reference is joined with its parent span, and both sides are resolved to a microservice and
/// pod through the trace's process map. Spans whose parent is missing from the export are skipped and counted in
/// [`GraphSummary::orphaned_spans`].
///
/// # Errors
///
/// If the export holds no traces, [`CollectError::NoData`] is returned. If a span refers to a process that is not in
/// its trace's process map, [`CollectError::MalformedInput`] is returned.
pub fn build_call_edges(export: &TraceExport) -> Result<SpanGraph, CollectError> {
    if export.is_empty() {
        return Err(CollectError::NoData { what: "traces" });
    }

    let mut graph = SpanGraph::default();
    for trace in &export.data {
        add_trace(trace, &mut graph)?;
    }

    Ok(graph)
}

fn add_trace(trace: &Trace, graph: &mut SpanGraph) -> Result<(), CollectError> {
    let processes = trace
        .processes
        .iter()
        .map(|(process_id, process)| {
            let identity = ProcessIdentity {
                microservice: process.service_name.clone(),
                pod: process.pod_name(),
            };
            (process_id.as_str(), identity)
        })
        .collect::<HashMap<_, _>>();

    let spans_by_id = trace
        .spans
        .iter()
        .map(|span| ((span.trace_id.as_str(), span.span_id.as_str()), span))
        .collect::<HashMap<_, _>>();

    let trace_time = trace
        .spans
        .iter()
        .filter(|span| span.is_root())
        .map(|span| span.start_time)
        .min();

    graph.summary.traces += 1;
    graph.summary.spans += trace.spans.len();

    for child in &trace.spans {
        let Some(parent_id) = child.parent_id() else {
            graph.summary.root_spans += 1;
            continue;
        };

        let Some(parent) = spans_by_id.get(&(child.trace_id.as_str(), parent_id)) else {
            graph.summary.orphaned_spans += 1;
            continue;
        };

        let child_identity = resolve_process(&processes, child)?;
        let parent_identity = resolve_process(&processes, parent)?;

        graph.edges.push(CallEdge {
            trace_id: child.trace_id.clone(),
            trace_time,
            parent_id: parent.span_id.clone(),
            child_id: child.span_id.clone(),
            parent_operation: parent.operation.clone(),
            child_operation: child.operation.clone(),
            parent_ms: parent_identity.microservice.clone(),
            parent_pod: parent_identity.pod.clone(),
            child_ms: child_identity.microservice.clone(),
            child_pod: child_identity.pod.clone(),
            start_time: child.start_time,
            end_time: child.start_time + child.duration,
            parent_duration: parent.duration,
            child_duration: child.duration,
        });
    }

    Ok(())
}

fn resolve_process<'a>(
    processes: &'a HashMap<&str, ProcessIdentity>, span: &Span,
) -> Result<&'a ProcessIdentity, CollectError> {
    processes
        .get(span.process_id.as_str())
        .ok_or_else(|| CollectError::MalformedInput {
            what: "trace export",
            reason: format!(
                "span '{}' of trace '{}' refers to unknown process '{}'",
                span.span_id, span.trace_id, span.process_id
            ),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{export, process, span};

    #[test]
    fn empty_export_is_no_data() {
        let err = build_call_edges(&TraceExport::default()).unwrap_err();
        assert!(err.is_no_data());
    }

    #[test]
    fn joins_children_with_parents() {
        let export = export(vec![(
            "t1",
            vec![
                span("t1", "root", None, 1_000, 500, "p1"),
                span("t1", "c1", Some("root"), 1_010, 100, "p2"),
                span("t1", "c2", Some("c1"), 1_020, 30, "p3"),
            ],
            vec![
                ("p1", process("frontend", Some("frontend-5d8f-aaaaa"))),
                ("p2", process("cart", Some("cart-79c4-bbbbb"))),
                ("p3", process("redis", None)),
            ],
        )]);

        let graph = build_call_edges(&export).unwrap();
        assert_eq!(graph.edges.len(), 2);
        assert_eq!(graph.summary.root_spans, 1);
        assert_eq!(graph.summary.spans, 3);

        let first = &graph.edges[0];
        assert_eq!(first.parent_id, "root");
        assert_eq!(first.child_id, "c1");
        assert_eq!(first.parent_ms, "frontend");
        assert_eq!(first.parent_pod, "frontend-5d8f-aaaaa");
        assert_eq!(first.child_ms, "cart");
        assert_eq!(first.start_time, 1_010);
        assert_eq!(first.end_time, 1_110);
        assert_eq!(first.parent_duration, 500);
        assert_eq!(first.child_duration, 100);
        assert_eq!(first.trace_time, Some(1_000));

        let second = &graph.edges[1];
        assert_eq!(second.parent_ms, "cart");
        assert_eq!(second.child_ms, "redis");
        assert_eq!(second.child_pod, "");
    }

    #[test]
    fn orphaned_spans_are_counted_not_joined() {
        let export = export(vec![(
            "t1",
            vec![span("t1", "c1", Some("missing"), 10, 5, "p1")],
            vec![("p1", process("cart", None))],
        )]);

        let graph = build_call_edges(&export).unwrap();
        assert!(graph.edges.is_empty());
        assert_eq!(graph.summary.orphaned_spans, 1);
    }

    #[test]
    fn unknown_process_is_malformed() {
        let export = export(vec![(
            "t1",
            vec![span("t1", "root", None, 0, 10, "p1"), span("t1", "c1", Some("root"), 1, 5, "p9")],
            vec![("p1", process("frontend", None))],
        )]);

        let err = build_call_edges(&export).unwrap_err();
        assert!(matches!(err, CollectError::MalformedInput { .. }));
    }
}
