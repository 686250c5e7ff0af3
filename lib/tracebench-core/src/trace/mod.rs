//! Trace export model and latency decomposition.
//!
//! The flow through this module is: [`TraceExport`] → [`build_call_edges`] → [`decompose`] →
//! [`LatencyAggregator::aggregate`] and [`extract_end_to_end`].

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

mod aggregate;
pub use self::aggregate::{LatencyAggregator, Quantile, StatisticalRecord};

mod decompose;
pub use self::decompose::{
    decompose, exclusive_duration, merge_steps, DecomposedEdge, Decomposition, DecompositionSummary, Step,
};

mod end_to_end;
pub use self::end_to_end::{extract_end_to_end, EndToEndRecord};

mod graph;
pub use self::graph::{build_call_edges, CallEdge, GraphSummary, SpanGraph};

/// Tag key holding the pod name on a process.
pub const HOSTNAME_TAG: &str = "hostname";

/// A raw trace export, as returned by the Jaeger query API.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TraceExport {
    /// Exported traces.
    #[serde(default)]
    pub data: Vec<Trace>,
}

impl TraceExport {
    /// Returns `true` if the export holds no traces.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A single trace: a tree of spans plus the processes that emitted them.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Trace {
    /// Trace ID.
    #[serde(rename = "traceID", default)]
    pub trace_id: String,

    /// Spans in the trace.
    #[serde(default)]
    pub spans: Vec<Span>,

    /// Processes by process ID.
    #[serde(default)]
    pub processes: HashMap<String, Process>,
}

/// One timed operation within a trace.
#[derive(Clone, Debug, Deserialize)]
pub struct Span {
    /// ID of the trace this span belongs to.
    #[serde(rename = "traceID")]
    pub trace_id: String,

    /// Span ID.
    #[serde(rename = "spanID")]
    pub span_id: String,

    /// Operation name.
    #[serde(rename = "operationName")]
    pub operation: String,

    /// References to other spans. Only the first reference is treated as the parent.
    #[serde(default)]
    pub references: Vec<Reference>,

    /// Start time, in microseconds since the Unix epoch.
    #[serde(rename = "startTime")]
    pub start_time: i64,

    /// Duration, in microseconds.
    pub duration: i64,

    /// ID of the emitting process, resolved through [`Trace::processes`].
    #[serde(rename = "processID")]
    pub process_id: String,
}

impl Span {
    /// Returns the ID of the parent span, if this span has one.
    pub fn parent_id(&self) -> Option<&str> {
        self.references.first().map(|reference| reference.span_id.as_str())
    }

    /// Returns `true` if this span has no parent reference.
    pub fn is_root(&self) -> bool {
        self.references.is_empty()
    }
}

/// A reference from one span to another.
#[derive(Clone, Debug, Deserialize)]
pub struct Reference {
    /// ID of the referenced span.
    #[serde(rename = "spanID")]
    pub span_id: String,
}

/// A process that emitted spans.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Process {
    /// Name of the microservice.
    #[serde(rename = "serviceName", default)]
    pub service_name: String,

    /// Process tags.
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Process {
    /// Returns the pod name from the hostname tag, or an empty string if absent.
    pub fn pod_name(&self) -> String {
        self.tags
            .iter()
            .find(|tag| tag.key == HOSTNAME_TAG)
            .map(|tag| tag.value_string())
            .unwrap_or_default()
    }
}

/// A key/value tag.
#[derive(Clone, Debug, Deserialize)]
pub struct Tag {
    /// Tag key.
    pub key: String,

    /// Tag value. Jaeger types tag values, so this may be a string, number or boolean.
    #[serde(default)]
    pub value: Value,
}

impl Tag {
    /// Renders the tag value as text.
    pub fn value_string(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_jaeger_response() {
        let raw = r#"{
            "data": [{
                "traceID": "t1",
                "spans": [
                    {"traceID": "t1", "spanID": "a", "operationName": "GET /", "references": [],
                     "startTime": 100, "duration": 50, "processID": "p1", "flags": 1, "logs": []},
                    {"traceID": "t1", "spanID": "b", "operationName": "rpc",
                     "references": [{"refType": "CHILD_OF", "traceID": "t1", "spanID": "a"}],
                     "startTime": 110, "duration": 20, "processID": "p2"}
                ],
                "processes": {
                    "p1": {"serviceName": "frontend",
                           "tags": [{"key": "hostname", "type": "string", "value": "frontend-6b7f-abcde"}]},
                    "p2": {"serviceName": "cart", "tags": [{"key": "ip", "type": "string", "value": "10.0.0.2"}]}
                },
                "warnings": null
            }],
            "total": 0, "limit": 0, "offset": 0, "errors": null
        }"#;

        let export: TraceExport = serde_json::from_str(raw).unwrap();
        let trace = &export.data[0];
        assert_eq!(trace.spans.len(), 2);
        assert!(trace.spans[0].is_root());
        assert_eq!(trace.spans[1].parent_id(), Some("a"));
        assert_eq!(trace.processes["p1"].pod_name(), "frontend-6b7f-abcde");
        assert_eq!(trace.processes["p2"].pod_name(), "");
    }

    #[test]
    fn non_string_tag_values_are_rendered() {
        let tag = Tag {
            key: HOSTNAME_TAG.into(),
            value: serde_json::json!(42),
        };
        assert_eq!(tag.value_string(), "42");
    }
}
