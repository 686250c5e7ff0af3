//! Fixtures shared by unit tests.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{TimeZone as _, Utc};
use tracebench_error::{generic_error, ErrorContext as _, GenericError};

use crate::{
    sources::{ThroughputSource, TraceSource, UsageSource},
    test_case::{TestCaseContext, TimeWindow},
    trace::{CallEdge, Process, Reference, Span, Tag, Trace, TraceExport},
    usage::{ResourceKind, UsageSeries},
};

pub fn span(trace_id: &str, span_id: &str, parent: Option<&str>, start: i64, duration: i64, process: &str) -> Span {
    Span {
        trace_id: trace_id.to_string(),
        span_id: span_id.to_string(),
        operation: format!("op-{}", span_id),
        references: parent
            .map(|parent| {
                vec![Reference {
                    span_id: parent.to_string(),
                }]
            })
            .unwrap_or_default(),
        start_time: start,
        duration,
        process_id: process.to_string(),
    }
}

pub fn process(service: &str, hostname: Option<&str>) -> Process {
    Process {
        service_name: service.to_string(),
        tags: hostname
            .map(|hostname| {
                vec![Tag {
                    key: "hostname".to_string(),
                    value: serde_json::Value::String(hostname.to_string()),
                }]
            })
            .unwrap_or_default(),
    }
}

pub fn export(traces: Vec<(&str, Vec<Span>, Vec<(&str, Process)>)>) -> TraceExport {
    TraceExport {
        data: traces
            .into_iter()
            .map(|(trace_id, spans, processes)| Trace {
                trace_id: trace_id.to_string(),
                spans,
                processes: processes
                    .into_iter()
                    .map(|(id, process)| (id.to_string(), process))
                    .collect(),
            })
            .collect(),
    }
}

/// An edge with parent `parent@[0, parent_duration]` calling `child@[start, end]`.
pub fn edge(trace_id: &str, parent: (&str, &str, i64), child: (&str, &str, i64, i64)) -> CallEdge {
    let (parent_id, parent_ms, parent_duration) = parent;
    let (child_id, child_ms, start, end) = child;
    CallEdge {
        trace_id: trace_id.to_string(),
        trace_time: Some(0),
        parent_id: parent_id.to_string(),
        child_id: child_id.to_string(),
        parent_operation: format!("op-{}", parent_id),
        child_operation: format!("op-{}", child_id),
        parent_ms: parent_ms.to_string(),
        parent_pod: format!("{}-pod", parent_ms),
        child_ms: child_ms.to_string(),
        child_pod: format!("{}-pod", child_ms),
        start_time: start,
        end_time: end,
        parent_duration,
        child_duration: end - start,
    }
}

pub fn window() -> TimeWindow {
    TimeWindow::new(
        Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        Utc.timestamp_opt(1_700_000_060, 0).unwrap(),
    )
}

pub fn test_case(name: &str) -> TestCaseContext {
    TestCaseContext::new(name, window())
        .with_column("round", 1i64)
        .with_column("cpu", 2i64)
}

/// A two-tier trace: `frontend` calls `cart` twice in sequence, `cart` calls `redis` once.
pub fn sample_export() -> TraceExport {
    export(vec![(
        "t1",
        vec![
            span("t1", "root", None, 0, 100, "p1"),
            span("t1", "c1", Some("root"), 10, 20, "p2"),
            span("t1", "c2", Some("root"), 50, 20, "p2"),
            span("t1", "r1", Some("c1"), 12, 5, "p3"),
        ],
        vec![
            ("p1", process("frontend", Some("frontend-5d8f9c-aaaaa"))),
            ("p2", process("cart", Some("cart-79c4d8-bbbbb"))),
            ("p3", process("redis", Some("redis-6f5b7c-ccccc"))),
        ],
    )])
}

enum TraceReply {
    Export(TraceExport),
    Unavailable,
    Body(&'static str),
}

/// Trace source returning a fixed export, failing, or answering with a raw body to decode.
pub struct FixedTraceSource {
    reply: TraceReply,
    calls: AtomicUsize,
}

impl FixedTraceSource {
    fn with_reply(reply: TraceReply) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn new(export: TraceExport) -> Self {
        Self::with_reply(TraceReply::Export(export))
    }

    pub fn failing() -> Self {
        Self::with_reply(TraceReply::Unavailable)
    }

    /// Answers with a body where every span lacks its start time.
    pub fn malformed() -> Self {
        Self::with_reply(TraceReply::Body(
            r#"{"data": [{"traceID": "t1", "spans": [{"traceID": "t1", "spanID": "a", "operationName": "GET /"}]}]}"#,
        ))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TraceSource for FixedTraceSource {
    async fn fetch_traces(
        &self, _window: &TimeWindow, _operation: Option<&str>, _limit: usize,
    ) -> Result<TraceExport, GenericError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            TraceReply::Export(export) => Ok(export.clone()),
            TraceReply::Unavailable => Err(generic_error!("trace back end unavailable")),
            TraceReply::Body(raw) => serde_json::from_str(raw).error_context("Failed to decode trace export."),
        }
    }
}

/// Usage source returning fixed series per resource, or failing if none are set.
pub struct FixedUsageSource {
    series: Option<BTreeMap<ResourceKind, UsageSeries>>,
    requested: Mutex<Vec<Vec<String>>>,
}

impl FixedUsageSource {
    pub fn new(series: BTreeMap<ResourceKind, UsageSeries>) -> Self {
        Self {
            series: Some(series),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            series: None,
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn requested(&self) -> Vec<Vec<String>> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl UsageSource for FixedUsageSource {
    async fn fetch_usage(
        &self, resource: ResourceKind, microservices: &[String], _window: &TimeWindow,
    ) -> Result<UsageSeries, GenericError> {
        self.requested.lock().unwrap().push(microservices.to_vec());
        let series = self
            .series
            .as_ref()
            .ok_or_else(|| generic_error!("metrics back end unavailable"))?;
        Ok(series.get(&resource).cloned().unwrap_or_default())
    }
}

/// Throughput source that optionally sleeps, tracking how many calls overlap.
#[derive(Default)]
pub struct SlowThroughputSource {
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
    completed: AtomicUsize,
}

impl SlowThroughputSource {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ThroughputSource for SlowThroughputSource {
    async fn fetch_throughput(&self, test_case_name: &str) -> Result<f64, GenericError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);

        if test_case_name == "panic" {
            panic!("throughput source crashed");
        }

        Ok(123.5)
    }
}
