//! The default collection stages.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{CollectionStage, RegistryError, RunContext, StageOutput, StageProducer, StageRegistry};
use crate::{
    error::CollectError,
    sources::{ThroughputSource, TraceSource, UsageSource},
    table::{Table, TableRecord},
    trace::{build_call_edges, decompose, extract_end_to_end, Decomposition, LatencyAggregator, StatisticalRecord},
    usage::UsageJoiner,
};

/// Name of the throughput stage.
pub const THROUGHPUT_STAGE: &str = "throughput";

/// Name of the raw span stage.
pub const RAW_SPANS_STAGE: &str = "raw_spans";

/// Name of the latency statistics stage.
pub const STATISTICAL_STAGE: &str = "statistical";

/// Name of the end-to-end latency stage.
pub const END_TO_END_STAGE: &str = "end_to_end";

/// Name of the hardware usage stage.
pub const HARDWARE_STAGE: &str = "hardware";

/// Achieved throughput of a test case.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThroughputRecord {
    /// Requests per second.
    pub real_throughput: f64,
}

impl TableRecord for ThroughputRecord {
    fn columns() -> &'static [&'static str] {
        &["real_throughput"]
    }

    fn cells(&self) -> Vec<String> {
        vec![self.real_throughput.to_string()]
    }
}

/// Collaborators backing the default stages.
#[derive(Clone)]
pub struct DefaultSources {
    /// Trace source.
    pub traces: Arc<dyn TraceSource>,

    /// Usage source.
    pub usage: Arc<dyn UsageSource>,

    /// Throughput source.
    pub throughput: Arc<dyn ThroughputSource>,
}

impl StageRegistry {
    /// Creates a registry holding the default stages.
    ///
    /// | stage         | store                   | depends on    |
    /// |---------------|-------------------------|---------------|
    /// | `throughput`  | `throughput_data.csv`   |               |
    /// | `raw_spans`   | `raw_data.csv`          |               |
    /// | `statistical` | `statistical_data.csv`  | `raw_spans`   |
    /// | `end_to_end`  | `end_to_end_data.csv`   | `raw_spans`   |
    /// | `hardware`    | `hardware_data.csv`     | `statistical` |
    ///
    /// # Errors
    ///
    /// If the default stages cannot be registered, an error is returned.
    pub fn with_default_stages(
        sources: DefaultSources, trace_limit: usize, aggregator: LatencyAggregator,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();

        registry.register(CollectionStage::new(
            THROUGHPUT_STAGE,
            "throughput_data.csv",
            Arc::new(ThroughputStage {
                source: sources.throughput,
            }),
        ))?;
        registry.register(CollectionStage::new(
            RAW_SPANS_STAGE,
            "raw_data.csv",
            Arc::new(RawSpansStage {
                source: sources.traces,
                limit: trace_limit,
            }),
        ))?;
        registry.register(
            CollectionStage::new(STATISTICAL_STAGE, "statistical_data.csv", Arc::new(StatisticalStage { aggregator }))
                .depends_on([RAW_SPANS_STAGE]),
        )?;
        registry.register(
            CollectionStage::new(END_TO_END_STAGE, "end_to_end_data.csv", Arc::new(EndToEndStage))
                .depends_on([RAW_SPANS_STAGE]),
        )?;
        registry.register(
            CollectionStage::new(
                HARDWARE_STAGE,
                "hardware_data.csv",
                Arc::new(HardwareStage {
                    joiner: UsageJoiner::new(sources.usage),
                }),
            )
            .depends_on([STATISTICAL_STAGE]),
        )?;

        Ok(registry)
    }
}

struct ThroughputStage {
    source: Arc<dyn ThroughputSource>,
}

#[async_trait]
impl StageProducer for ThroughputStage {
    async fn produce(&self, context: &RunContext) -> Result<StageOutput, CollectError> {
        let real_throughput = self
            .source
            .fetch_throughput(context.test_case().name())
            .await
            .map_err(|e| CollectError::from_fetch("throughput", e))?;

        let record = ThroughputRecord { real_throughput };
        Ok(StageOutput::new(Table::from_records(&[record])).with_artifact(record))
    }
}

struct RawSpansStage {
    source: Arc<dyn TraceSource>,
    limit: usize,
}

#[async_trait]
impl StageProducer for RawSpansStage {
    async fn produce(&self, context: &RunContext) -> Result<StageOutput, CollectError> {
        let test_case = context.test_case();
        let export = self
            .source
            .fetch_traces(test_case.window(), test_case.operation(), self.limit)
            .await
            .map_err(|e| CollectError::from_fetch("traces", e))?;

        let graph = build_call_edges(&export)?;
        if graph.edges.is_empty() {
            return Err(CollectError::NoData { what: "call edges" });
        }
        debug!(
            traces = graph.summary.traces,
            spans = graph.summary.spans,
            orphaned_spans = graph.summary.orphaned_spans,
            "Built call graph."
        );

        let decomposition = decompose(graph.edges);
        debug!(
            parents = decomposition.summary.parents,
            steps = decomposition.summary.steps,
            dropped_rows = decomposition.summary.dropped_rows,
            "Decomposed parent durations."
        );

        let table = Table::from_records(&decomposition.edges);
        Ok(StageOutput::new(table)
            .with_diagnostic("traces", graph.summary.traces)
            .with_diagnostic("orphaned_spans", graph.summary.orphaned_spans)
            .with_diagnostic("dropped_rows", decomposition.summary.dropped_rows)
            .with_artifact(decomposition))
    }
}

struct StatisticalStage {
    aggregator: LatencyAggregator,
}

#[async_trait]
impl StageProducer for StatisticalStage {
    async fn produce(&self, context: &RunContext) -> Result<StageOutput, CollectError> {
        let decomposition = context.require::<Decomposition>(RAW_SPANS_STAGE)?;

        let records = self.aggregator.aggregate(&decomposition.edges);
        let table = self.aggregator.to_table(&records);
        Ok(StageOutput::new(table).with_artifact(records))
    }
}

struct EndToEndStage;

#[async_trait]
impl StageProducer for EndToEndStage {
    async fn produce(&self, context: &RunContext) -> Result<StageOutput, CollectError> {
        let decomposition = context.require::<Decomposition>(RAW_SPANS_STAGE)?;

        let records = extract_end_to_end(decomposition.edges.iter().map(|row| &row.edge));
        Ok(StageOutput::new(Table::from_records(&records)))
    }
}

struct HardwareStage {
    joiner: UsageJoiner,
}

#[async_trait]
impl StageProducer for HardwareStage {
    async fn produce(&self, context: &RunContext) -> Result<StageOutput, CollectError> {
        let statistics = context.require::<Vec<StatisticalRecord>>(STATISTICAL_STAGE)?;
        let microservices = statistics
            .iter()
            .map(|record| record.microservice.clone())
            .collect::<Vec<_>>();

        let records = self
            .joiner
            .collect_hardware(&microservices, context.test_case().window())
            .await?;
        Ok(StageOutput::new(Table::from_records(&records)))
    }
}
