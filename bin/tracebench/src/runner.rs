use std::sync::Arc;

use tracebench_core::{
    executor::{AsyncExecutor, DrainReport},
    pipeline::{CollectionPipeline, DefaultSources, RunState, StageRegistry},
    store::TableStores,
};
use tracebench_error::{ErrorContext as _, GenericError};
use tracebench_sources::{JaegerTraceSource, PrometheusUsageSource, WrkThroughputSource};
use tracing::{info, warn};

use crate::{config::HarnessConfig, plan::CollectionPlan};

/// Number of runs per final state after a plan was collected.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct CollectionSummary {
    pub persisted: usize,
    pub partially_failed: usize,
    pub no_data: usize,
    pub crashed: usize,
}

impl CollectionSummary {
    fn from_drained(drained: &DrainReport) -> Self {
        let mut summary = Self {
            crashed: drained.crashed,
            ..Default::default()
        };
        for report in &drained.reports {
            match report.state {
                RunState::Persisted => summary.persisted += 1,
                RunState::PartiallyFailed => summary.partially_failed += 1,
                RunState::NoData => summary.no_data += 1,
            }
        }
        summary
    }
}

/// Builds the collection pipeline described by the configuration.
pub fn build_pipeline(config: &HarnessConfig) -> Result<CollectionPipeline, GenericError> {
    let traces = JaegerTraceSource::new(&config.jaeger.endpoint, config.jaeger.entrance_service.clone())?
        .with_tag_filter(config.jaeger_tag_filter());
    let usage = PrometheusUsageSource::new(
        &config.prometheus.endpoint,
        config.prometheus.namespace.clone(),
        config.prometheus.step_secs,
    )?;
    let throughput = WrkThroughputSource::new(&config.wrk.output_path);

    let sources = DefaultSources {
        traces: Arc::new(traces),
        usage: Arc::new(usage),
        throughput: Arc::new(throughput),
    };
    let registry = StageRegistry::with_default_stages(sources, config.trace_limit, config.aggregator()?)
        .error_context("Failed to register collection stages.")?;
    let stores = TableStores::open(&config.data_path)
        .with_error_context(|| format!("Failed to open output directory '{}'.", config.data_path.display()))?;

    Ok(CollectionPipeline::new(registry, Arc::new(stores)))
}

/// Submits every test case of the plan and waits for all of them to be collected.
pub async fn collect(pipeline: CollectionPipeline, max_workers: usize, plan: CollectionPlan) -> CollectionSummary {
    let mut executor = AsyncExecutor::new(Arc::new(pipeline), max_workers);
    let test_cases = plan.into_test_cases();
    info!(
        test_cases = test_cases.len(),
        max_workers = executor.capacity(),
        "Collecting test cases."
    );

    for test_case in test_cases {
        executor.submit(test_case);
    }
    let drained = executor.drain().await;

    for report in &drained.reports {
        if report.state != RunState::Persisted {
            warn!(
                test_case = %report.test_case,
                state = %report.state,
                stages = ?report.stages,
                "Collection incomplete."
            );
        }
    }

    let summary = CollectionSummary::from_drained(&drained);
    info!(
        persisted = summary.persisted,
        partially_failed = summary.partially_failed,
        no_data = summary.no_data,
        crashed = summary.crashed,
        "Collection finished."
    );
    summary
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn config(dir: &tempfile::TempDir, quantiles: &str) -> HarnessConfig {
        // Nothing listens on port 9, so every remote query fails quickly.
        let raw = format!(
            "data_path: {data}\nquantiles: {quantiles}\n\
             jaeger:\n  endpoint: http://127.0.0.1:9\n  entrance_service: frontend\n\
             prometheus:\n  endpoint: http://127.0.0.1:9\n  namespace: default\nwrk:\n  output_path: {wrk}\n",
            data = dir.path().join("data").display(),
            wrk = dir.path().join("wrk").display(),
        );
        let path = write_file(dir, "config.yaml", &raw);
        HarnessConfig::load(&path).unwrap()
    }

    #[test]
    fn invalid_quantiles_fail_pipeline_construction() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir, "[]");
        assert!(build_pipeline(&config).is_err());
    }

    #[tokio::test]
    async fn unreachable_collaborators_leave_runs_partially_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir, "[0.5, 0.99]");
        let pipeline = build_pipeline(&config).unwrap();
        assert!(dir.path().join("data").is_dir());

        let plan = write_file(
            &dir,
            "plan.yaml",
            "test_cases:\n  - name: a\n    start: 2024-05-01T10:00:00Z\n    end: 2024-05-01T10:01:00Z\n  \
             - name: b\n    start: 2024-05-01T10:02:00Z\n    end: 2024-05-01T10:03:00Z\n",
        );
        let plan = CollectionPlan::from_yaml(&plan).unwrap();

        let summary = collect(pipeline, config.max_workers, plan).await;
        assert_eq!(
            summary,
            CollectionSummary {
                partially_failed: 2,
                ..Default::default()
            }
        );
    }
}
