use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use tracebench_config::{ConfigurationError, ConfigurationLoader};
use tracebench_core::{executor::DEFAULT_CAPACITY, trace::LatencyAggregator, trace::Quantile};
use tracebench_error::{generic_error, GenericError};

/// Environment variable prefix for configuration overrides.
const ENV_PREFIX: &str = "TRACEBENCH";

#[derive(Parser)]
#[command(about)]
pub struct Cli {
    /// Path to the harness configuration file.
    ///
    /// Top-level settings can be overridden with `TRACEBENCH_`-prefixed environment variables, e.g.
    /// `TRACEBENCH_MAX_WORKERS=4`.
    #[arg(short, long)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand)]
pub enum Action {
    /// Collects traces, usage and throughput for every test case in a plan.
    Collect(CollectConfig),
}

#[derive(Args)]
pub struct CollectConfig {
    /// Path to the YAML plan listing the test cases to collect.
    #[arg(long)]
    pub plan: PathBuf,
}

/// Harness configuration.
#[derive(Debug, Deserialize)]
pub struct HarnessConfig {
    /// Directory the output tables are appended to.
    pub data_path: PathBuf,

    /// Maximum number of collection runs executing at the same time.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Maximum number of traces fetched per test case.
    #[serde(default = "default_trace_limit")]
    pub trace_limit: usize,

    /// Latency quantiles reported per microservice, in `[0, 1]`.
    #[serde(default = "default_quantiles")]
    pub quantiles: Vec<f64>,

    pub jaeger: JaegerConfig,
    pub prometheus: PrometheusConfig,
    pub wrk: WrkConfig,
}

#[derive(Debug, Deserialize)]
pub struct JaegerConfig {
    /// Base URL of the Jaeger query service.
    pub endpoint: String,

    /// Service the workload enters the application through.
    pub entrance_service: String,

    /// Only traces with this HTTP status code are collected. `null` collects every trace.
    #[serde(default = "default_status_code_filter")]
    pub status_code_filter: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PrometheusConfig {
    /// Base URL of the Prometheus server.
    pub endpoint: String,

    /// Kubernetes namespace the application runs in.
    pub namespace: String,

    /// Range query resolution, in seconds.
    #[serde(default = "default_step_secs")]
    pub step_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct WrkConfig {
    /// Directory the workload generator writes its results to.
    pub output_path: PathBuf,
}

const fn default_max_workers() -> usize {
    DEFAULT_CAPACITY
}

const fn default_trace_limit() -> usize {
    1000
}

fn default_quantiles() -> Vec<f64> {
    vec![0.5, 0.95]
}

const fn default_status_code_filter() -> Option<u16> {
    Some(200)
}

const fn default_step_secs() -> u64 {
    1
}

impl HarnessConfig {
    /// Loads the configuration from the given YAML file, with environment overrides applied on top.
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        ConfigurationLoader::default()
            .from_yaml(path)?
            .from_environment(ENV_PREFIX)?
            .into_typed()
    }

    /// Builds the latency aggregator for the configured quantiles.
    pub fn aggregator(&self) -> Result<LatencyAggregator, GenericError> {
        if self.quantiles.is_empty() {
            return Err(generic_error!("At least one latency quantile must be configured."));
        }

        let quantiles = self
            .quantiles
            .iter()
            .map(|q| Quantile::new(*q).ok_or_else(|| generic_error!("Invalid latency quantile {}.", q)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LatencyAggregator::new(quantiles))
    }

    /// Returns the Jaeger tag filter matching the configured status code.
    pub fn jaeger_tag_filter(&self) -> Option<String> {
        self.jaeger
            .status_code_filter
            .map(|code| format!(r#"{{"http.status_code":"{}"}}"#, code))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const MINIMAL: &str = r#"
data_path: /var/lib/tracebench
jaeger:
  endpoint: http://jaeger:16686
  entrance_service: frontend
prometheus:
  endpoint: http://prometheus:9090
  namespace: hotel-reserv
wrk:
  output_path: /tmp/wrk
"#;

    #[test]
    fn defaults_are_applied() {
        let file = write_config(MINIMAL);
        let config = HarnessConfig::load(file.path()).unwrap();

        assert_eq!(config.data_path, PathBuf::from("/var/lib/tracebench"));
        assert_eq!(config.max_workers, 10);
        assert_eq!(config.trace_limit, 1000);
        assert_eq!(config.quantiles, vec![0.5, 0.95]);
        assert_eq!(config.prometheus.step_secs, 1);
        assert_eq!(config.jaeger_tag_filter().as_deref(), Some(r#"{"http.status_code":"200"}"#));

        let labels = config
            .aggregator()
            .unwrap()
            .quantiles()
            .iter()
            .map(|q| q.label())
            .collect::<Vec<_>>();
        assert_eq!(labels, ["p50", "p95"]);
    }

    #[test]
    fn status_filter_can_be_disabled() {
        let file = write_config(&MINIMAL.replace(
            "entrance_service: frontend\n",
            "entrance_service: frontend\n  status_code_filter: null\n",
        ));
        let config = HarnessConfig::load(file.path()).unwrap();
        assert_eq!(config.jaeger.status_code_filter, None);
        assert_eq!(config.jaeger_tag_filter(), None);
    }

    #[test]
    fn missing_section_is_reported() {
        let file = write_config("data_path: /tmp\n");
        let err = HarnessConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingField { .. }));
    }

    #[test]
    fn invalid_quantile_is_rejected() {
        let file = write_config(&format!("{}quantiles: [0.5, 1.5]\n", MINIMAL));
        let config = HarnessConfig::load(file.path()).unwrap();
        assert!(config.aggregator().is_err());
    }
}
