//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::types::RoadType;
use crate::services::classifier::{ClassifierConfig, LabelPolicy, STATE_COUNT};
use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    /// Trace file for `run` (.pos log or .kml markup)
    #[serde(default)]
    pub trace_file: Option<String>,
    /// Namespace the route markup elements must be bound to
    #[serde(default = "default_route_namespace")]
    pub route_namespace: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { trace_file: None, route_namespace: default_route_namespace() }
    }
}

fn default_route_namespace() -> String {
    crate::io::route_markup::KML_NAMESPACE.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: String,
    #[serde(default = "default_snapped_file")]
    pub snapped_file: String,
    #[serde(default = "default_classified_file")]
    pub classified_file: String,
    /// JSONL handoff for the map renderer (empty to disable)
    #[serde(default = "default_egress_file")]
    pub egress_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            snapped_file: default_snapped_file(),
            classified_file: default_classified_file(),
            egress_file: default_egress_file(),
        }
    }
}

fn default_output_dir() -> String {
    "out".to_string()
}

fn default_snapped_file() -> String {
    "snapped_points.csv".to_string()
}

fn default_classified_file() -> String {
    "classified_points.csv".to_string()
}

fn default_egress_file() -> String {
    "classified_points.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Extra attempts for transient failures (0 = single request)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Requests in flight at once (1 = strictly sequential)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            profile: default_profile(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_base_url() -> String {
    "http://router.project-osrm.org".to_string()
}

fn default_profile() -> String {
    "driving".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_backoff_max_ms() -> u64 {
    5000
}

fn default_concurrency() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Variance floor in squared degrees; lower it for city-scale traces
    #[serde(default = "default_min_covar")]
    pub min_covar: f64,
    #[serde(default)]
    pub label_policy: LabelPolicy,
    /// Label per rank (positional_spread) or per state index (state_index)
    #[serde(default = "default_labels")]
    pub labels: Vec<RoadType>,
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            seed: default_seed(),
            tolerance: default_tolerance(),
            min_covar: default_min_covar(),
            label_policy: LabelPolicy::default(),
            labels: default_labels(),
        }
    }
}

fn default_max_iterations() -> usize {
    1000
}

fn default_seed() -> u64 {
    42
}

fn default_tolerance() -> f64 {
    1e-2
}

fn default_min_covar() -> f64 {
    1e-3
}

fn default_labels() -> Vec<RoadType> {
    vec![RoadType::Highway, RoadType::ServiceRoad]
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Progress summary interval while snapping (0 disables)
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub snap: SnapConfig,
    #[serde(default)]
    pub classifier: ClassifierSection,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    config_file: String,
    trace_file: Option<String>,
    route_namespace: String,
    output_dir: String,
    snapped_file: String,
    classified_file: String,
    egress_file: String,
    snap_base_url: String,
    snap_profile: String,
    snap_timeout_ms: u64,
    snap_max_retries: u32,
    snap_backoff_base_ms: u64,
    snap_backoff_max_ms: u64,
    snap_concurrency: usize,
    classifier: ClassifierConfig,
    metrics_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::build(TomlConfig::default(), [RoadType::Highway, RoadType::ServiceRoad], "default")
    }
}

impl Config {
    /// Config path when none is given on the command line
    pub fn resolve_config_path() -> String {
        env::var("CONFIG_FILE").unwrap_or_else(|_| "config/dev.toml".to_string())
    }

    fn from_toml(toml_config: TomlConfig, config_file: &str) -> anyhow::Result<Self> {
        let classifier = &toml_config.classifier;
        if classifier.max_iterations == 0 {
            bail!("classifier.max_iterations must be at least 1");
        }
        if classifier.min_covar.is_nan() || classifier.min_covar <= 0.0 {
            bail!("classifier.min_covar must be positive");
        }
        let labels: [RoadType; STATE_COUNT] =
            classifier.labels.clone().try_into().map_err(|labels: Vec<RoadType>| {
                anyhow!(
                    "classifier.labels must name exactly {} road types, got {}",
                    STATE_COUNT,
                    labels.len()
                )
            })?;

        Ok(Self::build(toml_config, labels, config_file))
    }

    fn build(toml_config: TomlConfig, labels: [RoadType; STATE_COUNT], config_file: &str) -> Self {
        let classifier = toml_config.classifier;

        Self {
            config_file: config_file.to_string(),
            trace_file: toml_config.input.trace_file,
            route_namespace: toml_config.input.route_namespace,
            output_dir: toml_config.output.dir,
            snapped_file: toml_config.output.snapped_file,
            classified_file: toml_config.output.classified_file,
            egress_file: toml_config.output.egress_file,
            snap_base_url: toml_config.snap.base_url.trim_end_matches('/').to_string(),
            snap_profile: toml_config.snap.profile,
            snap_timeout_ms: toml_config.snap.timeout_ms,
            snap_max_retries: toml_config.snap.max_retries,
            snap_backoff_base_ms: toml_config.snap.backoff_base_ms,
            snap_backoff_max_ms: toml_config.snap.backoff_max_ms,
            snap_concurrency: toml_config.snap.concurrency.max(1),
            classifier: ClassifierConfig {
                max_iterations: classifier.max_iterations,
                seed: classifier.seed,
                tolerance: classifier.tolerance,
                min_covar: classifier.min_covar,
                label_policy: classifier.label_policy,
                labels,
            },
            metrics_interval_secs: toml_config.metrics.interval_secs,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Self::from_toml(toml_config, &path.display().to_string())
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Load the configuration for a run.
    ///
    /// An explicit path must read and validate. Without one, the resolved
    /// path is tried and defaults are used if it fails.
    pub fn load(explicit: Option<&str>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => Ok(Self::load_from_path(&Self::resolve_config_path())),
        }
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn trace_file(&self) -> Option<&str> {
        self.trace_file.as_deref()
    }

    pub fn route_namespace(&self) -> &str {
        &self.route_namespace
    }

    pub fn output_dir(&self) -> &str {
        &self.output_dir
    }

    /// Output file name resolved against the output directory
    pub fn output_path(&self, file_name: &str) -> PathBuf {
        Path::new(&self.output_dir).join(file_name)
    }

    pub fn snapped_path(&self) -> PathBuf {
        self.output_path(&self.snapped_file)
    }

    pub fn classified_path(&self) -> PathBuf {
        self.output_path(&self.classified_file)
    }

    pub fn egress_path(&self) -> Option<PathBuf> {
        if self.egress_file.is_empty() {
            None
        } else {
            Some(self.output_path(&self.egress_file))
        }
    }

    pub fn snap_base_url(&self) -> &str {
        &self.snap_base_url
    }

    pub fn snap_profile(&self) -> &str {
        &self.snap_profile
    }

    pub fn snap_timeout(&self) -> Duration {
        Duration::from_millis(self.snap_timeout_ms)
    }

    pub fn snap_max_retries(&self) -> u32 {
        self.snap_max_retries
    }

    pub fn snap_backoff_base(&self) -> Duration {
        Duration::from_millis(self.snap_backoff_base_ms)
    }

    pub fn snap_backoff_max(&self) -> Duration {
        Duration::from_millis(self.snap_backoff_max_ms)
    }

    pub fn snap_concurrency(&self) -> usize {
        self.snap_concurrency
    }

    pub fn classifier(&self) -> &ClassifierConfig {
        &self.classifier
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    /// Builder method for callers overriding the routing endpoint (CLI, tests)
    pub fn with_snap_base_url(mut self, url: &str) -> Self {
        self.snap_base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_output_dir(mut self, dir: &str) -> Self {
        self.output_dir = dir.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.snap_base_url(), "http://router.project-osrm.org");
        assert_eq!(config.snap_profile(), "driving");
        assert_eq!(config.snap_concurrency(), 4);
        assert_eq!(config.classifier().max_iterations, 1000);
        assert_eq!(config.classifier().seed, 42);
        assert_eq!(config.classifier().labels, [RoadType::Highway, RoadType::ServiceRoad]);
        assert_eq!(config.classifier().label_policy, LabelPolicy::PositionalSpread);
        assert_eq!(config.route_namespace(), "http://earth.google.com/kml/2.1");
    }

    #[test]
    fn test_output_paths() {
        let config = Config::default().with_output_dir("results");
        assert_eq!(config.snapped_path(), PathBuf::from("results/snapped_points.csv"));
        assert_eq!(config.egress_path(), Some(PathBuf::from("results/classified_points.jsonl")));
    }

    #[test]
    fn test_rejects_wrong_label_count() {
        let mut toml_config = TomlConfig::default();
        toml_config.classifier.labels = vec![RoadType::Highway];
        assert!(Config::from_toml(toml_config, "test").is_err());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = Config::default().with_snap_base_url("http://127.0.0.1:5000/");
        assert_eq!(config.snap_base_url(), "http://127.0.0.1:5000");
    }
}
