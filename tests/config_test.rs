//! Integration tests for configuration loading

use roadsnap::domain::types::RoadType;
use roadsnap::infra::Config;
use roadsnap::services::LabelPolicy;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[input]
trace_file = "data/drive.kml"
route_namespace = "http://www.opengis.net/kml/2.2"

[output]
dir = "results"
classified_file = "labels.csv"
egress_file = ""

[snap]
base_url = "http://osrm.internal:5000/"
profile = "car"
timeout_ms = 1500
max_retries = 0
concurrency = 1

[classifier]
max_iterations = 50
seed = 7
label_policy = "state_index"
labels = ["service_road", "highway"]

[metrics]
interval_secs = 0
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.trace_file(), Some("data/drive.kml"));
    assert_eq!(config.route_namespace(), "http://www.opengis.net/kml/2.2");
    assert_eq!(config.classified_path(), PathBuf::from("results/labels.csv"));
    assert_eq!(config.snapped_path(), PathBuf::from("results/snapped_points.csv"));
    assert_eq!(config.egress_path(), None);
    assert_eq!(config.snap_base_url(), "http://osrm.internal:5000");
    assert_eq!(config.snap_profile(), "car");
    assert_eq!(config.snap_timeout(), Duration::from_millis(1500));
    assert_eq!(config.snap_max_retries(), 0);
    assert_eq!(config.snap_concurrency(), 1);
    assert_eq!(config.classifier().max_iterations, 50);
    assert_eq!(config.classifier().seed, 7);
    assert_eq!(config.classifier().tolerance, 1e-2);
    assert_eq!(config.classifier().label_policy, LabelPolicy::StateIndex);
    assert_eq!(config.classifier().labels, [RoadType::ServiceRoad, RoadType::Highway]);
    assert_eq!(config.metrics_interval_secs(), 0);
}

#[test]
fn test_empty_file_uses_defaults() {
    let temp_file = NamedTempFile::new().unwrap();
    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.snap_profile(), "driving");
    assert_eq!(config.snap_max_retries(), 2);
    assert_eq!(config.classifier().min_covar, 1e-3);
    assert_eq!(config.classifier().label_policy, LabelPolicy::PositionalSpread);
}

#[test]
fn test_invalid_values_rejected() {
    for content in [
        "[classifier]\nlabels = [\"highway\"]\n",
        "[classifier]\nlabels = [\"highway\", \"service_road\", \"highway\"]\n",
        "[classifier]\nlabels = [\"motorway\", \"highway\"]\n",
        "[classifier]\nlabel_policy = \"alphabetical\"\n",
        "[classifier]\nmax_iterations = 0\n",
        "[classifier]\nmin_covar = 0.0\n",
    ] {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        assert!(Config::from_file(temp_file.path()).is_err(), "accepted: {content}");
    }
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.snap_base_url(), "http://router.project-osrm.org");
    assert_eq!(config.snap_concurrency(), 4);
    assert_eq!(config.classifier().seed, 42);
}

#[test]
fn test_explicit_config_must_be_valid() {
    let mut temp_file = NamedTempFile::new().unwrap();
    let content = "[snap]\nbase_url = \"http://10.0.0.5:5000\"\n\n\
                   [classifier]\nlabels = [\"highway\", \"service_road\", \"highway\"]\n";
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    let path = temp_file.path().to_str().unwrap();

    let err = Config::load(Some(path)).unwrap_err();
    assert!(format!("{err:#}").contains("Invalid config file"));
    assert!(Config::load(Some("/nonexistent/config.toml")).is_err());
}

#[test]
fn test_explicit_config_loads() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.toml");
    let config = Config::load(Some(path)).unwrap();
    assert_eq!(config.config_file(), path);
    assert_eq!(config.snap_base_url(), "http://localhost:5000");
}

#[test]
fn test_dev_config_parses() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.toml");
    let config = Config::from_file(path).unwrap();
    assert_eq!(config.snap_base_url(), "http://localhost:5000");
    assert_eq!(config.classifier().labels, [RoadType::Highway, RoadType::ServiceRoad]);
}
