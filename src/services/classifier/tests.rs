//! Tests for the sequence classifier

use super::*;
use crate::domain::types::GeoPoint;

fn snapped(latitude: f64, longitude: f64) -> SnappedPoint {
    let location = GeoPoint::new(latitude, longitude);
    SnappedPoint::new(location, location, Some(0.0))
}

/// Deterministic jitter around a center, `spread` in degrees
fn cluster(latitude: f64, longitude: f64, count: usize, spread: f64) -> Vec<SnappedPoint> {
    (0..count)
        .map(|i| {
            let dlat = ((i % 7) as f64 - 3.0) / 3.0 * spread;
            let dlon = ((i % 5) as f64 - 2.0) / 2.0 * spread;
            snapped(latitude + dlat, longitude + dlon)
        })
        .collect()
}

fn two_clusters(spread_a: f64, spread_b: f64) -> Vec<SnappedPoint> {
    let mut points = cluster(10.0, 10.0, 30, spread_a);
    points.extend(cluster(50.0, 50.0, 30, spread_b));
    points
}

#[test]
fn test_rejects_fewer_points_than_states() {
    let classifier = SequenceClassifier::new(ClassifierConfig::default());

    let err = classifier.classify(&[]).unwrap_err();
    assert_eq!(err, ClassifyError::InsufficientData { points: 0, states: 2 });

    let err = classifier.classify(&[snapped(1.0, 1.0)]).unwrap_err();
    assert_eq!(err, ClassifyError::InsufficientData { points: 1, states: 2 });
}

#[test]
fn test_separates_distant_clusters() {
    let points = two_clusters(0.05, 0.05);
    let classifier = SequenceClassifier::new(ClassifierConfig::default());
    let result = classifier.classify(&points).unwrap();

    assert_eq!(result.points.len(), points.len());
    let first = result.points[0].state;
    let second = result.points[30].state;
    assert_ne!(first, second);
    assert!(result.points[..30].iter().all(|p| p.state == first));
    assert!(result.points[30..].iter().all(|p| p.state == second));
    assert_ne!(result.points[0].label, result.points[30].label);
}

#[test]
fn test_output_preserves_input_locations() {
    let points = two_clusters(0.05, 0.05);
    let result = SequenceClassifier::new(ClassifierConfig::default()).classify(&points).unwrap();

    for (input, output) in points.iter().zip(&result.points) {
        assert_eq!(input.location, output.location());
        assert_eq!(result.state_labels[output.state], output.label);
    }
}

#[test]
fn test_output_keeps_snap_provenance() {
    let points: Vec<SnappedPoint> = two_clusters(0.05, 0.05)
        .into_iter()
        .enumerate()
        .map(|(i, p)| {
            let source = GeoPoint::new(p.location.latitude + 0.0002, p.location.longitude);
            SnappedPoint::new(p.location, source, Some(i as f64))
        })
        .collect();
    let result = SequenceClassifier::new(ClassifierConfig::default()).classify(&points).unwrap();

    for (input, output) in points.iter().zip(&result.points) {
        assert_eq!(output.snapped, *input);
        assert_ne!(output.snapped.source, output.location());
    }
    assert_eq!(result.points[7].snapped.distance_m, 7.0);
}

/// Two segments about 1 km apart, one tight and one wide
fn city_segments() -> Vec<SnappedPoint> {
    let mut points = cluster(10.0, 10.0, 30, 0.001);
    points.extend(cluster(10.01, 10.01, 30, 0.004));
    points
}

#[test]
fn test_default_floor_hides_city_scale_spread() {
    let classifier = SequenceClassifier::new(ClassifierConfig::default());
    let result = classifier.classify(&city_segments()).unwrap();
    let (a, b) = (result.model.total_variance(0), result.model.total_variance(1));
    assert!(a.max(b) / a.min(b) < 1.2, "spreads {a} vs {b}");
}

#[test]
fn test_small_floor_ranks_city_scale_spread() {
    let config = ClassifierConfig { min_covar: 1e-8, ..Default::default() };
    let result = SequenceClassifier::new(config).classify(&city_segments()).unwrap();

    assert!(result.points[..30].iter().all(|p| p.label == RoadType::ServiceRoad));
    assert!(result.points[30..].iter().all(|p| p.label == RoadType::Highway));
}

#[test]
fn test_same_seed_same_result() {
    let points = two_clusters(0.05, 0.3);
    let classifier = SequenceClassifier::new(ClassifierConfig::default());

    let a = classifier.classify(&points).unwrap();
    let b = classifier.classify(&points).unwrap();

    assert_eq!(a.points, b.points);
    assert_eq!(a.report.log_likelihood, b.report.log_likelihood);
    assert_eq!(a.report.iterations, b.report.iterations);
}

#[test]
fn test_positional_spread_gives_widest_state_first_label() {
    // Cluster B is much wider than cluster A
    let points = two_clusters(0.05, 2.0);
    let classifier = SequenceClassifier::new(ClassifierConfig::default());
    let result = classifier.classify(&points).unwrap();

    assert!(result.points[30..].iter().all(|p| p.label == RoadType::Highway));
    assert!(result.points[..30].iter().all(|p| p.label == RoadType::ServiceRoad));
}

#[test]
fn test_positional_spread_independent_of_cluster_order() {
    let mut reversed = cluster(50.0, 50.0, 30, 2.0);
    reversed.extend(cluster(10.0, 10.0, 30, 0.05));

    let result = SequenceClassifier::new(ClassifierConfig::default()).classify(&reversed).unwrap();
    assert!(result.points[..30].iter().all(|p| p.label == RoadType::Highway));
    assert!(result.points[30..].iter().all(|p| p.label == RoadType::ServiceRoad));
}

#[test]
fn test_state_index_policy_uses_labels_by_index() {
    let config = ClassifierConfig { label_policy: LabelPolicy::StateIndex, ..Default::default() };
    let result = SequenceClassifier::new(config).classify(&two_clusters(0.05, 2.0)).unwrap();

    assert_eq!(result.state_labels, vec![RoadType::Highway, RoadType::ServiceRoad]);
    for point in &result.points {
        let expected = if point.state == 0 { RoadType::Highway } else { RoadType::ServiceRoad };
        assert_eq!(point.label, expected);
    }
}

#[test]
fn test_custom_label_order() {
    let config = ClassifierConfig {
        labels: [RoadType::ServiceRoad, RoadType::Highway],
        ..Default::default()
    };
    let result = SequenceClassifier::new(config).classify(&two_clusters(0.05, 2.0)).unwrap();

    assert!(result.points[30..].iter().all(|p| p.label == RoadType::ServiceRoad));
    assert!(result.points[..30].iter().all(|p| p.label == RoadType::Highway));
}

#[test]
fn test_identical_points_do_not_break_fit() {
    let points = vec![snapped(37.0, -122.0); 12];
    let result = SequenceClassifier::new(ClassifierConfig::default()).classify(&points).unwrap();

    assert_eq!(result.points.len(), 12);
    assert!(result.report.log_likelihood.is_finite());
    let first = result.points[0].state;
    assert!(result.points.iter().all(|p| p.state == first));
}

#[test]
fn test_single_iteration_cap() {
    let config = ClassifierConfig { max_iterations: 1, ..Default::default() };
    let result = SequenceClassifier::new(config).classify(&two_clusters(0.05, 0.05)).unwrap();
    assert_eq!(result.report.iterations, 1);
}

#[test]
fn test_viterbi_follows_transitions() {
    // Sticky transitions keep the middle point in state 0 even though
    // its emission alone favours state 1
    let model = GaussianHmm::from_parameters(
        vec![0.5, 0.5],
        vec![0.999, 0.001, 0.001, 0.999],
        vec![[0.0, 0.0], [10.0, 10.0]],
        vec![[1.0, 1.0], [1.0, 1.0]],
    )
    .unwrap();
    let observations = vec![[0.0, 0.0], [0.1, 0.1], [5.5, 5.5], [0.0, 0.1], [0.1, 0.0]];

    assert!(model.log_density(1, &observations[2]) > model.log_density(0, &observations[2]));
    let (path, score) = model.viterbi(&observations);
    assert_eq!(path, vec![0, 0, 0, 0, 0]);
    assert!(score.is_finite());
}

#[test]
fn test_viterbi_switches_on_sustained_change() {
    let model = GaussianHmm::from_parameters(
        vec![0.5, 0.5],
        vec![0.9, 0.1, 0.1, 0.9],
        vec![[0.0, 0.0], [10.0, 10.0]],
        vec![[1.0, 1.0], [1.0, 1.0]],
    )
    .unwrap();
    let observations = vec![[0.0, 0.0], [0.2, 0.0], [10.0, 9.8], [10.1, 10.0]];

    let (path, _) = model.viterbi(&observations);
    assert_eq!(path, vec![0, 0, 1, 1]);
}

#[test]
fn test_from_parameters_validates() {
    let err = GaussianHmm::from_parameters(
        vec![1.0],
        vec![1.0, 0.0],
        vec![[0.0, 0.0]],
        vec![[1.0, 1.0]],
    )
    .unwrap_err();
    assert!(matches!(err, ClassifyError::InvalidModel(_)));

    let err = GaussianHmm::from_parameters(vec![1.0], vec![1.0], vec![[0.0, 0.0]], vec![[0.0, 1.0]])
        .unwrap_err();
    assert!(matches!(err, ClassifyError::InvalidModel(_)));
}

#[test]
fn test_fit_improves_likelihood_over_initial_model() {
    let observations: Vec<Observation> = two_clusters(0.05, 0.05)
        .iter()
        .map(|p| [p.location.latitude, p.location.longitude])
        .collect();
    let one_step = FitOptions { max_iterations: 1, tolerance: 0.0, min_covar: 1e-3, seed: 7 };
    let many = FitOptions { max_iterations: 200, ..one_step };

    let (_, early) = GaussianHmm::fit(&observations, 2, &one_step).unwrap();
    let (model, late) = GaussianHmm::fit(&observations, 2, &many).unwrap();

    assert!(late.log_likelihood >= early.log_likelihood - 1e-9);
    let total: f64 = model.start().iter().sum();
    assert!((total - 1.0).abs() < 1e-9);
    for i in 0..2 {
        let row = model.transition(i, 0) + model.transition(i, 1);
        assert!((row - 1.0).abs() < 1e-9);
    }
}

#[test]
fn test_label_policy_names() {
    #[derive(serde::Deserialize)]
    struct Wrapper {
        policy: LabelPolicy,
    }
    let w: Wrapper = toml::from_str("policy = \"state_index\"").unwrap();
    assert_eq!(w.policy, LabelPolicy::StateIndex);
    let w: Wrapper = toml::from_str("policy = \"positional_spread\"").unwrap();
    assert_eq!(w.policy, LabelPolicy::PositionalSpread);
    assert_eq!(LabelPolicy::default(), LabelPolicy::PositionalSpread);
}
