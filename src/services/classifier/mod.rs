//! Road-type classification of snapped sequences
//!
//! A two-state Gaussian HMM is fit to the (latitude, longitude) sequence,
//! the most likely state path is decoded with Viterbi and each state is
//! mapped to a road type by the configured `LabelPolicy`.
//! - `hmm` - model, EM fit and decoding
//! - `labels` - state to road-type mapping

pub mod hmm;
mod labels;
#[cfg(test)]
mod tests;

pub use hmm::{FitOptions, FitReport, GaussianHmm, Observation};
pub use labels::LabelPolicy;

use crate::domain::error::ClassifyError;
use crate::domain::types::{ClassifiedPoint, RoadType, SnappedPoint};
use tracing::{debug, info};

/// Hidden states in the road-type model
pub const STATE_COUNT: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    /// EM iteration cap
    pub max_iterations: usize,
    /// Seeds mean initialisation; same seed and input give the same labels
    pub seed: u64,
    /// Log-likelihood gain below which EM stops
    pub tolerance: f64,
    /// Variance floor in squared degrees, added to every state variance
    pub min_covar: f64,
    pub label_policy: LabelPolicy,
    pub labels: [RoadType; STATE_COUNT],
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            seed: 42,
            tolerance: 1e-2,
            min_covar: 1e-3,
            label_policy: LabelPolicy::default(),
            labels: [RoadType::Highway, RoadType::ServiceRoad],
        }
    }
}

/// Result of one classification run
#[derive(Debug, Clone)]
pub struct Classification {
    /// One entry per input point, input order
    pub points: Vec<ClassifiedPoint>,
    /// Label of each hidden state, indexed by state
    pub state_labels: Vec<RoadType>,
    pub model: GaussianHmm,
    pub report: FitReport,
}

impl Classification {
    pub fn count(&self, label: RoadType) -> usize {
        self.points.iter().filter(|p| p.label == label).count()
    }
}

pub struct SequenceClassifier {
    config: ClassifierConfig,
}

impl SequenceClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Fit a fresh model to `points` and label each one.
    ///
    /// Every call fits from scratch; nothing carries over between runs.
    pub fn classify(&self, points: &[SnappedPoint]) -> Result<Classification, ClassifyError> {
        if points.len() < STATE_COUNT {
            return Err(ClassifyError::InsufficientData {
                points: points.len(),
                states: STATE_COUNT,
            });
        }

        let observations: Vec<Observation> =
            points.iter().map(|p| [p.location.latitude, p.location.longitude]).collect();

        let options = FitOptions {
            max_iterations: self.config.max_iterations,
            tolerance: self.config.tolerance,
            min_covar: self.config.min_covar,
            seed: self.config.seed,
        };
        let (model, report) = GaussianHmm::fit(&observations, STATE_COUNT, &options)?;

        debug!(
            iterations = %report.iterations,
            converged = %report.converged,
            log_likelihood = %report.log_likelihood,
            "hmm_fitted"
        );

        let (states, _) = model.viterbi(&observations);
        let state_labels = self.config.label_policy.assign(&model, &self.config.labels);

        let classified: Vec<ClassifiedPoint> = points
            .iter()
            .zip(&states)
            .map(|(&snapped, &state)| ClassifiedPoint {
                snapped,
                state,
                label: state_labels[state],
            })
            .collect();

        let classification =
            Classification { points: classified, state_labels, model, report };

        info!(
            points = %classification.points.len(),
            policy = %self.config.label_policy,
            highway = %classification.count(RoadType::Highway),
            service_road = %classification.count(RoadType::ServiceRoad),
            iterations = %report.iterations,
            converged = %report.converged,
            "sequence_classified"
        );

        Ok(classification)
    }
}
