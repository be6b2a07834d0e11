//! Mapping fitted hidden states to road types

use super::hmm::GaussianHmm;
use crate::domain::types::RoadType;
use serde::Deserialize;

/// How state indices become road-type labels.
///
/// EM does not fix the order of hidden states, so `StateIndex` can swap
/// labels between two fits of different data. `PositionalSpread` ranks
/// states by the sum of their diagonal variances instead: the widest
/// state takes `labels[0]`.
///
/// Observations are raw degrees and every state variance carries the
/// `min_covar` floor. At the 1e-3 default the floor is about (0.03°)², which
/// hides spread differences between roads within one city. Lower `min_covar`
/// (e.g. 1e-8) when traces cover only a few kilometres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelPolicy {
    /// State `i` gets `labels[i]`
    StateIndex,
    #[default]
    PositionalSpread,
}

impl LabelPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelPolicy::StateIndex => "state_index",
            LabelPolicy::PositionalSpread => "positional_spread",
        }
    }

    /// Label for every state of `model`, indexed by state
    pub fn assign(&self, model: &GaussianHmm, labels: &[RoadType]) -> Vec<RoadType> {
        let n = model.n_states().min(labels.len());
        match self {
            LabelPolicy::StateIndex => labels[..n].to_vec(),
            LabelPolicy::PositionalSpread => {
                let spread: Vec<f64> = (0..n).map(|k| model.total_variance(k)).collect();
                let mut ranked: Vec<usize> = (0..n).collect();
                // Stable: equal spreads keep index order
                ranked.sort_by(|&a, &b| spread[b].total_cmp(&spread[a]));

                let mut assigned = labels[..n].to_vec();
                for (rank, &state) in ranked.iter().enumerate() {
                    assigned[state] = labels[rank];
                }
                assigned
            }
        }
    }
}

impl std::fmt::Display for LabelPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
