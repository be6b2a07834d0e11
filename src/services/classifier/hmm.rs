//! Gaussian HMM with diagonal covariance over 2-D observations
//!
//! Forward/backward and Viterbi all run in log space so long traces do not
//! underflow. Parameters are kept in probability space.

use crate::domain::error::ClassifyError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// (latitude, longitude)
pub type Observation = [f64; 2];

const N_FEATURES: usize = 2;
const LN_2PI: f64 = 1.837_877_066_409_345_5;
/// States with less total responsibility than this keep their previous emission parameters
const MIN_STATE_WEIGHT: f64 = 1e-10;
const LLOYD_MAX_ROUNDS: usize = 100;

/// `log(sum(exp(xs)))`, -inf for an empty or all -inf slice
fn log_sum_exp(xs: &[f64]) -> f64 {
    let max = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    let sum: f64 = xs.iter().map(|&x| (x - max).exp()).sum();
    max + sum.ln()
}

#[inline]
fn squared_distance(a: &Observation, b: &Observation) -> f64 {
    (0..N_FEATURES).map(|d| (a[d] - b[d]).powi(2)).sum()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub max_iterations: usize,
    /// Stop once the log-likelihood gain drops below this
    pub tolerance: f64,
    /// Variance floor added to every fitted variance
    pub min_covar: f64,
    /// Seeds the mean initialisation
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitReport {
    pub iterations: usize,
    pub log_likelihood: f64,
    pub converged: bool,
}

/// Sufficient statistics from one E-step
struct Expectation {
    log_likelihood: f64,
    /// gamma[t][k] = P(state k at t | observations)
    gamma: Vec<Vec<f64>>,
    /// Expected transition counts, row-major
    xi_sum: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GaussianHmm {
    n_states: usize,
    start: Vec<f64>,
    /// Row-major, `transition[i * n + j] = P(j | i)`
    transition: Vec<f64>,
    means: Vec<Observation>,
    variances: Vec<Observation>,
}

impl GaussianHmm {
    /// Build a model from explicit parameters
    pub fn from_parameters(
        start: Vec<f64>,
        transition: Vec<f64>,
        means: Vec<Observation>,
        variances: Vec<Observation>,
    ) -> Result<Self, ClassifyError> {
        let n = start.len();
        if n == 0 || transition.len() != n * n || means.len() != n || variances.len() != n {
            return Err(ClassifyError::InvalidModel(format!(
                "inconsistent dimensions: start {}, transition {}, means {}, variances {}",
                n,
                transition.len(),
                means.len(),
                variances.len()
            )));
        }
        if variances.iter().flatten().any(|v| !(*v > 0.0)) {
            return Err(ClassifyError::InvalidModel("variances must be positive".into()));
        }
        Ok(Self { n_states: n, start, transition, means, variances })
    }

    /// Fit `n_states` states to one observation sequence with Baum-Welch EM
    pub fn fit(
        observations: &[Observation],
        n_states: usize,
        options: &FitOptions,
    ) -> Result<(Self, FitReport), ClassifyError> {
        if n_states == 0 || observations.len() < n_states {
            return Err(ClassifyError::InsufficientData {
                points: observations.len(),
                states: n_states,
            });
        }

        let mut model = Self::initialise(observations, n_states, options);
        let mut previous = f64::NEG_INFINITY;
        let mut iterations = 0;
        let mut converged = false;

        for iteration in 1..=options.max_iterations {
            let expectation = model.expectation(observations);
            if !expectation.log_likelihood.is_finite() {
                return Err(ClassifyError::Numerical(format!(
                    "log-likelihood became {} at iteration {}",
                    expectation.log_likelihood, iteration
                )));
            }

            model.maximisation(&expectation, observations, options.min_covar);
            iterations = iteration;

            let gain = expectation.log_likelihood - previous;
            previous = expectation.log_likelihood;
            if gain < options.tolerance {
                converged = true;
                break;
            }
        }

        let log_likelihood = model.log_likelihood(observations);
        if !log_likelihood.is_finite() {
            return Err(ClassifyError::Numerical(format!(
                "final log-likelihood is {}",
                log_likelihood
            )));
        }

        Ok((model, FitReport { iterations, log_likelihood, converged }))
    }

    /// Seeded k-means++ means, global variance, uniform start and transitions
    fn initialise(observations: &[Observation], n_states: usize, options: &FitOptions) -> Self {
        let mut rng = StdRng::seed_from_u64(options.seed);
        let centers = kmeans_plus_plus(observations, n_states, &mut rng);
        let means = lloyd(observations, centers);

        let count = observations.len() as f64;
        let mut mean = [0.0; N_FEATURES];
        for x in observations {
            for d in 0..N_FEATURES {
                mean[d] += x[d] / count;
            }
        }
        let mut variance = [options.min_covar; N_FEATURES];
        for x in observations {
            for d in 0..N_FEATURES {
                variance[d] += (x[d] - mean[d]).powi(2) / count;
            }
        }

        let uniform = 1.0 / n_states as f64;
        Self {
            n_states,
            start: vec![uniform; n_states],
            transition: vec![uniform; n_states * n_states],
            means,
            variances: vec![variance; n_states],
        }
    }

    pub fn n_states(&self) -> usize {
        self.n_states
    }

    pub fn start(&self) -> &[f64] {
        &self.start
    }

    pub fn transition(&self, from: usize, to: usize) -> f64 {
        self.transition[from * self.n_states + to]
    }

    pub fn means(&self) -> &[Observation] {
        &self.means
    }

    pub fn variances(&self) -> &[Observation] {
        &self.variances
    }

    /// Sum of the diagonal variances of one state
    pub fn total_variance(&self, state: usize) -> f64 {
        self.variances[state].iter().sum()
    }

    /// log N(x | mean_k, diag(var_k))
    pub fn log_density(&self, state: usize, x: &Observation) -> f64 {
        let mean = &self.means[state];
        let var = &self.variances[state];
        -0.5 * (0..N_FEATURES)
            .map(|d| LN_2PI + var[d].ln() + (x[d] - mean[d]).powi(2) / var[d])
            .sum::<f64>()
    }

    fn log_emissions(&self, observations: &[Observation]) -> Vec<Vec<f64>> {
        observations
            .iter()
            .map(|x| (0..self.n_states).map(|k| self.log_density(k, x)).collect())
            .collect()
    }

    fn log_transition(&self) -> Vec<f64> {
        self.transition.iter().map(|p| p.ln()).collect()
    }

    fn forward(&self, log_b: &[Vec<f64>], log_a: &[f64]) -> Vec<Vec<f64>> {
        let n = self.n_states;
        let mut alpha = vec![vec![f64::NEG_INFINITY; n]; log_b.len()];
        let mut terms = vec![0.0; n];

        for k in 0..n {
            alpha[0][k] = self.start[k].ln() + log_b[0][k];
        }
        for t in 1..log_b.len() {
            for j in 0..n {
                for i in 0..n {
                    terms[i] = alpha[t - 1][i] + log_a[i * n + j];
                }
                alpha[t][j] = log_sum_exp(&terms) + log_b[t][j];
            }
        }
        alpha
    }

    fn backward(&self, log_b: &[Vec<f64>], log_a: &[f64]) -> Vec<Vec<f64>> {
        let n = self.n_states;
        let t_len = log_b.len();
        let mut beta = vec![vec![0.0; n]; t_len];
        let mut terms = vec![0.0; n];

        for t in (0..t_len.saturating_sub(1)).rev() {
            for i in 0..n {
                for j in 0..n {
                    terms[j] = log_a[i * n + j] + log_b[t + 1][j] + beta[t + 1][j];
                }
                beta[t][i] = log_sum_exp(&terms);
            }
        }
        beta
    }

    /// Total log-likelihood of the sequence under the model
    pub fn log_likelihood(&self, observations: &[Observation]) -> f64 {
        if observations.is_empty() {
            return f64::NEG_INFINITY;
        }
        let log_b = self.log_emissions(observations);
        let alpha = self.forward(&log_b, &self.log_transition());
        log_sum_exp(&alpha[observations.len() - 1])
    }

    fn expectation(&self, observations: &[Observation]) -> Expectation {
        let n = self.n_states;
        let t_len = observations.len();
        let log_b = self.log_emissions(observations);
        let log_a = self.log_transition();
        let alpha = self.forward(&log_b, &log_a);
        let beta = self.backward(&log_b, &log_a);
        let log_likelihood = log_sum_exp(&alpha[t_len - 1]);

        let gamma: Vec<Vec<f64>> = (0..t_len)
            .map(|t| (0..n).map(|k| (alpha[t][k] + beta[t][k] - log_likelihood).exp()).collect())
            .collect();

        let mut xi_sum = vec![0.0; n * n];
        for t in 0..t_len.saturating_sub(1) {
            for i in 0..n {
                for j in 0..n {
                    let log_xi = alpha[t][i] + log_a[i * n + j] + log_b[t + 1][j] + beta[t + 1][j]
                        - log_likelihood;
                    xi_sum[i * n + j] += log_xi.exp();
                }
            }
        }

        Expectation { log_likelihood, gamma, xi_sum }
    }

    fn maximisation(&mut self, e: &Expectation, observations: &[Observation], min_covar: f64) {
        let n = self.n_states;

        let start_sum: f64 = e.gamma[0].iter().sum();
        if start_sum > 0.0 {
            for k in 0..n {
                self.start[k] = e.gamma[0][k] / start_sum;
            }
        }

        for i in 0..n {
            let row = &e.xi_sum[i * n..(i + 1) * n];
            let row_sum: f64 = row.iter().sum();
            if row_sum > 0.0 {
                for j in 0..n {
                    self.transition[i * n + j] = row[j] / row_sum;
                }
            }
        }

        for k in 0..n {
            let weight: f64 = e.gamma.iter().map(|g| g[k]).sum();
            if weight < MIN_STATE_WEIGHT {
                continue;
            }

            let mut mean = [0.0; N_FEATURES];
            for (x, g) in observations.iter().zip(&e.gamma) {
                for d in 0..N_FEATURES {
                    mean[d] += g[k] * x[d];
                }
            }
            for m in mean.iter_mut() {
                *m /= weight;
            }

            let mut variance = [0.0; N_FEATURES];
            for (x, g) in observations.iter().zip(&e.gamma) {
                for d in 0..N_FEATURES {
                    variance[d] += g[k] * (x[d] - mean[d]).powi(2);
                }
            }
            for v in variance.iter_mut() {
                *v = *v / weight + min_covar;
            }

            self.means[k] = mean;
            self.variances[k] = variance;
        }
    }

    /// Most likely state path and its log probability.
    ///
    /// Ties resolve to the lower state index.
    pub fn viterbi(&self, observations: &[Observation]) -> (Vec<usize>, f64) {
        let n = self.n_states;
        let t_len = observations.len();
        if t_len == 0 {
            return (Vec::new(), f64::NEG_INFINITY);
        }

        let log_b = self.log_emissions(observations);
        let log_a = self.log_transition();
        let mut delta = vec![vec![f64::NEG_INFINITY; n]; t_len];
        let mut psi = vec![vec![0usize; n]; t_len];

        for k in 0..n {
            delta[0][k] = self.start[k].ln() + log_b[0][k];
        }

        for t in 1..t_len {
            for j in 0..n {
                let mut best_score = f64::NEG_INFINITY;
                let mut best_state = 0;
                for i in 0..n {
                    let score = delta[t - 1][i] + log_a[i * n + j];
                    if score > best_score {
                        best_score = score;
                        best_state = i;
                    }
                }
                delta[t][j] = best_score + log_b[t][j];
                psi[t][j] = best_state;
            }
        }

        let mut best_final = 0;
        let mut best_score = f64::NEG_INFINITY;
        for k in 0..n {
            if delta[t_len - 1][k] > best_score {
                best_score = delta[t_len - 1][k];
                best_final = k;
            }
        }

        let mut path = vec![0usize; t_len];
        path[t_len - 1] = best_final;
        for t in (0..t_len - 1).rev() {
            path[t] = psi[t + 1][path[t + 1]];
        }

        (path, best_score)
    }
}

/// k-means++ seeding: first center uniform, the rest weighted by squared distance
fn kmeans_plus_plus(observations: &[Observation], k: usize, rng: &mut StdRng) -> Vec<Observation> {
    let mut centers = Vec::with_capacity(k);
    centers.push(observations[rng.random_range(0..observations.len())]);

    while centers.len() < k {
        let weights: Vec<f64> = observations
            .iter()
            .map(|x| centers.iter().map(|c| squared_distance(x, c)).fold(f64::INFINITY, f64::min))
            .collect();
        let total: f64 = weights.iter().sum();

        let next = if total > 0.0 {
            let mut target = rng.random::<f64>() * total;
            let mut chosen = observations.len() - 1;
            for (i, &w) in weights.iter().enumerate() {
                if w > 0.0 && target < w {
                    chosen = i;
                    break;
                }
                target -= w;
            }
            chosen
        } else {
            // All points coincide with a center
            rng.random_range(0..observations.len())
        };
        centers.push(observations[next]);
    }
    centers
}

/// Lloyd refinement; a center that loses all its points stays where it was
fn lloyd(observations: &[Observation], mut centers: Vec<Observation>) -> Vec<Observation> {
    let k = centers.len();
    let mut assignment = vec![usize::MAX; observations.len()];

    for _ in 0..LLOYD_MAX_ROUNDS {
        let mut changed = false;
        for (x, slot) in observations.iter().zip(assignment.iter_mut()) {
            let mut best = 0;
            let mut best_distance = f64::INFINITY;
            for (c, center) in centers.iter().enumerate() {
                let distance = squared_distance(x, center);
                if distance < best_distance {
                    best_distance = distance;
                    best = c;
                }
            }
            if *slot != best {
                *slot = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![[0.0; N_FEATURES]; k];
        let mut counts = vec![0usize; k];
        for (x, &c) in observations.iter().zip(&assignment) {
            counts[c] += 1;
            for d in 0..N_FEATURES {
                sums[c][d] += x[d];
            }
        }
        for c in 0..k {
            if counts[c] > 0 {
                for d in 0..N_FEATURES {
                    centers[c][d] = sums[c][d] / counts[c] as f64;
                }
            }
        }
    }
    centers
}
