//! Error kinds surfaced by the pipeline stages

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// The route markup is not well-formed; nothing is recovered from it
    #[error("malformed route document: {0}")]
    MalformedDocument(String),
    #[error("invalid {field} value '{value}'")]
    InvalidNumber { field: &'static str, value: String },
}

/// Why a single point could not be snapped
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SnapFailure {
    #[error("routing service returned status {0}")]
    Status(u16),
    #[error("routing service found no road near the point")]
    NoMatch,
    #[error("malformed routing response: {0}")]
    MalformedBody(String),
    #[error("request failed: {0}")]
    Transport(String),
}

impl SnapFailure {
    /// Transport errors, throttling and server errors are worth another attempt
    pub fn is_transient(&self) -> bool {
        match self {
            SnapFailure::Transport(_) => true,
            SnapFailure::Status(code) => *code == 429 || (500..600).contains(code),
            SnapFailure::NoMatch | SnapFailure::MalformedBody(_) => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifyError {
    #[error("insufficient data: {points} points for {states} states")]
    InsufficientData { points: usize, states: usize },
    #[error("numerical failure during model fit: {0}")]
    Numerical(String),
    #[error("invalid model parameters: {0}")]
    InvalidModel(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error("sink rejected classified points: {0}")]
    Sink(#[source] anyhow::Error),
    #[error("failed to export snapped points: {0}")]
    Export(#[source] anyhow::Error),
    #[error("classifier task failed: {0}")]
    Task(#[source] tokio::task::JoinError),
}
