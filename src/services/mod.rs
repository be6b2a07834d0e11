//! Services - snapping, classification and orchestration
//!
//! This module contains the core pipeline services:
//! - `snapper` - `RoadSnapper` capability and the bounded snap pool
//! - `classifier` - Gaussian HMM road-type classifier
//! - `pipeline` - parse -> snap -> classify -> sink orchestration

pub mod classifier;
pub mod pipeline;
pub mod snapper;

// Re-export commonly used types
pub use classifier::{Classification, ClassifierConfig, LabelPolicy, SequenceClassifier};
pub use pipeline::{Pipeline, PipelineReport, TraceSource};
pub use snapper::{RoadSnapper, SnapOutcome, SnapPool};
