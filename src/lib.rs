//! Multilevel training pipeline for binary classifiers over sparse,
//! row-indexed datasets
//!
//! Data is coarsened into hierarchical partitions, a classifier is trained
//! at each level on a subset of points (optionally weighted by aggregation
//! volumes), and only the points that become support vectors are carried
//! forward to the next, finer level. The quadratic-program trainer itself
//! and the sparse-matrix storage are external collaborators behind the
//! traits in [`core`].

pub mod config;
pub mod core;
pub mod data;
pub mod eval;
pub mod multilevel;
pub mod problem;
pub mod report;
pub mod train;
pub mod weights;

// Re-export main types for convenience
pub use crate::config::{ClassifierType, KernelType, SvmConfig, SvmParams, WeightingScheme};
pub use crate::core::error::{Result, SolverError};
pub use crate::core::traits::{SparseMatrix, TrainedModel, Trainer};
pub use crate::core::types::{FeatureNode, SparseVector};
pub use crate::data::{combine_labeled, load_class_pair, split_by_labels, CsrMatrix, PredictionMatrix};
pub use crate::eval::{ConfusionCounts, Evaluator, Summary};
pub use crate::multilevel::{IndexSubset, PartialSolver, Solution, FINEST_LEVEL};
pub use crate::problem::{Problem, ProblemBuilder, DEFAULT_VALUE_EPSILON};
pub use crate::report::ExperimentReport;
pub use crate::train::{ParameterReport, TrainingSession};
pub use crate::weights::ClassWeights;

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
