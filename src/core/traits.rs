//! Trait seams to the external collaborators
//!
//! The pipeline never owns a sparse-matrix format or a quadratic-program
//! optimizer. Datasets come in through [`SparseMatrix`], and the classifier
//! trainer comes in through [`Trainer`]/[`TrainedModel`].

use std::path::Path;

use crate::config::SvmParams;
use crate::core::{FeatureNode, Result, SparseVector};
use crate::problem::Problem;

/// Read-only, row-indexed access to a sparse dataset
pub trait SparseMatrix {
    /// Number of rows (data points)
    fn rows(&self) -> usize;

    /// Number of columns (features)
    fn cols(&self) -> usize;

    /// Get a single row by arbitrary index
    ///
    /// # Panics
    /// Panics if `i >= rows()`
    fn row(&self, i: usize) -> SparseVector;

    /// Check if the matrix has no rows
    fn is_empty(&self) -> bool {
        self.rows() == 0
    }
}

/// External classifier trainer
///
/// Implementations wrap a concrete quadratic-program optimizer. The pipeline
/// only validates parameters, hands over a flattened [`Problem`] and consumes
/// the resulting model.
pub trait Trainer {
    type Model: TrainedModel;

    /// Check a parameter set against a problem.
    ///
    /// Returns `Some(message)` describing the first violation, `None` when
    /// the parameters are usable as given.
    fn validate(&self, params: &SvmParams, problem: &Problem) -> Option<String>;

    /// Train a classifier on the flattened problem
    fn train(&self, problem: &Problem, params: &SvmParams) -> Result<Self::Model>;
}

/// A trained classifier owned by the session that produced it
pub trait TrainedModel {
    /// Predict the label (+1 or -1) for one sentinel-terminated feature row
    fn predict(&self, row: &[FeatureNode]) -> f64;

    /// Probability-backed prediction where the underlying trainer supports
    /// it; `None` for trainer/kernel combinations without probability
    /// estimates.
    fn predict_probability(&self, row: &[FeatureNode]) -> Option<f64> {
        let _ = row;
        None
    }

    /// Support-vector counts per class: (positive block, negative block)
    fn support_counts(&self) -> (usize, usize);

    /// 1-based support-vector positions within the training problem
    /// ordering, positive block first
    fn support_positions(&self) -> &[usize];

    /// The (C, gamma) pair the model was actually trained with
    fn hyperparams(&self) -> (f64, f64);

    /// Persist the model in the trainer's native format
    fn save(&self, path: &Path) -> Result<()>;
}
