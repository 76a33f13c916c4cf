//! Error types for the multilevel training pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Empty row {row} in {matrix} matrix")]
    EmptyRow { matrix: &'static str, row: usize },

    #[error("Missing volume data: {0}")]
    MissingVolumes(String),

    #[error("Index {index} out of range for {what} of length {len}")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Degenerate class: {0}")]
    DegenerateClass(String),

    #[error("Operation `{operation}` not allowed in state {state}")]
    StateError {
        state: &'static str,
        operation: &'static str,
    },

    #[error("Training failed: {0}")]
    TrainingError(String),

    #[error("Model not trained")]
    ModelNotTrained,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type Result<T> = std::result::Result<T, SolverError>;
