//! Runtime configuration for the training pipeline
//!
//! Configuration is an explicit value handed to each component at
//! construction. It can be loaded from a JSON file or built in code starting
//! from [`SvmConfig::default`].

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::{Result, SolverError};
use crate::weights::ClassWeights;

/// Classifier formulation requested from the external trainer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClassifierType {
    /// C-support-vector classification (the safe default)
    CSvc,
    NuSvc,
    OneClass,
    EpsilonSvr,
    NuSvr,
}

/// Kernel requested from the external trainer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KernelType {
    Linear,
    Polynomial,
    Rbf,
    Sigmoid,
}

/// Class-balance strategy applied when a problem is assembled
///
/// Exactly one strategy is active per training call. Per-instance volume
/// weights and class weights were historically independent mechanisms; the
/// single selector makes their mutual exclusivity structural.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WeightingScheme {
    /// No weighting at all
    None,
    /// Class weights `1 / row_count(class)`
    CountBased,
    /// Class weights `1 / sum(volume(class))`
    VolumeBased,
    /// Per-point instance weights derived from volumes, attached to the
    /// flattened problem instead of the parameter set
    PerInstanceVolume,
}

/// Hyperparameters handed to the external trainer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmParams {
    pub classifier: ClassifierType,
    pub kernel: KernelType,
    /// Polynomial kernel degree
    pub degree: u32,
    /// Kernel width
    pub gamma: f64,
    /// Trainer-side kernel cache size in megabytes
    pub cache_size_mb: f64,
    /// Regularization strength
    pub c: f64,
    /// Convergence tolerance
    pub tolerance: f64,
    /// Shrinking heuristic flag
    pub shrinking: bool,
    /// Probability-estimate flag
    pub probability: bool,
    /// Per-class weights, filled in by the session according to the
    /// configured [`WeightingScheme`]
    pub class_weights: Option<ClassWeights>,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            classifier: ClassifierType::CSvc,
            kernel: KernelType::Rbf,
            degree: 3,
            gamma: 1.0,
            cache_size_mb: 100.0,
            c: 1.0,
            tolerance: 0.001,
            shrinking: true,
            probability: false,
            class_weights: None,
        }
    }
}

impl SvmParams {
    /// Reset the classifier formulation to the safe default after a failed
    /// validation: C-classification with degree 3.
    pub fn coerce_to_default_classifier(&mut self) {
        self.classifier = ClassifierType::CSvc;
        self.degree = 3;
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmConfig {
    pub params: SvmParams,
    pub weighting: WeightingScheme,
    /// Whether the finest-level model is persisted at the end of a
    /// multilevel run
    pub save_final_model: bool,
    /// Target path for the finest-level model; required when
    /// `save_final_model` is set
    pub final_model_path: Option<PathBuf>,
}

impl Default for SvmConfig {
    fn default() -> Self {
        Self {
            params: SvmParams::default(),
            weighting: WeightingScheme::CountBased,
            save_final_model: false,
            final_model_path: None,
        }
    }
}

impl SvmConfig {
    /// Load a configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path).map_err(SolverError::IoError)?;
        let reader = BufReader::new(file);
        let config: SvmConfig = serde_json::from_reader(reader)
            .map_err(|e| SolverError::SerializationError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path).map_err(SolverError::IoError)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)
            .map_err(|e| SolverError::SerializationError(e.to_string()))?;
        Ok(())
    }

    /// Check the invariants a usable configuration must satisfy
    pub fn validate(&self) -> Result<()> {
        let p = &self.params;
        if p.c <= 0.0 {
            return Err(SolverError::InvalidParameter(format!(
                "regularization strength must be positive, got {}",
                p.c
            )));
        }
        if p.gamma < 0.0 {
            return Err(SolverError::InvalidParameter(format!(
                "kernel width must be non-negative, got {}",
                p.gamma
            )));
        }
        if p.tolerance <= 0.0 {
            return Err(SolverError::InvalidParameter(format!(
                "convergence tolerance must be positive, got {}",
                p.tolerance
            )));
        }
        if p.cache_size_mb <= 0.0 {
            return Err(SolverError::InvalidParameter(format!(
                "cache size must be positive, got {}",
                p.cache_size_mb
            )));
        }
        if p.kernel == KernelType::Polynomial && p.degree == 0 {
            return Err(SolverError::InvalidParameter(
                "polynomial degree must be at least 1".to_string(),
            ));
        }
        // Instance weights live in the problem, class weights in the
        // parameter set. Configuring both at once has no defined meaning.
        if self.weighting == WeightingScheme::PerInstanceVolume && p.class_weights.is_some() {
            return Err(SolverError::InvalidParameter(
                "per-instance volume weighting excludes explicit class weights".to_string(),
            ));
        }
        if self.save_final_model && self.final_model_path.is_none() {
            return Err(SolverError::InvalidParameter(
                "save_final_model is set but final_model_path is missing".to_string(),
            ));
        }
        Ok(())
    }
}
