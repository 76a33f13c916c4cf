//! Training orchestration
//!
//! A [`TrainingSession`] owns the configuration, the external trainer and
//! the model it produces. Every variant funnels through the same sequence:
//! validate parameters, build the flattened problem, apply the configured
//! weighting strategy, invoke the trainer.

use std::fmt;
use std::path::Path;

use crate::config::{ClassifierType, SvmConfig, SvmParams, WeightingScheme};
use crate::core::{Result, SolverError, SparseMatrix, TrainedModel, Trainer};
use crate::problem::{Problem, ProblemBuilder};
use crate::weights::ClassWeights;

/// How many failed parameter validations are retried (with coercion to the
/// default classifier type) before training gives up
pub const VALIDATION_RETRY_BUDGET: usize = 3;

/// Externally configured versus locally active parameters.
///
/// The two can differ because validation failures coerce the active
/// classifier type; this report makes the difference observable.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterReport {
    pub configured: SvmParams,
    pub active: SvmParams,
}

impl fmt::Display for ParameterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "configured: classifier:{:?} kernel:{:?} degree:{} gamma:{} cache(MB):{} C:{} tol:{}",
            self.configured.classifier,
            self.configured.kernel,
            self.configured.degree,
            self.configured.gamma,
            self.configured.cache_size_mb,
            self.configured.c,
            self.configured.tolerance
        )?;
        write!(
            f,
            "active:     classifier:{:?} kernel:{:?} degree:{} gamma:{} cache(MB):{} C:{} tol:{}",
            self.active.classifier,
            self.active.kernel,
            self.active.degree,
            self.active.gamma,
            self.active.cache_size_mb,
            self.active.c,
            self.active.tolerance
        )
    }
}

/// Drives the external trainer and owns the resulting model
pub struct TrainingSession<T: Trainer> {
    trainer: T,
    config: SvmConfig,
    active: SvmParams,
    builder: ProblemBuilder,
    model: Option<T::Model>,
}

impl<T: Trainer> TrainingSession<T> {
    /// Create a session from a validated configuration
    pub fn new(trainer: T, config: SvmConfig) -> Result<Self> {
        config.validate()?;
        let active = config.params.clone();
        Ok(Self {
            trainer,
            config,
            active,
            builder: ProblemBuilder::new(),
            model: None,
        })
    }

    /// Replace the problem builder, e.g. to enable the value filter
    pub fn with_problem_builder(mut self, builder: ProblemBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// The configuration this session was built with
    pub fn config(&self) -> &SvmConfig {
        &self.config
    }

    /// The locally active parameter set (possibly coerced)
    pub fn active_params(&self) -> &SvmParams {
        &self.active
    }

    /// The current model, if a train call has completed
    pub fn model(&self) -> Option<&T::Model> {
        self.model.as_ref()
    }

    /// Move the current model out of the session
    pub fn take_model(&mut self) -> Option<T::Model> {
        self.model.take()
    }

    /// Parameter echo: configured versus active hyperparameters
    pub fn parameter_report(&self) -> ParameterReport {
        ParameterReport {
            configured: self.config.params.clone(),
            active: self.active.clone(),
        }
    }

    /// Whole-matrix training over both class matrices.
    ///
    /// `volumes` is required by the volume-weighting schemes; `inherited`
    /// optionally overrides (C, gamma), the way refinement levels hand their
    /// tuned pair down.
    pub fn train<P: SparseMatrix, N: SparseMatrix>(
        &mut self,
        positive: &P,
        negative: &N,
        volumes: Option<(&[f64], &[f64])>,
        inherited: Option<(f64, f64)>,
    ) -> Result<&T::Model> {
        self.reset_active(inherited);
        let problem = match self.config.weighting {
            WeightingScheme::PerInstanceVolume => {
                let (vol_p, vol_n) = require_volumes(volumes)?;
                self.builder
                    .whole_matrix_with_volumes(positive, vol_p, negative, vol_n)?
            }
            _ => self.builder.whole_matrix(positive, negative)?,
        };
        let weights = match self.config.weighting {
            WeightingScheme::CountBased => Some(ClassWeights::from_counts(
                positive.rows(),
                negative.rows(),
            )?),
            WeightingScheme::VolumeBased => {
                let (vol_p, vol_n) = require_volumes(volumes)?;
                Some(ClassWeights::from_volumes(vol_p, vol_n)?)
            }
            _ => None,
        };
        self.finish_train(problem, weights)
    }

    /// Index-subset training; the inherited (C, gamma) pair is mandatory
    pub fn train_index_subset<P: SparseMatrix, N: SparseMatrix>(
        &mut self,
        positive: &P,
        negative: &N,
        subset_positive: &[usize],
        subset_negative: &[usize],
        volumes: Option<(&[f64], &[f64])>,
        inherited: Option<(f64, f64)>,
    ) -> Result<&T::Model> {
        let inherited = inherited.ok_or_else(|| {
            SolverError::InvalidParameter(
                "index-subset training requires inherited C and gamma".to_string(),
            )
        })?;
        self.reset_active(Some(inherited));
        let problem = match self.config.weighting {
            WeightingScheme::PerInstanceVolume => {
                let (vol_p, vol_n) = require_volumes(volumes)?;
                self.builder.index_subset_with_volumes(
                    positive,
                    vol_p,
                    negative,
                    vol_n,
                    subset_positive,
                    subset_negative,
                )?
            }
            _ => self
                .builder
                .index_subset(positive, negative, subset_positive, subset_negative)?,
        };
        let weights = match self.config.weighting {
            WeightingScheme::CountBased => Some(ClassWeights::from_counts(
                subset_positive.len(),
                subset_negative.len(),
            )?),
            WeightingScheme::VolumeBased => {
                let (vol_p, vol_n) = require_volumes(volumes)?;
                Some(ClassWeights::from_volume_subset(
                    vol_p,
                    vol_n,
                    subset_positive,
                    subset_negative,
                )?)
            }
            _ => None,
        };
        self.finish_train(problem, weights)
    }

    /// Personalized training: one matrix, labels through the target lookup;
    /// the inherited (C, gamma) pair is mandatory
    pub fn train_personalized<M: SparseMatrix>(
        &mut self,
        matrix: &M,
        target_labels: &[i32],
        index: &[usize],
        inherited: Option<(f64, f64)>,
    ) -> Result<&T::Model> {
        let inherited = inherited.ok_or_else(|| {
            SolverError::InvalidParameter(
                "personalized training requires inherited C and gamma".to_string(),
            )
        })?;
        self.reset_active(Some(inherited));
        let problem = self.builder.personalized(matrix, target_labels, index)?;
        // personalized data carries no volumes, so both weighted schemes
        // count labels through the lookup
        let weights = match self.config.weighting {
            WeightingScheme::CountBased | WeightingScheme::VolumeBased => {
                Some(ClassWeights::from_target_labels(target_labels, index)?)
            }
            _ => None,
        };
        self.finish_train(problem, weights)
    }

    /// Whole-matrix training followed by a model save, for single-level use
    /// outside the hierarchy
    pub fn stand_alone_train<P: SparseMatrix, N: SparseMatrix>(
        &mut self,
        positive: &P,
        negative: &N,
        model_path: &Path,
    ) -> Result<&T::Model> {
        let p_rows = positive.rows();
        let n_rows = negative.rows();
        self.reset_active(None);
        let problem = self.builder.whole_matrix(positive, negative)?;
        let weights = match self.config.weighting {
            WeightingScheme::None | WeightingScheme::PerInstanceVolume => None,
            _ => {
                let weights = ClassWeights::from_counts(p_rows, n_rows)?;
                log::info!(
                    "Min class P(label {}, rows {}, weight {:.6})",
                    weights.labels()[0],
                    p_rows,
                    weights.positive()
                );
                log::info!(
                    "Maj class N(label {}, rows {}, weight {:.6})",
                    weights.labels()[1],
                    n_rows,
                    weights.negative()
                );
                Some(weights)
            }
        };
        let model = self.finish_train(problem, weights)?;
        model.save(model_path)?;
        log::info!("model saved to {}", model_path.display());
        Ok(model)
    }

    /// Stand-alone training with per-instance volume weights instead of
    /// class weights, followed by a model save
    pub fn stand_alone_train_instance_weight<P: SparseMatrix, N: SparseMatrix>(
        &mut self,
        positive: &P,
        vol_positive: &[f64],
        negative: &N,
        vol_negative: &[f64],
        model_path: &Path,
    ) -> Result<&T::Model> {
        self.reset_active(None);
        let problem = self
            .builder
            .whole_matrix_with_volumes(positive, vol_positive, negative, vol_negative)?;
        let model = self.finish_train(problem, None)?;
        model.save(model_path)?;
        log::info!("model saved to {}", model_path.display());
        Ok(model)
    }

    fn reset_active(&mut self, inherited: Option<(f64, f64)>) {
        self.active = self.config.params.clone();
        if let Some((c, gamma)) = inherited {
            self.active.c = c;
            self.active.gamma = gamma;
        }
    }

    /// Shared tail of every train variant: attach weights, validate with
    /// the retry budget, invoke the trainer, replace the owned model.
    fn finish_train(&mut self, problem: Problem, weights: Option<ClassWeights>) -> Result<&T::Model> {
        self.active.class_weights = weights;
        let params = self.checked_params(&problem)?;
        let model = self.trainer.train(&problem, &params)?;
        log::debug!(
            "trained on {} points with C:{} gamma:{}",
            problem.len(),
            params.c,
            params.gamma
        );
        // replacing the option drops the previous model
        Ok(self.model.insert(model))
    }

    /// Validate the active parameters against the problem.
    ///
    /// Each failure is logged together with the parameter echo, then the
    /// classifier type is coerced to the safe default and validation is
    /// retried. The failure after the retry budget is fatal to the caller;
    /// no model is produced.
    fn checked_params(&mut self, problem: &Problem) -> Result<SvmParams> {
        let mut failures = 0;
        loop {
            match self.trainer.validate(&self.active, problem) {
                None => return Ok(self.active.clone()),
                Some(message) => {
                    failures += 1;
                    log::error!("parameter validation failed: {message}");
                    log::error!("{}", self.parameter_report());
                    if failures > VALIDATION_RETRY_BUDGET {
                        return Err(SolverError::InvalidParameter(message));
                    }
                    if self.active.classifier != ClassifierType::CSvc {
                        self.active.coerce_to_default_classifier();
                        log::warn!(
                            "classifier coerced to C-classification before retry {failures}"
                        );
                    }
                }
            }
        }
    }
}

fn require_volumes<'a>(
    volumes: Option<(&'a [f64], &'a [f64])>,
) -> Result<(&'a [f64], &'a [f64])> {
    volumes.ok_or_else(|| {
        SolverError::MissingVolumes(
            "the configured weighting scheme requires volume vectors".to_string(),
        )
    })
}
