//! The multilevel refinement step
//!
//! One [`PartialSolver`] handles one partition at one level of the
//! coarsen/refine hierarchy: it trains that partition's classifier with the
//! (C, gamma) pair inherited from the coarser level, predicts the shared
//! validation and test sets into its assigned row of the multi-classifier
//! output matrices, and (above the finest level) extracts which original
//! data points survived as support vectors. The union of those points
//! across a level's partitions is the [`Solution`], which becomes exactly
//! the next finer level's index subsets.

use std::collections::BTreeSet;

use crate::core::{Result, SolverError, SparseMatrix, TrainedModel, Trainer};
use crate::config::SvmConfig;
use crate::data::PredictionMatrix;
use crate::eval::Evaluator;
use crate::train::TrainingSession;

/// Level number of the finest (largest, least aggregated) point set
pub const FINEST_LEVEL: u32 = 1;

/// Ordered row indices into one class matrix.
///
/// The subset is the single place where training-order (local) positions
/// and dataset (original) row indices are converted into each other;
/// nothing else in the pipeline does offset arithmetic on raw index lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSubset {
    indices: Vec<usize>,
}

impl IndexSubset {
    /// Wrap an ordered list of original row indices
    pub fn new(indices: Vec<usize>) -> Self {
        Self { indices }
    }

    /// The whole-matrix subset `0..n`
    pub fn full(n: usize) -> Self {
        Self {
            indices: (0..n).collect(),
        }
    }

    /// Number of selected rows
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Check if no rows are selected
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// The selected original indices in subset order
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Map a subset-order (local) position to the original row index
    pub fn local_to_original(&self, local: usize) -> Result<usize> {
        self.indices
            .get(local)
            .copied()
            .ok_or(SolverError::IndexOutOfRange {
                what: "index subset",
                index: local,
                len: self.indices.len(),
            })
    }

    /// Map an original row index back to its subset-order position
    pub fn original_to_local(&self, original: usize) -> Option<usize> {
        self.indices.iter().position(|&idx| idx == original)
    }
}

impl From<Vec<usize>> for IndexSubset {
    fn from(indices: Vec<usize>) -> Self {
        Self::new(indices)
    }
}

/// The carry-forward artifact of one level: per class, the set of original
/// dataset row indices that were support vectors, plus the hyperparameters
/// that produced them. Sets, not sequences: duplicates across partitions
/// collapse.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Solution {
    pub c: f64,
    pub gamma: f64,
    pub positive: BTreeSet<usize>,
    pub negative: BTreeSet<usize>,
}

impl Solution {
    pub fn new(c: f64, gamma: f64) -> Self {
        Self {
            c,
            gamma,
            positive: BTreeSet::new(),
            negative: BTreeSet::new(),
        }
    }

    /// Extract training-order support-vector indices from a whole-matrix
    /// model.
    ///
    /// Support-vector positions are 1-based with the positive block first,
    /// so a positive position maps to `position - 1` and a negative one to
    /// `position - 1 - positive_block_len`.
    pub fn from_model<M: TrainedModel>(model: &M, positive_block_len: usize) -> Result<Self> {
        let (c, gamma) = model.hyperparams();
        let mut solution = Self::new(c, gamma);
        let (nsv_p, nsv_n) = model.support_counts();
        let positions = checked_positions(model, nsv_p, nsv_n)?;

        for &position in &positions[..nsv_p] {
            solution.positive.insert(local_of(position, 0)?);
        }
        for &position in &positions[nsv_p..nsv_p + nsv_n] {
            solution.negative.insert(local_of(position, positive_block_len)?);
        }
        Ok(solution)
    }

    /// Total number of retained points
    pub fn len(&self) -> usize {
        self.positive.len() + self.negative.len()
    }

    /// Check if no points were retained
    pub fn is_empty(&self) -> bool {
        self.positive.is_empty() && self.negative.is_empty()
    }

    /// The retained indices as the next level's subsets, ascending
    pub fn to_subsets(&self) -> (IndexSubset, IndexSubset) {
        (
            IndexSubset::new(self.positive.iter().copied().collect()),
            IndexSubset::new(self.negative.iter().copied().collect()),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SolverState {
    Configured,
    Trained,
    Evaluated,
    Propagated,
}

impl SolverState {
    fn name(self) -> &'static str {
        match self {
            SolverState::Configured => "Configured",
            SolverState::Trained => "Trained",
            SolverState::Evaluated => "Evaluated",
            SolverState::Propagated => "Propagated",
        }
    }
}

/// One partition's classifier at one level
pub struct PartialSolver<T: Trainer> {
    session: TrainingSession<T>,
    evaluator: Evaluator,
    level: u32,
    classifier_id: usize,
    subset_positive: IndexSubset,
    subset_negative: IndexSubset,
    inherited: (f64, f64),
    state: SolverState,
}

impl<T: Trainer> PartialSolver<T> {
    /// Configure a solver for one partition.
    ///
    /// `classifier_id` is the row this solver owns in the shared prediction
    /// matrices; `inherited_c`/`inherited_gamma` come from the coarser
    /// level's model selection.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trainer: T,
        config: SvmConfig,
        level: u32,
        classifier_id: usize,
        subset_positive: IndexSubset,
        subset_negative: IndexSubset,
        inherited_c: f64,
        inherited_gamma: f64,
    ) -> Result<Self> {
        let probability = config.params.probability;
        let session = TrainingSession::new(trainer, config)?;
        Ok(Self {
            session,
            evaluator: Evaluator::new(probability),
            level,
            classifier_id,
            subset_positive,
            subset_negative,
            inherited: (inherited_c, inherited_gamma),
            state: SolverState::Configured,
        })
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn classifier_id(&self) -> usize {
        self.classifier_id
    }

    /// Name of the current state, for diagnostics
    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// The underlying session (model access, parameter echo)
    pub fn session(&self) -> &TrainingSession<T> {
        &self.session
    }

    /// Train this partition's classifier on its index subsets
    pub fn train<P: SparseMatrix, N: SparseMatrix>(
        &mut self,
        positive: &P,
        negative: &N,
        volumes: Option<(&[f64], &[f64])>,
    ) -> Result<()> {
        self.expect_state(SolverState::Configured, "train")?;
        self.session.train_index_subset(
            positive,
            negative,
            self.subset_positive.indices(),
            self.subset_negative.indices(),
            volumes,
            Some(self.inherited),
        )?;
        self.state = SolverState::Trained;
        Ok(())
    }

    /// Predict the held-out test and validation matrices (labeled form,
    /// label in column 0) into this classifier's row of the shared output
    /// matrices.
    pub fn evaluate<D: SparseMatrix, V: SparseMatrix>(
        &mut self,
        test: &D,
        validation: &V,
        output_test: &mut PredictionMatrix,
        output_validation: &mut PredictionMatrix,
    ) -> Result<()> {
        self.expect_state(SolverState::Trained, "evaluate")?;
        let model = self.session.model().ok_or(SolverError::ModelNotTrained)?;
        self.evaluator
            .predict_labeled_into_row(model, test, self.classifier_id, output_test)?;
        self.evaluator
            .predict_labeled_into_row(model, validation, self.classifier_id, output_validation)?;
        self.state = SolverState::Evaluated;
        Ok(())
    }

    /// Close out the level.
    ///
    /// Above the finest level the model's support vectors are mapped back
    /// to original dataset indices and unioned into `solution`. At the
    /// finest level there is nothing to propagate; the model is saved when
    /// the configuration asks for it.
    pub fn propagate(&mut self, solution: &mut Solution) -> Result<()> {
        self.expect_state(SolverState::Evaluated, "propagate")?;
        let model = self.session.model().ok_or(SolverError::ModelNotTrained)?;
        let (c, gamma) = model.hyperparams();
        solution.c = c;
        solution.gamma = gamma;

        if self.level > FINEST_LEVEL {
            let (nsv_p, nsv_n) = model.support_counts();
            let positions = checked_positions(model, nsv_p, nsv_n)?;
            let positive_block_len = self.subset_positive.len();

            for &position in &positions[..nsv_p] {
                let local = local_of(position, 0)?;
                solution
                    .positive
                    .insert(self.subset_positive.local_to_original(local)?);
            }
            for &position in &positions[nsv_p..nsv_p + nsv_n] {
                let local = local_of(position, positive_block_len)?;
                solution
                    .negative
                    .insert(self.subset_negative.local_to_original(local)?);
            }
            log::debug!(
                "classifier {} at level {} retained {} positive and {} negative support vectors",
                self.classifier_id,
                self.level,
                nsv_p,
                nsv_n
            );
        } else if self.session.config().save_final_model {
            // validated configs carry a path whenever the flag is set
            if let Some(path) = self.session.config().final_model_path.clone() {
                model.save(&path)?;
                log::info!(
                    "finest-level model of classifier {} saved to {}",
                    self.classifier_id,
                    path.display()
                );
            }
        } else {
            log::debug!(
                "finest level reached; model of classifier {} not persisted",
                self.classifier_id
            );
        }

        self.state = SolverState::Propagated;
        Ok(())
    }

    fn expect_state(&self, expected: SolverState, operation: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(SolverError::StateError {
                state: self.state.name(),
                operation,
            });
        }
        Ok(())
    }
}

/// Fetch the model's SV position list, checking it covers both blocks
fn checked_positions<M: TrainedModel>(model: &M, nsv_p: usize, nsv_n: usize) -> Result<&[usize]> {
    let positions = model.support_positions();
    if positions.len() < nsv_p + nsv_n {
        return Err(SolverError::TrainingError(format!(
            "model reports {} support-vector positions for {} + {} support vectors",
            positions.len(),
            nsv_p,
            nsv_n
        )));
    }
    Ok(positions)
}

/// Convert a 1-based training-order position into a local block offset
fn local_of(position: usize, block_offset: usize) -> Result<usize> {
    position
        .checked_sub(1 + block_offset)
        .ok_or_else(|| {
            SolverError::TrainingError(format!(
                "support-vector position {position} precedes its block (offset {block_offset})"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SvmParams;
    use crate::core::{FeatureNode, SparseVector};
    use crate::data::{combine_labeled, CsrMatrix};
    use crate::problem::Problem;
    use std::path::Path;

    struct ScriptedModel {
        c: f64,
        gamma: f64,
        positions: Vec<usize>,
        nsv: (usize, usize),
    }

    impl TrainedModel for ScriptedModel {
        fn predict(&self, _row: &[FeatureNode]) -> f64 {
            1.0
        }

        fn support_counts(&self) -> (usize, usize) {
            self.nsv
        }

        fn support_positions(&self) -> &[usize] {
            &self.positions
        }

        fn hyperparams(&self) -> (f64, f64) {
            (self.c, self.gamma)
        }

        fn save(&self, path: &Path) -> Result<()> {
            std::fs::write(path, b"scripted-model")?;
            Ok(())
        }
    }

    /// Reports a fixed support-vector layout regardless of the data
    struct ScriptedTrainer {
        positions: Vec<usize>,
        nsv: (usize, usize),
    }

    impl Trainer for ScriptedTrainer {
        type Model = ScriptedModel;

        fn validate(&self, _params: &SvmParams, _problem: &Problem) -> Option<String> {
            None
        }

        fn train(&self, _problem: &Problem, params: &SvmParams) -> Result<ScriptedModel> {
            Ok(ScriptedModel {
                c: params.c,
                gamma: params.gamma,
                positions: self.positions.clone(),
                nsv: self.nsv,
            })
        }
    }

    fn class_matrices(rows_p: usize, rows_n: usize) -> (CsrMatrix, CsrMatrix) {
        let build = |n: usize, sign: f64| {
            let rows: Vec<SparseVector> = (0..n)
                .map(|i| SparseVector::new(vec![0], vec![sign * (i + 1) as f64]))
                .collect();
            CsrMatrix::from_rows(&rows, 1).unwrap()
        };
        (build(rows_p, 1.0), build(rows_n, -1.0))
    }

    #[test]
    fn test_index_subset_mapping_contract() {
        let subset = IndexSubset::new(vec![10, 20, 30]);
        assert_eq!(subset.len(), 3);
        assert_eq!(subset.local_to_original(1).unwrap(), 20);
        assert_eq!(subset.original_to_local(30), Some(2));
        assert_eq!(subset.original_to_local(99), None);
        assert!(subset.local_to_original(3).is_err());

        let full = IndexSubset::full(4);
        assert_eq!(full.indices(), &[0, 1, 2, 3]);
    }

    #[test]
    fn test_solution_from_model_block_offsets() {
        let model = ScriptedModel {
            c: 1.0,
            gamma: 1.0,
            positions: vec![1, 3, 7],
            nsv: (2, 1),
        };
        let solution = Solution::from_model(&model, 5).unwrap();
        assert_eq!(solution.positive.iter().copied().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(solution.negative.iter().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_support_vector_round_trip_through_subsets() {
        // 5 positive + 5 negative points; the trainer reports positive
        // block positions {1, 3} and negative block position {7}
        // (the 2nd negative point: 5 + 2). The recovered original indices
        // must be subset_p[0], subset_p[2] and subset_n[1].
        let (pos, neg) = class_matrices(100, 100);
        let subset_p = IndexSubset::new(vec![10, 20, 30, 40, 50]);
        let subset_n = IndexSubset::new(vec![60, 70, 80, 90, 95]);

        let trainer = ScriptedTrainer {
            positions: vec![1, 3, 7],
            nsv: (2, 1),
        };
        let mut solver = PartialSolver::new(
            trainer,
            SvmConfig::default(),
            3,
            0,
            subset_p,
            subset_n,
            1.0,
            0.5,
        )
        .unwrap();

        solver.train(&pos, &neg, None).unwrap();

        let labeled = combine_labeled(&pos, &neg).unwrap();
        let mut out_td = PredictionMatrix::new(1, labeled.rows());
        let mut out_vd = PredictionMatrix::new(1, labeled.rows());
        solver
            .evaluate(&labeled, &labeled, &mut out_td, &mut out_vd)
            .unwrap();

        let mut solution = Solution::default();
        solver.propagate(&mut solution).unwrap();

        assert_eq!(
            solution.positive.iter().copied().collect::<Vec<_>>(),
            vec![10, 30]
        );
        assert_eq!(
            solution.negative.iter().copied().collect::<Vec<_>>(),
            vec![70]
        );
        assert_eq!(solution.c, 1.0);
        assert_eq!(solution.gamma, 0.5);
        assert_eq!(solver.state_name(), "Propagated");
    }

    #[test]
    fn test_duplicates_across_partitions_collapse() {
        let (pos, neg) = class_matrices(50, 50);
        let labeled = combine_labeled(&pos, &neg).unwrap();
        let mut solution = Solution::default();

        // two partitions sharing original index 20 among their support
        // vectors
        for (id, subset_p) in [vec![20, 21], vec![22, 20]].into_iter().enumerate() {
            let trainer = ScriptedTrainer {
                positions: vec![1, 2, 3],
                nsv: (2, 1),
            };
            let mut solver = PartialSolver::new(
                trainer,
                SvmConfig::default(),
                2,
                id,
                IndexSubset::new(subset_p),
                IndexSubset::new(vec![30]),
                1.0,
                1.0,
            )
            .unwrap();
            let mut out_td = PredictionMatrix::new(2, labeled.rows());
            let mut out_vd = PredictionMatrix::new(2, labeled.rows());
            solver.train(&pos, &neg, None).unwrap();
            solver
                .evaluate(&labeled, &labeled, &mut out_td, &mut out_vd)
                .unwrap();
            solver.propagate(&mut solution).unwrap();
        }

        // {20, 21} + {22, 20} collapse to three distinct points
        assert_eq!(
            solution.positive.iter().copied().collect::<Vec<_>>(),
            vec![20, 21, 22]
        );
        assert_eq!(
            solution.negative.iter().copied().collect::<Vec<_>>(),
            vec![30]
        );

        let (next_p, next_n) = solution.to_subsets();
        assert_eq!(next_p.indices(), &[20, 21, 22]);
        assert_eq!(next_n.indices(), &[30]);
    }

    #[test]
    fn test_state_machine_rejects_out_of_order_calls() {
        let (pos, neg) = class_matrices(3, 3);
        let labeled = combine_labeled(&pos, &neg).unwrap();
        let trainer = ScriptedTrainer {
            positions: vec![1, 4],
            nsv: (1, 1),
        };
        let mut solver = PartialSolver::new(
            trainer,
            SvmConfig::default(),
            2,
            0,
            IndexSubset::full(3),
            IndexSubset::full(3),
            1.0,
            1.0,
        )
        .unwrap();

        let mut out = PredictionMatrix::new(1, labeled.rows());
        let mut out2 = PredictionMatrix::new(1, labeled.rows());

        // evaluate before train
        let result = solver.evaluate(&labeled, &labeled, &mut out, &mut out2);
        assert!(matches!(
            result,
            Err(SolverError::StateError {
                state: "Configured",
                operation: "evaluate"
            })
        ));

        solver.train(&pos, &neg, None).unwrap();
        // double train
        let result = solver.train(&pos, &neg, None);
        assert!(matches!(result, Err(SolverError::StateError { .. })));

        solver.evaluate(&labeled, &labeled, &mut out, &mut out2).unwrap();
        let mut solution = Solution::default();
        solver.propagate(&mut solution).unwrap();
        let result = solver.propagate(&mut solution);
        assert!(matches!(result, Err(SolverError::StateError { .. })));
    }

    #[test]
    fn test_finest_level_does_not_extract() {
        let (pos, neg) = class_matrices(3, 3);
        let labeled = combine_labeled(&pos, &neg).unwrap();
        let trainer = ScriptedTrainer {
            positions: vec![1, 4],
            nsv: (1, 1),
        };
        let mut solver = PartialSolver::new(
            trainer,
            SvmConfig::default(),
            FINEST_LEVEL,
            0,
            IndexSubset::full(3),
            IndexSubset::full(3),
            1.0,
            1.0,
        )
        .unwrap();

        let mut out = PredictionMatrix::new(1, labeled.rows());
        let mut out2 = PredictionMatrix::new(1, labeled.rows());
        solver.train(&pos, &neg, None).unwrap();
        solver.evaluate(&labeled, &labeled, &mut out, &mut out2).unwrap();

        let mut solution = Solution::default();
        solver.propagate(&mut solution).unwrap();
        assert!(solution.is_empty());
    }

    #[test]
    fn test_finest_level_honors_save_flag() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("final.model");

        let (pos, neg) = class_matrices(3, 3);
        let labeled = combine_labeled(&pos, &neg).unwrap();
        let trainer = ScriptedTrainer {
            positions: vec![1, 4],
            nsv: (1, 1),
        };
        let config = SvmConfig {
            save_final_model: true,
            final_model_path: Some(model_path.clone()),
            ..SvmConfig::default()
        };
        let mut solver = PartialSolver::new(
            trainer,
            config,
            FINEST_LEVEL,
            0,
            IndexSubset::full(3),
            IndexSubset::full(3),
            1.0,
            1.0,
        )
        .unwrap();

        let mut out = PredictionMatrix::new(1, labeled.rows());
        let mut out2 = PredictionMatrix::new(1, labeled.rows());
        solver.train(&pos, &neg, None).unwrap();
        solver.evaluate(&labeled, &labeled, &mut out, &mut out2).unwrap();
        solver.propagate(&mut Solution::default()).unwrap();

        assert!(model_path.exists());
    }

    #[test]
    fn test_sibling_classifiers_write_disjoint_rows() {
        let (pos, neg) = class_matrices(5, 5);
        let labeled = combine_labeled(&pos, &neg).unwrap();
        let mut out_td = PredictionMatrix::new(3, labeled.rows());
        let mut out_vd = PredictionMatrix::new(3, labeled.rows());

        for id in 0..3 {
            let trainer = ScriptedTrainer {
                positions: vec![1, 3],
                nsv: (1, 1),
            };
            let mut solver = PartialSolver::new(
                trainer,
                SvmConfig::default(),
                2,
                id,
                IndexSubset::new(vec![0, 2]),
                IndexSubset::new(vec![1]),
                1.0,
                1.0,
            )
            .unwrap();
            solver.train(&pos, &neg, None).unwrap();
            solver
                .evaluate(&labeled, &labeled, &mut out_td, &mut out_vd)
                .unwrap();
        }
        out_td.finalize();
        out_vd.finalize();

        for id in 0..3 {
            assert_eq!(out_vd.populated_in_row(id), labeled.rows());
            assert_eq!(out_td.populated_in_row(id), labeled.rows());
        }
    }
}
