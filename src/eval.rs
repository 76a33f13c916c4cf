//! Prediction and confusion-matrix evaluation
//!
//! Three input shapes share one confusion update rule: a labeled matrix
//! (label in column 0), an index-subset tail over two class matrices, and a
//! matrix-output mode that writes predicted labels into a shared
//! [`PredictionMatrix`] row instead of scoring them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{FeatureNode, Result, SolverError, SparseMatrix, SparseVector, TrainedModel};
use crate::data::PredictionMatrix;

/// Raw confusion-matrix counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl ConfusionCounts {
    /// Update the counts with one (target, predicted) label pair.
    ///
    /// A +1 point predicted +1 is a true positive, predicted otherwise a
    /// false negative; a -1 point predicted -1 is a true negative, predicted
    /// otherwise a false positive.
    pub fn record(&mut self, target: f64, predicted: f64) {
        if target > 0.0 {
            if predicted > 0.0 {
                self.true_positives += 1;
            } else {
                self.false_negatives += 1;
            }
        } else if predicted < 0.0 {
            self.true_negatives += 1;
        } else {
            self.false_positives += 1;
        }
    }

    /// Total number of recorded points
    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    /// Sensitivity (recall): TP / (TP + FN)
    pub fn sensitivity(&self) -> f64 {
        self.true_positives as f64 / (self.true_positives + self.false_negatives) as f64
    }

    /// Specificity: TN / (TN + FP)
    pub fn specificity(&self) -> f64 {
        self.true_negatives as f64 / (self.true_negatives + self.false_positives) as f64
    }

    /// Geometric mean of sensitivity and specificity
    pub fn gmean(&self) -> f64 {
        (self.sensitivity() * self.specificity()).sqrt()
    }

    /// Accuracy: (TP + TN) / total
    pub fn accuracy(&self) -> f64 {
        (self.true_positives + self.true_negatives) as f64 / self.total() as f64
    }

    /// Positive predictive value: TP / (TP + FP), 0 when the denominator
    /// is 0
    pub fn ppv(&self) -> f64 {
        let denominator = self.true_positives + self.false_positives;
        if denominator == 0 {
            0.0
        } else {
            self.true_positives as f64 / denominator as f64
        }
    }

    /// Negative predictive value: TN / (TN + FN), 0 when the denominator
    /// is 0
    pub fn npv(&self) -> f64 {
        let denominator = self.true_negatives + self.false_negatives;
        if denominator == 0 {
            0.0
        } else {
            self.true_negatives as f64 / denominator as f64
        }
    }

    /// F1 score: 2TP / (2TP + FP + FN)
    pub fn f1(&self) -> f64 {
        2.0 * self.true_positives as f64
            / (2 * self.true_positives + self.false_positives + self.false_negatives) as f64
    }
}

/// Evaluation result for one classifier on one point set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub counts: ConfusionCounts,
    pub sensitivity: f64,
    pub specificity: f64,
    pub gmean: f64,
    pub accuracy: f64,
    pub ppv: f64,
    pub npv: f64,
    pub f1: f64,
    /// Regularization strength the model was trained with
    pub c: f64,
    /// Kernel width the model was trained with
    pub gamma: f64,
    pub sv_positive: usize,
    pub sv_negative: usize,
    /// Model-selection iteration marker, when the caller tracks one
    pub iteration: Option<usize>,
}

impl Summary {
    /// Build a summary from raw counts and explicit model facts
    pub fn new(
        counts: ConfusionCounts,
        c: f64,
        gamma: f64,
        sv_positive: usize,
        sv_negative: usize,
        iteration: Option<usize>,
    ) -> Self {
        Self {
            counts,
            sensitivity: counts.sensitivity(),
            specificity: counts.specificity(),
            gmean: counts.gmean(),
            accuracy: counts.accuracy(),
            ppv: counts.ppv(),
            npv: counts.npv(),
            f1: counts.f1(),
            c,
            gamma,
            sv_positive,
            sv_negative,
            iteration,
        }
    }

    /// Build a summary taking hyperparameters and SV counts from the model
    pub fn from_model<M: TrainedModel>(
        counts: ConfusionCounts,
        model: &M,
        iteration: Option<usize>,
    ) -> Self {
        let (c, gamma) = model.hyperparams();
        let (sv_positive, sv_negative) = model.support_counts();
        Self::new(counts, c, gamma, sv_positive, sv_negative, iteration)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Acc:{:.3} Gmean:{:.3} Sens:{:.3} Spec:{:.3} PPV:{:.3} NPV:{:.3} F1:{:.3} \
             TP:{} FP:{} TN:{} FN:{} C:{} gamma:{}",
            self.accuracy,
            self.gmean,
            self.sensitivity,
            self.specificity,
            self.ppv,
            self.npv,
            self.f1,
            self.counts.true_positives,
            self.counts.false_positives,
            self.counts.true_negatives,
            self.counts.false_negatives,
            self.c,
            self.gamma
        )
    }
}

/// Runs a trained model over datasets and accumulates confusion counts.
///
/// Each evaluator owns its feature-row scratch buffer; it grows to the
/// largest row seen and is reused across predict calls of this instance
/// only.
#[derive(Debug, Default)]
pub struct Evaluator {
    probability: bool,
    scratch: Vec<FeatureNode>,
}

impl Evaluator {
    /// Create an evaluator. `probability` selects probability-backed
    /// prediction where the model supports it.
    pub fn new(probability: bool) -> Self {
        Self {
            probability,
            scratch: Vec::new(),
        }
    }

    /// Evaluate a labeled matrix (label stored in column 0)
    pub fn evaluate_labeled<M, D>(
        &mut self,
        model: &M,
        data: &D,
        iteration: Option<usize>,
    ) -> Result<Summary>
    where
        M: TrainedModel,
        D: SparseMatrix,
    {
        let mut counts = ConfusionCounts::default();
        for i in 0..data.rows() {
            let row = data.row(i);
            let target = self.fill_labeled(&row, i)?;
            let predicted = self.predict_scratch(model);
            counts.record(target, predicted);
        }
        let summary = Summary::from_model(counts, model, iteration);
        log::debug!("labeled evaluation: {summary}");
        Ok(summary)
    }

    /// Evaluate an unlabeled class-matrix pair (validation data)
    pub fn evaluate_pair<M, P, N>(
        &mut self,
        model: &M,
        positive: &P,
        negative: &N,
        iteration: Option<usize>,
    ) -> Result<Summary>
    where
        M: TrainedModel,
        P: SparseMatrix,
        N: SparseMatrix,
    {
        let mut counts = ConfusionCounts::default();
        for i in 0..positive.rows() {
            self.fill_shifted(&positive.row(i));
            let predicted = self.predict_scratch(model);
            counts.record(1.0, predicted);
        }
        for i in 0..negative.rows() {
            self.fill_shifted(&negative.row(i));
            let predicted = self.predict_scratch(model);
            counts.record(-1.0, predicted);
        }
        let summary = Summary::from_model(counts, model, iteration);
        log::debug!("pair evaluation: {summary}");
        Ok(summary)
    }

    /// Evaluate the held-out tail of two index subsets.
    ///
    /// Rows `start_positive..` of the positive subset and `start_negative..`
    /// of the negative subset are scored; the leading parts are the training
    /// selection and are skipped. SV counts are not meaningful for this
    /// shape and are reported as 0.
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate_index_tail<M, P, N>(
        &mut self,
        model: &M,
        positive: &P,
        negative: &N,
        subset_positive: &[usize],
        subset_negative: &[usize],
        start_positive: usize,
        start_negative: usize,
        iteration: Option<usize>,
    ) -> Result<Summary>
    where
        M: TrainedModel,
        P: SparseMatrix,
        N: SparseMatrix,
    {
        let mut counts = ConfusionCounts::default();
        for &idx in &subset_positive[start_positive.min(subset_positive.len())..] {
            if idx >= positive.rows() {
                return Err(SolverError::IndexOutOfRange {
                    what: "positive matrix rows",
                    index: idx,
                    len: positive.rows(),
                });
            }
            self.fill_shifted(&positive.row(idx));
            let predicted = self.predict_scratch(model);
            counts.record(1.0, predicted);
        }
        for &idx in &subset_negative[start_negative.min(subset_negative.len())..] {
            if idx >= negative.rows() {
                return Err(SolverError::IndexOutOfRange {
                    what: "negative matrix rows",
                    index: idx,
                    len: negative.rows(),
                });
            }
            self.fill_shifted(&negative.row(idx));
            let predicted = self.predict_scratch(model);
            counts.record(-1.0, predicted);
        }
        let (c, gamma) = model.hyperparams();
        let summary = Summary::new(counts, c, gamma, 0, 0, iteration);
        log::debug!("index tail evaluation: {summary}");
        Ok(summary)
    }

    /// Evaluate an index range of a single matrix against target labels
    /// (personalized mode). SV counts are reported as 0.
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate_personalized<M, D>(
        &mut self,
        model: &M,
        matrix: &D,
        target_labels: &[i32],
        index: &[usize],
        start: usize,
        end: usize,
        iteration: Option<usize>,
    ) -> Result<Summary>
    where
        M: TrainedModel,
        D: SparseMatrix,
    {
        let mut counts = ConfusionCounts::default();
        for &idx in &index[start.min(index.len())..end.min(index.len())] {
            if idx >= matrix.rows() {
                return Err(SolverError::IndexOutOfRange {
                    what: "matrix rows",
                    index: idx,
                    len: matrix.rows(),
                });
            }
            let target = *target_labels.get(idx).ok_or(SolverError::IndexOutOfRange {
                what: "target labels",
                index: idx,
                len: target_labels.len(),
            })?;
            self.fill_shifted(&matrix.row(idx));
            let predicted = self.predict_scratch(model);
            counts.record(target as f64, predicted);
        }
        let (c, gamma) = model.hyperparams();
        let summary = Summary::new(counts, c, gamma, 0, 0, iteration);
        log::debug!("personalized evaluation: {summary}");
        Ok(summary)
    }

    /// Predict a labeled matrix and write each point's label into
    /// `target_row` of the shared output matrix, one column per point.
    pub fn predict_labeled_into_row<M, D>(
        &mut self,
        model: &M,
        data: &D,
        target_row: usize,
        output: &mut PredictionMatrix,
    ) -> Result<()>
    where
        M: TrainedModel,
        D: SparseMatrix,
    {
        for i in 0..data.rows() {
            let row = data.row(i);
            let _target = self.fill_labeled(&row, i)?;
            let predicted = self.predict_scratch(model);
            output.set(target_row, i, predicted);
        }
        Ok(())
    }

    /// Predict an unlabeled class-matrix pair into `target_row` of the
    /// shared output matrix. Negative-class points land in the columns
    /// after the positive block.
    pub fn predict_pair_into_row<M, P, N>(
        &mut self,
        model: &M,
        positive: &P,
        negative: &N,
        target_row: usize,
        output: &mut PredictionMatrix,
    ) -> Result<()>
    where
        M: TrainedModel,
        P: SparseMatrix,
        N: SparseMatrix,
    {
        let positive_rows = positive.rows();
        for i in 0..positive_rows {
            self.fill_shifted(&positive.row(i));
            let predicted = self.predict_scratch(model);
            output.set(target_row, i, predicted);
        }
        for i in 0..negative.rows() {
            self.fill_shifted(&negative.row(i));
            let predicted = self.predict_scratch(model);
            output.set(target_row, positive_rows + i, predicted);
        }
        Ok(())
    }

    /// Predict one unlabeled row of a matrix
    pub fn predict_row<M, D>(&mut self, model: &M, matrix: &D, row_index: usize) -> Result<f64>
    where
        M: TrainedModel,
        D: SparseMatrix,
    {
        if row_index >= matrix.rows() {
            return Err(SolverError::IndexOutOfRange {
                what: "matrix rows",
                index: row_index,
                len: matrix.rows(),
            });
        }
        self.fill_shifted(&matrix.row(row_index));
        Ok(self.predict_scratch(model))
    }

    /// Fill the scratch buffer from a labeled row; returns the target label
    /// stored in column 0.
    fn fill_labeled(&mut self, row: &SparseVector, row_index: usize) -> Result<f64> {
        let mut pairs = row.iter();
        let (first_col, target) = pairs.next().ok_or(SolverError::ParseError(format!(
            "labeled row {row_index} is empty"
        )))?;
        if first_col != 0 {
            return Err(SolverError::ParseError(format!(
                "labeled row {row_index} has no label in column 0"
            )));
        }
        self.scratch.clear();
        for (col, value) in pairs {
            // feature columns were already shifted right when the label was
            // inserted, so the stored column IS the 1-based index
            self.scratch.push(FeatureNode::new(col as i32, value));
        }
        self.scratch.push(FeatureNode::SENTINEL);
        Ok(target)
    }

    /// Fill the scratch buffer from an unlabeled row, shifting columns to
    /// 1-based indices.
    fn fill_shifted(&mut self, row: &SparseVector) {
        self.scratch.clear();
        for (col, value) in row.iter() {
            self.scratch.push(FeatureNode::new(col as i32 + 1, value));
        }
        self.scratch.push(FeatureNode::SENTINEL);
    }

    fn predict_scratch<M: TrainedModel>(&self, model: &M) -> f64 {
        if self.probability {
            if let Some(label) = model.predict_probability(&self.scratch) {
                return label;
            }
        }
        model.predict(&self.scratch)
    }
}
