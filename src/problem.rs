//! Flattening selected dataset rows into a classifier-ready problem
//!
//! A [`Problem`] is what the external trainer consumes: parallel label and
//! feature-row sequences, each row a run of 1-based [`FeatureNode`] cells
//! closed by the sentinel `(-1, 0.0)`. The positive block always precedes
//! the negative block.
//!
//! Selection is uniform: whole-matrix mode is just the subset `0..rows`.
//! Column indices are remapped against the FULL matrix, never against the
//! subset, so a column keeps the same flattened index no matter which rows
//! are selected.

use crate::core::{FeatureNode, Result, SolverError, SparseMatrix, SparseVector};

/// Historical magnitude threshold below which a value was treated as
/// structurally zero in one flattening path. Not applied unless explicitly
/// configured through [`ProblemBuilder::with_value_epsilon`].
pub const DEFAULT_VALUE_EPSILON: f64 = 1e-6;

/// Flattened training input
#[derive(Debug, Clone, PartialEq)]
pub struct Problem {
    labels: Vec<f64>,
    row_starts: Vec<usize>,
    nodes: Vec<FeatureNode>,
    instance_weights: Option<Vec<f64>>,
    n_features: usize,
    positive_len: usize,
}

impl Problem {
    /// Number of data points
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Check if the problem has no points
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label of one point (+1 or -1, or a target label in personalized mode)
    pub fn label(&self, i: usize) -> f64 {
        self.labels[i]
    }

    /// All labels in training order
    pub fn labels(&self) -> &[f64] {
        &self.labels
    }

    /// One flattened feature row, sentinel included
    pub fn row(&self, i: usize) -> &[FeatureNode] {
        &self.nodes[self.row_starts[i]..self.row_starts[i + 1]]
    }

    /// The whole flattened storage
    pub fn nodes(&self) -> &[FeatureNode] {
        &self.nodes
    }

    /// Total number of stored cells, sentinels included
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Column count of the full source matrices
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Length of the leading positive block
    pub fn positive_len(&self) -> usize {
        self.positive_len
    }

    /// Length of the trailing negative block
    pub fn negative_len(&self) -> usize {
        self.labels.len() - self.positive_len
    }

    /// Per-point instance weights, when volume weighting was requested
    pub fn instance_weights(&self) -> Option<&[f64]> {
        self.instance_weights.as_deref()
    }
}

/// Builds [`Problem`]s from class matrices and row selections
#[derive(Debug, Clone, Default)]
pub struct ProblemBuilder {
    value_epsilon: Option<f64>,
}

impl ProblemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable the magnitude filter.
    ///
    /// When set, cells with `|value| <= epsilon` are dropped from the
    /// flattened rows. A trainer whose stored coefficients assume exact
    /// column alignment with the source matrix will see slightly different
    /// rows with the filter on; this is a policy choice, which is why the
    /// filter is off by default.
    pub fn with_value_epsilon(mut self, epsilon: Option<f64>) -> Self {
        self.value_epsilon = epsilon;
        self
    }

    /// The active magnitude filter, if any
    pub fn value_epsilon(&self) -> Option<f64> {
        self.value_epsilon
    }

    /// Flatten every row of both class matrices, positive block first
    pub fn whole_matrix<P: SparseMatrix, N: SparseMatrix>(
        &self,
        positive: &P,
        negative: &N,
    ) -> Result<Problem> {
        let subset_p: Vec<usize> = (0..positive.rows()).collect();
        let subset_n: Vec<usize> = (0..negative.rows()).collect();
        self.build(positive, negative, &subset_p, &subset_n, None)
    }

    /// Flatten every row of both class matrices with per-point volume
    /// weights
    pub fn whole_matrix_with_volumes<P: SparseMatrix, N: SparseMatrix>(
        &self,
        positive: &P,
        vol_positive: &[f64],
        negative: &N,
        vol_negative: &[f64],
    ) -> Result<Problem> {
        let subset_p: Vec<usize> = (0..positive.rows()).collect();
        let subset_n: Vec<usize> = (0..negative.rows()).collect();
        self.build(
            positive,
            negative,
            &subset_p,
            &subset_n,
            Some((vol_positive, vol_negative)),
        )
    }

    /// Flatten only the rows named by the subsets, in subset order
    pub fn index_subset<P: SparseMatrix, N: SparseMatrix>(
        &self,
        positive: &P,
        negative: &N,
        subset_positive: &[usize],
        subset_negative: &[usize],
    ) -> Result<Problem> {
        self.build(positive, negative, subset_positive, subset_negative, None)
    }

    /// Index-subset flattening with per-point volume weights
    pub fn index_subset_with_volumes<P: SparseMatrix, N: SparseMatrix>(
        &self,
        positive: &P,
        vol_positive: &[f64],
        negative: &N,
        vol_negative: &[f64],
        subset_positive: &[usize],
        subset_negative: &[usize],
    ) -> Result<Problem> {
        self.build(
            positive,
            negative,
            subset_positive,
            subset_negative,
            Some((vol_positive, vol_negative)),
        )
    }

    /// Personalized variant: one matrix, labels looked up per row.
    ///
    /// The rows named by `index` are flattened in index order and each point
    /// takes its label from the target-label lookup instead of class-matrix
    /// membership. The positive block length of the result is 0 by
    /// definition (labels are mixed in index order).
    pub fn personalized<M: SparseMatrix>(
        &self,
        matrix: &M,
        target_labels: &[i32],
        index: &[usize],
    ) -> Result<Problem> {
        let mut labels = Vec::with_capacity(index.len());
        let mut row_starts = Vec::with_capacity(index.len() + 1);
        let mut nodes = Vec::new();

        for &idx in index {
            if idx >= matrix.rows() {
                return Err(SolverError::IndexOutOfRange {
                    what: "matrix rows",
                    index: idx,
                    len: matrix.rows(),
                });
            }
            let label = *target_labels.get(idx).ok_or(SolverError::IndexOutOfRange {
                what: "target labels",
                index: idx,
                len: target_labels.len(),
            })?;
            row_starts.push(nodes.len());
            self.flatten_row(&mut nodes, &matrix.row(idx), "training", idx)?;
            labels.push(label as f64);
        }
        row_starts.push(nodes.len());

        Ok(Problem {
            labels,
            row_starts,
            nodes,
            instance_weights: None,
            n_features: matrix.cols(),
            positive_len: 0,
        })
    }

    fn build<P: SparseMatrix, N: SparseMatrix>(
        &self,
        positive: &P,
        negative: &N,
        subset_positive: &[usize],
        subset_negative: &[usize],
        volumes: Option<(&[f64], &[f64])>,
    ) -> Result<Problem> {
        let n_features = positive.cols().max(negative.cols());
        let total = subset_positive.len() + subset_negative.len();

        let mut labels = Vec::with_capacity(total);
        let mut row_starts = Vec::with_capacity(total + 1);
        let mut nodes = Vec::new();
        let mut instance_weights = volumes.map(|_| Vec::with_capacity(total));

        // The class normalizer covers exactly the selected rows: the left
        // factor ranks a point inside its class, the right factor balances
        // the two classes against each other.
        let volume_ctx = match volumes {
            Some((vol_p, vol_n)) => {
                check_volume_len(vol_p, positive.rows(), "positive")?;
                check_volume_len(vol_n, negative.rows(), "negative")?;
                let sum_p = selected_volume_sum(vol_p, subset_positive)?;
                let sum_n = selected_volume_sum(vol_n, subset_negative)?;
                Some((vol_p, vol_n, (1.0 / sum_p).powi(2), (1.0 / sum_n).powi(2)))
            }
            None => None,
        };

        for &idx in subset_positive {
            if idx >= positive.rows() {
                return Err(SolverError::IndexOutOfRange {
                    what: "positive matrix rows",
                    index: idx,
                    len: positive.rows(),
                });
            }
            row_starts.push(nodes.len());
            self.flatten_row(&mut nodes, &positive.row(idx), "positive", idx)?;
            labels.push(1.0);
            if let Some((vol_p, _, sq_inv_p, _)) = volume_ctx {
                if let Some(weights) = instance_weights.as_mut() {
                    weights.push(vol_p[idx] * sq_inv_p);
                }
            }
        }

        for &idx in subset_negative {
            if idx >= negative.rows() {
                return Err(SolverError::IndexOutOfRange {
                    what: "negative matrix rows",
                    index: idx,
                    len: negative.rows(),
                });
            }
            row_starts.push(nodes.len());
            self.flatten_row(&mut nodes, &negative.row(idx), "negative", idx)?;
            labels.push(-1.0);
            if let Some((_, vol_n, _, sq_inv_n)) = volume_ctx {
                if let Some(weights) = instance_weights.as_mut() {
                    weights.push(vol_n[idx] * sq_inv_n);
                }
            }
        }
        row_starts.push(nodes.len());

        if let Some(weights) = instance_weights.as_mut() {
            rescale_to_unit_interval(weights);
        }

        log::debug!(
            "flattened problem: {} positive + {} negative points, {} cells",
            subset_positive.len(),
            subset_negative.len(),
            nodes.len()
        );

        Ok(Problem {
            labels,
            row_starts,
            nodes,
            instance_weights,
            n_features,
            positive_len: subset_positive.len(),
        })
    }

    fn flatten_row(
        &self,
        nodes: &mut Vec<FeatureNode>,
        row: &SparseVector,
        matrix: &'static str,
        row_index: usize,
    ) -> Result<()> {
        if row.is_empty() {
            // a selected row without a single stored element means the
            // index lists or the matrix are corrupted upstream
            return Err(SolverError::EmptyRow {
                matrix,
                row: row_index,
            });
        }
        for (col, value) in row.iter() {
            if let Some(epsilon) = self.value_epsilon {
                if value.abs() <= epsilon {
                    continue;
                }
            }
            nodes.push(FeatureNode::new(col as i32 + 1, value));
        }
        nodes.push(FeatureNode::SENTINEL);
        Ok(())
    }
}

fn check_volume_len(volumes: &[f64], rows: usize, class: &str) -> Result<()> {
    if volumes.len() != rows {
        return Err(SolverError::MissingVolumes(format!(
            "{class} volume vector covers {} of {rows} rows",
            volumes.len()
        )));
    }
    Ok(())
}

fn selected_volume_sum(volumes: &[f64], subset: &[usize]) -> Result<f64> {
    let mut sum = 0.0;
    for &i in subset {
        sum += *volumes.get(i).ok_or(SolverError::IndexOutOfRange {
            what: "volume vector",
            index: i,
            len: volumes.len(),
        })?;
    }
    if sum <= 0.0 {
        return Err(SolverError::DegenerateClass(format!(
            "selected volume sum is {sum}"
        )));
    }
    Ok(sum)
}

/// Linear rescale over the observed min/max. A degenerate range (all
/// weights identical) is left untouched.
fn rescale_to_unit_interval(weights: &mut [f64]) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &w in weights.iter() {
        min = min.min(w);
        max = max.max(w);
    }
    let range = max - min;
    if range > 0.0 {
        for w in weights.iter_mut() {
            *w = (*w - min) / range;
        }
    } else if !weights.is_empty() {
        log::warn!("instance weight range is degenerate; weights left unscaled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CsrMatrix;
    use approx::assert_relative_eq;

    fn positive_matrix() -> CsrMatrix {
        CsrMatrix::from_rows(
            &[
                SparseVector::new(vec![0, 2], vec![1.0, 2.0]),
                SparseVector::new(vec![1], vec![3.0]),
                SparseVector::new(vec![0, 1, 3], vec![4.0, 5.0, 6.0]),
            ],
            4,
        )
        .unwrap()
    }

    fn negative_matrix() -> CsrMatrix {
        CsrMatrix::from_rows(
            &[
                SparseVector::new(vec![3], vec![-1.0]),
                SparseVector::new(vec![0, 2], vec![-2.0, -3.0]),
            ],
            4,
        )
        .unwrap()
    }

    #[test]
    fn test_whole_matrix_layout() {
        let pos = positive_matrix();
        let neg = negative_matrix();
        let problem = ProblemBuilder::new().whole_matrix(&pos, &neg).unwrap();

        assert_eq!(problem.len(), 5);
        assert_eq!(problem.positive_len(), 3);
        assert_eq!(problem.negative_len(), 2);
        assert_eq!(problem.n_features(), 4);
        assert_eq!(problem.labels(), &[1.0, 1.0, 1.0, -1.0, -1.0]);

        // columns become ascending 1-based indices, one sentinel per row
        let row = problem.row(0);
        assert_eq!(row.len(), 3);
        assert_eq!((row[0].index, row[0].value), (1, 1.0));
        assert_eq!((row[1].index, row[1].value), (3, 2.0));
        assert!(row[2].is_sentinel());

        let row = problem.row(3);
        assert_eq!((row[0].index, row[0].value), (4, -1.0));
        assert!(row[1].is_sentinel());
    }

    #[test]
    fn test_element_count_invariant() {
        let pos = positive_matrix();
        let neg = negative_matrix();
        let problem = ProblemBuilder::new().whole_matrix(&pos, &neg).unwrap();

        let total_nnz = pos.nnz() + neg.nnz();
        let total_rows = pos.rows() + neg.rows();
        assert_eq!(problem.node_count(), total_nnz + total_rows);

        let sentinels = problem
            .nodes()
            .iter()
            .filter(|node| node.is_sentinel())
            .count();
        assert_eq!(sentinels, total_rows);
    }

    #[test]
    fn test_index_subset_order_and_features() {
        let pos = positive_matrix();
        let neg = negative_matrix();
        let problem = ProblemBuilder::new()
            .index_subset(&pos, &neg, &[2, 0], &[1])
            .unwrap();

        assert_eq!(problem.len(), 3);
        assert_eq!(problem.positive_len(), 2);
        // subset order is preserved: row 2 of the matrix comes first
        assert_eq!((problem.row(0)[0].index, problem.row(0)[0].value), (1, 4.0));
        assert_eq!((problem.row(1)[0].index, problem.row(1)[0].value), (1, 1.0));
        // column space still comes from the full matrix
        assert_eq!(problem.n_features(), 4);
    }

    #[test]
    fn test_value_epsilon_filter() {
        let pos = CsrMatrix::from_rows(
            &[SparseVector::new(vec![0, 1, 2], vec![0.5, 1e-9, -2.0])],
            3,
        )
        .unwrap();
        let neg =
            CsrMatrix::from_rows(&[SparseVector::new(vec![0], vec![-1.0])], 3).unwrap();

        let unfiltered = ProblemBuilder::new().whole_matrix(&pos, &neg).unwrap();
        assert_eq!(unfiltered.row(0).len(), 4);

        let filtered = ProblemBuilder::new()
            .with_value_epsilon(Some(DEFAULT_VALUE_EPSILON))
            .whole_matrix(&pos, &neg)
            .unwrap();
        let row = filtered.row(0);
        assert_eq!(row.len(), 3);
        assert_eq!((row[0].index, row[0].value), (1, 0.5));
        assert_eq!((row[1].index, row[1].value), (3, -2.0));
        assert!(row[2].is_sentinel());
    }

    #[test]
    fn test_volume_weights_formula_and_rescale() {
        let pos = CsrMatrix::from_rows(
            &[
                SparseVector::new(vec![0], vec![1.0]),
                SparseVector::new(vec![1], vec![2.0]),
            ],
            2,
        )
        .unwrap();
        let neg =
            CsrMatrix::from_rows(&[SparseVector::new(vec![0], vec![-1.0])], 2).unwrap();

        let problem = ProblemBuilder::new()
            .whole_matrix_with_volumes(&pos, &[1.0, 3.0], &neg, &[2.0])
            .unwrap();

        // raw weights: vol * (1/sum_class)^2 = [1/16, 3/16, 1/2],
        // then min-max rescaled over the whole problem
        let weights = problem.instance_weights().unwrap();
        let raw = [1.0 / 16.0, 3.0 / 16.0, 0.5];
        let (min, max) = (raw[0], raw[2]);
        for (w, r) in weights.iter().zip(raw.iter()) {
            assert_relative_eq!(*w, (r - min) / (max - min), epsilon = 1e-12);
        }
        assert_relative_eq!(weights[0], 0.0);
        assert_relative_eq!(weights[2], 1.0);
    }

    #[test]
    fn test_volume_subset_uses_selected_sum() {
        let pos = positive_matrix();
        let neg = negative_matrix();
        let vol_p = [1.0, 100.0, 3.0];
        let vol_n = [2.0, 2.0];

        let problem = ProblemBuilder::new()
            .index_subset_with_volumes(&pos, &vol_p, &neg, &vol_n, &[0, 2], &[0])
            .unwrap();

        // class sum is 1 + 3 = 4, ignoring the unselected row's 100
        let weights = problem.instance_weights().unwrap();
        let raw = [1.0 / 16.0, 3.0 / 16.0, 0.5];
        let range = raw[2] - raw[0];
        assert_relative_eq!(weights[1], (raw[1] - raw[0]) / range, epsilon = 1e-12);
    }

    #[test]
    fn test_degenerate_weight_range_left_unscaled() {
        let pos =
            CsrMatrix::from_rows(&[SparseVector::new(vec![0], vec![1.0])], 1).unwrap();
        let neg =
            CsrMatrix::from_rows(&[SparseVector::new(vec![0], vec![-1.0])], 1).unwrap();

        // both classes end up with the same weight 1/vol
        let problem = ProblemBuilder::new()
            .whole_matrix_with_volumes(&pos, &[2.0], &neg, &[2.0])
            .unwrap();
        let weights = problem.instance_weights().unwrap();
        assert_relative_eq!(weights[0], 0.5);
        assert_relative_eq!(weights[1], 0.5);
    }

    #[test]
    fn test_empty_row_is_fatal() {
        let pos = CsrMatrix::from_rows(
            &[SparseVector::new(vec![0], vec![1.0]), SparseVector::empty()],
            2,
        )
        .unwrap();
        let neg =
            CsrMatrix::from_rows(&[SparseVector::new(vec![0], vec![-1.0])], 2).unwrap();

        let result = ProblemBuilder::new().whole_matrix(&pos, &neg);
        assert!(matches!(
            result,
            Err(SolverError::EmptyRow {
                matrix: "positive",
                row: 1
            })
        ));
    }

    #[test]
    fn test_missing_volumes_is_fatal() {
        let pos = positive_matrix();
        let neg = negative_matrix();
        let result =
            ProblemBuilder::new().whole_matrix_with_volumes(&pos, &[1.0], &neg, &[1.0, 1.0]);
        assert!(matches!(result, Err(SolverError::MissingVolumes(_))));
    }

    #[test]
    fn test_rebuild_is_bit_identical() {
        let pos = positive_matrix();
        let neg = negative_matrix();
        let builder = ProblemBuilder::new();

        let first = builder
            .index_subset_with_volumes(&pos, &[1.0, 2.0, 3.0], &neg, &[4.0, 5.0], &[0, 2], &[1, 0])
            .unwrap();
        let second = builder
            .index_subset_with_volumes(&pos, &[1.0, 2.0, 3.0], &neg, &[4.0, 5.0], &[0, 2], &[1, 0])
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_personalized_labels_through_lookup() {
        let matrix = CsrMatrix::from_rows(
            &[
                SparseVector::new(vec![0], vec![1.0]),
                SparseVector::new(vec![1], vec![2.0]),
                SparseVector::new(vec![0], vec![3.0]),
            ],
            2,
        )
        .unwrap();
        let target = vec![-1, 1, -1];

        let problem = ProblemBuilder::new()
            .personalized(&matrix, &target, &[1, 2])
            .unwrap();

        assert_eq!(problem.len(), 2);
        assert_eq!(problem.labels(), &[1.0, -1.0]);
        assert_eq!((problem.row(0)[0].index, problem.row(0)[0].value), (2, 2.0));
        assert_eq!(problem.node_count(), 2 + 2);
    }

    #[test]
    fn test_personalized_rejects_bad_index() {
        let matrix =
            CsrMatrix::from_rows(&[SparseVector::new(vec![0], vec![1.0])], 1).unwrap();
        let result = ProblemBuilder::new().personalized(&matrix, &[1], &[4]);
        assert!(matches!(result, Err(SolverError::IndexOutOfRange { .. })));
    }
}
