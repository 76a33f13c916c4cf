//! Core type definitions for the training pipeline

/// One cell of a flattened training problem.
///
/// `index` is 1-based: a dataset column `c` is stored as `c + 1`, so that the
/// sentinel cell `(-1, 0.0)` can terminate each row without colliding with a
/// real column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureNode {
    /// 1-based column index, or -1 for the row terminator
    pub index: i32,
    /// Feature value (0.0 in the terminator)
    pub value: f64,
}

impl FeatureNode {
    /// Row terminator. Every flattened row ends with exactly one of these.
    pub const SENTINEL: FeatureNode = FeatureNode {
        index: -1,
        value: 0.0,
    };

    /// Create a new feature cell
    pub fn new(index: i32, value: f64) -> Self {
        Self { index, value }
    }

    /// Whether this cell is the row terminator
    pub fn is_sentinel(&self) -> bool {
        self.index < 0
    }
}

/// Sparse dataset row: (column, value) pairs with unique, ascending columns
#[derive(Clone, Debug, PartialEq)]
pub struct SparseVector {
    /// Sorted, zero-based column indices of the stored elements
    pub indices: Vec<usize>,
    /// Values corresponding to `indices`
    pub values: Vec<f64>,
}

impl SparseVector {
    /// Create a new sparse vector, sorting the pairs by column
    pub fn new(indices: Vec<usize>, values: Vec<f64>) -> Self {
        assert_eq!(
            indices.len(),
            values.len(),
            "Indices and values must have same length"
        );

        let mut pairs: Vec<_> = indices.into_iter().zip(values).collect();
        pairs.sort_by_key(|&(idx, _)| idx);

        let (indices, values): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        Self { indices, values }
    }

    /// Create an empty sparse vector
    pub fn empty() -> Self {
        Self {
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Get the value stored at a column (0 if absent)
    pub fn get(&self, index: usize) -> f64 {
        match self.indices.binary_search(&index) {
            Ok(pos) => self.values[pos],
            Err(_) => 0.0,
        }
    }

    /// Iterate over the stored (column, value) pairs in ascending column order
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    /// Number of stored elements
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Check if the row has no stored elements
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
