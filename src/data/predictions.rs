//! Shared multi-classifier prediction output
//!
//! At one level of the hierarchy every partition's classifier predicts the
//! same validation and test points. Each classifier owns one row of a
//! [`PredictionMatrix`] and writes one column per point; rows are disjoint,
//! so sibling classifiers never interfere. The owner calls
//! [`PredictionMatrix::finalize`] once after all partitions have written.

/// Dense (classifier x point) matrix of predicted labels
#[derive(Debug, Clone)]
pub struct PredictionMatrix {
    data: Vec<f64>,
    classifiers: usize,
    points: usize,
    finalized: bool,
}

impl PredictionMatrix {
    /// Create an output matrix for `classifiers` rows and `points` columns.
    /// Cells start out unset (NaN).
    pub fn new(classifiers: usize, points: usize) -> Self {
        Self {
            data: vec![f64::NAN; classifiers * points],
            classifiers,
            points,
            finalized: false,
        }
    }

    /// Number of classifier rows
    pub fn classifiers(&self) -> usize {
        self.classifiers
    }

    /// Number of point columns
    pub fn points(&self) -> usize {
        self.points
    }

    /// Store one predicted label.
    ///
    /// # Panics
    /// Panics if the matrix is already finalized or the coordinates are out
    /// of range.
    pub fn set(&mut self, classifier: usize, point: usize, label: f64) {
        assert!(!self.finalized, "prediction matrix is finalized");
        assert!(classifier < self.classifiers, "classifier row out of range");
        assert!(point < self.points, "point column out of range");
        self.data[classifier * self.points + point] = label;
    }

    /// Read a predicted label; `None` while the cell is unset
    pub fn get(&self, classifier: usize, point: usize) -> Option<f64> {
        let value = self.data[classifier * self.points + point];
        if value.is_nan() {
            None
        } else {
            Some(value)
        }
    }

    /// One classifier's full prediction row
    pub fn row(&self, classifier: usize) -> &[f64] {
        &self.data[classifier * self.points..(classifier + 1) * self.points]
    }

    /// Count the set cells in one classifier row
    pub fn populated_in_row(&self, classifier: usize) -> usize {
        self.row(classifier).iter().filter(|v| !v.is_nan()).count()
    }

    /// Seal the matrix after all classifiers have written their rows
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    /// Whether the matrix has been sealed
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}
