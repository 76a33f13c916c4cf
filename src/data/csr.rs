//! Row-indexed sparse matrix storage
//!
//! [`CsrMatrix`] is the in-memory [`SparseMatrix`] implementation used by
//! tests and library consumers that do not bring their own storage. The
//! loader understands the libsvm text format:
//!
//! label index:value index:value ...
//!
//! and splits the points into one matrix per class, the shape the rest of
//! the pipeline works with.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::core::{Result, SolverError, SparseMatrix, SparseVector};

/// Compressed sparse row matrix
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
    cols: usize,
}

impl CsrMatrix {
    /// Create an empty matrix with a fixed column count
    pub fn new(cols: usize) -> Self {
        Self {
            row_ptr: vec![0],
            col_idx: Vec::new(),
            values: Vec::new(),
            cols,
        }
    }

    /// Build a matrix from rows, validating column bounds
    pub fn from_rows(rows: &[SparseVector], cols: usize) -> Result<Self> {
        let mut matrix = Self::new(cols);
        for row in rows {
            matrix.push_row(row)?;
        }
        Ok(matrix)
    }

    /// Append one row
    pub fn push_row(&mut self, row: &SparseVector) -> Result<()> {
        if let Some(&max_col) = row.indices.last() {
            if max_col >= self.cols {
                return Err(SolverError::IndexOutOfRange {
                    what: "matrix columns",
                    index: max_col,
                    len: self.cols,
                });
            }
        }
        self.col_idx.extend_from_slice(&row.indices);
        self.values.extend_from_slice(&row.values);
        self.row_ptr.push(self.col_idx.len());
        Ok(())
    }

    /// Total number of stored elements
    pub fn nnz(&self) -> usize {
        self.col_idx.len()
    }

    /// Number of stored elements in one row
    pub fn row_nnz(&self, i: usize) -> usize {
        self.row_ptr[i + 1] - self.row_ptr[i]
    }
}

impl SparseMatrix for CsrMatrix {
    fn rows(&self) -> usize {
        self.row_ptr.len() - 1
    }

    fn cols(&self) -> usize {
        self.cols
    }

    fn row(&self, i: usize) -> SparseVector {
        let range = self.row_ptr[i]..self.row_ptr[i + 1];
        SparseVector {
            indices: self.col_idx[range.clone()].to_vec(),
            values: self.values[range].to_vec(),
        }
    }
}

/// Load a libsvm-format file into a (positive, negative) class matrix pair
pub fn load_class_pair<P: AsRef<Path>>(path: P) -> Result<(CsrMatrix, CsrMatrix)> {
    let file = File::open(path).map_err(SolverError::IoError)?;
    read_class_pair(BufReader::new(file))
}

/// Read libsvm-format data into a (positive, negative) class matrix pair
pub fn read_class_pair<R: BufRead>(reader: R) -> Result<(CsrMatrix, CsrMatrix)> {
    let mut positive = Vec::new();
    let mut negative = Vec::new();
    let mut max_dimension = 0;

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(SolverError::IoError)?;
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (label, row) = parse_line(line).map_err(|e| {
            SolverError::ParseError(format!("Error parsing line {}: {}", line_num + 1, e))
        })?;
        if let Some(&max_col) = row.indices.last() {
            max_dimension = max_dimension.max(max_col + 1);
        }
        if label > 0.0 {
            positive.push(row);
        } else {
            negative.push(row);
        }
    }

    if positive.is_empty() && negative.is_empty() {
        return Err(SolverError::ParseError("Empty dataset".to_string()));
    }

    Ok((
        CsrMatrix::from_rows(&positive, max_dimension)?,
        CsrMatrix::from_rows(&negative, max_dimension)?,
    ))
}

/// Parse a single libsvm-format line into (label, row)
fn parse_line(line: &str) -> Result<(f64, SparseVector)> {
    let parts: Vec<&str> = line.split_whitespace().collect();

    if parts.is_empty() {
        return Err(SolverError::ParseError("Empty line".to_string()));
    }

    let label = parts[0]
        .parse::<f64>()
        .map_err(|_| SolverError::ParseError(format!("Invalid label: {}", parts[0])))?;
    // normalize to the binary labels the pipeline works with
    let label = if label > 0.0 { 1.0 } else { -1.0 };

    let mut indices = Vec::new();
    let mut values = Vec::new();

    for feature_str in &parts[1..] {
        let feature_parts: Vec<&str> = feature_str.split(':').collect();

        if feature_parts.len() != 2 {
            return Err(SolverError::ParseError(format!(
                "Invalid feature format: {}",
                feature_str
            )));
        }

        let index = feature_parts[0].parse::<usize>().map_err(|_| {
            SolverError::ParseError(format!("Invalid feature index: {}", feature_parts[0]))
        })?;

        let value = feature_parts[1].parse::<f64>().map_err(|_| {
            SolverError::ParseError(format!("Invalid feature value: {}", feature_parts[1]))
        })?;

        // libsvm files use 1-based indexing, storage is 0-based
        if index == 0 {
            return Err(SolverError::ParseError(
                "Feature index must be positive".to_string(),
            ));
        }
        indices.push(index - 1);
        values.push(value);
    }

    Ok((label, SparseVector::new(indices, values)))
}

/// Combine two class matrices into one labeled matrix.
///
/// The label (+1 for the positive block, -1 for the negative block) is
/// stored in column 0 and every feature column is shifted one to the right.
/// The positive block comes first, both blocks keep their row order.
pub fn combine_labeled<P: SparseMatrix, N: SparseMatrix>(
    positive: &P,
    negative: &N,
) -> Result<CsrMatrix> {
    let cols = positive.cols().max(negative.cols()) + 1;
    let mut combined = CsrMatrix::new(cols);

    for i in 0..positive.rows() {
        combined.push_row(&shift_with_label(&positive.row(i), 1.0))?;
    }
    for i in 0..negative.rows() {
        combined.push_row(&shift_with_label(&negative.row(i), -1.0))?;
    }
    Ok(combined)
}

fn shift_with_label(row: &SparseVector, label: f64) -> SparseVector {
    let mut indices = Vec::with_capacity(row.nnz() + 1);
    let mut values = Vec::with_capacity(row.nnz() + 1);
    indices.push(0);
    values.push(label);
    for (col, val) in row.iter() {
        indices.push(col + 1);
        values.push(val);
    }
    SparseVector { indices, values }
}

/// Split selected rows of a matrix into per-class matrices.
///
/// The rows named by `index` are assigned to a class through the
/// target-label lookup and emitted in ascending original-row order, the
/// inverse of [`combine_labeled`] for personalized classification.
pub fn split_by_labels<M: SparseMatrix>(
    matrix: &M,
    target_labels: &[i32],
    index: &[usize],
) -> Result<(CsrMatrix, CsrMatrix)> {
    let mut idx_positive = Vec::new();
    let mut idx_negative = Vec::new();

    for &i in index {
        if i >= matrix.rows() {
            return Err(SolverError::IndexOutOfRange {
                what: "matrix rows",
                index: i,
                len: matrix.rows(),
            });
        }
        let label = *target_labels.get(i).ok_or(SolverError::IndexOutOfRange {
            what: "target labels",
            index: i,
            len: target_labels.len(),
        })?;
        if label == 1 {
            idx_positive.push(i);
        } else {
            idx_negative.push(i);
        }
    }
    idx_positive.sort_unstable();
    idx_negative.sort_unstable();

    let mut positive = CsrMatrix::new(matrix.cols());
    for &i in &idx_positive {
        positive.push_row(&matrix.row(i))?;
    }
    let mut negative = CsrMatrix::new(matrix.cols());
    for &i in &idx_negative {
        negative.push_row(&matrix.row(i))?;
    }
    Ok((positive, negative))
}
