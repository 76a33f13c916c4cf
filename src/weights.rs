//! Class-weight computation
//!
//! A [`ClassWeights`] pair balances the two classes in the eyes of the
//! external trainer. The weight labels are fixed: slot 0 is the minority
//! (positive, +1) class, slot 1 the majority (negative, -1) class.

use serde::{Deserialize, Serialize};

use crate::core::{Result, SolverError};

/// Two-class weight pair with fixed labels `[+1, -1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassWeights {
    labels: [i32; 2],
    values: [f64; 2],
}

impl ClassWeights {
    /// Count-based weights: `1 / row_count(class)`
    pub fn from_counts(positive_rows: usize, negative_rows: usize) -> Result<Self> {
        Self::from_sums(positive_rows as f64, negative_rows as f64)
    }

    /// Volume-based weights over whole volume vectors: `1 / sum(volume)`
    pub fn from_volumes(vol_positive: &[f64], vol_negative: &[f64]) -> Result<Self> {
        Self::from_sums(vol_positive.iter().sum(), vol_negative.iter().sum())
    }

    /// Volume-based weights over an index subset.
    ///
    /// Sums only the volumes of the selected rows, looked up through the
    /// original indices; the rest of the volume vectors does not participate.
    pub fn from_volume_subset(
        vol_positive: &[f64],
        vol_negative: &[f64],
        subset_positive: &[usize],
        subset_negative: &[usize],
    ) -> Result<Self> {
        let sum_p = subset_sum(vol_positive, subset_positive, "positive volumes")?;
        let sum_n = subset_sum(vol_negative, subset_negative, "negative volumes")?;
        Self::from_sums(sum_p, sum_n)
    }

    /// Personalized weights: counts labels through a target-label lookup
    /// over an index array instead of matrix row membership.
    pub fn from_target_labels(target_labels: &[i32], index: &[usize]) -> Result<Self> {
        let mut count_p = 0usize;
        let mut count_n = 0usize;
        for &i in index {
            let label = *target_labels.get(i).ok_or(SolverError::IndexOutOfRange {
                what: "target labels",
                index: i,
                len: target_labels.len(),
            })?;
            if label == 1 {
                count_p += 1;
            } else {
                count_n += 1;
            }
        }
        Self::from_counts(count_p, count_n)
    }

    /// Weight of the positive (+1) class
    pub fn positive(&self) -> f64 {
        self.values[0]
    }

    /// Weight of the negative (-1) class
    pub fn negative(&self) -> f64 {
        self.values[1]
    }

    /// Fixed weight labels, minority first
    pub fn labels(&self) -> [i32; 2] {
        self.labels
    }

    /// Weight values in label order
    pub fn values(&self) -> [f64; 2] {
        self.values
    }

    fn from_sums(sum_positive: f64, sum_negative: f64) -> Result<Self> {
        if sum_positive <= 0.0 {
            return Err(SolverError::DegenerateClass(format!(
                "positive class sum is {sum_positive}"
            )));
        }
        if sum_negative <= 0.0 {
            return Err(SolverError::DegenerateClass(format!(
                "negative class sum is {sum_negative}"
            )));
        }
        let weights = Self {
            labels: [1, -1],
            values: [1.0 / sum_positive, 1.0 / sum_negative],
        };
        log::debug!(
            "class weights: P(label {}, sum {:.6}, weight {:.6}) N(label {}, sum {:.6}, weight {:.6})",
            weights.labels[0],
            sum_positive,
            weights.values[0],
            weights.labels[1],
            sum_negative,
            weights.values[1]
        );
        Ok(weights)
    }
}

fn subset_sum(volumes: &[f64], subset: &[usize], what: &'static str) -> Result<f64> {
    let mut sum = 0.0;
    for &i in subset {
        sum += *volumes.get(i).ok_or(SolverError::IndexOutOfRange {
            what,
            index: i,
            len: volumes.len(),
        })?;
    }
    Ok(sum)
}
