use ndarray::Array2;

use crate::ModelError;

/// Dense symmetric pairwise dissimilarity matrix with a zero diagonal.
///
/// Read-only once built; every solver shares one instance by reference.
#[derive(Debug, Clone)]
pub struct DissimilarityMatrix {
    d: Array2<f64>,
}

impl DissimilarityMatrix {
    /// Wrap a dense matrix, validating shape, symmetry and the diagonal.
    pub fn from_dense(d: Array2<f64>) -> Result<Self, ModelError> {
        let (rows, cols) = d.dim();
        if rows != cols {
            return Err(ModelError::ShapeMismatch { rows, cols });
        }
        for i in 0..rows {
            if d[[i, i]] != 0.0 {
                return Err(ModelError::NotSymmetric { i, j: i });
            }
            for j in (i + 1)..rows {
                if (d[[i, j]] - d[[j, i]]).abs() > 1e-9 {
                    return Err(ModelError::NotSymmetric { i, j });
                }
            }
        }
        Ok(Self { d })
    }

    /// Build from an `(i, j, d)` edge list; unlisted pairs stay zero and
    /// each listed pair is set symmetrically. Self-loops are ignored.
    pub fn from_edges<I>(n: usize, edges: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = (usize, usize, f64)>,
    {
        let mut d = Array2::zeros((n, n));
        for (i, j, w) in edges {
            if i >= n {
                return Err(ModelError::ItemOutOfRange { item: i, n });
            }
            if j >= n {
                return Err(ModelError::ItemOutOfRange { item: j, n });
            }
            if i == j {
                continue;
            }
            d[[i, j]] = w;
            d[[j, i]] = w;
        }
        Ok(Self { d })
    }

    /// Squared Euclidean distances between the rows of `values`.
    pub fn from_points(values: &Array2<f64>) -> Self {
        let n = values.nrows();
        let m = values.ncols();
        let mut d = Array2::zeros((n, n));
        for i in 0..n {
            for j in (i + 1)..n {
                let mut sum = 0.0;
                for c in 0..m {
                    let diff = values[[i, c]] - values[[j, c]];
                    sum += diff * diff;
                }
                d[[i, j]] = sum;
                d[[j, i]] = sum;
            }
        }
        Self { d }
    }

    /// Number of items.
    pub fn n(&self) -> usize {
        self.d.nrows()
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.d[[i, j]]
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.d
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn from_dense_rejects_asymmetry() {
        let bad = array![[0.0, 1.0], [2.0, 0.0]];
        assert!(DissimilarityMatrix::from_dense(bad).is_err());
    }

    #[test]
    fn from_dense_rejects_nonzero_diagonal() {
        let bad = array![[1.0, 2.0], [2.0, 0.0]];
        assert!(DissimilarityMatrix::from_dense(bad).is_err());
    }

    #[test]
    fn from_edges_fills_symmetrically() {
        let d = DissimilarityMatrix::from_edges(3, vec![(0, 2, 1.5), (1, 0, 2.0)]).unwrap();
        assert_eq!(d.get(2, 0), 1.5);
        assert_eq!(d.get(0, 2), 1.5);
        assert_eq!(d.get(0, 1), 2.0);
        assert_eq!(d.get(1, 2), 0.0);
    }

    #[test]
    fn from_edges_rejects_out_of_range() {
        assert!(DissimilarityMatrix::from_edges(3, vec![(0, 3, 1.0)]).is_err());
    }

    #[test]
    fn from_points_squared_euclidean() {
        let values = array![[0.0, 0.0], [3.0, 4.0]];
        let d = DissimilarityMatrix::from_points(&values);
        assert_eq!(d.get(0, 1), 25.0);
        assert_eq!(d.get(1, 0), 25.0);
        assert_eq!(d.get(0, 0), 0.0);
    }
}
