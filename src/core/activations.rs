use serde::{Deserialize, Serialize};

use crate::config::Activation;
use crate::core::dropout::{self, Dropout};
use crate::core::storage::{
    DenseVector, Matrix, MatrixStorage, SharedVector, Vector, VectorStorage,
};
use crate::error::{NNError, Result};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Input,
    Tanh,
    Maxout,
    Rectifier,
    Softmax,
    Linear,
}

impl LayerKind {
    pub fn hidden(activation: Activation) -> Self {
        match activation {
            Activation::Tanh => Self::Tanh,
            Activation::Rectifier => Self::Rectifier,
            Activation::Maxout => Self::Maxout,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Input => "Input",
            Self::Tanh => "Tanh",
            Self::Maxout => "Maxout",
            Self::Rectifier => "Rectifier",
            Self::Softmax => "Softmax",
            Self::Linear => "Linear",
        }
    }

    pub fn dropout_salt(&self) -> Option<u64> {
        match self {
            Self::Input => Some(dropout::INPUT_SALT),
            Self::Tanh => Some(dropout::TANH_SALT),
            Self::Maxout => Some(dropout::MAXOUT_SALT),
            Self::Rectifier => Some(dropout::RECTIFIER_SALT),
            Self::Softmax | Self::Linear => None,
        }
    }

    pub fn is_output_only(&self) -> bool {
        matches!(self, Self::Softmax | Self::Linear)
    }

    /// Applies the nonlinearity in place to the pre-activations `z`.
    ///
    /// Maxout is not elementwise and goes through [`maxout_forward`] instead.
    pub fn activate(&self, z: &mut DenseVector) -> Result<()> {
        match self {
            Self::Tanh => tanh_forward(z),
            Self::Rectifier => rectifier_forward(z),
            Self::Softmax => softmax_forward(z)?,
            Self::Linear | Self::Maxout => (),
            Self::Input => {
                return Err(NNError::NotImplemented("fprop for Input layer".to_string()))
            }
        }
        Ok(())
    }

    pub fn partial_grad(&self, e: f32, a: f32) -> f32 {
        match self {
            // dy/dnet = 1 - a^2 for y = tanh(net)
            Self::Tanh => e * (1.0 - a * a),
            Self::Rectifier => {
                if a > 0.0 {
                    e
                } else {
                    0.0
                }
            }
            Self::Maxout | Self::Linear | Self::Softmax | Self::Input => e,
        }
    }
}

fn tanh_forward(z: &mut DenseVector) {
    // 1 - 2/(1+e^2z) evaluates faster than tanh, slightly less stable
    z.array_mut().mapv_inplace(|v| 1.0 - 2.0 / (1.0 + (2.0 * v).exp()));
}

fn rectifier_forward(z: &mut DenseVector) {
    z.array_mut().mapv_inplace(|v| v.max(0.0));
}

fn softmax_forward(z: &mut DenseVector) -> Result<()> {
    let max = z.max_value();
    let a = z.array_mut();
    a.mapv_inplace(|v| (v - max).exp());
    let scale = a.sum();
    a.mapv_inplace(|v| v / scale);
    if a.iter().any(|v| v.is_nan()) {
        return Err(NNError::NumericalInstability("predicted NaN".to_string()));
    }
    Ok(())
}

/// `a[row] = max_i(W[row,i]·x[i]) + b[row]` over the kept rows.
///
/// Rows without a finite candidate fall back to 0 before the bias. When any
/// unit ends above 1 the whole vector is divided by the largest value.
pub fn maxout_forward(
    a: &mut DenseVector,
    w: &Matrix,
    x: &Vector,
    b: &SharedVector,
    mask: Option<&Dropout>,
) {
    let mut max = 0f32;
    for row in 0..a.size() {
        a.set(row, 0.0);
        if mask.is_some_and(|m| !m.unit_active(row)) {
            continue;
        }
        let mut best = f32::NEG_INFINITY;
        match x {
            Vector::Dense(x) => {
                for (i, &v) in x.raw().iter().enumerate() {
                    best = best.max(w.get(row, i) * v);
                }
            }
            Vector::Sparse(x) => {
                for (i, v) in x.iter() {
                    best = best.max(w.get(row, i) * v);
                }
            }
        }
        if best == f32::NEG_INFINITY {
            best = 0.0;
        }
        let value = best + b.get(row);
        a.set(row, value);
        max = max.max(value);
    }
    if max > 1.0 {
        a.scale(1.0 / max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::{DenseRowMatrix, SparseVector};
    use ndarray::array;

    #[test]
    fn test_tanh_matches_std() {
        let mut z = DenseVector::from_vec(vec![-3.0, -0.5, 0.0, 0.25, 2.0]);
        let expected: Vec<f32> = z.raw().iter().map(|v| v.tanh()).collect();
        LayerKind::Tanh.activate(&mut z).unwrap();
        for (got, want) in z.raw().iter().zip(expected) {
            assert!((got - want).abs() < 1e-6);
        }
        let mut zero = DenseVector::zeros(3);
        LayerKind::Tanh.activate(&mut zero).unwrap();
        assert_eq!(zero.raw(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_rectifier() {
        let mut z = DenseVector::from_vec(vec![-1.0, 0.0, 2.5]);
        LayerKind::Rectifier.activate(&mut z).unwrap();
        assert_eq!(z.raw(), &[0.0, 0.0, 2.5]);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let mut z = DenseVector::from_vec(vec![1000.0, -1000.0, 3.0, 999.0, 0.0]);
        LayerKind::Softmax.activate(&mut z).unwrap();
        let sum: f32 = z.raw().iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(z.raw().iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_softmax_nan_is_instability() {
        let mut z = DenseVector::from_vec(vec![f32::NAN, 1.0]);
        let err = LayerKind::Softmax.activate(&mut z);
        assert!(matches!(err, Err(NNError::NumericalInstability(_))));
    }

    #[test]
    fn test_partial_grads() {
        assert_eq!(LayerKind::Tanh.partial_grad(2.0, 0.5), 1.5);
        assert_eq!(LayerKind::Rectifier.partial_grad(2.0, 0.0), 0.0);
        assert_eq!(LayerKind::Rectifier.partial_grad(2.0, 0.1), 2.0);
        assert_eq!(LayerKind::Maxout.partial_grad(-3.0, 0.7), -3.0);
    }

    #[test]
    fn test_maxout_scales_when_above_one() {
        let w = Matrix::DenseRow(DenseRowMatrix::from_array(&array![[1.0f32, 2.0], [0.5, 0.5]]));
        let b = SharedVector::from_slice(&[0.0, 0.0]);
        let x = Vector::Dense(DenseVector::from_vec(vec![1.0, 2.0]));
        let mut a = DenseVector::zeros(2);
        maxout_forward(&mut a, &w, &x, &b, None);
        // raw maxima 4 and 1, divided by 4
        assert_eq!(a.raw(), &[1.0, 0.25]);
    }

    #[test]
    fn test_maxout_empty_sparse_input_uses_bias() {
        let w = Matrix::DenseRow(DenseRowMatrix::from_array(&array![[1.0f32, 2.0]]));
        let b = SharedVector::from_slice(&[0.3]);
        let x = Vector::Sparse(SparseVector::new(2));
        let mut a = DenseVector::zeros(1);
        maxout_forward(&mut a, &w, &x, &b, None);
        assert!((a.get(0) - 0.3).abs() < 1e-7);
    }

    #[test]
    fn test_maxout_dropped_rows_are_zero() {
        let w = Matrix::DenseRow(DenseRowMatrix::from_array(&array![[0.1f32], [0.2], [0.3]]));
        let b = SharedVector::zeros(3);
        let x = Vector::Dense(DenseVector::from_vec(vec![1.0]));
        let mut mask = Dropout::new(3, 0.5);
        mask.fill_bytes(5);
        let mut a = DenseVector::zeros(3);
        maxout_forward(&mut a, &w, &x, &b, Some(&mask));
        for row in 0..3 {
            if !mask.unit_active(row) {
                assert_eq!(a.get(row), 0.0);
            }
        }
    }
}
