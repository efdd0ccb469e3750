use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::{CategoricalReduction, Parameters};
use crate::core::storage::{DenseVector, VectorStorage};
use crate::error::{NNError, Result};
use crate::utils::murmur3_32;

/// One row as delivered by the row encoder.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct InputRow {
    /// Active one-hot slots, each below the categorical width.
    pub cats: Vec<usize>,
    /// Already normalised numeric features, NaN for missing.
    pub nums: Vec<f64>,
}

impl InputRow {
    pub fn new(cats: Vec<usize>, nums: Vec<f64>) -> Self {
        Self { cats, nums }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputLayout {
    /// Total number of one-hot slots over all categorical columns.
    pub cat_width: usize,
    pub nums: usize,
}

impl InputLayout {
    pub fn new(cat_width: usize, nums: usize) -> Self {
        Self { cat_width, nums }
    }

    pub fn full_width(&self) -> usize {
        self.cat_width + self.nums
    }

    pub fn num_start(&self) -> usize {
        self.cat_width
    }

    pub fn is_reduced(&self, params: &Parameters) -> bool {
        params.max_categorical_features < self.cat_width
    }

    pub fn units(&self, params: &Parameters) -> usize {
        if self.is_reduced(params) {
            self.nums + params.max_categorical_features
        } else {
            self.full_width()
        }
    }

    fn check(&self, row: &InputRow) -> Result<()> {
        if row.nums.len() != self.nums {
            return Err(NNError::InvalidInputShape(format!(
                "expected {} numeric features, got {}",
                self.nums,
                row.nums.len()
            )));
        }
        if let Some(&cat) = row.cats.iter().find(|&&c| c >= self.cat_width) {
            return Err(NNError::InvalidInputShape(format!(
                "categorical slot {} out of range for width {}",
                cat, self.cat_width
            )));
        }
        Ok(())
    }
}

#[inline]
fn impute(x: f64) -> f32 {
    if x.is_nan() {
        0.0
    } else {
        x as f32
    }
}

/// Writes the encoding of `row` into `a`, which must have `layout.units(params)` slots.
pub fn encode_row(a: &mut DenseVector, layout: &InputLayout, params: &Parameters, row: &InputRow) -> Result<()> {
    layout.check(row)?;
    if a.size() != layout.units(params) {
        return Err(NNError::LayerShapeMismatch(format!(
            "input layer has {} units, encoding needs {}",
            a.size(),
            layout.units(params)
        )));
    }
    a.fill(0.0);

    if !layout.is_reduced(params) {
        for &cat in &row.cats {
            a.set(cat, 1.0);
        }
        let start = layout.num_start();
        for (i, &x) in row.nums.iter().enumerate() {
            a.set(start + i, impute(x));
        }
        return Ok(());
    }

    match params.categorical_reduction {
        CategoricalReduction::HashTrick => hash_trick(a, params, row),
        CategoricalReduction::RandomProjection => random_projection(a, layout, params, row),
    }
    Ok(())
}

/// Categoricals are hashed into the first `max_categorical_features` slots,
/// numerics follow unchanged.
fn hash_trick(a: &mut DenseVector, params: &Parameters, row: &InputRow) {
    let cm = params.max_categorical_features;
    for &cat in &row.cats {
        let hash = murmur3_32(&(cat as i32).to_be_bytes(), params.seed as i32 as u32) as i32;
        let slot = (hash as i64 % cm as i64).unsigned_abs() as usize;
        a.add(slot, 1.0);
    }
    for (i, &x) in row.nums.iter().enumerate() {
        a.set(cm + i, impute(x));
    }
}

/// Sparse random projection: entries are ±√3 with probability 1/6 each.
fn projection_entry(rng: &mut StdRng) -> f32 {
    let rnd: f32 = rng.gen();
    if rnd < 1.0 / 6.0 {
        3f32.sqrt()
    } else if rnd > 5.0 / 6.0 {
        -(3f32.sqrt())
    } else {
        0.0
    }
}

fn random_projection(a: &mut DenseVector, layout: &InputLayout, params: &Parameters, row: &InputRow) {
    let n = layout.full_width() as u64;
    for i in 0..a.size() {
        let base = params.seed.wrapping_add((i as u64).wrapping_mul(n));
        for &cat in &row.cats {
            let mut rng = StdRng::seed_from_u64(base.wrapping_add(cat as u64));
            a.add(i, projection_entry(&mut rng));
        }
        let mut rng = StdRng::seed_from_u64(base.wrapping_add(layout.num_start() as u64));
        for &x in &row.nums {
            a.add(i, impute(x) * projection_entry(&mut rng));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_hot_then_numerics() {
        let layout = InputLayout::new(4, 2);
        let params = Parameters::default();
        let mut a = DenseVector::zeros(layout.units(&params));
        encode_row(&mut a, &layout, &params, &InputRow::new(vec![1, 3], vec![0.5, f64::NAN])).unwrap();
        assert_eq!(a.raw(), &[0.0, 1.0, 0.0, 1.0, 0.5, 0.0]);
    }

    #[test]
    fn test_shape_errors() {
        let layout = InputLayout::new(4, 2);
        let params = Parameters::default();
        let mut a = DenseVector::zeros(6);
        let err = encode_row(&mut a, &layout, &params, &InputRow::new(vec![4], vec![0.0, 0.0]));
        assert!(matches!(err, Err(NNError::InvalidInputShape(_))));
        let err = encode_row(&mut a, &layout, &params, &InputRow::new(vec![], vec![0.0]));
        assert!(matches!(err, Err(NNError::InvalidInputShape(_))));
        let mut short = DenseVector::zeros(5);
        let err = encode_row(&mut short, &layout, &params, &InputRow::new(vec![], vec![0.0, 0.0]));
        assert!(matches!(err, Err(NNError::LayerShapeMismatch(_))));
    }

    #[test]
    fn test_hash_trick_bounds_width() {
        let layout = InputLayout::new(1000, 2);
        let params = Parameters { max_categorical_features: 8, ..Default::default() };
        assert_eq!(layout.units(&params), 10);
        let mut a = DenseVector::zeros(10);
        let row = InputRow::new(vec![3, 500, 999], vec![1.5, -2.0]);
        encode_row(&mut a, &layout, &params, &row).unwrap();
        let hashed: f32 = a.raw()[..8].iter().sum();
        assert_eq!(hashed, 3.0);
        assert_eq!(&a.raw()[8..], &[1.5, -2.0]);

        let mut again = DenseVector::zeros(10);
        encode_row(&mut again, &layout, &params, &row).unwrap();
        assert_eq!(a, again);
    }

    #[test]
    fn test_random_projection_entries() {
        let layout = InputLayout::new(50, 1);
        let params = Parameters {
            max_categorical_features: 4,
            categorical_reduction: CategoricalReduction::RandomProjection,
            ..Default::default()
        };
        let mut a = DenseVector::zeros(layout.units(&params));
        encode_row(&mut a, &layout, &params, &InputRow::new(vec![7], vec![0.0])).unwrap();
        let s3 = 3f32.sqrt();
        for &v in a.raw() {
            assert!(v == 0.0 || (v.abs() - s3).abs() < 1e-6, "unexpected entry {}", v);
        }
    }
}
