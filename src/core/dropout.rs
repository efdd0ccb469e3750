use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::core::storage::{DenseVector, VectorStorage};

pub const INPUT_SALT: u64 = 0x1337_B4BE;
pub const TANH_SALT: u64 = 0xDA7A_6000;
pub const MAXOUT_SALT: u64 = 0x51C8_D00D;
pub const RECTIFIER_SALT: u64 = 0x3C71_F1ED;
const LAYER_STRIDE: u64 = 0x9E37_79B9;

/// Seed for one layer's mask in one forward pass.
pub fn layer_seed(pass_seed: u64, global_seed: u64, salt: u64, layer: usize) -> u64 {
    pass_seed
        .wrapping_add(global_seed)
        .wrapping_add(salt)
        .wrapping_add((layer as u64).wrapping_mul(LAYER_STRIDE))
}

#[inline]
pub fn row_active(bits: Option<&[u8]>, row: usize) -> bool {
    match bits {
        None => true,
        Some(bits) => bits[row / 8] & (1 << (row % 8)) != 0,
    }
}

#[derive(Clone, Debug)]
pub struct Dropout {
    units: usize,
    ratio: f64,
    bits: Vec<u8>,
}

impl Dropout {
    pub fn new(units: usize, ratio: f64) -> Self {
        Self {
            units,
            ratio,
            bits: vec![0xFF; units.div_ceil(8)],
        }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn units(&self) -> usize {
        self.units
    }

    /// Regenerates the mask; each unit is kept with probability `1 - ratio`.
    pub fn fill_bytes(&mut self, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        if self.ratio == 0.5 {
            rng.fill_bytes(&mut self.bits);
            return;
        }
        self.bits.iter_mut().for_each(|b| *b = 0);
        for i in 0..self.units {
            if rng.gen::<f64>() >= self.ratio {
                self.bits[i / 8] |= 1 << (i % 8);
            }
        }
    }

    #[inline]
    pub fn unit_active(&self, i: usize) -> bool {
        row_active(Some(&self.bits), i)
    }

    pub fn bits(&self) -> &[u8] {
        &self.bits
    }

    pub fn active_count(&self) -> usize {
        (0..self.units).filter(|&i| self.unit_active(i)).count()
    }

    /// Input dropout: regenerates the mask and zeroes the dropped activations.
    pub fn randomly_sparsify_activation(&mut self, a: &mut DenseVector, seed: u64) {
        if self.ratio == 0.0 {
            return;
        }
        self.fill_bytes(seed);
        for i in 0..a.size() {
            if !self.unit_active(i) {
                a.set(i, 0.0);
            }
        }
    }
}

/// Inference-time replacement for the mask: expected value over sub-networks.
pub fn scale_for_inference(a: &mut DenseVector, ratio: f64) {
    a.scale((1.0 - ratio) as f32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_mask() {
        let mut a = Dropout::new(100, 0.3);
        let mut b = Dropout::new(100, 0.3);
        a.fill_bytes(42);
        b.fill_bytes(42);
        assert_eq!(a.bits(), b.bits());
        let first = a.bits().to_vec();
        a.fill_bytes(43);
        assert_ne!(a.bits(), &first[..]);
        a.fill_bytes(42);
        assert_eq!(a.bits(), &first[..]);
    }

    #[test]
    fn test_zero_ratio_keeps_everything() {
        let mut d = Dropout::new(37, 0.0);
        d.fill_bytes(7);
        assert_eq!(d.active_count(), 37);
    }

    #[test]
    fn test_half_ratio_keeps_about_half() {
        let mut d = Dropout::new(4000, 0.5);
        d.fill_bytes(11);
        let kept = d.active_count();
        assert!(kept > 1800 && kept < 2200, "kept {}", kept);
    }

    #[test]
    fn test_ratio_respected() {
        let mut d = Dropout::new(10_000, 0.2);
        d.fill_bytes(3);
        let kept = d.active_count() as f64 / 10_000.0;
        assert!((kept - 0.8).abs() < 0.03, "kept fraction {}", kept);
    }

    #[test]
    fn test_layer_seeds_differ() {
        let s1 = layer_seed(5, 1234, TANH_SALT, 1);
        let s2 = layer_seed(5, 1234, TANH_SALT, 2);
        let s3 = layer_seed(6, 1234, TANH_SALT, 1);
        assert_ne!(s1, s2);
        assert_ne!(s1, s3);
    }

    #[test]
    fn test_sparsify_zeroes_dropped_units() {
        let mut d = Dropout::new(64, 0.5);
        let mut a = DenseVector::from_vec(vec![1.0; 64]);
        d.randomly_sparsify_activation(&mut a, 99);
        for i in 0..64 {
            assert_eq!(a.get(i) == 1.0, d.unit_active(i));
        }
    }

    #[test]
    fn test_inference_scaling() {
        let mut a = DenseVector::from_vec(vec![2.0, -4.0]);
        scale_for_inference(&mut a, 0.25);
        assert_eq!(a.raw(), &[1.5, -3.0]);
    }
}
