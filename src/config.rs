//! Training configuration consumed by the neuron layers.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{NNError, Result};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Tanh,
    Rectifier,
    Maxout,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loss {
    MeanSquare,
    Absolute,
    CrossEntropy,
    Huber,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoricalReduction {
    HashTrick,
    RandomProjection,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum InitialWeightDistribution {
    /// Uniform in ±sqrt(6 / (fan_in + fan_out)).
    UniformAdaptive,
    Uniform(f32),
    Normal(f32),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Parameters {
    pub hidden: Vec<usize>,
    pub activation: Activation,

    pub rate: f64,
    pub rate_annealing: f64,
    pub rate_decay: f64,
    pub momentum_start: f64,
    pub momentum_ramp: f64,
    pub momentum_stable: f64,
    pub nesterov_accelerated_gradient: bool,

    /// ADADELTA
    pub adaptive_rate: bool,
    pub rho: f64,
    pub epsilon: f64,

    pub l1: f64,
    pub l2: f64,
    /// Maximum squared L2 norm of the incoming weights of a unit.
    #[serde(default = "unbounded")]
    pub max_w2: f32,

    pub input_dropout_ratio: f64,
    /// `Some` turns every hidden layer into its dropout-decorated variant.
    pub hidden_dropout_ratios: Option<Vec<f64>>,

    pub loss: Loss,

    pub autoencoder: bool,
    pub sparsity_beta: f64,
    pub average_activation: f64,

    pub elastic_averaging: bool,
    pub elastic_averaging_regularization: f64,

    pub fast_mode: bool,
    pub max_categorical_features: usize,
    pub categorical_reduction: CategoricalReduction,
    pub sparse: bool,
    pub col_major: bool,

    pub initial_weight_distribution: InitialWeightDistribution,
    pub seed: u64,
}

fn unbounded() -> f32 {
    f32::INFINITY
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            hidden: vec![200, 200],
            activation: Activation::Rectifier,
            rate: 0.005,
            rate_annealing: 1e-6,
            rate_decay: 1.0,
            momentum_start: 0.0,
            momentum_ramp: 1e6,
            momentum_stable: 0.0,
            nesterov_accelerated_gradient: true,
            adaptive_rate: true,
            rho: 0.99,
            epsilon: 1e-8,
            l1: 0.0,
            l2: 0.0,
            max_w2: f32::INFINITY,
            input_dropout_ratio: 0.0,
            hidden_dropout_ratios: None,
            loss: Loss::CrossEntropy,
            autoencoder: false,
            sparsity_beta: 0.0,
            average_activation: 0.0,
            elastic_averaging: false,
            elastic_averaging_regularization: 1e-3,
            fast_mode: false,
            max_categorical_features: usize::MAX,
            categorical_reduction: CategoricalReduction::HashTrick,
            sparse: false,
            col_major: false,
            initial_weight_distribution: InitialWeightDistribution::UniformAdaptive,
            seed: 0xDECAF,
        }
    }
}

impl Parameters {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let params: Parameters = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut buffer = String::new();
        File::open(path)?.read_to_string(&mut buffer)?;
        Self::from_json_str(&buffer)
    }

    /// Momentum buffers are only kept when momentum can be non-zero and ADADELTA is off.
    pub fn has_momenta(&self) -> bool {
        !self.adaptive_rate && (self.momentum_start != 0.0 || self.momentum_stable != 0.0)
    }

    pub fn has_dropout(&self) -> bool {
        self.hidden_dropout_ratios.is_some()
    }

    /// Dropout ratio of hidden layer `h` (0-based), 0 when not decorated.
    pub fn hidden_dropout_ratio(&self, h: usize) -> f64 {
        self.hidden_dropout_ratios
            .as_ref()
            .and_then(|r| r.get(h).copied())
            .unwrap_or(0.0)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(NNError::InvalidConfiguration(msg));

        if self.hidden.iter().any(|&h| h == 0) {
            return invalid(format!("hidden layer sizes must be positive, got {:?}", self.hidden));
        }
        if self.adaptive_rate {
            if !(self.rho > 0.0) {
                return invalid(format!("rho must be > 0 with adaptive rate, got {}", self.rho));
            }
            if !(self.epsilon > 0.0) {
                return invalid(format!("epsilon must be > 0 with adaptive rate, got {}", self.epsilon));
            }
        } else if self.rate < 0.0 {
            return invalid(format!("rate must be >= 0, got {}", self.rate));
        }
        if self.rate_annealing < 0.0 || self.rate_decay <= 0.0 {
            return invalid(format!(
                "rate_annealing must be >= 0 and rate_decay > 0, got {} and {}",
                self.rate_annealing, self.rate_decay
            ));
        }
        for m in [self.momentum_start, self.momentum_stable] {
            if !(0.0..1.0).contains(&m) {
                return invalid(format!("momentum must be in [0, 1), got {}", m));
            }
        }
        if self.momentum_ramp < 0.0 {
            return invalid(format!("momentum_ramp must be >= 0, got {}", self.momentum_ramp));
        }
        if self.l1 < 0.0 || self.l2 < 0.0 {
            return invalid(format!("l1 and l2 must be >= 0, got {} and {}", self.l1, self.l2));
        }
        if !(self.max_w2 > 0.0) {
            return invalid(format!("max_w2 must be > 0, got {}", self.max_w2));
        }
        if !(0.0..1.0).contains(&self.input_dropout_ratio) {
            return invalid(format!(
                "input_dropout_ratio must be in [0, 1), got {}",
                self.input_dropout_ratio
            ));
        }
        if let Some(ratios) = &self.hidden_dropout_ratios {
            if ratios.len() != self.hidden.len() {
                return invalid(format!(
                    "expected {} hidden dropout ratios, got {}",
                    self.hidden.len(),
                    ratios.len()
                ));
            }
            if let Some(r) = ratios.iter().find(|r| !(0.0..1.0).contains(*r)) {
                return invalid(format!("hidden dropout ratios must be in [0, 1), got {}", r));
            }
        }
        if self.sparsity_beta < 0.0 || (self.sparsity_beta > 0.0 && !self.autoencoder) {
            return invalid("sparsity_beta > 0 requires autoencoder".to_string());
        }
        if self.elastic_averaging && self.elastic_averaging_regularization < 0.0 {
            return invalid(format!(
                "elastic_averaging_regularization must be >= 0, got {}",
                self.elastic_averaging_regularization
            ));
        }
        if self.col_major && !self.sparse {
            return invalid("col_major requires sparse input".to_string());
        }
        if (self.col_major || self.autoencoder) && self.hidden.is_empty() {
            return invalid("col_major and autoencoder need at least one hidden layer".to_string());
        }
        match self.initial_weight_distribution {
            InitialWeightDistribution::Uniform(s) | InitialWeightDistribution::Normal(s)
                if !(s > 0.0 && s.is_finite()) =>
            {
                return invalid(format!("initial weight scale must be positive, got {}", s));
            }
            _ => (),
        }
        if self.max_categorical_features == 0 {
            return invalid("max_categorical_features must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let p = Parameters::default();
        assert!(p.validate().is_ok());
        assert!(!p.has_momenta());
        assert_eq!(p.max_w2, f32::INFINITY);
    }

    #[test]
    fn test_adadelta_requires_rho_and_epsilon() {
        let p = Parameters { rho: 0.0, ..Default::default() };
        assert!(matches!(p.validate(), Err(NNError::InvalidConfiguration(_))));
        let p = Parameters { epsilon: 0.0, ..Default::default() };
        assert!(matches!(p.validate(), Err(NNError::InvalidConfiguration(_))));
        let p = Parameters { rho: 0.0, adaptive_rate: false, ..Default::default() };
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_dropout_ratio_count_must_match() {
        let p = Parameters {
            hidden: vec![10, 10],
            hidden_dropout_ratios: Some(vec![0.5]),
            ..Default::default()
        };
        assert!(p.validate().is_err());
        let p = Parameters {
            hidden: vec![10, 10],
            hidden_dropout_ratios: Some(vec![0.5, 0.2]),
            ..Default::default()
        };
        assert!(p.validate().is_ok());
        assert_eq!(p.hidden_dropout_ratio(1), 0.2);
        assert_eq!(p.hidden_dropout_ratio(5), 0.0);
    }

    #[test]
    fn test_momenta_only_without_adadelta() {
        let p = Parameters {
            adaptive_rate: false,
            momentum_start: 0.5,
            ..Default::default()
        };
        assert!(p.has_momenta());
        let p = Parameters { momentum_start: 0.5, ..Default::default() };
        assert!(!p.has_momenta());
    }

    #[test]
    fn test_partial_json() {
        let p = Parameters::from_json_str(
            r#"{ "hidden": [3], "activation": "Tanh", "loss": "Huber", "l2": 0.001 }"#,
        )
        .unwrap();
        assert_eq!(p.hidden, vec![3]);
        assert_eq!(p.activation, Activation::Tanh);
        assert_eq!(p.loss, Loss::Huber);
        assert_eq!(p.max_w2, f32::INFINITY);
        assert_eq!(p.rho, 0.99);

        let err = Parameters::from_json_str(r#"{ "adaptive_rate": true, "rho": 0 }"#);
        assert!(matches!(err, Err(NNError::InvalidConfiguration(_))));
        let err = Parameters::from_json_str(r#"{ "loss": "Hinge" }"#);
        assert!(matches!(err, Err(NNError::SerializationError(_))));
    }

    #[test]
    fn test_init_scale_must_be_positive() {
        let p = Parameters {
            initial_weight_distribution: InitialWeightDistribution::Uniform(0.0),
            ..Default::default()
        };
        assert!(p.validate().is_err());
        let p = Parameters {
            initial_weight_distribution: InitialWeightDistribution::Normal(0.1),
            ..Default::default()
        };
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_col_major_needs_sparse() {
        let p = Parameters { col_major: true, ..Default::default() };
        assert!(p.validate().is_err());
        let p = Parameters { col_major: true, sparse: true, ..Default::default() };
        assert!(p.validate().is_ok());
    }
}
