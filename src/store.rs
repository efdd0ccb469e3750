use log::{debug, warn};
use ndarray::{Array1, Array2};
use ndarray_rand::rand_distr::{Normal, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::config::{InitialWeightDistribution, Parameters};
use crate::core::input::InputLayout;
use crate::core::storage::{
    DenseColMatrix, DenseRowMatrix, Matrix, MatrixStorage, SharedVector, VectorStorage, Wild,
};
use crate::error::{NNError, Result};
use crate::rand_array;

/// Incoming connections of one layer and their optimizer state.
///
/// Per-weight buffers (`wm`, `ada_dx_g`, `w_ea`) follow the storage order of
/// `w`; ADADELTA keeps two floats per parameter, E[Δ²] then E[g²].
#[derive(Debug)]
pub struct LayerParams {
    pub w: Matrix,
    pub b: SharedVector,
    pub wm: Option<SharedVector>,
    pub bm: Option<SharedVector>,
    pub ada_dx_g: Option<SharedVector>,
    pub bias_ada_dx_g: Option<SharedVector>,
    pub w_ea: Option<SharedVector>,
    pub b_ea: Option<SharedVector>,
    /// Rolling average activation, sparsity-constrained autoencoders only.
    pub avg_a: Option<SharedVector>,
}

impl LayerParams {
    pub fn new(w: Matrix, b: SharedVector) -> Self {
        Self {
            w,
            b,
            wm: None,
            bm: None,
            ada_dx_g: None,
            bias_ada_dx_g: None,
            w_ea: None,
            b_ea: None,
            avg_a: None,
        }
    }

    #[inline]
    pub fn momentum_cell(&self, idx: usize) -> Option<&Wild> {
        self.wm.as_ref().map(|wm| &wm.raw()[idx])
    }

    #[inline]
    pub fn ada_cells(&self, idx: usize) -> Option<(&Wild, &Wild)> {
        self.ada_dx_g
            .as_ref()
            .map(|acc| (&acc.raw()[2 * idx], &acc.raw()[2 * idx + 1]))
    }

    #[inline]
    pub fn reference_weight(&self, idx: usize) -> Option<f32> {
        self.w_ea.as_ref().map(|w_ea| w_ea.get(idx))
    }

    #[inline]
    pub fn bias_momentum_cell(&self, row: usize) -> Option<&Wild> {
        self.bm.as_ref().map(|bm| &bm.raw()[row])
    }

    #[inline]
    pub fn bias_ada_cells(&self, row: usize) -> Option<(&Wild, &Wild)> {
        self.bias_ada_dx_g
            .as_ref()
            .map(|acc| (&acc.raw()[2 * row], &acc.raw()[2 * row + 1]))
    }

    fn weight_cells(&self) -> Result<&[Wild]> {
        self.w.dense_raw().ok_or_else(|| {
            NNError::NotImplemented(format!("weight store for {}", self.w.kind()))
        })
    }
}

#[derive(Debug)]
pub struct WeightStore {
    params: Parameters,
    layout: InputLayout,
    classes: Option<usize>,
    units: Vec<usize>,
    layers: Vec<LayerParams>,
    unstable: AtomicBool,
    processed: AtomicU64,
}

impl WeightStore {
    /// Allocates and initialises a model.
    ///
    /// `classes` is the number of softmax outputs for classification and
    /// `None` for regression or autoencoders.
    pub fn new(params: &Parameters, layout: InputLayout, classes: Option<usize>) -> Result<Self> {
        params.validate()?;
        let input = layout.units(params);
        if input == 0 {
            return Err(NNError::InvalidInputShape("input layer has no units".to_string()));
        }
        let output = match (params.autoencoder, classes) {
            (true, None) => input,
            (true, Some(_)) => {
                return Err(NNError::InvalidConfiguration(
                    "autoencoder does not take classes".to_string(),
                ))
            }
            (false, Some(k)) if k < 2 => {
                return Err(NNError::InvalidConfiguration(format!(
                    "classification needs at least 2 classes, got {}",
                    k
                )))
            }
            (false, Some(k)) => k,
            (false, None) => 1,
        };

        let mut units = vec![input];
        units.extend(params.hidden.iter().copied());
        units.push(output);

        let layers = (1..units.len())
            .map(|i| Self::init_layer(params, &units, i))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "weight store for units {:?}, momenta: {}, adadelta: {}",
            units,
            params.has_momenta(),
            params.adaptive_rate
        );
        Ok(Self {
            params: params.clone(),
            layout,
            classes,
            units,
            layers,
            unstable: AtomicBool::new(false),
            processed: AtomicU64::new(0),
        })
    }

    fn init_layer(params: &Parameters, units: &[usize], i: usize) -> Result<LayerParams> {
        let (rows, cols) = (units[i], units[i - 1]);
        let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(i as u64));
        let init = match params.initial_weight_distribution {
            InitialWeightDistribution::UniformAdaptive => {
                let range = (6.0 / (cols + rows) as f32).sqrt();
                rand_array!(&mut rng, Uniform::new(-range, range); rows, cols)
            }
            InitialWeightDistribution::Uniform(scale) => {
                rand_array!(&mut rng, Uniform::new(-scale, scale); rows, cols)
            }
            InitialWeightDistribution::Normal(sd) => {
                let normal = Normal::new(0.0f32, sd)
                    .map_err(|e| NNError::InvalidConfiguration(format!("normal init: {}", e)))?;
                rand_array!(&mut rng, normal; rows, cols)
            }
        };

        let w = if i == 1 && params.col_major {
            Matrix::DenseCol(DenseColMatrix::from_array(&init))
        } else {
            Matrix::DenseRow(DenseRowMatrix::from_array(&init))
        };
        let mut p = LayerParams::new(w, SharedVector::zeros(rows));
        let n = rows * cols;
        if params.has_momenta() {
            p.wm = Some(SharedVector::zeros(n));
            p.bm = Some(SharedVector::zeros(rows));
        }
        if params.adaptive_rate {
            p.ada_dx_g = Some(SharedVector::zeros(2 * n));
            p.bias_ada_dx_g = Some(SharedVector::zeros(2 * rows));
        }
        if params.elastic_averaging {
            let w: Vec<f32> = p.weight_cells()?.iter().map(Wild::get).collect();
            p.w_ea = Some(SharedVector::from_slice(&w));
            p.b_ea = Some(SharedVector::from_slice(&p.b.to_vec()));
        }
        let hidden = i < units.len() - 1;
        if hidden && params.autoencoder && params.sparsity_beta > 0.0 {
            p.avg_a = Some(SharedVector::zeros(rows));
        }
        Ok(p)
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn layout(&self) -> InputLayout {
        self.layout
    }

    pub fn classes(&self) -> Option<usize> {
        self.classes
    }

    pub fn units(&self) -> &[usize] {
        &self.units
    }

    /// Incoming connections of layer `index` (1 = first hidden layer).
    pub fn layer(&self, index: usize) -> Result<&LayerParams> {
        index
            .checked_sub(1)
            .and_then(|i| self.layers.get(i))
            .ok_or_else(|| {
                NNError::LayerShapeMismatch(format!(
                    "no weights for layer {} in a network of {} layers",
                    index,
                    self.units.len()
                ))
            })
    }

    pub fn has_momenta(&self) -> bool {
        self.params.has_momenta()
    }

    pub fn ada_delta(&self) -> bool {
        self.params.adaptive_rate
    }

    /// Overwrites the weights of layer `index` with a `units[index] x units[index-1]` array.
    pub fn set_weights(&self, index: usize, w: &Array2<f32>) -> Result<()> {
        let p = self.layer(index)?;
        if w.dim() != (p.w.rows(), p.w.cols()) {
            return Err(NNError::LayerShapeMismatch(format!(
                "expected {}x{} weights for layer {}, got {:?}",
                p.w.rows(),
                p.w.cols(),
                index,
                w.dim()
            )));
        }
        let cells = p.weight_cells()?;
        for ((r, c), &v) in w.indexed_iter() {
            if let Some(idx) = p.w.dense_index(r, c) {
                cells[idx].set(v);
            }
        }
        Ok(())
    }

    pub fn set_biases(&self, index: usize, b: &[f32]) -> Result<()> {
        let p = self.layer(index)?;
        if b.len() != p.b.size() {
            return Err(NNError::LayerShapeMismatch(format!(
                "expected {} biases for layer {}, got {}",
                p.b.size(),
                index,
                b.len()
            )));
        }
        b.iter().enumerate().for_each(|(i, &v)| p.b.set(i, v));
        Ok(())
    }

    pub fn snapshot_weights(&self, index: usize) -> Result<Array2<f32>> {
        Ok(self.layer(index)?.w.to_array())
    }

    pub fn snapshot_biases(&self, index: usize) -> Result<Array1<f32>> {
        Ok(Array1::from(self.layer(index)?.b.to_vec()))
    }

    /// Copies the current weights and biases of layer `index` into its
    /// elastic-averaging reference.
    pub fn sync_elastic_average(&self, index: usize) -> Result<()> {
        let p = self.layer(index)?;
        let (Some(w_ea), Some(b_ea)) = (&p.w_ea, &p.b_ea) else {
            return Err(NNError::InvalidConfiguration(
                "elastic averaging is not enabled".to_string(),
            ));
        };
        for (dst, src) in w_ea.raw().iter().zip(p.weight_cells()?) {
            dst.set(src.get());
        }
        b_ea.copy_from(&p.b);
        Ok(())
    }

    pub fn mark_unstable(&self) {
        if !self.unstable.swap(true, Ordering::Relaxed) {
            warn!("model marked unstable after {} rows", self.processed());
        }
    }

    pub fn is_unstable(&self) -> bool {
        self.unstable.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn add_processed(&self, n: u64) {
        self.processed.fetch_add(n, Ordering::Relaxed);
    }
}
