use log::{debug, trace};

use crate::config::Parameters;
use crate::core::activations::{maxout_forward, LayerKind};
use crate::core::dropout::{self, layer_seed, scale_for_inference, Dropout};
use crate::core::gemv::gemv;
use crate::core::input::{encode_row, InputLayout, InputRow};
use crate::core::losses::{autoencoder_error, classification_error, regression_error};
use crate::core::optimizers::{rescale_row, Schedule, UpdateRule};
use crate::core::storage::{
    DenseColMatrix, DenseRowMatrix, DenseVector, Matrix, MatrixStorage, SparseVector, Vector,
    VectorStorage,
};
use crate::error::{unimplemented_combination, NNError, Result};
use crate::store::{LayerParams, WeightStore};

#[derive(Debug, Clone)]
pub struct Layer {
    pub kind: LayerKind,
    pub index: usize,
    pub units: usize,
    pub a: Vector,
    /// dE/dy of hidden units, accumulated by the layer above during bprop.
    pub e: Option<DenseVector>,
    dropout: Option<Dropout>,
    /// Dropout ratio of a decorated hidden layer, applied as a scale at inference.
    inference_ratio: Option<f64>,
    schedule: Schedule,
    shortcut: bool,
    params: Parameters,
    layout: Option<InputLayout>,
}

impl Layer {
    /// Binds layer `index` of the model in `store`.
    ///
    /// Hidden layers become dropout-decorated when the parameters carry
    /// hidden dropout ratios. The mask itself only exists when `training`.
    pub fn init(
        index: usize,
        kind: LayerKind,
        params: &Parameters,
        store: &WeightStore,
        training: bool,
    ) -> Result<Self> {
        if params.adaptive_rate && !(params.rho > 0.0 && params.epsilon > 0.0) {
            return Err(NNError::InvalidConfiguration(format!(
                "ADADELTA needs rho > 0 and epsilon > 0, got {} and {}",
                params.rho, params.epsilon
            )));
        }
        let units = *store.units().get(index).ok_or_else(|| {
            NNError::LayerShapeMismatch(format!(
                "layer {} does not exist in a network of {} layers",
                index,
                store.units().len()
            ))
        })?;
        let last = store.units().len() - 1;
        if (kind == LayerKind::Input) != (index == 0) || (kind.is_output_only() && index != last) {
            return Err(NNError::InvalidConfiguration(format!(
                "{} cannot be layer {} of {}",
                kind.name(),
                index,
                last + 1
            )));
        }
        let hidden = kind != LayerKind::Input && !kind.is_output_only();

        let (dropout, inference_ratio) = match kind {
            LayerKind::Input => (
                training.then(|| Dropout::new(units, params.input_dropout_ratio)),
                None,
            ),
            _ if hidden && index < last && params.has_dropout() => {
                let ratio = params.hidden_dropout_ratio(index - 1);
                (training.then(|| Dropout::new(units, ratio)), Some(ratio))
            }
            _ => (None, None),
        };

        let shortcut = params.fast_mode
            || (!params.adaptive_rate && !params.has_momenta() && params.l1 == 0.0 && params.l2 == 0.0);

        debug!(
            "init layer {}: {}{} with {} units, training: {}",
            index,
            kind.name(),
            if inference_ratio.is_some() { "Dropout" } else { "" },
            units,
            training
        );
        Ok(Self {
            kind,
            index,
            units,
            a: Vector::Dense(DenseVector::zeros(units)),
            e: hidden.then(|| DenseVector::zeros(units)),
            dropout,
            inference_ratio,
            schedule: Schedule::new(params, index),
            shortcut,
            params: params.clone(),
            layout: (kind == LayerKind::Input).then(|| store.layout()),
        })
    }

    pub fn dropout(&self) -> Option<&Dropout> {
        self.dropout.as_ref()
    }

    pub fn rate(&self, n: f64) -> f32 {
        self.schedule.rate(n)
    }

    pub fn momentum(&self, n: f64) -> f32 {
        self.schedule.momentum(n)
    }

    pub fn reset_error(&mut self) {
        if let Some(e) = self.e.as_mut() {
            e.fill(0.0);
        }
    }

    /// Loads one encoded row into the input layer.
    ///
    /// When training, input dropout zeroes units and `sparse` turns the
    /// activation into a sparse vector.
    pub fn set_input(&mut self, seed: u64, row: &InputRow, training: bool) -> Result<()> {
        let layout = self.layout.ok_or_else(|| {
            NNError::NotImplemented(format!("set_input for {} layer", self.kind.name()))
        })?;
        let mut a = match std::mem::replace(&mut self.a, Vector::Sparse(SparseVector::new(0))) {
            Vector::Dense(a) => a,
            Vector::Sparse(_) => DenseVector::zeros(self.units),
        };
        if let Err(err) = encode_row(&mut a, &layout, &self.params, row) {
            self.a = Vector::Dense(a);
            return Err(err);
        }
        if training {
            if let Some(mask) = self.dropout.as_mut() {
                let seed = layer_seed(seed, self.params.seed, dropout::INPUT_SALT, 0);
                mask.randomly_sparsify_activation(&mut a, seed);
                if self.params.sparse {
                    self.a = Vector::Sparse(SparseVector::from_dense(&a));
                    return Ok(());
                }
            }
        }
        self.a = Vector::Dense(a);
        Ok(())
    }

    fn check_connection(&self, p: &LayerParams, prev: &Layer) -> Result<()> {
        if p.w.rows() != self.units || p.w.cols() != prev.units || prev.a.size() != prev.units {
            return Err(NNError::LayerShapeMismatch(format!(
                "layer {} has {}x{} weights for {} units fed by {} activations",
                self.index,
                p.w.rows(),
                p.w.cols(),
                self.units,
                prev.a.size()
            )));
        }
        Ok(())
    }

    pub fn fprop(&mut self, prev: &Layer, store: &WeightStore, seed: u64, training: bool) -> Result<()> {
        if self.kind == LayerKind::Input {
            return Err(NNError::NotImplemented("fprop for Input layer".to_string()));
        }
        let p = store.layer(self.index)?;
        self.check_connection(p, prev)?;

        if training {
            if let (Some(mask), Some(salt)) = (self.dropout.as_mut(), self.kind.dropout_salt()) {
                mask.fill_bytes(layer_seed(seed, self.params.seed, salt, self.index));
            }
        }
        let mask = if training { self.dropout.as_ref() } else { None };
        let Vector::Dense(a) = &mut self.a else {
            return Err(NNError::NotImplemented(format!(
                "fprop into sparse activations of {} layer",
                self.kind.name()
            )));
        };

        match self.kind {
            LayerKind::Maxout => maxout_forward(a, &p.w, &prev.a, &p.b, mask),
            kind => {
                gemv(a, &p.w, &prev.a, &p.b, mask.map(Dropout::bits))?;
                if let Err(err) = kind.activate(a) {
                    store.mark_unstable();
                    return Err(err);
                }
            }
        }
        if !training {
            if let Some(ratio) = self.inference_ratio {
                scale_for_inference(a, ratio);
            }
        }
        // sparsity statistics follow inference passes too
        if let Some(avg_a) = &p.avg_a {
            for row in 0..a.size() {
                avg_a.set(row, 0.999 * avg_a.get(row) + 0.001 * a.get(row));
            }
        }
        trace!("fprop layer {} ({})", self.index, self.kind.name());
        Ok(())
    }

    fn update_rule(&self, store: &WeightStore, p: &LayerParams) -> UpdateRule {
        let n = store.processed() as f64;
        let m = self.momentum(n);
        let r = if self.params.adaptive_rate {
            0.0
        } else {
            self.rate(n) * (1.0 - m)
        };
        let rule = UpdateRule::new(&self.params, r, m);
        if p.avg_a.is_some() {
            rule.with_sparsity(
                self.params.sparsity_beta as f32,
                self.params.average_activation as f32,
            )
        } else {
            rule
        }
    }

    fn unit_grad(&self, row: usize) -> f32 {
        if self.dropout.as_ref().is_some_and(|d| !d.unit_active(row)) {
            return 0.0;
        }
        let e = self.e.as_ref().map_or(0.0, |e| e.get(row));
        self.kind.partial_grad(e, self.a.get(row))
    }

    /// Backward pass of a hidden layer whose error `e` is already filled in.
    pub fn bprop(&mut self, prev: &mut Layer, store: &WeightStore) -> Result<()> {
        if self.e.is_none() {
            return Err(NNError::NotImplemented(format!(
                "bprop without a target for {} layer",
                self.kind.name()
            )));
        }
        let p = store.layer(self.index)?;
        self.check_connection(p, prev)?;
        let rule = self.update_rule(store, p);
        match &p.w {
            Matrix::DenseRow(_) => {
                for row in 0..self.units {
                    let g = self.unit_grad(row);
                    self.bprop_row(row, g, &rule, p, prev, store)?;
                }
                Ok(())
            }
            _ => self.bprop_sparse(&rule, p, prev, store),
        }
    }

    pub fn bprop_classification(&mut self, prev: &mut Layer, store: &WeightStore, target: usize) -> Result<()> {
        if self.kind != LayerKind::Softmax {
            return Err(NNError::NotImplemented(format!(
                "classification bprop for {} layer",
                self.kind.name()
            )));
        }
        if target >= self.units {
            return Err(NNError::InvalidTarget(format!(
                "class {} out of range for {} outputs",
                target, self.units
            )));
        }
        let p = store.layer(self.index)?;
        self.check_connection(p, prev)?;
        let rule = self.update_rule(store, p);
        for row in 0..self.units {
            let t = if row == target { 1.0 } else { 0.0 };
            let g = classification_error(self.params.loss, t, self.a.get(row))?;
            self.bprop_row(row, g, &rule, p, prev, store)?;
        }
        Ok(())
    }

    pub fn bprop_regression(&mut self, prev: &mut Layer, store: &WeightStore, target: f32) -> Result<()> {
        if self.kind != LayerKind::Linear {
            return Err(NNError::NotImplemented(format!(
                "regression bprop for {} layer",
                self.kind.name()
            )));
        }
        if target.is_nan() {
            return Err(NNError::InvalidTarget("missing regression target".to_string()));
        }
        let p = store.layer(self.index)?;
        self.check_connection(p, prev)?;
        let rule = self.update_rule(store, p);
        let g = regression_error(self.params.loss, target, self.a.get(0))?;
        self.bprop_row(0, g, &rule, p, prev, store)
    }

    /// Fills `e` with the reconstruction error against the input activations.
    pub fn set_autoencoder_error(&mut self, input: &Vector) -> Result<()> {
        let Some(e) = self.e.as_mut() else {
            return Err(NNError::NotImplemented(format!(
                "autoencoder error for {} layer",
                self.kind.name()
            )));
        };
        if input.size() != e.size() {
            return Err(NNError::LayerShapeMismatch(format!(
                "reconstructing {} inputs with {} outputs",
                input.size(),
                e.size()
            )));
        }
        for row in 0..e.size() {
            e.set(row, autoencoder_error(self.params.loss, input.get(row), self.a.get(row))?);
        }
        Ok(())
    }

    fn bprop_row(
        &self,
        row: usize,
        g: f32,
        rule: &UpdateRule,
        p: &LayerParams,
        prev: &mut Layer,
        store: &WeightStore,
    ) -> Result<()> {
        if self.shortcut && g == 0.0 {
            return Ok(());
        }
        let Layer { a: prev_a, e: prev_e, .. } = prev;
        let stable = match (&p.w, &*prev_a) {
            (Matrix::DenseRow(w), Vector::Dense(x)) => {
                bprop_dense_row_dense(w, p, rule, x, prev_e.as_mut(), row, g, self.params.fast_mode)?
            }
            (Matrix::DenseRow(w), Vector::Sparse(x)) => {
                bprop_dense_row_sparse(w, p, rule, x, prev_e.as_mut(), row, g)?
            }
            (w, x) => return Err(unimplemented_combination("bprop", w.kind(), x.kind())),
        };
        if !stable {
            store.mark_unstable();
        }
        Ok(())
    }

    /// Column-major weights fed by a sparse activation: walks the non-zero
    /// inputs and touches every unit for each of them.
    fn bprop_sparse(&self, rule: &UpdateRule, p: &LayerParams, prev: &mut Layer, store: &WeightStore) -> Result<()> {
        let Layer { a: prev_a, e: prev_e, .. } = prev;
        let (w, x) = match (&p.w, &*prev_a) {
            (Matrix::DenseCol(w), Vector::Sparse(x)) => (w, x),
            (w, x) => return Err(unimplemented_combination("bprop", w.kind(), x.kind())),
        };
        if p.w_ea.is_some() {
            return Err(NNError::NotImplemented(
                "elastic averaging for sparse input with column-major weights".to_string(),
            ));
        }
        let stable = bprop_dense_col_sparse(self, w, p, rule, x, prev_e.as_mut());
        for row in 0..self.units {
            rescale_row(&p.w, row, rule.max_w2)?;
        }
        if !stable {
            store.mark_unstable();
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn bprop_dense_row_dense(
    w: &DenseRowMatrix,
    p: &LayerParams,
    rule: &UpdateRule,
    prev_a: &DenseVector,
    mut prev_e: Option<&mut DenseVector>,
    row: usize,
    g: f32,
    fast_mode: bool,
) -> Result<bool> {
    let cols = prev_a.size();
    let mut avg_grad2 = 0.0;
    for (col, cell) in w.row(row).iter().enumerate() {
        let weight = cell.get();
        if let Some(e) = prev_e.as_deref_mut() {
            e.add(col, g * weight);
        }
        let previous_a = prev_a.get(col);
        if fast_mode && previous_a == 0.0 {
            continue;
        }
        let idx = w.index(row, col);
        let grad = rule.gradient(g, previous_a, weight, p.reference_weight(idx));
        avg_grad2 += grad * grad;
        rule.update_weight(cell, p.momentum_cell(idx), p.ada_cells(idx), grad);
    }
    rescale_row(&p.w, row, rule.max_w2)?;
    if rule.adaptive.is_some() && cols > 0 {
        avg_grad2 /= cols as f32;
    }
    Ok(rule.update_bias(p, row, g, avg_grad2))
}

fn bprop_dense_row_sparse(
    w: &DenseRowMatrix,
    p: &LayerParams,
    rule: &UpdateRule,
    prev_a: &SparseVector,
    mut prev_e: Option<&mut DenseVector>,
    row: usize,
    g: f32,
) -> Result<bool> {
    if p.w_ea.is_some() {
        return Err(NNError::NotImplemented(
            "elastic averaging for sparse input".to_string(),
        ));
    }
    let mut avg_grad2 = 0.0;
    for (col, previous_a) in prev_a.iter() {
        let idx = w.index(row, col);
        let cell = &w.raw()[idx];
        let weight = cell.get();
        if let Some(e) = prev_e.as_deref_mut() {
            e.add(col, g * weight);
        }
        let grad = rule.gradient(g, previous_a, weight, None);
        avg_grad2 += grad * grad;
        rule.update_weight(cell, p.momentum_cell(idx), p.ada_cells(idx), grad);
    }
    rescale_row(&p.w, row, rule.max_w2)?;
    if rule.adaptive.is_some() && prev_a.nnz() > 0 {
        avg_grad2 /= prev_a.nnz() as f32;
    }
    Ok(rule.update_bias(p, row, g, avg_grad2))
}

/// The bias of a unit is updated once per non-zero input, each time with
/// `1/cols` of the gradient.
fn bprop_dense_col_sparse(
    layer: &Layer,
    w: &DenseColMatrix,
    p: &LayerParams,
    rule: &UpdateRule,
    prev_a: &SparseVector,
    mut prev_e: Option<&mut DenseVector>,
) -> bool {
    let cols = prev_a.size() as f32;
    let mut stable = true;
    for (col, previous_a) in prev_a.iter() {
        for (row, cell) in w.col(col).iter().enumerate() {
            let g = layer.unit_grad(row);
            let weight = cell.get();
            if let Some(e) = prev_e.as_deref_mut() {
                e.add(col, g * weight);
            }
            if layer.shortcut && g == 0.0 {
                continue;
            }
            let idx = w.index(row, col);
            let grad = rule.gradient(g, previous_a, weight, None);
            rule.update_weight(cell, p.momentum_cell(idx), p.ada_cells(idx), grad);
            stable &= rule.update_bias(p, row, g / cols, grad * grad / cols);
        }
    }
    stable
}
