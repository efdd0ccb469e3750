use crate::config::Parameters;
use crate::core::storage::{Matrix, MatrixStorage, VectorStorage, Wild};
use crate::error::{NNError, Result};
use crate::store::LayerParams;

/// Zero stays zero, unlike `f32::signum`.
#[inline]
fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone)]
pub struct Schedule {
    rate: f64,
    rate_annealing: f64,
    momentum_start: f64,
    momentum_ramp: f64,
    momentum_stable: f64,
}

impl Schedule {
    pub fn new(params: &Parameters, layer: usize) -> Self {
        let decay = params.rate_decay.powi(layer.saturating_sub(1) as i32);
        Self {
            rate: params.rate * decay,
            rate_annealing: params.rate_annealing,
            momentum_start: params.momentum_start,
            momentum_ramp: params.momentum_ramp,
            momentum_stable: params.momentum_stable,
        }
    }

    pub fn rate(&self, n: f64) -> f32 {
        (self.rate / (1.0 + self.rate_annealing * n)) as f32
    }

    /// Momentum after `n` training samples: a linear ramp from the start
    /// value to the stable value over `momentum_ramp` samples.
    pub fn momentum(&self, n: f64) -> f32 {
        let mut m = self.momentum_start;
        if self.momentum_ramp > 0.0 {
            if n >= self.momentum_ramp {
                m = self.momentum_stable;
            } else {
                m += (self.momentum_stable - self.momentum_start) * n / self.momentum_ramp;
            }
        }
        m as f32
    }
}

/// ADADELTA step size for one parameter.
///
/// `dx2` holds E[Δ²] and `g2` holds E[g²]. E[g²] is refreshed before the
/// rate is computed, E[Δ²] after.
pub fn ada_delta_rate(grad2: f32, dx2: &Wild, g2: &Wild, rho: f32, eps: f32) -> f32 {
    g2.set(rho * g2.get() + (1.0 - rho) * grad2);
    let rate = ((dx2.get() + eps) / (g2.get() + eps)).sqrt();
    dx2.set(rho * dx2.get() + (1.0 - rho) * rate * rate * grad2);
    rate
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateRule {
    /// Step rate for non-adaptive updates, already scaled by `1 - momentum`.
    pub rate: f32,
    pub momentum: f32,
    pub l1: f32,
    pub l2: f32,
    pub nesterov: bool,
    /// `(rho, epsilon)` when ADADELTA is on.
    pub adaptive: Option<(f32, f32)>,
    pub elastic: f32,
    pub max_w2: f32,
    /// `(beta, target activation)` for the autoencoder sparsity penalty.
    pub sparsity: Option<(f32, f32)>,
}

impl UpdateRule {
    pub fn new(params: &Parameters, rate: f32, momentum: f32) -> Self {
        Self {
            rate,
            momentum,
            l1: params.l1 as f32,
            l2: params.l2 as f32,
            nesterov: params.nesterov_accelerated_gradient,
            adaptive: params
                .adaptive_rate
                .then_some((params.rho as f32, params.epsilon as f32)),
            elastic: params.elastic_averaging_regularization as f32,
            max_w2: params.max_w2,
            sparsity: None,
        }
    }

    pub fn with_sparsity(mut self, beta: f32, target: f32) -> Self {
        self.sparsity = Some((beta, target));
        self
    }

    /// dE/dw with the L1/L2 penalties, pulled towards `reference` under elastic averaging.
    #[inline]
    pub fn gradient(&self, partial_grad: f32, previous_a: f32, weight: f32, reference: Option<f32>) -> f32 {
        let mut grad = partial_grad * previous_a - sign(weight) * self.l1 - weight * self.l2;
        if let Some(reference) = reference {
            grad -= self.elastic * (weight - reference);
        }
        grad
    }

    #[inline]
    pub fn update_weight(&self, w: &Wild, velocity: Option<&Wild>, ada: Option<(&Wild, &Wild)>, grad: f32) {
        match (self.adaptive, ada) {
            (Some((rho, eps)), Some((dx2, g2))) => {
                let rate = ada_delta_rate(grad * grad, dx2, g2, rho, eps);
                w.add(rate * grad);
            }
            _ => self.step(w, velocity, grad, self.rate),
        }
    }

    fn step(&self, cell: &Wild, velocity: Option<&Wild>, grad: f32, rate: f32) {
        if !self.nesterov {
            let delta = rate * grad;
            cell.add(delta);
            if let Some(v) = velocity {
                cell.add(self.momentum * v.get());
                v.set(delta);
            }
        } else {
            let mut d = grad;
            if let Some(v) = velocity {
                d += v.get() * self.momentum;
                v.set(d);
            }
            cell.add(rate * d);
        }
    }

    /// Updates the bias of `row` after its incoming weights.
    ///
    /// `avg_grad2` is the mean squared weight gradient of the row, used as the
    /// bias gradient estimate by ADADELTA. Returns `false` once the bias has
    /// become infinite.
    pub fn update_bias(&self, p: &LayerParams, row: usize, mut partial_grad: f32, avg_grad2: f32) -> bool {
        let bias = p.b.get(row);
        partial_grad -= sign(bias) * self.l1 + bias * self.l2;
        if let Some(b_ea) = &p.b_ea {
            partial_grad -= (bias - b_ea.get(row)) * self.elastic;
        }

        let mut rate = self.rate;
        if let (Some((rho, eps)), Some((dx2, g2))) = (self.adaptive, p.bias_ada_cells(row)) {
            rate = ada_delta_rate(avg_grad2, dx2, g2, rho, eps);
        }
        self.step(&p.b.raw()[row], p.bias_momentum_cell(row), partial_grad, rate);

        if let (Some((beta, target)), Some(avg_a)) = (self.sparsity, &p.avg_a) {
            p.b.add(row, -(rate * beta * (avg_a.get(row) - target)));
        }
        !p.b.get(row).is_infinite()
    }
}

/// Max-norm: scales the incoming weights of `row` back onto the ball of
/// squared radius `max_w2`.
pub fn rescale_row(w: &Matrix, row: usize, max_w2: f32) -> Result<()> {
    if max_w2 == f32::INFINITY {
        return Ok(());
    }
    match w {
        Matrix::DenseRow(m) => {
            let cells = m.row(row);
            let r2: f32 = cells.iter().map(|c| c.get() * c.get()).sum();
            if r2 > max_w2 {
                let scale = (max_w2 / r2).sqrt();
                cells.iter().for_each(|c| c.mul(scale));
            }
        }
        Matrix::DenseCol(m) => {
            let raw = m.raw();
            let r2: f32 = (0..m.cols()).map(|c| m.get(row, c) * m.get(row, c)).sum();
            if r2 > max_w2 {
                let scale = (max_w2 / r2).sqrt();
                (0..m.cols()).for_each(|c| raw[m.index(row, c)].mul(scale));
            }
        }
        other => {
            return Err(NNError::NotImplemented(format!(
                "rescale weights for {}",
                other.kind()
            )))
        }
    }
    Ok(())
}
