use log::{debug, trace};
use rayon::prelude::*;

use crate::prelude::*;
use crate::core::losses::loss_value;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum Target {
    Class(usize),
    Value(f32),
    /// Autoencoders reconstruct their own input.
    Reconstruction,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub input: InputRow,
    pub target: Target,
}

impl TrainingRow {
    pub fn new(input: InputRow, target: Target) -> Self {
        Self { input, target }
    }
}

/// The layers of one worker, bound to a shared [`WeightStore`].
#[derive(Debug)]
pub struct Network<'a> {
    store: &'a WeightStore,
    layers: Vec<Layer>,
    training: bool,
}

impl<'a> Network<'a> {
    pub fn new(store: &'a WeightStore, training: bool) -> Result<Self> {
        let params = store.params();
        let last = store.units().len() - 1;
        let hidden = LayerKind::hidden(params.activation);
        let layers = (0..=last)
            .map(|i| {
                let kind = if i == 0 {
                    LayerKind::Input
                } else if i < last || params.autoencoder {
                    hidden
                } else if store.classes().is_some() {
                    LayerKind::Softmax
                } else {
                    LayerKind::Linear
                };
                Layer::init(i, kind, params, store, training)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { store, layers, training })
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn output(&self) -> &Layer {
        &self.layers[self.layers.len() - 1]
    }

    fn fprop(&mut self, seed: u64, row: &InputRow, training: bool) -> Result<()> {
        self.layers[0].set_input(seed, row, training)?;
        for i in 1..self.layers.len() {
            let (done, rest) = self.layers.split_at_mut(i);
            rest[0].fprop(&done[i - 1], self.store, seed, training)?;
        }
        Ok(())
    }

    pub fn train_row(&mut self, seed: u64, row: &InputRow, target: Target) -> Result<()> {
        if !self.training {
            return Err(NNError::InvalidConfiguration(
                "network was built for inference".to_string(),
            ));
        }
        let last = self.layers.len() - 1;
        match (self.layers[last].kind, target) {
            (LayerKind::Softmax, Target::Class(_)) | (LayerKind::Linear, Target::Value(_)) => (),
            (_, Target::Reconstruction) if self.store.params().autoencoder => (),
            (kind, target) => {
                return Err(NNError::InvalidTarget(format!(
                    "{:?} for a {} output layer",
                    target,
                    kind.name()
                )))
            }
        }

        self.fprop(seed, row, true)?;
        self.layers.iter_mut().for_each(Layer::reset_error);

        let (below, top) = self.layers.split_at_mut(last);
        let output = &mut top[0];
        match target {
            Target::Class(k) => output.bprop_classification(&mut below[last - 1], self.store, k)?,
            Target::Value(v) => output.bprop_regression(&mut below[last - 1], self.store, v)?,
            Target::Reconstruction => {
                output.set_autoencoder_error(&below[0].a)?;
                output.bprop(&mut below[last - 1], self.store)?;
            }
        }
        for i in (1..last).rev() {
            let (below, rest) = self.layers.split_at_mut(i);
            rest[0].bprop(&mut below[i - 1], self.store)?;
        }

        self.store.add_processed(1);
        trace!("trained row {} of the model", self.store.processed());
        Ok(())
    }

    pub fn predict_row(&mut self, row: &InputRow) -> Result<Array1<f32>> {
        self.fprop(0, row, false)?;
        Ok(self.output().a.to_dense().into_array())
    }

    pub fn mean_loss(&mut self, rows: &[TrainingRow]) -> Result<f32> {
        if rows.is_empty() {
            return Ok(0.0);
        }
        let loss = self.store.params().loss;
        let mut total = 0.0;
        for row in rows {
            let y = self.predict_row(&row.input)?;
            total += match row.target {
                Target::Class(k) => y
                    .iter()
                    .enumerate()
                    .map(|(i, &p)| loss_value(loss, if i == k { 1.0 } else { 0.0 }, p))
                    .sum::<f32>(),
                Target::Value(t) => loss_value(loss, t, y[0]),
                Target::Reconstruction => {
                    let x = &self.layers[0].a;
                    y.iter()
                        .enumerate()
                        .map(|(i, &p)| loss_value(loss, x.get(i), p))
                        .sum::<f32>()
                        / y.len() as f32
                }
            };
        }
        Ok(total / rows.len() as f32)
    }

    pub fn summary(&self) -> String {
        let mut total_param = 0;
        let mut res = "\nModel Network\n".to_string();
        res.push_str("-------------------------------------------------------------\n");
        res.push_str("Layer (Type)\t\t Units\t\t No.of params\n");
        for layer in self.layers.iter() {
            let params = match self.store.layer(layer.index) {
                Ok(p) => p.w.rows() * p.w.cols() + p.b.size(),
                Err(_) => 0,
            };
            total_param += params;
            let name = if layer.dropout().is_some() && layer.index > 0 {
                format!("{}Dropout", layer.kind.name())
            } else {
                layer.kind.name().to_string()
            };
            res.push_str(&format!("{:<16}\t {}\t\t {}\n", name, layer.units, params));
        }
        res.push_str("-------------------------------------------------------------\n");
        res.push_str(&format!("Total params: {}\n", total_param));
        res
    }
}

/// Trains one pass over `partitions`, one rayon worker per partition, all
/// writing into the same `store` without locks.
///
/// Workers stop early once the model is marked unstable; the pass then fails
/// with [`NNError::NumericalInstability`].
pub fn hogwild_pass(store: &WeightStore, partitions: &[Vec<TrainingRow>], seed: u64) -> Result<()> {
    partitions
        .par_iter()
        .enumerate()
        .try_for_each(|(part, rows)| -> Result<()> {
            let mut net = Network::new(store, true)?;
            let part_seed = seed.wrapping_add((part as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
            for (i, row) in rows.iter().enumerate() {
                if store.is_unstable() {
                    break;
                }
                net.train_row(part_seed.wrapping_add(i as u64), &row.input, row.target)?;
            }
            debug!("partition {} done with {} rows", part, rows.len());
            Ok(())
        })?;
    if store.is_unstable() {
        return Err(NNError::NumericalInstability(format!(
            "model diverged after {} rows",
            store.processed()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Activation, Loss, Parameters};
    use crate::core::input::InputLayout;

    fn regression() -> Parameters {
        Parameters {
            hidden: vec![3],
            activation: Activation::Tanh,
            loss: Loss::MeanSquare,
            ..Default::default()
        }
    }

    #[test]
    fn test_layer_kinds() {
        let store = WeightStore::new(&regression(), InputLayout::new(2, 1), None).unwrap();
        let net = Network::new(&store, false).unwrap();
        let kinds: Vec<_> = net.layers().iter().map(|l| l.kind).collect();
        assert_eq!(kinds, vec![LayerKind::Input, LayerKind::Tanh, LayerKind::Linear]);

        let store = WeightStore::new(&regression(), InputLayout::new(2, 1), Some(4)).unwrap();
        let net = Network::new(&store, false).unwrap();
        assert_eq!(net.output().kind, LayerKind::Softmax);
        assert_eq!(net.output().units, 4);

        let p = Parameters { autoencoder: true, ..regression() };
        let store = WeightStore::new(&p, InputLayout::new(2, 1), None).unwrap();
        let net = Network::new(&store, false).unwrap();
        assert_eq!(net.output().kind, LayerKind::Tanh);
        assert!(net.output().e.is_some());
    }

    #[test]
    fn test_target_must_match_output() {
        let store = WeightStore::new(&regression(), InputLayout::new(0, 2), None).unwrap();
        let mut net = Network::new(&store, true).unwrap();
        let row = InputRow::new(vec![], vec![0.5, -0.5]);
        assert!(matches!(net.train_row(0, &row, Target::Class(0)), Err(NNError::InvalidTarget(_))));
        assert!(matches!(
            net.train_row(0, &row, Target::Reconstruction),
            Err(NNError::InvalidTarget(_))
        ));
        assert!(matches!(
            net.train_row(0, &row, Target::Value(f32::NAN)),
            Err(NNError::InvalidTarget(_))
        ));
        net.train_row(0, &row, Target::Value(1.0)).unwrap();
        assert_eq!(store.processed(), 1);

        let mut frozen = Network::new(&store, false).unwrap();
        assert!(matches!(
            frozen.train_row(0, &row, Target::Value(1.0)),
            Err(NNError::InvalidConfiguration(_))
        ));
        assert_eq!(frozen.predict_row(&row).unwrap().len(), 1);
    }

    #[test]
    fn test_summary_counts_parameters() {
        let store = WeightStore::new(&regression(), InputLayout::new(0, 2), None).unwrap();
        let net = Network::new(&store, false).unwrap();
        // 3x2 + 3, then 1x3 + 1
        assert!(net.summary().contains("Total params: 13"));
    }

    #[test]
    fn test_mean_loss_of_constant_model() {
        let store = WeightStore::new(&regression(), InputLayout::new(0, 1), None).unwrap();
        store.set_weights(2, &Array2::zeros((1, 3))).unwrap();
        store.set_biases(2, &[0.5]).unwrap();
        let mut net = Network::new(&store, false).unwrap();
        let rows = vec![
            TrainingRow::new(InputRow::new(vec![], vec![1.0]), Target::Value(1.5)),
            TrainingRow::new(InputRow::new(vec![], vec![2.0]), Target::Value(0.5)),
        ];
        let expected = (loss_value(Loss::MeanSquare, 1.5, 0.5) + 0.0) / 2.0;
        assert!((net.mean_loss(&rows).unwrap() - expected).abs() < 1e-6);
        assert_eq!(net.mean_loss(&[]).unwrap(), 0.0);
    }
}
