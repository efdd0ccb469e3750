pub use serde::{Serialize, Deserialize};

pub use ndarray::*;

pub use crate::config::{
    Activation,
    CategoricalReduction,
    InitialWeightDistribution,
    Loss,
    Parameters,
};
pub use crate::error::*;
pub use crate::models::{hogwild_pass, Network, Target, TrainingRow};
pub use crate::store::WeightStore;

// Internal re-exports
pub use crate::core::{
    DenseVector,
    InputLayout,
    InputRow,
    Layer,
    LayerKind,
    MatrixStorage,
    VectorStorage,
};
