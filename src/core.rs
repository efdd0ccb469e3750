// src/core.rs
pub mod activations;
pub mod dropout;
pub mod gemv;
pub mod input;
pub mod layers;
pub mod losses;
pub mod optimizers;
pub mod storage;

// Re-export commonly used items
pub use activations::LayerKind;
pub use dropout::Dropout;
pub use input::{InputLayout, InputRow};
pub use layers::Layer;
pub use storage::{DenseVector, Matrix, MatrixStorage, SharedVector, SparseVector, Vector, VectorStorage, Wild};
