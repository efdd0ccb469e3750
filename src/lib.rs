pub mod config;
pub mod core;
pub mod error;
pub mod models;
pub mod prelude;
pub mod store;
pub mod utils;

// Re-export types
pub use config::{Activation, Loss, Parameters};
pub use core::{InputLayout, InputRow, LayerKind};
pub use models::{hogwild_pass, Network, Target, TrainingRow};
pub use store::WeightStore;
