//! Feature engineering: raw transaction to contract-checked engineered row

pub mod contract;
pub mod pipeline;
pub mod row;
pub mod state;
pub mod synthetic;

pub use contract::{enforce, read_feature_list, FeatureColumnContract, FeatureList};
pub use pipeline::{transform, FeaturePipeline, TransformMode};
pub use row::{EngineeredFeatureRow, ENGINEERED_COLUMNS};
pub use state::PreprocessorState;
