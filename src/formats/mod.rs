//! Tabular data: the in-memory dataset, delimited reading and normalization

pub mod dataset;
pub mod delimited;
pub mod normalize;

pub use dataset::Dataset;
pub use delimited::DelimitedConfig;
pub use normalize::{NormalizeError, Normalizer};
