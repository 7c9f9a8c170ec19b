pub mod reader;

pub use reader::{DelimitedConfig, ReadFailure, read_delimited};
