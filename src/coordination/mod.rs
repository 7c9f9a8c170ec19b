//! Batch coordination: the file→table map, the staging loader, the warehouse merge
//! and the coordinator that sequences them

pub mod coordinator;
pub mod loader;
pub mod merge;
pub mod sources;

pub use coordinator::{BatchOutcome, Coordinator, FileReport, FileStatus};
pub use loader::StagingLoader;
pub use merge::StoredProcedureMerge;
pub use sources::SourceMap;
