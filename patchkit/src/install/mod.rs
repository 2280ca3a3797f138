//! On-disk installation machinery: the persisted log, the recoverable trash,
//! progress composition and the stage processor that diffs and applies
//! archives.

pub mod context;
pub mod log;
pub mod progress;
pub mod recycle;
pub mod stage;
