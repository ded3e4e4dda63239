//! Utilities shared by the workspace binaries: directory walking, bounded
//! parallel iteration, callbacks and logging setup.

pub mod file_utils;
pub mod log_setup;
pub mod parallel;
pub mod shared_fn;

pub use shared_fn::SharedFn;
