//! Relay loop primitives
//!
//! Two interchangeable implementations of a one-directional copy:
//!
//! - [`copy_buffered`]: read into a 32 KiB userspace buffer, write it out
//! - `copy_splice`: move bytes through a kernel pipe with `splice(2)` (Linux)
//!
//! [`CopyStrategy`] picks one; [`relay_one_way`] dispatches on it.

mod copy;
#[cfg(target_os = "linux")]
mod splice;

pub use copy::{
    copy_buffered, relay_one_way, CopyOutcome, CopyResult, CopyStrategy, RELAY_BUFFER_SIZE,
};
#[cfg(target_os = "linux")]
pub use splice::copy_splice;
