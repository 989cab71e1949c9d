//! Integrity layer management for RAID logical volumes.
//!
//! The [`integrity`] module adds, removes and resizes per-image integrity layers on a
//! [`metadata::VolumeGroup`], driving the volume-management primitives behind
//! [`backend::Backend`]. [`sim`] provides an in-memory backend for tests and tooling.

pub mod backend;
pub mod error;
pub mod integrity;
pub mod metadata;
pub mod sim;
pub mod sizing;

pub use backend::Backend;
pub use error::{IntegrityError, Result};
