//! Data shapes exchanged with the experiment assignment service.
//!
//! This crate contains the serde-serializable types the context layer reads
//! from and hands back to its collaborators. These types represent the
//! "data layer" - the shapes as the assignment service and the downstream
//! change engine see them.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization and accessors
//! * Lenient on input: Unknown fields on changes are preserved, not rejected
//! * Strict where it matters: snapshots must be JSON objects to deserialize
//!
//! Orchestration, caching and exposure policy live in `edge-context`.

pub mod changes;
pub mod experiments;
pub mod snapshot;
pub mod units;

pub use changes::*;
pub use experiments::*;
pub use snapshot::*;
pub use units::*;
