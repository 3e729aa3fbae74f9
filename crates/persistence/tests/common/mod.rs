//! Test infrastructure for the post store.
//!
//! Fixtures build collector-shaped records, the harness wires a
//! [`PostStore`](postvault_persistence::PostStore) over in-memory backends
//! whose faults the tests control, and the assertions check the ordering
//! and uniqueness guarantees of search results.

#![allow(dead_code)]

pub mod assertions;
pub mod fixtures;
pub mod harness;

pub use assertions::*;
pub use fixtures::*;
pub use harness::*;
