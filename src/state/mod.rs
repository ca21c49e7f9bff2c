//! Durable state for assembled stacks
//!
//! Resource identifiers and their dependency graph are recorded so that
//! re-assembly reconciles rather than recreates.

mod storage;

pub use storage::{DataPoint, StackState, StateStore};
