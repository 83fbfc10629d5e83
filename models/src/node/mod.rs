//! Observes a node's cordon and taint state to decide whether, and since when, it is draining.
pub mod drain;
mod error;

pub use self::error::Error as DrainStateError;
