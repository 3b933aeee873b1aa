//! Shared Conduit model types.
//!
//! Kept free of storage and runtime dependencies so the state backend, the
//! engine and the HTTP surface can all speak the same vocabulary.

pub mod catalog;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod record;
pub mod run;
pub mod schedule;
pub mod state;
pub mod wire;
