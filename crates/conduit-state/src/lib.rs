//! Persistent state for the Conduit sync engine.
//!
//! Provides the storage traits ([`ConnectionStore`], [`CursorStore`],
//! [`ScheduleStore`], [`RunHistory`]) bundled as [`StateBackend`], and a
//! [`SqliteStateBackend`] implementation. Model types live in
//! [`conduit_types`].

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod sqlite;

pub use backend::{
    AcquireOutcome, ConnectionStore, CursorStore, RunHistory, ScheduleStore, StateBackend,
    WriteOutcome,
};
pub use error::StateError;
pub use sqlite::SqliteStateBackend;
