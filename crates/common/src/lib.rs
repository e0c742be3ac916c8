//! Shared error machinery used across all switchboard crates.

pub mod error;

pub use error::{Error, FromMessage, Result};
