//! # Tollgate Core
//!
//! The domain layer of the Tollgate protection layer.
//! This crate contains rate-limit and cache-coherence types plus the ports
//! that infrastructure implements. It has zero infrastructure dependencies.

pub mod domain;
pub mod error;
pub mod ports;

pub use error::{LoaderError, TollgateError};
