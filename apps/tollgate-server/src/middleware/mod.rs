//! Middleware modules.

pub mod error;

#[cfg(feature = "rate-limit")]
pub mod ingress;
