//! Core domain concepts shared across all subdomains.
//!
//! - [`model::ModelTarget`]: opaque model id resolved to a provider
//! - [`usage::Usage`]: token/cost counters
//! - [`error::ErrorKind`]: failure taxonomy shared across layers

pub mod error;
pub mod model;
pub mod usage;
