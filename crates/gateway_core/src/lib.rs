//! Tenant-scoped access broker and job-dispatch domain primitives.
//!
//! This crate owns the deterministic parts of the control-plane gateway:
//! resource lookup, record identity, the request/response contract, job
//! specifications and delegated URL signing. HTTP clients and the server
//! runtime live in `gateway_function`.

pub mod contract;
pub mod error;
pub mod job_spec;
pub mod log_query;
pub mod record_id;
pub mod registry;
pub mod signing;
pub mod token_cache;

pub use error::GatewayError;
