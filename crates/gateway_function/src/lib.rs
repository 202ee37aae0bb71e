//! Serverless runtime integration for the control-plane gateway.
//!
//! This crate owns configuration, logging, backend adapters (identity broker,
//! document store, blob storage, container orchestration, log analytics) and
//! the per-event handlers behind the single `{event, data}` endpoint. Pure
//! domain rules live in `gateway_core`.

pub mod adapters;
pub mod config;
pub mod handlers;
pub mod observability;
