//! Core types and utilities for the market data service
//!
//! This crate provides shared types used across all components:
//! - Quote, tick and snapshot types
//! - Asset classes and view filters
//! - Provider, stream and polling configuration
//! - Error types

pub mod types;
pub mod quotes;
pub mod config;
pub mod errors;

pub use types::*;
pub use quotes::*;
pub use config::*;
pub use errors::*;
