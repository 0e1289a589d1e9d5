//! HTTP server for the market data service
//!
//! Serves normalized quotes, the aggregate snapshot and a server-sent event
//! stream to the dashboard front end.

pub mod server;
pub mod service;
pub mod settings;

pub use server::{ApiServer, ApiServerBuilder};
pub use service::{router, AppState};
pub use settings::load_config;
