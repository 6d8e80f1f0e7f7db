//! Library entrypoint: re‑export modules

pub mod cache;
pub mod config;
pub mod errors;
pub mod exporter;
pub mod metrics;
pub mod pricing;
pub mod pricing_client;
pub mod record;
pub mod scrape;
pub mod server;
pub mod source;
