//! Centralised error type for the exporter.

use std::num::ParseFloatError;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("{option} value '{value}' is not recognized. Accepted values: {accepted}")]
    InvalidValue {
        option: &'static str,
        value: String,
        accepted: String,
    },

    #[error("HTTP error fetching {0}: {1}")]
    Fetch(String, #[source] reqwest::Error),

    #[error("Pricing endpoint {0} answered with status {1}")]
    Status(String, reqwest::StatusCode),

    #[error("Decode error for {0}: {1}")]
    Decode(String, #[source] serde_json::Error),

    #[error("Price entry {sku} is missing {field}")]
    MissingField { sku: String, field: String },

    #[error("Unparsable price '{raw}': {source}")]
    ParsePrice {
        raw: String,
        #[source]
        source: ParseFloatError,
    },

    #[error("{0} did not finish within {1:?}")]
    Timeout(String, Duration),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("HTTP server error: {0}")]
    Http(#[from] hyper::Error),

    #[error("Invalid listen address {0}: {1}")]
    Addr(String, #[source] std::net::AddrParseError),
}

pub type Result<T, E = ExporterError> = std::result::Result<T, E>;
