//! Entrypoint: load and validate configuration, set up tracing, build the
//! exporter and serve it over HTTP.
//!
//! Every scrape happens inside a poll of the metrics endpoint; there is no
//! background loop. See `config.rs` for the recognized settings.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use ec2_price_exporter::config::Settings;
use ec2_price_exporter::errors::ExporterError;
use ec2_price_exporter::exporter::Exporter;
use ec2_price_exporter::pricing_client::PricingClient;
use ec2_price_exporter::server;

/// **Workflow**:
/// 1. Load `Config.toml` (and apply any `APP__…` env-var overrides).
/// 2. Initialise tracing from `RUST_LOG`, falling back to `log_level`.
/// 3. Validate filters; an unknown value stops the process here.
/// 4. Build the pricing client and the exporter, then serve.
#[tokio::main]
async fn main() -> Result<(), ExporterError> {
    // ───────────────────────────────────────────────────────────────
    // 1. Load configuration
    // ───────────────────────────────────────────────────────────────
    let settings = Settings::new()?;

    // ───────────────────────────────────────────────────────────────
    // 2. Initialise tracing / logging
    // ───────────────────────────────────────────────────────────────
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    fmt().with_env_filter(filter).init();
    info!(?settings, "Starting AWS EC2 price exporter");

    // ───────────────────────────────────────────────────────────────
    // 3. Validate filters
    // ───────────────────────────────────────────────────────────────
    let scrape_config = settings.scrape_config().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;
    let addr = server::parse_listen_address(&settings.listen_address)?;

    // ───────────────────────────────────────────────────────────────
    // 4. Exporter + HTTP endpoint
    // ───────────────────────────────────────────────────────────────
    let source = Arc::new(PricingClient::new(&settings.pricing_endpoint)?);
    let exporter = Arc::new(Exporter::new(source, scrape_config, settings.cache_ttl)?);

    info!(%addr, path = %settings.metrics_path, "Serving metrics");
    server::serve(addr, exporter, &settings.metrics_path).await
}
