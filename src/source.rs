//! The boundary to the provider's pricing and inventory APIs.
//!
//! Paginated calls are exposed as streams yielding one item per result page.
//! A stream is lazy, finite and cannot be restarted; an `Err` item means the
//! remaining pages are unavailable, while the pages already yielded stay valid.

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::Deserialize;

use crate::errors::ExporterError;

/// One spot price history entry, price still in its raw string form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpotPrice {
    pub availability_zone: String,
    pub instance_type: String,
    pub product_description: String,
    pub spot_price: String,
}

pub type Page<T> = Result<Vec<T>, ExporterError>;

/// Pricing/inventory capability the scrape units drive.
pub trait PriceSource: Send + Sync + 'static {
    /// Regions enabled for the account.
    fn regions(&self) -> BoxFuture<'_, Result<Vec<String>, ExporterError>>;

    fn availability_zones<'a>(
        &'a self,
        region: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, ExporterError>>;

    /// Current spot prices for `region`, filtered by product description.
    fn spot_prices(
        &self,
        region: &str,
        product_descriptions: &[String],
    ) -> BoxStream<'static, Page<SpotPrice>>;

    /// Raw on-demand price-list documents (one JSON string per product).
    fn on_demand_products(
        &self,
        region: &str,
        operating_system: &str,
    ) -> BoxStream<'static, Page<String>>;
}
