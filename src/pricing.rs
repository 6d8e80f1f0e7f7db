//! Strict decoding of on-demand price-list documents.
//!
//! Each document describes one product (SKU) and its purchase terms. The
//! hourly on-demand USD price sits at
//! `terms.OnDemand[<sku>.<term>].priceDimensions[<sku>.<term>.<rate>].pricePerUnit.USD`.

use std::collections::HashMap;

use serde::Deserialize;

use crate::errors::ExporterError;

/// Offer term code for on-demand purchases.
pub const TERM_ON_DEMAND: &str = "JRTCKXETXF";
/// Rate code for per-hour billing.
pub const TERM_PER_HOUR: &str = "6YS6EN2CT7";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceListItem {
    pub product: Product,
    #[serde(default)]
    pub service_code: Option<String>,
    pub terms: Terms,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub sku: String,
    #[serde(default)]
    pub product_family: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Terms {
    #[serde(rename = "OnDemand", default)]
    pub on_demand: HashMap<String, OfferTerm>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferTerm {
    pub price_dimensions: HashMap<String, PriceDimension>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceDimension {
    #[serde(default)]
    pub unit: Option<String>,
    pub price_per_unit: HashMap<String, String>,
}

/// The fields the exporter needs out of one price-list document.
#[derive(Debug, Clone, PartialEq)]
pub struct OnDemandOffer {
    pub sku: String,
    pub instance_type: String,
    pub operating_system: String,
    pub product_description: String,
    /// Raw USD per hour, not yet parsed.
    pub usd_per_hour: String,
}

impl PriceListItem {
    pub fn attribute(&self, name: &str) -> &str {
        self.product
            .attributes
            .get(name)
            .map(String::as_str)
            .unwrap_or_default()
    }

    fn usd_per_hour(&self) -> Result<&str, ExporterError> {
        let sku = &self.product.sku;
        let term_key = format!("{sku}.{TERM_ON_DEMAND}");
        let rate_key = format!("{term_key}.{TERM_PER_HOUR}");
        let missing = |field: String| ExporterError::MissingField {
            sku: sku.clone(),
            field,
        };

        let term = self
            .terms
            .on_demand
            .get(&term_key)
            .ok_or_else(|| missing(format!("terms.OnDemand[{term_key}]")))?;
        let dimension = term
            .price_dimensions
            .get(&rate_key)
            .ok_or_else(|| missing(format!("priceDimensions[{rate_key}]")))?;
        dimension
            .price_per_unit
            .get("USD")
            .map(String::as_str)
            .ok_or_else(|| missing("pricePerUnit.USD".to_string()))
    }
}

/// Decode one raw document. Missing required fields are an error, never zero.
pub fn decode_offer(raw: &str) -> Result<OnDemandOffer, ExporterError> {
    let item: PriceListItem = serde_json::from_str(raw)
        .map_err(|e| ExporterError::Decode("price list entry".to_string(), e))?;

    let instance_type = item.attribute("instanceType");
    if instance_type.is_empty() {
        return Err(ExporterError::MissingField {
            sku: item.product.sku.clone(),
            field: "product.attributes.instanceType".to_string(),
        });
    }

    Ok(OnDemandOffer {
        sku: item.product.sku.clone(),
        instance_type: instance_type.to_string(),
        operating_system: item.attribute("operatingSystem").to_string(),
        product_description: item.attribute("productDescription").to_string(),
        usd_per_hour: item.usd_per_hour()?.to_string(),
    })
}
