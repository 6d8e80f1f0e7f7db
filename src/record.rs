//! Result records emitted by the scrape units and the fixed label schema they
//! are indexed by.

use std::fmt;
use std::str::FromStr;

use crate::errors::ExporterError;

/// Name of the only price family populated today.
pub const CURRENT_PRICE: &str = "current_price";

/// Label schema shared by every price family. Order matters: it is the order
/// of [`PriceLabels::values`].
pub const PRICE_LABEL_NAMES: [&str; 6] = [
    "instance_type",
    "region",
    "availability_zone",
    "instance_lifecycle",
    "operating_system",
    "product_description",
];

/// Which pricing path an observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Spot,
    OnDemand,
}

impl Lifecycle {
    pub const ALL: [Lifecycle; 2] = [Lifecycle::Spot, Lifecycle::OnDemand];

    pub fn as_str(self) -> &'static str {
        match self {
            Lifecycle::Spot => "spot",
            Lifecycle::OnDemand => "ondemand",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lifecycle {
    type Err = ExporterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Lifecycle::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| ExporterError::InvalidValue {
                option: "lifecycle",
                value: s.to_string(),
                accepted: "spot, ondemand".to_string(),
            })
    }
}

/// Label values of one price observation. Fields a producer has no value for
/// stay empty; they are never dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PriceLabels {
    pub instance_type: String,
    pub region: String,
    pub availability_zone: String,
    pub instance_lifecycle: String,
    pub operating_system: String,
    pub product_description: String,
}

impl PriceLabels {
    /// Values in [`PRICE_LABEL_NAMES`] order.
    pub fn values(&self) -> [&str; 6] {
        [
            &self.instance_type,
            &self.region,
            &self.availability_zone,
            &self.instance_lifecycle,
            &self.operating_system,
            &self.product_description,
        ]
    }
}

/// One parsed price observation, produced once by a scrape unit and consumed
/// once by the metric registry.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRecord {
    pub metric_name: String,
    pub value: f64,
    pub labels: PriceLabels,
}

impl PriceRecord {
    /// Spot prices carry no operating system; the product description names it.
    pub fn spot(
        region: &str,
        availability_zone: &str,
        instance_type: &str,
        product_description: &str,
        value: f64,
    ) -> Self {
        PriceRecord {
            metric_name: CURRENT_PRICE.to_string(),
            value,
            labels: PriceLabels {
                instance_type: instance_type.to_string(),
                region: region.to_string(),
                availability_zone: availability_zone.to_string(),
                instance_lifecycle: Lifecycle::Spot.to_string(),
                operating_system: String::new(),
                product_description: product_description.to_string(),
            },
        }
    }

    pub fn on_demand(
        region: &str,
        availability_zone: &str,
        instance_type: &str,
        operating_system: &str,
        product_description: &str,
        value: f64,
    ) -> Self {
        PriceRecord {
            metric_name: CURRENT_PRICE.to_string(),
            value,
            labels: PriceLabels {
                instance_type: instance_type.to_string(),
                region: region.to_string(),
                availability_zone: availability_zone.to_string(),
                instance_lifecycle: Lifecycle::OnDemand.to_string(),
                operating_system: operating_system.to_string(),
                product_description: product_description.to_string(),
            },
        }
    }
}

/// Parse a raw price string as handed out by the pricing API.
pub fn parse_price(raw: &str) -> Result<f64, ExporterError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|source| ExporterError::ParsePrice {
            raw: raw.to_string(),
            source,
        })
}
