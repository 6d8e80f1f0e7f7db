//! Prometheus metric definitions: the dynamic price registry and the
//! scrape-health gauges.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, GaugeVec, IntCounter, Opts, Registry};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::ExporterError;
use crate::record::{PriceRecord, CURRENT_PRICE, PRICE_LABEL_NAMES};

/// Namespace every exported family lives under.
pub const NAMESPACE: &str = "aws_ec2_price";

/// Families known up front, with their help text.
const PRICE_FAMILIES: &[(&str, &str)] = &[(
    CURRENT_PRICE,
    "Current price of the instance type, in USD per hour.",
)];

fn price_family(name: &str, help: &str) -> Result<GaugeVec, prometheus::Error> {
    GaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), &PRICE_LABEL_NAMES)
}

/// Label-indexed price store, one `GaugeVec` per metric name.
///
/// Predefined families are plain fields and need no locking. Families first
/// seen in a record are created under the write lock of `dynamic`, which is
/// only taken on that create path. Clones share the same families.
#[derive(Clone)]
pub struct PriceMetrics {
    predefined: Vec<(String, GaugeVec)>,
    dynamic: Arc<RwLock<HashMap<String, GaugeVec>>>,
}

/// One exported price sample.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSample {
    pub metric_name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

impl PriceMetrics {
    pub fn new() -> Result<Self, ExporterError> {
        let predefined = PRICE_FAMILIES
            .iter()
            .map(|(name, help)| {
                Ok::<_, prometheus::Error>((name.to_string(), price_family(name, help)?))
            })
            .collect::<Result<Vec<_>, prometheus::Error>>()?;
        Ok(PriceMetrics {
            predefined,
            dynamic: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Drop every sample, and every family not known up front.
    pub fn reset(&self) {
        for (_, family) in &self.predefined {
            family.reset();
        }
        self.dynamic
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    fn family(&self, name: &str) -> Result<GaugeVec, ExporterError> {
        if let Some((_, family)) = self.predefined.iter().find(|(n, _)| n == name) {
            return Ok(family.clone());
        }
        if let Some(family) = self
            .dynamic
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
        {
            return Ok(family.clone());
        }

        let mut dynamic = self
            .dynamic
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Another writer may have won the race between the two locks.
        if let Some(family) = dynamic.get(name) {
            return Ok(family.clone());
        }
        debug!(metric = name, "Creating price family");
        let family = price_family(name, &format!("Price reported as {name}."))?;
        dynamic.insert(name.to_string(), family.clone());
        Ok(family)
    }

    /// Set the value at the record's label tuple; the last write wins.
    pub fn ingest(&self, record: &PriceRecord) -> Result<(), ExporterError> {
        let family = self.family(&record.metric_name)?;
        family
            .get_metric_with_label_values(&record.labels.values())?
            .set(record.value);
        Ok(())
    }

    /// Drain a record stream into the registry. Returns how many records
    /// could not be stored.
    pub async fn ingest_stream(&self, mut records: mpsc::Receiver<PriceRecord>) -> u64 {
        let mut failed = 0;
        while let Some(record) = records.recv().await {
            if let Err(e) = self.ingest(&record) {
                failed += 1;
                warn!(metric = %record.metric_name, error = %e, "Failed to store price record");
            }
        }
        failed
    }

    /// Every (metric name, labels, value) currently held.
    #[allow(deprecated)]
    pub fn snapshot(&self) -> Vec<PriceSample> {
        let mut samples = Vec::new();
        for family in self.collect() {
            for metric in family.get_metric() {
                samples.push(PriceSample {
                    metric_name: family.get_name().to_string(),
                    labels: metric
                        .get_label()
                        .iter()
                        .map(|lp| (lp.get_name().to_string(), lp.get_value().to_string()))
                        .collect(),
                    value: metric.get_gauge().value(),
                });
            }
        }
        samples.sort_by(|a, b| (&a.metric_name, &a.labels).cmp(&(&b.metric_name, &b.labels)));
        samples
    }
}

impl Collector for PriceMetrics {
    fn desc(&self) -> Vec<&Desc> {
        self.predefined
            .iter()
            .flat_map(|(_, family)| family.desc())
            .collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut families: Vec<MetricFamily> = self
            .predefined
            .iter()
            .flat_map(|(_, family)| family.collect())
            .collect();
        let dynamic = self
            .dynamic
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        families.extend(dynamic.values().flat_map(|family| family.collect()));
        families
    }
}

/// Gauges describing the last scrape cycle.
#[derive(Clone)]
pub struct ScrapeHealth {
    pub duration: Gauge,
    pub total_scrapes: IntCounter,
    pub errors: Gauge,
    pub last_scrape_timestamp: Gauge,
}

impl ScrapeHealth {
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(ScrapeHealth {
            duration: Gauge::with_opts(
                Opts::new("scrape_duration_seconds", "The scrape duration.").namespace(NAMESPACE),
            )?,
            total_scrapes: IntCounter::with_opts(
                Opts::new("scrapes_total", "Total pricing API scrapes.").namespace(NAMESPACE),
            )?,
            errors: Gauge::with_opts(
                Opts::new("scrape_errors", "Errors seen during the last scrape.")
                    .namespace(NAMESPACE),
            )?,
            last_scrape_timestamp: Gauge::with_opts(
                Opts::new(
                    "last_scrape_timestamp_seconds",
                    "Unix time the last scrape finished.",
                )
                .namespace(NAMESPACE),
            )?,
        })
    }

    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.duration.clone()))?;
        registry.register(Box::new(self.total_scrapes.clone()))?;
        registry.register(Box::new(self.errors.clone()))?;
        registry.register(Box::new(self.last_scrape_timestamp.clone()))?;
        Ok(())
    }

    pub fn record(&self, errors: u64, duration: Duration, finished_at: DateTime<Utc>) {
        self.errors.set(errors as f64);
        self.duration.set(duration.as_secs_f64());
        self.last_scrape_timestamp
            .set(finished_at.timestamp_millis() as f64 / 1000.0);
    }
}
