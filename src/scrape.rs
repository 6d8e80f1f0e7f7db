//! scrape.rs
//!
//! Scrape coordination: fan one unit of work out per region (spot prices) and
//! per region × operating system (on-demand prices), stream every parsed
//! price into a channel, and tally failures without stopping sibling units.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use prometheus::IntCounter;
use tokio::sync::{mpsc, OnceCell};
use tracing::{debug, error, info, warn};

use crate::config::ScrapeConfig;
use crate::errors::ExporterError;
use crate::pricing::decode_offer;
use crate::record::{parse_price, Lifecycle, PriceRecord};
use crate::source::PriceSource;

/// Outcome of one scrape cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrapeReport {
    pub errors: u64,
    pub records: u64,
    pub units: usize,
    pub duration: Duration,
}

/// One concurrent fetch unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unit {
    Spot { region: String },
    OnDemand { region: String, operating_system: String },
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Spot { region } => write!(f, "spot[{region}]"),
            Unit::OnDemand {
                region,
                operating_system,
            } => write!(f, "ondemand[{region}/{operating_system}]"),
        }
    }
}

/// Counters shared by every unit of a scrape. Only ever increase.
#[derive(Debug, Default)]
struct Tally {
    errors: AtomicU64,
    records: AtomicU64,
}

impl Tally {
    fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct ScrapeCoordinator {
    source: Arc<dyn PriceSource>,
    config: ScrapeConfig,
    total_scrapes: IntCounter,
    /// Regions discovered from the provider; only set once a lookup succeeds.
    discovered: OnceCell<Vec<String>>,
}

impl ScrapeCoordinator {
    pub fn new(
        source: Arc<dyn PriceSource>,
        config: ScrapeConfig,
        total_scrapes: IntCounter,
    ) -> Self {
        ScrapeCoordinator {
            source,
            config,
            total_scrapes,
            discovered: OnceCell::new(),
        }
    }

    /// Run every unit to completion, sending records into `records`.
    ///
    /// The channel closes once the last unit finishes, since every sender
    /// clone lives inside a unit. Returns only after all units are done.
    pub async fn scrape(&self, records: mpsc::Sender<PriceRecord>) -> ScrapeReport {
        let start = Instant::now();
        self.total_scrapes.inc();
        let tally = Arc::new(Tally::default());

        let regions = self.resolve_regions(&tally).await;
        let units = self.plan(&regions);
        info!(regions = regions.len(), units = units.len(), "Starting scrape");

        // Launch everything first, then join once.
        let mut running = FuturesUnordered::new();
        for unit in &units {
            running.push(self.launch(unit.clone(), records.clone(), Arc::clone(&tally)));
        }
        drop(records);

        while let Some(joined) = running.next().await {
            if let Err(e) = joined {
                tally.error();
                error!(error = %e, "Scrape unit aborted");
            }
        }

        let report = ScrapeReport {
            errors: tally.errors.load(Ordering::Relaxed),
            records: tally.records.load(Ordering::Relaxed),
            units: units.len(),
            duration: start.elapsed(),
        };
        info!(
            units = report.units,
            records = report.records,
            errors = report.errors,
            duration_s = report.duration.as_secs_f64(),
            "Scrape complete"
        );
        report
    }

    async fn resolve_regions(&self, tally: &Tally) -> Vec<String> {
        let regions = if self.config.regions.is_empty() {
            match self.discover_regions().await {
                Ok(regions) => regions,
                Err(e) => {
                    tally.error();
                    error!(error = %e, "Failed to list enabled regions");
                    Vec::new()
                }
            }
        } else {
            self.config.regions.clone()
        };

        regions
            .into_iter()
            .filter(|region| {
                let keep = self.config.in_partitions(region);
                if !keep {
                    debug!(region = %region, "Skipping region outside configured partitions");
                }
                keep
            })
            .collect()
    }

    /// Enabled regions, asked of the provider until a lookup succeeds.
    ///
    /// The lookup is bounded by the unit timeout, so a hung provider call
    /// cannot stall the scrape.
    async fn discover_regions(&self) -> Result<Vec<String>, ExporterError> {
        let regions = self
            .discovered
            .get_or_try_init(|| async {
                let lookup = self.source.regions();
                match self.config.unit_timeout {
                    Some(limit) => tokio::time::timeout(limit, lookup).await.unwrap_or_else(|_| {
                        Err(ExporterError::Timeout("region discovery".to_string(), limit))
                    }),
                    None => lookup.await,
                }
            })
            .await?;
        Ok(regions.clone())
    }

    /// The units a scrape over `regions` consists of.
    pub fn plan(&self, regions: &[String]) -> Vec<Unit> {
        let mut units = Vec::new();
        for region in regions {
            if self.config.scrapes(Lifecycle::Spot) {
                units.push(Unit::Spot {
                    region: region.clone(),
                });
            }
            if self.config.scrapes(Lifecycle::OnDemand) {
                for os in &self.config.operating_systems {
                    units.push(Unit::OnDemand {
                        region: region.clone(),
                        operating_system: os.clone(),
                    });
                }
            }
        }
        units
    }

    fn launch(
        &self,
        unit: Unit,
        records: mpsc::Sender<PriceRecord>,
        tally: Arc<Tally>,
    ) -> tokio::task::JoinHandle<()> {
        let source = Arc::clone(&self.source);
        let product_descriptions = self.config.product_descriptions.clone();
        let deadline = self.config.unit_timeout;

        tokio::spawn(async move {
            let work = run_unit(&*source, &unit, &product_descriptions, &records, &tally);
            match deadline {
                Some(limit) => {
                    if tokio::time::timeout(limit, work).await.is_err() {
                        tally.error();
                        let e = ExporterError::Timeout(unit.to_string(), limit);
                        error!(unit = %unit, error = %e, "Scrape unit timed out");
                    }
                }
                None => work.await,
            }
        })
    }
}

async fn run_unit(
    source: &dyn PriceSource,
    unit: &Unit,
    product_descriptions: &[String],
    records: &mpsc::Sender<PriceRecord>,
    tally: &Tally,
) {
    debug!(unit = %unit, "Querying prices");
    match unit {
        Unit::Spot { region } => {
            spot_prices(source, region, product_descriptions, records, tally).await
        }
        Unit::OnDemand {
            region,
            operating_system,
        } => on_demand_prices(source, region, operating_system, records, tally).await,
    }
}

/// Send a record; `false` once nobody is listening any more.
async fn emit(records: &mpsc::Sender<PriceRecord>, tally: &Tally, record: PriceRecord) -> bool {
    debug!(
        metric = %record.metric_name,
        region = %record.labels.region,
        az = %record.labels.availability_zone,
        instance_type = %record.labels.instance_type,
        value = record.value,
        "Emitting price"
    );
    if records.send(record).await.is_err() {
        warn!("Record stream closed, abandoning unit");
        return false;
    }
    tally.records.fetch_add(1, Ordering::Relaxed);
    true
}

async fn spot_prices(
    source: &dyn PriceSource,
    region: &str,
    product_descriptions: &[String],
    records: &mpsc::Sender<PriceRecord>,
    tally: &Tally,
) {
    let mut pages = source.spot_prices(region, product_descriptions);
    while let Some(page) = pages.next().await {
        let history = match page {
            Ok(history) => history,
            Err(e) => {
                tally.error();
                error!(region = %region, error = %e, "Failed to fetch spot price history");
                break;
            }
        };

        for price in history {
            let value = match parse_price(&price.spot_price) {
                Ok(value) => value,
                Err(e) => {
                    tally.error();
                    error!(
                        region = %region,
                        az = %price.availability_zone,
                        instance_type = %price.instance_type,
                        error = %e,
                        "Failed to parse spot price"
                    );
                    continue;
                }
            };
            let record = PriceRecord::spot(
                region,
                &price.availability_zone,
                &price.instance_type,
                &price.product_description,
                value,
            );
            if !emit(records, tally, record).await {
                return;
            }
        }
    }
}

async fn on_demand_prices(
    source: &dyn PriceSource,
    region: &str,
    operating_system: &str,
    records: &mpsc::Sender<PriceRecord>,
    tally: &Tally,
) {
    // On-demand prices are regional; they are repeated for every zone.
    let zones = match source.availability_zones(region).await {
        Ok(zones) => zones,
        Err(e) => {
            tally.error();
            error!(region = %region, error = %e, "Failed to list availability zones");
            return;
        }
    };

    let mut pages = source.on_demand_products(region, operating_system);
    while let Some(page) = pages.next().await {
        let documents = match page {
            Ok(documents) => documents,
            Err(e) => {
                tally.error();
                error!(
                    region = %region,
                    operating_system = %operating_system,
                    error = %e,
                    "Failed to fetch on-demand price list"
                );
                break;
            }
        };

        for document in documents {
            let offer = match decode_offer(&document) {
                Ok(offer) => offer,
                Err(e) => {
                    tally.error();
                    error!(region = %region, error = %e, "Failed to decode price list entry");
                    continue;
                }
            };
            let value = match parse_price(&offer.usd_per_hour) {
                Ok(value) => value,
                Err(e) => {
                    tally.error();
                    error!(
                        region = %region,
                        instance_type = %offer.instance_type,
                        error = %e,
                        "Failed to parse on-demand price"
                    );
                    continue;
                }
            };
            let os = if offer.operating_system.is_empty() {
                operating_system
            } else {
                &offer.operating_system
            };

            for zone in &zones {
                let record = PriceRecord::on_demand(
                    region,
                    zone,
                    &offer.instance_type,
                    os,
                    &offer.product_description,
                    value,
                );
                if !emit(records, tally, record).await {
                    return;
                }
            }
        }
    }
}
