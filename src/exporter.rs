//! The object the monitoring collector polls.
//!
//! One `Exporter` is built at startup and shared with the HTTP handler. It
//! owns the price registry and the scrape-health gauges; every poll takes the
//! `gate` lock for the whole check-scrape-gather sequence, so a second poll
//! waits instead of seeing a half-rebuilt registry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::debug;

use crate::cache::CacheGate;
use crate::config::ScrapeConfig;
use crate::errors::ExporterError;
use crate::metrics::{PriceMetrics, ScrapeHealth};
use crate::scrape::{ScrapeCoordinator, ScrapeReport};
use crate::source::PriceSource;

/// Records buffered between the scrape units and the registry.
const RECORD_BUFFER: usize = 1024;

pub struct Exporter {
    registry: Registry,
    prices: PriceMetrics,
    health: ScrapeHealth,
    coordinator: ScrapeCoordinator,
    gate: Mutex<CacheGate>,
}

impl Exporter {
    pub fn new(
        source: Arc<dyn PriceSource>,
        config: ScrapeConfig,
        cache_ttl: Duration,
    ) -> Result<Self, ExporterError> {
        let registry = Registry::new();
        let prices = PriceMetrics::new()?;
        let health = ScrapeHealth::new()?;
        registry.register(Box::new(prices.clone()))?;
        health.register(&registry)?;

        let coordinator = ScrapeCoordinator::new(source, config, health.total_scrapes.clone());
        Ok(Exporter {
            registry,
            prices,
            health,
            coordinator,
            gate: Mutex::new(CacheGate::new(cache_ttl)),
        })
    }

    /// Descriptors of every predefined family; never triggers a scrape.
    pub fn describe_schema(&self) -> Vec<Desc> {
        let mut descs: Vec<Desc> = self.prices.desc().into_iter().cloned().collect();
        for collector in [
            &self.health.duration as &dyn Collector,
            &self.health.total_scrapes,
            &self.health.errors,
            &self.health.last_scrape_timestamp,
        ] {
            descs.extend(collector.desc().into_iter().cloned());
        }
        descs
    }

    pub async fn collect_snapshot(&self) -> Vec<MetricFamily> {
        self.collect_snapshot_at(Instant::now()).await
    }

    /// Scrape if the cache window starting before `now` has closed, then
    /// gather everything.
    pub async fn collect_snapshot_at(&self, now: Instant) -> Vec<MetricFamily> {
        let mut gate = self.gate.lock().await;
        if gate.is_due(now) {
            self.scrape_cycle().await;
            gate.mark_scraped(now);
        } else {
            debug!(ttl_s = gate.ttl().as_secs(), "Serving cached prices");
        }
        self.registry.gather()
    }

    /// Current snapshot in the text exposition format.
    pub async fn render(&self) -> Result<String, ExporterError> {
        let families = self.collect_snapshot().await;
        encode_text(&families)
    }

    async fn scrape_cycle(&self) -> ScrapeReport {
        self.prices.reset();

        let (tx, rx) = mpsc::channel(RECORD_BUFFER);
        let (report, rejected) =
            tokio::join!(self.coordinator.scrape(tx), self.prices.ingest_stream(rx));

        self.health
            .record(report.errors + rejected, report.duration, Utc::now());
        report
    }
}

pub fn encode_text(families: &[MetricFamily]) -> Result<String, ExporterError> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use futures::stream::{self, BoxStream, StreamExt};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::record::Lifecycle;
    use crate::source::{Page, SpotPrice};

    /// Serves one fixed spot page per region and counts how often it is asked.
    #[derive(Default)]
    struct CountingSource {
        calls: AtomicUsize,
    }

    impl PriceSource for CountingSource {
        fn regions(&self) -> BoxFuture<'_, Result<Vec<String>, ExporterError>> {
            Box::pin(async { Ok::<_, ExporterError>(vec!["eu-west-1".to_string()]) })
        }

        fn availability_zones<'a>(
            &'a self,
            _: &'a str,
        ) -> BoxFuture<'a, Result<Vec<String>, ExporterError>> {
            Box::pin(async { Ok::<_, ExporterError>(Vec::new()) })
        }

        fn spot_prices(&self, region: &str, _: &[String]) -> BoxStream<'static, Page<SpotPrice>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let page = vec![SpotPrice {
                availability_zone: format!("{region}a"),
                instance_type: "c5.xlarge".to_string(),
                product_description: "Linux/UNIX".to_string(),
                spot_price: format!("0.{}", n + 1),
            }];
            stream::iter(vec![Ok(page)]).boxed()
        }

        fn on_demand_products(&self, _: &str, _: &str) -> BoxStream<'static, Page<String>> {
            stream::empty().boxed()
        }
    }

    fn exporter(source: Arc<CountingSource>, ttl: Duration) -> Exporter {
        let config = ScrapeConfig {
            lifecycles: vec![Lifecycle::Spot],
            ..ScrapeConfig::default()
        };
        Exporter::new(source, config, ttl).unwrap()
    }

    #[test]
    fn describe_schema_needs_no_scrape() {
        let source = Arc::new(CountingSource::default());
        let exporter = exporter(Arc::clone(&source), Duration::ZERO);

        let names: Vec<String> = exporter
            .describe_schema()
            .into_iter()
            .map(|d| d.fq_name)
            .collect();
        assert_eq!(
            names,
            vec![
                "aws_ec2_price_current_price",
                "aws_ec2_price_scrape_duration_seconds",
                "aws_ec2_price_scrapes_total",
                "aws_ec2_price_scrape_errors",
                "aws_ec2_price_last_scrape_timestamp_seconds",
            ]
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn zero_ttl_scrapes_on_every_poll() {
        let source = Arc::new(CountingSource::default());
        let exporter = exporter(Arc::clone(&source), Duration::ZERO);

        exporter.collect_snapshot().await;
        let second = exporter.render().await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(second.contains("aws_ec2_price_scrapes_total 2"));
        assert!(second.contains("} 0.2"));
        assert!(!second.contains("} 0.1"));
    }

    #[tokio::test]
    async fn concurrent_polls_are_serialized() {
        let source = Arc::new(CountingSource::default());
        let exporter = Arc::new(exporter(Arc::clone(&source), Duration::from_secs(60)));
        let now = Instant::now();

        let polls: Vec<_> = (0..4)
            .map(|_| {
                let exporter = Arc::clone(&exporter);
                tokio::spawn(async move { encode_text(&exporter.collect_snapshot_at(now).await) })
            })
            .collect();
        let mut bodies = Vec::new();
        for poll in polls {
            bodies.push(poll.await.unwrap().unwrap());
        }

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
    }
}
