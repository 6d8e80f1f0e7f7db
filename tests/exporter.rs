//! End-to-end behaviour of the exporter against an in-memory price source.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::time::Instant;
use tokio_test::assert_ok;

use ec2_price_exporter::config::ScrapeConfig;
use ec2_price_exporter::errors::ExporterError;
use ec2_price_exporter::exporter::{encode_text, Exporter};
use ec2_price_exporter::record::Lifecycle;
use ec2_price_exporter::source::{Page, PriceSource, SpotPrice};

/// Spot pages per region; `None` marks a failing page.
#[derive(Default)]
struct FixtureSource {
    spot: Mutex<HashMap<String, Vec<Option<Vec<SpotPrice>>>>>,
    spot_calls: AtomicUsize,
}

impl FixtureSource {
    fn with_region(self, region: &str, pages: Vec<Option<Vec<SpotPrice>>>) -> Self {
        self.set_region(region, pages);
        self
    }

    fn set_region(&self, region: &str, pages: Vec<Option<Vec<SpotPrice>>>) {
        self.spot.lock().unwrap().insert(region.to_string(), pages);
    }
}

impl PriceSource for FixtureSource {
    fn regions(&self) -> BoxFuture<'_, Result<Vec<String>, ExporterError>> {
        let mut regions: Vec<String> = self.spot.lock().unwrap().keys().cloned().collect();
        regions.sort();
        Box::pin(async move { Ok::<_, ExporterError>(regions) })
    }

    fn availability_zones<'a>(
        &'a self,
        _: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, ExporterError>> {
        Box::pin(async { Ok::<_, ExporterError>(Vec::new()) })
    }

    fn spot_prices(&self, region: &str, _: &[String]) -> BoxStream<'static, Page<SpotPrice>> {
        self.spot_calls.fetch_add(1, Ordering::SeqCst);
        let region_name = region.to_string();
        let pages = self.spot.lock().unwrap().get(region).cloned().unwrap_or_default();
        stream::iter(pages.into_iter().map(move |page| {
            page.ok_or_else(|| {
                ExporterError::Status(region_name.clone(), reqwest::StatusCode::UNAUTHORIZED)
            })
        }))
        .boxed()
    }

    fn on_demand_products(&self, _: &str, _: &str) -> BoxStream<'static, Page<String>> {
        stream::empty().boxed()
    }
}

fn price(az: &str, instance_type: &str, value: &str) -> SpotPrice {
    SpotPrice {
        availability_zone: az.to_string(),
        instance_type: instance_type.to_string(),
        product_description: "Linux/UNIX".to_string(),
        spot_price: value.to_string(),
    }
}

fn spot_config(regions: &[&str]) -> ScrapeConfig {
    ScrapeConfig {
        regions: regions.iter().map(|r| r.to_string()).collect(),
        lifecycles: vec![Lifecycle::Spot],
        ..ScrapeConfig::default()
    }
}

fn gauge(text: &str, name: &str) -> f64 {
    text.lines()
        .find_map(|line| line.strip_prefix(name)?.strip_prefix(' '))
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| panic!("{name} missing from:\n{text}"))
}

fn price_lines(text: &str) -> Vec<&str> {
    text.lines()
        .filter(|line| line.starts_with("aws_ec2_price_current_price{"))
        .collect()
}

#[tokio::test]
async fn malformed_price_in_one_region_leaves_the_other() {
    let source = Arc::new(
        FixtureSource::default()
            .with_region("a", vec![Some(vec![price("a1", "t1", "0.05")])])
            .with_region("b", vec![Some(vec![price("b1", "t2", "bad")])]),
    );
    let exporter = assert_ok!(Exporter::new(source, spot_config(&["a", "b"]), Duration::ZERO));

    let text = assert_ok!(exporter.render().await);
    let lines = price_lines(&text);

    assert_eq!(lines.len(), 1, "{text}");
    assert!(lines[0].contains("region=\"a\""));
    assert!(lines[0].contains("availability_zone=\"a1\""));
    assert!(lines[0].contains("instance_type=\"t1\""));
    assert!(lines[0].ends_with(" 0.05"));
    assert_eq!(gauge(&text, "aws_ec2_price_scrape_errors"), 1.0);
    assert_eq!(gauge(&text, "aws_ec2_price_scrapes_total"), 1.0);
}

#[tokio::test]
async fn polls_within_ttl_reuse_the_snapshot() {
    let source = Arc::new(
        FixtureSource::default().with_region("a", vec![Some(vec![price("a1", "t1", "0.05")])]),
    );
    let exporter = assert_ok!(Exporter::new(
        Arc::clone(&source) as Arc<dyn PriceSource>,
        spot_config(&["a"]),
        Duration::from_secs(60),
    ));

    let start = Instant::now();
    let first = assert_ok!(encode_text(&exporter.collect_snapshot_at(start).await));
    let second = assert_ok!(encode_text(
        &exporter.collect_snapshot_at(start + Duration::from_secs(10)).await
    ));

    assert_eq!(first, second);
    assert_eq!(gauge(&second, "aws_ec2_price_scrapes_total"), 1.0);
    assert_eq!(source.spot_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn expired_ttl_triggers_exactly_one_more_scrape() {
    let source = Arc::new(
        FixtureSource::default()
            .with_region("a", vec![Some(vec![price("a1", "t1", "0.05")])])
            .with_region("b", vec![Some(vec![price("b1", "t1", "0.06")])])
            .with_region("c", vec![Some(vec![price("c1", "t1", "0.07")])]),
    );
    let exporter = assert_ok!(Exporter::new(
        Arc::clone(&source) as Arc<dyn PriceSource>,
        spot_config(&[]),
        Duration::from_secs(60),
    ));

    let start = Instant::now();
    let first = assert_ok!(encode_text(&exporter.collect_snapshot_at(start).await));
    let later = assert_ok!(encode_text(
        &exporter.collect_snapshot_at(start + Duration::from_secs(61)).await
    ));

    assert_eq!(gauge(&first, "aws_ec2_price_scrapes_total"), 1.0);
    assert_eq!(gauge(&later, "aws_ec2_price_scrapes_total"), 2.0);
    assert_eq!(source.spot_calls.load(Ordering::SeqCst), 6);
    assert_eq!(price_lines(&later).len(), 3);
}

#[tokio::test]
async fn failing_page_keeps_records_already_fetched() {
    let source = Arc::new(FixtureSource::default().with_region(
        "a",
        vec![
            Some(vec![price("a1", "t1", "0.05"), price("a2", "t1", "0.051")]),
            None,
            Some(vec![price("a3", "t1", "0.052")]),
        ],
    ));
    let exporter = assert_ok!(Exporter::new(source, spot_config(&["a"]), Duration::ZERO));

    let text = assert_ok!(exporter.render().await);
    let lines = price_lines(&text);

    assert_eq!(lines.len(), 2, "{text}");
    assert!(lines.iter().all(|l| !l.contains("availability_zone=\"a3\"")));
    assert!(gauge(&text, "aws_ec2_price_scrape_errors") >= 1.0);
}

#[tokio::test]
async fn duplicate_label_tuples_keep_last_value() {
    let source = Arc::new(FixtureSource::default().with_region(
        "a",
        vec![
            Some(vec![price("a1", "t1", "0.05")]),
            Some(vec![price("a1", "t1", "0.09"), price("a1", "t2", "0.10")]),
        ],
    ));
    let exporter = assert_ok!(Exporter::new(source, spot_config(&["a"]), Duration::ZERO));

    let text = assert_ok!(exporter.render().await);
    let lines = price_lines(&text);

    assert_eq!(lines.len(), 2, "{text}");
    let t1 = lines
        .iter()
        .find(|l| l.contains("instance_type=\"t1\""))
        .expect("t1 sample");
    assert!(t1.ends_with(" 0.09"));
    assert_eq!(gauge(&text, "aws_ec2_price_scrape_errors"), 0.0);
}

#[tokio::test]
async fn rescrape_drops_samples_from_previous_cycle() {
    let source = Arc::new(
        FixtureSource::default().with_region("a", vec![Some(vec![price("a1", "t1", "0.05")])]),
    );
    let exporter = assert_ok!(Exporter::new(
        Arc::clone(&source) as Arc<dyn PriceSource>,
        spot_config(&["a"]),
        Duration::ZERO,
    ));
    let first = assert_ok!(exporter.render().await);
    assert_eq!(price_lines(&first).len(), 1);

    source.set_region("a", vec![Some(vec![price("a2", "t9", "1.5")])]);
    let second = assert_ok!(exporter.render().await);
    let lines = price_lines(&second);

    assert_eq!(lines.len(), 1, "{second}");
    assert!(lines[0].contains("availability_zone=\"a2\""));
    assert!(lines[0].ends_with(" 1.5"));
    assert_eq!(gauge(&second, "aws_ec2_price_scrapes_total"), 2.0);
}

#[tokio::test]
async fn clean_rescrape_resets_error_gauge() {
    let source = Arc::new(
        FixtureSource::default().with_region("a", vec![Some(vec![price("a1", "t1", "bad")])]),
    );
    let exporter = assert_ok!(Exporter::new(
        Arc::clone(&source) as Arc<dyn PriceSource>,
        spot_config(&["a"]),
        Duration::ZERO,
    ));
    let failing = assert_ok!(exporter.render().await);
    assert_eq!(gauge(&failing, "aws_ec2_price_scrape_errors"), 1.0);

    source.set_region("a", vec![Some(vec![price("a1", "t1", "0.05")])]);
    let clean = assert_ok!(exporter.render().await);

    assert_eq!(gauge(&clean, "aws_ec2_price_scrape_errors"), 0.0);
    assert_eq!(price_lines(&clean).len(), 1);
    assert_eq!(gauge(&clean, "aws_ec2_price_scrapes_total"), 2.0);
}

#[tokio::test]
async fn failed_scrape_still_opens_cache_window() {
    let source = Arc::new(FixtureSource::default().with_region("a", vec![None]));
    let exporter = assert_ok!(Exporter::new(
        Arc::clone(&source) as Arc<dyn PriceSource>,
        spot_config(&["a"]),
        Duration::from_secs(60),
    ));

    let start = Instant::now();
    let first = assert_ok!(encode_text(&exporter.collect_snapshot_at(start).await));
    assert_eq!(gauge(&first, "aws_ec2_price_scrape_errors"), 1.0);

    source.set_region("a", vec![Some(vec![price("a1", "t1", "0.05")])]);
    let cached = assert_ok!(encode_text(
        &exporter.collect_snapshot_at(start + Duration::from_secs(10)).await
    ));

    assert_eq!(first, cached);
    assert!(price_lines(&cached).is_empty());
    assert_eq!(gauge(&cached, "aws_ec2_price_scrapes_total"), 1.0);
    assert_eq!(source.spot_calls.load(Ordering::SeqCst), 1);
}
