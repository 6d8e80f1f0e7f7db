//! Type-safe configuration loader using the `config` crate,
//! with manual environment-variable overrides for every setting.

use std::{env, time::Duration};

use config::{Config, ConfigError, File};
use serde::{Deserialize, Deserializer};

use crate::errors::ExporterError;
use crate::record::Lifecycle;

pub const PRODUCT_DESCRIPTIONS: [&str; 6] = [
    "Linux/UNIX",
    "SUSE Linux",
    "Windows",
    "Linux/UNIX (Amazon VPC)",
    "SUSE Linux (Amazon VPC)",
    "Windows (Amazon VPC)",
];

pub const OPERATING_SYSTEMS: [&str; 4] = ["Linux", "RHEL", "SUSE", "Windows"];

/// Top-level application settings loaded from `Config.toml`
/// and then overridden (where applicable) by environment variables.
///
/// List-valued options are kept as the raw comma-separated strings operators
/// write; [`Settings::scrape_config`] validates them into typed values.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    /// HTTP bind address for the metrics endpoint
    pub listen_address: String,

    /// Path the metrics are served on
    pub metrics_path: String,

    /// Fallback log filter when `RUST_LOG` is unset
    pub log_level: String,

    /// Spot price filter, e.g. "Linux/UNIX,Windows"
    pub product_descriptions: String,

    /// On-demand price filter, e.g. "Linux,RHEL"
    pub operating_systems: String,

    /// Region allow-list; empty means every enabled region
    pub regions: String,

    /// Partition allow-list; empty means every partition
    pub partitions: String,

    /// Pricing paths to scrape; empty means both
    pub lifecycles: String,

    /// Seconds a scrape result is served before the next scrape (0 = always scrape)
    #[serde(deserialize_with = "deserialize_seconds")]
    pub cache_ttl: Duration,

    /// Deadline for a single scrape unit (0 = none)
    #[serde(deserialize_with = "deserialize_seconds")]
    pub unit_timeout: Duration,

    /// Base URL of the pricing gateway
    pub pricing_endpoint: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            listen_address: "0.0.0.0:8080".to_string(),
            metrics_path: "/metrics".to_string(),
            log_level: "info".to_string(),
            product_descriptions: "Linux/UNIX".to_string(),
            operating_systems: "Linux".to_string(),
            regions: String::new(),
            partitions: String::new(),
            lifecycles: String::new(),
            cache_ttl: Duration::ZERO,
            unit_timeout: Duration::from_secs(60),
            pricing_endpoint: "http://127.0.0.1:8081".to_string(),
        }
    }
}

/// AWS partition a region belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Aws,
    AwsCn,
    AwsUsGov,
}

impl Partition {
    pub const ALL: [Partition; 3] = [Partition::Aws, Partition::AwsCn, Partition::AwsUsGov];

    pub fn as_str(self) -> &'static str {
        match self {
            Partition::Aws => "aws",
            Partition::AwsCn => "aws-cn",
            Partition::AwsUsGov => "aws-us-gov",
        }
    }

    pub fn for_region(region: &str) -> Partition {
        if region.starts_with("cn-") {
            Partition::AwsCn
        } else if region.starts_with("us-gov-") {
            Partition::AwsUsGov
        } else {
            Partition::Aws
        }
    }

    fn parse(value: &str) -> Result<Partition, ExporterError> {
        Partition::ALL
            .into_iter()
            .find(|p| p.as_str() == value)
            .ok_or_else(|| ExporterError::InvalidValue {
                option: "partition",
                value: value.to_string(),
                accepted: "aws, aws-cn, aws-us-gov".to_string(),
            })
    }
}

/// Validated scrape dimensions handed to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeConfig {
    pub product_descriptions: Vec<String>,
    pub operating_systems: Vec<String>,
    /// Empty means "ask the provider".
    pub regions: Vec<String>,
    /// Empty means every partition.
    pub partitions: Vec<Partition>,
    pub lifecycles: Vec<Lifecycle>,
    pub unit_timeout: Option<Duration>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        ScrapeConfig {
            product_descriptions: vec!["Linux/UNIX".to_string()],
            operating_systems: vec!["Linux".to_string()],
            regions: Vec::new(),
            partitions: Vec::new(),
            lifecycles: Lifecycle::ALL.to_vec(),
            unit_timeout: None,
        }
    }
}

impl ScrapeConfig {
    pub fn scrapes(&self, lifecycle: Lifecycle) -> bool {
        self.lifecycles.contains(&lifecycle)
    }

    pub fn in_partitions(&self, region: &str) -> bool {
        self.partitions.is_empty() || self.partitions.contains(&Partition::for_region(region))
    }
}

impl Settings {
    /// Load settings from `Config.toml` (if present),
    /// then apply any overrides from `APP__<KEY>` environment variables,
    /// e.g. `APP__REGIONS`, `APP__CACHE_TTL`, `APP__LISTEN_ADDRESS`.
    pub fn new() -> Result<Self, ConfigError> {
        // 1) Base values from Config.toml
        let cfg = Config::builder()
            .add_source(File::with_name("Config").required(false))
            .build()?;

        let mut settings: Settings = cfg.try_deserialize()?;

        // 2) Manual overrides
        settings.apply_env(|key| env::var(key).ok())?;
        Ok(settings)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let strings: [(&str, &mut String); 9] = [
            ("APP__LISTEN_ADDRESS", &mut self.listen_address),
            ("APP__METRICS_PATH", &mut self.metrics_path),
            ("APP__LOG_LEVEL", &mut self.log_level),
            ("APP__PRODUCT_DESCRIPTIONS", &mut self.product_descriptions),
            ("APP__OPERATING_SYSTEMS", &mut self.operating_systems),
            ("APP__REGIONS", &mut self.regions),
            ("APP__PARTITIONS", &mut self.partitions),
            ("APP__LIFECYCLES", &mut self.lifecycles),
            ("APP__PRICING_ENDPOINT", &mut self.pricing_endpoint),
        ];
        for (key, field) in strings {
            if let Some(val) = lookup(key) {
                *field = val;
            }
        }
        if let Some(val) = lookup("APP__CACHE_TTL") {
            self.cache_ttl = parse_seconds(&val)?;
        }
        if let Some(val) = lookup("APP__UNIT_TIMEOUT") {
            self.unit_timeout = parse_seconds(&val)?;
        }
        Ok(())
    }

    /// Validate the filter options. Any unknown value is fatal.
    pub fn scrape_config(&self) -> Result<ScrapeConfig, ExporterError> {
        let product_descriptions = split_and_trim(&self.product_descriptions);
        validate_choices("product description", &product_descriptions, &PRODUCT_DESCRIPTIONS)?;

        let operating_systems = split_and_trim(&self.operating_systems);
        validate_choices("operating system", &operating_systems, &OPERATING_SYSTEMS)?;

        let regions = split_and_trim(&self.regions);
        for region in &regions {
            validate_region(region)?;
        }

        let partitions = split_and_trim(&self.partitions)
            .iter()
            .map(|p| Partition::parse(p))
            .collect::<Result<Vec<_>, _>>()?;

        let mut lifecycles = split_and_trim(&self.lifecycles)
            .iter()
            .map(|l| l.parse::<Lifecycle>())
            .collect::<Result<Vec<_>, _>>()?;
        if lifecycles.is_empty() {
            lifecycles = Lifecycle::ALL.to_vec();
        }

        Ok(ScrapeConfig {
            product_descriptions,
            operating_systems,
            regions,
            partitions,
            lifecycles,
            unit_timeout: (!self.unit_timeout.is_zero()).then_some(self.unit_timeout),
        })
    }
}

/// Accepts plain seconds ("60") or a humantime duration ("1m").
fn parse_seconds(val: &str) -> Result<Duration, ConfigError> {
    let val = val.trim();
    if let Ok(secs) = val.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(val).map_err(|e| ConfigError::Foreign(Box::new(e)))
}

/// Same forms as [`parse_seconds`], plus bare TOML integers.
fn deserialize_seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_seconds(&text).map_err(serde::de::Error::custom),
    }
}

pub fn split_and_trim(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn validate_choices(
    option: &'static str,
    values: &[String],
    accepted: &[&str],
) -> Result<(), ExporterError> {
    match values.iter().find(|v| !accepted.contains(&v.as_str())) {
        Some(bad) => Err(ExporterError::InvalidValue {
            option,
            value: bad.clone(),
            accepted: accepted.join(", "),
        }),
        None => Ok(()),
    }
}

fn validate_region(region: &str) -> Result<(), ExporterError> {
    let well_formed = region.contains('-')
        && region
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if well_formed {
        Ok(())
    } else {
        Err(ExporterError::InvalidValue {
            option: "region",
            value: region.to_string(),
            accepted: "region codes such as us-east-1".to_string(),
        })
    }
}
