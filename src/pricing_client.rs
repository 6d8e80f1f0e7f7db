//! pricing_client.rs
//!
//! HTTP implementation of [`PriceSource`] talking JSON to a pricing gateway.
//! Response bodies mirror the provider's own shapes (`SpotPriceHistory`,
//! `PriceList`, `NextToken`), so a thin signing proxy in front of the real
//! APIs is enough to serve it.

use std::future::Future;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::errors::ExporterError;
use crate::source::{Page, PriceSource, SpotPrice};

const USER_AGENT: &str = concat!("ec2-price-exporter/", env!("CARGO_PKG_VERSION"));

/// Page size requested from the products endpoint.
const PRODUCTS_PAGE_SIZE: u32 = 100;

pub struct PricingClient {
    client: Client,
    endpoint: Url,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RegionsResponse {
    regions: Vec<RegionInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RegionInfo {
    region_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ZonesResponse {
    availability_zones: Vec<ZoneInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ZoneInfo {
    zone_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SpotPriceHistoryPage {
    #[serde(default)]
    spot_price_history: Vec<SpotPrice>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProductsPage {
    #[serde(default)]
    price_list: Vec<String>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ProductsRequest {
    service_code: &'static str,
    max_results: u32,
    filters: Vec<ProductFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ProductFilter {
    field: &'static str,
    #[serde(rename = "Type")]
    kind: &'static str,
    value: String,
}

impl ProductFilter {
    fn term(field: &'static str, value: &str) -> Self {
        ProductFilter {
            field,
            kind: "TERM_MATCH",
            value: value.to_string(),
        }
    }
}

impl PricingClient {
    /// Create a client for the gateway at `endpoint`.
    pub fn new(endpoint: &str) -> Result<Self, ExporterError> {
        let invalid = || ExporterError::InvalidValue {
            option: "pricing_endpoint",
            value: endpoint.to_string(),
            accepted: "absolute http(s) URLs".to_string(),
        };
        let endpoint_url = Url::parse(endpoint).map_err(|_| invalid())?;
        if endpoint_url.cannot_be_a_base() {
            return Err(invalid());
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ExporterError::Fetch(endpoint.to_string(), e))?;

        Ok(PricingClient {
            client,
            endpoint: endpoint_url,
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

/// Send a request and decode its JSON body, mapping every failure mode.
async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    context: String,
) -> Result<T, ExporterError> {
    let resp = request
        .send()
        .await
        .map_err(|e| ExporterError::Fetch(context.clone(), e))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(ExporterError::Status(context, status));
    }

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| ExporterError::Fetch(context.clone(), e))?;
    serde_json::from_slice(&bytes).map_err(|e| ExporterError::Decode(context, e))
}

/// Drive a token-paginated call as a stream of pages.
///
/// The first call gets no token; the stream ends after a page without a
/// `NextToken`, or right after the first failed page.
fn paginate<T, F, Fut>(fetch: F) -> BoxStream<'static, Page<T>>
where
    T: Send + 'static,
    F: FnMut(Option<String>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(Vec<T>, Option<String>), ExporterError>> + Send + 'static,
{
    // `Some(token)` = a page is still due, `None` = finished.
    let cursor: Option<Option<String>> = Some(None);
    stream::unfold((fetch, cursor), |(mut fetch, cursor)| async move {
        let token = cursor?;
        match fetch(token).await {
            Ok((items, next)) => {
                let next = next.filter(|t| !t.is_empty()).map(Some);
                Some((Ok(items), (fetch, next)))
            }
            Err(e) => Some((Err(e), (fetch, None))),
        }
    })
    .boxed()
}

impl PriceSource for PricingClient {
    fn regions(&self) -> BoxFuture<'_, Result<Vec<String>, ExporterError>> {
        let url = self.url(&["regions"]);
        Box::pin(async move {
            let resp: RegionsResponse =
                send_json(self.client.get(url.clone()), url.to_string()).await?;
            Ok::<_, ExporterError>(resp.regions.into_iter().map(|r| r.region_name).collect())
        })
    }

    fn availability_zones<'a>(
        &'a self,
        region: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, ExporterError>> {
        let url = self.url(&["regions", region, "availability-zones"]);
        Box::pin(async move {
            let resp: ZonesResponse =
                send_json(self.client.get(url.clone()), url.to_string()).await?;
            let zones = resp.availability_zones.into_iter().map(|z| z.zone_name);
            Ok::<_, ExporterError>(zones.collect())
        })
    }

    fn spot_prices(
        &self,
        region: &str,
        product_descriptions: &[String],
    ) -> BoxStream<'static, Page<SpotPrice>> {
        let client = self.client.clone();
        let url = self.url(&["regions", region, "spot-price-history"]);
        let filters: Vec<(&'static str, String)> = product_descriptions
            .iter()
            .map(|pd| ("ProductDescription", pd.clone()))
            .collect();

        paginate(move |token| {
            debug!(url = %url, token = ?token, "Requesting spot price page");
            let mut request = client.get(url.clone()).query(&filters);
            if let Some(token) = &token {
                request = request.query(&[("NextToken", token)]);
            }
            let context = url.to_string();
            async move {
                let page: SpotPriceHistoryPage = send_json(request, context).await?;
                Ok::<_, ExporterError>((page.spot_price_history, page.next_token))
            }
        })
    }

    fn on_demand_products(
        &self,
        region: &str,
        operating_system: &str,
    ) -> BoxStream<'static, Page<String>> {
        let client = self.client.clone();
        let url = self.url(&["products"]);
        let body = ProductsRequest {
            service_code: "AmazonEC2",
            max_results: PRODUCTS_PAGE_SIZE,
            filters: vec![
                ProductFilter::term("regionCode", region),
                ProductFilter::term("capacitystatus", "Used"),
                ProductFilter::term("tenancy", "Shared"),
                ProductFilter::term("preInstalledSw", "NA"),
                ProductFilter::term("operatingSystem", operating_system),
            ],
            next_token: None,
        };

        paginate(move |token| {
            debug!(url = %url, token = ?token, "Requesting products page");
            let body = ProductsRequest {
                next_token: token,
                ..body.clone()
            };
            let request = client.post(url.clone()).json(&body);
            let context = url.to_string();
            async move {
                let page: ProductsPage = send_json(request, context).await?;
                Ok::<_, ExporterError>((page.price_list, page.next_token))
            }
        })
    }
}
