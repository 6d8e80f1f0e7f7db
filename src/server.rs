//! HTTP surface: root page, metrics endpoint and health check.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use tracing::{error, info};

use crate::errors::ExporterError;
use crate::exporter::Exporter;

/// Accepts `host:port`, or `:port` for every interface.
pub fn parse_listen_address(raw: &str) -> Result<SocketAddr, ExporterError> {
    let candidate = if raw.starts_with(':') {
        format!("0.0.0.0{raw}")
    } else {
        raw.to_string()
    };
    candidate
        .parse()
        .map_err(|e| ExporterError::Addr(raw.to_string(), e))
}

fn root_page(metrics_path: &str) -> String {
    format!(
        "<html>\n\
         <head><title>AWS EC2 Price Exporter</title></head>\n\
         <body>\n\
         <h1>AWS EC2 Price Exporter</h1>\n\
         <p><a href=\"{metrics_path}\">Metrics</a></p>\n\
         </body>\n\
         </html>\n"
    )
}

fn with_status(status: StatusCode, body: Body) -> Response<Body> {
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    resp
}

/// Route one request.
pub async fn handle(
    req: Request<Body>,
    exporter: Arc<Exporter>,
    metrics_path: Arc<str>,
) -> Response<Body> {
    if req.method() != Method::GET {
        return with_status(StatusCode::METHOD_NOT_ALLOWED, Body::empty());
    }

    match req.uri().path() {
        // ─── METRICS ENDPOINT ────────────────────────────────
        path if path == &*metrics_path => match exporter.render().await {
            Ok(text) => {
                // Prometheus rejects scrapes without the exposition content type.
                let mut resp = Response::new(Body::from(text));
                resp.headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT));
                resp
            }
            Err(e) => {
                error!(error = %e, "Failed to encode metrics");
                with_status(StatusCode::INTERNAL_SERVER_ERROR, Body::from(e.to_string()))
            }
        },

        // ─── ROOT PAGE ──────────────────────────────────────
        "/" => {
            let mut resp = Response::new(Body::from(root_page(&metrics_path)));
            resp.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
            resp
        }

        // ─── HEALTHCHECK ENDPOINT ───────────────────────────
        "/healthz" => Response::new(Body::from("OK")),

        _ => with_status(StatusCode::NOT_FOUND, Body::empty()),
    }
}

/// Serve until the listener fails.
pub async fn serve(
    addr: SocketAddr,
    exporter: Arc<Exporter>,
    metrics_path: &str,
) -> Result<(), ExporterError> {
    let metrics_path: Arc<str> = Arc::from(metrics_path);

    let make_svc = make_service_fn(move |_conn| {
        let exporter = Arc::clone(&exporter);
        let metrics_path = Arc::clone(&metrics_path);
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let exporter = Arc::clone(&exporter);
                let metrics_path = Arc::clone(&metrics_path);
                async move { Ok::<_, Infallible>(handle(req, exporter, metrics_path).await) }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    info!(addr = %server.local_addr(), "Starting metric http endpoint");
    server.await?;
    Ok(())
}
