//! Gatehouse Server
//!
//! Reverse proxy that gates every request before it reaches the origin

use anyhow::Context;
use clap::Parser;
use gatehouse::transport::HOP_BY_HOP;
use gatehouse::{Decision, DenialResponse, ForwardingMetadata, GateConfig, GateRequest, Gateway};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderName, HeaderValue};
use hyper::http::request::Parts;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

type ProxyBody = BoxBody<Bytes, hyper::Error>;

#[derive(Parser, Debug)]
#[command(name = "gatehouse-server")]
#[command(about = "Consent and capability gate in front of an HTTP origin")]
struct Args {
    /// Path to a TOML configuration file (built-in defaults if omitted)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Bind address, overrides server.listen
    #[arg(short = 'l', long)]
    listen: Option<String>,

    /// Origin base URL, overrides server.origin
    #[arg(short = 'o', long)]
    origin: Option<String>,
}

struct Proxy {
    gateway: Gateway,
    client: Client<HttpConnector, Incoming>,
    origin: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    info!("Starting Gatehouse Server");

    let mut config = match &args.config {
        Some(path) => GateConfig::load(path)
            .with_context(|| format!("failed to load configuration from {:?}", path))?,
        None => {
            info!("No configuration file given, using built-in rule tables");
            GateConfig::default()
        }
    };
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(origin) = args.origin {
        config.server.origin = origin;
    }

    let gateway = Gateway::from_config(&config).context("invalid configuration")?;
    info!(
        "Gate mode: {:?}, {} consent rules, {} capability rules, cache capacity {}",
        gateway.selection(),
        gateway.engine().consent_rules().len(),
        gateway.engine().capability_rules().len(),
        config.cache.capacity
    );

    let addr: SocketAddr = config
        .server
        .listen
        .parse()
        .with_context(|| format!("invalid listen address '{}'", config.server.listen))?;

    let proxy = Arc::new(Proxy {
        gateway,
        client: Client::builder(TokioExecutor::new()).build_http(),
        origin: config.server.origin.trim_end_matches('/').to_string(),
    });

    info!("Forwarding allowed requests to {}", proxy.origin);

    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    let http_server = ConnBuilder::new(TokioExecutor::new());

    info!("Gateway listening on http://{}", local_addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((socket, _)) => {
                        let proxy = proxy.clone();
                        let http_server = http_server.clone();
                        tokio::spawn(async move {
                            let service = service_fn(move |req| handle(proxy.clone(), req));
                            let conn = http_server.serve_connection(TokioIo::new(socket), service);
                            if let Err(e) = conn.await {
                                debug!("Connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    info!("Server stopped");

    Ok(())
}

async fn handle(
    proxy: Arc<Proxy>,
    request: Request<Incoming>,
) -> Result<Response<ProxyBody>, Infallible> {
    let (parts, body) = request.into_parts();
    let gate_request = gate_request(&parts);

    match proxy.gateway.evaluate(&gate_request) {
        Decision::Deny(denial) => {
            info!(
                "{} {} -> {} {}",
                gate_request.method, gate_request.path, denial.status, denial.reason
            );
            Ok(denial_response(&denial))
        }
        Decision::Forward(metadata) => {
            match forward(&proxy, &gate_request, body, &metadata).await {
                Ok(response) => Ok(response),
                Err(e) => {
                    warn!(
                        "Origin request failed for {} {}: {}",
                        gate_request.method, gate_request.path, e
                    );
                    Ok(plain_response(StatusCode::BAD_GATEWAY, "origin unavailable"))
                }
            }
        }
    }
}

fn gate_request(parts: &Parts) -> GateRequest {
    let mut request = GateRequest::new(parts.method.as_str(), parts.uri.path());
    if let Some(query) = parts.uri.query() {
        request = request.with_query(query);
    }
    for (name, value) in &parts.headers {
        // Non-UTF-8 values are neither gated nor forwarded
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }
    request
}

async fn forward(
    proxy: &Proxy,
    request: &GateRequest,
    body: Incoming,
    metadata: &ForwardingMetadata,
) -> anyhow::Result<Response<ProxyBody>> {
    let outbound = request.outbound(metadata);
    let uri: Uri = format!("{}{}", proxy.origin, outbound.target).parse()?;

    let mut origin_request = Request::builder()
        .method(Method::from_bytes(outbound.method.as_bytes())?)
        .uri(uri)
        .version(hyper::Version::HTTP_11)
        .body(body)?;

    let origin_headers = origin_request.headers_mut();
    for (name, value) in &outbound.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                origin_headers.append(name, value);
            }
            _ => warn!("Skipping unrepresentable header {}", name),
        }
    }

    let response = proxy.client.request(origin_request).await?;
    let (mut parts, body) = response.into_parts();
    strip(&mut parts.headers, HOP_BY_HOP);
    apply(&mut parts.headers, &metadata.response_headers);

    Ok(Response::from_parts(parts, body.boxed()))
}

fn strip(headers: &mut HeaderMap, names: &[&str]) {
    for name in names {
        headers.remove(*name);
    }
}

fn apply(headers: &mut HeaderMap, pairs: &[(&'static str, String)]) {
    for (name, value) in pairs {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!("Skipping unrepresentable header {}", name),
        }
    }
}

fn denial_response(denial: &DenialResponse) -> Response<ProxyBody> {
    let mut response = Response::new(full(denial.body_json()));
    *response.status_mut() =
        StatusCode::from_u16(denial.status).unwrap_or(StatusCode::FORBIDDEN);
    apply(response.headers_mut(), &denial.headers);
    response
}

fn plain_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let mut response = Response::new(full(message.to_string()));
    *response.status_mut() = status;
    response
}

fn full(body: String) -> ProxyBody {
    Full::new(Bytes::from(body))
        .map_err(|never| match never {})
        .boxed()
}
