//! Single-host HTTP reverse proxy
//!
//! Every inbound request is forwarded to one upstream target. The scheme
//! and host come from the target; path, query, method and body pass
//! through.

use axum::{
    body::{Body, HttpBody},
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode, Uri},
    response::IntoResponse,
    Router,
};
use hyper_util::rt::TokioExecutor;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::{rustls::ServerConfig, TlsAcceptor};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use url::Url;

use crate::error::{ProxyError, Result};

/// Hop-by-hop headers, never forwarded in either direction
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Whether `addr` starts with a lowercase scheme followed by `://`.
///
/// Only `[a-z]+://` counts; `HTTP://` or `s3://` are not recognized.
pub fn has_scheme(addr: &str) -> bool {
    match addr.find("://") {
        Some(end) if end > 0 => addr[..end].bytes().all(|b| b.is_ascii_lowercase()),
        _ => false,
    }
}

/// Build the upstream URL from a proxy address, defaulting to `http://`.
pub fn upstream_target(proxy_addr: &str) -> Result<Url> {
    let invalid = |reason: String| ProxyError::InvalidProxyTarget {
        target: proxy_addr.to_string(),
        reason,
    };

    let addr = if has_scheme(proxy_addr) {
        proxy_addr.to_string()
    } else {
        format!("http://{}", proxy_addr)
    };

    let mut url = Url::parse(&addr).map_err(|e| invalid(e.to_string()))?;

    if url.scheme().is_empty() {
        url.set_scheme("http")
            .map_err(|_| invalid("cannot set scheme".to_string()))?;
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }

    Ok(url)
}

/// Rewrite an inbound request URI against the upstream target.
///
/// Paths are joined with exactly one slash; queries are concatenated.
pub fn rewrite_uri(target: &Url, inbound: &Uri) -> Url {
    let mut url = target.clone();

    let base = target.path();
    let path = inbound.path();
    let joined = match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    };
    url.set_path(&joined);

    let query = match (target.query().filter(|q| !q.is_empty()), inbound.query()) {
        (Some(a), Some(b)) if !b.is_empty() => Some(format!("{}&{}", a, b)),
        (Some(a), _) => Some(a.to_string()),
        (None, Some(b)) if !b.is_empty() => Some(b.to_string()),
        _ => None,
    };
    url.set_query(query.as_deref());

    url
}

/// Remove hop-by-hop headers, including any named by `Connection`
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Summary of a proxied exchange, handed to the response hook
#[derive(Debug, Clone)]
pub struct ProxiedResponse {
    /// Upstream status code
    pub status: StatusCode,
    /// Request method
    pub method: axum::http::Method,
    /// Upstream URL the request was sent to
    pub url: Url,
}

/// Observer invoked for every upstream response
pub type ResponseHook = Arc<dyn Fn(&ProxiedResponse) + Send + Sync>;

/// Forwards requests to a single upstream target
pub struct ReverseProxy {
    target: Url,
    client: reqwest::Client,
    response_hook: Option<ResponseHook>,
}

impl ReverseProxy {
    /// Create a reverse proxy for `target`
    pub fn new(target: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|e| ProxyError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            target,
            client,
            response_hook: None,
        })
    }

    /// Upstream target
    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Install an observer for upstream responses
    pub fn set_response_hook<F>(&mut self, hook: F)
    where
        F: Fn(&ProxiedResponse) + Send + Sync + 'static,
    {
        self.response_hook = Some(Arc::new(hook));
    }

    /// Forward one request and stream back the upstream response
    ///
    /// The inbound `Host` header is passed through unchanged, so upstreams
    /// that check it see the name the client used.
    pub async fn forward(&self, req: Request<Body>) -> Response<Body> {
        let client_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let tls = req.extensions().get::<ServedOverTls>().is_some();

        let (parts, body) = req.into_parts();
        let url = rewrite_uri(&self.target, &parts.uri);

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);

        if let Some(host) = headers.get(header::HOST).cloned() {
            headers.insert("x-forwarded-host", host);
        }
        headers.insert(
            "x-forwarded-proto",
            HeaderValue::from_static(if tls { "https" } else { "http" }),
        );
        if let Some(ip) = client_ip {
            append_forwarded_for(&mut headers, &ip.to_string());
        }

        debug!("Forwarding {} {} to {}", parts.method, parts.uri, url);

        let mut upstream = self
            .client
            .request(parts.method.clone(), url.clone())
            .headers(headers);
        if !body.is_end_stream() {
            upstream = upstream.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream = upstream.send().await;

        let upstream = match upstream {
            Ok(response) => response,
            Err(e) => {
                error!("Backend error: {}", e);
                return (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response();
            }
        };

        if let Some(hook) = &self.response_hook {
            hook(&ProxiedResponse {
                status: upstream.status(),
                method: parts.method,
                url,
            });
        }

        let mut response = Response::builder().status(upstream.status());
        if let Some(headers) = response.headers_mut() {
            *headers = upstream.headers().clone();
            strip_hop_by_hop(headers);
        }

        response
            .body(Body::from_stream(upstream.bytes_stream()))
            .unwrap_or_else(|e| {
                error!("Failed to build response: {}", e);
                (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
            })
    }
}

impl fmt::Debug for ReverseProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReverseProxy")
            .field("target", &self.target.as_str())
            .field("response_hook", &self.response_hook.is_some())
            .finish()
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: &str) {
    let prior: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let value = if prior.is_empty() {
        ip.to_string()
    } else {
        format!("{}, {}", prior.join(", "), ip)
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}

/// Request extension marking a TLS connection
#[derive(Debug, Clone, Copy)]
struct ServedOverTls;

/// TLS-capable reverse proxy server
pub struct ProxyServer {
    port: u16,
    tls: Option<Arc<ServerConfig>>,
    proxy: ReverseProxy,
}

impl fmt::Debug for ProxyServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyServer")
            .field("port", &self.port)
            .field("tls", &self.is_tls())
            .field("proxy", &self.proxy)
            .finish()
    }
}

impl ProxyServer {
    /// Create a server on `port` forwarding through `proxy`.
    ///
    /// TLS is served only when a config is given.
    pub fn new(port: u16, tls: Option<ServerConfig>, proxy: ReverseProxy) -> Self {
        Self {
            port,
            tls: tls.map(Arc::new),
            proxy,
        }
    }

    /// Port the server binds
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address the server binds, on all interfaces
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    /// Whether TLS is configured
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// The reverse proxy handler
    pub fn reverse_proxy(&self) -> &ReverseProxy {
        &self.proxy
    }

    /// Mutable access to the handler, for attaching a response hook
    pub fn reverse_proxy_mut(&mut self) -> &mut ReverseProxy {
        &mut self.proxy
    }

    /// Bind `:<port>` and serve until the listener fails
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.listen_addr()).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let tls = self.tls.clone();
        let router = build_router(Arc::new(self.proxy));

        match tls {
            Some(config) => {
                info!("Starting HTTPS server on {}", listener.local_addr()?);
                serve_tls(listener, TlsAcceptor::from(config), router).await
            }
            None => {
                info!("Starting HTTP server on {}", listener.local_addr()?);
                axum::serve(
                    listener,
                    router.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .await?;
                Ok(())
            }
        }
    }
}

fn build_router(proxy: Arc<ReverseProxy>) -> Router {
    Router::new()
        .fallback(proxy_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(proxy)
}

async fn proxy_handler(State(proxy): State<Arc<ReverseProxy>>, req: Request<Body>) -> Response<Body> {
    proxy.forward(req).await
}

async fn serve_tls(listener: TcpListener, acceptor: TlsAcceptor, router: Router) -> Result<()> {
    use hyper::service::service_fn;
    use tower::ServiceExt;

    loop {
        let (stream, addr) = listener.accept().await?;
        let acceptor = acceptor.clone();
        let router = router.clone();

        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(tls_stream) => tls_stream,
                Err(e) => {
                    error!("TLS handshake failed from {}: {}", addr, e);
                    return;
                }
            };

            let io = hyper_util::rt::TokioIo::new(tls_stream);
            let service = service_fn(move |mut req: Request<hyper::body::Incoming>| {
                req.extensions_mut().insert(ConnectInfo(addr));
                req.extensions_mut().insert(ServedOverTls);
                router.clone().oneshot(req.map(Body::new))
            });

            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                debug!("Error serving connection from {}: {}", addr, e);
            }
        });
    }
}
