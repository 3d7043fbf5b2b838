//! Upstream proxy handles.
//!
//! An [`UpstreamHandle`] is bound to exactly one target base URL. It knows
//! how to reach that upstream (as a Pingora [`HttpPeer`]) and how to rewrite
//! an inbound request so the upstream sees its own authority while the
//! method, path, query and body pass through untouched.

use crate::error::{ProxyError, Result};
use http::{header, Uri};
use pingora_core::upstreams::peer::HttpPeer;
use pingora_core::{Error, ErrorType};
use pingora_http::RequestHeader;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Duration;
use tracing::{trace, warn};

/// Deadlines applied to upstream connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamTimeouts {
    /// TCP (and TLS) connect deadline.
    pub connect: Duration,

    /// Maximum wait for each upstream read.
    pub read: Duration,

    /// Maximum wait for each upstream write.
    pub write: Duration,
}

impl Default for UpstreamTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            read: Duration::from_secs(60),
            write: Duration::from_secs(60),
        }
    }
}

/// Forwarding handle for a single upstream base URL.
///
/// Immutable after construction, so one handle is shared by every
/// concurrent request for its host.
#[derive(Debug, Clone)]
pub struct UpstreamHandle {
    /// The target URL as configured.
    target: String,

    /// Whether the upstream speaks TLS.
    tls: bool,

    /// Host part of the target, without IPv6 brackets.
    host: String,

    /// Port to connect to (explicit or scheme default).
    port: u16,

    /// Value sent as the Host header upstream.
    authority: String,

    /// Path prefix of the target URL.
    base_path: String,

    /// Query string of the target URL.
    base_query: Option<String>,

    /// Connection deadlines.
    timeouts: UpstreamTimeouts,
}

impl UpstreamHandle {
    /// Parses `target` as an absolute http(s) URL and binds a handle to it.
    ///
    /// `host` is only used to give the error some context.
    pub fn parse(host: &str, target: &str, timeouts: UpstreamTimeouts) -> Result<Self> {
        let uri: Uri = target
            .parse()
            .map_err(|e: http::uri::InvalidUri| ProxyError::invalid_target(host, target, e.to_string()))?;

        let tls = match uri.scheme_str() {
            Some("http") => false,
            Some("https") => true,
            Some(other) => {
                return Err(ProxyError::invalid_target(
                    host,
                    target,
                    format!("unsupported scheme {:?}", other),
                ))
            }
            None => return Err(ProxyError::invalid_target(host, target, "missing scheme")),
        };

        let authority = uri
            .authority()
            .ok_or_else(|| ProxyError::invalid_target(host, target, "missing authority"))?;

        let upstream_host = authority.host();
        if upstream_host.is_empty() {
            return Err(ProxyError::invalid_target(host, target, "missing host"));
        }

        let port = authority.port_u16().unwrap_or(if tls { 443 } else { 80 });

        // Drop any userinfo; the Host header only carries host[:port].
        let host_header = match authority.port_u16() {
            Some(p) => format!("{}:{}", upstream_host, p),
            None => upstream_host.to_string(),
        };

        Ok(Self {
            target: target.to_string(),
            tls,
            host: upstream_host
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string(),
            port,
            authority: host_header,
            base_path: uri.path().to_string(),
            base_query: uri.query().map(str::to_string),
            timeouts,
        })
    }

    /// The configured target URL.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The `host[:port]` value the upstream receives in its Host header.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Whether connections to the upstream use TLS.
    pub fn uses_tls(&self) -> bool {
        self.tls
    }

    /// Builds the Pingora peer for this upstream.
    ///
    /// Name resolution happens here, per request, so building the route
    /// table never touches the network.
    pub fn peer(&self) -> pingora_core::Result<HttpPeer> {
        let addr = self.resolve().ok_or_else(|| {
            warn!(upstream = %self.target, "Upstream name resolution failed");
            Error::explain(
                ErrorType::ConnectNoRoute,
                format!("cannot resolve upstream {}", self.host),
            )
        })?;

        let mut peer = HttpPeer::new(addr, self.tls, self.host.clone());
        peer.options.connection_timeout = Some(self.timeouts.connect);
        peer.options.total_connection_timeout = Some(self.timeouts.connect);
        peer.options.read_timeout = Some(self.timeouts.read);
        peer.options.write_timeout = Some(self.timeouts.write);

        Ok(peer)
    }

    fn resolve(&self) -> Option<SocketAddr> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Some(SocketAddr::new(ip, self.port));
        }
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
    }

    /// Computes the origin-form path and query sent upstream for `uri`.
    ///
    /// The request path is appended to the target's base path with exactly
    /// one slash between them, and the target's query is prepended to the
    /// request's query.
    pub fn upstream_path(&self, uri: &Uri) -> String {
        let path = join_paths(&self.base_path, uri.path());

        let query = match (self.base_query.as_deref(), uri.query()) {
            (Some(base), Some(req)) if !base.is_empty() && !req.is_empty() => {
                Some(format!("{}&{}", base, req))
            }
            (Some(base), None) | (Some(base), Some("")) => Some(base.to_string()),
            (None, Some(req)) | (Some(""), Some(req)) => Some(req.to_string()),
            _ => None,
        };

        match query {
            Some(q) if !q.is_empty() => format!("{}?{}", path, q),
            _ => path,
        }
    }

    /// Rewrites the outgoing request header to target this upstream.
    ///
    /// Sets the URI to origin-form, replaces Host with the upstream
    /// authority and appends the client address to `X-Forwarded-For`,
    /// folding repeated headers into one comma-separated chain.
    pub fn rewrite_request(
        &self,
        request: &mut RequestHeader,
        client_ip: Option<IpAddr>,
    ) -> pingora_core::Result<()> {
        let path_and_query = self.upstream_path(&request.uri);
        let uri = Uri::try_from(path_and_query.as_str()).map_err(|e| {
            Error::explain(
                ErrorType::InvalidHTTPHeader,
                format!("cannot build upstream uri {:?}: {}", path_and_query, e),
            )
        })?;
        request.set_uri(uri);

        request.insert_header(header::HOST, self.authority.as_str())?;

        if let Some(ip) = client_ip {
            let mut chain: Vec<String> = request
                .headers
                .get_all("X-Forwarded-For")
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect();
            chain.push(ip.to_string());
            request.insert_header("X-Forwarded-For", chain.join(", "))?;
        }

        trace!(
            method = %request.method,
            uri = %request.uri,
            upstream = %self.authority,
            "Rewrote request for upstream"
        );

        Ok(())
    }
}

/// Joins two URL paths with a single slash between them.
fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}
