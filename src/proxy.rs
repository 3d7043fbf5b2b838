//! Pingora-based dispatcher and server front.
//!
//! The [`Dispatcher`] is the single request handler of the proxy. For each
//! request it looks up the Host value in the [`RouteTable`]:
//! - **Routed**: the request is forwarded through the matched upstream handle
//! - **Unrouted**: a 404 is written and no upstream is contacted
//!
//! Upstream failures (refused, timed out, unresolvable) become a 502.

use crate::config::AppConfig;
use crate::error::{ProxyError, Result};
use crate::routes::RouteTable;
use crate::upstream::UpstreamHandle;
use async_trait::async_trait;
use bytes::Bytes;
use http::header;
use pingora_core::server::configuration::{Opt, ServerConf};
use pingora_core::server::Server;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_core::{Error, ErrorSource, ErrorType};
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::{http_proxy_service, FailToProxy, ProxyHttp, Session};
use std::sync::Arc;
use tracing::{debug, error, info, trace};

/// Body of the response sent for hosts without a route.
pub const NOT_FOUND_BODY: &[u8] = b"404 page not found\n";

/// Outcome of the route lookup for one request.
#[derive(Debug, Clone)]
pub enum Dispatch {
    /// A route exists; forward through this handle.
    Routed(Arc<UpstreamHandle>),
    /// No route for the host (or no host at all).
    Unrouted,
}

impl Dispatch {
    /// Whether the request has a route.
    pub fn is_routed(&self) -> bool {
        matches!(self, Dispatch::Routed(_))
    }
}

/// Context maintained across the request lifecycle.
#[derive(Debug, Default)]
pub struct DispatchContext {
    /// The Host value of the request, if any.
    pub host: Option<String>,

    /// The matched upstream, set only for routed requests.
    pub upstream: Option<Arc<UpstreamHandle>>,
}

/// Extracts the virtual host of a request.
///
/// The request-target authority (absolute-form, HTTP/2 `:authority`) takes
/// precedence over the Host header, which is only consulted when the
/// target carries no authority.
pub fn request_host(req: &RequestHeader) -> Option<&str> {
    req.uri
        .authority()
        .map(|a| a.as_str())
        .filter(|h| !h.is_empty())
        .or_else(|| {
            req.headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .filter(|h| !h.is_empty())
        })
}

/// The proxy's request handler.
///
/// Holds only the shared, read-only route table, so one instance serves
/// every connection concurrently.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    routes: Arc<RouteTable>,
}

impl Dispatcher {
    /// Creates a dispatcher over a finished route table.
    pub fn new(routes: Arc<RouteTable>) -> Self {
        Self { routes }
    }

    /// The route table this dispatcher reads.
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Decides where a request for `host` goes.
    pub fn dispatch(&self, host: Option<&str>) -> Dispatch {
        match host.and_then(|h| self.routes.resolve(h)) {
            Some(handle) => Dispatch::Routed(Arc::clone(handle)),
            None => Dispatch::Unrouted,
        }
    }
}

/// Writes a complete plain-text response and ends the stream.
async fn respond(session: &mut Session, status: u16, body: &'static [u8]) -> pingora_core::Result<()> {
    let mut resp = ResponseHeader::build(status, Some(3))?;
    resp.insert_header(header::CONTENT_TYPE, "text/plain; charset=utf-8")?;
    resp.insert_header(header::CONTENT_LENGTH, body.len().to_string())?;

    let end_on_header = body.is_empty();
    session
        .write_response_header(Box::new(resp), end_on_header)
        .await?;
    if !end_on_header {
        session
            .write_response_body(Some(Bytes::from_static(body)), true)
            .await?;
    }
    Ok(())
}

#[async_trait]
impl ProxyHttp for Dispatcher {
    type CTX = DispatchContext;

    fn new_ctx(&self) -> Self::CTX {
        DispatchContext::default()
    }

    /// Looks up the route and answers unrouted requests directly.
    async fn request_filter(
        &self,
        session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> pingora_core::Result<bool>
    where
        Self::CTX: Send + Sync,
    {
        let host = request_host(session.req_header()).map(str::to_string);

        let dispatch = self.dispatch(host.as_deref());
        ctx.host = host;
        trace!(
            host = ctx.host.as_deref().unwrap_or("-"),
            routed = dispatch.is_routed(),
            "Dispatched request"
        );

        match dispatch {
            Dispatch::Routed(handle) => {
                debug!(
                    host = ctx.host.as_deref().unwrap_or("-"),
                    upstream = %handle.target(),
                    tls = handle.uses_tls(),
                    "Forwarding request"
                );
                ctx.upstream = Some(handle);
                Ok(false)
            }
            Dispatch::Unrouted => {
                info!(
                    host = ctx.host.as_deref().unwrap_or("-"),
                    path = %session.req_header().uri.path(),
                    "No route for host"
                );
                respond(session, 404, NOT_FOUND_BODY).await?;
                Ok(true)
            }
        }
    }

    /// Determines the upstream peer to connect to.
    async fn upstream_peer(
        &self,
        _session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> pingora_core::Result<Box<HttpPeer>> {
        let handle = ctx.upstream.as_ref().ok_or_else(|| {
            Error::explain(ErrorType::InternalError, "request has no routed upstream")
        })?;

        Ok(Box::new(handle.peer()?))
    }

    /// Points the request at the upstream before it is sent.
    async fn upstream_request_filter(
        &self,
        session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> pingora_core::Result<()> {
        let handle = ctx.upstream.as_ref().ok_or_else(|| {
            Error::explain(ErrorType::InternalError, "request has no routed upstream")
        })?;

        let client_ip = session
            .downstream_session
            .client_addr()
            .and_then(|addr| addr.as_inet())
            .map(|inet| inet.ip());

        handle.rewrite_request(upstream_request, client_ip)
    }

    /// Turns forwarding failures into a 502 for the client.
    async fn fail_to_proxy(
        &self,
        session: &mut Session,
        e: &Error,
        ctx: &mut Self::CTX,
    ) -> FailToProxy
    where
        Self::CTX: Send + Sync,
    {
        let error_code = match e.etype() {
            ErrorType::HTTPStatus(code) => *code,
            _ => match e.esource() {
                // The client is gone or misbehaved; nobody to answer.
                ErrorSource::Downstream => 0,
                _ => 502,
            },
        };

        error!(
            error = %e,
            host = ctx.host.as_deref().unwrap_or("-"),
            upstream = ctx.upstream.as_ref().map(|h| h.target()).unwrap_or("-"),
            status = error_code,
            "Proxy error"
        );

        if error_code > 0 && session.response_written().is_none() {
            if let Err(write_err) = respond(session, error_code, b"").await {
                debug!(error = %write_err, "Failed to write error response");
            }
        }

        FailToProxy {
            error_code,
            can_reuse_downstream: false,
        }
    }

    /// Logging after request completion.
    async fn logging(&self, session: &mut Session, e: Option<&Error>, ctx: &mut Self::CTX) {
        let status = session
            .response_written()
            .map(|r| r.status.as_u16())
            .unwrap_or(0);

        debug!(
            method = %session.req_header().method,
            host = ctx.host.as_deref().unwrap_or("-"),
            upstream = ctx.upstream.as_ref().map(|h| h.target()).unwrap_or("-"),
            status = status,
            error = e.map(|err| err.to_string()).as_deref().unwrap_or(""),
            "Request completed"
        );
    }
}

/// The listening side of the proxy: one Pingora server running one HTTP
/// proxy service driven by a [`Dispatcher`].
pub struct ServerFront {
    server: Server,
    listen: String,
    tls: bool,
}

impl ServerFront {
    /// Builds the server with a plaintext or TLS listener from `config`.
    ///
    /// Nothing is bound until [`ServerFront::run`].
    pub fn build(config: &AppConfig, dispatcher: Dispatcher) -> Result<Self> {
        let mut conf = ServerConf::default();
        if config.server.threads > 0 {
            conf.threads = config.server.threads;
        }

        let mut server = Server::new_with_opt_and_conf(Opt::default(), conf);
        server.bootstrap();

        let tls = config.tls.enabled;
        let listen = config.server.effective_listen(tls);

        let mut service = http_proxy_service(&server.configuration, dispatcher);
        if tls {
            service
                .add_tls(&listen, &config.tls.cert, &config.tls.key)
                .map_err(|e| {
                    ProxyError::server(format!(
                        "cannot set up TLS listener on {} (cert {}, key {}): {}",
                        listen, config.tls.cert, config.tls.key, e
                    ))
                })?;
        } else {
            service.add_tcp(&listen);
        }
        server.add_service(service);

        Ok(Self {
            server,
            listen,
            tls,
        })
    }

    /// The address the listener binds to.
    pub fn listen(&self) -> &str {
        &self.listen
    }

    /// Whether the listener terminates TLS.
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Serves until the process is told to stop.
    pub fn run(self) -> ! {
        info!(
            listen = %self.listen,
            tls = self.tls,
            "Starting HTTP{} server",
            if self.tls { "S" } else { "" }
        );
        self.server.run_forever()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::RouteDefinition;
    use crate::upstream::UpstreamTimeouts;
    use http::Method;

    fn create_test_dispatcher() -> Dispatcher {
        let table = RouteTable::build(
            &[
                RouteDefinition::new("a.example", "http://127.0.0.1:9001"),
                RouteDefinition::new("b.example", "http://127.0.0.1:9002"),
            ],
            UpstreamTimeouts::default(),
        )
        .unwrap();
        Dispatcher::new(Arc::new(table))
    }

    #[test]
    fn test_dispatch_hit() {
        let dispatcher = create_test_dispatcher();

        match dispatcher.dispatch(Some("a.example")) {
            Dispatch::Routed(handle) => assert_eq!(handle.target(), "http://127.0.0.1:9001"),
            Dispatch::Unrouted => panic!("Expected a.example to be routed"),
        }
        match dispatcher.dispatch(Some("b.example")) {
            Dispatch::Routed(handle) => assert_eq!(handle.target(), "http://127.0.0.1:9002"),
            Dispatch::Unrouted => panic!("Expected b.example to be routed"),
        }
    }

    #[test]
    fn test_dispatch_miss() {
        let dispatcher = create_test_dispatcher();
        assert!(!dispatcher.dispatch(Some("c.example")).is_routed());
        assert!(!dispatcher.dispatch(Some("")).is_routed());
        assert!(!dispatcher.dispatch(None).is_routed());
    }

    #[test]
    fn test_request_host_from_header() {
        let mut req = RequestHeader::build(Method::GET, b"/foo?x=1", None).unwrap();
        req.insert_header(header::HOST, "a.example").unwrap();
        assert_eq!(request_host(&req), Some("a.example"));
    }

    #[test]
    fn test_request_host_keeps_port() {
        let mut req = RequestHeader::build(Method::GET, b"/", None).unwrap();
        req.insert_header(header::HOST, "a.example:8080").unwrap();
        assert_eq!(request_host(&req), Some("a.example:8080"));
    }

    #[test]
    fn test_request_host_from_authority() {
        let mut req = RequestHeader::build(Method::GET, b"/foo", None).unwrap();
        req.set_uri("http://b.example/foo".parse().unwrap());
        assert_eq!(request_host(&req), Some("b.example"));
    }

    #[test]
    fn test_request_host_prefers_authority_over_header() {
        let mut req = RequestHeader::build(Method::GET, b"/", None).unwrap();
        req.set_uri("http://b.example/".parse().unwrap());
        req.insert_header(header::HOST, "a.example").unwrap();
        assert_eq!(request_host(&req), Some("b.example"));

        let dispatcher = create_test_dispatcher();
        match dispatcher.dispatch(request_host(&req)) {
            Dispatch::Routed(handle) => assert_eq!(handle.target(), "http://127.0.0.1:9002"),
            Dispatch::Unrouted => panic!("Expected b.example to be routed"),
        }
    }

    #[test]
    fn test_request_host_missing() {
        let req = RequestHeader::build(Method::GET, b"/", None).unwrap();
        assert_eq!(request_host(&req), None);
    }

    #[test]
    fn test_new_ctx() {
        let dispatcher = create_test_dispatcher();
        assert_eq!(dispatcher.routes().len(), 2);
        let ctx = dispatcher.new_ctx();
        assert!(ctx.host.is_none());
        assert!(ctx.upstream.is_none());
    }

    #[test]
    fn test_build_plaintext_front() {
        let config = AppConfig {
            server: crate::config::ServerConfig {
                listen: Some("127.0.0.1:0".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let front = ServerFront::build(&config, create_test_dispatcher()).unwrap();
        assert_eq!(front.listen(), "127.0.0.1:0");
        assert!(!front.is_tls());
    }

    #[test]
    fn test_build_tls_front_missing_cert() {
        let mut config = AppConfig::default();
        config.server.listen = Some("127.0.0.1:0".to_string());
        config.tls.enabled = true;
        config.tls.cert = "/nonexistent/cert.pem".to_string();
        config.tls.key = "/nonexistent/key.pem".to_string();

        let result = ServerFront::build(&config, create_test_dispatcher());
        assert!(matches!(result, Err(ProxyError::Server { .. })));
    }
}
