//! # vhost-proxy
//!
//! A name-based virtual hosting reverse proxy built on Pingora. Each
//! configured route maps a virtual host to one upstream origin; requests are
//! forwarded to the upstream matching their Host, or answered with a 404
//! when no route exists.
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Error types and handling
//! - [`logging`]: Logging setup
//! - [`routes`]: Route definitions and the immutable route table
//! - [`upstream`]: Per-route upstream forwarding handles
//! - [`proxy`]: The dispatcher and the Pingora server front
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use vhost_proxy::{AppConfig, Dispatcher, RouteTable, ServerFront};
//!
//! let config = AppConfig::load("config.json")?;
//! let routes = RouteTable::build(&config.routes, config.server.upstream_timeouts())?;
//! let dispatcher = Dispatcher::new(Arc::new(routes));
//! ServerFront::build(&config, dispatcher)?.run();
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod routes;
pub mod upstream;

pub use config::AppConfig;
pub use error::{ProxyError, Result};
pub use proxy::{Dispatch, Dispatcher, ServerFront};
pub use routes::{RouteDefinition, RouteTable};
pub use upstream::{UpstreamHandle, UpstreamTimeouts};
