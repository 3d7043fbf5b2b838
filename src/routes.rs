//! Route definitions and the host-to-upstream route table.
//!
//! The table is built once at startup from the configured routes, before
//! the server accepts connections, and is read-only afterwards. Lookups are
//! exact, case-sensitive matches on the host value as received.

use crate::error::{ProxyError, Result};
use crate::upstream::{UpstreamHandle, UpstreamTimeouts};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A single `host` to `target` association from the configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteDefinition {
    /// Virtual host value expected in the request's Host.
    pub host: String,

    /// Absolute URL of the upstream origin.
    pub target: String,
}

impl RouteDefinition {
    /// Creates a new route definition.
    pub fn new(host: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            target: target.into(),
        }
    }
}

/// Immutable mapping from virtual host to its upstream handle.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<String, Arc<UpstreamHandle>>,
}

impl RouteTable {
    /// Builds the table from route definitions in declaration order.
    ///
    /// Every target must parse as an absolute http(s) URL; the first one
    /// that does not aborts the build and no table is produced. When a host
    /// appears more than once the last definition wins.
    pub fn build(definitions: &[RouteDefinition], timeouts: UpstreamTimeouts) -> Result<Self> {
        let mut routes = HashMap::with_capacity(definitions.len());

        for definition in definitions {
            if definition.host.is_empty() {
                return Err(ProxyError::config_validation(format!(
                    "Route for target {} has an empty host",
                    definition.target
                )));
            }

            let handle = UpstreamHandle::parse(&definition.host, &definition.target, timeouts)?;

            debug!(
                host = %definition.host,
                target = %definition.target,
                "Registered route"
            );

            if let Some(previous) = routes.insert(definition.host.clone(), Arc::new(handle)) {
                warn!(
                    host = %definition.host,
                    previous = %previous.target(),
                    target = %definition.target,
                    "Duplicate host in routes, later definition wins"
                );
            }
        }

        info!(routes = routes.len(), "Route table built");

        Ok(Self { routes })
    }

    /// Looks up the handle for `host`.
    pub fn resolve(&self, host: &str) -> Option<&Arc<UpstreamHandle>> {
        self.routes.get(host)
    }

    /// Number of distinct hosts.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no routes are configured.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Configured hosts, sorted.
    pub fn hosts(&self) -> Vec<&str> {
        let mut hosts: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        hosts.sort_unstable();
        hosts
    }
}
