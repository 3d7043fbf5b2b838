//! # vhost-proxy
//!
//! Reverse proxy that forwards each request to the upstream configured for
//! its virtual host.
//!
//! ## Usage
//!
//! ```bash
//! # Plaintext on :80 with ./config.json
//! vhost-proxy
//!
//! # TLS on :443
//! vhost-proxy --https --cert cert.pem --key key.pem
//!
//! # Custom config and listen address, debug logging
//! vhost-proxy -c /etc/vhost-proxy/config.json -l 127.0.0.1:8080 -vv
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info};
use vhost_proxy::config::AppConfig;
use vhost_proxy::logging;
use vhost_proxy::{Dispatcher, RouteTable, ServerFront};

/// Name-based virtual hosting reverse proxy.
#[derive(Parser, Debug)]
#[command(name = "vhost-proxy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (JSON or YAML)
    #[arg(short, long, env = "VHOST_PROXY_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Enable HTTPS support
    #[arg(long)]
    https: bool,

    /// Path to the TLS certificate file
    #[arg(long)]
    cert: Option<String>,

    /// Path to the TLS certificate key file
    #[arg(long)]
    key: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace, -vvvv trace+deps)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    /// Converts verbosity count to log level string
    fn log_level(&self) -> Option<String> {
        if self.quiet {
            return Some("error".to_string());
        }
        match self.verbose {
            0 => None,
            1 => Some("info".to_string()),
            2 => Some("debug".to_string()),
            _ => Some("trace".to_string()),
        }
    }

    /// Whether to include verbose dependency logging
    fn trace_deps(&self) -> bool {
        self.verbose >= 4
    }

    /// Applies command-line overrides on top of the file configuration.
    fn apply(&self, config: &mut AppConfig) {
        if self.https {
            config.tls.enabled = true;
        }
        if let Some(ref cert) = self.cert {
            config.tls.cert = cert.clone();
        }
        if let Some(ref key) = self.key {
            config.tls.key = key.clone();
        }
        if let Some(ref listen) = self.listen {
            config.server.listen = Some(listen.clone());
        }
    }
}

fn main() {
    let args = Args::parse();

    let mut config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }
    };
    args.apply(&mut config);

    let _log_guard = match logging::init_logging(&config.logging, args.log_level(), args.trace_deps()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_path = %args.config.display(),
        "Starting vhost-proxy"
    );

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        process::exit(1);
    }

    // The table is complete before the server exists; nothing mutates it later.
    let routes = match RouteTable::build(&config.routes, config.server.upstream_timeouts()) {
        Ok(routes) => routes,
        Err(e) => {
            error!(error = %e, "Error building route table");
            process::exit(1);
        }
    };
    let dispatcher = Dispatcher::new(Arc::new(routes));
    info!(hosts = ?dispatcher.routes().hosts(), "Routes loaded");

    let front = match ServerFront::build(&config, dispatcher) {
        Ok(front) => front,
        Err(e) => {
            error!(error = %e, "Error starting server");
            process::exit(1);
        }
    };

    info!(
        listen = %front.listen(),
        tls = front.is_tls(),
        "Server front ready"
    );
    front.run();
}
