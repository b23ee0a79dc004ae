//! minegate driver binary
//!
//! Starts the engine, binds the configured listeners, and runs a minimal
//! built-in policy loop over the same queue-and-submit boundary an external
//! policy layer would use: every login is routed to `staticRoute`, every
//! status query gets a static MOTD.
//!
//! # Usage
//!
//! ```bash
//! # Run with a configuration file
//! minegate -c /etc/minegate/config.json
//!
//! # Check configuration and exit
//! minegate -c config.json --check
//!
//! # Override the log filter
//! MINEGATE_LOG=debug minegate -c config.json
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::signal;
use tracing::{info, warn};

use minegate::{Gateway, GatewayConfig, MotdDecision, RouteDecision};

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/minegate/config.json");
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "--check" => check_config = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("minegate v{}", minegate::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"minegate v{}

Programmable Layer-7 entry gateway for the Minecraft Java Edition protocol.

USAGE:
    minegate [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Configuration file path [default: /etc/minegate/config.json]
    --check                Check configuration and exit
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT:
    MINEGATE_LOG           Log filter (trace, debug, info, warn, error)

EXAMPLE CONFIG:
    {{
      "proxyProtocolIn": "none",
      "listeners": [{{"host": "0.0.0.0", "port": 25565}}],
      "staticRoute": {{"remoteHost": "127.0.0.1", "remotePort": 25566}},
      "motdText": "minegate"
    }}"#,
        minegate::VERSION
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = GatewayConfig::load_with_env(&args.config_path)
        .with_context(|| format!("loading {}", args.config_path.display()))?;

    if args.check_config {
        println!("configuration OK");
        return Ok(());
    }

    minegate::logging::init(config.log_filter());
    info!(version = minegate::VERSION, "minegate starting");

    if config.listeners.is_empty() {
        bail!("no listeners configured");
    }
    if config.static_route.is_none() {
        warn!("no staticRoute configured; every login will be rejected");
    }

    let gateway = Gateway::new(&config);
    for listen in &config.listeners {
        let id = gateway
            .start_listener(&listen.host, listen.port)
            .await
            .with_context(|| format!("binding {}:{}", listen.host, listen.port))?;
        info!(listener = id, host = %listen.host, port = listen.port, "listening");
    }

    let policy = tokio::spawn(policy_loop(gateway.clone(), config.clone()));

    signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    gateway.shutdown();
    policy.abort();
    Ok(())
}

/// The built-in static policy: poll the boundary queues and answer them
/// from configuration, exactly as an external policy layer would.
async fn policy_loop(gateway: Gateway, config: GatewayConfig) {
    loop {
        let events = gateway.poll_events();

        for request in events.route_requests {
            let decision = match &config.static_route {
                Some(route) => RouteDecision {
                    rewrite_host: route.rewrite_host.clone(),
                    ..RouteDecision::forward(route.remote_host.clone(), route.remote_port)
                },
                None => RouteDecision::reject("no route configured"),
            };
            if let Err(e) = gateway.submit_route_decision(request.conn_id, decision) {
                warn!(conn = request.conn_id, "route submission dropped: {e}");
            }
        }

        for request in events.motd_requests {
            let text = config.motd_text.clone().unwrap_or_else(|| "minegate".to_owned());
            let decision: MotdDecision = serde_json::from_value(serde_json::json!({
                "version": {"name": "minegate", "protocol": "auto"},
                "players": {"max": 100, "online": "auto"},
                "description": {"text": text},
            }))
            .unwrap_or_default();
            if let Err(e) = gateway.submit_motd_decision(request.conn_id, decision) {
                warn!(conn = request.conn_id, "MOTD submission dropped: {e}");
            }
        }

        for event in events.disconnection_events {
            info!(conn = event.conn_id, "player disconnected");
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
