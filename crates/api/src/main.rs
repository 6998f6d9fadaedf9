use anyhow::{bail, Context};
use proxbridge_api::serve;
use proxbridge_common::BridgeConfig;
use proxbridge_manager::Manager;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn print_usage() {
    println!("proxbridge - Proxmox event and tool bridge");
    println!();
    println!("Usage: proxbridge [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config <PATH>    Configuration file (TOML)");
    println!("  -b, --bind <ADDR>      Bind address for the API (default 127.0.0.1)");
    println!("  -p, --port <PORT>      Port for the API (default 8080)");
    println!("      --test-connection  Run the connectivity self-test and exit");
    println!("  -h, --help             Show this help");
}

struct CliArgs {
    config: Option<String>,
    bind: String,
    port: u16,
    test_connection: bool,
}

fn parse_args() -> anyhow::Result<Option<CliArgs>> {
    let mut args = CliArgs {
        config: None,
        bind: "127.0.0.1".to_string(),
        port: 8080,
        test_connection: false,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                args.config = Some(iter.next().context("--config requires a path")?);
            }
            "-b" | "--bind" => {
                args.bind = iter.next().context("--bind requires an address")?;
            }
            "-p" | "--port" => {
                let raw = iter.next().context("--port requires a number")?;
                args.port = raw.parse().with_context(|| format!("invalid port '{raw}'"))?;
            }
            "--test-connection" => args.test_connection = true,
            "-h" | "--help" => {
                print_usage();
                return Ok(None);
            }
            other => bail!("unknown argument '{other}' (try --help)"),
        }
    }
    Ok(Some(args))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proxbridge=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = match parse_args()? {
        Some(args) => args,
        None => return Ok(()),
    };

    let config = match &args.config {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from '{path}'"))?,
        None => {
            warn!("No configuration file given, starting with empty configuration");
            BridgeConfig::default()
        }
    };

    let manager = Manager::from_config(config).context("failed to build bridge components")?;

    if args.test_connection {
        let report = manager.self_test().await;
        for check in &report.checks {
            let verdict = if check.healthy { "ok" } else { "FAILED" };
            match &check.detail {
                Some(detail) => println!("{:<30} {verdict}: {detail}", check.component),
                None => println!("{:<30} {verdict}", check.component),
            }
        }
        if !report.passed() {
            bail!("self-test failed");
        }
        println!("all checks passed");
        return Ok(());
    }

    let manager = Arc::new(manager);
    manager.start().await.context("failed to start bridge")?;
    for name in manager.degraded() {
        warn!(listener = %name, "Running degraded, listener unavailable");
    }

    if args.bind == "0.0.0.0" {
        warn!("API bound to 0.0.0.0, reachable from all interfaces");
    }
    let listener = tokio::net::TcpListener::bind((args.bind.as_str(), args.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", args.bind, args.port))?;

    let shutdown_manager = Arc::clone(&manager);
    serve(listener, Arc::clone(&manager), async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        if let Err(err) = shutdown_manager.shutdown().await {
            warn!(error = %err, "Shutdown reported an error");
        }
    })
    .await?;

    Ok(())
}
