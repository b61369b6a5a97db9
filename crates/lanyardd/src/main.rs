//! lanyardd - macvlan/ipvlan remote network driver.
//!
//! Serves the plugin protocol on a unix socket in the runtime's plugin
//! directory.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use lanyard::Driver;
use lanyard_common::PluginPaths;
use lanyard_network::routing::gobgp::DEFAULT_GOBGP_BIN;
use lanyard_network::{
    DEFAULT_CONTROL_ADDR, DaemonRoutingProvider, DriverKind, LinkOps, NetlinkLinks,
    ensure_ip_forwarding, kernel_support,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod api;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Driver type to serve
    #[arg(long, env = "LANYARD_DRIVER", default_value = "macvlan")]
    driver: DriverKind,

    /// Plugin socket path (default: <plugin dir>/<driver>.sock)
    #[arg(long, env = "LANYARD_SOCKET")]
    socket: Option<PathBuf>,

    /// Control address of the routing daemon
    #[arg(long, env = "LANYARD_ROUTING_CONTROL", default_value_t = DEFAULT_CONTROL_ADDR)]
    routing_control: IpAddr,

    /// gobgp client binary
    #[arg(long, env = "LANYARD_GOBGP_BIN", default_value = DEFAULT_GOBGP_BIN)]
    gobgp_bin: PathBuf,

    /// Log output format
    #[arg(long, env = "LANYARD_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Enable debug logging when RUST_LOG is unset
    #[arg(short, long)]
    debug: bool,

    /// Start without checking for the kernel module
    #[arg(long)]
    skip_kernel_check: bool,
}

fn init_tracing(args: &Args) {
    let default = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry().with(filter);
    match args.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
        }
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    if args.skip_kernel_check {
        tracing::warn!(driver = %args.driver, "Skipping kernel module check");
    } else {
        kernel_support(args.driver)
            .with_context(|| format!("{} kernel support is required", args.driver))?;
    }
    if args.driver == DriverKind::Ipvlan {
        if let Err(e) = ensure_ip_forwarding() {
            tracing::warn!(error = %e, "Failed to enable IP forwarding");
        }
    }

    let links: Arc<dyn LinkOps> = Arc::new(NetlinkLinks::new().context("opening netlink")?);
    let routing = DaemonRoutingProvider::new(Arc::clone(&links), args.routing_control)
        .with_gobgp_bin(&args.gobgp_bin);
    let driver = Arc::new(Driver::new(args.driver, links, Arc::new(routing)));

    let paths = args
        .socket
        .as_deref()
        .and_then(Path::parent)
        .map_or_else(PluginPaths::new, PluginPaths::with_plugin_dir);
    paths.create_dirs().context("creating plugin directory")?;
    let socket = args
        .socket
        .clone()
        .unwrap_or_else(|| paths.socket(args.driver.as_str()));
    // A socket left behind by an unclean exit blocks bind
    match std::fs::remove_file(&socket) {
        Ok(()) => tracing::debug!(socket = %socket.display(), "Removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("removing {}", socket.display())),
    }

    let listener = tokio::net::UnixListener::bind(&socket)
        .with_context(|| format!("binding {}", socket.display()))?;
    tracing::info!(
        driver = %args.driver,
        socket = %socket.display(),
        routing_control = %args.routing_control,
        "lanyardd started"
    );

    axum::serve(listener, api::server::app(driver))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = std::fs::remove_file(&socket) {
        tracing::warn!(socket = %socket.display(), error = %e, "Failed to remove socket");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["lanyardd"]).unwrap();
        assert_eq!(args.driver, DriverKind::Macvlan);
        assert_eq!(args.log_format, LogFormat::Text);
        assert!(args.routing_control.is_loopback());
        assert!(!args.skip_kernel_check);
    }

    #[test]
    fn driver_flag() {
        let args = Args::try_parse_from(["lanyardd", "--driver", "ipvlan", "--log-format", "json"])
            .unwrap();
        assert_eq!(args.driver, DriverKind::Ipvlan);
        assert_eq!(args.log_format, LogFormat::Json);
        assert!(Args::try_parse_from(["lanyardd", "--driver", "bridge"]).is_err());
    }
}
