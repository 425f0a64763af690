//! JT/T 808 gateway binary.
//!
//! Serves the default handlers on the configured address until Ctrl+C.

mod cli;

use std::process::ExitCode;

use clap::Parser;
use jt808::{handler::HandlerRegistry, server::Server};

#[tokio::main]
async fn main() -> ExitCode {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    if let Some(addr) = cli.metrics_addr {
        install_metrics(addr);
    }

    let server = match Server::new(HandlerRegistry::new).bind(cli.bind) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, addr = %cli.bind, "failed to bind");
            return ExitCode::FAILURE;
        }
    };
    match server.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(feature = "metrics")]
fn install_metrics(addr: std::net::SocketAddr) {
    let installed = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install();
    match installed {
        Ok(()) => tracing::info!(%addr, "metrics exporter listening"),
        Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
    }
}

#[cfg(not(feature = "metrics"))]
fn install_metrics(addr: std::net::SocketAddr) {
    tracing::warn!(%addr, "built without the metrics feature; ignoring --metrics-addr");
}
