//! Command line interface for the `jt808` server binary.

use std::net::SocketAddr;

use clap::Parser;

/// Command line arguments for the `jt808` binary.
#[derive(Debug, Parser)]
#[command(name = "jt808", version, about = "JT/T 808 telematics gateway")]
pub struct Cli {
    /// Address terminals connect to.
    #[arg(short, long, default_value = "0.0.0.0:6808")]
    pub bind: SocketAddr,

    /// Serve Prometheus metrics on this address.
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}
