//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Mutual TLS trust verification and echo endpoints
#[derive(Parser, Debug)]
#[command(name = "mtls-trust")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MTLS_TRUST_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on or connect to
    #[arg(short, long, env = "MTLS_TRUST_PORT", global = true)]
    pub port: Option<u16>,

    /// Host to bind to or connect to
    #[arg(long, env = "MTLS_TRUST_HOST", global = true)]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "MTLS_TRUST_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MTLS_TRUST_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the server role
    Serve {
        /// Handle a single connection, then exit
        #[arg(long)]
        once: bool,
    },

    /// Run the client role and print the server's reply
    Connect {
        /// Message to send
        #[arg(short, long, default_value = "hello")]
        message: String,
    },

    /// Check whether certificates chain to a root
    Verify {
        /// Root certificate (PEM)
        #[arg(long, required = true)]
        root: PathBuf,

        /// Certificates to check (PEM)
        #[arg(required = true)]
        certs: Vec<PathBuf>,
    },
}
