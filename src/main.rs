//! mtls-trust - mutual TLS trust verification and echo endpoints

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use mtls_trust::{
    cli::{Cli, Command},
    client::Client,
    config::Config,
    mtls::ChainVerifier,
    server::Server,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Command::Verify { ref root, ref certs } => run_verify(root, certs),
        Command::Serve { once } => match load_config(&cli) {
            Some(config) => run_server(config, once).await,
            None => ExitCode::FAILURE,
        },
        Command::Connect { ref message } => match load_config(&cli) {
            Some(config) => run_client(config, message).await,
            None => ExitCode::FAILURE,
        },
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> Option<Config> {
    match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.endpoint.port = port;
            }
            if let Some(ref host) = cli.host {
                config.endpoint.host = host.clone();
            }
            Some(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// Run the server role
async fn run_server(config: Config, once: bool) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.endpoint.host,
        port = config.endpoint.port,
        model = ?config.trust.model,
        "Starting mTLS server"
    );

    let server = match Server::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create server: {e}");
            return ExitCode::FAILURE;
        }
    };

    if once {
        let listener = match server.bind().await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind: {e}");
                return ExitCode::FAILURE;
            }
        };
        return match server.serve_one(&listener).await {
            Ok(message) => {
                info!(message = %String::from_utf8_lossy(&message), "Connection served");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Connection failed: {e}");
                ExitCode::FAILURE
            }
        };
    }

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}

/// Run the client role
async fn run_client(config: Config, message: &str) -> ExitCode {
    let client = match Client::new(config) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create client: {e}");
            return ExitCode::FAILURE;
        }
    };

    match client.send(message.as_bytes()).await {
        Ok(reply) => {
            println!("{}", String::from_utf8_lossy(&reply));
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Exchange failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Verify each certificate against the root
fn run_verify(root: &Path, certs: &[PathBuf]) -> ExitCode {
    let mut all_ok = true;

    for cert in certs {
        match ChainVerifier::verify_files(root, cert) {
            Ok(true) => println!("{}: OK", cert.display()),
            Ok(false) => {
                println!("{}: FAILED", cert.display());
                all_ok = false;
            }
            Err(e) => {
                println!("{}: ERROR ({e})", cert.display());
                all_ok = false;
            }
        }
    }

    if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
