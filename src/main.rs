use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use emberdb::server::Server;
use emberdb::{Config, Database};

fn print_help(binary: &str) {
    println!("Usage: {binary} [DATA_PATH] [PORT]");
    println!("Options:");
    println!("  DATA_PATH   Directory for database files (default: ./emberdb)");
    println!("  PORT        TCP port to listen on (default: 5555)");
    println!("  --help      Show this help message");
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).is_some_and(|arg| arg == "--help") {
        print_help(&args[0]);
        return ExitCode::SUCCESS;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = Config::default();
    if let Some(dir) = args.get(1) {
        config.dir = dir.into();
    }
    if let Some(port) = args.get(2) {
        match port.parse() {
            Ok(port) => config.port = port,
            Err(_) => {
                eprintln!("invalid port: {port}");
                return ExitCode::FAILURE;
            }
        }
    }

    tracing::info!(dir = %config.dir.display(), port = config.port, "starting emberdb");

    let db = match Database::open_with_config(&config) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            tracing::error!(error = %e, "failed to open database");
            return ExitCode::FAILURE;
        }
    };

    let server = Server::new(db, config);
    if let Err(e) = server.run() {
        tracing::error!(error = %e, "server failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
