//! standin-kv server binary.
//!
//! Parses a few flags into a [`ServerConfig`], starts a [`Server`] and stops
//! it (writing a final snapshot) on Ctrl+C.

use standin_kv::{Server, ServerConfig};
use std::time::Duration;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Parse configuration from command-line arguments
fn config_from_args() -> ServerConfig {
    let mut config = ServerConfig::default();
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--help" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                println!("standin-kv version {}", standin_kv::VERSION);
                std::process::exit(0);
            }
            "--host" | "-h" | "--port" | "-p" | "--dir" | "-d" | "--databases"
            | "--save-interval" => {
                let value = match args.get(i + 1) {
                    Some(value) => value.as_str(),
                    None => fail(&format!("{} requires a value", flag)),
                };
                apply_flag(&mut config, flag, value);
                i += 2;
            }
            _ => {
                eprintln!("Unknown argument: {}", flag);
                print_help();
                std::process::exit(1);
            }
        }
    }

    config
}

fn apply_flag(config: &mut ServerConfig, flag: &str, value: &str) {
    match flag {
        "--host" | "-h" => config.host = value.to_string(),
        "--port" | "-p" => {
            config.port = value
                .parse()
                .unwrap_or_else(|_| fail("invalid port number"))
        }
        "--dir" | "-d" => config.dir = Some(value.into()),
        "--databases" => {
            config.databases = match value.parse() {
                Ok(n) if n > 0 => n,
                _ => fail("--databases must be a positive integer"),
            }
        }
        "--save-interval" => {
            config.snapshot_interval = match value.parse() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => fail("--save-interval must be a positive number of seconds"),
            }
        }
        _ => unreachable!("flag list and match arms disagree"),
    }
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn print_help() {
    println!(
        r#"
standin-kv - a Redis-protocol key/value stand-in for tests

USAGE:
    standin-kv [OPTIONS]

OPTIONS:
    -h, --host <HOST>            Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>            Port to listen on, 0 for any (default: 6379)
    -d, --dir <DIR>              Snapshot directory (default: no persistence)
        --databases <N>          Number of databases (default: 16)
        --save-interval <SECS>   Seconds between snapshots (default: 600)
    -v, --version                Print version information
        --help                   Print this help message

EXAMPLES:
    standin-kv                          # Start on 127.0.0.1:6379
    standin-kv --port 0                 # Pick a free port
    standin-kv --dir /tmp/standin       # Load and save snapshots
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config_from_args();

    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let server = Server::new(config);
    let addr = server.start().await?;

    println!(
        "standin-kv v{} listening on {} (Ctrl+C to stop)",
        standin_kv::VERSION,
        addr
    );

    signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping server...");

    server.stop().await;

    info!("Server shutdown complete");
    Ok(())
}
