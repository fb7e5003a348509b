//! Detector server binary
//!
//! `detserver [camrc]` runs the server with the operator console on stdin.
//! `detserver status [host:port]` asks a running server for its status word.

use anyhow::Result;
use detserver::client::CamClient;
use detserver::config::{Config, DEFAULT_PORT};
use detserver::server::Server;
use std::env;
use std::path::Path;
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("-h") | Some("--help") => {
            print_usage();
            Ok(())
        }
        Some("-v") | Some("--version") => {
            println!("detserver {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some("status") => check_status(args.get(2).map(String::as_str)),
        Some(path) => run_server(Some(path)),
        None => run_server(None),
    }
}

fn run_server(camrc: Option<&str>) -> Result<()> {
    let config = match camrc {
        Some(path) => match Config::from_file(Path::new(path)) {
            Some(c) => c,
            None => {
                eprintln!("Error: cannot read config file {}", path);
                process::exit(1);
            }
        },
        // a camrc in the working directory is picked up if present
        None => Config::from_file(Path::new("camrc")).unwrap_or_default(),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))?;

    println!("detserver {} starting", env!("CARGO_PKG_VERSION"));
    if config.is_master() {
        println!(
            "master for {} secondary computer(s)",
            config.secondaries.len()
        );
    }

    let mut server = Server::new(&config, shutdown)?;
    server.run(true)
}

fn check_status(addr: Option<&str>) -> Result<()> {
    let addr = addr
        .map(String::from)
        .unwrap_or_else(|| format!("127.0.0.1:{}", DEFAULT_PORT));
    let mut client = CamClient::connect(&addr)?;
    let frame = client.transact("Status", Duration::from_secs(5))?;
    if frame.ok {
        println!("{}", frame.text);
        Ok(())
    } else {
        eprintln!("Error: {}", frame.text);
        process::exit(1);
    }
}

fn print_usage() {
    println!("detserver {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: detserver [camrc]");
    println!("       detserver status [host:port]");
    println!();
    println!("  camrc              configuration file (default: ./camrc)");
    println!("  status             query a running server's status word");
    println!("  -h, --help         show this help message");
    println!("  -v, --version      show the version");
}
