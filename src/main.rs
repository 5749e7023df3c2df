use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pacprism::cache::FileCache;
use pacprism::config::Config;
use pacprism::dht::Dht;
use pacprism::fetch::FetchClient;
use pacprism::router::Router;
use pacprism::server;
use pacprism::validator::Validator;
use pacprism::VERSION;

const CONFIG_PATH: &str = "./pacprism.conf";

fn print_banner() {
    println!("\x1b[32mpacPrism - Semi-decentralized Package Distribution System\x1b[0m");
    println!("Version \x1b[34m{VERSION}\x1b[0m");
}

fn print_usage(program: &str) {
    println!("Usage: {program} [port]");
    println!("  port    Optional. Port number to listen on (default: 9001)");
}

/// Parse the optional port argument; None means "use the config value".
fn parse_port_arg(args: &[String]) -> Result<Option<u16>, String> {
    let Some(raw) = args.get(1) else {
        return Ok(None);
    };
    match raw.parse::<u16>() {
        Ok(port) if port >= 1 => Ok(Some(port)),
        _ => Err(format!("Invalid port number '{raw}'")),
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    print_banner();

    let args: Vec<String> = std::env::args().collect();
    let port_override = match parse_port_arg(&args) {
        Ok(port) => port,
        Err(message) => {
            eprintln!("Error: {message}");
            print_usage(&args[0]);
            std::process::exit(1);
        }
    };

    let config = if Path::new(CONFIG_PATH).exists() {
        match Config::load_from_file(CONFIG_PATH) {
            Ok(config) => config,
            Err(err) => {
                warn!(path = CONFIG_PATH, error = %err, "could not read config file, using defaults");
                Config::new()
            }
        }
    } else {
        Config::new()
    };

    let port = port_override.unwrap_or_else(|| config.port());

    let fetcher = match FetchClient::new(config.upstream(), &config) {
        Ok(fetcher) => fetcher,
        Err(err) => {
            eprintln!("Error: failed to initialize upstream client: {err}");
            std::process::exit(1);
        }
    };

    info!(upstream = config.upstream(), cache_dir = config.cache_dir(), "starting pacPrism");

    let cache = Arc::new(FileCache::new(config.cache_dir(), fetcher));
    let dht = Arc::new(Mutex::new(Dht::new()));
    let router = Arc::new(Router::new(
        dht,
        Validator::accept_all(),
        cache,
        config.liveness_threshold(),
    ));

    // Bind failure is the only fatal error; it propagates out of main.
    let listener = server::bind(config.bind_address(), port).await?;
    server::run(listener, router).await;

    info!("server shutdown complete");
    Ok(())
}
