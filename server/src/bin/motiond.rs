//! motiond server binary.

use clap::Parser;
use server::banner::{BannerConfig, print_banner};
use server::config::Config;
use server::driver::NetworkCore;
use server::service::MotionService;
use server::{logging, signal};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "motiond")]
#[command(about = "Motion-controller telemetry server")]
struct Args {
    /// Path to configuration file
    config: Option<PathBuf>,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return;
    }

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    logging::init(&config.logging);

    if let Err(e) = run(config) {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}

fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::new(config.network.address, config.network.port);

    print_banner(&BannerConfig {
        version: env!("CARGO_PKG_VERSION"),
        address: addr,
        controllers: config.telemetry.controllers,
        max_queued_dataframes: config.telemetry.max_queued_dataframes,
        tick_interval_ms: config.telemetry.tick_interval_ms,
    });

    let shutdown = signal::install_signal_handler();

    let service = MotionService::new(config.telemetry.controllers);
    let mut core = NetworkCore::startup(addr, &config, service)?;
    let tick = Duration::from_millis(config.telemetry.tick_interval_ms);

    while !shutdown.load(Ordering::Relaxed) {
        core.poll();

        // Feed a telemetry frame per active stream through the core
        let frames = core.handler_mut().pump();
        for (connection_id, frame) in frames {
            core.send_controller_data_frame(connection_id, frame);
        }

        std::thread::sleep(tick);
    }

    core.shutdown();

    tracing::info!(
        connections_accepted = server::metrics::CONNECTIONS_ACCEPTED.value(),
        requests_dispatched = server::metrics::REQUESTS_DISPATCHED.value(),
        dataframes_sent = server::metrics::DATAFRAMES_SENT.value(),
        dataframes_dropped = server::metrics::DATAFRAMES_DROPPED.value(),
        "final counters"
    );

    Ok(())
}

fn print_default_config() {
    let config = r#"# motiond configuration

[network]
# Address to bind; the stream acceptor and the telemetry datagram socket
# share this address and port
address = "0.0.0.0"
port = 9512

# Accept backlog for the stream listener
backlog = 128

[telemetry]
# Number of synthetic controllers the built-in service exposes
controllers = 1

# Per-session cap on queued dataframes; the oldest frame is dropped when a
# session falls this far behind
max_queued_dataframes = 256

# Event loop tick interval in milliseconds
tick_interval_ms = 4

[logging]
# Default filter level; RUST_LOG overrides this when set
level = "info"

# Output format: "compact", "pretty", or "json"
format = "compact"

# Include timestamps in output
timestamps = true

# Include the log target (module path) in output
target = false
"#;
    print!("{}", config);
}
