//! Startup banner utilities.

use std::fmt::Write;
use std::net::SocketAddr;

/// Configuration for the startup banner.
pub struct BannerConfig<'a> {
    /// Version string
    pub version: &'a str,
    /// Address both transports bind (TCP acceptor + UDP telemetry)
    pub address: SocketAddr,
    /// Number of synthetic controllers exposed
    pub controllers: u32,
    /// Per-session dataframe queue cap
    pub max_queued_dataframes: usize,
    /// Event loop tick interval in milliseconds
    pub tick_interval_ms: u64,
}

/// Print a startup banner to stdout.
pub fn print_banner(config: &BannerConfig) {
    let mut output = String::with_capacity(256);

    let name = "motiond";
    writeln!(output, "{} v{}", name, config.version).unwrap();
    writeln!(
        output,
        "{}",
        "=".repeat(name.len() + config.version.len() + 2)
    )
    .unwrap();
    writeln!(output).unwrap();

    writeln!(output, "Listen:      {} (tcp + udp)", config.address).unwrap();
    writeln!(output, "Controllers: {}", config.controllers).unwrap();
    writeln!(
        output,
        "Telemetry:   queue cap {} frames, tick {} ms",
        config.max_queued_dataframes, config.tick_interval_ms
    )
    .unwrap();

    println!("{}", output);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_banner_does_not_panic() {
        print_banner(&BannerConfig {
            version: "0.0.0",
            address: "0.0.0.0:9512".parse().unwrap(),
            controllers: 1,
            max_queued_dataframes: 256,
            tick_interval_ms: 4,
        });
    }
}
