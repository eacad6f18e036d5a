//! Command-line interface for the exporter sidecar.
use std::{net::IpAddr, str::FromStr};

use clap::Parser;
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Parses a `key=value` metadata pair.
fn parse_meta(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => {
            Ok((key.to_string(), value.to_string()))
        }
        _ => Err(format!("invalid metadata entry '{raw}', expected key=value")),
    }
}

/// Command-line interface for the exporter sidecar.
///
/// Every flag can also be supplied through an `EXPORTER_SIDECAR_*`
/// environment variable, with explicit flags taking precedence.
#[derive(Parser)]
#[command(name = "exporter-sidecar", version, author)]
#[command(
    about = "Supervises a metrics exporter and registers it with a Consul catalog",
    long_about = None
)]
pub struct Cli {
    /// Name or path of the exporter binary to supervise.
    pub exporter: String,

    /// Additional CLI arguments passed through to the exporter.
    #[arg(long, env = "EXPORTER_SIDECAR_ARGS", value_delimiter = ',')]
    pub args: Vec<String>,

    /// Additional KEY=VALUE environment variables for the exporter.
    #[arg(long, env = "EXPORTER_SIDECAR_ENV", value_delimiter = ',')]
    pub env: Vec<String>,

    /// Tags to assign to the registered service.
    #[arg(long, env = "EXPORTER_SIDECAR_TAGS", value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Service name registered in the catalog (defaults to the binary name).
    #[arg(long, env = "EXPORTER_SIDECAR_SERVICE")]
    pub service: Option<String>,

    /// Override for the registered service identity.
    #[arg(long = "override", env = "EXPORTER_SIDECAR_OVERRIDE")]
    pub override_id: Option<String>,

    /// Advertise address; defaults to the discovered external IP.
    #[arg(long, env = "EXPORTER_SIDECAR_ADVERTISE_IP", value_name = "ADDR")]
    pub advertise_ip: Option<IpAddr>,

    /// Port the exporter listens on (0 resolves well-known exporters).
    #[arg(
        long,
        env = "EXPORTER_SIDECAR_LISTEN_PORT",
        value_name = "PORT",
        default_value_t = 0
    )]
    pub listen_port: u16,

    /// Addresses of the Consul servers to register with.
    #[arg(
        long,
        env = "EXPORTER_SIDECAR_CONSUL_CLUSTER",
        value_delimiter = ',',
        required = true,
        value_name = "URL"
    )]
    pub consul_cluster: Vec<String>,

    /// Datacenter of the Consul agent.
    #[arg(long, env = "EXPORTER_SIDECAR_DATACENTER")]
    pub datacenter: Option<String>,

    /// Arbitrary key=value metadata linked to the service instance.
    #[arg(long, env = "EXPORTER_SIDECAR_META", value_parser = parse_meta, value_delimiter = ',')]
    pub meta: Vec<(String, String)>,

    /// Seconds the exporter must stay up before it is presumed healthy.
    #[arg(
        long,
        env = "EXPORTER_SIDECAR_HEALTH_WINDOW",
        value_name = "SECONDS",
        default_value_t = 3
    )]
    pub health_window: u64,

    /// Override the logging verbosity for this invocation only.
    #[arg(long, env = "EXPORTER_SIDECAR_LOG_LEVEL", value_name = "LEVEL")]
    pub log_level: Option<LogLevelArg>,
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
