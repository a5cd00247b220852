//! Command-line argument parsing

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "relay-server",
    about = "Webhook relay publisher service",
    version,
    long_about = "Propagates internal domain events to dynamically configured HTTP \
                  subscribers as signed, deduplicated, retried webhook deliveries."
)]
pub struct Args {
    /// HTTP port for the admin/health surface (overrides configuration)
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Environment (dev, staging, prod)
    #[arg(
        short,
        long,
        env = "ENVIRONMENT",
        default_value = "dev",
        value_parser = ["dev", "staging", "prod"]
    )]
    pub env: String,

    /// Enable JSON log format (useful for production)
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}
