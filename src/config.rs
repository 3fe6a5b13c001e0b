use clap::Parser;
use std::time::Duration;
use tracing::Level;

use crate::codec::DEFAULT_MAX_FRAME_SIZE;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_CHANNEL_PURGE_INTERVAL: u64 = 300;

/// Server settings, read from the command line or the environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "redos", version, about)]
pub struct Config {
    /// The address to listen on
    #[arg(long, env = "REDOS_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// The port to listen on
    #[arg(short, long, env = "REDOS_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Largest frame a client may send, in bytes
    #[arg(long, env = "REDOS_MAX_FRAME_SIZE", default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,

    /// Seconds between sweeps of Pub/Sub channels without subscribers
    #[arg(long, env = "REDOS_CHANNEL_PURGE_INTERVAL", default_value_t = DEFAULT_CHANNEL_PURGE_INTERVAL)]
    pub channel_purge_interval: u64,

    /// Most verbose level logged (trace, debug, info, warn, error)
    #[arg(long, env = "REDOS_LOG_LEVEL", default_value = "info")]
    pub log_level: Level,
}

impl Config {
    /// The purge period. Never zero.
    pub fn channel_purge_interval(&self) -> Duration {
        Duration::from_secs(self.channel_purge_interval.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            channel_purge_interval: DEFAULT_CHANNEL_PURGE_INTERVAL,
            log_level: Level::INFO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_parser_defaults() {
        let parsed = Config::try_parse_from(["redos"]).unwrap();
        let default = Config::default();

        assert_eq!(parsed.host, default.host);
        assert_eq!(parsed.port, default.port);
        assert_eq!(parsed.max_frame_size, default.max_frame_size);
        assert_eq!(parsed.channel_purge_interval, default.channel_purge_interval);
        assert_eq!(parsed.log_level, default.log_level);
    }

    #[test]
    fn flags() {
        let config = Config::try_parse_from([
            "redos",
            "--port",
            "7000",
            "--host",
            "0.0.0.0",
            "--channel-purge-interval",
            "5",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(config.port, 7000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.channel_purge_interval(), Duration::from_secs(5));
        assert_eq!(config.log_level, Level::DEBUG);
    }
}
