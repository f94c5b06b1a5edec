use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use ipnet::IpNet;
use thiserror::Error;

use crate::rate_limiter::LimiterSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// Redis hashes, shared by every instance.
    Redis,
    /// In-process map, for local runs without Redis.
    Memory,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} rate must be greater than 0 (got {value})")]
    InvalidRate { name: &'static str, value: f64 },

    #[error("{name} burst must be at least 1 (got {value})")]
    InvalidBurst { name: &'static str, value: f64 },

    #[error("{0} must be greater than 0")]
    ZeroDuration(&'static str),

    #[error("Redis URL must start with 'redis://' or 'rediss://'")]
    InvalidRedisUrl,
}

/// Service configuration, read from the command line or the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "burnnote", version, about)]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: SocketAddr,

    /// Where notes are stored
    #[arg(long, env = "STORE_BACKEND", value_enum, default_value = "redis")]
    pub store_backend: StoreBackend,

    /// Redis connection URL
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Redis password, overriding any in the URL
    #[arg(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    pub redis_password: Option<String>,

    /// Timeout for each record store call, in seconds
    #[arg(long, env = "STORE_TIMEOUT_SECS", default_value_t = 5)]
    pub store_timeout_secs: u64,

    /// Proxies allowed to set X-Real-Ip / X-Forwarded-For, as CIDRs
    #[arg(long, env = "TRUSTED_PROXIES", value_delimiter = ',')]
    pub trusted_proxies: Vec<IpNet>,

    /// Read requests per second per client
    #[arg(long, env = "READ_RATE", default_value_t = 10.0)]
    pub read_rate: f64,

    /// Read burst per client
    #[arg(long, env = "READ_BURST", default_value_t = 20.0)]
    pub read_burst: f64,

    /// Note creations per second per client
    #[arg(long, env = "WRITE_RATE", default_value_t = 5.0)]
    pub write_rate: f64,

    /// Note creation burst per client
    #[arg(long, env = "WRITE_BURST", default_value_t = 10.0)]
    pub write_burst: f64,

    /// How often idle rate limiter entries are swept, in seconds
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// Directory served for non-API paths
    #[arg(long, env = "STATIC_DIR", default_value = "./www")]
    pub static_dir: PathBuf,

    /// Default log level when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_from(["burnnote"])
    }
}

impl Config {
    /// Load configuration from the command line and environment variables
    pub fn from_env() -> Self {
        Config::parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, rate, burst) in [
            ("read", self.read_rate, self.read_burst),
            ("write", self.write_rate, self.write_burst),
        ] {
            if rate.is_nan() || rate <= 0.0 {
                return Err(ConfigError::InvalidRate { name, value: rate });
            }
            if burst.is_nan() || burst < 1.0 {
                return Err(ConfigError::InvalidBurst { name, value: burst });
            }
        }

        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::ZeroDuration("sweep interval"));
        }
        if self.store_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("store timeout"));
        }

        if self.store_backend == StoreBackend::Redis
            && !self.redis_url.starts_with("redis://")
            && !self.redis_url.starts_with("rediss://")
        {
            return Err(ConfigError::InvalidRedisUrl);
        }

        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn read_limits(&self) -> LimiterSettings {
        LimiterSettings::new("read", self.read_rate, self.read_burst)
            .with_sweep_interval(Duration::from_secs(self.sweep_interval_secs))
    }

    pub fn write_limits(&self) -> LimiterSettings {
        LimiterSettings::new("write", self.write_rate, self.write_burst)
            .with_sweep_interval(Duration::from_secs(self.sweep_interval_secs))
    }
}
