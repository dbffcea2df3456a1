use std::fs;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

use crate::errors::{Error, Result};

/// Command-line flags. Every flag can also be supplied as an environment
/// variable (loaded from `.env` via `dotenv` before parsing), and falls back
/// to the matching field in an optional TOML file given by `--config`.
#[derive(Parser, Debug)]
#[command(
    name = "chatserver-core",
    about = "Clustered instant-messaging session router"
)]
pub struct Cli {
    /// Path to a TOML config file overlaying the defaults below.
    #[arg(long, env = "CHAT_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "CHAT_LISTEN_ADDR")]
    pub listen_addr: Option<String>,

    #[arg(long, env = "CHAT_MYSQL_URL")]
    pub mysql_url: Option<String>,

    #[arg(long, env = "CHAT_REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, env = "CHAT_WORKER_THREADS")]
    pub worker_threads: Option<usize>,

    /// Path to a log4rs config file. Falls back to a sane stderr default
    /// when absent.
    #[arg(long, env = "CHAT_LOG_CONFIG")]
    pub log_config: Option<PathBuf>,
}

/// Fully resolved runtime configuration, after merging CLI flags, the
/// environment and an optional TOML file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    pub mysql_url: String,
    pub redis_url: String,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default)]
    pub log_config: Option<PathBuf>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:6000".to_string()
}

fn default_worker_threads() -> usize {
    4
}

impl Config {
    /// Loads `.env`, parses CLI flags/env vars, and overlays a TOML file
    /// when `--config` points at one. CLI/env values win over file values.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();
        let cli = Cli::parse();
        Self::from_cli(cli)
    }

    fn from_cli(cli: Cli) -> Result<Self> {
        let mut cfg = if let Some(path) = &cli.config {
            let text = fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("could not read config file {}: {e}", path.display()))
            })?;
            toml::from_str(&text)
                .map_err(|e| Error::Config(format!("invalid config file {}: {e}", path.display())))?
        } else {
            Config {
                listen_addr: default_listen_addr(),
                mysql_url: String::new(),
                redis_url: String::new(),
                worker_threads: default_worker_threads(),
                log_config: None,
            }
        };

        if let Some(v) = cli.listen_addr {
            cfg.listen_addr = v;
        }
        if let Some(v) = cli.mysql_url {
            cfg.mysql_url = v;
        }
        if let Some(v) = cli.redis_url {
            cfg.redis_url = v;
        }
        if let Some(v) = cli.worker_threads {
            cfg.worker_threads = v;
        }
        if let Some(v) = cli.log_config {
            cfg.log_config = Some(v);
        }

        if cfg.mysql_url.is_empty() {
            return Err(Error::Config(
                "mysql_url must be set via --mysql-url, CHAT_MYSQL_URL, or the config file".into(),
            ));
        }
        if cfg.redis_url.is_empty() {
            return Err(Error::Config(
                "redis_url must be set via --redis-url, CHAT_REDIS_URL, or the config file".into(),
            ));
        }

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_file_defaults() {
        let cli = Cli {
            config: None,
            listen_addr: Some("127.0.0.1:7000".to_string()),
            mysql_url: Some("mysql://root@localhost/chat".to_string()),
            redis_url: Some("redis://localhost".to_string()),
            worker_threads: Some(8),
            log_config: None,
        };
        let cfg = Config::from_cli(cli).unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:7000");
        assert_eq!(cfg.worker_threads, 8);
    }

    #[test]
    fn missing_mysql_url_is_rejected() {
        let cli = Cli {
            config: None,
            listen_addr: None,
            mysql_url: None,
            redis_url: Some("redis://localhost".to_string()),
            worker_threads: None,
            log_config: None,
        };
        assert!(Config::from_cli(cli).is_err());
    }
}
