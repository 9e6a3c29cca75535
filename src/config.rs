use std::fs::read_to_string;
use std::net::IpAddr;
use std::str::FromStr;

use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Listen {
    ///
    /// the host all per-node listeners bind on
    ///
    #[serde(default = "Listen::host")]
    pub host: IpAddr,
    ///
    /// base port for the local port counter; the first allocated
    /// listener binds here, subsequent ones increment from it
    ///
    pub port: u16,
}

impl Listen {
    fn host() -> IpAddr {
        "0.0.0.0".parse().unwrap()
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Cluster {
    ///
    /// any reachable node of the cluster, used as the discovery seed
    ///
    /// may be a literal address or a hostname; hostnames are resolved
    /// with a retry budget (see discovery).
    ///
    pub seed: String,
    ///
    /// the hostname clients use to reach the proxy
    ///
    /// substituted into the `CLUSTER SLOTS` / `CLUSTER NODES` replies
    /// and `MOVED` redirects in place of the cluster's private addresses.
    ///
    pub public_hostname: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Runtime {
    ///
    /// buffer pool population
    ///
    #[serde(default = "Runtime::number_of_buffers")]
    pub number_of_buffers: usize,
    ///
    /// per-buffer capacity; also the upper bound on any single bulk
    /// string payload the proxy can parse
    ///
    #[serde(default = "Runtime::buffer_byte_size")]
    pub buffer_byte_size: usize,
    ///
    /// enables per-frame logging of the rewritten frame text on each
    /// pump
    ///
    #[serde(default)]
    pub debug: bool,
    ///
    /// reserved; no effect (see spec Open Question)
    ///
    #[serde(default)]
    pub max_concurrent_connections: usize,
}

impl Runtime {
    fn number_of_buffers() -> usize {
        100
    }

    fn buffer_byte_size() -> usize {
        16384
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            number_of_buffers: Self::number_of_buffers(),
            buffer_byte_size: Self::buffer_byte_size(),
            debug: false,
            max_concurrent_connections: 0,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    ///
    /// log level
    ///
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub listen: Listen,
    pub cluster: Cluster,
    #[serde(default)]
    pub runtime: Runtime,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: cluster-proxy --config /etc/cluster-proxy/config.toml
    ///
    #[arg(long, short)]
    config: String,
}

impl Config {
    ///
    /// Load configure from config file and command line parameters.
    ///
    pub fn load() -> Result<Self> {
        Ok(toml::from_str::<Self>(&read_to_string(
            &Cli::parse().config,
        )?)?)
    }
}
