use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use framework::tls::TlsConfig;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;

/// Everything but the unreserved characters of RFC 3986 is escaped, the
/// same as a query component escaped by Prometheus.
const QUERY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn default_server_type() -> String {
    ServerType::Vm.as_str().to_string()
}

const fn default_port() -> u16 {
    9163
}

const fn default_refresh_interval() -> Duration {
    Duration::from_secs(60)
}

const fn default_version() -> u32 {
    1
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("triton SD configuration requires server_type to be 'vm' or 'gz'")]
    ServerType(String),
    #[error("triton SD configuration requires an account")]
    Account,
    #[error("triton SD configuration requires a dns_suffix")]
    DnsSuffix,
    #[error("triton SD configuration requires an endpoint")]
    Endpoint,
    #[error("triton SD configuration requires RefreshInterval to be a positive integer")]
    RefreshInterval,
    #[error("invalid discovery url {url:?}, {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Which discovery API is queried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerType {
    /// Containers (virtual machines), served at `/v{version}/discover`.
    Vm,
    /// Global zones, served at `/v{version}/gz/discover`.
    Gz,
}

impl ServerType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ServerType::Vm => "vm",
            ServerType::Gz => "gz",
        }
    }

    const fn path(&self) -> &'static str {
        match self {
            ServerType::Vm => "discover",
            ServerType::Gz => "gz/discover",
        }
    }
}

impl FromStr for ServerType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vm" => Ok(ServerType::Vm),
            "gz" => Ok(ServerType::Gz),
            _ => Err(ConfigError::ServerType(s.to_string())),
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Triton SD configurations allow retrieving scrape targets from Container
/// Monitor discovery endpoints.
///
/// ```yaml
/// account: testAccount
/// dns_suffix: triton.example.com
/// endpoint: cmon.triton.example.com
/// groups:
/// - web
/// - db
/// refresh_interval: 1m
/// tls:
///   ca: /etc/triton/ca.pem
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The account to use for discovering new targets.
    #[serde(default)]
    pub account: String,

    /// Which type of targets to discover, can be set to:
    /// * "vm", containers (VMs) running on the hosts
    /// * "gz", the global zones (compute nodes) themselves
    #[serde(default = "default_server_type")]
    pub server_type: String,

    /// The DNS suffix which should be applied to the target.
    #[serde(default)]
    pub dns_suffix: String,

    /// The Triton discovery endpoint (e.g. 'cmon.us-east-3b.triton.zone').
    /// This is often the same value as dns_suffix.
    #[serde(default)]
    pub endpoint: String,

    /// A list of groups for which targets are retrieved, only supported when
    /// `server_type` is "vm". If omitted, all containers owned by the
    /// requesting account are scraped.
    #[serde(default)]
    pub groups: Vec<String>,

    /// The port to use for discovery and metric scraping.
    #[serde(default = "default_port")]
    pub port: u16,

    /// The interval which should be used for refreshing targets.
    #[serde(
        default = "default_refresh_interval",
        with = "humanize::duration::serde"
    )]
    pub refresh_interval: Duration,

    /// The Triton discovery API version.
    #[serde(default = "default_version")]
    pub version: u32,

    /// TLS configuration to connect to the discovery endpoint.
    #[serde(default, alias = "tls_config")]
    pub tls: Option<TlsConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            account: String::new(),
            server_type: default_server_type(),
            dns_suffix: String::new(),
            endpoint: String::new(),
            groups: vec![],
            port: default_port(),
            refresh_interval: default_refresh_interval(),
            version: default_version(),
            tls: None,
        }
    }
}

impl Config {
    /// Checks the required fields, the first problem found is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server_type()?;

        if self.account.is_empty() {
            return Err(ConfigError::Account);
        }
        if self.dns_suffix.is_empty() {
            return Err(ConfigError::DnsSuffix);
        }
        if self.endpoint.is_empty() {
            return Err(ConfigError::Endpoint);
        }
        if self.refresh_interval.is_zero() {
            return Err(ConfigError::RefreshInterval);
        }

        Ok(())
    }

    #[inline]
    pub fn server_type(&self) -> Result<ServerType, ConfigError> {
        self.server_type.parse()
    }

    /// The URL targets are requested from, it is also the source of the
    /// returned target group.
    pub fn discovery_url(&self, server_type: ServerType) -> String {
        let mut url = format!(
            "https://{}:{}/v{}/{}",
            self.endpoint,
            self.port,
            self.version,
            server_type.path()
        );

        if !self.groups.is_empty() {
            // spaces are sent as `+`
            let groups = utf8_percent_encode(&self.groups.join(","), QUERY_ESCAPE)
                .to_string()
                .replace("%20", "+");

            url.push_str("?groups=");
            url.push_str(&groups);
        }

        url
    }
}
