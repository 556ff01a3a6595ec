//! Command-line and environment configuration.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use thiserror::Error;

use clustermon_api::RouteGroups;
use clustermon_core::FrequencyConfiguration;
use clustermon_core::frequency::default_max_workers;
use clustermon_discovery::{LabelSelector, SelectorError};

/// Configuration problems that stop the process before anything starts.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("the store key must not be empty")]
    EmptyStoreKey,

    #[error("admin password set but no admin user")]
    AdminPasswordWithoutUser,

    #[error("admin user set but no admin password")]
    AdminUserWithoutPassword,

    #[error("invalid Prometheus label selector: {0}")]
    InvalidSelector(#[from] SelectorError),

    #[error("--prometheus-url and --prometheus-label-selector must be given together")]
    IncompleteDiscovery,

    #[error("discovery needs --cluster-user and --cluster-password")]
    MissingClusterCredentials,

    #[error("--cert-path and --key-path must be given together")]
    IncompleteTls,

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
}

/// File written inside `--log-dir`.
pub const LOG_FILE_NAME: &str = "clustermond.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "clustermond", about = "Cluster fleet health monitor", version)]
pub struct Config {
    /// Base secret the session keys are derived from.
    #[arg(long, env = "CLUSTERMON_STORE_KEY", hide_env_values = true)]
    pub store_key: String,

    /// Path of the state database (created if missing).
    #[arg(long)]
    pub store_path: PathBuf,

    /// PEM certificate chain for the HTTPS listener.
    #[arg(long, env = "CLUSTERMON_CERT_PATH")]
    pub cert_path: Option<PathBuf>,

    /// PEM private key for the HTTPS listener.
    #[arg(long, env = "CLUSTERMON_KEY_PATH")]
    pub key_path: Option<PathBuf>,

    #[arg(long, default_value_t = 7196)]
    pub http_port: u16,

    #[arg(long, default_value_t = 7197)]
    pub https_port: u16,

    #[arg(long)]
    pub disable_http: bool,

    #[arg(long)]
    pub disable_https: bool,

    /// Concurrent heart beat probes (default: 75% of the CPUs).
    #[arg(long)]
    pub max_workers: Option<usize>,

    #[arg(long, default_value = "60s", value_parser = parse_duration)]
    pub heartbeat_interval: Duration,

    /// Reserved; accepted for compatibility.
    #[arg(long, default_value = "300s", value_parser = parse_duration)]
    pub status_interval: Duration,

    #[arg(long, default_value = "60s", value_parser = parse_duration)]
    pub discovery_interval: Duration,

    /// Deadline for probing a single cluster.
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub probe_timeout: Duration,

    /// Admin user created on startup if missing.
    #[arg(long, env = "CLUSTERMON_ADMIN_USER")]
    pub admin_user: Option<String>,

    #[arg(long, env = "CLUSTERMON_ADMIN_PASSWORD", hide_env_values = true)]
    pub admin_password: Option<String>,

    /// Prometheus server used to discover clusters.
    #[arg(long, env = "CLUSTERMON_PROMETHEUS_URL")]
    pub prometheus_url: Option<String>,

    /// Targets to track, as `label1=value label2=value`.
    #[arg(long, env = "CLUSTERMON_PROMETHEUS_LABEL_SELECTOR")]
    pub prometheus_label_selector: Option<String>,

    /// Credentials used for discovered clusters.
    #[arg(long, env = "CLUSTERMON_CLUSTER_USER")]
    pub cluster_user: Option<String>,

    #[arg(long, env = "CLUSTERMON_CLUSTER_PASSWORD", hide_env_values = true)]
    pub cluster_password: Option<String>,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub enable_admin_api: bool,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub enable_cluster_api: bool,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub enable_extended_api: bool,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Write logs to a file in this directory (created if missing)
    /// instead of stdout.
    #[arg(long, env = "CLUSTERMON_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

/// Discovery settings that survived validation.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub url: String,
    pub selector: LabelSelector,
    pub user: String,
    pub password: String,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl Config {
    /// Reject inconsistent settings before any component starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_key.is_empty() {
            return Err(ConfigError::EmptyStoreKey);
        }
        match (non_empty(&self.admin_user), non_empty(&self.admin_password)) {
            (None, Some(_)) => return Err(ConfigError::AdminPasswordWithoutUser),
            (Some(_), None) => return Err(ConfigError::AdminUserWithoutPassword),
            _ => {}
        }
        if self.cert_path.is_some() != self.key_path.is_some() {
            return Err(ConfigError::IncompleteTls);
        }
        if let Some(name) = self.frequencies().zero_interval() {
            return Err(ConfigError::ZeroValue(name));
        }
        if self.probe_timeout.is_zero() {
            return Err(ConfigError::ZeroValue("probe timeout"));
        }
        if self.max_workers == Some(0) {
            return Err(ConfigError::ZeroValue("max workers"));
        }
        self.discovery()?;
        Ok(())
    }

    /// Discovery is optional: `None` when neither endpoint nor selector is
    /// set.
    pub fn discovery(&self) -> Result<Option<DiscoveryConfig>, ConfigError> {
        let (url, selector) = match (
            non_empty(&self.prometheus_url),
            non_empty(&self.prometheus_label_selector),
        ) {
            (None, None) => return Ok(None),
            (Some(url), Some(selector)) => (url, selector),
            _ => return Err(ConfigError::IncompleteDiscovery),
        };
        let selector = LabelSelector::parse(selector)?;
        let (Some(user), Some(password)) = (
            non_empty(&self.cluster_user),
            non_empty(&self.cluster_password),
        ) else {
            return Err(ConfigError::MissingClusterCredentials);
        };

        Ok(Some(DiscoveryConfig {
            url: url.to_string(),
            selector,
            user: user.to_string(),
            password: password.to_string(),
        }))
    }

    pub fn frequencies(&self) -> FrequencyConfiguration {
        FrequencyConfiguration {
            heartbeat: self.heartbeat_interval,
            status: self.status_interval,
            discovery: self.discovery_interval,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers.unwrap_or_else(default_max_workers)
    }

    pub fn route_groups(&self) -> RouteGroups {
        RouteGroups {
            admin: self.enable_admin_api,
            cluster: self.enable_cluster_api,
            extended: self.enable_extended_api,
        }
    }

    /// Certificate and key paths, when the HTTPS listener should run.
    pub fn tls_paths(&self) -> Option<(&Path, &Path)> {
        if self.disable_https {
            return None;
        }
        Some((self.cert_path.as_deref()?, self.key_path.as_deref()?))
    }

    /// Admin credentials to provision on startup.
    pub fn admin(&self) -> Option<(&str, &str)> {
        Some((non_empty(&self.admin_user)?, non_empty(&self.admin_password)?))
    }

    /// Open the log file for appending, creating `--log-dir` as needed.
    /// `None` means log to stdout.
    pub fn open_log_file(&self) -> io::Result<Option<File>> {
        let Some(dir) = &self.log_dir else {
            return Ok(None);
        };
        std::fs::create_dir_all(dir)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(LOG_FILE_NAME))
            .map(Some)
    }
}

/// Parse a duration string like "90", "5s", "500ms", "2m" or "1h".
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let parsed = if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    };
    parsed.ok_or_else(|| format!("invalid duration {s:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Config {
        let mut args = vec![
            "clustermond",
            "--store-key",
            "secret",
            "--store-path",
            "/tmp/clustermon.redb",
        ];
        args.extend_from_slice(extra);
        Config::try_parse_from(args).unwrap()
    }

    #[test]
    fn defaults() {
        let config = parse(&[]);
        assert!(config.validate().is_ok());
        assert_eq!(config.http_port, 7196);
        assert_eq!(config.https_port, 7197);
        assert_eq!(config.frequencies(), FrequencyConfiguration::default());
        assert_eq!(config.probe_timeout, Duration::from_secs(30));
        assert_eq!(config.route_groups(), RouteGroups::default());
        assert!(config.max_workers() >= 1);
        assert!(config.tls_paths().is_none());
        assert!(config.discovery().unwrap().is_none());
    }

    #[test]
    fn store_key_is_required() {
        assert!(Config::try_parse_from(["clustermond", "--store-path", "/tmp/x"]).is_err());
        let config = parse(&["--store-key", ""]);
        assert_eq!(config.validate(), Err(ConfigError::EmptyStoreKey));
    }

    #[test]
    fn admin_credentials_come_in_pairs() {
        let config = parse(&["--admin-password", "pw"]);
        assert_eq!(config.validate(), Err(ConfigError::AdminPasswordWithoutUser));

        let config = parse(&["--admin-user", "admin"]);
        assert_eq!(config.validate(), Err(ConfigError::AdminUserWithoutPassword));

        let config = parse(&["--admin-user", "admin", "--admin-password", "pw"]);
        assert!(config.validate().is_ok());
        assert_eq!(config.admin(), Some(("admin", "pw")));
    }

    #[test]
    fn discovery_needs_url_selector_and_credentials() {
        let config = parse(&["--prometheus-url", "http://prom:9090"]);
        assert_eq!(config.validate(), Err(ConfigError::IncompleteDiscovery));

        let config = parse(&[
            "--prometheus-url",
            "http://prom:9090",
            "--prometheus-label-selector",
            "job=couchbase",
        ]);
        assert_eq!(config.validate(), Err(ConfigError::MissingClusterCredentials));

        let config = parse(&[
            "--prometheus-url",
            "http://prom:9090",
            "--prometheus-label-selector",
            "job=couchbase env=prod",
            "--cluster-user",
            "u",
            "--cluster-password",
            "p",
        ]);
        let discovery = config.discovery().unwrap().unwrap();
        assert_eq!(discovery.url, "http://prom:9090");
        assert_eq!(discovery.selector.pairs().len(), 2);
    }

    #[test]
    fn invalid_selector_is_fatal() {
        let config = parse(&[
            "--prometheus-url",
            "http://prom:9090",
            "--prometheus-label-selector",
            "job",
            "--cluster-user",
            "u",
            "--cluster-password",
            "p",
        ]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSelector(_))
        ));
    }

    #[test]
    fn tls_paths_come_in_pairs() {
        let config = parse(&["--cert-path", "/tls/cert.pem"]);
        assert_eq!(config.validate(), Err(ConfigError::IncompleteTls));

        let config = parse(&["--cert-path", "/tls/cert.pem", "--key-path", "/tls/key.pem"]);
        assert!(config.validate().is_ok());
        assert!(config.tls_paths().is_some());

        let config = parse(&[
            "--cert-path",
            "/tls/cert.pem",
            "--key-path",
            "/tls/key.pem",
            "--disable-https",
        ]);
        assert!(config.tls_paths().is_none());
    }

    #[test]
    fn zero_values_are_rejected() {
        let config = parse(&["--heartbeat-interval", "0s"]);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroValue(_))));

        let config = parse(&["--max-workers", "0"]);
        assert_eq!(config.validate(), Err(ConfigError::ZeroValue("max workers")));
    }

    #[test]
    fn route_groups_can_be_disabled() {
        let config = parse(&["--enable-extended-api", "false"]);
        assert!(!config.route_groups().extended);
        assert!(config.route_groups().cluster);
    }

    #[test]
    fn log_dir_is_created_and_appended_to() {
        assert!(parse(&[]).open_log_file().unwrap().is_none());

        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("logs/clustermon");
        let config = parse(&["--log-dir", dir.to_str().unwrap()]);

        for line in ["first\n", "second\n"] {
            let mut file = config.open_log_file().unwrap().unwrap();
            io::Write::write_all(&mut file, line.as_bytes()).unwrap();
        }
        let written = std::fs::read_to_string(dir.join(LOG_FILE_NAME)).unwrap();
        assert_eq!(written, "first\nsecond\n");
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("90"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("5s"), Ok(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert!(parse_duration("soon").is_err());
    }
}
