use std::time::Duration;
use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to write config file {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config path available (neither XDG_CONFIG_HOME nor HOME is set)")]
    ConfigPathUnavailable,
    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseSettings,
    pub directory: DirectorySettings,
    pub provider: ProviderSettings,
    pub schedule: ScheduleSettings,
    pub alerts: AlertSettings,
    pub email: EmailSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: String,
    pub max_connections: usize,
}

/// Where the authoritative node list comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySettings {
    pub url: String,
    /// Only nodes operated by this provider are synced
    pub provider_id: Option<String>,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

/// One entry of the probe plan sent with every measurement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationQuota {
    pub continent: String,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub packets: u32,
    pub ip_version: Option<u8>,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Upper bound on how long a single measurement may stay unfinished
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub locations: Vec<LocationQuota>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    #[serde(with = "humantime_serde")]
    pub cycle_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub digest_interval: Duration,
    /// Gap between two consecutive node measurements
    #[serde(with = "humantime_serde")]
    pub pacing: Duration,
    #[serde(with = "humantime_serde")]
    pub report_window: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    #[serde(skip_serializing)]
    pub webhook_url: Option<String>,
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSettings {
    pub smtp_host: String,
    pub smtp_port: u16,
    #[serde(skip_serializing)]
    pub smtp_user: Option<String>,
    #[serde(skip_serializing)]
    pub smtp_password: Option<String>,
    /// Defaults to the SMTP user when unset
    pub sender: Option<String>,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { path: "netprobe.db".into(), max_connections: 4 }
    }
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            url: "https://ic-api.internetcomputer.org/api/v3/nodes".into(),
            provider_id: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        let quota = |continent: &str| LocationQuota { continent: continent.into(), limit: 4 };
        Self {
            url: "https://api.globalping.io/v1/measurements".into(),
            api_key: None,
            packets: 16,
            ip_version: Some(6),
            poll_interval: Duration::from_millis(500),
            poll_timeout: Duration::from_secs(300),
            request_timeout: Duration::from_secs(30),
            locations: vec![quota("EU"), quota("NA"), quota("AS")],
        }
    }
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(4 * 3600),
            digest_interval: Duration::from_secs(24 * 3600),
            pacing: Duration::from_secs(2),
            report_window: Duration::from_secs(24 * 3600),
        }
    }
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self { webhook_url: None, max_attempts: 5, base_delay: Duration::from_millis(500) }
    }
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            smtp_host: "smtp.gmail.com".into(),
            smtp_port: 587,
            smtp_user: None,
            smtp_password: None,
            sender: None,
            recipients: Vec::new(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

impl EmailSettings {
    /// Credentials and at least one recipient are present
    pub fn is_complete(&self) -> bool {
        self.smtp_user.is_some() && self.smtp_password.is_some() && !self.recipients.is_empty()
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/netprobe/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Ok(home_dir) = env::var("HOME") {
        path::PathBuf::from(home_dir).join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("netprobe/config.toml"))
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };
        let secret = |value: &Option<String>| if value.is_some() { "set" } else { "unset" };
        let optional = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".into());

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path)?;
        write_1(f, "Max Connections", &self.database.max_connections)?;

        write_title_1(f, "Node Directory")?;
        write_1(f, "URL", &self.directory.url)?;
        write_1(f, "Provider Filter", &optional(&self.directory.provider_id))?;

        write_title_1(f, "Measurement Provider")?;
        write_1(f, "URL", &self.provider.url)?;
        write_1(f, "API Key", &secret(&self.provider.api_key))?;
        write_1(f, "Packets", &self.provider.packets)?;
        let plan = self
            .provider
            .locations
            .iter()
            .map(|quota| format!("{}x{}", quota.continent, quota.limit))
            .collect::<Vec<_>>()
            .join(", ");
        write_1(f, "Probe Plan", &plan)?;
        write_1(f, "Poll Interval", &humantime::format_duration(self.provider.poll_interval))?;
        write_1(f, "Poll Timeout", &humantime::format_duration(self.provider.poll_timeout))?;

        write_title_1(f, "Schedule")?;
        write_1(f, "Cycle Interval", &humantime::format_duration(self.schedule.cycle_interval))?;
        write_1(f, "Digest Interval", &humantime::format_duration(self.schedule.digest_interval))?;
        write_1(f, "Pacing", &humantime::format_duration(self.schedule.pacing))?;
        write_1(f, "Report Window", &humantime::format_duration(self.schedule.report_window))?;

        write_title_1(f, "Alerts")?;
        write_1(f, "Webhook", &secret(&self.alerts.webhook_url))?;
        write_1(f, "Max Attempts", &self.alerts.max_attempts)?;

        write_title_1(f, "Email")?;
        write_1(f, "SMTP", &format!("{}:{}", self.email.smtp_host, self.email.smtp_port))?;
        write_1(f, "SMTP User", &optional(&self.email.smtp_user))?;
        write_1(f, "SMTP Password", &secret(&self.email.smtp_password))?;
        write_1(f, "Recipients", &self.email.recipients.len())?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/netprobe/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```no_run
    /// let cfg = netprobe::config::Config::from_config(None::<&std::path::Path>)?;
    /// println!("{}", cfg);
    /// # Ok::<(), netprobe::config::ConfigError>(())
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Load the file, then let the environment override it
    pub fn load(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let mut config = Self::from_config(optional_path)?;
        config.apply_env(|name| env::var(name).ok())?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let get = |name: &str| lookup(name).and_then(non_empty);

        if let Some(key) = get("GLOBALPING_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Some(provider) = get("NODE_PROVIDER_ID") {
            self.directory.provider_id = Some(provider);
        }
        if let Some(path) = get("NETPROBE_DB_PATH") {
            self.database.path = path;
        }
        if let Some(url) = get("SLACK_WEBHOOK_URL") {
            self.alerts.webhook_url = Some(url);
        }
        if let Some(host) = get("SMTP_HOST") {
            self.email.smtp_host = host;
        }
        if let Some(port) = get("SMTP_PORT") {
            self.email.smtp_port = port
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { name: "SMTP_PORT", value: port.clone() })?;
        }
        if let Some(user) = get("SMTP_USER") {
            self.email.smtp_user = Some(user);
        }
        if let Some(password) = get("SMTP_PASSWORD") {
            self.email.smtp_password = Some(password);
        }
        if let Some(recipients) = get("ALERT_EMAIL_RECIPIENTS") {
            self.email.recipients = recipients.split(',').filter_map(|r| non_empty(r.to_string())).collect();
        }

        Ok(())
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str).map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })
    }
}
