//! Configuration file handling.
//!
//! Settings live in an INI file, by default `<config dir>/viewgrab/config.ini`:
//!
//! ```ini
//! [local]
//! directory = ./scans/fond-12
//! destination = /archive/scans
//!
//! [remote]
//! url = https://gato.tularegion.ru/srv/viewer?id=...
//! username = reader
//! password = secret
//! ; login_url = https://gato.tularegion.ru/auth
//! allow_spend = no
//!
//! [proxy]
//! https = http://127.0.0.1:3128
//!
//! [headers]
//! User-Agent = Mozilla/5.0 ...
//! Host = gato.tularegion.ru
//!
//! [download]
//! max_attempts = 4
//! timeout = 30
//! pause_min = 0.3
//! pause_max = 1.0
//! notice_pause = 3
//! ```
//!
//! The `[headers]` section usually comes straight from a browser's request
//! dump, so three keys are interpreted instead of forwarded: `Host` sets the
//! origin, `GET` names the index page and `Cookie` is dropped.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::fetch::DEFAULT_MAX_ATTEMPTS;
use crate::session::{Credentials, Endpoints, SessionContext, DEFAULT_BASE_HOST};

/// Errors from reading, writing or interpreting the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read { path: PathBuf, source: ini::Error },

    #[error("failed to write config {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("invalid value '{value}' for {section}.{key}: {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("no index page given: set remote.url, a GET header, or use --url")]
    MissingIndexUrl,

    #[error("username and password are required: set remote.username and remote.password, or use -n and -p")]
    MissingCredentials,
}

/// Default location of the configuration file.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("viewgrab")
        .join("config.ini")
}

/// Timestamped directory name used when none is configured.
pub fn default_directory_name() -> String {
    chrono::Local::now().format("%Y-%m-%d_%H:%M:%S").to_string()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalSettings {
    /// Where images are written during the run.
    pub directory: Option<PathBuf>,
    /// Where the finished directory is moved, if it exists.
    pub destination: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteSettings {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Overrides the login exchange endpoint.
    pub login_url: Option<String>,
    pub allow_spend: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProxySettings {
    pub http: Option<String>,
    pub https: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSettings {
    pub max_attempts: u32,
    pub timeout_secs: u64,
    pub pause_min_secs: f64,
    pub pause_max_secs: f64,
    pub notice_pause_secs: f64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout_secs: crate::http::DEFAULT_TIMEOUT_SECS,
            pause_min_secs: 0.3,
            pause_max_secs: 1.0,
            notice_pause_secs: 3.0,
        }
    }
}

impl DownloadSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn pause_min(&self) -> Duration {
        saturating_secs(self.pause_min_secs)
    }

    pub fn pause_max(&self) -> Duration {
        saturating_secs(self.pause_max_secs)
    }

    pub fn notice_pause(&self) -> Duration {
        saturating_secs(self.notice_pause_secs)
    }
}

/// Negative or NaN seconds become zero, overflowing ones `Duration::MAX`.
fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub local: LocalSettings,
    pub remote: RemoteSettings,
    pub proxy: ProxySettings,
    /// Raw `[headers]` section, special keys included.
    pub headers: BTreeMap<String, String>,
    pub download: DownloadSettings,
}

impl ConfigFile {
    /// Load from the default path. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini(&ini)
    }

    /// Parse INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Read {
            path: PathBuf::from("<string>"),
            source: ini::Error::Parse(e),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let local = LocalSettings {
            directory: value(ini, "local", "directory").map(PathBuf::from),
            destination: value(ini, "local", "destination").map(PathBuf::from),
        };

        let remote = RemoteSettings {
            url: value(ini, "remote", "url").map(str::to_string),
            username: value(ini, "remote", "username").map(str::to_string),
            password: value(ini, "remote", "password").map(str::to_string),
            login_url: value(ini, "remote", "login_url").map(str::to_string),
            allow_spend: parse_bool(ini, "remote", "allow_spend")?.unwrap_or(false),
        };

        let proxy = ProxySettings {
            http: value(ini, "proxy", "http").map(str::to_string),
            https: value(ini, "proxy", "https").map(str::to_string),
        };

        let headers = ini
            .section(Some("headers"))
            .map(|props| {
                props
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.trim().to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let defaults = DownloadSettings::default();
        let download = DownloadSettings {
            max_attempts: parse_number(ini, "download", "max_attempts")?
                .unwrap_or(defaults.max_attempts),
            timeout_secs: parse_number(ini, "download", "timeout")?
                .unwrap_or(defaults.timeout_secs),
            pause_min_secs: parse_seconds(ini, "download", "pause_min")?
                .unwrap_or(defaults.pause_min_secs),
            pause_max_secs: parse_seconds(ini, "download", "pause_max")?
                .unwrap_or(defaults.pause_max_secs),
            notice_pause_secs: parse_seconds(ini, "download", "notice_pause")?
                .unwrap_or(defaults.notice_pause_secs),
        };

        if !(1..=DEFAULT_MAX_ATTEMPTS).contains(&download.max_attempts) {
            return Err(ConfigError::InvalidValue {
                section: "download".to_string(),
                key: "max_attempts".to_string(),
                value: download.max_attempts.to_string(),
                reason: format!("must be between 1 and {}", DEFAULT_MAX_ATTEMPTS),
            });
        }

        Ok(Self {
            local,
            remote,
            proxy,
            headers,
            download,
        })
    }

    /// Save to the default path.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    /// Save to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        self.to_ini().write_to_file(path).map_err(write_err)
    }

    fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();

        let mut local = ini.with_section(Some("local"));
        if let Some(dir) = &self.local.directory {
            local.set("directory", dir.to_string_lossy());
        }
        if let Some(dest) = &self.local.destination {
            local.set("destination", dest.to_string_lossy());
        }

        let mut remote = ini.with_section(Some("remote"));
        for (key, val) in [
            ("url", &self.remote.url),
            ("username", &self.remote.username),
            ("password", &self.remote.password),
            ("login_url", &self.remote.login_url),
        ] {
            if let Some(v) = val {
                remote.set(key, v.as_str());
            }
        }
        remote.set("allow_spend", if self.remote.allow_spend { "yes" } else { "no" });

        let mut proxy = ini.with_section(Some("proxy"));
        if let Some(http) = &self.proxy.http {
            proxy.set("http", http.as_str());
        }
        if let Some(https) = &self.proxy.https {
            proxy.set("https", https.as_str());
        }

        let mut headers = ini.with_section(Some("headers"));
        for (k, v) in &self.headers {
            headers.set(k.as_str(), v.as_str());
        }

        ini.with_section(Some("download"))
            .set("max_attempts", self.download.max_attempts.to_string())
            .set("timeout", self.download.timeout_secs.to_string())
            .set("pause_min", self.download.pause_min_secs.to_string())
            .set("pause_max", self.download.pause_max_secs.to_string())
            .set("notice_pause", self.download.notice_pause_secs.to_string());

        ini
    }

    /// Origin of the service: `https://<Host header>` or the default host.
    pub fn base_host(&self) -> String {
        match self.header("Host") {
            Some(host) => format!("https://{}", host),
            None => DEFAULT_BASE_HOST.to_string(),
        }
    }

    /// Index page URL from `remote.url`, else from the `GET` header line.
    pub fn index_url(&self) -> Option<String> {
        if let Some(url) = &self.remote.url {
            return Some(url.clone());
        }
        let path = self.header("GET")?.split_whitespace().next()?;
        let base = self.base_host();
        if path.starts_with('/') {
            Some(format!("{}{}", base, path))
        } else {
            Some(format!("{}/{}", base, path))
        }
    }

    /// Directory to write into, timestamped if unset.
    pub fn output_directory(&self) -> PathBuf {
        self.local
            .directory
            .clone()
            .unwrap_or_else(|| PathBuf::from(default_directory_name()))
    }

    /// Build the session this configuration describes.
    pub fn to_session(&self) -> SessionContext {
        let mut endpoints = Endpoints::for_host(self.base_host());
        if let Some(login_url) = &self.remote.login_url {
            endpoints = endpoints.with_auth_url(login_url.as_str());
        }

        let mut credentials = Credentials::default();
        if let Some(username) = &self.remote.username {
            credentials.set_username(username.as_str());
        }
        if let Some(password) = &self.remote.password {
            credentials.set_password(password.as_str());
        }

        let mut session = SessionContext::new(endpoints)
            .with_credentials(credentials)
            .with_allow_spend(self.remote.allow_spend);

        for (name, val) in &self.headers {
            if is_interpreted_header(name) || val.is_empty() {
                continue;
            }
            session.headers.insert(name.clone(), val.clone());
        }

        if let Some(http) = &self.proxy.http {
            session.proxies.insert("http".to_string(), http.clone());
        }
        if let Some(https) = &self.proxy.https {
            session.proxies.insert("https".to_string(), https.clone());
        }

        session
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }
}

fn is_interpreted_header(name: &str) -> bool {
    ["Host", "GET", "Cookie"]
        .iter()
        .any(|special| name.eq_ignore_ascii_case(special))
}

/// Non-empty, trimmed value.
fn value<'a>(ini: &'a Ini, section: &str, key: &str) -> Option<&'a str> {
    ini.get_from(Some(section), key)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn invalid(section: &str, key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_bool(ini: &Ini, section: &str, key: &str) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = value(ini, section, key) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" | "1" => Ok(Some(true)),
        "no" | "false" | "off" | "0" => Ok(Some(false)),
        _ => Err(invalid(section, key, raw, "expected yes or no")),
    }
}

fn parse_number<T: std::str::FromStr>(
    ini: &Ini,
    section: &str,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = value(ini, section, key) else {
        return Ok(None);
    };
    raw.parse()
        .map(Some)
        .map_err(|_| invalid(section, key, raw, "expected a whole number"))
}

fn parse_seconds(ini: &Ini, section: &str, key: &str) -> Result<Option<f64>, ConfigError> {
    let Some(raw) = value(ini, section, key) else {
        return Ok(None);
    };
    match raw.parse::<f64>() {
        Ok(secs) if secs >= 0.0 && Duration::try_from_secs_f64(secs).is_ok() => Ok(Some(secs)),
        _ => Err(invalid(section, key, raw, "expected a non-negative number of seconds")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[local]
directory = ./out/fond-12
destination = /archive

[remote]
username = reader
password = secret
allow_spend = yes

[proxy]
http =
https = http://127.0.0.1:3128

[headers]
User-Agent = Mozilla/5.0
Host = mirror.example.org
GET = /srv/viewer?id=77 HTTP/1.1
Cookie = JSESSIONID=stale

[download]
max_attempts = 3
pause_min = 0
pause_max = 0.5
"#;

    #[test]
    fn test_parse_sample() {
        let config = ConfigFile::parse(SAMPLE).unwrap();

        assert_eq!(config.local.directory, Some(PathBuf::from("./out/fond-12")));
        assert_eq!(config.local.destination, Some(PathBuf::from("/archive")));
        assert_eq!(config.remote.username.as_deref(), Some("reader"));
        assert!(config.remote.allow_spend);
        assert_eq!(config.proxy.http, None);
        assert_eq!(config.proxy.https.as_deref(), Some("http://127.0.0.1:3128"));
        assert_eq!(config.download.max_attempts, 3);
        assert_eq!(config.download.pause_max(), Duration::from_millis(500));
        assert_eq!(config.download.timeout_secs, 30);
    }

    #[test]
    fn test_special_headers_are_interpreted() {
        let config = ConfigFile::parse(SAMPLE).unwrap();

        assert_eq!(config.base_host(), "https://mirror.example.org");
        assert_eq!(
            config.index_url().as_deref(),
            Some("https://mirror.example.org/srv/viewer?id=77")
        );

        let session = config.to_session();
        assert_eq!(session.headers.get("User-Agent").unwrap(), "Mozilla/5.0");
        assert!(!session.headers.contains_key("Host"));
        assert!(!session.headers.contains_key("GET"));
        assert!(!session.headers.contains_key("Cookie"));
    }

    #[test]
    fn test_to_session() {
        let session = ConfigFile::parse(SAMPLE).unwrap().to_session();

        assert_eq!(session.endpoints.base_host, "https://mirror.example.org");
        assert_eq!(session.endpoints.auth_url, "https://mirror.example.org/auth");
        assert!(session.credentials.is_complete());
        assert!(session.allow_spend);
        assert_eq!(session.proxies.len(), 1);
        assert_eq!(session.proxies.get("https").unwrap(), "http://127.0.0.1:3128");
        assert_eq!(session.token(), None);
    }

    #[test]
    fn test_login_url_overrides_auth_endpoint() {
        let config = ConfigFile::parse("[remote]\nlogin_url = https://sso.example.org/auth\n").unwrap();
        assert_eq!(
            config.to_session().endpoints.auth_url,
            "https://sso.example.org/auth"
        );
    }

    #[test]
    fn test_remote_url_wins_over_get_header() {
        let config = ConfigFile::parse(
            "[remote]\nurl = https://example.org/a\n[headers]\nGET = /b HTTP/1.1\n",
        )
        .unwrap();
        assert_eq!(config.index_url().as_deref(), Some("https://example.org/a"));
    }

    #[test]
    fn test_defaults() {
        let config = ConfigFile::parse("").unwrap();
        assert_eq!(config.base_host(), DEFAULT_BASE_HOST);
        assert_eq!(config.index_url(), None);
        assert_eq!(config.download, DownloadSettings::default());
        assert!(!config.remote.allow_spend);
        assert!(!config.to_session().credentials.is_complete());
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            ConfigFile::parse("[download]\npause_max = 1e30\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            ConfigFile::parse("[download]\nnotice_pause = inf\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            ConfigFile::parse("[remote]\nallow_spend = maybe\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            ConfigFile::parse("[download]\nmax_attempts = 9\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            ConfigFile::parse("[download]\ntimeout = soon\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            ConfigFile::parse("[download]\npause_min = -1\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_out_of_range_seconds_saturate() {
        let download = DownloadSettings {
            pause_min_secs: -1.0,
            pause_max_secs: 1e30,
            notice_pause_secs: f64::NAN,
            ..DownloadSettings::default()
        };
        assert_eq!(download.pause_min(), Duration::ZERO);
        assert_eq!(download.pause_max(), Duration::MAX);
        assert_eq!(download.notice_pause(), Duration::ZERO);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ConfigFile::load_from(&dir.path().join("absent.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.ini");
        let config = ConfigFile::parse(SAMPLE).unwrap();

        config.save_to(&path).unwrap();
        let reloaded = ConfigFile::load_from(&path).unwrap();

        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_output_directory_defaults_to_timestamp() {
        let config = ConfigFile::default();
        let dir = config.output_directory();
        let name = dir.to_string_lossy();
        assert_eq!(name.len(), "2024-01-31_12:00:00".len());
        assert!(name.contains('_'));
    }
}
