//! Server configuration: optional TOML file + CLI overrides.

use anyhow::{bail, Context, Result};
use onepipe_core::pipe::{DEFAULT_BUFFER_SIZE, DEFAULT_READ_DEADLINE};
use onepipe_core::{PipeConfig, TargetAddr};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// How the target connection is obtained for each session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TargetMode {
    /// Dial the target for every accepted client.
    #[default]
    Dial,
    /// Dial the target once at startup and reuse it.
    Shared,
}

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub listen: ListenSection,
    #[serde(default)]
    pub target: TargetSection,
    #[serde(default)]
    pub pipe: PipeSection,
}

/// `[listen]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenSection {
    #[serde(default = "default_host")]
    pub host: String,
    /// No default: a listen port must come from the file or `--port`.
    #[serde(default)]
    pub port: u16,
}

impl Default for ListenSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
        }
    }
}

/// `[target]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_target_port")]
    pub port: u16,
    #[serde(default)]
    pub mode: TargetMode,
}

impl Default for TargetSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_target_port(),
            mode: TargetMode::default(),
        }
    }
}

/// `[pipe]` section of the config TOML. Deadlines in milliseconds, 0 = none.
#[derive(Debug, Clone, Deserialize)]
pub struct PipeSection {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_read_deadline_ms")]
    pub target_read_deadline_ms: u64,
    #[serde(default)]
    pub client_read_deadline_ms: u64,
}

impl Default for PipeSection {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            target_read_deadline_ms: default_read_deadline_ms(),
            client_read_deadline_ms: 0,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_target_port() -> u16 {
    80
}
fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}
fn default_read_deadline_ms() -> u64 {
    DEFAULT_READ_DEADLINE.as_millis() as u64
}

/// Values given on the command line. `None` leaves the file value in place.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub listen_host: Option<String>,
    pub port: Option<u16>,
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    pub mode: Option<TargetMode>,
    pub read_deadline_ms: Option<u64>,
}

/// Resolved server configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_host: String,
    pub listen_port: u16,
    pub target: TargetAddr,
    pub mode: TargetMode,
    pub pipe: PipeConfig,
}

impl ServerConfig {
    /// Load config from an optional TOML file, then apply CLI overrides and
    /// validate the result.
    pub fn load(config_path: Option<&Path>, cli: CliOverrides) -> Result<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)
                    .with_context(|| format!("failed to read config at {}", expanded.display()))?;
                toml::from_str::<ConfigFile>(&content)
                    .with_context(|| format!("failed to parse config at {}", expanded.display()))?
            }
            None => ConfigFile::default(),
        };

        let listen_host = cli.listen_host.unwrap_or(file_config.listen.host);
        let listen_port = cli.port.unwrap_or(file_config.listen.port);
        let proxy_host = cli.proxy_host.unwrap_or(file_config.target.host);
        let proxy_port = cli.proxy_port.unwrap_or(file_config.target.port);
        let mode = cli.mode.unwrap_or(file_config.target.mode);
        let target_deadline_ms = cli
            .read_deadline_ms
            .unwrap_or(file_config.pipe.target_read_deadline_ms);

        if listen_port == 0 {
            bail!("port is required");
        }
        if proxy_host.is_empty() {
            bail!("proxy host is required");
        }
        if proxy_port == 0 {
            bail!("proxy port is required");
        }
        if file_config.pipe.buffer_size == 0 {
            bail!("pipe buffer_size must be greater than zero");
        }

        Ok(Self {
            listen_host,
            listen_port,
            target: TargetAddr::new(proxy_host, proxy_port),
            mode,
            pipe: PipeConfig {
                buffer_size: file_config.pipe.buffer_size,
                target_read_deadline: millis(target_deadline_ms),
                client_read_deadline: millis(file_config.pipe.client_read_deadline_ms),
            },
        })
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn with_port(port: u16) -> CliOverrides {
        CliOverrides {
            port: Some(port),
            ..CliOverrides::default()
        }
    }

    #[test]
    fn defaults_without_file() {
        let config = ServerConfig::load(None, with_port(9000)).unwrap();
        assert_eq!(config.listen_host, "localhost");
        assert_eq!(config.listen_port, 9000);
        assert_eq!(config.target, TargetAddr::new("localhost", 80));
        assert_eq!(config.mode, TargetMode::Dial);
        assert_eq!(config.pipe, PipeConfig::default());
    }

    #[test]
    fn port_is_required() {
        let err = ServerConfig::load(None, CliOverrides::default()).unwrap_err();
        assert_eq!(err.to_string(), "port is required");
    }

    #[test]
    fn zero_proxy_port_rejected() {
        let cli = CliOverrides {
            proxy_port: Some(0),
            ..with_port(9000)
        };
        let err = ServerConfig::load(None, cli).unwrap_err();
        assert_eq!(err.to_string(), "proxy port is required");
    }

    #[test]
    fn empty_proxy_host_rejected() {
        let cli = CliOverrides {
            proxy_host: Some(String::new()),
            ..with_port(9000)
        };
        let err = ServerConfig::load(None, cli).unwrap_err();
        assert_eq!(err.to_string(), "proxy host is required");
    }

    #[test]
    fn file_values_loaded() {
        let file = write_config(
            r#"
[listen]
host = "0.0.0.0"
port = 7000

[target]
host = "db.internal"
port = 5432
mode = "shared"

[pipe]
buffer_size = 4096
target_read_deadline_ms = 100
client_read_deadline_ms = 250
"#,
        );
        let config = ServerConfig::load(Some(file.path()), CliOverrides::default()).unwrap();
        assert_eq!(config.listen_host, "0.0.0.0");
        assert_eq!(config.listen_port, 7000);
        assert_eq!(config.target, TargetAddr::new("db.internal", 5432));
        assert_eq!(config.mode, TargetMode::Shared);
        assert_eq!(config.pipe.buffer_size, 4096);
        assert_eq!(config.pipe.target_read_deadline, Some(Duration::from_millis(100)));
        assert_eq!(config.pipe.client_read_deadline, Some(Duration::from_millis(250)));
    }

    #[test]
    fn cli_overrides_file() {
        let file = write_config(
            r#"
[listen]
port = 7000

[target]
host = "db.internal"
port = 5432
mode = "shared"
"#,
        );
        let cli = CliOverrides {
            listen_host: Some("127.0.0.1".into()),
            port: Some(7100),
            proxy_host: Some("cache.internal".into()),
            proxy_port: Some(6379),
            mode: Some(TargetMode::Dial),
            read_deadline_ms: Some(0),
        };
        let config = ServerConfig::load(Some(file.path()), cli).unwrap();
        assert_eq!(config.listen_host, "127.0.0.1");
        assert_eq!(config.listen_port, 7100);
        assert_eq!(config.target, TargetAddr::new("cache.internal", 6379));
        assert_eq!(config.mode, TargetMode::Dial);
        assert_eq!(config.pipe.target_read_deadline, None);
    }

    #[test]
    fn missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(ServerConfig::load(Some(&path), with_port(9000)).is_err());
    }

    #[test]
    fn unknown_mode_is_error() {
        let file = write_config("[target]\nmode = \"broadcast\"\n");
        let err = ServerConfig::load(Some(file.path()), with_port(9000)).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config"));
    }

    #[test]
    fn zero_buffer_rejected() {
        let file = write_config("[pipe]\nbuffer_size = 0\n");
        assert!(ServerConfig::load(Some(file.path()), with_port(9000)).is_err());
    }

    #[test]
    fn tilde_expansion() {
        let plain = Path::new("/etc/onepipe.toml");
        assert_eq!(expand_tilde(plain), PathBuf::from("/etc/onepipe.toml"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/onepipe.toml")), home.join("onepipe.toml"));
        }
    }
}
