//! 客户端的 TOML 配置。
//!
//! 所有字段都有默认值，配置文件可以只写需要修改的部分：
//!
//! ```toml
//! [connection]
//! host = "127.0.0.1"
//! port = 6379
//!
//! [timeouts]
//! connect_ms = 1000
//! command_ms = 500
//!
//! [reader]
//! max_elements = 1024
//!
//! [logging]
//! level = "debug"
//! ```
use crate::context::Options;
use crate::net::Endpoint;
use crate::DEFAULT_PORT;

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 连接目标和套接字选项
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// 设置后使用 unix 域套接字，忽略 `host` 和 `port`
    pub unix_socket: Option<PathBuf>,
    pub source_addr: Option<String>,
    pub nonblocking: bool,
    pub reuse_addr: bool,
    pub prefer_ipv4: bool,
    pub prefer_ipv6: bool,
    /// keepalive 间隔（秒），0 表示不开启
    pub keepalive_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            unix_socket: None,
            source_addr: None,
            nonblocking: false,
            reuse_addr: false,
            prefer_ipv4: false,
            prefer_ipv6: false,
            keepalive_secs: 0,
        }
    }
}

/// 超时设置，单位为毫秒，0 表示不超时
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_ms: u64,
    pub command_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReaderConfig {
    /// 单个聚合回复的元素上限，0 表示不限制，不设置则使用默认值
    pub max_elements: Option<usize>,
    pub max_buf: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml_str(contents: &str) -> Result<Config, ConfigError> {
        toml::from_str(contents).map_err(ConfigError::TomlParse)
    }

    /// 读取并解析配置文件
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;

        Config::from_toml_str(&contents)
    }

    pub fn endpoint(&self) -> Endpoint {
        match &self.connection.unix_socket {
            Some(path) => Endpoint::Unix(path.clone()),
            None => Endpoint::Tcp {
                host: self.connection.host.clone(),
                port: self.connection.port,
                source_addr: self.connection.source_addr.clone(),
            },
        }
    }

    /// 转换成建立连接使用的 [`Options`]
    pub fn to_options(&self) -> Options {
        Options {
            endpoint: Some(self.endpoint()),
            nonblocking: self.connection.nonblocking,
            reuse_addr: self.connection.reuse_addr,
            prefer_ipv4: self.connection.prefer_ipv4,
            prefer_ipv6: self.connection.prefer_ipv6,
            connect_timeout: millis(self.timeouts.connect_ms),
            command_timeout: millis(self.timeouts.command_ms),
            max_elements: self.reader.max_elements,
            max_buf: self.reader.max_buf,
        }
    }

    /// keepalive 间隔，未开启时返回 `None`
    pub fn keepalive(&self) -> Option<Duration> {
        match self.connection.keepalive_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn millis(ms: u64) -> Option<Duration> {
    match ms {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    }
}

/// 加载配置时的错误
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());

        let options = config.to_options();
        assert_eq!(options.endpoint, Some(Endpoint::tcp("127.0.0.1", DEFAULT_PORT)));
        assert!(!options.nonblocking);
        assert_eq!(options.connect_timeout, None);
        assert_eq!(options.max_elements, None);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn full_document() {
        let config = Config::from_toml_str(
            r#"
            [connection]
            host = "10.0.0.1"
            port = 7000
            source_addr = "10.0.0.2"
            reuse_addr = true
            prefer_ipv4 = true
            keepalive_secs = 30

            [timeouts]
            connect_ms = 1500
            command_ms = 250

            [reader]
            max_elements = 0
            max_buf = 4096

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        let options = config.to_options();
        assert_eq!(
            options.endpoint,
            Some(Endpoint::Tcp {
                host: "10.0.0.1".to_string(),
                port: 7000,
                source_addr: Some("10.0.0.2".to_string()),
            })
        );
        assert!(options.reuse_addr);
        assert!(options.prefer_ipv4);
        assert_eq!(options.connect_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(options.command_timeout, Some(Duration::from_millis(250)));
        assert_eq!(options.max_elements, Some(0));
        assert_eq!(options.max_buf, Some(4096));
        assert_eq!(config.keepalive(), Some(Duration::from_secs(30)));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn unix_socket_wins_over_host() {
        let config = Config::from_toml_str(
            r#"
            [connection]
            unix_socket = "/tmp/redis.sock"
            "#,
        )
        .unwrap();

        assert_eq!(config.endpoint(), Endpoint::unix("/tmp/redis.sock"));
    }

    #[test]
    fn bad_document_is_a_parse_error() {
        let err = Config::from_toml_str("[connection]\nport = \"x\"").unwrap_err();
        assert!(matches!(err, ConfigError::TomlParse(_)));
        assert!(err.to_string().starts_with("Failed to parse config"));
    }

    #[test]
    fn missing_file() {
        let err = Config::load(Path::new("/nonexistent/mini-resp.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(..)));
    }
}
