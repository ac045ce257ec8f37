//! File configuration shared by the hio tools.
//!
//! ```toml
//! [log]
//! verbosity = "concise"
//!
//! [server]
//! host = "0.0.0.0"
//! port = 7878
//!
//! [tls]
//! certify = "required"
//! certpath = "server.pem"
//! keypath = "server.key"
//! ```

use hio_core::{Error, Result, Verbosity};
use hio_tls::TlsConfig;
use hio_transport::BUF_SIZE;
use hio_wirelog::{WireLog, WireLogConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 7878;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub wirelog: Option<WireLogConfig>,
    pub server: ServerSection,
    pub client: ClientSection,
    /// Absent means plain TCP.
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Per-transport event gate.
    pub verbosity: Verbosity,
    /// `tracing` filter directive; `RUST_LOG` wins when set.
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub bufsize: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            bufsize: BUF_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub host: String,
    pub port: u16,
    pub bufsize: usize,
    /// Reconnect interval in milliseconds; absent disables reconnecting.
    pub reconnect_ms: Option<u64>,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            bufsize: BUF_SIZE,
            reconnect_ms: None,
        }
    }
}

impl ClientSection {
    pub fn reconnect(&self) -> Option<Duration> {
        self.reconnect_ms.map(Duration::from_millis)
    }
}

impl Config {
    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        content.parse()
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.bufsize == 0 || self.client.bufsize == 0 {
            return Err(Error::Config("bufsize must be positive".into()));
        }
        if let Some(tls) = &self.tls {
            tls.validate()?;
        }
        Ok(())
    }

    /// Open the configured wire recorder, if any.
    ///
    /// `prefix` and `midfix` name the files, e.g. the tool and its address.
    pub fn open_wirelog(&self, prefix: &str, midfix: &str) -> Option<WireLog> {
        let wlog = WireLog::new(self.wirelog.clone()?);
        if !wlog.reopen(prefix, midfix) {
            tracing::warn!(prefix, midfix, "wire log could not be opened");
        }
        Some(wlog)
    }
}

impl std::str::FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(|e| Error::Config(format!("Parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hio_tls::{Certify, Version};

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = "".parse().unwrap();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.client.bufsize, BUF_SIZE);
        assert_eq!(config.log.verbosity, Verbosity::Mute);
        assert!(config.tls.is_none());
        assert!(config.wirelog.is_none());
        assert_eq!(config.client.reconnect(), None);
    }

    #[test]
    fn sections_parse() {
        let config: Config = r#"
            [log]
            verbosity = "verbose"
            filter = "hio=debug"

            [wirelog]
            path = "/tmp/hio-wire"
            same = true

            [client]
            host = "localhost"
            port = 9000
            reconnect_ms = 250

            [tls]
            version = "tls13"
            certify = "optional"
            servername = "localhost"
        "#
        .parse()
        .unwrap();
        assert_eq!(config.log.verbosity, Verbosity::Verbose);
        assert_eq!(config.log.filter.as_deref(), Some("hio=debug"));
        let wirelog = config.wirelog.unwrap();
        assert!(wirelog.same && wirelog.rx && wirelog.tx);
        assert_eq!(config.client.host, "localhost");
        assert_eq!(config.client.reconnect(), Some(Duration::from_millis(250)));
        let tls = config.tls.unwrap();
        assert_eq!(tls.version, Version::Tls13);
        assert_eq!(tls.certify, Certify::Optional);
        assert!(tls.hostify);
    }

    #[test]
    fn invalid_tls_options_are_rejected() {
        let result: Result<Config> = "[tls]\nkeypath = \"server.key\"\n".parse();
        assert!(matches!(result, Err(Error::Config(_))));
        // one section serves both ends; the client-only hostify rule waits for client_config
        let shared: Result<Config> = "[tls]\ncertify = \"none\"\n".parse();
        assert!(shared.is_ok());
    }

    #[test]
    fn malformed_input_is_config_error() {
        assert!(matches!("[server]\nport = \"high\"".parse::<Config>(), Err(Error::Config(_))));
        assert!(matches!("[server]\nbufsize = 0".parse::<Config>(), Err(Error::Config(_))));
        assert!(matches!(
            Config::load(Path::new("/nonexistent/hio.toml")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn buffered_wirelog_needs_no_directory() {
        let config: Config = "[wirelog]\nbuffify = true\n".parse().unwrap();
        let wlog = config.open_wirelog("test", "addr").unwrap();
        wlog.write_rx(&"peer", b"data");
        assert_eq!(wlog.get_rx(), b"RX peer\ndata\n");
    }
}
