use crate::error::BridgeError;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wcb_common::session::{PeerMeta, DEFAULT_CHAIN_ID};
use wcb_common::SymmetricKey;

/// CLI interface for the bridge client.
#[derive(Parser)]
#[command(name = "wcbc", about = "Wallet bridge client")]
#[command(version)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a custom configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Bridge host override, e.g. `a.bridge.walletconnect.org`.
    #[arg(long, global = true)]
    pub relay: Option<String>,

    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write logs to a file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Pair with a wallet and forward transactions from stdin for signing.
    Pair {
        /// Application name shown in the wallet.
        #[arg(long)]
        name: Option<String>,
        /// Application description shown in the wallet.
        #[arg(long)]
        description: Option<String>,
        /// Application URL shown in the wallet.
        #[arg(long)]
        url: Option<String>,
        /// Chain id announced in the session request.
        #[arg(long)]
        chain_id: Option<u64>,
        /// Print only the pairing URL, no QR code.
        #[arg(long)]
        no_qr: bool,
    },
    /// Generate a new symmetric key.
    Keygen,
}

/// Runtime configuration loaded from file, env, and defaults.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct ClientConfig {
    /// Bridge relay selection.
    pub relay: RelayConfig,
    /// Hex-encoded 256-bit key; a fresh one is generated when absent.
    #[serde(default)]
    pub key: Option<String>,
    /// WebSocket keepalive ping settings.
    pub keepalive: KeepaliveConfig,
    /// Request deadline settings.
    pub request: RequestConfig,
    /// Metadata and chain announced in session requests.
    pub session: SessionConfig,
    /// Unsolicited message channel settings.
    pub notifications: NotificationConfig,
}

/// Bridge relay selection.
#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    /// Fixed bridge host. When unset, one of `shards` is picked per connection.
    #[serde(default)]
    pub host: Option<String>,
    /// Candidate bridge hosts.
    pub shards: Vec<String>,
    /// Use `wss://`; `false` selects plain `ws://` for local bridges.
    pub secure: bool,
}

/// WebSocket keepalive settings.
#[derive(Debug, Deserialize, Clone)]
pub struct KeepaliveConfig {
    /// Interval between keepalive pings, in seconds. `0` disables pings.
    pub interval_s: u64,
}

/// Request deadline settings.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct RequestConfig {
    /// Seconds to wait for a response. `0` waits indefinitely.
    pub timeout_s: u64,
}

/// Session request settings.
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Chain id announced in `wc_sessionRequest`.
    pub chain_id: u64,
    /// Application name.
    pub name: String,
    /// Application description.
    pub description: String,
    /// Application URL.
    pub url: String,
    /// Application icon URLs.
    pub icons: Vec<String>,
}

/// Notification channel settings.
#[derive(Debug, Deserialize, Clone)]
pub struct NotificationConfig {
    /// Buffered unsolicited messages before new ones are dropped.
    pub capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: None,
            shards: ('a'..='z')
                .map(|c| format!("{c}.bridge.walletconnect.org"))
                .collect(),
            secure: true,
        }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self { interval_s: 30 }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            name: "wcbc".to_string(),
            description: "Wallet bridge client".to_string(),
            url: String::new(),
            icons: Vec::new(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

fn is_bare_host(host: &str) -> bool {
    !host.is_empty() && !host.contains("://") && !host.contains('/')
}

impl ClientConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        match &self.relay.host {
            Some(host) if !is_bare_host(host) => {
                return Err(format!(
                    "relay.host must be a bare host name without scheme or path, got: {host}"
                ));
            }
            Some(_) => {}
            None => {
                if self.relay.shards.is_empty() {
                    return Err("relay.shards must not be empty when relay.host is unset".to_string());
                }
                if let Some(bad) = self.relay.shards.iter().find(|h| !is_bare_host(h)) {
                    return Err(format!(
                        "relay.shards entries must be bare host names, got: {bad:?}"
                    ));
                }
            }
        }

        if let Some(ref key) = self.key {
            SymmetricKey::from_hex(key).map_err(|e| format!("key is not a 32-byte hex key: {e}"))?;
        }

        if self.notifications.capacity == 0 {
            return Err("notifications.capacity must be greater than 0".to_string());
        }

        if self.session.chain_id == 0 {
            return Err("session.chain_id must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Parsed symmetric key, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Crypto`] if `key` is not 64 hex characters.
    pub fn symmetric_key(&self) -> Result<Option<SymmetricKey>, BridgeError> {
        self.key
            .as_deref()
            .map(SymmetricKey::from_hex)
            .transpose()
            .map_err(BridgeError::from)
    }

    /// Keepalive ping interval, `None` when disabled.
    #[must_use]
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive.interval_s > 0).then(|| Duration::from_secs(self.keepalive.interval_s))
    }

    /// Per-request deadline, `None` to wait indefinitely.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request.timeout_s > 0).then(|| Duration::from_secs(self.request.timeout_s))
    }

    /// Metadata announced in session requests.
    #[must_use]
    pub fn peer_meta(&self) -> PeerMeta {
        PeerMeta {
            description: self.session.description.clone(),
            url: self.session.url.clone(),
            icons: self.session.icons.clone(),
            name: self.session.name.clone(),
        }
    }
}

/// # Errors
///
/// Returns an error if the configuration file cannot be read or parsed.
#[allow(clippy::cast_possible_wrap)]
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ClientConfig> {
    let defaults = ClientConfig::default();
    let mut builder = config::Config::builder()
        .set_default("relay.shards", defaults.relay.shards.clone())?
        .set_default("relay.secure", defaults.relay.secure)?
        .set_default("keepalive.interval_s", defaults.keepalive.interval_s as i64)?
        .set_default("request.timeout_s", defaults.request.timeout_s as i64)?
        .set_default("session.chain_id", defaults.session.chain_id as i64)?
        .set_default("session.name", defaults.session.name.as_str())?
        .set_default("session.description", defaults.session.description.as_str())?
        .set_default("session.url", defaults.session.url.as_str())?
        .set_default("session.icons", defaults.session.icons.clone())?
        .set_default(
            "notifications.capacity",
            defaults.notifications.capacity as i64,
        )?;

    if let Some(config_path) = path {
        if config_path.exists() {
            builder = builder.add_source(config::File::from(config_path));
        }
    } else {
        // Check platform-native config dir first, then fall back to ~/.config/wcbc/
        let native_path = dirs::config_dir().map(|d| d.join("wcbc").join("config.toml"));
        let xdg_path = dirs::home_dir().map(|d| d.join(".config").join("wcbc").join("config.toml"));

        let resolved = native_path
            .filter(|p| p.exists())
            .or_else(|| xdg_path.filter(|p| p.exists()));

        if let Some(config_path) = resolved {
            builder = builder.add_source(config::File::from(config_path));
        }
    }

    // WCBC_RELAY__HOST, WCBC_KEEPALIVE__INTERVAL_S, WCBC_RELAY__SHARDS=a.x,b.x
    builder = builder.add_source(
        config::Environment::with_prefix("WCBC")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("relay.shards")
            .with_list_parse_key("session.icons"),
    );

    let settings = builder.build()?;
    let config: ClientConfig = settings.try_deserialize()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::field_reassign_with_default)]
    use super::*;
    use std::io::Write;

    #[test]
    fn test_client_config_default_has_expected_values() {
        let config = ClientConfig::default();

        assert!(config.relay.host.is_none());
        assert_eq!(config.relay.shards.len(), 26);
        assert_eq!(config.relay.shards[0], "a.bridge.walletconnect.org");
        assert_eq!(config.relay.shards[25], "z.bridge.walletconnect.org");
        assert!(config.relay.secure);
        assert_eq!(config.session.chain_id, 4160);
        assert_eq!(config.notifications.capacity, 64);
    }

    #[test]
    fn test_load_config_with_no_file_returns_defaults() {
        let config = load_config(Some(std::path::Path::new("/nonexistent/config.toml")))
            .expect("load_config should succeed with no file");

        assert!(config.relay.host.is_none());
        assert_eq!(config.relay.shards.len(), 26);
        assert_eq!(config.keepalive.interval_s, 30);
        assert_eq!(config.request.timeout_s, 0);
        assert!(config.key.is_none());
    }

    #[test]
    fn test_load_config_reads_toml_file() {
        let dir = std::env::temp_dir().join(format!("wcbc-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "key = \"{}\"\n[relay]\nhost = \"127.0.0.1:9000\"\nsecure = false\n[request]\ntimeout_s = 5",
            "ab".repeat(32)
        )
        .unwrap();
        drop(file);

        let config = load_config(Some(path.as_path())).unwrap();
        assert_eq!(config.relay.host.as_deref(), Some("127.0.0.1:9000"));
        assert!(!config.relay.secure);
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(
            config.symmetric_key().unwrap(),
            Some(SymmetricKey::from_bytes([0xab; 32]))
        );
        assert!(config.validate().is_ok());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_default_config_passes_validation() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_host_with_scheme() {
        let mut config = ClientConfig::default();
        config.relay.host = Some("wss://a.bridge.walletconnect.org".to_string());
        assert!(config.validate().unwrap_err().contains("relay.host"));
    }

    #[test]
    fn test_validate_rejects_empty_shards_without_host() {
        let mut config = ClientConfig::default();
        config.relay.shards.clear();
        assert!(config.validate().unwrap_err().contains("relay.shards"));

        config.relay.host = Some("localhost:8080".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_key() {
        let mut config = ClientConfig::default();
        config.key = Some("abcd".to_string());
        assert!(config.validate().unwrap_err().contains("key"));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = ClientConfig::default();
        config.notifications.capacity = 0;
        assert!(config
            .validate()
            .unwrap_err()
            .contains("notifications.capacity"));
    }

    #[test]
    fn test_zero_intervals_disable() {
        let mut config = ClientConfig::default();
        assert_eq!(config.keepalive_interval(), Some(Duration::from_secs(30)));
        assert_eq!(config.request_timeout(), None);

        config.keepalive.interval_s = 0;
        assert_eq!(config.keepalive_interval(), None);
    }

    #[test]
    fn test_peer_meta_from_session_config() {
        let mut config = ClientConfig::default();
        config.session.name = "dapp".to_string();
        config.session.icons = vec!["https://x/icon.png".to_string()];
        let meta = config.peer_meta();
        assert_eq!(meta.name, "dapp");
        assert_eq!(meta.icons.len(), 1);
    }
}
