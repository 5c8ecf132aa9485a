//! Configuration types for scan signaling and peer connections

use crate::{Error, Result};
use docscan_core::StabilityConfig;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Main configuration for a scan session on either side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanTransportConfig {
    /// WebSocket signaling relay URL (ws:// or wss://)
    pub signaling_url: String,

    /// STUN server URLs
    pub stun_servers: Vec<String>,

    /// TURN relays (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Public (tunnel) base URL of the desktop app for the phone join link.
    /// Unset means the link points at this machine's LAN address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,

    /// Port the desktop app listens on, used for the LAN join link
    pub app_port: u16,

    /// How long the desktop waits in `connect` for the phone's video (default: 60)
    pub connect_timeout_secs: u64,

    /// Phone-side stability detection and capture settings
    pub stability: StabilityConfig,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN URLs (turn: or turns:)
    pub urls: Vec<String>,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

impl Default for ScanTransportConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080".to_string(),
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            turn_servers: vec![],
            public_base_url: None,
            app_port: 3000,
            connect_timeout_secs: 60,
            stability: StabilityConfig::default(),
        }
    }
}

impl ScanTransportConfig {
    /// Connect-step timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Base URL the phone join link is built on
    ///
    /// The public URL when configured, otherwise `http://<lan-ip>:<app_port>`
    /// using this machine's LAN IPv4 address.
    pub fn join_base_url(&self) -> String {
        let lan_ip = match local_ip_address::local_ip() {
            Ok(ip) => Some(ip),
            Err(e) => {
                warn!("Could not determine LAN address for join link: {}", e);
                None
            }
        };
        self.join_base_url_with(lan_ip)
    }

    /// Like [`join_base_url`](Self::join_base_url) with a known LAN address
    pub fn join_base_url_with(&self, lan_ip: Option<IpAddr>) -> String {
        if let Some(base) = &self.public_base_url {
            return base.trim_end_matches('/').to_string();
        }

        // Phones can only reach a non-loopback IPv4 address.
        let host = match lan_ip {
            Some(ip @ IpAddr::V4(v4)) if !v4.is_loopback() && !v4.is_unspecified() => {
                ip.to_string()
            }
            _ => {
                warn!("No LAN IPv4 address, join link will only work on this machine");
                "localhost".to_string()
            }
        };
        format!("http://{}:{}", host, self.app_port)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not ws:// or wss://
    /// - no STUN or TURN server is configured
    /// - a STUN URL lacks the `stun:`/`stuns:` scheme
    /// - a TURN entry has no URLs or a URL lacks the `turn:`/`turns:` scheme
    /// - `public_base_url` is set but not http:// or https://
    /// - `connect_timeout_secs` is zero
    /// - the nested stability settings are invalid
    pub fn validate(&self) -> Result<()> {
        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got: {}",
                self.signaling_url
            )));
        }

        if self.stun_servers.is_empty() && self.turn_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one STUN or TURN server is required".to_string(),
            ));
        }

        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN URL must start with stun: or stuns:, got: {}",
                    url
                )));
            }
        }

        for turn in &self.turn_servers {
            if turn.urls.is_empty() {
                return Err(Error::InvalidConfig(
                    "TURN server entry has no URLs".to_string(),
                ));
            }
            for url in &turn.urls {
                if !url.starts_with("turn:") && !url.starts_with("turns:") {
                    return Err(Error::InvalidConfig(format!(
                        "TURN URL must start with turn: or turns:, got: {}",
                        url
                    )));
                }
            }
        }

        if let Some(base) = &self.public_base_url {
            if !base.starts_with("http://") && !base.starts_with("https://") {
                return Err(Error::InvalidConfig(format!(
                    "public_base_url must start with http:// or https://, got: {}",
                    base
                )));
            }
        }

        if self.connect_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        self.stability.validate()?;

        Ok(())
    }

    /// Load from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ScanTransportConfig = toml::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `SCAN_*` environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("SCAN_SIGNALING_URL") {
            config.signaling_url = url;
        }
        if let Some(list) = lookup("SCAN_STUN_SERVERS") {
            config.stun_servers = split_list(&list);
        }
        if let Some(url) = lookup("SCAN_PUBLIC_URL") {
            if !url.trim().is_empty() {
                config.public_base_url = Some(url.trim().to_string());
            }
        }
        if let Some(port) = lookup("SCAN_APP_PORT") {
            if let Ok(p) = port.trim().parse() {
                config.app_port = p;
            }
        }
        if let Some(secs) = lookup("SCAN_CONNECT_TIMEOUT_SECS") {
            if let Ok(s) = secs.trim().parse() {
                config.connect_timeout_secs = s;
            }
        }

        // A TURN relay needs all three values; a partial set is ignored.
        if let (Some(urls), Some(username), Some(credential)) = (
            lookup("SCAN_TURN_URLS"),
            lookup("SCAN_TURN_USERNAME"),
            lookup("SCAN_TURN_CREDENTIAL"),
        ) {
            config.turn_servers.push(TurnServerConfig {
                urls: split_list(&urls),
                username,
                credential,
            });
        }

        config
    }

    /// Load from a file if one exists at `path`, otherwise from the environment
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        if let Some(p) = path {
            if p.as_ref().exists() {
                return Self::from_file(p);
            }
        }
        let config = Self::from_env();
        config.validate()?;
        Ok(config)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ScanTransportConfig::default();
        assert_eq!(config.signaling_url, "ws://localhost:8080");
        assert_eq!(config.stun_servers.len(), 2);
        assert!(config.turn_servers.is_empty());
        assert_eq!(config.connect_timeout(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_signaling_url() {
        let config = ScanTransportConfig {
            signaling_url: "http://localhost:8080".to_string(),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn test_no_ice_servers() {
        let config = ScanTransportConfig {
            stun_servers: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_turn_only_is_valid() {
        let config = ScanTransportConfig {
            stun_servers: vec![],
            turn_servers: vec![TurnServerConfig {
                urls: vec!["turn:relay.example:3478".to_string()],
                username: "u".to_string(),
                credential: "p".to_string(),
            }],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_stability_is_rejected() {
        let mut config = ScanTransportConfig::default();
        config.stability.jpeg_quality = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = ScanTransportConfig::from_lookup(lookup(&[
            ("SCAN_SIGNALING_URL", "wss://relay.example"),
            ("SCAN_STUN_SERVERS", "stun:a:3478, stun:b:3478,"),
            ("SCAN_CONNECT_TIMEOUT_SECS", "15"),
            ("SCAN_PUBLIC_URL", "https://clinic.example"),
        ]));
        assert_eq!(config.signaling_url, "wss://relay.example");
        assert_eq!(config.stun_servers, vec!["stun:a:3478", "stun:b:3478"]);
        assert_eq!(config.connect_timeout_secs, 15);
        assert_eq!(config.public_base_url.as_deref(), Some("https://clinic.example"));
    }

    #[test]
    fn test_public_url_wins_for_join_link() {
        let config = ScanTransportConfig {
            public_base_url: Some("https://abc.tunnel.example/".to_string()),
            ..Default::default()
        };
        let lan = Some(IpAddr::from([192, 168, 1, 20]));
        assert_eq!(config.join_base_url_with(lan), "https://abc.tunnel.example");
        assert_eq!(config.join_base_url(), "https://abc.tunnel.example");
    }

    #[test]
    fn test_lan_join_link_without_public_url() {
        let config = ScanTransportConfig::from_lookup(lookup(&[("SCAN_APP_PORT", "3100")]));
        assert!(config.public_base_url.is_none());

        let lan = Some(IpAddr::from([192, 168, 1, 20]));
        assert_eq!(config.join_base_url_with(lan), "http://192.168.1.20:3100");

        // Loopback, IPv6 or no address at all cannot be reached from a phone.
        assert_eq!(
            config.join_base_url_with(Some(IpAddr::from([127, 0, 0, 1]))),
            "http://localhost:3100"
        );
        assert_eq!(
            config.join_base_url_with(Some("fe80::1".parse().unwrap())),
            "http://localhost:3100"
        );
        assert_eq!(config.join_base_url_with(None), "http://localhost:3100");

        let discovered = config.join_base_url();
        assert!(discovered.starts_with("http://"));
        assert!(discovered.ends_with(":3100"));
    }

    #[test]
    fn test_invalid_public_url() {
        let config = ScanTransportConfig {
            public_base_url: Some("clinic.example".to_string()),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn test_turn_requires_all_three_vars() {
        let partial = ScanTransportConfig::from_lookup(lookup(&[
            ("SCAN_TURN_URLS", "turn:relay.example:3478"),
            ("SCAN_TURN_USERNAME", "user"),
        ]));
        assert!(partial.turn_servers.is_empty());

        let full = ScanTransportConfig::from_lookup(lookup(&[
            ("SCAN_TURN_URLS", "turn:relay.example:3478,turns:relay.example:5349"),
            ("SCAN_TURN_USERNAME", "user"),
            ("SCAN_TURN_CREDENTIAL", "secret"),
        ]));
        assert_eq!(full.turn_servers.len(), 1);
        assert_eq!(full.turn_servers[0].urls.len(), 2);
        assert_eq!(full.turn_servers[0].credential, "secret");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
signaling_url = "wss://relay.example"
connect_timeout_secs = 30

[stability]
threshold = 0.9
"#
        )
        .unwrap();

        let config = ScanTransportConfig::from_file(file.path()).unwrap();
        assert_eq!(config.signaling_url, "wss://relay.example");
        assert_eq!(config.connect_timeout_secs, 30);
        assert_eq!(config.stability.threshold, 0.9);
        assert_eq!(config.stability.cooldown_ms, 2500);
        assert_eq!(config.stun_servers.len(), 2);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = ScanTransportConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: ScanTransportConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let config = ScanTransportConfig::load(Some("/definitely/not/here.toml"));
        assert!(config.is_ok());
    }
}
