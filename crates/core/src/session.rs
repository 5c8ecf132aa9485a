//! Session identifiers shared between the desktop and the phone

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const MAX_SESSION_ID_LEN: usize = 128;

/// Path segment in front of the session id in a join link
const SCAN_PATH: &str = "/scan/";

/// Opaque token binding one phone and one desktop for a scan
///
/// Only characters that survive a URL path segment and a QR code unescaped
/// are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Fresh random identifier (UUID v4)
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Validate an identifier received over a link
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::InvalidSessionId("empty".to_string()));
        }
        if raw.len() > MAX_SESSION_ID_LEN {
            return Err(Error::InvalidSessionId(format!(
                "longer than {} characters",
                MAX_SESSION_ID_LEN
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(Error::InvalidSessionId(format!(
                "unexpected character {:?}",
                bad
            )));
        }
        Ok(Self(raw.to_string()))
    }

    /// Extract and validate the id from a `<base>/scan/<id>` link
    pub fn from_scan_url(url: &str) -> Result<Self> {
        let start = url
            .rfind(SCAN_PATH)
            .ok_or_else(|| Error::InvalidSessionId(format!("no scan path in {}", url)))?;
        let tail = &url[start + SCAN_PATH.len()..];
        let id = tail
            .split(['?', '#', '/'])
            .next()
            .unwrap_or_default();
        Self::parse(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join link for the phone: `<base>/scan/<id>`
    pub fn scan_url(&self, base: &str) -> String {
        format!("{}{}{}", base.trim_end_matches('/'), SCAN_PATH, self.0)
    }

    /// Relay channel name for this session
    pub fn channel_name(&self) -> String {
        format!("scan:{}", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_valid_and_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert_eq!(SessionId::parse(a.as_str()).unwrap(), a);
    }

    #[test]
    fn test_rejects_unsafe_ids() {
        assert!(SessionId::parse("").is_err());
        assert!(SessionId::parse("has space").is_err());
        assert!(SessionId::parse("../etc").is_err());
        assert!(SessionId::parse(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_scan_url_trims_trailing_slash() {
        let id = SessionId::parse("abc").unwrap();
        assert_eq!(id.scan_url("https://clinic.example/"), "https://clinic.example/scan/abc");
        assert_eq!(id.scan_url("https://clinic.example"), "https://clinic.example/scan/abc");
    }

    #[test]
    fn test_from_scan_url() {
        let id = SessionId::generate();
        let url = id.scan_url("http://localhost:3000");
        assert_eq!(SessionId::from_scan_url(&url).unwrap(), id);
        assert_eq!(
            SessionId::from_scan_url("http://x/scan/abc?ref=qr").unwrap().as_str(),
            "abc"
        );
        assert!(SessionId::from_scan_url("http://x/other/abc").is_err());
    }

    #[test]
    fn test_serde_validates() {
        let id: SessionId = serde_json::from_str("\"s-1\"").unwrap();
        assert_eq!(id.channel_name(), "scan:s-1");
        assert!(serde_json::from_str::<SessionId>("\"bad id\"").is_err());
    }
}
