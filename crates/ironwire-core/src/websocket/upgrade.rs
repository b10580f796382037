//! HTTP upgrade metadata.
//!
//! The upgrade handshake itself happens before a connection exists; the
//! connection only keeps what was exchanged for later inspection.

use serde::{Deserialize, Serialize};

/// The HTTP request that asked for the upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeRequest {
    /// Request method, normally `GET`
    pub method: String,
    /// Request target
    pub uri: String,
    /// Header fields in received order
    pub headers: Vec<(String, String)>,
}

/// The HTTP response that accepted the upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeResponse {
    /// Status code, normally 101
    pub status: u16,
    /// Header fields in received order
    pub headers: Vec<(String, String)>,
}

impl UpgradeRequest {
    /// `GET` request for `uri` with no headers.
    pub fn get(uri: impl Into<String>) -> Self {
        Self { method: "GET".to_string(), uri: uri.into(), headers: Vec::new() }
    }

    /// Add a header field.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

impl UpgradeResponse {
    /// `101 Switching Protocols` with no headers.
    pub fn switching_protocols() -> Self {
        Self { status: 101, headers: Vec::new() }
    }

    /// Add a header field.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers.iter().find(|(key, _)| key.eq_ignore_ascii_case(name)).map(|(_, value)| value.as_str())
}
