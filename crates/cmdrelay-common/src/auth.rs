//! Connection Authentication
//!
//! The broker can optionally require a shared API key before upgrading a
//! socket. Peers present it either as `Authorization: Bearer <key>` or as an
//! `apiKey` query parameter (for runtimes that cannot set upgrade headers).
//!
//! Keys are compared in constant time.
//!
//! # Example
//!
//! ```
//! use cmdrelay_common::auth::AuthConfig;
//!
//! let auth = AuthConfig::with_api_key("secret");
//! assert!(auth.requires_auth());
//! assert!(auth.validate_api_key("secret"));
//!
//! let open = AuthConfig::disabled();
//! assert!(open.validate_api_key("anything"));
//! ```

use std::fmt;

#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    api_key: Option<String>,
}

impl AuthConfig {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
        }
    }

    pub fn disabled() -> Self {
        Self { api_key: None }
    }

    pub fn requires_auth(&self) -> bool {
        self.api_key.is_some()
    }

    /// Validates a presented key. Always true when auth is disabled.
    pub fn validate_api_key(&self, provided_key: &str) -> bool {
        match &self.api_key {
            Some(expected_key) => constant_time_eq(expected_key, provided_key),
            None => true,
        }
    }

    /// Authorizes an upgrade request from its `Authorization` header and
    /// query string.
    ///
    /// # Arguments
    ///
    /// * `authorization` - Raw `Authorization` header value, if any
    /// * `query` - Raw query string (without the leading `?`), if any
    pub fn authorize(&self, authorization: Option<&str>, query: Option<&str>) -> bool {
        if !self.requires_auth() {
            return true;
        }
        let presented = extract_bearer(authorization).or_else(|| extract_query_key(query));
        match presented {
            Some(key) => self.validate_api_key(key),
            None => false,
        }
    }
}

impl fmt::Display for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.api_key {
            Some(_) => write!(f, "ApiKey(*****)"),
            None => write!(f, "Disabled"),
        }
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn extract_bearer(header_value: Option<&str>) -> Option<&str> {
    let value = header_value?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}

/// Extracts `apiKey` from a raw query string.
pub fn extract_query_key(query: Option<&str>) -> Option<&str> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| *name == "apiKey")
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}
