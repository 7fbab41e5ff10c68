//! The request view the firewall evaluates.

use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Deserializer};

/// An incoming HTTP-like request.
///
/// Header names are stored lower-cased so lookups are case-insensitive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Request {
    #[serde(default = "default_method", deserialize_with = "uppercase_method")]
    method: String,
    #[serde(default = "default_path")]
    path: String,
    #[serde(default, deserialize_with = "lowercase_headers")]
    headers: HashMap<String, String>,
    #[serde(default)]
    client_ip: Option<IpAddr>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

fn uppercase_method<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(String::deserialize(deserializer)?.to_ascii_uppercase())
}

fn lowercase_headers<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = HashMap::<String, String>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value))
        .collect())
}

impl Request {
    /// Create a request for the given method and path.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            path: path.into(),
            headers: HashMap::new(),
            client_ip: None,
        }
    }

    /// Shorthand for a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    /// Add a header, replacing any previous value with the same name.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Set the resolved client address.
    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }
}
