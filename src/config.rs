//! Configuration for the XMPP account and connection
//!
//! Loads configuration from a YAML file:
//!
//! ```yaml
//! Host: xmpp.example.org:5222   # optional, discovered via SRV when empty
//! Username: alice@example.org
//! Password: ${XMPP_PASSWORD}
//! StartTLS: false
//! IgnoreCertificate: false
//! Html: false
//! ```

use serde::{Deserialize, Deserializer};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::discovery::{resolve_server_address, SrvResolver};
use crate::error::{Error, Result};

/// Default port for client-to-server connections
pub const DEFAULT_PORT: u16 = 5222;

/// YAML config structure. Capitalised keys are canonical, the lowercase
/// spellings are accepted as well.
#[derive(Debug, Deserialize)]
struct YamlConfig {
    #[serde(rename = "Host", alias = "host")]
    host: Option<String>,
    #[serde(rename = "Username", alias = "username")]
    username: Option<String>,
    #[serde(rename = "Password", alias = "password")]
    password: Option<String>,
    #[serde(rename = "StartTLS", alias = "starttls", default, deserialize_with = "flag")]
    start_tls: bool,
    #[serde(
        rename = "IgnoreCertificate",
        alias = "ignorecertificate",
        default,
        deserialize_with = "flag"
    )]
    ignore_certificate: bool,
    #[serde(rename = "Html", alias = "html", default, deserialize_with = "flag")]
    html: bool,
}

/// Flags accept YAML booleans plus the YAML 1.1 spellings older files use
/// (`yes`, `no`, `on`, `off`, `y`, `n` in lower, title or upper case).
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Text(text) => match text.as_str() {
            "y" | "Y" | "yes" | "Yes" | "YES" | "true" | "True" | "TRUE" | "on" | "On" | "ON" => {
                Ok(true)
            }
            "n" | "N" | "no" | "No" | "NO" | "false" | "False" | "FALSE" | "off" | "Off"
            | "OFF" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected a boolean, found {:?}",
                other
            ))),
        },
    }
}

/// Resolve a value: if it looks like ${VAR} and VAR is set, use the env value
fn resolve_env_string(value: Option<String>) -> String {
    let value = value.unwrap_or_default();
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        if let Ok(env_val) = std::env::var(var_name) {
            return env_val;
        }
    }
    value
}

/// Account address `local@domain[/resource]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jid {
    pub local: String,
    pub domain: String,
    pub resource: Option<String>,
}

impl Jid {
    /// Parse an account username. Exactly one `@` with non-empty parts on
    /// both sides is required.
    pub fn parse(username: &str) -> Result<Self> {
        if username.is_empty() {
            return Err(Error::InvalidConfiguration(
                "You must specify a username in the configuration file!".to_string(),
            ));
        }

        let invalid = || Error::InvalidConfiguration(format!("Invalid username: {}", username));

        let mut parts = username.split('@');
        let (local, rest) = match (parts.next(), parts.next(), parts.next()) {
            (Some(local), Some(rest), None) => (local, rest),
            _ => return Err(invalid()),
        };

        let (domain, resource) = match rest.split_once('/') {
            Some((domain, resource)) => (domain, Some(resource)),
            None => (rest, None),
        };

        if local.is_empty() || domain.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            local: local.to_string(),
            domain: domain.to_string(),
            resource: resource.filter(|r| !r.is_empty()).map(str::to_string),
        })
    }

    /// `local@domain` without the resource
    pub fn bare(&self) -> String {
        format!("{}@{}", self.local, self.domain)
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(resource) => write!(f, "{}@{}/{}", self.local, self.domain, resource),
            None => write!(f, "{}@{}", self.local, self.domain),
        }
    }
}

/// Validated configuration file, before the server address is resolved.
#[derive(Clone)]
pub struct ConfigFile {
    pub host: Option<String>,
    pub jid: Jid,
    pub password: String,
    pub start_tls: bool,
    pub ignore_certificate: bool,
    pub html: bool,
}

impl ConfigFile {
    /// Parse and validate YAML content. No network activity happens here.
    pub fn parse(content: &str) -> Result<Self> {
        let yaml: YamlConfig = serde_yaml::from_str(content)?;

        let username = resolve_env_string(yaml.username);
        let jid = Jid::parse(&username)?;

        Ok(Self {
            host: yaml.host.filter(|h| !h.is_empty()),
            jid,
            password: resolve_env_string(yaml.password),
            start_tls: yaml.start_tls,
            ignore_certificate: yaml.ignore_certificate,
            html: yaml.html,
        })
    }

    /// Load configuration from a specific file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Fix the server address: the configured host verbatim, otherwise the
    /// SRV-discovered one, otherwise the bare domain.
    pub async fn resolve<R: SrvResolver>(self, resolver: &R) -> Configuration {
        let server_address = match self.host {
            Some(host) => host,
            None => resolve_server_address(&self.jid.domain, resolver).await,
        };

        Configuration {
            server_address,
            jid: self.jid,
            password: self.password,
            start_tls: self.start_tls,
            ignore_certificate: self.ignore_certificate,
            html: self.html,
        }
    }
}

impl fmt::Debug for ConfigFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigFile")
            .field("host", &self.host)
            .field("jid", &self.jid)
            .field("password", &"<redacted>")
            .field("start_tls", &self.start_tls)
            .field("ignore_certificate", &self.ignore_certificate)
            .field("html", &self.html)
            .finish()
    }
}

/// Main configuration struct
#[derive(Clone)]
pub struct Configuration {
    pub server_address: String,
    pub jid: Jid,
    pub password: String,
    pub start_tls: bool,
    pub ignore_certificate: bool,
    pub html: bool,
}

impl Configuration {
    /// Read, validate and resolve the configuration at `path`.
    pub async fn load<P: AsRef<Path>, R: SrvResolver>(path: P, resolver: &R) -> Result<Self> {
        let file = ConfigFile::load(path)?;
        Ok(file.resolve(resolver).await)
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("server_address", &self.server_address)
            .field("jid", &self.jid)
            .field("password", &"<redacted>")
            .field("start_tls", &self.start_tls)
            .field("ignore_certificate", &self.ignore_certificate)
            .field("html", &self.html)
            .finish()
    }
}
