//! Error types for the XMPP notifier

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read configuration file {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("SRV lookup failed: {0}")]
    Discovery(String),

    #[error("Failed to read template file {path}: {source}")]
    TemplateRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid template syntax: {0}")]
    TemplateSyntax(String),

    #[error("Template rendering failed: {0}")]
    TemplateRender(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("XMPP protocol error: {0}")]
    Protocol(String),

    #[error("Failed to send message: {0}")]
    Send(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::ConfigParse(err.to_string())
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Protocol(err.to_string())
    }
}
