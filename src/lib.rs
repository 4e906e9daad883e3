//! XMPP Notification Library
//!
//! This library provides tools to:
//! - Parse the notifier's command line into an invocation request
//! - Load account configuration from YAML, discovering the server via SRV
//! - Render message templates with key/value arguments
//! - Connect to an XMPP server and deliver one chat message

pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod session;
pub mod template;
pub mod xmpp;

// Re-export common types
pub use cli::{Cli, InvocationRequest};
pub use config::{ConfigFile, Configuration, Jid};
pub use discovery::{resolve_server_address, SrvResolver, SystemResolver};
pub use error::{Error, Result};
pub use session::{deliver, ChatTransport, Chat, MessageFormat};
pub use template::{Escaping, MessageTemplate};

// Commands module uses re-exported types, so it must be declared after the re-exports
pub mod commands;
