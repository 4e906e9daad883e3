//! Command-line interface

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::builder::NonEmptyStringValueParser;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "notification_xmpp")]
#[command(about = "Send a templated chat message to an XMPP user", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to xmpp configuration file
    #[arg(long, value_name = "PATH", env = "NOTIFICATION_XMPP_CONFIG")]
    pub configuration_file: PathBuf,

    /// Path to the message template
    #[arg(long, value_name = "PATH")]
    pub template_file: PathBuf,

    /// Address of the user that should receive the message
    #[arg(long, value_name = "JID", value_parser = NonEmptyStringValueParser::new())]
    pub target_username: String,

    /// Template variables
    #[arg(value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub arguments: Vec<(String, String)>,
}

/// Split a `key=value` token at the first `=`.
pub fn parse_key_value(token: &str) -> Result<(String, String), String> {
    match token.split_once('=') {
        Some(("", _)) => Err(format!("Invalid argument: {} (empty key)", token)),
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => Err(format!("Invalid argument: {} (expected KEY=VALUE)", token)),
    }
}

/// Everything one invocation needs, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub configuration_file: PathBuf,
    pub template_file: PathBuf,
    pub target_recipient: String,
    pub arguments: BTreeMap<String, String>,
}

impl From<Cli> for InvocationRequest {
    fn from(cli: Cli) -> Self {
        Self {
            configuration_file: cli.configuration_file,
            template_file: cli.template_file,
            target_recipient: cli.target_username,
            // later duplicates win
            arguments: cli.arguments.into_iter().collect(),
        }
    }
}
