//! Send one templated message to an XMPP user

use tracing::info;

use crate::cli::InvocationRequest;
use crate::config::Configuration;
use crate::discovery::SrvResolver;
use crate::error::Result;
use crate::session::{send_message, Chat};
use crate::template::{Escaping, MessageTemplate};

/// Load the configuration and render the message, without touching the
/// messaging server. The SRV lookup (if any) still happens here.
pub async fn prepare<R: SrvResolver>(
    request: &InvocationRequest,
    resolver: &R,
) -> Result<(Configuration, Chat)> {
    let config = Configuration::load(&request.configuration_file, resolver).await?;
    info!(
        user = %config.jid.bare(),
        server = %config.server_address,
        "Loaded configuration"
    );

    let template = MessageTemplate::load(&request.template_file, Escaping::for_html(config.html))?;
    let text = template.render(&request.arguments)?;

    let chat = Chat {
        remote: request.target_recipient.clone(),
        text,
    };
    Ok((config, chat))
}

/// CLI entry point
pub async fn run<R: SrvResolver>(request: &InvocationRequest, resolver: &R) -> Result<()> {
    let (config, chat) = prepare(request, resolver).await?;
    send_message(&config, &chat).await
}
