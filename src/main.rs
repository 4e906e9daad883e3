//! XMPP notifier CLI - main entry point
//!
//! Sends one templated chat message and exits: 0 on success, 2 on usage
//! errors (reported by clap), 1 on any other failure.

use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use notification_xmpp::{commands, Cli, Error, InvocationRequest, SystemResolver};

/// Operator-facing description of the step that failed
fn failed_step(err: &Error) -> &'static str {
    match err {
        Error::ConfigRead { .. }
        | Error::ConfigParse(_)
        | Error::InvalidConfiguration(_)
        | Error::Discovery(_) => "Could not read configuration",
        Error::TemplateRead { .. } | Error::TemplateSyntax(_) | Error::TemplateRender(_) => {
            "Could not read template"
        }
        Error::Send(_) => "Could not send message",
        Error::Connection(_)
        | Error::Tls(_)
        | Error::Authentication(_)
        | Error::Protocol(_)
        | Error::IoError(_) => "Could not connect to xmpp server",
    }
}

async fn run(request: &InvocationRequest) -> anyhow::Result<()> {
    commands::send_message::run(request, &SystemResolver)
        .await
        .map_err(|err| {
            let step = failed_step(&err);
            anyhow::Error::new(err).context(step)
        })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Load .env for ${VAR} references in the configuration
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("notification_xmpp=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let request = InvocationRequest::from(Cli::parse());

    match run(&request).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
