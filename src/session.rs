//! Session management for the XMPP client
//!
//! Provides:
//! - Connection options derived from the loaded configuration
//! - The `ChatTransport` seam between delivery and the wire client
//! - Delivery of exactly one message with a guaranteed close

use std::future::Future;

use tracing::{info, warn};

use crate::config::Configuration;
use crate::error::Result;
use crate::xmpp::{ConnectOptions, Security, XmppClient};

/// How the message body is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    Plain,
    /// XHTML-IM payload alongside the plain body
    Html,
}

impl MessageFormat {
    pub fn from_html_flag(html: bool) -> Self {
        if html {
            MessageFormat::Html
        } else {
            MessageFormat::Plain
        }
    }
}

/// One chat-type message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub remote: String,
    pub text: String,
}

/// Connection that can carry one chat message and then be closed.
pub trait ChatTransport {
    fn send_text(&mut self, chat: &Chat) -> impl Future<Output = Result<()>>;
    fn send_html(&mut self, chat: &Chat) -> impl Future<Output = Result<()>>;
    fn close(&mut self) -> impl Future<Output = Result<()>>;
}

impl ChatTransport for XmppClient {
    async fn send_text(&mut self, chat: &Chat) -> Result<()> {
        self.send_chat(&chat.remote, &chat.text).await
    }

    async fn send_html(&mut self, chat: &Chat) -> Result<()> {
        XmppClient::send_html(self, &chat.remote, &chat.text).await
    }

    async fn close(&mut self) -> Result<()> {
        XmppClient::close(self).await
    }
}

/// Map the configuration onto client connection options.
pub fn connect_options(config: &Configuration) -> ConnectOptions {
    ConnectOptions {
        address: config.server_address.clone(),
        jid: config.jid.clone(),
        password: config.password.clone(),
        security: if config.start_tls {
            Security::StartTls
        } else {
            Security::DirectTls
        },
        verify_certificate: !config.ignore_certificate,
        session: true,
    }
}

/// Send `chat` once in the requested format, then close the transport.
///
/// The transport is closed on both paths. A send error wins over a close
/// error; a close error after a successful send is only logged since the
/// message already left.
pub async fn deliver<T: ChatTransport>(
    transport: &mut T,
    chat: &Chat,
    format: MessageFormat,
) -> Result<()> {
    let sent = match format {
        MessageFormat::Plain => transport.send_text(chat).await,
        MessageFormat::Html => transport.send_html(chat).await,
    };
    let closed = transport.close().await;

    sent?;
    if let Err(e) = closed {
        warn!(error = %e, "Failed to close connection cleanly");
    }
    Ok(())
}

/// Connect with `config`, send `chat`, close.
pub async fn send_message(config: &Configuration, chat: &Chat) -> Result<()> {
    let options = connect_options(config);
    let mut client = XmppClient::connect(&options).await?;

    deliver(&mut client, chat, MessageFormat::from_html_flag(config.html)).await?;
    info!(to = %chat.remote, "Message sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Jid;
    use crate::error::Error;

    #[derive(Default)]
    struct RecordingTransport {
        calls: Vec<String>,
        fail_send: bool,
        fail_close: bool,
    }

    impl ChatTransport for RecordingTransport {
        async fn send_text(&mut self, chat: &Chat) -> Result<()> {
            self.calls.push(format!("text:{}:{}", chat.remote, chat.text));
            if self.fail_send {
                return Err(Error::Send("broken pipe".into()));
            }
            Ok(())
        }

        async fn send_html(&mut self, chat: &Chat) -> Result<()> {
            self.calls.push(format!("html:{}:{}", chat.remote, chat.text));
            if self.fail_send {
                return Err(Error::Send("broken pipe".into()));
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            self.calls.push("close".into());
            if self.fail_close {
                return Err(Error::Connection("reset".into()));
            }
            Ok(())
        }
    }

    fn chat() -> Chat {
        Chat {
            remote: "bob@example.org".into(),
            text: "<b>build failed</b>".into(),
        }
    }

    fn configuration(start_tls: bool, ignore_certificate: bool, html: bool) -> Configuration {
        Configuration {
            server_address: "xmpp.example.org:5222".into(),
            jid: Jid::parse("alice@example.org").unwrap(),
            password: "pw".into(),
            start_tls,
            ignore_certificate,
            html,
        }
    }

    #[tokio::test]
    async fn plain_format_uses_text_path_then_closes() {
        let mut transport = RecordingTransport::default();
        deliver(&mut transport, &chat(), MessageFormat::Plain)
            .await
            .unwrap();
        assert_eq!(
            transport.calls,
            ["text:bob@example.org:<b>build failed</b>", "close"]
        );
    }

    #[tokio::test]
    async fn html_format_uses_html_path_with_same_content() {
        let mut transport = RecordingTransport::default();
        deliver(&mut transport, &chat(), MessageFormat::Html)
            .await
            .unwrap();
        assert_eq!(
            transport.calls,
            ["html:bob@example.org:<b>build failed</b>", "close"]
        );
    }

    #[tokio::test]
    async fn failed_send_still_closes_and_reports_send_error() {
        let mut transport = RecordingTransport {
            fail_send: true,
            fail_close: true,
            ..Default::default()
        };
        let err = deliver(&mut transport, &chat(), MessageFormat::Plain)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Send(_)));
        assert_eq!(transport.calls.last().map(String::as_str), Some("close"));
    }

    #[tokio::test]
    async fn close_failure_after_send_is_not_fatal() {
        let mut transport = RecordingTransport {
            fail_close: true,
            ..Default::default()
        };
        assert!(deliver(&mut transport, &chat(), MessageFormat::Html)
            .await
            .is_ok());
    }

    #[test]
    fn connect_options_default_to_direct_tls_with_verification() {
        let options = connect_options(&configuration(false, false, false));
        assert_eq!(options.address, "xmpp.example.org:5222");
        assert_eq!(options.security, Security::DirectTls);
        assert!(options.verify_certificate);
        assert!(options.session);
    }

    #[test]
    fn connect_options_follow_starttls_and_certificate_flags() {
        let options = connect_options(&configuration(true, true, false));
        assert_eq!(options.security, Security::StartTls);
        assert!(!options.verify_certificate);
    }

    #[test]
    fn message_format_follows_html_flag() {
        assert_eq!(MessageFormat::from_html_flag(true), MessageFormat::Html);
        assert_eq!(MessageFormat::from_html_flag(false), MessageFormat::Plain);
    }
}
