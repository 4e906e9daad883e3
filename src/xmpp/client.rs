//! XMPP client session: connect, negotiate, send, close.
//!
//! Handles TCP connection, direct TLS or StartTLS, SASL (SCRAM or PLAIN),
//! resource binding, session establishment and initial presence.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::element::{Element, Frame};
use super::sasl::{self, Authenticator, Mechanism};
use super::stanza;
use super::stream::XmppStream;
use crate::config::{Jid, DEFAULT_PORT};
use crate::error::{Error, Result};

const BIND_ID: &str = "bind_1";
const SESSION_ID: &str = "sess_1";

/// How long `close` waits for the server to end its side of the stream
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How the connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// TLS handshake immediately after the TCP connect
    DirectTls,
    /// Plain TCP, upgraded with `<starttls/>` before authentication
    StartTls,
    /// No encryption at all
    Plain,
}

/// Everything needed to open an authenticated session.
#[derive(Clone)]
pub struct ConnectOptions {
    /// `host[:port]`; the port defaults to 5222
    pub address: String,
    pub jid: Jid,
    pub password: String,
    pub security: Security,
    pub verify_certificate: bool,
    /// Establish a session and announce presence after binding
    pub session: bool,
}

/// Split `host[:port]`, `[v6]:port` or a bare IPv6 address.
pub fn split_host_port(address: &str) -> Result<(String, u16)> {
    let invalid_port = |port: &str| {
        Error::InvalidConfiguration(format!("Invalid port '{}' in server address {}", port, address))
    };

    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(|| {
            Error::InvalidConfiguration(format!("Invalid server address {}", address))
        })?;
        return match tail.strip_prefix(':') {
            Some(port) => Ok((host.to_string(), port.parse().map_err(|_| invalid_port(port))?)),
            None if tail.is_empty() => Ok((host.to_string(), DEFAULT_PORT)),
            None => Err(Error::InvalidConfiguration(format!(
                "Invalid server address {}",
                address
            ))),
        };
    }

    match address.split_once(':') {
        Some((host, port)) if !port.contains(':') => {
            Ok((host.to_string(), port.parse().map_err(|_| invalid_port(port))?))
        }
        // bare IPv6 literal
        Some(_) => Ok((address.to_string(), DEFAULT_PORT)),
        None => Ok((address.to_string(), DEFAULT_PORT)),
    }
}

/// An authenticated XMPP session.
pub struct XmppClient {
    stream: XmppStream,
    bound_jid: Option<String>,
    closed: bool,
}

impl XmppClient {
    /// Connect and run the full handshake. On failure the socket is dropped.
    pub async fn connect(options: &ConnectOptions) -> Result<Self> {
        let (host, port) = split_host_port(&options.address)?;
        info!(%host, port, security = ?options.security, "Connecting to XMPP server");

        let tcp = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| Error::Connection(format!("{}:{}: {}", host, port, e)))?;

        let stream = match options.security {
            Security::DirectTls => {
                XmppStream::direct_tls(tcp, &host, options.verify_certificate).await?
            }
            Security::StartTls | Security::Plain => XmppStream::plain(tcp),
        };

        let mut client = Self {
            stream,
            bound_jid: None,
            closed: false,
        };
        client.negotiate(options, &host).await?;

        info!(
            jid = client.bound_jid.as_deref().unwrap_or_default(),
            "XMPP session established"
        );
        Ok(client)
    }

    /// Full JID assigned by the server during resource binding.
    pub fn bound_jid(&self) -> Option<&str> {
        self.bound_jid.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    async fn negotiate(&mut self, options: &ConnectOptions, tls_host: &str) -> Result<()> {
        let domain = options.jid.domain.as_str();
        let mut features = self.open_stream(domain).await?;

        if options.security == Security::StartTls {
            if !features.has_child("starttls") {
                return Err(Error::Tls("Server does not offer StartTLS".to_string()));
            }
            self.stream.send(&stanza::starttls()).await?;
            let reply = self.stream.next_element().await?;
            if reply.local_name() != "proceed" {
                return Err(Error::Tls(format!("StartTLS refused by server: <{}>", reply.name)));
            }
            self.stream
                .upgrade_tls(tls_host, options.verify_certificate)
                .await?;
            features = self.open_stream(domain).await?;
        }

        self.authenticate(&features, options).await?;

        let features = self.open_stream(domain).await?;
        self.bind(&features, options.jid.resource.as_deref()).await?;

        if options.session {
            if features.has_child("session") {
                self.establish_session(domain).await?;
            }
            self.stream.send(&stanza::presence()).await?;
        }
        Ok(())
    }

    /// Send a stream header and read the server's header and features.
    async fn open_stream(&mut self, domain: &str) -> Result<Element> {
        self.stream.send(&stanza::stream_header(domain)).await?;

        match self.stream.next_frame().await? {
            Frame::StreamOpen(header) => {
                debug!(id = header.attr("id").unwrap_or_default(), "Stream opened");
            }
            Frame::Stanza(element) if element.name == "stream:error" => {
                return Err(Error::Protocol(format!("Stream error: {}", element.condition())));
            }
            other => {
                return Err(Error::Protocol(format!(
                    "Expected stream header, got {:?}",
                    other
                )));
            }
        }

        let features = self.stream.next_element().await?;
        if features.local_name() != "features" {
            return Err(Error::Protocol(format!(
                "Expected stream features, got <{}>",
                features.name
            )));
        }
        Ok(features)
    }

    async fn authenticate(&mut self, features: &Element, options: &ConnectOptions) -> Result<()> {
        let offered: Vec<&str> = features
            .child("mechanisms")
            .map(|m| {
                m.children
                    .iter()
                    .filter(|c| c.local_name() == "mechanism")
                    .map(|c| c.text.trim())
                    .collect()
            })
            .unwrap_or_default();

        let mechanism = Mechanism::select(&offered).ok_or_else(|| {
            Error::Authentication(format!(
                "No supported SASL mechanism offered (server offers: {})",
                offered.join(", ")
            ))
        })?;

        if mechanism == Mechanism::Plain && !self.stream.is_tls() {
            warn!("Sending credentials over an unencrypted connection");
        }

        let mut auth = Authenticator::new(mechanism, &options.jid.local, &options.password);
        let initial = sasl::encode_payload(&auth.initial_response());
        self.stream
            .send(&stanza::auth(mechanism.name(), &initial))
            .await?;

        loop {
            let reply = self.stream.next_element().await?;
            match reply.local_name() {
                "challenge" => {
                    let response = auth.challenge(&sasl::decode_payload(&reply.text)?)?;
                    // only an empty initial response is written as `=`
                    let payload = if response.is_empty() {
                        String::new()
                    } else {
                        sasl::encode_payload(&response)
                    };
                    self.stream.send(&stanza::sasl_response(&payload)).await?;
                }
                "success" => {
                    auth.success(&sasl::decode_payload(&reply.text)?)?;
                    debug!(
                        user = %options.jid.local,
                        mechanism = mechanism.name(),
                        "SASL authentication succeeded"
                    );
                    return Ok(());
                }
                "failure" => return Err(Error::Authentication(reply.condition().to_string())),
                other => {
                    return Err(Error::Protocol(format!(
                        "Unexpected reply to authentication: <{}>",
                        other
                    )));
                }
            }
        }
    }

    async fn bind(&mut self, features: &Element, resource: Option<&str>) -> Result<()> {
        if !features.has_child("bind") {
            return Err(Error::Protocol(
                "Server does not offer resource binding".to_string(),
            ));
        }

        self.stream.send(&stanza::bind(BIND_ID, resource)).await?;
        let reply = self.iq_result(BIND_ID).await?;
        self.bound_jid = reply
            .child("bind")
            .and_then(|b| b.child("jid"))
            .map(|j| j.text.trim().to_string());
        Ok(())
    }

    async fn establish_session(&mut self, domain: &str) -> Result<()> {
        self.stream.send(&stanza::session(SESSION_ID, domain)).await?;
        self.iq_result(SESSION_ID).await?;
        debug!("Session established");
        Ok(())
    }

    /// Wait for the `result` iq with the given id, skipping unrelated stanzas.
    async fn iq_result(&mut self, id: &str) -> Result<Element> {
        loop {
            let element = self.stream.next_element().await?;
            if element.local_name() != "iq" || element.attr("id") != Some(id) {
                debug!(name = %element.name, "Skipping unrelated stanza");
                continue;
            }
            return match element.attr("type") {
                Some("result") => Ok(element),
                Some("error") => Err(Error::Protocol(format!(
                    "Request {} failed: {}",
                    id,
                    element
                        .child("error")
                        .map(Element::condition)
                        .unwrap_or("undefined-condition")
                ))),
                other => Err(Error::Protocol(format!(
                    "Unexpected iq type {:?} for {}",
                    other, id
                ))),
            };
        }
    }

    /// Send a chat message with a plain body.
    pub async fn send_chat(&mut self, to: &str, text: &str) -> Result<()> {
        self.stream
            .send(&stanza::chat_message(to, text))
            .await
            .map_err(|e| Error::Send(e.to_string()))
    }

    /// Send a chat message with an XHTML-IM payload.
    pub async fn send_html(&mut self, to: &str, markup: &str) -> Result<()> {
        self.stream
            .send(&stanza::html_message(to, markup))
            .await
            .map_err(|e| Error::Send(e.to_string()))
    }

    /// Close the stream, wait for the server to close its side, then shut
    /// the socket down. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let sent = self.stream.send(stanza::STREAM_CLOSE).await;
        if sent.is_ok() {
            self.await_stream_close().await;
        }
        let shutdown = self.stream.shutdown().await;
        info!("XMPP connection closed");
        sent.and(shutdown)
    }

    /// Read and discard whatever the server still sends until its closing
    /// tag, end of file or `CLOSE_TIMEOUT`.
    async fn await_stream_close(&mut self) {
        let drain = async {
            loop {
                match self.stream.next_frame().await {
                    Ok(Frame::StreamClose) => return Ok(()),
                    Ok(frame) => debug!(?frame, "Discarding data received while closing"),
                    Err(e) => return Err(e),
                }
            }
        };

        match tokio::time::timeout(CLOSE_TIMEOUT, drain).await {
            Ok(Ok(())) => debug!("Server closed the stream"),
            Ok(Err(e)) => debug!(error = %e, "Stream ended without a closing tag"),
            Err(_) => warn!("Timed out waiting for the server to close the stream"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_host_port_defaults_port() {
        assert_eq!(
            split_host_port("example.org").unwrap(),
            ("example.org".to_string(), 5222)
        );
    }

    #[test]
    fn split_host_port_reads_explicit_port() {
        assert_eq!(
            split_host_port("xmpp.example.org:5223").unwrap(),
            ("xmpp.example.org".to_string(), 5223)
        );
    }

    #[test]
    fn split_host_port_handles_ipv6() {
        assert_eq!(
            split_host_port("[::1]:5269").unwrap(),
            ("::1".to_string(), 5269)
        );
        assert_eq!(split_host_port("[::1]").unwrap(), ("::1".to_string(), 5222));
        assert_eq!(split_host_port("::1").unwrap(), ("::1".to_string(), 5222));
    }

    #[test]
    fn split_host_port_rejects_bad_port() {
        assert!(matches!(
            split_host_port("example.org:xmpp"),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            split_host_port("example.org:99999"),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(split_host_port("[::1").is_err());
    }

    #[tokio::test]
    async fn connect_reports_refused_connection() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let options = ConnectOptions {
            address: addr.to_string(),
            jid: Jid::parse("alice@example.org").unwrap(),
            password: "pw".to_string(),
            security: Security::Plain,
            verify_certificate: true,
            session: true,
        };
        let err = XmppClient::connect(&options).await.err().expect("must fail");
        assert!(matches!(err, Error::Connection(_)));
    }
}
