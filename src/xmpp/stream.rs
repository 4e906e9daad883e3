//! Transport for the XML stream: plain TCP or TLS, with framed reads.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use super::element::{parse_frame, Element, Frame, Parsed};
use crate::error::{Error, Result};

/// Upper bound for waiting on a single read from the server
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest amount of unparsed data buffered before giving up
const MAX_BUFFERED: usize = 1024 * 1024;

const READ_CHUNK: usize = 8192;

enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(s) => s.read(buf).await,
            Self::Tls(s) => s.read(buf).await,
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Plain(s) => {
                s.write_all(data).await?;
                s.flush().await
            }
            Self::Tls(s) => {
                s.write_all(data).await?;
                s.flush().await
            }
        }
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(s) => s.shutdown().await,
            Self::Tls(s) => s.shutdown().await,
        }
    }
}

/// Bidirectional XML stream over a socket.
pub struct XmppStream {
    transport: Option<Transport>,
    buffer: Vec<u8>,
}

impl XmppStream {
    pub fn plain(tcp: TcpStream) -> Self {
        Self {
            transport: Some(Transport::Plain(tcp)),
            buffer: Vec::new(),
        }
    }

    /// Perform the TLS handshake right after connecting.
    pub async fn direct_tls(tcp: TcpStream, server_name: &str, verify: bool) -> Result<Self> {
        let tls = connect_tls(tcp, server_name, verify).await?;
        Ok(Self {
            transport: Some(Transport::Tls(Box::new(tls))),
            buffer: Vec::new(),
        })
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.transport, Some(Transport::Tls(_)))
    }

    /// Upgrade the plain connection in place after `<proceed/>`.
    pub async fn upgrade_tls(&mut self, server_name: &str, verify: bool) -> Result<()> {
        let tcp = match self.transport.take() {
            Some(Transport::Plain(tcp)) => tcp,
            Some(tls) => {
                self.transport = Some(tls);
                return Err(Error::Tls("Connection is already encrypted".to_string()));
            }
            None => return Err(Error::Connection("Not connected".to_string())),
        };

        // Anything buffered before the handshake belongs to the old stream
        self.buffer.clear();
        let tls = connect_tls(tcp, server_name, verify).await?;
        self.transport = Some(Transport::Tls(Box::new(tls)));
        debug!("StartTLS upgrade successful");
        Ok(())
    }

    /// Write raw stream data.
    pub async fn send(&mut self, data: &str) -> Result<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::Connection("Not connected".to_string()))?;
        transport.write_all(data.as_bytes()).await?;
        Ok(())
    }

    /// Read the next complete frame, pulling more bytes as needed.
    pub async fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if let Parsed::Complete(frame, used) = parse_frame(&self.buffer)? {
                self.buffer.drain(..used);
                return Ok(frame);
            }

            if self.buffer.len() > MAX_BUFFERED {
                return Err(Error::Protocol(
                    "Malformed or oversized data from server".to_string(),
                ));
            }

            let transport = self
                .transport
                .as_mut()
                .ok_or_else(|| Error::Connection("Not connected".to_string()))?;

            let mut chunk = [0u8; READ_CHUNK];
            let n = tokio::time::timeout(READ_TIMEOUT, transport.read(&mut chunk))
                .await
                .map_err(|_| Error::Protocol("Timed out waiting for the server".to_string()))??;

            if n == 0 {
                return Err(Error::Protocol("Connection closed by server".to_string()));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Read the next top-level element. Stream errors and an unexpected end
    /// of stream are turned into errors.
    pub async fn next_element(&mut self) -> Result<Element> {
        match self.next_frame().await? {
            Frame::Stanza(element) if element.name == "stream:error" => Err(Error::Protocol(
                format!("Stream error: {}", element.condition()),
            )),
            Frame::Stanza(element) => Ok(element),
            Frame::StreamOpen(_) => Err(Error::Protocol(
                "Unexpected stream header".to_string(),
            )),
            Frame::StreamClose => Err(Error::Protocol("Server closed the stream".to_string())),
        }
    }

    /// Shut the transport down. Safe to call more than once.
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown().await?;
        }
        Ok(())
    }
}

async fn connect_tls(
    tcp: TcpStream,
    server_name: &str,
    verify: bool,
) -> Result<TlsStream<TcpStream>> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let mut tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    if !verify {
        warn!("TLS certificate verification disabled - insecure!");
        tls_config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoCertVerifier));
    }

    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = rustls::pki_types::ServerName::try_from(server_name.to_string())
        .map_err(|e| Error::Tls(format!("Invalid server name: {}", e)))?;

    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::Tls(format!("TLS handshake failed: {}", e)))
}

/// Accepts any server certificate (`IgnoreCertificate: true`)
#[derive(Debug)]
struct NoCertVerifier;

impl rustls::client::danger::ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (XmppStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (XmppStream::plain(client), server)
    }

    #[tokio::test]
    async fn next_frame_reassembles_split_writes() {
        let (mut stream, mut server) = connected_pair().await;

        tokio::spawn(async move {
            server.write_all(b"<success xmlns='urn:").await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            server
                .write_all(b"ietf:params:xml:ns:xmpp-sasl'/><iq type='result' id='b'/>")
                .await
                .unwrap();
        });

        let first = stream.next_element().await.unwrap();
        assert_eq!(first.local_name(), "success");
        let second = stream.next_element().await.unwrap();
        assert_eq!(second.attr("id"), Some("b"));
    }

    #[tokio::test]
    async fn stream_error_is_reported() {
        let (mut stream, mut server) = connected_pair().await;
        server
            .write_all(
                b"<stream:error><host-unknown xmlns='urn:ietf:params:xml:ns:xmpp-streams'/></stream:error>",
            )
            .await
            .unwrap();

        let err = stream.next_element().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ref m) if m.contains("host-unknown")));
    }

    #[tokio::test]
    async fn closed_connection_is_reported() {
        let (mut stream, server) = connected_pair().await;
        drop(server);

        let err = stream.next_frame().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ref m) if m.contains("closed")));
    }

    #[tokio::test]
    async fn send_writes_and_shutdown_is_idempotent() {
        let (mut stream, mut server) = connected_pair().await;
        assert!(!stream.is_tls());

        stream.send("<presence/>").await.unwrap();
        stream.shutdown().await.unwrap();
        stream.shutdown().await.unwrap();

        let mut received = String::new();
        server.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "<presence/>");

        assert!(matches!(stream.send("x").await, Err(Error::Connection(_))));
    }
}
