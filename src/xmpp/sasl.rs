//! SASL mechanisms for stream authentication.
//!
//! SCRAM-SHA-256 and SCRAM-SHA-1 (RFC 5802, without channel binding) are
//! preferred over PLAIN. Passwords are used as given, without SASLprep.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const NONCE_LEN: usize = 24;

/// GS2 header for a client without channel binding
const GS2_HEADER: &str = "n,,";

/// Supported mechanisms, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    ScramSha256,
    ScramSha1,
    Plain,
}

impl Mechanism {
    pub const PREFERENCE: [Mechanism; 3] =
        [Mechanism::ScramSha256, Mechanism::ScramSha1, Mechanism::Plain];

    pub fn name(self) -> &'static str {
        match self {
            Mechanism::ScramSha256 => "SCRAM-SHA-256",
            Mechanism::ScramSha1 => "SCRAM-SHA-1",
            Mechanism::Plain => "PLAIN",
        }
    }

    /// Strongest mechanism among those the server offers.
    pub fn select(offered: &[&str]) -> Option<Self> {
        Self::PREFERENCE
            .into_iter()
            .find(|mechanism| offered.contains(&mechanism.name()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScramHash {
    Sha1,
    Sha256,
}

impl ScramHash {
    fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            ScramHash::Sha1 => Sha1::digest(data).to_vec(),
            ScramHash::Sha256 => Sha256::digest(data).to_vec(),
        }
    }

    fn hmac(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let invalid_key = |e: hmac::digest::InvalidLength| Error::Authentication(e.to_string());
        Ok(match self {
            ScramHash::Sha1 => {
                let mut mac = Hmac::<Sha1>::new_from_slice(key).map_err(invalid_key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            ScramHash::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(invalid_key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        })
    }

    fn salted_password(self, password: &str, salt: &[u8], iterations: u32) -> Vec<u8> {
        match self {
            ScramHash::Sha1 => {
                let mut out = [0u8; 20];
                pbkdf2::pbkdf2_hmac::<Sha1>(password.as_bytes(), salt, iterations, &mut out);
                out.to_vec()
            }
            ScramHash::Sha256 => {
                let mut out = [0u8; 32];
                pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
                out.to_vec()
            }
        }
    }
}

/// Client side of one SCRAM exchange.
pub struct Scram {
    hash: ScramHash,
    password: String,
    client_nonce: String,
    client_first_bare: String,
    server_signature: Option<Vec<u8>>,
    verified: bool,
}

impl Scram {
    fn new(hash: ScramHash, username: &str, password: &str) -> Self {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect();
        Self::with_nonce(hash, username, password, &nonce)
    }

    fn with_nonce(hash: ScramHash, username: &str, password: &str, nonce: &str) -> Self {
        let username = username.replace('=', "=3D").replace(',', "=2C");
        Self {
            hash,
            password: password.to_string(),
            client_nonce: nonce.to_string(),
            client_first_bare: format!("n={},r={}", username, nonce),
            server_signature: None,
            verified: false,
        }
    }

    pub fn client_first(&self) -> String {
        format!("{}{}", GS2_HEADER, self.client_first_bare)
    }

    /// Answer the server-first message with the client proof.
    pub fn client_final(&mut self, server_first: &str) -> Result<String> {
        let attrs = parse_attributes(server_first);
        if let Some(error) = attrs.get("e") {
            return Err(Error::Authentication(error.to_string()));
        }

        let nonce = required(&attrs, "r")?;
        if !nonce.starts_with(&self.client_nonce) || nonce.len() == self.client_nonce.len() {
            return Err(Error::Authentication(
                "Server nonce does not extend the client nonce".to_string(),
            ));
        }
        let salt = BASE64
            .decode(required(&attrs, "s")?)
            .map_err(|e| Error::Authentication(format!("Invalid salt: {}", e)))?;
        let iterations: u32 = required(&attrs, "i")?
            .parse()
            .ok()
            .filter(|&i| i > 0)
            .ok_or_else(|| Error::Authentication("Invalid iteration count".to_string()))?;

        let channel_binding = BASE64.encode(GS2_HEADER);
        let without_proof = format!("c={},r={}", channel_binding, nonce);
        let auth_message = format!("{},{},{}", self.client_first_bare, server_first, without_proof);

        let hash = self.hash;
        let salted = hash.salted_password(&self.password, &salt, iterations);
        let client_key = hash.hmac(&salted, b"Client Key")?;
        let stored_key = hash.digest(&client_key);
        let client_signature = hash.hmac(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(&client_signature)
            .map(|(k, s)| k ^ s)
            .collect();

        let server_key = hash.hmac(&salted, b"Server Key")?;
        self.server_signature = Some(hash.hmac(&server_key, auth_message.as_bytes())?);

        Ok(format!("{},p={}", without_proof, BASE64.encode(proof)))
    }

    /// Check the server signature in the server-final message.
    pub fn verify_server_final(&mut self, server_final: &str) -> Result<()> {
        let attrs = parse_attributes(server_final);
        if let Some(error) = attrs.get("e") {
            return Err(Error::Authentication(error.to_string()));
        }

        let expected = self.server_signature.as_deref().ok_or_else(|| {
            Error::Protocol("Server-final message before server-first".to_string())
        })?;
        let received = BASE64
            .decode(required(&attrs, "v")?)
            .map_err(|e| Error::Authentication(format!("Invalid server signature: {}", e)))?;

        if received != expected {
            return Err(Error::Authentication(
                "Server signature mismatch".to_string(),
            ));
        }
        self.verified = true;
        Ok(())
    }
}

fn parse_attributes(message: &str) -> std::collections::HashMap<&str, &str> {
    message
        .split(',')
        .filter_map(|attr| attr.split_once('='))
        .collect()
}

fn required<'a>(attrs: &std::collections::HashMap<&str, &'a str>, key: &str) -> Result<&'a str> {
    attrs.get(key).copied().ok_or_else(|| {
        Error::Authentication(format!("Missing '{}' attribute in SCRAM message", key))
    })
}

/// State of one authentication exchange.
pub enum Authenticator {
    Plain { username: String, password: String },
    Scram(Scram),
}

impl Authenticator {
    pub fn new(mechanism: Mechanism, username: &str, password: &str) -> Self {
        match mechanism {
            Mechanism::ScramSha256 => {
                Authenticator::Scram(Scram::new(ScramHash::Sha256, username, password))
            }
            Mechanism::ScramSha1 => {
                Authenticator::Scram(Scram::new(ScramHash::Sha1, username, password))
            }
            Mechanism::Plain => Authenticator::Plain {
                username: username.to_string(),
                password: password.to_string(),
            },
        }
    }

    /// Data carried by the `<auth/>` element.
    pub fn initial_response(&self) -> Vec<u8> {
        match self {
            Authenticator::Plain { username, password } => {
                format!("\0{}\0{}", username, password).into_bytes()
            }
            Authenticator::Scram(scram) => scram.client_first().into_bytes(),
        }
    }

    /// Answer a `<challenge/>`.
    pub fn challenge(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let Authenticator::Scram(scram) = self else {
            return Err(Error::Protocol(
                "Unexpected challenge for PLAIN authentication".to_string(),
            ));
        };
        let message = std::str::from_utf8(data)
            .map_err(|_| Error::Protocol("SCRAM challenge is not UTF-8".to_string()))?;

        if scram.server_signature.is_none() {
            Ok(scram.client_final(message)?.into_bytes())
        } else {
            // server-final sent as a challenge, answered with an empty response
            scram.verify_server_final(message)?;
            Ok(Vec::new())
        }
    }

    /// Handle `<success/>` and its optional additional data.
    pub fn success(&mut self, data: &[u8]) -> Result<()> {
        let Authenticator::Scram(scram) = self else {
            return Ok(());
        };
        if !data.is_empty() {
            let message = std::str::from_utf8(data)
                .map_err(|_| Error::Protocol("SCRAM success data is not UTF-8".to_string()))?;
            scram.verify_server_final(message)?;
        }
        if !scram.verified {
            return Err(Error::Authentication(
                "Server did not prove knowledge of the password".to_string(),
            ));
        }
        Ok(())
    }
}

/// Decode the base64 text of a SASL element. `=` and the empty string
/// both stand for no data.
pub fn decode_payload(text: &str) -> Result<Vec<u8>> {
    let text = text.trim();
    if text.is_empty() || text == "=" {
        return Ok(Vec::new());
    }
    BASE64
        .decode(text)
        .map_err(|e| Error::Protocol(format!("Invalid base64 in SASL payload: {}", e)))
}

/// Base64 text for an outgoing SASL element. An empty response is `=`.
pub fn encode_payload(data: &[u8]) -> String {
    if data.is_empty() {
        "=".to_string()
    } else {
        BASE64.encode(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_prefers_scram_sha_256() {
        assert_eq!(
            Mechanism::select(&["PLAIN", "SCRAM-SHA-1", "SCRAM-SHA-256"]),
            Some(Mechanism::ScramSha256)
        );
        assert_eq!(
            Mechanism::select(&["PLAIN", "SCRAM-SHA-1"]),
            Some(Mechanism::ScramSha1)
        );
        assert_eq!(Mechanism::select(&["PLAIN"]), Some(Mechanism::Plain));
        assert_eq!(Mechanism::select(&["DIGEST-MD5", "X-OAUTH2"]), None);
    }

    #[test]
    fn plain_initial_response_carries_credentials() {
        let auth = Authenticator::new(Mechanism::Plain, "alice", "secret");
        assert_eq!(auth.initial_response(), b"\0alice\0secret");
        assert_eq!(encode_payload(&auth.initial_response()), "AGFsaWNlAHNlY3JldA==");
    }

    // Exchange from RFC 5802, section 5
    #[test]
    fn scram_sha1_exchange() {
        let mut scram = Scram::with_nonce(ScramHash::Sha1, "user", "pencil", "fyko+d2lbbFgONRv9qkxdawL");
        assert_eq!(scram.client_first(), "n,,n=user,r=fyko+d2lbbFgONRv9qkxdawL");

        let client_final = scram
            .client_final("r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096")
            .unwrap();
        assert_eq!(
            client_final,
            "c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,p=v0X8v3Bz2T0CJGbJQyF0X+HI4Ts="
        );

        scram
            .verify_server_final("v=rmF9pqV8S7suAoZWja4dJRkFsKQ=")
            .unwrap();
        assert!(scram.verified);
    }

    // Exchange from RFC 7677, section 3
    #[test]
    fn scram_sha256_exchange() {
        let mut scram =
            Scram::with_nonce(ScramHash::Sha256, "user", "pencil", "rOprNGfwEbeRWgbNEkqO");
        let client_final = scram
            .client_final(
                "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
                 s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096",
            )
            .unwrap();
        assert_eq!(
            client_final,
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
             p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
        );

        let mut auth = Authenticator::Scram(scram);
        auth.success(b"v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=")
            .unwrap();
    }

    #[test]
    fn scram_rejects_wrong_server_signature() {
        let mut scram = Scram::with_nonce(ScramHash::Sha1, "user", "pencil", "fyko+d2lbbFgONRv9qkxdawL");
        scram
            .client_final("r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096")
            .unwrap();

        let err = scram
            .verify_server_final("v=AAAAAAAAAAAAAAAAAAAAAAAAAAA=")
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[test]
    fn scram_rejects_nonce_not_extending_client_nonce() {
        let mut scram = Scram::with_nonce(ScramHash::Sha256, "user", "pencil", "abc");
        let err = scram.client_final("r=xyz123,s=QSXCR+Q6sek8bf92,i=4096").unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[test]
    fn scram_success_without_signature_fails() {
        let mut auth = Authenticator::new(Mechanism::ScramSha256, "user", "pencil");
        assert!(matches!(auth.success(b""), Err(Error::Authentication(_))));
    }

    #[test]
    fn scram_username_is_escaped() {
        let scram = Scram::with_nonce(ScramHash::Sha256, "a=b,c", "pw", "n0nce");
        assert_eq!(scram.client_first(), "n,,n=a=3Db=2Cc,r=n0nce");
    }

    #[test]
    fn payload_encoding_handles_empty_data() {
        assert_eq!(encode_payload(b""), "=");
        assert!(decode_payload("=").unwrap().is_empty());
        assert!(decode_payload("  ").unwrap().is_empty());
        assert_eq!(decode_payload("AGE=").unwrap(), b"\0a");
        assert!(matches!(decode_payload("***"), Err(Error::Protocol(_))));
    }
}
