//! Minimal XMPP client
//!
//! Covers what a one-shot sender needs: stream negotiation, TLS (direct or
//! StartTLS), SASL (SCRAM-SHA-256, SCRAM-SHA-1, PLAIN), resource binding, session establishment, chat
//! messages and stream close.

pub mod client;
pub mod element;
pub mod sasl;
pub mod stanza;
pub mod stream;

pub use client::{split_host_port, ConnectOptions, Security, XmppClient};
pub use element::{Element, Frame};
