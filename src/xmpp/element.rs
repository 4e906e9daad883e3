//! Incremental parsing of the inbound XML stream.
//!
//! An XMPP stream is one long XML document: `<stream:stream>` is opened once
//! and every stanza is a direct child of it. Bytes arrive in arbitrary
//! chunks, so the parser works on the unconsumed tail of the receive buffer
//! and reports how many bytes a complete frame used.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};

const STREAM_TAG: &str = "stream:stream";

/// A parsed XML element with its subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    /// Qualified name as it appeared on the wire, e.g. `stream:features`
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    /// Name without the namespace prefix.
    pub fn local_name(&self) -> &str {
        match self.name.split_once(':') {
            Some((_, local)) => local,
            None => &self.name,
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First direct child with the given local name.
    pub fn child(&self, local_name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.local_name() == local_name)
    }

    pub fn has_child(&self, local_name: &str) -> bool {
        self.child(local_name).is_some()
    }

    /// Local name of the first child, used for error conditions such as
    /// `<failure><not-authorized/></failure>`.
    pub fn condition(&self) -> &str {
        self.children
            .first()
            .map(Element::local_name)
            .unwrap_or("undefined-condition")
    }
}

/// One unit of the inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// The server's `<stream:stream ...>` opening tag
    StreamOpen(Element),
    /// A complete top-level element (stanza, features, SASL reply, ...)
    Stanza(Element),
    /// `</stream:stream>`
    StreamClose,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Parsed {
    /// A frame and the number of bytes it consumed
    Complete(Frame, usize),
    /// The buffer ends before the next frame is complete
    Incomplete,
}

fn start_element(start: &BytesStart<'_>) -> Result<Element> {
    let mut element = Element {
        name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
        ..Default::default()
    };

    for attr in start.attributes() {
        let attr = attr.map_err(|e| Error::Protocol(format!("Invalid attribute: {}", e)))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        element.attrs.push((key, value));
    }

    Ok(element)
}

/// Try to parse the next frame from `buf`.
///
/// Syntax errors are reported as `Incomplete`: a truncated tag or entity at
/// the end of the buffer is indistinguishable from bad input until more
/// bytes arrive, and the caller bounds both the wait and the buffer size.
pub fn parse_frame(buf: &[u8]) -> Result<Parsed> {
    let mut reader = Reader::from_reader(buf);
    reader.config_mut().check_end_names = false;

    let mut stack: Vec<Element> = Vec::new();

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(_) => return Ok(Parsed::Incomplete),
        };
        let consumed = reader.buffer_position() as usize;

        match event {
            Event::Start(ref e) => {
                let element = start_element(e)?;
                if stack.is_empty() && element.name == STREAM_TAG {
                    return Ok(Parsed::Complete(Frame::StreamOpen(element), consumed));
                }
                stack.push(element);
            }
            Event::Empty(ref e) => {
                let element = start_element(e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Ok(Parsed::Complete(Frame::Stanza(element), consumed)),
                }
            }
            Event::End(ref e) => match stack.pop() {
                Some(element) => match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Ok(Parsed::Complete(Frame::Stanza(element), consumed)),
                },
                None if e.name().as_ref() == STREAM_TAG.as_bytes() => {
                    return Ok(Parsed::Complete(Frame::StreamClose, consumed));
                }
                None => {
                    return Err(Error::Protocol(format!(
                        "Unexpected closing tag </{}>",
                        String::from_utf8_lossy(e.name().as_ref())
                    )));
                }
            },
            Event::Text(ref t) => {
                if let Some(current) = stack.last_mut() {
                    match t.unescape() {
                        Ok(text) => current.text.push_str(&text),
                        Err(_) => return Ok(Parsed::Incomplete),
                    }
                }
            }
            Event::CData(c) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::Eof => return Ok(Parsed::Incomplete),
            // declarations, comments, processing instructions
            _ => {}
        }
    }
}
