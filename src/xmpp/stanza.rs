//! Outbound stream elements.

use quick_xml::escape::escape;

pub const NS_CLIENT: &str = "jabber:client";
pub const NS_STREAMS: &str = "http://etherx.jabber.org/streams";
pub const NS_TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";
pub const NS_SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
pub const NS_BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
pub const NS_SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
pub const NS_XHTML_IM: &str = "http://jabber.org/protocol/xhtml-im";
pub const NS_XHTML: &str = "http://www.w3.org/1999/xhtml";

pub const STREAM_CLOSE: &str = "</stream:stream>";

/// Opening stream header addressed to the account's domain.
pub fn stream_header(domain: &str) -> String {
    format!(
        "<?xml version='1.0'?><stream:stream to='{}' xmlns='{}' xmlns:stream='{}' version='1.0'>",
        escape(domain),
        NS_CLIENT,
        NS_STREAMS
    )
}

pub fn starttls() -> String {
    format!("<starttls xmlns='{}'/>", NS_TLS)
}

/// SASL `<auth/>` with the base64 initial response.
pub fn auth(mechanism: &str, payload: &str) -> String {
    format!(
        "<auth xmlns='{}' mechanism='{}'>{}</auth>",
        NS_SASL,
        escape(mechanism),
        payload
    )
}

/// SASL `<response/>` to a server challenge.
pub fn sasl_response(payload: &str) -> String {
    format!("<response xmlns='{}'>{}</response>", NS_SASL, payload)
}

pub fn bind(id: &str, resource: Option<&str>) -> String {
    match resource {
        Some(resource) => format!(
            "<iq type='set' id='{}'><bind xmlns='{}'><resource>{}</resource></bind></iq>",
            escape(id),
            NS_BIND,
            escape(resource)
        ),
        None => format!(
            "<iq type='set' id='{}'><bind xmlns='{}'/></iq>",
            escape(id),
            NS_BIND
        ),
    }
}

pub fn session(id: &str, domain: &str) -> String {
    format!(
        "<iq to='{}' type='set' id='{}'><session xmlns='{}'/></iq>",
        escape(domain),
        escape(id),
        NS_SESSION
    )
}

pub fn presence() -> String {
    "<presence xml:lang='en'/>".to_string()
}

/// Chat message with a plain text body.
pub fn chat_message(to: &str, text: &str) -> String {
    format!(
        "<message to='{}' type='chat' xml:lang='en'><body>{}</body></message>",
        escape(to),
        escape(text)
    )
}

/// Chat message carrying XHTML-IM markup. The plain body holds the same
/// content escaped, for clients without XHTML-IM support. The markup is
/// inserted as-is and must be well-formed XML.
pub fn html_message(to: &str, markup: &str) -> String {
    format!(
        "<message to='{}' type='chat' xml:lang='en'><body>{}</body>\
         <html xmlns='{}'><body xmlns='{}'>{}</body></html></message>",
        escape(to),
        escape(markup),
        NS_XHTML_IM,
        NS_XHTML,
        markup
    )
}
