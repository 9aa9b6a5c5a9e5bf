//! Page→host message channel.
//!
//! The page posts JSON text through the native interface of the surface
//! (`window.Sat20Native.postMessage`). [`PageTransport`] is that primitive as
//! seen from the Rust provider; [`decode_page_message`] is the host's view of
//! what arrives.

use crate::error::TransportError;
use crate::protocol::{CallId, Failure, PageLog, ProviderNotification, WireCall};
use serde_json::{Map, Value};
use tokio::sync::mpsc::UnboundedSender;

/// Native-call primitive exposed to the page. Posting never waits for the
/// host to process the message.
pub trait PageTransport: Send + Sync {
    fn post(&self, message: String) -> Result<(), TransportError>;
}

impl PageTransport for UnboundedSender<String> {
    fn post(&self, message: String) -> Result<(), TransportError> {
        self.send(message).map_err(|_| TransportError::Closed)
    }
}

/// A message received from the page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageMessage {
    Call(WireCall),
    Notification(ProviderNotification),
    Log(PageLog),
    /// Not a call record. When an identifier could still be read, the host
    /// answers it with an invalid-request failure.
    Malformed {
        identifier: Option<CallId>,
        reason: String,
    },
}

pub fn decode_page_message(raw: &str) -> PageMessage {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            return PageMessage::Malformed {
                identifier: None,
                reason: e.to_string(),
            }
        }
    };
    if value.get("notification").is_some_and(Value::is_string) {
        if let Ok(notification) = serde_json::from_value::<ProviderNotification>(value.clone()) {
            return PageMessage::Notification(notification);
        }
    }
    if value.get("log").is_some_and(Value::is_string) {
        if let Ok(entry) = serde_json::from_value::<PageLog>(value.clone()) {
            return PageMessage::Log(entry);
        }
    }
    let identifier = value
        .get("identifier")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(CallId::new);
    match serde_json::from_value::<WireCall>(value) {
        Ok(call) if !call.identifier.as_str().is_empty() => PageMessage::Call(call),
        Ok(_) => PageMessage::Malformed {
            identifier: None,
            reason: "empty identifier".to_string(),
        },
        Err(e) => PageMessage::Malformed {
            identifier,
            reason: e.to_string(),
        },
    }
}

/// Normalizes a call payload to an object. Absent payloads are empty objects,
/// and a string payload is parsed as JSON text (pages that stringify their
/// arguments).
pub fn parse_payload(payload: Value) -> Result<Map<String, Value>, Failure> {
    match payload {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(Failure::invalid_request()),
        },
        _ => Err(Failure::invalid_request()),
    }
}
