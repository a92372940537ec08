//! Event protocol spoken over WebSocket text frames.
//!
//! Wire format (one JSON object per frame):
//! ```text
//! { "event": "<name>", "data": <payload> }
//!
//! client → server   get-document     "<document id>"
//!                   send-changes     <opaque delta>
//!                   save-document    <opaque content>
//! server → client   load-document    <opaque content>
//!                   receive-changes  <opaque delta>
//! ```
//!
//! Payloads are captured as raw JSON and forwarded byte-for-byte; the relay
//! never looks inside a delta or a document.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fmt;

/// Event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Event {
    GetDocument,
    LoadDocument,
    SendChanges,
    ReceiveChanges,
    SaveDocument,
}

impl Event {
    pub fn as_str(self) -> &'static str {
        match self {
            Event::GetDocument => "get-document",
            Event::LoadDocument => "load-document",
            Event::SendChanges => "send-changes",
            Event::ReceiveChanges => "receive-changes",
            Event::SaveDocument => "save-document",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "get-document" => Event::GetDocument,
            "load-document" => Event::LoadDocument,
            "send-changes" => Event::SendChanges,
            "receive-changes" => Event::ReceiveChanges,
            "save-document" => Event::SaveDocument,
            _ => return None,
        })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opaque JSON value: a delta or a full document snapshot.
#[derive(Debug, Clone)]
pub struct Payload(Box<RawValue>);

impl Payload {
    /// Wrap JSON text, validating only that it is one well-formed value.
    pub fn from_json(json: impl Into<String>) -> Result<Self, ProtocolError> {
        RawValue::from_string(json.into())
            .map(Payload)
            .map_err(|e| ProtocolError::InvalidPayload(e.to_string()))
    }

    /// Wrap stored bytes. Fails if they are not UTF-8 JSON.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ProtocolError> {
        let json =
            String::from_utf8(bytes).map_err(|e| ProtocolError::InvalidPayload(e.to_string()))?;
        Self::from_json(json)
    }

    pub fn null() -> Self {
        Payload(RawValue::NULL.to_owned())
    }

    /// A frame without `data` carries `null`, like an undefined argument.
    fn or_null(data: Option<Box<RawValue>>) -> Self {
        data.map(Payload).unwrap_or_else(Payload::null)
    }

    pub fn as_str(&self) -> &str {
        self.0.get()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.get().as_bytes()
    }

    fn raw(&self) -> &RawValue {
        &self.0
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Payload {}

/// A decoded frame before it is interpreted for a direction.
#[derive(Debug, Deserialize)]
struct IncomingFrame {
    event: String,
    #[serde(default)]
    data: Option<Box<RawValue>>,
}

#[derive(Serialize)]
struct OutgoingFrame<'a> {
    event: Event,
    data: &'a RawValue,
}

fn decode_frame(text: &str) -> Result<(Event, Option<Box<RawValue>>), ProtocolError> {
    let frame: IncomingFrame =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let event = Event::parse(&frame.event).ok_or(ProtocolError::UnknownEvent(frame.event))?;
    Ok((event, frame.data))
}

fn encode_frame(event: Event, data: &RawValue) -> Result<String, ProtocolError> {
    serde_json::to_string(&OutgoingFrame { event, data })
        .map_err(|e| ProtocolError::Serialization(e.to_string()))
}

/// Messages a client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Join a document. `None` when the id is missing, empty or not a string.
    GetDocument(Option<String>),
    SendChanges(Payload),
    SaveDocument(Payload),
}

impl ClientMessage {
    pub fn event(&self) -> Event {
        match self {
            ClientMessage::GetDocument(_) => Event::GetDocument,
            ClientMessage::SendChanges(_) => Event::SendChanges,
            ClientMessage::SaveDocument(_) => Event::SaveDocument,
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let (event, data) = decode_frame(text)?;
        match event {
            Event::GetDocument => {
                let id = data
                    .as_deref()
                    .and_then(|raw| serde_json::from_str::<String>(raw.get()).ok())
                    .filter(|id| !id.is_empty());
                Ok(ClientMessage::GetDocument(id))
            }
            Event::SendChanges => Ok(ClientMessage::SendChanges(Payload::or_null(data))),
            Event::SaveDocument => Ok(ClientMessage::SaveDocument(Payload::or_null(data))),
            other => Err(ProtocolError::UnexpectedEvent(other)),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        match self {
            ClientMessage::GetDocument(id) => {
                let id = serde_json::to_string(id.as_deref().unwrap_or_default())
                    .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
                encode_frame(Event::GetDocument, Payload::from_json(id)?.raw())
            }
            ClientMessage::SendChanges(delta) => encode_frame(Event::SendChanges, delta.raw()),
            ClientMessage::SaveDocument(content) => encode_frame(Event::SaveDocument, content.raw()),
        }
    }
}

/// Messages the server sends to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    LoadDocument(Payload),
    ReceiveChanges(Payload),
}

impl ServerMessage {
    pub fn event(&self) -> Event {
        match self {
            ServerMessage::LoadDocument(_) => Event::LoadDocument,
            ServerMessage::ReceiveChanges(_) => Event::ReceiveChanges,
        }
    }

    pub fn payload(&self) -> &Payload {
        match self {
            ServerMessage::LoadDocument(p) | ServerMessage::ReceiveChanges(p) => p,
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let (event, data) = decode_frame(text)?;
        let payload = Payload::or_null(data);
        match event {
            Event::LoadDocument => Ok(ServerMessage::LoadDocument(payload)),
            Event::ReceiveChanges => Ok(ServerMessage::ReceiveChanges(payload)),
            other => Err(ProtocolError::UnexpectedEvent(other)),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        encode_frame(self.event(), self.payload().raw())
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(String),
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
    #[error("Unexpected event in this direction: {0}")]
    UnexpectedEvent(Event),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_get_document() {
        let msg = ClientMessage::decode(r#"{"event":"get-document","data":"doc-1"}"#).unwrap();
        assert_eq!(msg, ClientMessage::GetDocument(Some("doc-1".into())));
    }

    #[test]
    fn test_get_document_without_usable_id() {
        for frame in [
            r#"{"event":"get-document"}"#,
            r#"{"event":"get-document","data":null}"#,
            r#"{"event":"get-document","data":""}"#,
            r#"{"event":"get-document","data":42}"#,
        ] {
            assert_eq!(
                ClientMessage::decode(frame).unwrap(),
                ClientMessage::GetDocument(None),
                "{frame}"
            );
        }
    }

    #[test]
    fn test_delta_kept_verbatim() {
        let frame = r#"{"event":"send-changes","data":{"ops": [ {"insert":"Hi"} ],"z":1,"a":2}}"#;
        let ClientMessage::SendChanges(delta) = ClientMessage::decode(frame).unwrap() else {
            panic!("expected send-changes");
        };
        // Key order and inner whitespace survive untouched.
        assert_eq!(delta.as_str(), r#"{"ops": [ {"insert":"Hi"} ],"z":1,"a":2}"#);

        let out = ServerMessage::ReceiveChanges(delta).encode().unwrap();
        assert_eq!(
            out,
            r#"{"event":"receive-changes","data":{"ops": [ {"insert":"Hi"} ],"z":1,"a":2}}"#
        );
    }

    #[test]
    fn test_missing_payload_is_null() {
        let msg = ClientMessage::decode(r#"{"event":"save-document"}"#).unwrap();
        assert_eq!(msg, ClientMessage::SaveDocument(Payload::null()));
    }

    #[test]
    fn test_client_encode() {
        let get = ClientMessage::GetDocument(Some("a\"b".into())).encode().unwrap();
        assert_eq!(get, r#"{"event":"get-document","data":"a\"b"}"#);
        assert_eq!(
            ClientMessage::decode(&get).unwrap(),
            ClientMessage::GetDocument(Some("a\"b".into()))
        );

        let save = ClientMessage::SaveDocument(Payload::from_json("\"Hi\"").unwrap());
        assert_eq!(save.encode().unwrap(), r#"{"event":"save-document","data":"Hi"}"#);
    }

    #[test]
    fn test_server_decode() {
        let msg = ServerMessage::decode(r#"{"event":"load-document","data":""}"#).unwrap();
        assert_eq!(msg.event(), Event::LoadDocument);
        assert_eq!(msg.payload().as_str(), r#""""#);
    }

    #[test]
    fn test_direction_enforced() {
        assert_eq!(
            ClientMessage::decode(r#"{"event":"load-document","data":""}"#),
            Err(ProtocolError::UnexpectedEvent(Event::LoadDocument))
        );
        assert_eq!(
            ServerMessage::decode(r#"{"event":"send-changes","data":{}}"#),
            Err(ProtocolError::UnexpectedEvent(Event::SendChanges))
        );
    }

    #[test]
    fn test_unknown_and_malformed() {
        assert_eq!(
            ClientMessage::decode(r#"{"event":"delete-document","data":"x"}"#),
            Err(ProtocolError::UnknownEvent("delete-document".into()))
        );
        assert!(matches!(
            ClientMessage::decode("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            ClientMessage::decode(r#"{"data":1}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_payload_from_bytes() {
        assert!(Payload::from_bytes(b"{\"ops\":[]}".to_vec()).is_ok());
        assert!(Payload::from_bytes(b"{oops".to_vec()).is_err());
        assert!(Payload::from_bytes(vec![0xFF, 0xFE]).is_err());
    }

    #[test]
    fn test_event_names() {
        assert_eq!(Event::GetDocument.as_str(), "get-document");
        assert_eq!(Event::ReceiveChanges.to_string(), "receive-changes");
        assert_eq!(
            serde_json::to_string(&Event::SaveDocument).unwrap(),
            "\"save-document\""
        );
    }
}
