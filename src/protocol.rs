use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ValidationError;

/// Message types the relay accepts from clients.
pub const ALLOWED_TYPES: &[&str] = &[
    "join",
    "offer",
    "answer",
    "candidate",
    "leave",
    "text-message",
];

/// Client-originated signal kinds. Each variant carries exactly the fields
/// required for its type; payload contents (SDP bodies, ICE candidates) are
/// opaque to the relay and forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalPayload {
    #[serde(rename = "join")]
    Join,
    #[serde(rename = "offer")]
    Offer {
        sdp: String,
        #[serde(rename = "sdpType")]
        sdp_type: String,
    },
    #[serde(rename = "answer")]
    Answer {
        sdp: String,
        #[serde(rename = "sdpType")]
        sdp_type: String,
    },
    #[serde(rename = "candidate")]
    Candidate { candidate: Value },
    #[serde(rename = "leave")]
    Leave,
    #[serde(rename = "text-message")]
    TextMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
}

impl SignalPayload {
    /// Wire name of this signal, for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalPayload::Join => "join",
            SignalPayload::Offer { .. } => "offer",
            SignalPayload::Answer { .. } => "answer",
            SignalPayload::Candidate { .. } => "candidate",
            SignalPayload::Leave => "leave",
            SignalPayload::TextMessage { .. } => "text-message",
        }
    }
}

/// One relayed message: a signal payload plus the routing fields.
///
/// `from` and `timestamp` are stamped by the relay before forwarding; values
/// supplied by the sender are overwritten, never trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub payload: SignalPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Envelope {
    /// Overwrite the sender identity and timestamp with relay-authoritative
    /// values.
    pub fn stamp(mut self, sender_id: &str) -> Self {
        self.from = Some(sender_id.to_string());
        self.timestamp = Some(now_ms());
        self
    }
}

/// Server-originated envelopes: admission welcome, membership announcements
/// and the shutdown notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SystemEnvelope {
    Id {
        id: String,
        peers: Vec<String>,
        timestamp: i64,
    },
    PeerJoined {
        id: String,
        timestamp: i64,
    },
    PeerLeft {
        id: String,
        timestamp: i64,
    },
    ServerShutdown {
        message: String,
        timestamp: i64,
    },
}

/// Generate a unique peer ID.
pub fn generate_peer_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current time as epoch milliseconds, the wire timestamp unit.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse and validate one raw frame.
///
/// Checks run in order: JSON shape, the `type` allow-list, then the
/// per-type required fields (presence only — an explicit `null` counts as
/// present, matching how clients probe optional payloads).
pub fn validate(raw: &str) -> Result<Envelope, ValidationError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|_| ValidationError::MalformedPayload)?;

    let kind = match value.get("type").and_then(Value::as_str) {
        Some(kind) if ALLOWED_TYPES.contains(&kind) => kind,
        _ => return Err(ValidationError::UnknownType),
    };

    for field in required_fields(kind).iter().copied() {
        if value.get(field).is_none() {
            return Err(ValidationError::MissingField(field));
        }
    }

    serde_json::from_value(value).map_err(|_| ValidationError::MalformedPayload)
}

fn required_fields(kind: &str) -> &'static [&'static str] {
    match kind {
        "offer" | "answer" => &["sdp", "sdpType"],
        "candidate" => &["candidate"],
        _ => &[],
    }
}
