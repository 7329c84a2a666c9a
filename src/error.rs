use thiserror::Error;

/// Why an inbound frame was dropped at the validation boundary.
///
/// Validation failures are never reported back to the sender; they are
/// logged server-side and counted, nothing else.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The frame was not a valid JSON object.
    #[error("payload is not a valid JSON object")]
    MalformedPayload,
    /// The `type` field was missing, not a string, or outside the allowed set.
    #[error("unknown or missing message type")]
    UnknownType,
    /// A field required for this message type was absent.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

impl ValidationError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            ValidationError::MalformedPayload => "malformed_payload",
            ValidationError::UnknownType => "unknown_type",
            ValidationError::MissingField(_) => "missing_field",
        }
    }
}

/// Admission refused because the registry is full.
///
/// The connection attempt is rejected at the transport level; the refused
/// party never receives an identity or any application message.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("registry full: {active} of {limit} slots in use")]
pub struct CapacityError {
    pub active: usize,
    pub limit: usize,
}

/// What triggered a peer's teardown. Every cause funnels into the same
/// idempotent disconnect path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientClosed,
    TransportError,
    HeartbeatTimeout,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ClientClosed => "client_closed",
            DisconnectReason::TransportError => "transport_error",
            DisconnectReason::HeartbeatTimeout => "heartbeat_timeout",
        }
    }
}
