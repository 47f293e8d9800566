//! JSON signaling envelope shared with the browser clients
//!
//! Every frame on a signaling socket is a single JSON object carrying exactly
//! one of the keys `description` or `candidate`. Unknown top-level keys are
//! ignored; anything else is a protocol error the caller logs and drops.

use serde::{Deserialize, Serialize};

/// SDP payload type carried inside a `description` envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// A session description as exchanged on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description type
    #[serde(rename = "type")]
    pub kind: SdpKind,

    /// Serialized SDP, opaque to the relay
    pub sdp: String,
}

/// A trickled ICE candidate as exchanged on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate line, opaque to the relay
    pub candidate: String,

    /// Media description identifier the candidate belongs to
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,

    /// Index of the media description the candidate belongs to
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: u16,
}

/// One parsed signaling message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    Description(SessionDescription),
    Candidate(IceCandidate),
}

/// Wire envelope; exactly one field is populated
#[derive(Debug, Default, Serialize, Deserialize)]
struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<SessionDescription>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    candidate: Option<IceCandidate>,
}

impl SignalMessage {
    /// Parse a message from a JSON text frame
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let envelope: Envelope = serde_json::from_str(json).map_err(|e| {
            crate::Error::Serialization(format!("failed to parse signaling message: {}", e))
        })?;

        match (envelope.description, envelope.candidate) {
            (Some(description), None) => Ok(Self::Description(description)),
            (None, Some(candidate)) => Ok(Self::Candidate(candidate)),
            (Some(_), Some(_)) => Err(crate::Error::Serialization(
                "signaling message carries both a description and a candidate".to_string(),
            )),
            (None, None) => Err(crate::Error::Serialization(
                "signaling message carries neither a description nor a candidate".to_string(),
            )),
        }
    }

    /// Serialize the message to a JSON text frame
    pub fn to_json(&self) -> crate::Result<String> {
        let envelope = match self {
            Self::Description(description) => Envelope {
                description: Some(description.clone()),
                candidate: None,
            },
            Self::Candidate(candidate) => Envelope {
                description: None,
                candidate: Some(candidate.clone()),
            },
        };

        serde_json::to_string(&envelope).map_err(|e| {
            crate::Error::Serialization(format!("failed to serialize signaling message: {}", e))
        })
    }
}
