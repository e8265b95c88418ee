//! Signaling Protocol
//!
//! Message shapes for the signaling channel and the length-prefixed framing
//! that carries them. Every message is a JSON object with a `type`
//! discriminator and camelCase fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::SignalError;

/// Relayed message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    Offer,
    Answer,
    IceCandidate,
}

impl RelayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayKind::Offer => "offer",
            RelayKind::Answer => "answer",
            RelayKind::IceCandidate => "ice-candidate",
        }
    }

    /// Field that carries the session description or candidate
    pub fn payload_field(&self) -> &'static str {
        match self {
            RelayKind::Offer => "offer",
            RelayKind::Answer => "answer",
            RelayKind::IceCandidate => "candidate",
        }
    }
}

/// Client -> Server messages, after field validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Register {
        user_id: String,
        public_key: String,
        token: Option<String>,
    },
    Discover {
        user_id: String,
    },
    Heartbeat {
        user_id: String,
    },
    ListPeers {
        user_id: Option<String>,
    },
    /// Forwarded verbatim; only the routing fields are extracted
    Relay {
        kind: RelayKind,
        from: String,
        to: String,
    },
}

impl Inbound {
    /// Parse and validate one message body.
    ///
    /// Unparseable bodies and unknown kinds are protocol errors; a known kind
    /// missing a required field is a validation error naming the fields.
    pub fn parse(bytes: &[u8]) -> Result<Self, SignalError> {
        let value: Value = serde_json::from_slice(bytes).map_err(|_| SignalError::Malformed)?;
        let object = value.as_object().ok_or(SignalError::Malformed)?;
        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(SignalError::Malformed)?;

        match kind {
            "register" => {
                require(object, kind, &["userId", "publicKey"], &[])?;
                Ok(Inbound::Register {
                    user_id: string_field(object, "userId").unwrap_or_default(),
                    public_key: string_field(object, "publicKey").unwrap_or_default(),
                    token: string_field(object, "token"),
                })
            }
            "discover" => {
                require(object, kind, &["userId"], &[])?;
                Ok(Inbound::Discover {
                    user_id: string_field(object, "userId").unwrap_or_default(),
                })
            }
            "heartbeat" => {
                require(object, kind, &["userId"], &[])?;
                Ok(Inbound::Heartbeat {
                    user_id: string_field(object, "userId").unwrap_or_default(),
                })
            }
            "list-peers" => Ok(Inbound::ListPeers {
                user_id: string_field(object, "userId"),
            }),
            "offer" | "answer" | "ice-candidate" => {
                let relay_kind = match kind {
                    "offer" => RelayKind::Offer,
                    "answer" => RelayKind::Answer,
                    _ => RelayKind::IceCandidate,
                };
                require(object, kind, &["from", "to"], &[relay_kind.payload_field()])?;
                Ok(Inbound::Relay {
                    kind: relay_kind,
                    from: string_field(object, "from").unwrap_or_default(),
                    to: string_field(object, "to").unwrap_or_default(),
                })
            }
            other => Err(SignalError::UnknownKind(other.to_string())),
        }
    }
}

fn string_field(object: &Map<String, Value>, name: &str) -> Option<String> {
    object
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Check that identifier fields are non-empty strings and payload fields are non-null
fn require(
    object: &Map<String, Value>,
    kind: &str,
    strings: &[&'static str],
    payloads: &[&'static str],
) -> Result<(), SignalError> {
    let mut missing: Vec<&'static str> = strings
        .iter()
        .copied()
        .filter(|field| string_field(object, field).is_none())
        .collect();
    missing.extend(
        payloads
            .iter()
            .copied()
            .filter(|field| object.get(*field).map_or(true, Value::is_null)),
    );

    if missing.is_empty() {
        Ok(())
    } else {
        Err(SignalError::Validation {
            kind: kind.to_string(),
            fields: missing,
        })
    }
}

/// Server -> Client messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Outbound {
    #[serde(rename_all = "camelCase")]
    Registered { success: bool, user_id: String },
    #[serde(rename_all = "camelCase")]
    DiscoverResponse {
        user_id: String,
        online: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        public_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pq_public_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pq_algorithm: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    HeartbeatAck { user_id: String },
    PeerList { peers: Vec<PeerSummary> },
    Error { message: String },
}

/// Discovery view of one peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub id: String,
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

impl Outbound {
    /// Serialize the message to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize a message from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Create a framed message with length prefix (4 bytes, big-endian)
    pub fn to_framed(&self) -> Result<Vec<u8>, serde_json::Error> {
        Ok(frame(&self.to_bytes()?))
    }
}

impl From<&SignalError> for Outbound {
    fn from(err: &SignalError) -> Self {
        Outbound::Error {
            message: err.to_string(),
        }
    }
}

/// Prefix `payload` with its length (4 bytes, big-endian)
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() as u32).to_be_bytes();
    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&len);
    framed.extend_from_slice(payload);
    framed
}

/// Read one frame body.
///
/// Returns `Ok(None)` when the peer closed the stream, and an
/// `InvalidData` error for frames larger than `max_len`.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit of {}", len, max_len),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Write one frame and flush it
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame(payload)).await?;
    writer.flush().await
}
