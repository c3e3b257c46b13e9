//! Wire codec for the LoRaWAN modem link
//!
//! Outbound frames are a single type-tag byte followed by the raw payload.
//! There is no length field, delimiter or checksum: delimiting is the
//! transport's job and reliability belongs to the radio layer.
//!
//! ```text
//! ┌──────────┬──────────────────────────┐
//! │ tag (u8) │ payload (0..n bytes)     │
//! └──────────┴──────────────────────────┘
//! ```
//!
//! Inbound traffic from the modem is textual and line-oriented. Each line is
//! classified by its leading marker, see [`decode_inbound`].

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{LinkError, Result};

/// Marker for a generic uplink command line (`LBDATA: <body>`)
pub const COMMAND_MARKER: &str = "LBDATA";

/// Marker for a time value line (`LBTIME: <epoch seconds>`)
pub const TIME_MARKER: &str = "LBTIME";

/// Marker for a transmit token line
pub const TOKEN_MARKER: &str = "tx_token";

/// Frame type tags. The numeric values are part of the wire format.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Ask the network side for the current time
    TimesyncRequest = 1,
    /// System event
    SystemEvent = 2,
    /// User event
    UserEvent = 3,
    /// Automation flow digest
    FlowDigest = 4,
    /// A device joined the bridge
    DeviceJoin = 5,
    /// Link keep-alive
    Heartbeat = 6,
    /// Per-device sensor payload
    SensorData = 7,
    /// Device name announcement
    DeviceName = 8,
}

impl FrameType {
    /// All frame types, in tag order
    pub const ALL: [FrameType; 8] = [
        FrameType::TimesyncRequest,
        FrameType::SystemEvent,
        FrameType::UserEvent,
        FrameType::FlowDigest,
        FrameType::DeviceJoin,
        FrameType::Heartbeat,
        FrameType::SensorData,
        FrameType::DeviceName,
    ];

    /// The tag byte for this type
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = LinkError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::TimesyncRequest),
            2 => Ok(Self::SystemEvent),
            3 => Ok(Self::UserEvent),
            4 => Ok(Self::FlowDigest),
            5 => Ok(Self::DeviceJoin),
            6 => Ok(Self::Heartbeat),
            7 => Ok(Self::SensorData),
            8 => Ok(Self::DeviceName),
            other => Err(LinkError::UnknownFrameType(other)),
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FrameType::TimesyncRequest => "timesync_request",
            FrameType::SystemEvent => "system_event",
            FrameType::UserEvent => "user_event",
            FrameType::FlowDigest => "flow_digest",
            FrameType::DeviceJoin => "device_join",
            FrameType::Heartbeat => "heartbeat",
            FrameType::SensorData => "sensor_data",
            FrameType::DeviceName => "device_name",
        };
        f.write_str(name)
    }
}

/// A typed outbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type
    pub frame_type: FrameType,
    /// Raw payload bytes
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame
    pub fn new(frame_type: FrameType, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            payload: payload.into(),
        }
    }

    /// Frame with an empty payload
    pub fn empty(frame_type: FrameType) -> Self {
        Self::new(frame_type, Bytes::new())
    }

    /// Serialize to `[tag] ++ payload`
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.payload.len());
        buf.put_u8(self.frame_type.tag());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse an encoded frame
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (&tag, payload) = data.split_first().ok_or(LinkError::EmptyFrame)?;
        Ok(Self {
            frame_type: FrameType::try_from(tag)?,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    /// Total encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        1 + self.payload.len()
    }
}

/// Classification of an inbound line from the modem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Generic uplink command; body destined for the command queue
    Command(Bytes),
    /// Time value; decimal epoch seconds, not yet parsed
    TimeValue(String),
    /// The modem is ready for one outbound transmission
    Token,
    /// Anything else
    Unrecognized,
}

/// Classify a raw inbound line.
///
/// Never fails: lines that are not valid UTF-8, carry an unknown marker or a
/// marker with an empty body are [`Inbound::Unrecognized`].
pub fn decode_inbound(line: &[u8]) -> Inbound {
    let Ok(text) = std::str::from_utf8(line) else {
        return Inbound::Unrecognized;
    };
    let text = text.trim();

    if let Some(rest) = text.strip_prefix(COMMAND_MARKER) {
        return match marker_body(rest) {
            Some(body) => Inbound::Command(Bytes::copy_from_slice(body.as_bytes())),
            None => Inbound::Unrecognized,
        };
    }

    if let Some(rest) = text.strip_prefix(TIME_MARKER) {
        return match marker_body(rest) {
            Some(body) => Inbound::TimeValue(body.to_string()),
            None => Inbound::Unrecognized,
        };
    }

    if text.starts_with(TOKEN_MARKER) {
        return Inbound::Token;
    }

    Inbound::Unrecognized
}

/// Strip the `:`/space separator that follows a marker
fn marker_body(rest: &str) -> Option<&str> {
    let body = rest.trim_start_matches([':', ' ', '\t']);
    if body.is_empty() {
        None
    } else {
        Some(body)
    }
}
