//! Coordinator protocol messages
//!
//! Every message is one type byte followed by a fixed payload; only tagged
//! messages carry a variable-length body, announced by their length field.
//! All multi-byte integers are little-endian.
//!
//! Tag payload (12 bytes):
//! - Bytes 0-7: time (i64)
//! - Bytes 8-11: microstep (u32)
//!
//! Tagged message header (20 bytes after the type byte):
//! - Bytes 0-1: destination port (u16)
//! - Bytes 2-3: destination federate (u16)
//! - Bytes 4-7: body length (i32)
//! - Bytes 8-19: tag
//! - Bytes 20..: body

use bytes::{BufMut, Bytes, BytesMut};

use tempo_core::{FederateId, Instant, PortId, Tag, TempoError, TempoResult};

/// Encoded tag length
pub const TAG_SIZE: usize = 12;

/// Header length of a tagged message, excluding the type byte
pub const TAGGED_HEADER_SIZE: usize = 20;

/// Largest tagged-message body accepted from the wire
pub const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Largest federation identifier (its length is one byte)
pub const MAX_FEDERATION_ID_LEN: usize = u8::MAX as usize;

/// Message type bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Reject = 0,
    FedIds = 1,
    Timestamp = 2,
    Resign = 4,
    TaggedMessage = 5,
    NextEventTag = 6,
    TagAdvanceGrant = 7,
    ProvisionalTagAdvanceGrant = 8,
    LatestTagComplete = 9,
    StopRequest = 10,
    StopRequestReply = 11,
    StopGranted = 12,
    P2pTaggedMessage = 18,
    PortAbsent = 23,
    Failed = 25,
    UdpPort = 254,
    Ack = 255,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(MessageType::Reject),
            1 => Some(MessageType::FedIds),
            2 => Some(MessageType::Timestamp),
            4 => Some(MessageType::Resign),
            5 => Some(MessageType::TaggedMessage),
            6 => Some(MessageType::NextEventTag),
            7 => Some(MessageType::TagAdvanceGrant),
            8 => Some(MessageType::ProvisionalTagAdvanceGrant),
            9 => Some(MessageType::LatestTagComplete),
            10 => Some(MessageType::StopRequest),
            11 => Some(MessageType::StopRequestReply),
            12 => Some(MessageType::StopGranted),
            18 => Some(MessageType::P2pTaggedMessage),
            23 => Some(MessageType::PortAbsent),
            25 => Some(MessageType::Failed),
            254 => Some(MessageType::UdpPort),
            255 => Some(MessageType::Ack),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Payload length after the type byte, if fixed.
    ///
    /// Tagged messages and federate IDs return `None`: their length depends
    /// on a field inside the payload.
    pub fn fixed_payload_len(self) -> Option<usize> {
        match self {
            MessageType::Reject => Some(1),
            MessageType::Timestamp => Some(8),
            MessageType::Resign | MessageType::Failed | MessageType::Ack => Some(0),
            MessageType::NextEventTag
            | MessageType::TagAdvanceGrant
            | MessageType::ProvisionalTagAdvanceGrant
            | MessageType::LatestTagComplete
            | MessageType::StopRequest
            | MessageType::StopRequestReply
            | MessageType::StopGranted => Some(TAG_SIZE),
            MessageType::PortAbsent => Some(4 + TAG_SIZE),
            MessageType::UdpPort => Some(2),
            MessageType::FedIds | MessageType::TaggedMessage | MessageType::P2pTaggedMessage => {
                None
            }
        }
    }
}

/// Reasons the coordinator gives for rejecting a federate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectCause {
    FederationIdDoesNotMatch = 1,
    FederateIdInUse = 2,
    FederateIdOutOfRange = 3,
    UnexpectedMessage = 4,
    WrongServer = 5,
    HmacDoesNotMatch = 6,
    RtiNotExecutedWithAuth = 7,
}

impl RejectCause {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(RejectCause::FederationIdDoesNotMatch),
            2 => Some(RejectCause::FederateIdInUse),
            3 => Some(RejectCause::FederateIdOutOfRange),
            4 => Some(RejectCause::UnexpectedMessage),
            5 => Some(RejectCause::WrongServer),
            6 => Some(RejectCause::HmacDoesNotMatch),
            7 => Some(RejectCause::RtiNotExecutedWithAuth),
            _ => None,
        }
    }
}

/// Timestamped data addressed to a port of a federate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaggedPayload {
    pub port: PortId,
    pub federate: FederateId,
    pub tag: Tag,
    pub body: Bytes,
}

/// A protocol message
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Reject(u8),
    FedIds {
        federate: FederateId,
        federation_id: String,
    },
    Timestamp(Instant),
    Resign,
    TaggedMessage(TaggedPayload),
    P2pTaggedMessage(TaggedPayload),
    NextEventTag(Tag),
    TagAdvanceGrant(Tag),
    ProvisionalTagAdvanceGrant(Tag),
    LatestTagComplete(Tag),
    StopRequest(Tag),
    StopRequestReply(Tag),
    StopGranted(Tag),
    PortAbsent {
        port: PortId,
        federate: FederateId,
        tag: Tag,
    },
    Failed,
    UdpPort(u16),
    Ack,
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Reject(_) => MessageType::Reject,
            Message::FedIds { .. } => MessageType::FedIds,
            Message::Timestamp(_) => MessageType::Timestamp,
            Message::Resign => MessageType::Resign,
            Message::TaggedMessage(_) => MessageType::TaggedMessage,
            Message::P2pTaggedMessage(_) => MessageType::P2pTaggedMessage,
            Message::NextEventTag(_) => MessageType::NextEventTag,
            Message::TagAdvanceGrant(_) => MessageType::TagAdvanceGrant,
            Message::ProvisionalTagAdvanceGrant(_) => MessageType::ProvisionalTagAdvanceGrant,
            Message::LatestTagComplete(_) => MessageType::LatestTagComplete,
            Message::StopRequest(_) => MessageType::StopRequest,
            Message::StopRequestReply(_) => MessageType::StopRequestReply,
            Message::StopGranted(_) => MessageType::StopGranted,
            Message::PortAbsent { .. } => MessageType::PortAbsent,
            Message::Failed => MessageType::Failed,
            Message::UdpPort(_) => MessageType::UdpPort,
            Message::Ack => MessageType::Ack,
        }
    }

    /// Encoded length including the type byte
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Message::FedIds { federation_id, .. } => 3 + federation_id.len(),
            Message::TaggedMessage(p) | Message::P2pTaggedMessage(p) => {
                TAGGED_HEADER_SIZE + p.body.len()
            }
            other => other.message_type().fixed_payload_len().unwrap_or(0),
        }
    }

    /// Serialize into `buf`
    pub fn encode(&self, buf: &mut BytesMut) -> TempoResult<()> {
        buf.reserve(self.encoded_len());
        buf.put_u8(self.message_type().to_byte());
        match self {
            Message::Reject(cause) => buf.put_u8(*cause),
            Message::FedIds {
                federate,
                federation_id,
            } => {
                if federation_id.len() > MAX_FEDERATION_ID_LEN {
                    return Err(TempoError::InvalidWireFormat(format!(
                        "federation id of {} bytes exceeds {}",
                        federation_id.len(),
                        MAX_FEDERATION_ID_LEN
                    )));
                }
                buf.put_slice(&federate.to_bytes());
                buf.put_u8(federation_id.len() as u8);
                buf.put_slice(federation_id.as_bytes());
            }
            Message::Timestamp(instant) => buf.put_i64_le(*instant),
            Message::Resign | Message::Failed | Message::Ack => {}
            Message::TaggedMessage(p) | Message::P2pTaggedMessage(p) => {
                if p.body.len() > MAX_BODY_SIZE {
                    return Err(TempoError::InvalidWireFormat(format!(
                        "body of {} bytes exceeds {}",
                        p.body.len(),
                        MAX_BODY_SIZE
                    )));
                }
                buf.put_slice(&p.port.to_bytes());
                buf.put_slice(&p.federate.to_bytes());
                buf.put_i32_le(p.body.len() as i32);
                put_tag(buf, p.tag);
                buf.put_slice(&p.body);
            }
            Message::NextEventTag(tag)
            | Message::TagAdvanceGrant(tag)
            | Message::ProvisionalTagAdvanceGrant(tag)
            | Message::LatestTagComplete(tag)
            | Message::StopRequest(tag)
            | Message::StopRequestReply(tag)
            | Message::StopGranted(tag) => put_tag(buf, *tag),
            Message::PortAbsent {
                port,
                federate,
                tag,
            } => {
                buf.put_slice(&port.to_bytes());
                buf.put_slice(&federate.to_bytes());
                put_tag(buf, *tag);
            }
            Message::UdpPort(port) => buf.put_u16_le(*port),
        }
        Ok(())
    }

    /// Serialize into a fresh buffer
    pub fn to_bytes(&self) -> TempoResult<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Total encoded length of the message at the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed to know it.
    pub fn frame_len(buf: &[u8]) -> TempoResult<Option<usize>> {
        let Some(&type_byte) = buf.first() else {
            return Ok(None);
        };
        let msg_type =
            MessageType::from_byte(type_byte).ok_or(TempoError::UnknownMessageType(type_byte))?;
        if let Some(len) = msg_type.fixed_payload_len() {
            return Ok(Some(1 + len));
        }
        match msg_type {
            MessageType::FedIds => Ok(buf.get(3).map(|&len| 4 + len as usize)),
            _ => {
                if buf.len() < 9 {
                    return Ok(None);
                }
                let len = body_len(&buf[5..9])?;
                Ok(Some(1 + TAGGED_HEADER_SIZE + len))
            }
        }
    }

    /// Parse one message from the front of `buf`, returning it and the
    /// number of bytes consumed
    pub fn decode(buf: &[u8]) -> TempoResult<(Message, usize)> {
        let total = Message::frame_len(buf)?.ok_or(TempoError::BufferTooShort {
            expected: 9,
            actual: buf.len(),
        })?;
        if buf.len() < total {
            return Err(TempoError::BufferTooShort {
                expected: total,
                actual: buf.len(),
            });
        }
        let payload = &buf[1..total];
        // frame_len already rejected unknown types
        let msg_type = MessageType::from_byte(buf[0]).ok_or(TempoError::UnknownMessageType(buf[0]))?;

        let message = match msg_type {
            MessageType::Reject => Message::Reject(payload[0]),
            MessageType::FedIds => {
                let federate = FederateId::from_bytes([payload[0], payload[1]]);
                let federation_id = std::str::from_utf8(&payload[3..])
                    .map_err(|e| TempoError::InvalidWireFormat(e.to_string()))?
                    .to_string();
                Message::FedIds {
                    federate,
                    federation_id,
                }
            }
            MessageType::Timestamp => Message::Timestamp(read_i64(&payload[0..8])),
            MessageType::Resign => Message::Resign,
            MessageType::Failed => Message::Failed,
            MessageType::Ack => Message::Ack,
            MessageType::TaggedMessage | MessageType::P2pTaggedMessage => {
                let tagged = TaggedPayload {
                    port: PortId::from_bytes([payload[0], payload[1]]),
                    federate: FederateId::from_bytes([payload[2], payload[3]]),
                    tag: read_tag(&payload[8..20]),
                    body: Bytes::copy_from_slice(&payload[TAGGED_HEADER_SIZE..]),
                };
                if msg_type == MessageType::TaggedMessage {
                    Message::TaggedMessage(tagged)
                } else {
                    Message::P2pTaggedMessage(tagged)
                }
            }
            MessageType::NextEventTag => Message::NextEventTag(read_tag(payload)),
            MessageType::TagAdvanceGrant => Message::TagAdvanceGrant(read_tag(payload)),
            MessageType::ProvisionalTagAdvanceGrant => {
                Message::ProvisionalTagAdvanceGrant(read_tag(payload))
            }
            MessageType::LatestTagComplete => Message::LatestTagComplete(read_tag(payload)),
            MessageType::StopRequest => Message::StopRequest(read_tag(payload)),
            MessageType::StopRequestReply => Message::StopRequestReply(read_tag(payload)),
            MessageType::StopGranted => Message::StopGranted(read_tag(payload)),
            MessageType::PortAbsent => Message::PortAbsent {
                port: PortId::from_bytes([payload[0], payload[1]]),
                federate: FederateId::from_bytes([payload[2], payload[3]]),
                tag: read_tag(&payload[4..16]),
            },
            MessageType::UdpPort => Message::UdpPort(u16::from_le_bytes([payload[0], payload[1]])),
        };
        Ok((message, total))
    }
}

fn put_tag(buf: &mut BytesMut, tag: Tag) {
    buf.put_i64_le(tag.time);
    buf.put_u32_le(tag.microstep);
}

fn read_i64(bytes: &[u8]) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    i64::from_le_bytes(raw)
}

fn read_tag(bytes: &[u8]) -> Tag {
    let mut micro = [0u8; 4];
    micro.copy_from_slice(&bytes[8..12]);
    Tag::new(read_i64(bytes), u32::from_le_bytes(micro))
}

fn body_len(bytes: &[u8]) -> TempoResult<usize> {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    let len = i32::from_le_bytes(raw);
    if len < 0 || len as usize > MAX_BODY_SIZE {
        return Err(TempoError::InvalidWireFormat(format!(
            "tagged message length {} out of range",
            len
        )));
    }
    Ok(len as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_message_layout() {
        let bytes = Message::NextEventTag(Tag::new(0x0102, 3)).to_bytes().unwrap();
        assert_eq!(bytes.len(), 13);
        assert_eq!(bytes[0], 6);
        assert_eq!(&bytes[1..9], &0x0102i64.to_le_bytes());
        assert_eq!(&bytes[9..13], &3u32.to_le_bytes());
    }

    #[test]
    fn test_port_absent_layout() {
        let msg = Message::PortAbsent {
            port: PortId::new(2),
            federate: FederateId::new(9),
            tag: Tag::new(-5, 1),
        };
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(bytes[0], 23);
        assert_eq!(&bytes[1..3], &[2, 0]);
        assert_eq!(&bytes[3..5], &[9, 0]);
        assert_eq!(bytes.len(), 17);
        assert_eq!(Message::decode(&bytes).unwrap(), (msg, 17));
    }

    #[test]
    fn test_tagged_message() {
        let msg = Message::TaggedMessage(TaggedPayload {
            port: PortId::new(1),
            federate: FederateId::new(4),
            tag: Tag::new(1_000, 2),
            body: Bytes::from_static(b"hello"),
        });
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(bytes.len(), 1 + TAGGED_HEADER_SIZE + 5);
        assert_eq!(&bytes[5..9], &5i32.to_le_bytes());
        let (decoded, used) = Message::decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn test_empty_payload_messages() {
        for msg in [Message::Resign, Message::Failed, Message::Ack] {
            let bytes = msg.to_bytes().unwrap();
            assert_eq!(bytes.len(), 1);
            assert_eq!(Message::decode(&bytes).unwrap().0, msg);
        }
    }

    #[test]
    fn test_fed_ids() {
        let msg = Message::FedIds {
            federate: FederateId::new(3),
            federation_id: "fed-7".into(),
        };
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(bytes[3], 5);
        assert_eq!(Message::decode(&bytes).unwrap().0, msg);
    }

    #[test]
    fn test_truncated_buffer() {
        let bytes = Message::StopGranted(Tag::new(1, 1)).to_bytes().unwrap();
        let err = Message::decode(&bytes[..7]).unwrap_err();
        assert_eq!(
            err,
            TempoError::BufferTooShort {
                expected: 13,
                actual: 7
            }
        );
    }

    #[test]
    fn test_unknown_type() {
        assert_eq!(
            Message::decode(&[3, 0, 0]).unwrap_err(),
            TempoError::UnknownMessageType(3)
        );
    }

    #[test]
    fn test_negative_body_length_rejected() {
        let mut raw = vec![5u8, 0, 0, 0, 0];
        raw.extend_from_slice(&(-1i32).to_le_bytes());
        raw.extend_from_slice(&[0u8; 12]);
        assert!(matches!(
            Message::decode(&raw),
            Err(TempoError::InvalidWireFormat(_))
        ));
    }

    #[test]
    fn test_reject_cause() {
        assert_eq!(
            RejectCause::from_byte(1),
            Some(RejectCause::FederationIdDoesNotMatch)
        );
        assert_eq!(RejectCause::from_byte(42), None);
    }
}
