//! Stream framing for protocol messages
//!
//! Sockets deliver bytes in arbitrary chunks; [`MessageDecoder`] buffers
//! them and yields whole messages as soon as they are complete.

use bytes::{Buf, BytesMut};

use tempo_core::TempoResult;

use crate::Message;

/// Incremental decoder over a byte stream
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buf: BytesMut,
}

impl MessageDecoder {
    pub fn new() -> Self {
        MessageDecoder {
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Append bytes read from the stream
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Mutable access for readers that fill the buffer directly
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Number of buffered bytes not yet consumed
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Next complete message, if one is buffered.
    ///
    /// An error means the stream is corrupt and cannot be resynchronized.
    pub fn next_message(&mut self) -> TempoResult<Option<Message>> {
        match Message::frame_len(&self.buf)? {
            Some(total) if self.buf.len() >= total => {
                let (message, used) = Message::decode(&self.buf)?;
                self.buf.advance(used);
                Ok(Some(message))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaggedPayload;
    use bytes::Bytes;
    use tempo_core::{FederateId, PortId, Tag, TempoError};

    #[test]
    fn test_split_delivery() {
        let a = Message::TagAdvanceGrant(Tag::new(100, 0));
        let b = Message::TaggedMessage(TaggedPayload {
            port: PortId::new(0),
            federate: FederateId::new(1),
            tag: Tag::new(100, 1),
            body: Bytes::from_static(&[1, 2, 3, 4]),
        });
        let mut stream = a.to_bytes().unwrap().to_vec();
        stream.extend_from_slice(&b.to_bytes().unwrap());

        let mut decoder = MessageDecoder::new();
        let mut out = Vec::new();
        for chunk in stream.chunks(3) {
            decoder.extend(chunk);
            while let Some(msg) = decoder.next_message().unwrap() {
                out.push(msg);
            }
        }
        assert_eq!(out, vec![a, b]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_corrupt_stream() {
        let mut decoder = MessageDecoder::new();
        decoder.extend(&[200]);
        assert_eq!(
            decoder.next_message().unwrap_err(),
            TempoError::UnknownMessageType(200)
        );
    }

    proptest::proptest! {
        #[test]
        fn arbitrary_chunking_yields_same_messages(chunk in 1usize..32, times in proptest::collection::vec(-1_000i64..1_000, 1..16)) {
            let messages: Vec<Message> = times
                .iter()
                .map(|&t| Message::LatestTagComplete(Tag::new(t, 0)))
                .collect();
            let mut stream = Vec::new();
            for m in &messages {
                stream.extend_from_slice(&m.to_bytes().unwrap());
            }
            let mut decoder = MessageDecoder::new();
            let mut out = Vec::new();
            for piece in stream.chunks(chunk) {
                decoder.extend(piece);
                while let Some(m) = decoder.next_message().unwrap() {
                    out.push(m);
                }
            }
            proptest::prop_assert_eq!(out, messages);
        }
    }
}
