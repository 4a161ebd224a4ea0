//! Length-prefixed framing of message lists.
//!
//! A frame is a `u32` big-endian payload length followed by the payload:
//! the bincode encoding of an ordered list of [`Message`]s.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;

use super::message::Message;

/// Size of the length prefix.
pub const PREFIX_LEN: usize = 4;

/// Encodes `messages` into a single frame.
///
/// # Errors
/// `Oversized` if the payload is longer than `max_len`.
pub fn encode_frame(messages: &[Message], max_len: usize) -> Result<Bytes, FrameError> {
    let payload = bincode::serialize(messages).map_err(|e| FrameError::Encode(e.to_string()))?;
    if payload.len() > max_len || payload.len() > u32::MAX as usize {
        return Err(FrameError::Oversized {
            len: payload.len(),
            max: max_len,
        });
    }
    let mut frame = BytesMut::with_capacity(PREFIX_LEN + payload.len());
    frame.put_u32(payload.len() as u32);
    frame.extend_from_slice(&payload);
    Ok(frame.freeze())
}

/// Incremental frame decoder.
///
/// Bytes are fed in whatever chunks the transport delivers; a message list
/// is only produced once its frame is complete.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_len: usize,
}

impl FrameDecoder {
    pub fn new(max_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            max_len,
        }
    }

    /// Appends received bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decodes the next complete frame, if any.
    ///
    /// # Errors
    /// - `Oversized` as soon as a prefix announces more than `max_len`
    ///   bytes; nothing is allocated for the payload
    /// - `Decode` if the payload is not a valid message list
    ///
    /// After an error the stream is unusable and the link should be closed.
    pub fn next_frame(&mut self) -> Result<Option<Vec<Message>>, FrameError> {
        if self.buffer.len() < PREFIX_LEN {
            return Ok(None);
        }
        let mut prefix = [0u8; PREFIX_LEN];
        prefix.copy_from_slice(&self.buffer[..PREFIX_LEN]);
        let len = u32::from_be_bytes(prefix) as usize;
        if len > self.max_len {
            return Err(FrameError::Oversized { len, max: self.max_len });
        }
        if self.buffer.len() < PREFIX_LEN + len {
            self.buffer.reserve(PREFIX_LEN + len - self.buffer.len());
            return Ok(None);
        }
        self.buffer.advance(PREFIX_LEN);
        let payload = self.buffer.split_to(len).freeze();
        bincode::deserialize(&payload)
            .map(Some)
            .map_err(|e| FrameError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_api::Value;

    fn send(match_id: u64) -> Message {
        Message::Send {
            to: "/peer/osc1!frequency".to_string(),
            from: "/local/ctl!out".to_string(),
            args: vec![Value::Number(440.0), Value::Text("hz".to_string())],
            match_id,
        }
    }

    #[test]
    fn test_partial_frame_waits() {
        let frame = encode_frame(&[send(1), send(2)], 1024).unwrap();
        let mut decoder = FrameDecoder::new(1024);

        decoder.feed(&frame[..3]);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.feed(&frame[3..frame.len() - 1]);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.feed(&frame[frame.len() - 1..]);

        let messages = decoder.next_frame().unwrap().unwrap();
        assert_eq!(messages, vec![send(1), send(2)]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut decoder = FrameDecoder::new(1024);
        decoder.feed(&encode_frame(&[send(1)], 1024).unwrap());
        decoder.feed(&encode_frame(&[Message::system("GOODBYE", 0)], 1024).unwrap());

        assert_eq!(decoder.next_frame().unwrap().unwrap(), vec![send(1)]);
        assert_eq!(
            decoder.next_frame().unwrap().unwrap(),
            vec![Message::system("GOODBYE", 0)]
        );
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_oversized_prefix_rejected() {
        let mut decoder = FrameDecoder::new(16);
        decoder.feed(&1_000_000u32.to_be_bytes());
        assert!(matches!(
            decoder.next_frame(),
            Err(FrameError::Oversized { len: 1_000_000, max: 16 })
        ));
    }

    #[test]
    fn test_oversized_payload_not_encoded() {
        let result = encode_frame(&[send(1)], 8);
        assert!(matches!(result, Err(FrameError::Oversized { max: 8, .. })));
    }

    #[test]
    fn test_garbage_payload() {
        let mut decoder = FrameDecoder::new(1024);
        decoder.feed(&4u32.to_be_bytes());
        decoder.feed(&[0xff, 0xff, 0xff, 0xff]);
        assert!(matches!(decoder.next_frame(), Err(FrameError::Decode(_))));
    }

    proptest::proptest! {
        #[test]
        fn test_any_chunking_yields_same_messages(ids in proptest::collection::vec(0u64..1000, 1..8), step in 1usize..64) {
            let messages: Vec<Message> = ids.iter().copied().map(send).collect();
            let mut stream = Vec::new();
            for message in &messages {
                stream.extend_from_slice(&encode_frame(std::slice::from_ref(message), 4096).unwrap());
            }

            let mut decoder = FrameDecoder::new(4096);
            let mut decoded = Vec::new();
            for chunk in stream.chunks(step) {
                decoder.feed(chunk);
                while let Some(frame) = decoder.next_frame().unwrap() {
                    decoded.extend(frame);
                }
            }
            proptest::prop_assert_eq!(decoded, messages);
            proptest::prop_assert_eq!(decoder.buffered(), 0);
        }
    }
}
