//! Frame encoding and decoding.
//!
//! [`WireCodec::decode`] is a pure function over an accumulating byte buffer:
//! it never blocks, never consumes input it cannot use, and can be fed chunks
//! of any size. The [`Decoder`] implementation wraps it for use with
//! `tokio_util::codec::FramedRead`.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::Decoder;

use super::message::{Message, MessageType};
use crate::key::{CacheKey, KEY_SIZE};
use crate::value::CacheValue;

/// Size of the length prefix in bytes.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Default upper bound for one frame body (256 MB).
///
/// Large enough for any single converted asset, small enough that a corrupt
/// length prefix cannot make the reader buffer gigabytes.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

/// Errors from encoding or decoding frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The byte stream does not hold a valid frame. Fatal to the connection.
    #[error("corrupt frame: {0}")]
    CorruptFrame(String),

    /// A message is too large to encode.
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A blob name does not fit its 16-bit length field.
    #[error("blob name too long: {0} bytes")]
    NameTooLong(usize),

    /// Transport error surfaced through the framed reader.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result of a decode attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A complete message and the number of buffer bytes it occupied.
    Message(Message, usize),
    /// The buffer does not yet hold a complete frame.
    NeedMoreData,
}

/// Length-prefixed codec for [`Message`]s.
#[derive(Clone, Debug)]
pub struct WireCodec {
    max_frame_size: usize,
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl WireCodec {
    /// Creates a codec that rejects frame bodies above `max_frame_size` bytes.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(u32::MAX as usize),
        }
    }

    /// The configured maximum frame body size.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encodes one message into a complete frame.
    pub fn encode(&self, message: &Message) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 1 + KEY_SIZE + 1);
        buf.put_u32(0); // patched below
        buf.put_u8(message.message_type().tag());
        buf.put_slice(message.key().as_bytes());

        match message {
            Message::AddRequest { value, .. } => put_value(&mut buf, value)?,
            Message::AddResponse { added, .. } => buf.put_u8(u8::from(*added)),
            Message::GetRequest { .. } | Message::WarmRequest { .. } => {}
            Message::GetResponse { value, .. } => match value {
                Some(value) => {
                    buf.put_u8(1);
                    put_value(&mut buf, value)?;
                }
                None => buf.put_u8(0),
            },
            Message::WarmResponse { success, .. } => buf.put_u8(u8::from(*success)),
        }

        let body_len = buf.len() - FRAME_HEADER_SIZE;
        if body_len > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: body_len,
                max: self.max_frame_size,
            });
        }
        buf[..FRAME_HEADER_SIZE].copy_from_slice(&(body_len as u32).to_be_bytes());
        Ok(buf.freeze())
    }

    /// Attempts to decode one message from the front of `buf`.
    pub fn decode(&self, buf: &[u8]) -> Result<Decoded, CodecError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(Decoded::NeedMoreData);
        }

        let mut prefix = [0u8; FRAME_HEADER_SIZE];
        prefix.copy_from_slice(&buf[..FRAME_HEADER_SIZE]);
        let body_len = u32::from_be_bytes(prefix) as usize;

        if body_len == 0 {
            return Err(corrupt("empty frame"));
        }
        if body_len > self.max_frame_size {
            return Err(CodecError::CorruptFrame(format!(
                "frame length {} exceeds maximum {}",
                body_len, self.max_frame_size
            )));
        }
        let frame_len = FRAME_HEADER_SIZE + body_len;
        if buf.len() < frame_len {
            return Ok(Decoded::NeedMoreData);
        }

        let message = decode_body(&buf[FRAME_HEADER_SIZE..frame_len])?;
        Ok(Decoded::Message(message, frame_len))
    }
}

impl Decoder for WireCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        match WireCodec::decode(self, &src[..])? {
            Decoded::Message(message, consumed) => {
                src.advance(consumed);
                Ok(Some(message))
            }
            Decoded::NeedMoreData => {
                if src.len() >= FRAME_HEADER_SIZE {
                    let mut prefix = [0u8; FRAME_HEADER_SIZE];
                    prefix.copy_from_slice(&src[..FRAME_HEADER_SIZE]);
                    let frame_len = FRAME_HEADER_SIZE + u32::from_be_bytes(prefix) as usize;
                    src.reserve(frame_len.saturating_sub(src.len()));
                }
                Ok(None)
            }
        }
    }
}

fn put_value(buf: &mut BytesMut, value: &CacheValue) -> Result<(), CodecError> {
    let count = u32::try_from(value.len()).map_err(|_| CodecError::FrameTooLarge {
        size: value.len(),
        max: u32::MAX as usize,
    })?;
    buf.reserve(4 + value.size() as usize + value.len() * 10);
    buf.put_u32(count);

    for file in value.files() {
        let name = file.name().as_bytes();
        let name_len = u16::try_from(name.len()).map_err(|_| CodecError::NameTooLong(name.len()))?;
        buf.put_u16(name_len);
        buf.put_slice(name);
        buf.put_u64(file.data().len() as u64);
        buf.put_slice(file.data());
    }
    Ok(())
}

fn corrupt(reason: &str) -> CodecError {
    CodecError::CorruptFrame(reason.to_string())
}

fn decode_body(body: &[u8]) -> Result<Message, CodecError> {
    let mut reader = FrameReader { buf: body };

    let tag = reader.u8("type")?;
    let message_type = MessageType::from_tag(tag)
        .ok_or_else(|| CodecError::CorruptFrame(format!("unknown message type {}", tag)))?;
    let key = reader.key()?;

    let message = match message_type {
        MessageType::AddRequest => Message::AddRequest {
            key,
            value: reader.value()?,
        },
        MessageType::AddResponse => Message::AddResponse {
            key,
            added: reader.flag("success")?,
        },
        MessageType::GetRequest => Message::GetRequest { key },
        MessageType::GetResponse => {
            let value = if reader.flag("found")? {
                Some(reader.value()?)
            } else {
                None
            };
            Message::GetResponse { key, value }
        }
        MessageType::WarmRequest => Message::WarmRequest { key },
        MessageType::WarmResponse => Message::WarmResponse {
            key,
            success: reader.flag("success")?,
        },
    };

    if !reader.buf.is_empty() {
        return Err(CodecError::CorruptFrame(format!(
            "{} trailing bytes after {}",
            reader.buf.len(),
            message_type
        )));
    }
    Ok(message)
}

/// Bounds-checked cursor over one frame body.
struct FrameReader<'a> {
    buf: &'a [u8],
}

impl<'a> FrameReader<'a> {
    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], CodecError> {
        if self.buf.len() < len {
            return Err(CodecError::CorruptFrame(format!(
                "truncated {}: need {} bytes, have {}",
                what,
                len,
                self.buf.len()
            )));
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self, what: &str) -> Result<u8, CodecError> {
        Ok(self.take(1, what)?[0])
    }

    fn flag(&mut self, what: &str) -> Result<bool, CodecError> {
        match self.u8(what)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::CorruptFrame(format!(
                "invalid {} flag {}",
                what, other
            ))),
        }
    }

    fn key(&mut self) -> Result<CacheKey, CodecError> {
        let bytes = self.take(KEY_SIZE, "key")?;
        CacheKey::from_bytes(bytes).map_err(|e| CodecError::CorruptFrame(e.to_string()))
    }

    fn value(&mut self) -> Result<CacheValue, CodecError> {
        let count = self.take(4, "blob count")?.get_u32();
        let mut value = CacheValue::new();

        for _ in 0..count {
            let name_len = self.take(2, "name length")?.get_u16() as usize;
            let name = std::str::from_utf8(self.take(name_len, "name")?)
                .map_err(|_| corrupt("blob name is not valid UTF-8"))?;
            let data_len = self.take(8, "data length")?.get_u64();
            let data_len = usize::try_from(data_len).map_err(|_| corrupt("blob too large"))?;
            let data = self.take(data_len, "blob data")?;
            value.insert(name, Bytes::copy_from_slice(data));
        }

        if value.len() != count as usize {
            return Err(corrupt("duplicate blob name"));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(n: u8) -> CacheKey {
        CacheKey::new([n; KEY_SIZE])
    }

    fn decode_one(codec: &WireCodec, bytes: &[u8]) -> Message {
        match codec.decode(bytes).unwrap() {
            Decoded::Message(message, consumed) => {
                assert_eq!(consumed, bytes.len());
                message
            }
            Decoded::NeedMoreData => panic!("expected a complete frame"),
        }
    }

    #[test]
    fn test_get_request_layout() {
        let codec = WireCodec::default();
        let frame = codec.encode(&Message::GetRequest { key: key(0xAA) }).unwrap();

        assert_eq!(frame.len(), 4 + 1 + KEY_SIZE);
        assert_eq!(&frame[..4], &(1 + KEY_SIZE as u32).to_be_bytes());
        assert_eq!(frame[4], MessageType::GetRequest.tag());
        assert!(frame[5..].iter().all(|b| *b == 0xAA));
    }

    #[test]
    fn test_add_request_layout() {
        let codec = WireCodec::default();
        let value = CacheValue::new().with_file("ab", vec![9u8, 8, 7]);
        let frame = codec
            .encode(&Message::AddRequest { key: key(1), value })
            .unwrap();

        let body = &frame[4 + 1 + KEY_SIZE..];
        assert_eq!(&body[..4], &1u32.to_be_bytes()); // blob count
        assert_eq!(&body[4..6], &2u16.to_be_bytes()); // name length
        assert_eq!(&body[6..8], b"ab");
        assert_eq!(&body[8..16], &3u64.to_be_bytes()); // data length
        assert_eq!(&body[16..], &[9, 8, 7]);
    }

    #[test]
    fn test_add_request_round_trip() {
        let codec = WireCodec::default();
        let value = CacheValue::new()
            .with_file("tex.bin", vec![0x5Au8; 4096])
            .with_file("tex.meta", b"bc1".to_vec());
        let message = Message::AddRequest {
            key: key(3),
            value: value.clone(),
        };

        let frame = codec.encode(&message).unwrap();
        assert_eq!(decode_one(&codec, &frame), message);
    }

    #[test]
    fn test_empty_value_round_trip() {
        let codec = WireCodec::default();
        let message = Message::AddRequest {
            key: key(4),
            value: CacheValue::new(),
        };
        let frame = codec.encode(&message).unwrap();
        assert_eq!(decode_one(&codec, &frame), message);
    }

    #[test]
    fn test_not_found_differs_from_empty() {
        let codec = WireCodec::default();
        let missing = codec
            .encode(&Message::GetResponse {
                key: key(5),
                value: None,
            })
            .unwrap();
        let empty = codec
            .encode(&Message::GetResponse {
                key: key(5),
                value: Some(CacheValue::new()),
            })
            .unwrap();

        assert_ne!(missing, empty);
        assert_eq!(
            decode_one(&codec, &missing),
            Message::GetResponse {
                key: key(5),
                value: None
            }
        );
        assert_eq!(
            decode_one(&codec, &empty),
            Message::GetResponse {
                key: key(5),
                value: Some(CacheValue::new())
            }
        );
    }

    #[test]
    fn test_need_more_data_on_short_header() {
        let codec = WireCodec::default();
        assert_eq!(codec.decode(&[0, 0]).unwrap(), Decoded::NeedMoreData);
        assert_eq!(codec.decode(&[]).unwrap(), Decoded::NeedMoreData);
    }

    #[test]
    fn test_split_frame_needs_more_then_decodes() {
        let codec = WireCodec::default();
        let message = Message::AddResponse {
            key: key(6),
            added: true,
        };
        let frame = codec.encode(&message).unwrap();
        let (first, _) = frame.split_at(10);

        assert_eq!(codec.decode(first).unwrap(), Decoded::NeedMoreData);
        assert_eq!(decode_one(&codec, &frame), message);
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let codec = WireCodec::default();
        let a = Message::WarmRequest { key: key(1) };
        let b = Message::WarmResponse {
            key: key(2),
            success: false,
        };
        let mut buf = codec.encode(&a).unwrap().to_vec();
        buf.extend_from_slice(&codec.encode(&b).unwrap());

        let Decoded::Message(first, consumed) = codec.decode(&buf).unwrap() else {
            panic!("expected first frame");
        };
        assert_eq!(first, a);
        assert_eq!(decode_one(&codec, &buf[consumed..]), b);
    }

    #[test]
    fn test_unknown_type_is_corrupt() {
        let codec = WireCodec::default();
        let mut frame = codec.encode(&Message::GetRequest { key: key(1) }).unwrap().to_vec();
        frame[4] = 42;
        assert!(matches!(codec.decode(&frame), Err(CodecError::CorruptFrame(_))));
    }

    #[test]
    fn test_zero_length_is_corrupt() {
        let codec = WireCodec::default();
        assert!(matches!(
            codec.decode(&[0, 0, 0, 0, 1]),
            Err(CodecError::CorruptFrame(_))
        ));
    }

    #[test]
    fn test_oversized_length_is_corrupt_before_buffering() {
        let codec = WireCodec::new(1024);
        let prefix = 2048u32.to_be_bytes();
        assert!(matches!(codec.decode(&prefix), Err(CodecError::CorruptFrame(_))));
    }

    #[test]
    fn test_invalid_flag_is_corrupt() {
        let codec = WireCodec::default();
        let mut frame = codec
            .encode(&Message::AddResponse {
                key: key(1),
                added: true,
            })
            .unwrap()
            .to_vec();
        let last = frame.len() - 1;
        frame[last] = 2;
        assert!(matches!(codec.decode(&frame), Err(CodecError::CorruptFrame(_))));
    }

    #[test]
    fn test_trailing_bytes_are_corrupt() {
        let codec = WireCodec::default();
        let mut frame = codec.encode(&Message::GetRequest { key: key(1) }).unwrap().to_vec();
        frame.push(0);
        let len = (frame.len() - 4) as u32;
        frame[..4].copy_from_slice(&len.to_be_bytes());
        assert!(matches!(codec.decode(&frame), Err(CodecError::CorruptFrame(_))));
    }

    #[test]
    fn test_blob_length_overrun_is_corrupt() {
        let codec = WireCodec::default();
        let value = CacheValue::new().with_file("a", vec![1, 2, 3]);
        let mut frame = codec
            .encode(&Message::AddRequest { key: key(1), value })
            .unwrap()
            .to_vec();
        // data_len sits just before the 3 data bytes
        let data_len_at = frame.len() - 3 - 8;
        frame[data_len_at..data_len_at + 8].copy_from_slice(&u64::MAX.to_be_bytes());
        assert!(matches!(codec.decode(&frame), Err(CodecError::CorruptFrame(_))));
    }

    #[test]
    fn test_encode_rejects_oversized_frame() {
        let codec = WireCodec::new(64);
        let value = CacheValue::new().with_file("big", vec![0u8; 128]);
        let err = codec
            .encode(&Message::AddRequest { key: key(1), value })
            .unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge { .. }));
    }

    #[test]
    fn test_encode_rejects_long_name() {
        let codec = WireCodec::default();
        let value = CacheValue::new().with_file("n".repeat(70_000), vec![1]);
        let err = codec
            .encode(&Message::AddRequest { key: key(1), value })
            .unwrap_err();
        assert!(matches!(err, CodecError::NameTooLong(70_000)));
    }

    #[test]
    fn test_decoder_trait_advances_buffer() {
        let mut codec = WireCodec::default();
        let frame = WireCodec::default()
            .encode(&Message::GetRequest { key: key(7) })
            .unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame[..5]);
        assert!(Decoder::decode(&mut codec, &mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 5);

        buf.extend_from_slice(&frame[5..]);
        let message = Decoder::decode(&mut codec, &mut buf).unwrap().unwrap();
        assert_eq!(message, Message::GetRequest { key: key(7) });
        assert!(buf.is_empty());
    }

    fn arb_value() -> impl Strategy<Value = CacheValue> {
        prop::collection::vec(
            ("[a-z]{1,12}\\.[a-z]{1,3}", prop::collection::vec(any::<u8>(), 0..512)),
            0..5,
        )
        .prop_map(|files| {
            let mut value = CacheValue::new();
            for (name, data) in files {
                value.insert(name, data);
            }
            value
        })
    }

    proptest! {
        #[test]
        fn prop_add_request_survives_any_split(
            key_bytes in prop::array::uniform32(any::<u8>()),
            value in arb_value(),
            split in any::<prop::sample::Index>(),
        ) {
            let codec = WireCodec::default();
            let message = Message::AddRequest { key: CacheKey::new(key_bytes), value };
            let frame = codec.encode(&message).unwrap();
            let at = split.index(frame.len());

            let mut decoder = codec.clone();
            let mut buf = BytesMut::new();
            buf.extend_from_slice(&frame[..at]);
            prop_assert!(Decoder::decode(&mut decoder, &mut buf).unwrap().is_none());

            buf.extend_from_slice(&frame[at..]);
            let decoded = Decoder::decode(&mut decoder, &mut buf).unwrap();
            prop_assert_eq!(decoded, Some(message));
            prop_assert!(buf.is_empty());
        }
    }
}
