//! Wire protocol between cache clients and the cache server.
//!
//! Every message travels as one length-prefixed frame over a TCP stream:
//!
//! ```text
//! ┌──────────────┬────────────┬─────────────────────────────┐
//! │ length: u32  │ type: u8   │ payload (type specific)     │
//! │ big-endian   │            │                             │
//! └──────────────┴────────────┴─────────────────────────────┘
//!        │
//!        └── counts the type byte plus the payload
//! ```
//!
//! # Payloads
//!
//! | Type | Tag | Payload |
//! |------|-----|---------|
//! | `ADD_REQUEST`   | 1 | `key, blobs` |
//! | `ADD_RESPONSE`  | 2 | `key, success: u8` |
//! | `GET_REQUEST`   | 3 | `key` |
//! | `GET_RESPONSE`  | 4 | `key, found: u8, blobs if found` |
//! | `WARM_REQUEST`  | 5 | `key` |
//! | `WARM_RESPONSE` | 6 | `key, success: u8` |
//!
//! where `blobs` is `count: u32` followed by `count` entries of
//! `name_len: u16, name, data_len: u64, data`.
//!
//! TCP read boundaries never align with frames, so the decoder works over an
//! accumulating buffer and reports [`Decoded::NeedMoreData`] until a whole
//! frame is present. A [`CodecError::CorruptFrame`] is fatal to the
//! connection that produced it.

mod codec;
mod message;

pub use codec::{CodecError, Decoded, WireCodec, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE};
pub use message::{Message, MessageType};
