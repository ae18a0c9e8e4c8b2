//! Typed protocol messages.

use std::fmt;

use crate::key::CacheKey;
use crate::value::CacheValue;

/// Message type tags as they appear on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    AddRequest = 1,
    AddResponse = 2,
    GetRequest = 3,
    GetResponse = 4,
    WarmRequest = 5,
    WarmResponse = 6,
}

impl MessageType {
    /// Parses a wire tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::AddRequest),
            2 => Some(Self::AddResponse),
            3 => Some(Self::GetRequest),
            4 => Some(Self::GetResponse),
            5 => Some(Self::WarmRequest),
            6 => Some(Self::WarmResponse),
            _ => None,
        }
    }

    /// The wire tag.
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AddRequest => "ADD_REQUEST",
            Self::AddResponse => "ADD_RESPONSE",
            Self::GetRequest => "GET_REQUEST",
            Self::GetResponse => "GET_RESPONSE",
            Self::WarmRequest => "WARM_REQUEST",
            Self::WarmResponse => "WARM_RESPONSE",
        };
        f.write_str(name)
    }
}

/// One protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Store `value` under `key`.
    AddRequest { key: CacheKey, value: CacheValue },

    /// Outcome of an add.
    AddResponse { key: CacheKey, added: bool },

    /// Fetch the value stored under `key`.
    GetRequest { key: CacheKey },

    /// Outcome of a fetch. `None` means the key is not in the cache, which is
    /// different from `Some` of an empty value.
    GetResponse {
        key: CacheKey,
        value: Option<CacheValue>,
    },

    /// Hint that `key` will be needed soon.
    WarmRequest { key: CacheKey },

    /// Outcome of a warm-up hint.
    WarmResponse { key: CacheKey, success: bool },
}

impl Message {
    /// The wire type of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::AddRequest { .. } => MessageType::AddRequest,
            Self::AddResponse { .. } => MessageType::AddResponse,
            Self::GetRequest { .. } => MessageType::GetRequest,
            Self::GetResponse { .. } => MessageType::GetResponse,
            Self::WarmRequest { .. } => MessageType::WarmRequest,
            Self::WarmResponse { .. } => MessageType::WarmResponse,
        }
    }

    /// The key every message carries.
    pub fn key(&self) -> &CacheKey {
        match self {
            Self::AddRequest { key, .. }
            | Self::AddResponse { key, .. }
            | Self::GetRequest { key }
            | Self::GetResponse { key, .. }
            | Self::WarmRequest { key }
            | Self::WarmResponse { key, .. } => key,
        }
    }
}
