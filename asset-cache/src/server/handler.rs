//! Request handling.

use tracing::debug;

use super::stats::ServerStats;
use super::storage::CacheStorage;
use crate::protocol::Message;

/// Applies one request to the store and builds its response.
///
/// Response messages arriving from a client are ignored.
pub(crate) async fn answer(
    message: Message,
    storage: &CacheStorage,
    stats: &ServerStats,
) -> Option<Message> {
    match message {
        Message::AddRequest { key, value } => {
            let files = value.len();
            let bytes = value.size();
            let added = storage.insert(key, value).await;
            stats.record_add(added);
            debug!(key = %key, files, bytes, added, "ADD");
            Some(Message::AddResponse { key, added })
        }
        Message::GetRequest { key } => {
            let value = storage.get(&key).await;
            stats.record_get(value.is_some());
            debug!(key = %key, found = value.is_some(), "GET");
            Some(Message::GetResponse { key, value })
        }
        Message::WarmRequest { key } => {
            let success = storage.touch(&key).await;
            stats.record_warm(success);
            debug!(key = %key, present = success, "WARM");
            Some(Message::WarmResponse { key, success })
        }
        other => {
            debug!(
                message_type = %other.message_type(),
                key = %other.key(),
                "Ignoring response sent by client"
            );
            None
        }
    }
}
