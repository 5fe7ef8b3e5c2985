//! Chat between the driver and dispatch, with photo attachments.

use crate::error::{FieldOpsResult, ValidationError};
use crate::identity::{MessageId, Timestamp, VehicleId};
use crate::ports::{ChatStore, PhotoStore};
use crate::sync::RouteNotice;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const CHAT_HISTORY_LIMIT: usize = 150;
pub const CHAT_PHOTO_BUCKET: &str = "chat-images";
pub const PHOTO_CONTENT_TYPE: &str = "image/jpeg";
pub const PHOTO_MESSAGE_BODY: &str = "Foto enviada";
const EMPTY_DISPATCH_BODY: &str = "You have a new message.";

/// Who wrote a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sender {
    #[serde(rename = "chofer")]
    Driver,
    #[serde(rename = "admin")]
    Dispatch,
}

impl Sender {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Sender::Driver => "chofer",
            Sender::Dispatch => "admin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub created_at: Option<Timestamp>,
    pub vehicle_id: VehicleId,
    pub sender: Sender,
    pub body: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatMessage {
    pub vehicle_id: VehicleId,
    pub sender: Sender,
    pub body: String,
    pub image_url: Option<String>,
}

/// Chat history for one vehicle, newest first.
pub struct ChatRoom {
    vehicle: VehicleId,
    messages: Vec<ChatMessage>,
    store: Arc<dyn ChatStore>,
    photos: Arc<dyn PhotoStore>,
}

impl ChatRoom {
    pub fn new(vehicle: VehicleId, store: Arc<dyn ChatStore>, photos: Arc<dyn PhotoStore>) -> Self {
        Self {
            vehicle,
            messages: Vec::new(),
            store,
            photos,
        }
    }

    pub fn vehicle(&self) -> &VehicleId {
        &self.vehicle
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Replace the history with the most recent messages from the backend.
    pub async fn load(&mut self) -> FieldOpsResult<usize> {
        let mut messages = self
            .store
            .recent_messages(&self.vehicle, CHAT_HISTORY_LIMIT)
            .await?;
        messages.sort_by(|a, b| b.id.cmp(&a.id));
        messages.truncate(CHAT_HISTORY_LIMIT);
        self.messages = messages;
        Ok(self.messages.len())
    }

    pub async fn send_text(&self, text: &str) -> FieldOpsResult<()> {
        let body = text.trim();
        if body.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "message".to_string(),
            }
            .into());
        }
        self.store
            .insert_message(&NewChatMessage {
                vehicle_id: self.vehicle.clone(),
                sender: Sender::Driver,
                body: body.to_string(),
                image_url: None,
            })
            .await?;
        tracing::info!(vehicle = %self.vehicle, "Chat message sent");
        Ok(())
    }

    /// Upload a JPEG and post it as a message. `unix_millis` names the object.
    pub async fn send_photo(&self, bytes: Vec<u8>, unix_millis: i64) -> FieldOpsResult<String> {
        if bytes.is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "photo".to_string(),
                reason: "file is empty".to_string(),
            }
            .into());
        }
        let path = format!("{}/{}.jpg", self.vehicle, unix_millis);
        let url = self
            .photos
            .upload(CHAT_PHOTO_BUCKET, &path, PHOTO_CONTENT_TYPE, bytes)
            .await?;
        self.store
            .insert_message(&NewChatMessage {
                vehicle_id: self.vehicle.clone(),
                sender: Sender::Driver,
                body: PHOTO_MESSAGE_BODY.to_string(),
                image_url: Some(url.clone()),
            })
            .await?;
        tracing::info!(vehicle = %self.vehicle, path = %path, "Chat photo sent");
        Ok(url)
    }

    /// Merge a realtime INSERT. Returns a notice when dispatch wrote it.
    pub fn apply_insert(&mut self, message: ChatMessage) -> Option<RouteNotice> {
        if message.vehicle_id != self.vehicle {
            return None;
        }
        if self.messages.iter().any(|m| m.id == message.id) {
            return None;
        }
        let notice = (message.sender == Sender::Dispatch).then(|| {
            let text = if message.body.trim().is_empty() {
                EMPTY_DISPATCH_BODY.to_string()
            } else {
                message.body.clone()
            };
            RouteNotice::ChatMessage { text }
        });
        self.messages.insert(0, message);
        self.messages.truncate(CHAT_HISTORY_LIMIT);
        notice
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryChatStore, MemoryPhotoStore};

    fn room(store: Arc<MemoryChatStore>, photos: Arc<MemoryPhotoStore>) -> ChatRoom {
        ChatRoom::new(VehicleId::parse("AB1234").unwrap(), store, photos)
    }

    fn incoming(id: i64, sender: Sender, body: &str) -> ChatMessage {
        ChatMessage {
            id: MessageId(id),
            created_at: None,
            vehicle_id: VehicleId::parse("AB1234").unwrap(),
            sender,
            body: body.to_string(),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn test_send_text_trims_and_rejects_blank() {
        let store = Arc::new(MemoryChatStore::new());
        let chat = room(store.clone(), Arc::new(MemoryPhotoStore::new("https://x.test")));

        assert!(chat.send_text("   ").await.is_err());
        chat.send_text("  On my way ").await.unwrap();

        let sent = store.inserted();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, "On my way");
        assert_eq!(sent[0].sender, Sender::Driver);
    }

    #[tokio::test]
    async fn test_send_photo_uploads_then_posts_url() {
        let store = Arc::new(MemoryChatStore::new());
        let photos = Arc::new(MemoryPhotoStore::new("https://x.test"));
        let chat = room(store.clone(), photos.clone());

        let url = chat.send_photo(vec![0xFF, 0xD8], 1_700_000_000_000).await.unwrap();

        assert_eq!(
            url,
            "https://x.test/storage/v1/object/public/chat-images/AB1234/1700000000000.jpg"
        );
        let sent = store.inserted();
        assert_eq!(sent[0].body, PHOTO_MESSAGE_BODY);
        assert_eq!(sent[0].image_url.as_deref(), Some(url.as_str()));
    }

    #[tokio::test]
    async fn test_failed_upload_posts_nothing() {
        let store = Arc::new(MemoryChatStore::new());
        let photos = Arc::new(MemoryPhotoStore::new("https://x.test"));
        photos.fail_after(0);
        let chat = room(store.clone(), photos);

        assert!(chat.send_photo(vec![1, 2, 3], 1).await.is_err());
        assert!(store.inserted().is_empty());
    }

    #[tokio::test]
    async fn test_load_orders_newest_first() {
        let store = Arc::new(MemoryChatStore::new());
        let mut chat = room(store.clone(), Arc::new(MemoryPhotoStore::new("https://x.test")));
        chat.send_text("first").await.unwrap();
        chat.send_text("second").await.unwrap();

        assert_eq!(chat.load().await.unwrap(), 2);
        assert_eq!(chat.messages()[0].body, "second");
    }

    #[test]
    fn test_apply_insert_dedupes_and_notifies_dispatch_only() {
        let store = Arc::new(MemoryChatStore::new());
        let mut chat = room(store, Arc::new(MemoryPhotoStore::new("https://x.test")));

        assert!(chat.apply_insert(incoming(1, Sender::Driver, "hi")).is_none());
        let notice = chat.apply_insert(incoming(2, Sender::Dispatch, "")).unwrap();
        assert_eq!(notice.body(), EMPTY_DISPATCH_BODY);
        assert!(chat.apply_insert(incoming(2, Sender::Dispatch, "dup")).is_none());
        assert_eq!(chat.messages().len(), 2);
        assert_eq!(chat.messages()[0].id, MessageId(2));
    }
}
