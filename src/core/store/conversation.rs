//! Persisted conversation log.
//!
//! The engine appends user turns, opens a placeholder assistant turn before
//! streaming into it, and rewrites that turn by id as deltas arrive. The
//! full log survives restarts; only the outbound copy sent to a provider is
//! ever truncated.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::core::chat::{
    ChatContent, ChatTurn, LOADING_MARKER, TurnRole, image_size_kb, next_created_at,
};
use crate::core::store::kv::KvCell;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default)]
    pub chats: Vec<ChatTurn>,
}

pub struct ConversationStore {
    cell: KvCell<Conversation>,
}

impl ConversationStore {
    pub fn open(dir: &Path) -> Self {
        Self {
            cell: KvCell::open(dir, "conversation", Conversation::default()),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            cell: KvCell::in_memory("conversation", Conversation::default()),
        }
    }

    pub fn turns(&self) -> Vec<ChatTurn> {
        self.cell.get().chats
    }

    pub fn last(&self) -> Option<ChatTurn> {
        self.cell.get().chats.last().cloned()
    }

    /// Appends a user turn and returns its id. Fills in the image size
    /// estimate when the caller did not.
    pub async fn append_user_turn(&self, mut content: ChatContent) -> u64 {
        if let Some(image) = content.image.as_mut()
            && image.size_kb.is_none()
        {
            image.size_kb = Some(image_size_kb(&image.data));
        }
        let mut created = 0;
        self.cell
            .set(|mut conv| {
                created = next_created_at(conv.chats.last().map(|t| t.created_at));
                conv.chats.push(ChatTurn {
                    role: TurnRole::User,
                    created_at: created,
                    content,
                });
                conv
            })
            .await;
        created
    }

    /// Opens the assistant placeholder for a turn about to stream. Its text
    /// starts as the loading marker so the panel shows a spinner immediately.
    pub async fn start_assistant_turn(&self) -> u64 {
        let mut created = 0;
        self.cell
            .set(|mut conv| {
                created = next_created_at(conv.chats.last().map(|t| t.created_at));
                conv.chats.push(ChatTurn {
                    role: TurnRole::Assistant,
                    created_at: created,
                    content: ChatContent::from_text(LOADING_MARKER),
                });
                conv
            })
            .await;
        created
    }

    /// Rewrites the text of the turn with the given id. Missing ids are
    /// ignored; the turn may have been cleared while a stream was running.
    pub async fn update_turn(&self, created_at: u64, text: String) {
        self.cell
            .set(|mut conv| {
                if let Some(turn) = conv.chats.iter_mut().find(|t| t.created_at == created_at) {
                    turn.content.text = Some(text);
                }
                conv
            })
            .await;
    }

    /// Applies `f` to the text of the newest assistant turn, if any.
    pub async fn update_last_assistant_turn<F>(&self, f: F)
    where
        F: FnOnce(&str) -> String,
    {
        self.cell
            .set(|mut conv| {
                if let Some(turn) = conv
                    .chats
                    .iter_mut()
                    .rev()
                    .find(|t| t.role == TurnRole::Assistant)
                {
                    turn.content.text = Some(f(turn.content.text.as_deref().unwrap_or("")));
                }
                conv
            })
            .await;
    }

    pub async fn delete_turn(&self, created_at: u64) {
        self.cell
            .set(|mut conv| {
                conv.chats.retain(|t| t.created_at != created_at);
                conv
            })
            .await;
    }

    /// Removes loading markers from every turn. Runs at boot so a crash
    /// mid-stream does not leave a spinner in the log, and after a stop.
    pub async fn strip_loading_markers(&self) {
        self.cell
            .set(|mut conv| {
                for turn in conv.chats.iter_mut() {
                    if let Some(text) = turn.content.text.as_mut()
                        && text.contains(LOADING_MARKER)
                    {
                        *text = text.replace(LOADING_MARKER, "");
                    }
                }
                conv
            })
            .await;
    }

    pub async fn reset(&self) {
        self.cell.set(|_| Conversation::default()).await;
    }

    pub fn subscribe(&self) -> watch::Receiver<Conversation> {
        self.cell.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chat::ImageContent;

    #[tokio::test]
    async fn turns_get_distinct_increasing_ids() {
        let store = ConversationStore::in_memory();
        let a = store.append_user_turn(ChatContent::from_text("one")).await;
        let b = store.start_assistant_turn().await;
        let c = store.append_user_turn(ChatContent::from_text("two")).await;
        assert!(a < b && b < c);
        assert_eq!(store.turns().len(), 3);
    }

    #[tokio::test]
    async fn placeholder_starts_with_loading_marker() {
        let store = ConversationStore::in_memory();
        let id = store.start_assistant_turn().await;
        let turn = store.last().unwrap();
        assert_eq!(turn.created_at, id);
        assert_eq!(turn.content.text.as_deref(), Some(LOADING_MARKER));
    }

    #[tokio::test]
    async fn update_turn_rewrites_text_by_id() {
        let store = ConversationStore::in_memory();
        let id = store.start_assistant_turn().await;
        store.update_turn(id, "partial answ".into()).await;
        store.update_turn(id, "partial answer".into()).await;
        assert_eq!(
            store.last().unwrap().content.text.as_deref(),
            Some("partial answer")
        );
    }

    #[tokio::test]
    async fn update_missing_turn_is_a_no_op() {
        let store = ConversationStore::in_memory();
        store.update_turn(42, "ghost".into()).await;
        assert!(store.turns().is_empty());
    }

    #[tokio::test]
    async fn strip_loading_markers_keeps_surrounding_text() {
        let store = ConversationStore::in_memory();
        let id = store.start_assistant_turn().await;
        store
            .update_turn(id, format!("thinking  {LOADING_MARKER}"))
            .await;
        store.strip_loading_markers().await;
        assert_eq!(
            store.last().unwrap().content.text.as_deref(),
            Some("thinking  ")
        );
    }

    #[tokio::test]
    async fn append_fills_image_size_estimate() {
        let store = ConversationStore::in_memory();
        store
            .append_user_turn(ChatContent {
                text: None,
                image: Some(ImageContent {
                    data: format!("data:image/jpeg;base64,{}", "A".repeat(4000)),
                    ..Default::default()
                }),
            })
            .await;
        let turn = store.last().unwrap();
        assert_eq!(turn.content.image.unwrap().size_kb, Some(3));
    }

    #[tokio::test]
    async fn delete_and_reset() {
        let store = ConversationStore::in_memory();
        let a = store.append_user_turn(ChatContent::from_text("a")).await;
        store.append_user_turn(ChatContent::from_text("b")).await;
        store.delete_turn(a).await;
        assert_eq!(store.turns().len(), 1);
        store.reset().await;
        assert!(store.turns().is_empty());
    }
}
