//! Conversation log primitives shared by the engine, the stores, and the
//! HTTP surface.
//!
//! A [`ChatTurn`] is one persisted entry of the conversation: who spoke,
//! when, and what they said (text, an attached image, or both). The text of
//! an in-flight assistant turn carries inline markers that the panel renders
//! as UI state; they are plain substrings, not structure.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Rendered as a spinner while the assistant turn is still streaming.
pub const LOADING_MARKER: &str = "++LOADING++";
/// Rendered as a checkmark once a macro step has finished.
pub const DONE_MARKER: &str = "++DONE++";
/// Followed by a program id; the panel offers to save that run as a macro.
pub const SAVE_MARKER: &str = "++SAVE++";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContent {
    /// Data URL (or bare base64) of a jpeg/png frame.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_kb: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageContent>,
}

impl ChatContent {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image: None,
        }
    }

    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.text.as_deref().unwrap_or("").is_empty() && self.image.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub role: TurnRole,
    /// Milliseconds since epoch, unique within one conversation. Doubles as
    /// the turn id for updates and deletes.
    pub created_at: u64,
    pub content: ChatContent,
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Timestamp for a new turn, bumped past the previous one so turns created
/// in the same millisecond keep distinct ids.
pub fn next_created_at(last: Option<u64>) -> u64 {
    let now = now_ms();
    match last {
        Some(prev) if prev >= now => prev + 1,
        _ => now,
    }
}

/// Rough decoded size of a base64 image, in kilobytes. The panel shows this
/// next to attachments; exact byte counts are not worth a decode pass.
pub fn image_size_kb(data: &str) -> u64 {
    let payload = match data.find("base64,") {
        Some(idx) => &data[idx + "base64,".len()..],
        None => data,
    };
    (payload.len() as u64 * 3).div_ceil(4000)
}

/// Turns a snake_case tool name into the title-cased label shown while the
/// call runs, e.g. `tab_group` becomes `Tab Group`.
pub fn prettify_tool_name(name: &str) -> String {
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_created_at_bumps_past_duplicate() {
        let now = now_ms();
        assert_eq!(next_created_at(Some(now + 5)), now + 6);
    }

    #[test]
    fn next_created_at_uses_clock_when_ahead() {
        let at = next_created_at(Some(12));
        assert!(at >= now_ms() - 1000);
    }

    #[test]
    fn image_size_kb_strips_data_url_prefix() {
        let bare = "A".repeat(4000);
        let url = format!("data:image/jpeg;base64,{bare}");
        assert_eq!(image_size_kb(&bare), 3);
        assert_eq!(image_size_kb(&url), 3);
    }

    #[test]
    fn image_size_kb_rounds_up() {
        assert_eq!(image_size_kb("AAAA"), 1);
        assert_eq!(image_size_kb(""), 0);
    }

    #[test]
    fn prettify_tool_name_title_cases_words() {
        assert_eq!(prettify_tool_name("get_current_tab_info"), "Get Current Tab Info");
        assert_eq!(prettify_tool_name("tab_group"), "Tab Group");
        assert_eq!(prettify_tool_name("capture"), "Capture");
    }

    #[test]
    fn chat_content_serializes_camel_case() {
        let content = ChatContent {
            text: Some("hi".into()),
            image: Some(ImageContent {
                data: "data:image/jpeg;base64,AAAA".into(),
                width: Some(800),
                height: Some(600),
                size_kb: Some(1),
            }),
        };
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["image"]["sizeKb"], 1);
        assert_eq!(json["image"]["width"], 800);
    }

    #[test]
    fn empty_content_detected() {
        assert!(ChatContent::default().is_empty());
        assert!(!ChatContent::from_text("x").is_empty());
    }
}
