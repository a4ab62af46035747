//! Domain events emitted by a danmaku session.
//!
//! The classifier turns each decoded JSON frame into a [`DanmakuEvent`]. The
//! event queue carries [`StreamItem`]s so that the end of the live stream is
//! visible to the consumer as a terminal item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of danmaku event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Regular chat message
    Chat,
    /// Gift sent
    Gift,
    /// Super chat (paid highlighted message)
    SuperChat,
    /// A viewer entered the room
    RoomEnter,
    /// Combo gift summary
    ComboGift,
    /// Guard (membership) purchase
    GuardPurchase,
    /// Online rank count changed
    RankUpdate,
    /// "Watched" counter changed
    WatchedChange,
    /// Like counter changed
    LikeUpdate,
    /// Command with no extraction rule
    Unrecognized,
}

/// Fan medal shown next to a chat author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medal {
    pub name: String,
    pub level: u32,
}

/// A single classified event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DanmakuEvent {
    pub kind: EventKind,
    /// Raw command name the event was classified from
    pub cmd: String,
    pub author: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medal: Option<Medal>,
}

impl DanmakuEvent {
    /// Create an event stamped with the current time. Carriage returns are
    /// stripped from `content`.
    pub fn new(
        kind: EventKind,
        cmd: impl Into<String>,
        author: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            cmd: cmd.into(),
            author: author.into(),
            content: content.into().replace('\r', ""),
            timestamp: Utc::now(),
            medal: None,
        }
    }

    /// Create an event for a command that has no extraction rule.
    pub fn unrecognized(cmd: impl Into<String>) -> Self {
        Self::new(EventKind::Unrecognized, cmd, "", "")
    }

    /// Create a chat message.
    pub fn chat(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(EventKind::Chat, "DANMU_MSG", author, content)
    }

    pub fn with_medal(mut self, medal: Option<Medal>) -> Self {
        self.medal = medal;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_recognized(&self) -> bool {
        self.kind != EventKind::Unrecognized
    }
}

/// A single item on the event queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamItem {
    Event(DanmakuEvent),
    /// The live connection ended; no further items follow.
    Closed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_carriage_returns_are_stripped() {
        let event = DanmakuEvent::chat("alice", "line one\r\nline two\r");
        assert_eq!(event.content, "line one\nline two");
        assert_eq!(event.kind, EventKind::Chat);
        assert!(event.medal.is_none());
    }

    #[test]
    fn test_unrecognized() {
        let event = DanmakuEvent::unrecognized("WIDGET_BANNER");
        assert!(!event.is_recognized());
        assert_eq!(event.cmd, "WIDGET_BANNER");
        assert!(event.author.is_empty());
    }

    #[test]
    fn test_stream_item_serializes_tagged() {
        let item = StreamItem::Closed {
            reason: "stream ended".to_string(),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "closed");
        assert_eq!(json["reason"], "stream ended");
    }
}
