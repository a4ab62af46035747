use bilichat::{DanmakuEvent, EventKind, RoomSnapshot};
use chrono::Local;
#[cfg(feature = "colored-output")]
use colored::*;
use std::collections::VecDeque;
use std::time::Duration;

use crate::config::HistoryConfig;

/// Rank entries shown per snapshot line.
const TOP_RANK: usize = 3;

pub struct OutputManager {
    colored: bool,
}

impl OutputManager {
    pub fn new(colored: bool) -> Self {
        Self { colored }
    }

    pub fn format_event(&self, event: &DanmakuEvent) -> String {
        let time = event
            .timestamp
            .with_timezone(&Local)
            .format("%H:%M:%S")
            .to_string();
        let medal = event
            .medal
            .as_ref()
            .map(|m| {
                self.colorize(&format!("[{} {}] ", m.name, m.level), &Color::Blue, false)
            })
            .unwrap_or_default();

        let (tag, color) = match event.kind {
            EventKind::Chat => ("", Color::Green),
            EventKind::SuperChat => ("SC ", Color::Red),
            EventKind::Gift | EventKind::ComboGift => ("GIFT ", Color::Yellow),
            EventKind::GuardPurchase => ("GUARD ", Color::Yellow),
            EventKind::RoomEnter => ("", Color::Cyan),
            EventKind::RankUpdate => return format!("{time} online rank count: {}", event.content),
            EventKind::WatchedChange => return format!("{time} watched: {}", event.content),
            EventKind::LikeUpdate => return format!("{time} likes: {}", event.content),
            EventKind::Unrecognized => return format!("{time} {}", event.cmd),
        };

        format!(
            "{} {}{}{}: {}",
            time,
            self.colorize(tag, &color, true),
            medal,
            self.colorize(&event.author, &color, event.kind == EventKind::Chat),
            event.content
        )
    }

    pub fn format_snapshot(&self, snapshot: &RoomSnapshot) -> String {
        let top = snapshot
            .top(TOP_RANK)
            .iter()
            .map(|e| format!("{}({})", e.name, e.score))
            .collect::<Vec<_>>()
            .join(" ");

        format!(
            "{} {} | {}/{} | online {} | fans {} | up {} | top {}",
            self.colorize("==", &Color::Cyan, true),
            self.colorize(&snapshot.title, &Color::Cyan, true),
            snapshot.parent_area_name,
            snapshot.area_name,
            snapshot.online,
            snapshot.attention,
            format_uptime(snapshot.uptime),
            if top.is_empty() { "-".to_string() } else { top }
        )
    }

    pub fn format_error(&self, message: &str) -> String {
        format!("{} {}", self.colorize("Error:", &Color::Red, true), message)
    }

    fn colorize(&self, text: &str, color: &Color, bold: bool) -> String {
        #[cfg(feature = "colored-output")]
        {
            if self.colored {
                let colored_text = match color {
                    Color::Green => text.green(),
                    Color::Yellow => text.yellow(),
                    Color::Blue => text.blue(),
                    Color::Cyan => text.cyan(),
                    Color::Red => text.red(),
                };
                if bold {
                    colored_text.bold().to_string()
                } else {
                    colored_text.to_string()
                }
            } else {
                text.to_string()
            }
        }

        #[cfg(not(feature = "colored-output"))]
        {
            let _ = (color, bold, self.colored);
            text.to_string()
        }
    }
}

enum Color {
    Green,
    Yellow,
    Blue,
    Cyan,
    Red,
}

fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    if secs == 0 {
        return "-".to_string();
    }
    format!("{}h{:02}m", secs / 3600, secs % 3600 / 60)
}

/// Bounded buffers of recent chat, super chats and gifts.
pub struct MessageLog {
    limits: HistoryConfig,
    danmaku: VecDeque<DanmakuEvent>,
    sc: VecDeque<DanmakuEvent>,
    gift: VecDeque<DanmakuEvent>,
}

impl MessageLog {
    pub fn new(limits: HistoryConfig) -> Self {
        let limits = limits.normalized();
        Self {
            limits,
            danmaku: VecDeque::with_capacity(limits.danmaku),
            sc: VecDeque::with_capacity(limits.sc),
            gift: VecDeque::with_capacity(limits.gift),
        }
    }

    pub fn record(&mut self, event: &DanmakuEvent) {
        let (buffer, limit) = match event.kind {
            EventKind::Chat => (&mut self.danmaku, self.limits.danmaku),
            EventKind::SuperChat => (&mut self.sc, self.limits.sc),
            EventKind::Gift | EventKind::ComboGift | EventKind::GuardPurchase => {
                (&mut self.gift, self.limits.gift)
            }
            _ => return,
        };
        if buffer.len() == limit {
            buffer.pop_front();
        }
        buffer.push_back(event.clone());
    }

    pub fn summary(&self) -> String {
        format!(
            "kept {} chat messages, {} super chats, {} gifts",
            self.danmaku.len(),
            self.sc.len(),
            self.gift.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bilichat::{Medal, RankEntry};

    #[test]
    fn test_format_chat_plain() {
        let output = OutputManager::new(false);
        let event = DanmakuEvent::chat("alice", "hello").with_medal(Some(Medal {
            name: "Owls".to_string(),
            level: 21,
        }));
        let line = output.format_event(&event);
        assert!(line.ends_with("[Owls 21] alice: hello"), "{line}");
    }

    #[test]
    fn test_format_super_chat_plain() {
        let output = OutputManager::new(false);
        let event = DanmakuEvent::new(EventKind::SuperChat, "SUPER_CHAT_MESSAGE", "sc", "hi [¥ 30]");
        assert!(output.format_event(&event).ends_with("SC sc: hi [¥ 30]"));
    }

    #[test]
    fn test_format_snapshot_plain() {
        let output = OutputManager::new(false);
        let snapshot = RoomSnapshot {
            title: "Coding".to_string(),
            area_name: "Programming".to_string(),
            parent_area_name: "Knowledge".to_string(),
            online: 10,
            attention: 200,
            uptime: Duration::from_secs(3900),
            rank: vec![RankEntry {
                name: "a".to_string(),
                score: 5,
                rank: 1,
            }],
            ..RoomSnapshot::default()
        };
        assert_eq!(
            output.format_snapshot(&snapshot),
            "== Coding | Knowledge/Programming | online 10 | fans 200 | up 1h05m | top a(5)"
        );
    }

    #[test]
    fn test_message_log_is_bounded() {
        let mut log = MessageLog::new(HistoryConfig {
            danmaku: 2,
            sc: 0,
            gift: 1,
        });
        for i in 0..5 {
            log.record(&DanmakuEvent::chat("u", i.to_string()));
        }
        log.record(&DanmakuEvent::new(EventKind::Gift, "SEND_GIFT", "g", "1"));
        log.record(&DanmakuEvent::new(EventKind::GuardPurchase, "GUARD_BUY", "g", "2"));
        log.record(&DanmakuEvent::new(EventKind::RoomEnter, "INTERACT_WORD", "v", ""));

        assert_eq!(log.danmaku.len(), 2);
        assert_eq!(log.danmaku.front().map(|e| e.content.as_str()), Some("3"));
        assert_eq!(log.gift.len(), 1);
        assert_eq!(log.gift[0].content, "2");
        assert_eq!(log.summary(), "kept 2 chat messages, 0 super chats, 1 gifts");
    }
}
