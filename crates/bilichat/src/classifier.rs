//! Maps decoded notification bodies to domain events.
//!
//! Each known command has an extraction rule reading a handful of JSON paths.
//! Field access is tolerant (see [`JsonPath`]); a command without a rule
//! becomes [`EventKind::Unrecognized`].

use serde_json::Value;

use crate::error::{DanmakuError, Result};
use crate::event::{DanmakuEvent, EventKind, Medal};
use crate::json::JsonPath;

/// Content used for room-enter events.
pub const ENTERED_ROOM: &str = "entered room";

type Rule = fn(&str, &Value) -> DanmakuEvent;

/// Command name (without `:`-suffixes) to extraction rule.
const RULES: &[(&str, Rule)] = &[
    ("DANMU_MSG", chat),
    ("DANMU_MSG_MIRROR", chat),
    ("SUPER_CHAT_MESSAGE", super_chat),
    ("SUPER_CHAT_MESSAGE_JPN", super_chat),
    ("COMBO_SEND", combo_gift),
    ("GUARD_BUY", guard_purchase),
    ("INTERACT_WORD", room_enter),
    ("SEND_GIFT", gift),
    ("ONLINE_RANK_COUNT", rank_update),
    ("WATCHED_CHANGE", watched_change),
    ("LIKE_INFO_V3_UPDATE", like_update),
];

/// Classify a notification by command name.
pub fn classify(cmd: &str, body: &Value) -> DanmakuEvent {
    // e.g. "DANMU_MSG:4:0:2:2:2:0"
    let base = cmd.split(':').next().unwrap_or(cmd);
    match RULES.iter().find(|(name, _)| *name == base) {
        Some((_, rule)) => rule(cmd, body),
        None => DanmakuEvent::unrecognized(cmd),
    }
}

/// Parse a frame body as JSON and classify it by its `cmd` field.
pub fn classify_frame(body: &[u8]) -> Result<DanmakuEvent> {
    let json: Value = serde_json::from_slice(body)
        .map_err(|e| DanmakuError::protocol(format!("Invalid frame JSON: {}", e)))?;
    let cmd = json.path_str("cmd");
    Ok(classify(&cmd, &json))
}

/// Medal from an object carrying name/level fields; an empty name means none.
pub(crate) fn medal_at(body: &Value, name_path: &str, level_path: &str) -> Option<Medal> {
    let name = body.path_str(name_path);
    if name.is_empty() {
        return None;
    }
    Some(Medal {
        name,
        level: u32::try_from(body.path_u64(level_path)).unwrap_or(0),
    })
}

fn chat(cmd: &str, body: &Value) -> DanmakuEvent {
    // info[3] = [level, name, anchor, room, ...]
    DanmakuEvent::new(
        EventKind::Chat,
        cmd,
        body.path_str("info.2.1"),
        body.path_str("info.1"),
    )
    .with_medal(medal_at(body, "info.3.1", "info.3.0"))
}

fn super_chat(cmd: &str, body: &Value) -> DanmakuEvent {
    DanmakuEvent::new(
        EventKind::SuperChat,
        cmd,
        body.path_str("data.user_info.uname"),
        format!(
            "{} [¥ {}]",
            body.path_str("data.message"),
            body.path_i64("data.price")
        ),
    )
    .with_medal(medal_at(
        body,
        "data.medal_info.medal_name",
        "data.medal_info.medal_level",
    ))
}

fn combo_gift(cmd: &str, body: &Value) -> DanmakuEvent {
    DanmakuEvent::new(
        EventKind::ComboGift,
        cmd,
        body.path_str("data.r_uname"),
        format!(
            "{} {} * {}",
            body.path_str("data.action"),
            body.path_i64("data.combo_num"),
            body.path_str("data.gift_name")
        ),
    )
}

fn guard_purchase(cmd: &str, body: &Value) -> DanmakuEvent {
    DanmakuEvent::new(
        EventKind::GuardPurchase,
        cmd,
        body.path_str("data.username"),
        format!(
            "{} * {}",
            body.path_i64("data.num"),
            body.path_str("data.gift_name")
        ),
    )
}

fn room_enter(cmd: &str, body: &Value) -> DanmakuEvent {
    DanmakuEvent::new(
        EventKind::RoomEnter,
        cmd,
        body.path_str("data.uname"),
        ENTERED_ROOM,
    )
    .with_medal(medal_at(
        body,
        "data.fans_medal.medal_name",
        "data.fans_medal.medal_level",
    ))
}

fn gift(cmd: &str, body: &Value) -> DanmakuEvent {
    DanmakuEvent::new(
        EventKind::Gift,
        cmd,
        body.path_str("data.uname"),
        format!(
            "{} {} * {}",
            body.path_str("data.action"),
            body.path_i64("data.num"),
            body.path_str("data.giftName")
        ),
    )
    .with_medal(medal_at(
        body,
        "data.medal_info.medal_name",
        "data.medal_info.medal_level",
    ))
}

fn rank_update(cmd: &str, body: &Value) -> DanmakuEvent {
    DanmakuEvent::new(
        EventKind::RankUpdate,
        cmd,
        "",
        body.path_i64("data.count").to_string(),
    )
}

fn watched_change(cmd: &str, body: &Value) -> DanmakuEvent {
    let mut content = body.path_str("data.text_large");
    if content.is_empty() {
        content = body.path_i64("data.num").to_string();
    }
    DanmakuEvent::new(EventKind::WatchedChange, cmd, "", content)
}

fn like_update(cmd: &str, body: &Value) -> DanmakuEvent {
    DanmakuEvent::new(
        EventKind::LikeUpdate,
        cmd,
        "",
        body.path_i64("data.click_count").to_string(),
    )
}
