//! Bilibili web API calls used by the session.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::classifier::medal_at;
use crate::credentials::Credentials;
use crate::error::{DanmakuError, Result};
use crate::event::DanmakuEvent;
use crate::http::HttpClient;
use crate::json::JsonPath;
use crate::room::RoomSnapshot;
use crate::wbi::WbiKeys;

pub(crate) mod urls {
    pub const NAV: &str = "https://api.bilibili.com/x/web-interface/nav";
    pub const ROOM_INIT: &str = "https://api.live.bilibili.com/room/v1/Room/room_init";
    pub const DANMU_INFO: &str =
        "https://api.live.bilibili.com/xlive/web-room/v1/index/getDanmuInfo";
    pub const ROOM_INFO: &str = "https://api.live.bilibili.com/room/v1/room/get_info";
    pub const ONLINE_RANK: &str =
        "https://api.live.bilibili.com/xlive/general-interface/v1/rank/getOnlineGoldRank";
    pub const HISTORY: &str = "https://api.live.bilibili.com/xlive/web-room/v1/dM/gethistory";
    pub const SEND_MSG: &str = "https://api.live.bilibili.com/msg/send";
}

const LIVE_ORIGIN: &str = "https://live.bilibili.com";
const WEB_LOCATION: &str = "444.8";
const ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.8,zh-TW;q=0.7,zh-HK;q=0.5,en-US;q=0.3,en;q=0.2";

/// Timestamps in API payloads are China Standard Time.
const CST_OFFSET_SECS: i32 = 8 * 3600;
const API_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The caller's identity and signing key material, resolved once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: u64,
    pub wbi: WbiKeys,
}

/// Connection token and candidate hosts (`host:port`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanmuInfo {
    pub token: String,
    pub hosts: Vec<String>,
}

impl DanmuInfo {
    /// WebSocket URLs in host order.
    pub fn urls(&self) -> impl Iterator<Item = String> + '_ {
        self.hosts.iter().map(|h| format!("wss://{}/sub", h))
    }
}

/// Parse an API `YYYY-MM-DD HH:MM:SS` (CST) timestamp.
pub(crate) fn parse_api_time(s: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s.trim(), API_TIME_FORMAT).ok()?;
    let offset = FixedOffset::east_opt(CST_OFFSET_SECS)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Thin wrapper over an [`HttpClient`] with the session's cookie.
#[derive(Clone)]
pub struct BiliApi {
    http: Arc<dyn HttpClient>,
    credentials: Credentials,
}

impl BiliApi {
    pub fn new(http: Arc<dyn HttpClient>, credentials: Credentials) -> Self {
        Self { http, credentials }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    fn headers(&self, referer: Option<String>) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("Origin", LIVE_ORIGIN.to_string()),
            ("Accept", "*/*".to_string()),
            ("Accept-Language", ACCEPT_LANGUAGE.to_string()),
        ];
        if !self.credentials.header_value().is_empty() {
            headers.push(("Cookie", self.credentials.header_value().to_string()));
        }
        if let Some(referer) = referer {
            headers.push(("Referer", referer));
        }
        headers
    }

    /// Headers for the WebSocket upgrade request.
    pub(crate) fn connection_headers(&self, room_id: u64) -> Vec<(&'static str, String)> {
        self.headers(Some(format!("{LIVE_ORIGIN}/{room_id}")))
    }

    /// Resolve the caller's numeric id and the WBI key images.
    pub async fn nav(&self) -> Result<Identity> {
        let json = self
            .http
            .get(urls::NAV, &[], &self.headers(None))
            .await?
            .api_json("nav")?;

        let wbi = if json.has_path("data.wbi_img") {
            WbiKeys::new(
                json.path_str("data.wbi_img.img_url"),
                json.path_str("data.wbi_img.sub_url"),
            )
        } else {
            WbiKeys::default()
        };

        Ok(Identity {
            uid: json.path_u64("data.mid"),
            wbi,
        })
    }

    /// Resolve a (possibly short) room id to the canonical one.
    pub async fn room_init(&self, room_id: u64) -> Result<u64> {
        let json = self
            .http
            .get(
                urls::ROOM_INIT,
                &[("id", room_id.to_string())],
                &self.headers(Some(LIVE_ORIGIN.to_string())),
            )
            .await?
            .api_json("room_init")?;

        match json.path_u64("data.room_id") {
            0 => Err(DanmakuError::http("room_init: no room_id in response")),
            id => Ok(id),
        }
    }

    /// Fetch a connection token and candidate hosts, signed with WBI.
    pub async fn danmu_info(&self, room_id: u64, keys: &WbiKeys) -> Result<DanmuInfo> {
        let wts = Utc::now().timestamp();
        let mut params = vec![
            ("id", room_id.to_string()),
            ("type", "0".to_string()),
            ("wts", wts.to_string()),
            ("web_location", WEB_LOCATION.to_string()),
        ];
        let w_rid = keys.sign(&params);
        params.push(("w_rid", w_rid));

        let json = self
            .http
            .get(
                urls::DANMU_INFO,
                &params,
                &self.headers(Some(format!("{LIVE_ORIGIN}/{room_id}"))),
            )
            .await?
            .api_json("getDanmuInfo")?;

        let hosts = json
            .path_array("data.host_list")
            .iter()
            .filter_map(|h| {
                let host = h.path_str("host");
                let port = h.path_u64("wss_port");
                (!host.is_empty()).then(|| format!("{}:{}", host, port))
            })
            .collect::<Vec<_>>();

        debug!(room_id, hosts = hosts.len(), "Got danmu info");
        Ok(DanmuInfo {
            token: json.path_str("data.token"),
            hosts,
        })
    }

    /// Fetch room metadata and the online rank, assembled into one snapshot.
    pub async fn room_snapshot(&self, room_id: u64, page_size: u32) -> Result<RoomSnapshot> {
        let info = self
            .http
            .get(urls::ROOM_INFO, &[("room_id", room_id.to_string())], &[])
            .await?
            .json("get_info")?;

        let snapshot =
            RoomSnapshot::from_room_info(room_id, &info, uptime(&info, Utc::now()));

        let rank = self
            .http
            .get(
                urls::ONLINE_RANK,
                &[
                    ("ruid", snapshot.owner_id.to_string()),
                    ("roomId", room_id.to_string()),
                    ("page", "1".to_string()),
                    ("pageSize", page_size.to_string()),
                ],
                &[],
            )
            .await?
            .json("getOnlineGoldRank")?;

        Ok(snapshot.with_rank(&rank))
    }

    /// Recent chat history, oldest first, as chat events.
    pub async fn history(&self, room_id: u64) -> Result<Vec<DanmakuEvent>> {
        let json = self
            .http
            .get(urls::HISTORY, &[("roomid", room_id.to_string())], &[])
            .await?
            .json("gethistory")?;

        Ok(json
            .path_array("data.room")
            .iter()
            .map(history_event)
            .collect())
    }

    /// Send a chat message to the room.
    pub async fn send_message(&self, room_id: u64, message: &str) -> Result<()> {
        if message.trim().is_empty() {
            return Err(DanmakuError::send_rejected("empty message"));
        }
        let csrf = self
            .credentials
            .csrf()
            .ok_or_else(|| DanmakuError::send_rejected("cookie has no bili_jct"))?
            .to_string();

        let form = [
            ("bubble", "0".to_string()),
            ("msg", message.to_string()),
            ("color", "16777215".to_string()),
            ("mode", "1".to_string()),
            ("fontsize", "25".to_string()),
            ("rnd", Utc::now().timestamp().to_string()),
            ("roomid", room_id.to_string()),
            ("csrf", csrf.clone()),
            ("csrf_token", csrf),
        ];

        self.http
            .post_form(
                urls::SEND_MSG,
                &form,
                &self.headers(Some(format!("{LIVE_ORIGIN}/{room_id}"))),
            )
            .await?
            .api_json("msg/send")
            .map_err(|e| DanmakuError::send_rejected(e.to_string()))?;
        Ok(())
    }
}

fn history_event(entry: &Value) -> DanmakuEvent {
    let event = DanmakuEvent::chat(entry.path_str("nickname"), entry.path_str("text"))
        .with_medal(medal_at(entry, "medal.1", "medal.0"));
    match parse_api_time(&entry.path_str("timeline")) {
        Some(ts) => event.with_timestamp(ts),
        None => event,
    }
}

/// Time since `data.live_time`; zero when offline or unparseable.
fn uptime(info: &Value, now: DateTime<Utc>) -> Duration {
    parse_api_time(&info.path_str("data.live_time"))
        .and_then(|start| (now - start).to_std().ok())
        .unwrap_or(Duration::ZERO)
}
