//! Room metadata snapshots produced by the room poller.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::json::JsonPath;

/// One entry of the online gold rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntry {
    pub name: String,
    pub score: i64,
    pub rank: i64,
}

/// Room metadata plus the online rank, rebuilt wholesale on every poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_id: u64,
    pub owner_id: u64,
    pub title: String,
    pub area_name: String,
    pub parent_area_name: String,
    pub online: i64,
    pub attention: i64,
    /// Time since the stream went live; zero when offline or unknown.
    pub uptime: Duration,
    pub rank: Vec<RankEntry>,
}

impl RoomSnapshot {
    /// Build the metadata part of a snapshot from a `get_info` response body.
    pub(crate) fn from_room_info(room_id: u64, body: &Value, uptime: Duration) -> Self {
        Self {
            room_id,
            owner_id: body.path_u64("data.uid"),
            title: body.path_str("data.title"),
            area_name: body.path_str("data.area_name"),
            parent_area_name: body.path_str("data.parent_area_name"),
            online: body.path_i64("data.online"),
            attention: body.path_i64("data.attention"),
            uptime,
            rank: Vec::new(),
        }
    }

    /// Fill the rank list from a `getOnlineGoldRank` response body.
    pub(crate) fn with_rank(mut self, body: &Value) -> Self {
        self.rank = body
            .path_array("data.OnlineRankItem")
            .iter()
            .map(|item| RankEntry {
                name: item.path_str("name"),
                score: item.path_i64("score"),
                rank: item.path_i64("userRank"),
            })
            .collect();
        self
    }

    /// The top `n` rank entries.
    pub fn top(&self, n: usize) -> &[RankEntry] {
        &self.rank[..self.rank.len().min(n)]
    }
}
