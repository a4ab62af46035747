//! Periodic room metadata polling and the one-shot history fetch.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::BiliApi;
use crate::error::DanmakuError;
use crate::event::DanmakuEvent;
use crate::room::RoomSnapshot;

/// Poll room info and rank immediately and then every `period`.
///
/// A failed poll is logged and skipped. A full snapshot queue blocks the
/// poller until the consumer catches up or the session is cancelled.
pub(crate) async fn run_room_poller(
    api: BiliApi,
    room_id: u64,
    period: Duration,
    page_size: u32,
    snapshots: mpsc::Sender<RoomSnapshot>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = api.room_snapshot(room_id, page_size) => result,
        };

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let e = DanmakuError::poll(e.to_string());
                warn!(room_id, "{}", e);
                continue;
            }
        };

        debug!(room_id, online = snapshot.online, rank = snapshot.rank.len(), "Room polled");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = snapshots.send(snapshot) => {
                if sent.is_err() {
                    debug!("Snapshot receiver dropped");
                    break;
                }
            }
        }
    }

    debug!(room_id, "Room poller stopped");
}

/// Fetch recent chat history; failures and cancellation yield no events.
pub(crate) async fn fetch_history(
    api: BiliApi,
    room_id: u64,
    cancel: CancellationToken,
) -> Vec<DanmakuEvent> {
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Vec::new(),
        result = api.history(room_id) => result,
    };

    match result {
        Ok(events) => {
            debug!(room_id, count = events.len(), "Fetched chat history");
            events
        }
        Err(e) => {
            warn!(room_id, "Failed to fetch chat history: {}", e);
            Vec::new()
        }
    }
}
