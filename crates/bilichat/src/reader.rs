//! The read loop: transport → dispatcher → classifier → event queue.

use bytes::Bytes;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::classifier::classify_frame;
use crate::decompress::{DecompressorSet, Dispatched};
use crate::event::{DanmakuEvent, StreamItem};
use crate::packet::{Frame, op, split_frames};
use crate::session::SessionState;
use crate::transport::FrameStream;

pub(crate) struct ReadLoop {
    pub(crate) room_id: u64,
    pub(crate) stream: FrameStream,
    pub(crate) events: mpsc::Sender<StreamItem>,
    pub(crate) decompressors: DecompressorSet,
    pub(crate) dump_dir: Option<PathBuf>,
    /// Replayed before the first live event when present.
    pub(crate) history: Option<JoinHandle<Vec<DanmakuEvent>>>,
    pub(crate) state: Arc<watch::Sender<SessionState>>,
    pub(crate) cancel: CancellationToken,
}

impl ReadLoop {
    pub(crate) async fn run(mut self) {
        if let Some(history) = self.history.take() {
            let replay = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.finish(),
                result = history => result.unwrap_or_else(|e| {
                    warn!(room_id = self.room_id, "History task failed: {}", e);
                    Vec::new()
                }),
            };
            debug!(room_id = self.room_id, count = replay.len(), "Replaying history");
            for event in replay {
                if !self.push(StreamItem::Event(event)).await {
                    return self.finish();
                }
            }
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = self.stream.next() => next,
            };

            match next {
                Some(Ok(message)) => {
                    if !self.handle_message(message).await {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(room_id = self.room_id, "Connection failed: {}", e);
                    self.close(e.to_string()).await;
                    break;
                }
                None => {
                    info!(room_id = self.room_id, "Connection closed by peer");
                    self.close("connection closed".to_string()).await;
                    break;
                }
            }
        }

        self.finish();
    }

    /// Returns false once the loop should stop.
    async fn handle_message(&mut self, message: Bytes) -> bool {
        for packet in split_frames(&message) {
            let frames = match self.decompressors.dispatch(&packet) {
                Ok(Dispatched::Frames(frames)) => frames,
                Ok(Dispatched::Popularity(popularity)) => {
                    trace!(room_id = self.room_id, popularity, "Popularity");
                    continue;
                }
                Ok(Dispatched::Unsupported(version)) => {
                    debug!(version, "Dropping packet with unsupported protocol version");
                    continue;
                }
                Err(e) => {
                    debug!("Dropping packet: {}", e);
                    continue;
                }
            };

            for frame in frames {
                if !self.handle_frame(&frame).await {
                    return false;
                }
            }
        }
        true
    }

    async fn handle_frame(&mut self, frame: &Frame) -> bool {
        if frame.operation() != op::NOTIFICATION {
            trace!(operation = frame.operation(), "Skipping non-notification frame");
            return true;
        }

        let event = match classify_frame(&frame.body) {
            Ok(event) => event,
            Err(e) => {
                debug!("Dropping frame: {}", e);
                return true;
            }
        };

        if let Some(dir) = &self.dump_dir {
            dump_frame(dir, &event.cmd, &frame.body).await;
        }

        if !event.is_recognized() {
            trace!(cmd = %event.cmd, "Unrecognized command");
            return true;
        }

        self.push(StreamItem::Event(event)).await
    }

    /// Blocks while the queue is full. Returns false if cancelled or the
    /// consumer is gone.
    async fn push(&mut self, item: StreamItem) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            result = self.events.send(item) => {
                if result.is_err() {
                    debug!("Event receiver dropped");
                }
                result.is_ok()
            }
        }
    }

    /// Transport failure: emit the terminal item and take the session down.
    async fn close(&mut self, reason: String) {
        self.push(StreamItem::Closed { reason }).await;
        self.cancel.cancel();
    }

    /// Every exit path takes the whole session down with it.
    fn finish(&self) {
        self.cancel.cancel();
        self.state.send_replace(SessionState::Closed);
        debug!(room_id = self.room_id, "Read loop stopped");
    }
}

async fn dump_frame(dir: &Path, cmd: &str, body: &[u8]) {
    let name = format!(
        "{}-{}.json",
        cmd.replace(['/', '\\'], "_"),
        chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S%.6fZ")
    );
    let path = dir.join(name);
    if let Err(e) = tokio::fs::write(&path, body).await {
        warn!(path = %path.display(), "Failed to dump frame: {}", e);
    }
}
