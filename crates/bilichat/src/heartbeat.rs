//! Outbound packets: the sequenced writer and the keep-alive task.

use futures::SinkExt;
use std::time::Duration;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::packet::{Packet, op, ver};
use crate::transport::FrameSink;

/// Fixed keep-alive payload expected by the server.
pub const HEARTBEAT_PAYLOAD: &[u8] = b"[object Object]";

/// Write half of the connection plus the session's send sequence counter.
///
/// Every packet gets the next sequence number; the counter is never reset.
pub(crate) struct PacketWriter {
    sink: FrameSink,
    sequence: u32,
}

impl PacketWriter {
    pub(crate) fn new(sink: FrameSink, first_sequence: u32) -> Self {
        Self {
            sink,
            sequence: first_sequence,
        }
    }

    /// Sequence number the next packet will carry.
    pub(crate) fn sequence(&self) -> u32 {
        self.sequence
    }

    pub(crate) async fn send(&mut self, version: u16, operation: u32, payload: &[u8]) -> Result<()> {
        let packet = Packet::encode(version, operation, self.sequence, payload);
        self.sequence = self.sequence.wrapping_add(1);
        self.sink.send(packet).await
    }

    pub(crate) async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            debug!("Error closing connection: {}", e);
        }
    }
}

/// Send a heartbeat every `period` until cancelled, then close the connection.
///
/// The first heartbeat goes out one full period after start. Send failures are
/// logged and the next tick tries again; a dead connection surfaces through
/// the read loop instead.
pub(crate) async fn run_heartbeat(
    mut writer: PacketWriter,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let sequence = writer.sequence();
                match writer.send(ver::POPULARITY, op::HEARTBEAT, HEARTBEAT_PAYLOAD).await {
                    Ok(()) => trace!(sequence, "Sent heartbeat"),
                    Err(e) => warn!(sequence, "Failed to send heartbeat: {}", e),
                }
            }
        }
    }

    // Closing the write half also ends the peer's read side.
    writer.close().await;
    debug!("Heartbeat task stopped");
}
