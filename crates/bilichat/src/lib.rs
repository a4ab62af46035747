//! Bilibili live danmaku client.
//!
//! A [`Session`] resolves the caller's identity and a connection token over
//! HTTP, connects to the first reachable chat host, authenticates, and then
//! streams classified [`DanmakuEvent`]s alongside periodic [`RoomSnapshot`]s.
//!
//! ```no_run
//! # async fn run() -> bilichat::Result<()> {
//! use bilichat::{Credentials, StreamItem};
//!
//! let credentials = Credentials::parse("SESSDATA=...; bili_jct=...");
//! let mut handle = bilichat::start(credentials, 21452505).await?;
//! while let Some(item) = handle.next_event().await {
//!     match item {
//!         StreamItem::Event(event) => println!("{}: {}", event.author, event.content),
//!         StreamItem::Closed { reason } => println!("closed: {reason}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod classifier;
pub mod credentials;
pub mod decompress;
pub mod error;
pub mod event;
mod heartbeat;
pub mod http;
pub mod json;
pub mod packet;
mod poller;
mod reader;
pub mod room;
pub mod session;
pub mod transport;
pub mod wbi;

#[cfg(test)]
mod testing;

pub use credentials::Credentials;
pub use error::{DanmakuError, Result};
pub use event::{DanmakuEvent, EventKind, Medal, StreamItem};
pub use heartbeat::HEARTBEAT_PAYLOAD;
pub use room::{RankEntry, RoomSnapshot};
pub use session::{Session, SessionConfig, SessionController, SessionHandle, SessionState, start};
