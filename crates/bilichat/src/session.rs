//! Session lifecycle: identity and token resolution, host failover, the
//! authentication handshake, and the tasks that run once established.
//!
//! ```text
//! Idle → ResolvingIdentity → ResolvingToken → Connecting → Authenticating → Established → Closed
//! ```
//!
//! Any failure before `Established` is returned from [`Session::start`] as a
//! [`DanmakuError::Startup`] naming the stage. After that, the read loop,
//! heartbeat, room poller and history fetch all run under one
//! [`CancellationToken`]; a transport failure or [`SessionController::stop`]
//! cancels it and the session moves to `Closed`. There is no automatic
//! reconnection; a closed [`Session`] may be started again by the caller.

use futures::StreamExt;
use serde_json::json;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{BiliApi, DanmuInfo, Identity};
use crate::credentials::Credentials;
use crate::decompress::DecompressorSet;
use crate::error::{DanmakuError, Result};
use crate::event::StreamItem;
use crate::heartbeat::{PacketWriter, run_heartbeat};
use crate::http::{HttpClient, ReqwestHttpClient};
use crate::json::JsonPath;
use crate::packet::{Packet, op, ver};
use crate::poller::{fetch_history, run_room_poller};
use crate::reader::ReadLoop;
use crate::room::RoomSnapshot;
use crate::transport::{Connection, Connector, FrameStream, WebSocketConnector};

/// Protocol version announced in the handshake.
const PROTOCOL_VERSION: u32 = 2;
const PLATFORM: &str = "web";
const CONNECTION_TYPE: u32 = 2;

/// Sequence number of the first packet sent on a session.
const FIRST_SEQUENCE: u32 = 1;

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Idle,
    ResolvingIdentity,
    ResolvingToken,
    Connecting,
    Authenticating,
    Established,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::ResolvingIdentity => "resolving identity",
            Self::ResolvingToken => "resolving token",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Established => "established",
            Self::Closed => "closed",
        })
    }
}

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
    /// Number of online-rank entries requested per poll
    pub rank_page_size: u32,
    pub event_capacity: usize,
    pub snapshot_capacity: usize,
    /// Replay recent chat history before live events
    pub fetch_history: bool,
    /// When set, every decoded frame body is written here
    pub dump_dir: Option<PathBuf>,
    pub decompressors: DecompressorSet,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            poll_interval: Duration::from_secs(30),
            rank_page_size: 50,
            event_capacity: 1024,
            snapshot_capacity: 8,
            fetch_history: true,
            dump_dir: None,
            decompressors: DecompressorSet::default(),
        }
    }
}

/// A danmaku session for one room, before it is started.
pub struct Session {
    api: BiliApi,
    connector: Arc<dyn Connector>,
    room_id: u64,
    config: SessionConfig,
    /// Resolved once, then reused.
    identity: Option<Identity>,
    canonical_room_id: Option<u64>,
    history_fetched: bool,
    state: Arc<watch::Sender<SessionState>>,
    cancel: CancellationToken,
}

impl Session {
    /// Session over the default reqwest and WebSocket collaborators.
    pub fn new(credentials: Credentials, room_id: u64) -> Result<Self> {
        Ok(Self::with_collaborators(
            Arc::new(ReqwestHttpClient::new()?),
            Arc::new(WebSocketConnector),
            credentials,
            room_id,
        ))
    }

    pub fn with_collaborators(
        http: Arc<dyn HttpClient>,
        connector: Arc<dyn Connector>,
        credentials: Credentials,
        room_id: u64,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            api: BiliApi::new(http, credentials),
            connector,
            room_id,
            config: SessionConfig::default(),
            identity: None,
            canonical_room_id: None,
            history_fetched: false,
            state: Arc::new(state),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state transitions, including those made during [`Session::start`].
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        debug!(room_id = self.room_id, %state, "Session state");
        self.state.send_replace(state);
    }

    /// Run the startup sequence and spawn the session tasks.
    ///
    /// A session that has closed can be started again: the identity and the
    /// canonical room id are reused, and history is never replayed twice.
    pub async fn start(&mut self) -> Result<SessionHandle> {
        let state = self.state();
        if state != SessionState::Idle && state != SessionState::Closed {
            return Err(DanmakuError::other(format!("session is already {state}")));
        }
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }

        match self.establish().await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                error!(room_id = self.room_id, "{}", e);
                self.set_state(SessionState::Closed);
                Err(e)
            }
        }
    }

    async fn establish(&mut self) -> Result<SessionHandle> {
        self.set_state(SessionState::ResolvingIdentity);
        let identity = self
            .resolve_identity()
            .await
            .map_err(|e| e.at_stage(SessionState::ResolvingIdentity))?;
        let room_id = self
            .resolve_room_id()
            .await
            .map_err(|e| e.at_stage(SessionState::ResolvingIdentity))?;

        self.set_state(SessionState::ResolvingToken);
        let info = self
            .api
            .danmu_info(room_id, &identity.wbi)
            .await
            .map_err(|e| e.at_stage(SessionState::ResolvingToken))?;
        if info.hosts.is_empty() {
            return Err(DanmakuError::startup(
                SessionState::ResolvingToken,
                "no candidate hosts",
            ));
        }

        self.set_state(SessionState::Connecting);
        let connection = self.connect_any(room_id, &info).await?;

        self.set_state(SessionState::Authenticating);
        let (writer, stream) = self
            .authenticate(connection, &identity, room_id, &info.token)
            .await
            .map_err(|e| e.at_stage(SessionState::Authenticating))?;

        self.set_state(SessionState::Established);
        info!(room_id, uid = identity.uid, "Danmaku session established");
        Ok(self.spawn_tasks(room_id, writer, stream))
    }

    async fn resolve_identity(&mut self) -> Result<Identity> {
        if let Some(identity) = &self.identity {
            return Ok(identity.clone());
        }
        let identity = self.api.nav().await?;
        debug!(uid = identity.uid, "Resolved identity");
        self.identity = Some(identity.clone());
        Ok(identity)
    }

    async fn resolve_room_id(&mut self) -> Result<u64> {
        if let Some(id) = self.canonical_room_id {
            return Ok(id);
        }
        let id = self.api.room_init(self.room_id).await?;
        if id != self.room_id {
            debug!(short_id = self.room_id, room_id = id, "Resolved short room id");
        }
        self.canonical_room_id = Some(id);
        Ok(id)
    }

    /// Try every host in order; the first successful connection wins.
    async fn connect_any(&self, room_id: u64, info: &DanmuInfo) -> Result<Connection> {
        let headers = self.api.connection_headers(room_id);
        let mut last_error = None;

        for url in info.urls() {
            debug!(%url, "Connecting");
            match self.connector.connect(&url, &headers).await {
                Ok(connection) => {
                    info!(%url, "Connected");
                    return Ok(connection);
                }
                Err(e) => {
                    warn!(%url, "Failed to connect: {}", e);
                    last_error = Some(e);
                }
            }
        }

        Err(DanmakuError::startup(
            SessionState::Connecting,
            format!(
                "all {} hosts failed, last error: {}",
                info.hosts.len(),
                last_error.map(|e| e.to_string()).unwrap_or_default()
            ),
        ))
    }

    async fn authenticate(
        &self,
        connection: Connection,
        identity: &Identity,
        room_id: u64,
        token: &str,
    ) -> Result<(PacketWriter, FrameStream)> {
        let Connection { sink, mut stream } = connection;
        let mut writer = PacketWriter::new(sink, FIRST_SEQUENCE);

        let body = json!({
            "uid": identity.uid,
            "roomid": room_id,
            "protover": PROTOCOL_VERSION,
            "buvid": self.api.credentials().buvid3_or_generate(),
            "platform": PLATFORM,
            "type": CONNECTION_TYPE,
            "key": token,
        });
        writer
            .send(ver::POPULARITY, op::AUTH, body.to_string().as_bytes())
            .await?;

        let reply = match stream.next().await {
            Some(Ok(bytes)) => Packet::decode(&bytes)?,
            Some(Err(e)) => return Err(e),
            None => {
                return Err(DanmakuError::connection(
                    "connection closed before auth reply",
                ));
            }
        };
        check_auth_reply(&reply)?;

        debug!(room_id, "Authenticated");
        Ok((writer, stream))
    }

    fn spawn_tasks(
        &mut self,
        room_id: u64,
        writer: PacketWriter,
        stream: FrameStream,
    ) -> SessionHandle {
        let (event_tx, event_rx) = mpsc::channel(self.config.event_capacity.max(1));
        let (snapshot_tx, snapshot_rx) = mpsc::channel(self.config.snapshot_capacity.max(1));

        let history = if self.config.fetch_history && !self.history_fetched {
            self.history_fetched = true;
            Some(tokio::spawn(fetch_history(
                self.api.clone(),
                room_id,
                self.cancel.clone(),
            )))
        } else {
            None
        };

        let reader = ReadLoop {
            room_id,
            stream,
            events: event_tx,
            decompressors: self.config.decompressors.clone(),
            dump_dir: self.config.dump_dir.clone(),
            history,
            state: self.state.clone(),
            cancel: self.cancel.clone(),
        };

        let tasks = vec![
            tokio::spawn(reader.run()),
            tokio::spawn(run_heartbeat(
                writer,
                self.config.heartbeat_interval,
                self.cancel.clone(),
            )),
            tokio::spawn(run_room_poller(
                self.api.clone(),
                room_id,
                self.config.poll_interval,
                self.config.rank_page_size,
                snapshot_tx,
                self.cancel.clone(),
            )),
        ];

        SessionHandle {
            events: event_rx,
            snapshots: snapshot_rx,
            controller: SessionController {
                api: self.api.clone(),
                room_id,
                state: self.state.clone(),
                cancel: self.cancel.clone(),
                tasks,
            },
        }
    }
}

fn check_auth_reply(reply: &Packet) -> Result<()> {
    if reply.operation() != op::AUTH_REPLY {
        return Err(DanmakuError::protocol(format!(
            "unexpected auth reply operation {}",
            reply.operation()
        )));
    }
    let body: serde_json::Value = serde_json::from_slice(&reply.body)
        .map_err(|e| DanmakuError::protocol(format!("invalid auth reply: {e}")))?;
    if !body.has_path("code") {
        return Err(DanmakuError::protocol("auth reply has no code"));
    }
    match body.path_i64("code") {
        0 => Ok(()),
        code => Err(DanmakuError::protocol(format!(
            "auth rejected with code {code}: {body}"
        ))),
    }
}

/// Output streams and control of an established session.
pub struct SessionHandle {
    /// Live events; ends with [`StreamItem::Closed`] on transport failure
    pub events: mpsc::Receiver<StreamItem>,
    pub snapshots: mpsc::Receiver<RoomSnapshot>,
    pub controller: SessionController,
}

impl SessionHandle {
    pub async fn next_event(&mut self) -> Option<StreamItem> {
        self.events.recv().await
    }

    pub async fn next_snapshot(&mut self) -> Option<RoomSnapshot> {
        self.snapshots.recv().await
    }

    pub fn into_parts(
        self,
    ) -> (
        mpsc::Receiver<StreamItem>,
        mpsc::Receiver<RoomSnapshot>,
        SessionController,
    ) {
        (self.events, self.snapshots, self.controller)
    }

    pub async fn send_message(&self, message: &str) -> Result<()> {
        self.controller.send_message(message).await
    }

    pub async fn stop(self) {
        self.controller.stop().await
    }
}

/// Sends chat, reports state and shuts the session down.
///
/// Dropping the controller cancels the session without waiting for its tasks.
pub struct SessionController {
    api: BiliApi,
    room_id: u64,
    state: Arc<watch::Sender<SessionState>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionController {
    /// Canonical room id the session is connected to.
    pub fn room_id(&self) -> u64 {
        self.room_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.state() == SessionState::Closed
    }

    /// Send a chat message to the room.
    pub async fn send_message(&self, message: &str) -> Result<()> {
        if self.is_closed() {
            return Err(DanmakuError::send_rejected("session is closed"));
        }
        self.api.send_message(self.room_id, message).await
    }

    /// Cancel every session task and wait for them to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!("Session task failed: {}", e);
            }
        }
        self.state.send_replace(SessionState::Closed);
        info!(room_id = self.room_id, "Danmaku session stopped");
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start a session for `room_id` over the default collaborators.
pub async fn start(credentials: Credentials, room_id: u64) -> Result<SessionHandle> {
    Session::new(credentials, room_id)?.start().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::urls;
    use crate::event::{DanmakuEvent, EventKind};
    use crate::http::HttpResponse;
    use crate::testing::{
        MockConnector, MockHttp, MockServer, auth_reply, init_tracing, notification,
    };
    use bytes::Bytes;
    use flate2::{Compression, write::ZlibEncoder};
    use serde_json::Value;
    use std::io::Write;

    const ROOM: u64 = 1000;
    const COOKIE: &str = "SESSDATA=s; bili_jct=csrf; buvid3=BUVID-TEST";

    fn mock_http(hosts: &[&str]) -> Arc<MockHttp> {
        let http = Arc::new(MockHttp::default());
        http.respond_json(
            urls::NAV,
            json!({"code": 0, "data": {"mid": 42, "wbi_img": {
                "img_url": "https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png",
                "sub_url": "https://i0.hdslb.com/bfs/wbi/4932caff0ff746eab6f01bf08b70ac45.png"}}}),
        );
        http.respond_json(urls::ROOM_INIT, json!({"code": 0, "data": {"room_id": ROOM}}));
        let host_list: Vec<Value> = hosts
            .iter()
            .map(|h| json!({"host": h, "wss_port": 443}))
            .collect();
        http.respond_json(
            urls::DANMU_INFO,
            json!({"code": 0, "data": {"token": "tok", "host_list": host_list}}),
        );
        http.respond_json(urls::ROOM_INFO, json!({"code": 0, "data": {"uid": 7, "title": "t"}}));
        http.respond_json(
            urls::ONLINE_RANK,
            json!({"code": 0, "data": {"OnlineRankItem": []}}),
        );
        http.respond_json(
            urls::HISTORY,
            json!({"code": 0, "data": {"room": [
                {"nickname": "old1", "text": "earlier", "timeline": "2024-01-01 20:00:00"},
                {"nickname": "old2", "text": "later", "timeline": "2024-01-01 20:00:05"}
            ]}}),
        );
        http
    }

    fn session(http: Arc<MockHttp>, connector: Arc<MockConnector>) -> Session {
        Session::with_collaborators(http, connector, Credentials::parse(COOKIE), ROOM)
    }

    fn startup_stage(result: Result<SessionHandle>) -> SessionState {
        match result {
            Err(DanmakuError::Startup { stage, .. }) => stage,
            Err(other) => panic!("Unexpected error: {other:?}"),
            Ok(_) => panic!("Session started unexpectedly"),
        }
    }

    fn zlib_notifications(bodies: &[Value]) -> Bytes {
        let mut inner = Vec::new();
        for body in bodies {
            inner.extend_from_slice(&notification(body));
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&inner).unwrap();
        Packet::encode(ver::ZLIB, op::NOTIFICATION, 0, &encoder.finish().unwrap())
    }

    fn chat(author: &str, text: &str) -> Value {
        json!({"cmd": "DANMU_MSG", "info": [[], text, [1, author]]})
    }

    async fn next_event(handle: &mut SessionHandle) -> DanmakuEvent {
        match handle.next_event().await {
            Some(StreamItem::Event(event)) => event,
            other => panic!("Expected an event, got {other:?}"),
        }
    }

    async fn established(hosts: &[&str]) -> (SessionHandle, MockServer, Arc<MockHttp>) {
        let http = mock_http(hosts);
        let connector = Arc::new(MockConnector::accepting());
        let handle = session(http.clone(), connector.clone())
            .start()
            .await
            .unwrap();
        (handle, connector.take_server(), http)
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::ResolvingIdentity.to_string(), "resolving identity");
        assert_eq!(SessionState::default(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_identity_failure_aborts_startup() {
        let http = mock_http(&["a.example"]);
        http.respond(urls::NAV, HttpResponse::new(412, ""));
        let connector = Arc::new(MockConnector::accepting());
        let mut session = session(http, connector.clone());
        let state = session.subscribe();

        assert_eq!(startup_stage(session.start().await), SessionState::ResolvingIdentity);
        assert_eq!(*state.borrow(), SessionState::Closed);
        assert!(connector.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_room_init_failure_aborts_startup() {
        let http = mock_http(&["a.example"]);
        http.respond_json(urls::ROOM_INIT, json!({"code": 60004, "message": "no room"}));
        let connector = Arc::new(MockConnector::accepting());
        assert_eq!(
            startup_stage(session(http, connector).start().await),
            SessionState::ResolvingIdentity
        );
    }

    #[tokio::test]
    async fn test_token_failure_aborts_startup() {
        let http = mock_http(&["a.example"]);
        http.respond_json(urls::DANMU_INFO, json!({"code": -352, "message": "risk control"}));
        let connector = Arc::new(MockConnector::accepting());
        assert_eq!(
            startup_stage(session(http, connector).start().await),
            SessionState::ResolvingToken
        );
    }

    #[tokio::test]
    async fn test_empty_host_list_aborts_startup() {
        let http = mock_http(&[]);
        let connector = Arc::new(MockConnector::accepting());
        assert_eq!(
            startup_stage(session(http, connector.clone()).start().await),
            SessionState::ResolvingToken
        );
        assert!(connector.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_all_hosts_failing_aborts_startup() {
        let http = mock_http(&["a.example", "b.example"]);
        let connector = Arc::new(
            MockConnector::accepting()
                .refuse("a.example")
                .refuse("b.example"),
        );
        assert_eq!(
            startup_stage(session(http, connector.clone()).start().await),
            SessionState::Connecting
        );
        assert_eq!(
            connector.attempts(),
            vec![
                "wss://a.example:443/sub".to_string(),
                "wss://b.example:443/sub".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_host_failover() {
        init_tracing();
        let http = mock_http(&["a.example", "b.example", "c.example"]);
        let connector = Arc::new(MockConnector::accepting().refuse("a.example"));
        let handle = session(http, connector.clone()).start().await.unwrap();

        assert_eq!(connector.attempts().len(), 2);
        let server = connector.take_server();
        assert_eq!(server.url, "wss://b.example:443/sub");
        assert_eq!(
            server
                .headers
                .iter()
                .find(|(k, _)| k == "Referer")
                .map(|(_, v)| v.as_str()),
            Some("https://live.bilibili.com/1000")
        );
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_auth_rejections() {
        for reply in [
            auth_reply(r#"{"code":-101}"#),
            auth_reply(r#"{"msg":"ok"}"#),
            auth_reply("not json"),
            Packet::encode(ver::POPULARITY, op::HEARTBEAT_REPLY, 1, &[0, 0, 0, 1]),
        ] {
            let http = mock_http(&["a.example"]);
            let connector = Arc::new(MockConnector::default().greet(reply));
            assert_eq!(
                startup_stage(session(http, connector).start().await),
                SessionState::Authenticating
            );
        }
    }

    #[tokio::test]
    async fn test_closed_before_auth_reply() {
        let http = mock_http(&["a.example"]);
        let connector = Arc::new(MockConnector::default());
        let mut session = session(http, connector.clone());

        // the server hangs up without replying
        let start = tokio::spawn(async move { session.start().await });
        while connector.attempts().is_empty() {
            tokio::task::yield_now().await;
        }
        drop(connector.take_server());
        assert_eq!(startup_stage(start.await.unwrap()), SessionState::Authenticating);
    }

    #[tokio::test]
    async fn test_handshake_packet() {
        let (handle, mut server, _) = established(&["a.example"]).await;
        assert_eq!(handle.controller.state(), SessionState::Established);
        assert_eq!(handle.controller.room_id(), ROOM);

        let auth = server.try_received().unwrap();
        assert_eq!(auth.operation(), op::AUTH);
        assert_eq!(auth.version(), ver::POPULARITY);
        assert_eq!(auth.header.sequence, FIRST_SEQUENCE);

        let body: Value = serde_json::from_slice(&auth.body).unwrap();
        assert_eq!(body["uid"], 42);
        assert_eq!(body["roomid"], ROOM);
        assert_eq!(body["protover"], 2);
        assert_eq!(body["platform"], "web");
        assert_eq!(body["type"], 2);
        assert_eq!(body["key"], "tok");
        assert_eq!(body["buvid"], "BUVID-TEST");

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_short_room_id_is_resolved() {
        let http = mock_http(&["a.example"]);
        http.respond_json(urls::ROOM_INIT, json!({"code": 0, "data": {"room_id": 5555}}));
        let connector = Arc::new(MockConnector::accepting());
        let handle = session(http.clone(), connector.clone()).start().await.unwrap();

        assert_eq!(handle.controller.room_id(), 5555);
        let token_request = http.requests_to(urls::DANMU_INFO).remove(0);
        assert_eq!(token_request.param("id"), Some("5555"));
        let auth = connector.take_server().try_received().unwrap();
        let body: Value = serde_json::from_slice(&auth.body).unwrap();
        assert_eq!(body["roomid"], 5555);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_history_replayed_before_live_events() {
        let (mut handle, server, http) = established(&["a.example"]).await;
        server.push(notification(&chat("live", "now")));

        assert_eq!(next_event(&mut handle).await.author, "old1");
        assert_eq!(next_event(&mut handle).await.author, "old2");
        let live = next_event(&mut handle).await;
        assert_eq!((live.author.as_str(), live.content.as_str()), ("live", "now"));
        assert_eq!(http.requests_to(urls::HISTORY).len(), 1);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_history_can_be_disabled() {
        let http = mock_http(&["a.example"]);
        let connector = Arc::new(MockConnector::accepting());
        let config = SessionConfig {
            fetch_history: false,
            ..SessionConfig::default()
        };
        let mut handle = session(http.clone(), connector.clone())
            .with_config(config)
            .start()
            .await
            .unwrap();
        connector
            .take_server()
            .push(notification(&chat("live", "first")));

        assert_eq!(next_event(&mut handle).await.author, "live");
        assert!(http.requests_to(urls::HISTORY).is_empty());
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_unrecognized_commands_are_not_queued() {
        let http = mock_http(&["a.example"]);
        http.respond_json(urls::HISTORY, json!({"code": 0, "data": {"room": []}}));
        let connector = Arc::new(MockConnector::accepting());
        let mut handle = session(http, connector.clone()).start().await.unwrap();
        let server = connector.take_server();

        server.push(Packet::encode(ver::POPULARITY, op::HEARTBEAT_REPLY, 2, &[0, 0, 1, 0]));
        server.push(zlib_notifications(&[
            json!({"cmd": "WIDGET_BANNER", "data": {}}),
            chat("alice", "hello"),
            json!({"cmd": "STOP_LIVE_ROOM_LIST"}),
        ]));
        server.push(Bytes::from_static(b"\x00\x00\x00\x01garbage"));
        server.push(notification(&json!({"cmd": "SEND_GIFT", "data": {
            "uname": "bob", "action": "gives", "num": 2, "giftName": "Rose"}})));

        let first = next_event(&mut handle).await;
        assert_eq!(first.kind, EventKind::Chat);
        assert_eq!(first.author, "alice");
        let second = next_event(&mut handle).await;
        assert_eq!(second.kind, EventKind::Gift);
        assert_eq!(second.content, "gives 2 * Rose");

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_transport_failure_closes_session() {
        init_tracing();
        let http = mock_http(&["a.example"]);
        http.respond_json(urls::HISTORY, json!({"code": 0, "data": {"room": []}}));
        let connector = Arc::new(MockConnector::accepting());
        let handle = session(http, connector.clone()).start().await.unwrap();
        let server = connector.take_server();
        let (mut events, mut snapshots, controller) = handle.into_parts();
        let mut state = controller.subscribe();

        server.fail("connection reset");

        match events.recv().await {
            Some(StreamItem::Closed { reason }) => assert!(reason.contains("connection reset")),
            other => panic!("Expected Closed, got {other:?}"),
        }
        assert!(events.recv().await.is_none());

        state
            .wait_for(|s| *s == SessionState::Closed)
            .await
            .unwrap();
        assert!(controller.is_closed());

        // the poller observed the cancellation too
        while snapshots.recv().await.is_some() {}
        assert!(matches!(
            controller.send_message("hi").await,
            Err(DanmakuError::SendRejected(_))
        ));
        controller.stop().await;
    }

    #[tokio::test]
    async fn test_peer_close_ends_stream_with_closed_item() {
        let (mut handle, server, _) = established(&["a.example"]).await;
        next_event(&mut handle).await;
        next_event(&mut handle).await;
        drop(server);

        assert!(matches!(
            handle.next_event().await,
            Some(StreamItem::Closed { .. })
        ));
        assert!(handle.next_event().await.is_none());
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_terminates_all_tasks() {
        let (mut handle, mut server, _) = established(&["a.example"]).await;
        next_event(&mut handle).await;
        next_event(&mut handle).await;
        assert_eq!(handle.next_snapshot().await.unwrap().owner_id, 7);

        let (mut events, mut snapshots, controller) = handle.into_parts();
        controller.stop().await;

        server.push(notification(&chat("late", "ignored")));
        assert!(events.recv().await.is_none());
        assert!(snapshots.recv().await.is_none());

        // auth packet, then the heartbeat task closed the write half
        assert_eq!(server.try_received().map(|p| p.operation()), Some(op::AUTH));
        assert_eq!(server.received.next().await, None);
    }

    #[tokio::test]
    async fn test_dropped_event_receiver_cancels_session() {
        init_tracing();
        let (handle, mut server, _) = established(&["a.example"]).await;
        let (events, mut snapshots, controller) = handle.into_parts();
        let mut state = controller.subscribe();
        drop(events);

        server.push(notification(&chat("alice", "nobody listening")));
        state
            .wait_for(|s| *s == SessionState::Closed)
            .await
            .unwrap();
        assert!(controller.is_closed());

        // poller and heartbeat are gone too
        while snapshots.recv().await.is_some() {}
        assert_eq!(server.try_received().map(|p| p.operation()), Some(op::AUTH));
        assert_eq!(server.received.next().await, None);
        controller.stop().await;
    }

    #[tokio::test]
    async fn test_restart_reuses_identity_and_skips_history() {
        init_tracing();
        let http = mock_http(&["a.example"]);
        let connector = Arc::new(MockConnector::accepting());
        let mut session = session(http.clone(), connector.clone());

        let mut handle = session.start().await.unwrap();
        let _first = connector.take_server();
        assert_eq!(next_event(&mut handle).await.author, "old1");
        assert!(matches!(session.start().await, Err(DanmakuError::Other(_))));
        handle.stop().await;
        assert_eq!(session.state(), SessionState::Closed);

        let mut handle = session.start().await.unwrap();
        let server = connector.take_server();
        server.push(notification(&chat("bob", "live")));
        assert_eq!(next_event(&mut handle).await.author, "bob");

        assert_eq!(http.requests_to(urls::NAV).len(), 1);
        assert_eq!(http.requests_to(urls::ROOM_INIT).len(), 1);
        assert_eq!(http.requests_to(urls::HISTORY).len(), 1);
        assert_eq!(http.requests_to(urls::DANMU_INFO).len(), 2);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_send_message_uses_canonical_room() {
        let (handle, _server, http) = established(&["a.example"]).await;
        http.respond_json(urls::SEND_MSG, json!({"code": 0}));

        handle.send_message("hello").await.unwrap();
        let request = http.requests_to(urls::SEND_MSG).remove(0);
        assert_eq!(request.method, "POST");
        assert_eq!(request.param("roomid"), Some("1000"));
        assert_eq!(request.param("csrf"), Some("csrf"));
        handle.stop().await;
    }
}
