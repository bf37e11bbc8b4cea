/// Push-channel connection manager.
///
/// Owns at most one WebSocket session for a (board, credential) target and
/// republishes decoded frames through the [`EventDispatcher`]. Unexpected
/// loss triggers a bounded number of fixed-delay reconnects; the attempt
/// counter resets whenever a session reaches OPEN.
///
/// Every spawned session carries the generation it was started under. A
/// session whose generation is no longer current has been superseded and
/// exits without touching shared state or emitting events.
use boardsync_core::event::{self, BoardEvent, PushEnvelope};
use boardsync_core::types::BoardId;
use boardsync_core::EventDispatcher;
use futures_util::{SinkExt, StreamExt};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::config::ReconnectConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub board_id: BoardId,
    pub credential: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

impl From<ReconnectConfig> for ReconnectPolicy {
    fn from(config: ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: config.delay(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Board id must be a positive integer, got {0}")]
    InvalidBoardId(BoardId),

    #[error("Credential must not be empty")]
    EmptyCredential,

    #[error("Push channel URL must start with ws:// or wss://, got {0}")]
    InvalidUrl(String),
}

struct SessionHandle {
    stop: watch::Sender<bool>,
    outbound: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

struct Shared {
    phase: ConnectionPhase,
    target: Option<ConnectionTarget>,
    attempts: u32,
    generation: u64,
    session: Option<SessionHandle>,
}

struct Inner {
    state: Mutex<Shared>,
    dispatcher: EventDispatcher,
    ws_base: String,
    policy: ReconnectPolicy,
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

enum SessionEnd {
    Stopped,
    Lost(Option<String>),
}

impl ConnectionManager {
    pub fn new(ws_base: &str, dispatcher: EventDispatcher, policy: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(Shared {
                    phase: ConnectionPhase::Idle,
                    target: None,
                    attempts: 0,
                    generation: 0,
                    session: None,
                }),
                dispatcher,
                ws_base: ws_base.trim_end_matches('/').to_string(),
                policy,
            }),
        }
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    /// Open the push channel for `board_id`. A no-op when a channel for the
    /// same target is already connecting or open. Must be called from within
    /// a Tokio runtime.
    pub fn connect(&self, board_id: BoardId, credential: &str) -> Result<(), ConnectionError> {
        if board_id <= 0 {
            return Err(ConnectionError::InvalidBoardId(board_id));
        }
        if credential.trim().is_empty() {
            return Err(ConnectionError::EmptyCredential);
        }
        let url = channel_url(&self.inner.ws_base, board_id, credential)?;
        let target = ConnectionTarget {
            board_id,
            credential: credential.to_string(),
        };

        let mut state = self.inner.lock();
        if state.target.as_ref() == Some(&target)
            && matches!(
                state.phase,
                ConnectionPhase::Connecting | ConnectionPhase::Open
            )
        {
            log::debug!("[connection] Already connected to board {}", board_id);
            return Ok(());
        }

        if let Some(old) = state.session.take() {
            log::info!("[connection] Replacing existing channel");
            let _ = old.stop.send(true);
        }

        state.generation += 1;
        state.attempts = 0;
        state.phase = ConnectionPhase::Connecting;
        state.target = Some(target);

        let (stop_tx, stop_rx) = watch::channel(false);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_session(
            self.inner.clone(),
            state.generation,
            board_id,
            url,
            stop_rx,
            out_rx,
        ));
        state.session = Some(SessionHandle {
            stop: stop_tx,
            outbound: out_tx,
            task,
        });
        log::info!("[connection] Connecting to board {}", board_id);
        Ok(())
    }

    /// Close the channel and cancel any pending reconnect. Idempotent.
    pub fn disconnect(&self) {
        if self.stop_session().is_some() {
            log::info!("[connection] Disconnect requested");
        }
    }

    /// Disconnect and wait for the session task to finish its close handshake.
    pub async fn shutdown(&self) {
        if let Some(task) = self.stop_session() {
            let _ = task.await;
        }
    }

    fn stop_session(&self) -> Option<JoinHandle<()>> {
        let mut state = self.inner.lock();
        state.target = None;
        let session = state.session.take()?;
        if matches!(
            state.phase,
            ConnectionPhase::Connecting | ConnectionPhase::Open
        ) {
            state.phase = ConnectionPhase::Closing;
        }
        let _ = session.stop.send(true);
        Some(session.task)
    }

    /// Queue `{type: event_name, data: payload}` for sending. Only succeeds
    /// while OPEN; otherwise the frame is dropped with a warning.
    pub fn send(&self, event_name: &str, payload: serde_json::Value) -> bool {
        let state = self.inner.lock();
        let outbound = match (&state.session, state.phase) {
            (Some(session), ConnectionPhase::Open) => session.outbound.clone(),
            _ => {
                log::warn!(
                    "[connection] Dropping outbound {}: channel is {:?}",
                    event_name,
                    state.phase
                );
                return false;
            }
        };
        drop(state);

        match PushEnvelope::outbound(event_name, payload).to_text() {
            Ok(text) => outbound.send(text).is_ok(),
            Err(e) => {
                log::warn!("[connection] Failed to encode {}: {}", event_name, e);
                false
            }
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.inner.lock().phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == ConnectionPhase::Open
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    pub fn target(&self) -> Option<ConnectionTarget> {
        self.inner.lock().target.clone()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mark_open(&self, generation: u64, board_id: BoardId) -> bool {
        {
            let mut state = self.lock();
            if state.generation != generation || state.phase != ConnectionPhase::Connecting {
                return false;
            }
            state.phase = ConnectionPhase::Open;
            state.attempts = 0;
        }
        log::info!("[connection] Channel open for board {}", board_id);
        self.dispatcher.emit(&BoardEvent::Connected { board_id });
        true
    }

    /// Record the end of a connection attempt or session. Returns the delay
    /// before the next attempt, or None when the session should exit.
    fn on_lost(
        &self,
        generation: u64,
        board_id: BoardId,
        reason: Option<String>,
        stopped: bool,
    ) -> Option<Duration> {
        let (retry, attempt) = {
            let mut state = self.lock();
            if state.generation != generation {
                return None;
            }
            let intentional = stopped || state.phase == ConnectionPhase::Closing;
            state.phase = ConnectionPhase::Closed;
            let retry = !intentional && state.attempts < self.policy.max_attempts;
            if retry {
                state.attempts += 1;
            }
            (retry, state.attempts)
        };

        self.dispatcher
            .emit(&BoardEvent::Disconnected { board_id, reason });

        if retry {
            log::info!(
                "[connection] Reconnecting to board {} in {:?} (attempt {}/{})",
                board_id,
                self.policy.delay,
                attempt,
                self.policy.max_attempts
            );
            Some(self.policy.delay)
        } else {
            if !stopped {
                log::warn!(
                    "[connection] Channel for board {} closed; not reconnecting",
                    board_id
                );
            }
            None
        }
    }

    fn begin_reconnect(&self, generation: u64) -> bool {
        let mut state = self.lock();
        if state.generation != generation
            || state.phase != ConnectionPhase::Closed
            || state.target.is_none()
        {
            return false;
        }
        state.phase = ConnectionPhase::Connecting;
        true
    }

    fn deliver(&self, text: &str) {
        match event::decode(text) {
            Ok(event) => {
                self.dispatcher.emit(&event);
            }
            Err(e) if e.is_unknown_type() => {
                log::debug!("[connection] Ignoring frame: {}", e);
            }
            Err(e) => {
                log::warn!("[connection] Dropping undecodable frame: {}", e);
            }
        }
    }
}

pub fn channel_url(ws_base: &str, board_id: BoardId, credential: &str) -> Result<String, ConnectionError> {
    let base = ws_base.trim_end_matches('/');
    if !(base.starts_with("ws://") || base.starts_with("wss://")) {
        return Err(ConnectionError::InvalidUrl(base.to_string()));
    }
    Ok(format!(
        "{}/ws/{}?token={}",
        base,
        board_id,
        utf8_percent_encode(credential, NON_ALPHANUMERIC)
    ))
}

async fn run_session(
    inner: Arc<Inner>,
    generation: u64,
    board_id: BoardId,
    url: String,
    mut stop_rx: watch::Receiver<bool>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
) {
    loop {
        let attempt = tokio::select! {
            res = tokio_tungstenite::connect_async(url.as_str()) => res,
            _ = stop_rx.changed() => {
                inner.on_lost(generation, board_id, None, true);
                return;
            }
        };

        let (reason, stopped) = match attempt {
            Ok((mut ws_stream, _)) => {
                if !inner.mark_open(generation, board_id) {
                    let _ = ws_stream.close(None).await;
                    inner.on_lost(generation, board_id, None, true);
                    return;
                }
                match pump(&inner, ws_stream, &mut stop_rx, &mut outbound_rx).await {
                    SessionEnd::Stopped => (Some("closed by client".to_string()), true),
                    SessionEnd::Lost(reason) => (reason, false),
                }
            }
            Err(e) => {
                log::warn!("[connection] Connect to board {} failed: {}", board_id, e);
                inner.dispatcher.emit(&BoardEvent::TransportError {
                    message: e.to_string(),
                });
                (Some(e.to_string()), false)
            }
        };

        let Some(delay) = inner.on_lost(generation, board_id, reason, stopped) else {
            return;
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop_rx.changed() => return,
        }

        if !inner.begin_reconnect(generation) {
            return;
        }
    }
}

async fn pump<S>(
    inner: &Inner,
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    stop_rx: &mut watch::Receiver<bool>,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
) -> SessionEnd
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                let _ = ws_tx.close().await;
                return SessionEnd::Stopped;
            }
            Some(text) = outbound_rx.recv() => {
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    log::warn!("[connection] Send failed: {}", e);
                    return SessionEnd::Lost(Some(e.to_string()));
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    None => return SessionEnd::Lost(None),
                    Some(Err(e)) => {
                        log::warn!("[connection] Read error: {}", e);
                        inner.dispatcher.emit(&BoardEvent::TransportError {
                            message: e.to_string(),
                        });
                        return SessionEnd::Lost(Some(e.to_string()));
                    }
                    Some(Ok(Message::Text(text))) => inner.deliver(&text),
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        log::info!("[connection] Server closed the channel");
                        return SessionEnd::Lost(frame.map(|f| f.reason.to_string()));
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_url_encodes_token() {
        let url = channel_url("ws://localhost:8000/", 3, "a b/c=").unwrap();
        assert_eq!(url, "ws://localhost:8000/ws/3?token=a%20b%2Fc%3D");
        assert!(matches!(
            channel_url("http://localhost", 3, "t"),
            Err(ConnectionError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_arguments() {
        let manager = ConnectionManager::new(
            "ws://127.0.0.1:9",
            EventDispatcher::new(),
            ReconnectPolicy::default(),
        );
        assert!(matches!(
            manager.connect(0, "tok"),
            Err(ConnectionError::InvalidBoardId(0))
        ));
        assert!(matches!(
            manager.connect(1, "  "),
            Err(ConnectionError::EmptyCredential)
        ));
        assert_eq!(manager.phase(), ConnectionPhase::Idle);
    }

    #[tokio::test]
    async fn test_send_while_idle_is_dropped() {
        let manager = ConnectionManager::new(
            "ws://127.0.0.1:9",
            EventDispatcher::new(),
            ReconnectPolicy::default(),
        );
        assert!(!manager.send("ping", serde_json::json!({})));
        manager.disconnect();
        manager.disconnect();
        assert_eq!(manager.phase(), ConnectionPhase::Idle);
    }

    #[test]
    fn test_policy_from_config() {
        let policy = ReconnectPolicy::from(ReconnectConfig {
            max_attempts: 2,
            delay_ms: 250,
        });
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.delay, Duration::from_millis(250));
    }
}
