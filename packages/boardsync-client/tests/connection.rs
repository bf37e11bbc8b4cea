use boardsync_client::{ConnectionManager, ConnectionPhase, ReconnectPolicy};
use boardsync_core::event::{BoardEvent, EventKind};
use boardsync_core::EventDispatcher;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

const FAST: ReconnectPolicy = ReconnectPolicy {
    max_attempts: 5,
    delay: Duration::from_millis(10),
};

struct TestServer {
    ws_base: String,
    paths: Arc<Mutex<Vec<String>>>,
    accepts: Arc<AtomicUsize>,
    inbound: mpsc::UnboundedReceiver<String>,
}

/// Loopback push server. Every connection receives `script`; the first
/// `close_first` connections are then closed by the server, later ones stay
/// open and forward client text frames to `inbound`.
async fn spawn_server(script: Vec<String>, close_first: usize) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let paths = Arc::new(Mutex::new(Vec::new()));
    let accepts = Arc::new(AtomicUsize::new(0));
    let (in_tx, in_rx) = mpsc::unbounded_channel();

    let paths_srv = paths.clone();
    let accepts_srv = accepts.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let n = accepts_srv.fetch_add(1, Ordering::SeqCst);
            let paths = paths_srv.clone();
            let script = script.clone();
            let in_tx = in_tx.clone();
            tokio::spawn(async move {
                let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    paths.lock().unwrap().push(req.uri().to_string());
                    Ok(resp)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                    return;
                };
                for frame in script {
                    if ws.send(Message::Text(frame)).await.is_err() {
                        return;
                    }
                }
                if n < close_first {
                    let _ = ws.close(None).await;
                    return;
                }
                while let Some(Ok(msg)) = ws.next().await {
                    match msg {
                        Message::Text(text) => {
                            let _ = in_tx.send(text);
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
            });
        }
    });

    TestServer {
        ws_base: format!("ws://{}", addr),
        paths,
        accepts,
        inbound: in_rx,
    }
}

/// Listener that accepts TCP connections and drops them before any handshake.
async fn spawn_refusing_server() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(AtomicUsize::new(0));
    let counter = accepts.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });
    (format!("ws://{}", addr), accepts)
}

fn recorder(dispatcher: &EventDispatcher) -> Arc<Mutex<Vec<BoardEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    for kind in EventKind::ALL {
        let events = events.clone();
        dispatcher.on(kind, move |event| events.lock().unwrap().push(event.clone()));
    }
    events
}

fn count(events: &Arc<Mutex<Vec<BoardEvent>>>, kind: EventKind) -> usize {
    events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.kind() == kind)
        .count()
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_frames_are_decoded_and_bad_ones_dropped() {
    let script = vec![
        "{ not json".to_string(),
        r#"{"type":"pong"}"#.to_string(),
        r#"{"type":"task_created","board_id":3,"data":{"id":5,"title":"x","column_id":1,"position":0,"created_by":"ann"}}"#.to_string(),
    ];
    let server = spawn_server(script, 0).await;
    let dispatcher = EventDispatcher::new();
    let events = recorder(&dispatcher);
    let manager = ConnectionManager::new(&server.ws_base, dispatcher, FAST);

    manager.connect(3, "s3cret token").unwrap();
    wait_for(|| count(&events, EventKind::TaskCreated) == 1).await;

    assert!(manager.is_connected());
    assert_eq!(count(&events, EventKind::Connected), 1);
    assert_eq!(
        server.paths.lock().unwrap().as_slice(),
        ["/ws/3?token=s3cret%20token"]
    );
    let created = events
        .lock()
        .unwrap()
        .iter()
        .find(|e| e.kind() == EventKind::TaskCreated)
        .cloned()
        .unwrap();
    assert_eq!(created.board_id(), Some(3));
    manager.shutdown().await;
}

#[tokio::test]
async fn test_send_only_while_open() {
    let mut server = spawn_server(Vec::new(), 0).await;
    let dispatcher = EventDispatcher::new();
    let manager = ConnectionManager::new(&server.ws_base, dispatcher, FAST);

    assert!(!manager.send("cursor_move", serde_json::json!({"x": 1})));
    manager.connect(1, "tok").unwrap();
    wait_for(|| manager.is_connected()).await;

    assert!(manager.send("cursor_move", serde_json::json!({"x": 1})));
    let text = tokio::time::timeout(Duration::from_secs(3), server.inbound.recv())
        .await
        .unwrap()
        .unwrap();
    let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(frame["type"], "cursor_move");
    assert_eq!(frame["data"]["x"], 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_connect_is_idempotent_for_same_target() {
    let server = spawn_server(Vec::new(), 0).await;
    let manager = ConnectionManager::new(&server.ws_base, EventDispatcher::new(), FAST);

    manager.connect(1, "tok").unwrap();
    manager.connect(1, "tok").unwrap();
    wait_for(|| manager.is_connected()).await;
    manager.connect(1, "tok").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(server.accepts.load(Ordering::SeqCst), 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_switching_target_replaces_channel() {
    let server = spawn_server(Vec::new(), 0).await;
    let dispatcher = EventDispatcher::new();
    let events = recorder(&dispatcher);
    let manager = ConnectionManager::new(&server.ws_base, dispatcher, FAST);

    manager.connect(1, "tok").unwrap();
    wait_for(|| manager.is_connected()).await;
    manager.connect(2, "tok").unwrap();
    wait_for(|| count(&events, EventKind::Connected) == 2).await;

    assert_eq!(manager.target().unwrap().board_id, 2);
    assert_eq!(server.accepts.load(Ordering::SeqCst), 2);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.accepts.load(Ordering::SeqCst), 2);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_unexpected_close_reconnects_and_resets_attempts() {
    let server = spawn_server(Vec::new(), 1).await;
    let dispatcher = EventDispatcher::new();
    let events = recorder(&dispatcher);
    let manager = ConnectionManager::new(&server.ws_base, dispatcher, FAST);

    manager.connect(4, "tok").unwrap();
    wait_for(|| count(&events, EventKind::Connected) == 2).await;

    assert_eq!(count(&events, EventKind::Disconnected), 1);
    assert_eq!(manager.reconnect_attempts(), 0);
    assert_eq!(manager.phase(), ConnectionPhase::Open);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_gives_up_after_five_failed_reconnects() {
    let (ws_base, accepts) = spawn_refusing_server().await;
    let dispatcher = EventDispatcher::new();
    let events = recorder(&dispatcher);
    let manager = ConnectionManager::new(&ws_base, dispatcher, FAST);

    manager.connect(1, "tok").unwrap();
    wait_for(|| count(&events, EventKind::Disconnected) == 6).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(accepts.load(Ordering::SeqCst), 6);
    assert_eq!(count(&events, EventKind::Disconnected), 6);
    assert_eq!(manager.reconnect_attempts(), 5);
    assert_eq!(manager.phase(), ConnectionPhase::Closed);
    assert_eq!(count(&events, EventKind::Connected), 0);
}

#[tokio::test]
async fn test_disconnect_stops_reconnecting() {
    let server = spawn_server(Vec::new(), 0).await;
    let dispatcher = EventDispatcher::new();
    let events = recorder(&dispatcher);
    let manager = ConnectionManager::new(&server.ws_base, dispatcher, FAST);

    manager.connect(1, "tok").unwrap();
    wait_for(|| manager.is_connected()).await;
    manager.disconnect();
    assert!(manager.target().is_none());
    wait_for(|| manager.phase() == ConnectionPhase::Closed).await;
    manager.disconnect();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.accepts.load(Ordering::SeqCst), 1);
    assert_eq!(count(&events, EventKind::Disconnected), 1);
    assert!(!manager.send("ping", serde_json::json!({})));
}
