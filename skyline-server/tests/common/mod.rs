//! Shared test utilities for skyline-server integration tests

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::SplitStream;
use skyline_server::ws::ServerMessage;
use skyline_server::{AppState, ServerConfig, SkylineServer};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A running server and the handles tests need
#[allow(dead_code)]
pub struct TestServer {
    pub state: Arc<AppState>,
    pub addr: SocketAddr,
    pub shutdown: CancellationToken,
}

/// Creates a test server over in-memory storage
pub async fn create_test_server() -> TestServer {
    let state = Arc::new(AppState::new_for_testing().await.unwrap());
    let server = SkylineServer::with_state(ServerConfig::default(), Arc::clone(&state));
    let shutdown = server.shutdown_token();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run_with_listener(listener).await;
    });

    // Brief delay to ensure server is accepting connections
    tokio::time::sleep(Duration::from_millis(10)).await;

    TestServer {
        state,
        addr,
        shutdown,
    }
}

/// Read half of a stream connection
pub struct StreamClient {
    stream: SplitStream<WsStream>,
}

#[allow(dead_code)]
impl StreamClient {
    /// Connect to a WebSocket path such as `/ws/alarms`
    pub async fn connect(addr: SocketAddr, path: &str) -> Self {
        let url = format!("ws://{}{}", addr, path);
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("Failed to connect");
        let (_sink, stream) = ws.split();
        Self { stream }
    }

    /// Next protocol message, or None if the server closed the stream
    pub async fn next_message(&mut self) -> Option<ServerMessage> {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), self.stream.next())
                .await
                .expect("Timed out waiting for a frame");
            match msg {
                Some(Ok(Message::Text(text))) => {
                    return Some(serde_json::from_str(&text).expect("Failed to parse JSON"));
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
                Some(Ok(_)) => continue,
            }
        }
    }

    /// Next message, which must be a count
    pub async fn expect_count(&mut self) -> u64 {
        match self.next_message().await {
            Some(ServerMessage::UnackNumber(count)) => count,
            other => panic!("expected UnackNumber, got {other:?}"),
        }
    }

    /// Next message, which must be a record; returns its id
    pub async fn expect_record(&mut self) -> u64 {
        match self.next_message().await {
            Some(ServerMessage::UnackAlarm(record)) => record.id,
            other => panic!("expected UnackAlarm, got {other:?}"),
        }
    }
}
