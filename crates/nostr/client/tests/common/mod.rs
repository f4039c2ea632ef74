//! In-process mock relay for pool integration tests.
//!
//! The mock accepts any number of WebSocket clients, records every text frame
//! they send, and can push frames to (or drop) every connected client.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use nostr::Event;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep};
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

#[derive(Debug, Clone)]
enum Command {
    Send(String),
    Drop,
}

pub struct MockRelay {
    url: String,
    received: Arc<Mutex<Vec<String>>>,
    accepted: Arc<AtomicUsize>,
    commands: broadcast::Sender<Command>,
    task: JoinHandle<()>,
}

impl MockRelay {
    pub async fn start() -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        let (commands, _) = broadcast::channel(64);

        let task = {
            let received = Arc::clone(&received);
            let accepted = Arc::clone(&accepted);
            let commands = commands.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let mut cmd_rx = commands.subscribe();
                    let received = Arc::clone(&received);
                    let accepted = Arc::clone(&accepted);
                    tokio::spawn(async move {
                        let Ok(ws) = accept_async(stream).await else {
                            return;
                        };
                        accepted.fetch_add(1, Ordering::SeqCst);
                        let (mut write, mut read) = ws.split();
                        loop {
                            tokio::select! {
                                msg = read.next() => match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        received.lock().push(text.as_str().to_string());
                                    }
                                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                    Some(Ok(_)) => {}
                                },
                                cmd = cmd_rx.recv() => match cmd {
                                    Ok(Command::Send(frame)) => {
                                        if write.send(Message::Text(frame.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    // Drop the socket without a close handshake.
                                    Ok(Command::Drop) | Err(_) => break,
                                },
                            }
                        }
                    });
                }
            })
        };

        Self {
            url: format!("ws://{}", addr),
            received,
            accepted,
            commands,
            task,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Every text frame received so far, across all clients.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    /// Received frames whose tag is `tag` (e.g. `"REQ"`).
    pub fn received_tagged(&self, tag: &str) -> Vec<String> {
        let prefix = format!("[\"{}\"", tag);
        self.received()
            .into_iter()
            .filter(|frame| frame.starts_with(&prefix))
            .collect()
    }

    /// Number of completed WebSocket handshakes.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Push a raw frame to every connected client.
    pub fn send(&self, frame: impl Into<String>) {
        let _ = self.commands.send(Command::Send(frame.into()));
    }

    pub fn send_event(&self, subscription_id: &str, event: &Event) {
        self.send(serde_json::json!(["EVENT", subscription_id, event]).to_string());
    }

    /// Drop every connected client without a close frame.
    pub fn drop_connections(&self) {
        let _ = self.commands.send(Command::Drop);
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.task.abort();
        let _ = self.commands.send(Command::Drop);
    }
}

/// Poll `condition` until it holds or `WAIT` elapses.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Give in-flight frames a moment to land before asserting on absence.
pub async fn settle() {
    sleep(Duration::from_millis(200)).await;
}

/// A relay that refuses connections.
pub async fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}", addr)
}

pub fn text_note(id: &str) -> Event {
    Event {
        id: id.to_string(),
        pubkey: "a".repeat(64),
        created_at: 1_700_000_000,
        kind: 1,
        tags: vec![],
        content: format!("note {}", id),
        sig: "0".repeat(128),
    }
}
