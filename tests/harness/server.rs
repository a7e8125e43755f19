//! WebSocket test server on a real TCP listener.
//!
//! Every accepted connection runs one scripted session; what the session
//! observed is reported back through [`TestServer::next_session`].

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use ws_bridge::connection::server_accept;
use ws_bridge::message::{CloseCode, CloseFrame, Message};
use ws_bridge::protocol::HandshakeRequest;
use ws_bridge::Config;

/// How a session treats its client.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Echo every data message.
    Echo,
    /// Record data messages without answering.
    Record,
    /// Send a close frame right after the handshake.
    CloseAfterHandshake(u16, &'static str),
    /// Read the upgrade request, wait, then answer 404.
    RejectAfter(Duration),
}

/// What one session observed.
#[derive(Debug, Default)]
pub struct Seen {
    pub request: Option<HandshakeRequest>,
    pub data: Vec<Message>,
    pub pings: usize,
    pub close: Option<Option<CloseFrame>>,
}

impl Seen {
    pub fn texts(&self) -> Vec<String> {
        self.data
            .iter()
            .filter_map(|m| match m {
                Message::Text(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn close_code(&self) -> Option<u16> {
        self.close.clone().flatten().map(|f| f.code.as_u16())
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.request
            .as_ref()
            .and_then(|r| r.header(name))
            .map(str::to_owned)
    }
}

/// Run one scripted session over an accepted stream.
pub async fn serve<S>(mut stream: S, behavior: Behavior) -> Seen
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut seen = Seen::default();
    if let Behavior::RejectAfter(delay) = behavior {
        let mut buf = vec![0u8; 4096];
        let _ = stream.read(&mut buf).await;
        tokio::time::sleep(delay).await;
        let _ = stream
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
            .await;
        return seen;
    }

    let Ok((mut conn, request)) = server_accept(stream, Config::server()).await else {
        return seen;
    };
    seen.request = Some(request);
    if let Behavior::CloseAfterHandshake(code, reason) = behavior {
        let _ = conn.close(CloseCode::from_u16(code), reason).await;
    }
    loop {
        match conn.recv().await {
            Ok(Some(Message::Ping(_))) => seen.pings += 1,
            Ok(Some(Message::Pong(_))) => {}
            Ok(Some(Message::Close(frame))) => {
                seen.close = Some(frame);
                break;
            }
            Ok(Some(message)) => {
                if matches!(behavior, Behavior::Echo) {
                    let _ = conn.send(message.clone()).await;
                }
                seen.data.push(message);
            }
            Ok(None) | Err(_) => break,
        }
    }
    seen
}

/// Listener plus the sessions it has finished.
pub struct TestServer {
    port: u16,
    sessions: mpsc::UnboundedReceiver<Seen>,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Bind an ephemeral port and serve every connection with `behavior`.
    pub async fn spawn(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, sessions) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(serve(stream, behavior).await);
                });
            }
        });
        Self {
            port,
            sessions,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `ws://127.0.0.1:<port><path>`
    pub fn url(&self, path: &str) -> String {
        format!("ws://127.0.0.1:{}{path}", self.port)
    }

    /// Wait for the next session to end.
    pub async fn next_session(&mut self) -> Seen {
        tokio::time::timeout(Duration::from_secs(10), self.sessions.recv())
            .await
            .expect("no session finished in time")
            .expect("server stopped")
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}
