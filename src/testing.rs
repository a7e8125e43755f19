//! In-memory peers for resource tests.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::close_code::CloseCode;
use crate::config::Config;
use crate::connection::server_accept;
use crate::error::{Error, ResourceError, Result};
use crate::message::{self, CloseFrame, Message};
use crate::protocol::HandshakeRequest;
use crate::resource::WebSocketResource;
use crate::transport::Connector;
use crate::url::Url;

const WAIT: Duration = Duration::from_secs(5);

/// What the fake server does once a client arrives.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ServerScript {
    /// Echo data messages back.
    Echo,
    /// Record data messages without answering.
    Record,
    /// Send a close frame right after the handshake.
    CloseImmediately(u16, &'static str),
    /// Complete the handshake, then drop the stream.
    DropAfterHandshake,
    /// Answer the upgrade with 404.
    Reject,
    /// Wait, then answer the upgrade with 404.
    RejectAfter(Duration),
}

/// What the fake server observed.
#[derive(Debug, Default)]
pub(crate) struct Seen {
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

async fn reject(mut stream: DuplexStream, delay: Duration) -> Seen {
    let mut buf = vec![0u8; 4096];
    let _ = stream.read(&mut buf).await;
    tokio::time::sleep(delay).await;
    let _ = stream
        .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
        .await;
    Seen::default()
}

async fn serve(stream: DuplexStream, script: ServerScript) -> Seen {
    match script {
        ServerScript::Reject => return reject(stream, Duration::ZERO).await,
        ServerScript::RejectAfter(delay) => return reject(stream, delay).await,
        _ => {}
    }
    let mut seen = Seen::default();
    let Ok((mut conn, request)) = server_accept(stream, Config::server()).await else {
        return seen;
    };
    seen.request = Some(request);
    match script {
        ServerScript::DropAfterHandshake => return seen,
        ServerScript::CloseImmediately(code, reason) => {
            let _ = conn.close(message::CloseCode::from_u16(code), reason).await;
        }
        _ => {}
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
                if matches!(script, ServerScript::Echo) {
                    let _ = conn.send(message.clone()).await;
                }
                seen.data.push(message);
            }
            Ok(None) | Err(_) => break,
        }
    }
    seen
}

/// Connector handing the server end of each pipe to a fake server task.
pub(crate) struct DuplexConnector {
    streams: mpsc::UnboundedSender<DuplexStream>,
    resolvable: bool,
}

impl Connector for DuplexConnector {
    type Stream = DuplexStream;

    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        if !self.resolvable {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such host: {host}"),
            ));
        }
        Ok(vec![SocketAddr::from(([127, 0, 0, 1], port))])
    }

    async fn connect(&self, _url: &Url, _addrs: &[SocketAddr]) -> Result<DuplexStream> {
        let (client, server) = duplex(64 * 1024);
        self.streams
            .send(server)
            .map_err(|_| Error::Io("fake server is gone".into()))?;
        Ok(client)
    }
}

/// Handle on a running fake server.
pub(crate) struct FakeServer {
    task: JoinHandle<Seen>,
}

impl FakeServer {
    /// Wait for the server to see the connection end.
    pub async fn finish(self) -> Seen {
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("fake server did not finish")
            .expect("fake server panicked")
    }
}

/// A connector plus the server that will answer its first connection.
pub(crate) fn duplex_connector(script: ServerScript) -> (Arc<DuplexConnector>, FakeServer) {
    let (streams, mut incoming) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        match incoming.recv().await {
            Some(stream) => serve(stream, script).await,
            None => Seen::default(),
        }
    });
    let connector = DuplexConnector {
        streams,
        resolvable: true,
    };
    (Arc::new(connector), FakeServer { task })
}

/// A connector whose name lookups always fail.
pub(crate) fn unresolvable_connector() -> Arc<DuplexConnector> {
    let (streams, _) = mpsc::unbounded_channel();
    Arc::new(DuplexConnector {
        streams,
        resolvable: false,
    })
}

/// Records every callback a resource makes as a short string.
#[derive(Clone, Default)]
pub(crate) struct Events {
    log: Arc<Mutex<Vec<String>>>,
}

impl Events {
    pub fn attach(resource: &dyn WebSocketResource) -> Self {
        let events = Self::default();
        let log = events.log.clone();
        resource.set_on_connect(Arc::new(move || log.lock().push("connect".into())));
        let log = events.log.clone();
        resource.set_on_ping(Arc::new(move || log.lock().push("ping".into())));
        let log = events.log.clone();
        resource.set_on_send(Arc::new(move |n: usize| {
            log.lock().push(format!("send:{n}"));
        }));
        let log = events.log.clone();
        resource.set_on_message(Arc::new(move |len: usize, payload: String, binary: bool| {
            log.lock().push(format!("message:{len}:{payload}:{binary}"));
        }));
        let log = events.log.clone();
        resource.set_on_close(Arc::new(move |code: CloseCode, reason: String| {
            log.lock().push(format!("close:{code:?}:{reason}"));
        }));
        let log = events.log.clone();
        resource.set_on_error(Arc::new(move |e: ResourceError| {
            log.lock().push(format!("error:{}:{}", e.kind, e.message));
        }));
        events
    }

    pub fn all(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn all_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.all_with_prefix(prefix).len()
    }

    pub fn contains_prefix(&self, prefix: &str) -> bool {
        self.count_prefix(prefix) > 0
    }

    /// Poll until an event starting with `prefix` has been recorded.
    pub async fn wait_for(&self, prefix: &str) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while !self.contains_prefix(prefix) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {prefix:?}; saw {:?}",
                self.all()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Give in-flight callbacks time to land.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
