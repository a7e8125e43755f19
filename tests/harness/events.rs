//! Callback recording for resource tests.
//!
//! Each callback is logged as a short string (`connect`, `send:5`,
//! `close:Normal:bye`, ...) so tests can assert on order and content.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ws_bridge::{CloseCode, ResourceError, WebSocketResource};

const WAIT: Duration = Duration::from_secs(10);

#[derive(Clone, Default)]
pub struct EventLog {
    log: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn attach(resource: &dyn WebSocketResource) -> Self {
        let events = Self::default();
        let log = events.log.clone();
        resource.set_on_connect(Arc::new(move || log.lock().unwrap().push("connect".into())));
        let log = events.log.clone();
        resource.set_on_ping(Arc::new(move || log.lock().unwrap().push("ping".into())));
        let log = events.log.clone();
        resource.set_on_send(Arc::new(move |n: usize| {
            log.lock().unwrap().push(format!("send:{n}"));
        }));
        let log = events.log.clone();
        resource.set_on_message(Arc::new(move |len: usize, payload: String, binary: bool| {
            log.lock()
                .unwrap()
                .push(format!("message:{len}:{payload}:{binary}"));
        }));
        let log = events.log.clone();
        resource.set_on_close(Arc::new(move |code: CloseCode, reason: String| {
            log.lock().unwrap().push(format!("close:{code:?}:{reason}"));
        }));
        let log = events.log.clone();
        resource.set_on_error(Arc::new(move |e: ResourceError| {
            log.lock()
                .unwrap()
                .push(format!("error:{}:{}", e.kind, e.message));
        }));
        events
    }

    pub fn all(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.with_prefix(prefix).len()
    }

    pub fn contains(&self, prefix: &str) -> bool {
        self.count(prefix) > 0
    }

    /// Poll until `n` events starting with `prefix` have been recorded.
    pub async fn wait_for_n(&self, prefix: &str, n: usize) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while self.count(prefix) < n {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {n} x {prefix:?}; saw {:?}",
                self.all()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn wait_for(&self, prefix: &str) {
        self.wait_for_n(prefix, 1).await;
    }

    /// Give in-flight callbacks time to land.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }
}
