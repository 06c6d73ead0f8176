//! The generic retry-until-response helper: a single table of
//! `expected_response_channel -> (message, retries, deadline)` scanned by a
//! timer, shared by the registration, deletion and file-packet-request
//! paths instead of each reimplementing its own retry loop.

use gw_mqtt::Message;
use gw_publisher::Publisher;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use tracing::error;
use tracing::warn;

struct PendingRetry {
    message: Message,
    retries_left: u32,
    retry_timeout: Duration,
    deadline: Instant,
    on_give_up: Option<Box<dyn FnOnce() + Send>>,
}

/// Tracks in-flight requests awaiting a response on a given channel and
/// re-publishes them until either the response arrives ([`RetryTable::resolve`])
/// or the retry budget is exhausted (5s/3 retries for registration and
/// deletion, configurable per call for other families).
pub struct RetryTable {
    entries: Mutex<HashMap<String, PendingRetry>>,
    publisher: Arc<Publisher>,
    default_timeout: Duration,
    default_retries: u32,
}

impl RetryTable {
    pub fn new(publisher: Arc<Publisher>, default_timeout: Duration, default_retries: u32) -> Arc<Self> {
        let table = Arc::new(RetryTable {
            entries: Mutex::new(HashMap::new()),
            publisher,
            default_timeout,
            default_retries,
        });
        table.clone().spawn_scanner();
        table
    }

    fn spawn_scanner(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(200)).await;
                self.tick().await;
            }
        });
    }

    /// Tracks `message` under `response_channel` using the table's default
    /// timeout/retry budget.
    pub fn track(&self, response_channel: impl Into<String>, message: Message) {
        self.track_with(response_channel, message, self.default_retries, self.default_timeout, None);
    }

    pub fn track_with(
        &self,
        response_channel: impl Into<String>,
        message: Message,
        retries: u32,
        timeout: Duration,
        on_give_up: Option<Box<dyn FnOnce() + Send>>,
    ) {
        let response_channel = response_channel.into();
        self.entries.lock().insert(
            response_channel,
            PendingRetry {
                message,
                retries_left: retries,
                retry_timeout: timeout,
                deadline: Instant::now() + timeout,
                on_give_up,
            },
        );
    }

    /// Call when an expected response arrives. Returns `true` if a pending
    /// entry was found and erased; every inbound message consults the table
    /// and erases a matching entry before dispatching to its owner.
    pub fn resolve(&self, response_channel: &str) -> bool {
        self.entries.lock().remove(response_channel).is_some()
    }

    pub fn is_pending(&self, response_channel: &str) -> bool {
        self.entries.lock().contains_key(response_channel)
    }

    async fn tick(&self) {
        let now = Instant::now();
        let mut to_republish = Vec::new();
        let mut to_give_up = Vec::new();
        {
            let mut entries = self.entries.lock();
            let expired_keys: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .map(|(key, _)| key.clone())
                .collect();
            for key in expired_keys {
                let exhausted = entries.get(&key).map(|e| e.retries_left == 0).unwrap_or(false);
                if exhausted {
                    if let Some(entry) = entries.remove(&key) {
                        to_give_up.push((key, entry));
                    }
                } else if let Some(entry) = entries.get_mut(&key) {
                    entry.retries_left -= 1;
                    entry.deadline = now + entry.retry_timeout;
                    to_republish.push(entry.message.clone());
                }
            }
        }
        for message in to_republish {
            warn!(channel = %message.channel, "retrying unacknowledged request");
            self.publisher.add_message(message).await;
        }
        for (response_channel, entry) in to_give_up {
            error!(%response_channel, "retry budget exhausted; giving up");
            if let Some(on_give_up) = entry.on_give_up {
                on_give_up();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_persistence::Discipline;
    use gw_persistence::OutboundQueue;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;

    fn fake_publisher(dir: &tempfile::TempDir) -> Arc<Publisher> {
        let persistence = Arc::new(OutboundQueue::open(dir.path(), Discipline::Fifo, None).unwrap());
        Arc::new(Publisher::new(
            "test",
            Arc::new(NoopTransport),
            persistence,
            Duration::from_secs(30),
            Duration::from_millis(10),
        ))
    }

    struct NoopTransport;

    #[async_trait::async_trait]
    impl gw_mqtt::MqttTransport for NoopTransport {
        fn is_connected(&self) -> bool {
            false
        }
        async fn connect(&self) -> Result<(), gw_mqtt::MqttError> {
            Err(gw_mqtt::MqttError::NotConnected)
        }
        async fn disconnect(&self) {}
        async fn subscribe(&self, _pattern: &str) -> Result<(), gw_mqtt::MqttError> {
            Ok(())
        }
        async fn publish(&self, _message: &Message) -> Result<(), gw_mqtt::MqttError> {
            Err(gw_mqtt::MqttError::NotConnected)
        }
    }

    #[tokio::test]
    async fn resolve_erases_pending_entry() {
        let dir = tempdir().unwrap();
        let publisher = fake_publisher(&dir);
        let table = RetryTable::new(publisher, Duration::from_secs(5), 3);
        table.track("resp/1", Message::new("req/1", Vec::new()));
        assert!(table.is_pending("resp/1"));
        assert!(table.resolve("resp/1"));
        assert!(!table.is_pending("resp/1"));
        assert!(!table.resolve("resp/1"));
    }

    #[tokio::test]
    async fn exhausted_retries_invoke_give_up_callback() {
        let dir = tempdir().unwrap();
        let publisher = fake_publisher(&dir);
        let table = RetryTable::new(publisher, Duration::from_millis(10), 1);
        let gave_up = Arc::new(AtomicBool::new(false));
        let gave_up_clone = gave_up.clone();
        table.track_with(
            "resp/2",
            Message::new("req/2", Vec::new()),
            1,
            Duration::from_millis(10),
            Some(Box::new(move || gave_up_clone.store(true, Ordering::SeqCst))),
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(gave_up.load(Ordering::SeqCst));
        assert!(!table.is_pending("resp/2"));
    }
}
