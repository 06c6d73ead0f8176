use crate::handler::Handler;
use gw_mqtt::MqttTransport;
use gw_protocol::channel;
use parking_lot::RwLock;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Weak;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Registration {
    pattern: String,
    handler: Weak<dyn Handler>,
}

/// One router per transport side (platform or local). Holds the
/// `(pattern, weak handler)` table, matches inbound channels against it,
/// and drains dispatch jobs through a single-consumer command queue so
/// handlers run serially and never block the transport's receive thread.
pub struct Router {
    registrations: RwLock<Vec<Registration>>,
    sender: mpsc::UnboundedSender<Job>,
    worker: JoinHandle<()>,
}

impl Router {
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let worker = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                job.await;
            }
        });
        Router {
            registrations: RwLock::new(Vec::new()),
            sender,
            worker,
        }
    }

    /// Registers `handler` against every pattern it declares. The router
    /// keeps only a [`Weak`] reference — if every `Arc` to the handler is
    /// dropped elsewhere, dispatch silently skips it instead of keeping it
    /// alive.
    pub fn register(&self, handler: &Arc<dyn Handler>) {
        let mut registrations = self.registrations.write();
        for pattern in handler.patterns() {
            registrations.push(Registration {
                pattern,
                handler: Arc::downgrade(handler),
            });
        }
    }

    /// The union of every live handler's patterns, for `transport.subscribe`
    /// at connect time.
    pub fn subscribed_patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self
            .registrations
            .read()
            .iter()
            .filter(|r| r.handler.strong_count() > 0)
            .map(|r| r.pattern.clone())
            .collect();
        patterns.sort();
        patterns.dedup();
        patterns
    }

    pub async fn subscribe_all(&self, transport: &dyn MqttTransport) -> Result<(), gw_mqtt::MqttError> {
        for pattern in self.subscribed_patterns() {
            transport.subscribe(&pattern).await?;
        }
        Ok(())
    }

    /// Matches `channel` against the registration table and, on the first
    /// hit whose handler is still alive, enqueues the dispatch job. Binary
    /// payloads are routed identically but never logged.
    pub fn on_message(&self, incoming_channel: String, payload: Vec<u8>, is_binary: bool) {
        let matched = {
            let registrations = self.registrations.read();
            registrations
                .iter()
                .find(|r| channel::matches(&r.pattern, &incoming_channel))
                .and_then(|r| r.handler.upgrade())
        };

        let Some(handler) = matched else {
            if !is_binary {
                debug!(channel = %incoming_channel, "no handler pattern matched; dropping");
            }
            return;
        };

        let job: Job = Box::pin(async move {
            handler.on_message(&incoming_channel, &payload).await;
        });
        if self.sender.send(job).is_err() {
            debug!("router command queue is gone; dropping message");
        }
    }

    /// Drains any pending jobs then stops accepting new ones. Called during
    /// gateway shutdown.
    pub async fn shutdown(self) {
        drop(self.sender);
        let _ = self.worker.await;
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct CountingHandler {
        pattern: String,
        count: AtomicUsize,
    }

    #[async_trait]
    impl Handler for CountingHandler {
        fn patterns(&self) -> Vec<String> {
            vec![self.pattern.clone()]
        }

        async fn on_message(&self, _channel: &str, _payload: &[u8]) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn matching_message_is_dispatched_once() {
        let router = Router::new();
        let concrete = Arc::new(CountingHandler {
            pattern: "d2p/sensor_reading/g/+/d/+/r/+".to_string(),
            count: AtomicUsize::new(0),
        });
        let handler: Arc<dyn Handler> = concrete.clone();
        router.register(&handler);

        router.on_message(
            "d2p/sensor_reading/g/GW/d/DEV/r/temperature".to_string(),
            b"{}".to_vec(),
            false,
        );
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(concrete.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unmatched_channel_is_dropped_silently() {
        let router = Router::new();
        let concrete = Arc::new(CountingHandler {
            pattern: "d2p/sensor_reading/g/+/d/+/r/+".to_string(),
            count: AtomicUsize::new(0),
        });
        let handler: Arc<dyn Handler> = concrete.clone();
        router.register(&handler);

        router.on_message("pong/whatever".to_string(), Vec::new(), false);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(concrete.count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dead_handler_is_skipped() {
        let router = Router::new();
        {
            let handler: Arc<dyn Handler> = Arc::new(CountingHandler {
                pattern: "pong/#".to_string(),
                count: AtomicUsize::new(0),
            });
            router.register(&handler);
        }
        // handler dropped; its Weak ref is now dead.
        assert_eq!(router.subscribed_patterns().len(), 0);
        router.on_message("pong/1".to_string(), Vec::new(), false);
    }
}
