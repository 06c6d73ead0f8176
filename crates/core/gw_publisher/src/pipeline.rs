use gw_mqtt::Message;
use gw_mqtt::MqttTransport;
use gw_persistence::OutboundQueue;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// One publisher per direction. Owns one worker task that
/// reconnects, drains persisted messages in persistence order, then sleeps
/// until `publish_interval` elapses or [`Publisher::flush`] wakes it.
/// Platform and local publishers are fully independent: an outage on one
/// side never stalls the other.
pub struct Publisher {
    transport: Arc<dyn MqttTransport>,
    persistence: Arc<OutboundQueue>,
    publish_interval: Duration,
    reconnect_delay: Duration,
    notify: Arc<Notify>,
    shutdown: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    label: &'static str,
}

impl Publisher {
    pub fn new(
        label: &'static str,
        transport: Arc<dyn MqttTransport>,
        persistence: Arc<OutboundQueue>,
        publish_interval: Duration,
        reconnect_delay: Duration,
    ) -> Self {
        Publisher {
            transport,
            persistence,
            publish_interval,
            reconnect_delay,
            notify: Arc::new(Notify::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            label,
        }
    }

    /// Spawns the worker loop. Idempotent: calling `start` while already
    /// started is a no-op.
    pub async fn start(&self) {
        let mut guard = self.worker.lock().await;
        if guard.is_some() {
            return;
        }
        let transport = self.transport.clone();
        let persistence = self.persistence.clone();
        let notify = self.notify.clone();
        let shutdown = self.shutdown.clone();
        let publish_interval = self.publish_interval;
        let reconnect_delay = self.reconnect_delay;
        let label = self.label;

        *guard = Some(tokio::spawn(async move {
            Self::run(transport, persistence, notify, shutdown, publish_interval, reconnect_delay, label).await;
        }));
    }

    async fn run(
        transport: Arc<dyn MqttTransport>,
        persistence: Arc<OutboundQueue>,
        notify: Arc<Notify>,
        shutdown: Arc<AtomicBool>,
        publish_interval: Duration,
        reconnect_delay: Duration,
        label: &'static str,
    ) {
        while !shutdown.load(Ordering::SeqCst) {
            if !transport.is_connected() {
                if let Err(err) = transport.connect().await {
                    debug!(%label, %err, "reconnect attempt failed; retrying after backoff");
                    tokio::time::sleep(reconnect_delay).await;
                    continue;
                }
                info!(%label, "publisher reconnected");
            }

            while !persistence.empty() {
                let Some(message) = persistence.front() else { break };
                match transport.publish(&message).await {
                    Ok(()) => {
                        persistence.pop();
                    }
                    Err(err) => {
                        warn!(%label, channel = %message.channel, %err, "publish failed; will retry after reconnect");
                        break;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(publish_interval) => {}
                _ = notify.notified() => {}
            }
        }
    }

    /// Publishes `message` directly when connected and nothing is queued
    /// ahead of it; otherwise persists it for the worker to drain.
    pub async fn add_message(&self, message: Message) {
        if self.transport.is_connected() && self.persistence.empty() {
            if let Err(err) = self.transport.publish(&message).await {
                debug!(%err, channel = %message.channel, "direct publish failed; persisting");
                self.persistence.push(&message);
                self.notify.notify_one();
            }
        } else {
            self.persistence.push(&message);
            self.notify.notify_one();
        }
    }

    /// Wakes the worker immediately instead of waiting for `publish_interval`.
    pub fn flush(&self) {
        self.notify.notify_one();
    }

    /// Stops the worker loop and joins it, then disconnects the transport.
    pub async fn disconnect(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_one();
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
        self.transport.disconnect().await;
    }
}
