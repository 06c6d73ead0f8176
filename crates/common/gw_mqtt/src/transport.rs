use crate::channel::Message;
use crate::error::MqttError;
use rumqttc::AsyncClient;
use rumqttc::Event;
use rumqttc::MqttOptions;
use rumqttc::Packet;
use rumqttc::QoS;
use rumqttc::TlsConfiguration;
use rumqttc::Transport as RumqttcTransport;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Broker credentials. Either field may be absent for an anonymous local
/// broker; the platform side always sets both (`key`/`password`).
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Everything needed to open one broker connection.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Bound applied to `connect`/`publish`/`subscribe`; target is 2s.
    pub action_timeout: Duration,
}

impl TransportConfig {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        TransportConfig {
            host: host.into(),
            port,
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(60),
            action_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;
type ConnectionLostCallback = Arc<dyn Fn() + Send + Sync>;

/// A connection to one MQTT broker, with `connect`/`publish`/`subscribe`
/// calls bounded by [`TransportConfig::action_timeout`] and message delivery
/// via a callback installed before `connect` — the sole contract the rest of
/// the gateway depends on.
///
/// Two independent instances are constructed by the gateway facade: one for
/// the platform broker (TLS), one for the local broker (plaintext or TLS).
pub struct Transport {
    config: TransportConfig,
    credentials: Credentials,
    trust_store_path: Option<PathBuf>,
    client: Mutex<Option<AsyncClient>>,
    connected: Arc<AtomicBool>,
    on_message: Mutex<Option<MessageCallback>>,
    on_connection_lost: Mutex<Option<ConnectionLostCallback>>,
    last_will: Mutex<Option<Message>>,
    receiver_task: Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    pub fn new(config: TransportConfig, credentials: Credentials) -> Self {
        Transport {
            config,
            credentials,
            trust_store_path: None,
            client: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            on_message: Mutex::new(None),
            on_connection_lost: Mutex::new(None),
            last_will: Mutex::new(None),
            receiver_task: Mutex::new(None),
        }
    }

    pub fn with_trust_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.trust_store_path = Some(path.into());
        self
    }

    /// Installs the callback invoked for every inbound message. Must be
    /// called before [`Transport::connect`]; the router is the only caller.
    pub async fn on_message(&self, callback: impl Fn(Message) + Send + Sync + 'static) {
        *self.on_message.lock().await = Some(Arc::new(callback));
    }

    /// Installs the callback invoked once the broker connection is observed
    /// to be lost. The publishing pipeline uses this to trigger its
    /// reconnect loop.
    pub async fn on_connection_lost(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.on_connection_lost.lock().await = Some(Arc::new(callback));
    }

    pub async fn set_last_will(&self, message: Message) {
        *self.last_will.lock().await = Some(message);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Opens the connection and spawns the receive loop. Bounded by
    /// `action_timeout` (target: 2s) for the initial handshake; the receive
    /// loop itself keeps running for the connection's lifetime.
    pub async fn connect(&self) -> Result<(), MqttError> {
        let mut options = MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(self.config.keep_alive);

        if let Some(username) = &self.credentials.username {
            options.set_credentials(username, self.credentials.password.clone().unwrap_or_default());
        }

        if let Some(trust_store) = &self.trust_store_path {
            let ca = std::fs::read(trust_store).map_err(|source| MqttError::TrustStore {
                path: trust_store.display().to_string(),
                source,
            })?;
            options.set_transport(RumqttcTransport::Tls(TlsConfiguration::SimpleNative {
                ca,
                client_auth: None,
            }));
        }

        if let Some(will) = self.last_will.lock().await.clone() {
            options.set_last_will(rumqttc::LastWill::new(
                will.channel,
                will.payload,
                QoS::AtLeastOnce,
                false,
            ));
        }

        let (client, mut event_loop) = AsyncClient::new(options, 64);

        let connect_result = tokio::time::timeout(self.config.action_timeout, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => continue,
                    Err(err) => return Err(MqttError::Connection(err)),
                }
            }
        })
        .await;

        match connect_result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(MqttError::ConnectTimeout {
                    host: self.config.host.clone(),
                    port: self.config.port,
                })
            }
        }

        info!(host = %self.config.host, port = self.config.port, "MQTT connection established");
        self.connected.store(true, Ordering::SeqCst);

        let on_message = self.on_message.lock().await.clone();
        let on_connection_lost = self.on_connection_lost.lock().await.clone();
        let connected = self.connected.clone();
        let task = tokio::spawn(Self::receive_loop(
            event_loop,
            on_message,
            on_connection_lost,
            connected,
        ));
        *self.receiver_task.lock().await = Some(task);
        *self.client.lock().await = Some(client);
        Ok(())
    }

    async fn receive_loop(
        mut event_loop: rumqttc::EventLoop,
        on_message: Option<MessageCallback>,
        on_connection_lost: Option<ConnectionLostCallback>,
        connected: Arc<AtomicBool>,
    ) {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let Some(callback) = &on_message {
                        let message = Message::new(publish.topic, publish.payload.to_vec());
                        callback(message);
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) | Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                    info!("MQTT connection closed");
                    break;
                }
                Ok(_) => continue,
                Err(err) => {
                    warn!("MQTT connection error: {err}");
                    break;
                }
            }
        }
        connected.store(false, Ordering::SeqCst);
        if let Some(callback) = &on_connection_lost {
            callback();
        }
    }

    pub async fn disconnect(&self) {
        if let Some(client) = self.client.lock().await.take() {
            let _ = client.disconnect().await;
        }
        if let Some(task) = self.receiver_task.lock().await.take() {
            task.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Subscribes to a channel pattern. Blocks (bounded by `action_timeout`)
    /// until the broker accepts the subscribe request.
    pub async fn subscribe(&self, pattern: &str) -> Result<(), MqttError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(MqttError::NotConnected)?;
        tokio::time::timeout(self.config.action_timeout, client.subscribe(pattern, QoS::AtLeastOnce))
            .await
            .map_err(|_| MqttError::SubscribeTimeout {
                pattern: pattern.to_string(),
            })?
            .map_err(MqttError::Client)?;
        debug!(pattern, "subscribed");
        Ok(())
    }

    /// Publishes a message. Returns only once the broker has acknowledged
    /// the handoff (QoS 1), giving an at-least-once delivery contract.
    pub async fn publish(&self, message: &Message) -> Result<(), MqttError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(MqttError::NotConnected)?;
        let bytes = message.payload.len();
        tokio::time::timeout(
            self.config.action_timeout,
            client.publish(&message.channel, QoS::AtLeastOnce, false, message.payload.clone()),
        )
        .await
        .map_err(|_| MqttError::PublishTimeout {
            channel: message.channel.clone(),
            bytes,
        })?
        .map_err(MqttError::Client)?;
        Ok(())
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("connected", &self.is_connected())
            .finish()
    }
}
