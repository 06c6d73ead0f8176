//! The registration service.

use crate::retry::RetryTable;
use async_trait::async_trait;
use gw_persistence::DeviceRepository;
use gw_persistence::ExistingDeviceList;
use gw_protocol::codec::registration;
use gw_protocol::codec::registration::RegistrationRequest;
use gw_protocol::codec::registration::RegistrationResponse;
use gw_protocol::codec::registration::RegistrationResult;
use gw_protocol::model::Device;
use gw_protocol::model::DeviceKey;
use gw_protocol::model::Feed;
use gw_publisher::Publisher;
use gw_router::Handler;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use tracing::info;
use tracing::warn;

const RETRY_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_COUNT: u32 = 3;

#[derive(Deserialize, Default)]
struct Manifest {
    #[serde(default)]
    template_reference: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    feeds: Vec<Feed>,
    #[serde(default)]
    attributes: Vec<String>,
    #[serde(default)]
    parameters: Vec<String>,
}

fn build_device(request: &RegistrationRequest) -> Device {
    let manifest: Manifest = serde_json::from_value(request.manifest.clone()).unwrap_or_default();
    Device {
        key: request.device.key.clone(),
        name: request.device.name.clone(),
        template_reference: manifest.template_reference,
        password: manifest.password,
        feeds: manifest.feeds,
        attributes: manifest.attributes,
        parameters: manifest.parameters,
    }
}

/// Notified once a device (gateway or subdevice) completes registration,
/// so other services (status, file transfer) can react.
pub type DeviceRegisteredCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// Registration protocol: forward to the platform with retry, postpone
/// non-gateway requests until the gateway itself is registered, and fan the
/// platform's response back down to the originating subdevice.
pub struct RegistrationService {
    gateway_key: DeviceKey,
    gateway_manifest: serde_json::Value,
    repository: Arc<DeviceRepository>,
    existing_devices: Arc<ExistingDeviceList>,
    retry: Arc<RetryTable>,
    platform_publisher: Arc<Publisher>,
    device_publisher: Option<Arc<Publisher>>,
    pending: Mutex<HashMap<String, RegistrationRequest>>,
    postponed: Mutex<VecDeque<(String, RegistrationRequest)>>,
    gateway_registered: AtomicBool,
    on_registered: Mutex<Option<DeviceRegisteredCallback>>,
}

impl RegistrationService {
    pub fn new(
        gateway_key: DeviceKey,
        gateway_manifest: serde_json::Value,
        repository: Arc<DeviceRepository>,
        existing_devices: Arc<ExistingDeviceList>,
        retry: Arc<RetryTable>,
        platform_publisher: Arc<Publisher>,
        device_publisher: Option<Arc<Publisher>>,
    ) -> Arc<Self> {
        let gateway_registered = AtomicBool::new(repository.contains_key(gateway_key.as_str()));
        Arc::new(RegistrationService {
            gateway_key,
            gateway_manifest,
            repository,
            existing_devices,
            retry,
            platform_publisher,
            device_publisher,
            pending: Mutex::new(HashMap::new()),
            postponed: Mutex::new(VecDeque::new()),
            gateway_registered,
            on_registered: Mutex::new(None),
        })
    }

    pub fn set_on_registered(&self, callback: DeviceRegisteredCallback) {
        *self.on_registered.lock() = Some(callback);
    }

    fn response_channel(&self, device: Option<&DeviceKey>) -> String {
        match device {
            Some(device) => format!(
                "p2d/register_subdevice_response/g/{}/d/{device}",
                self.gateway_key
            ),
            None => format!("p2d/register_subdevice_response/g/{}", self.gateway_key),
        }
    }

    /// Entry point for both a local `register(device)` call and an inbound
    /// `register_subdevice_request` relayed from a subdevice.
    pub async fn register(&self, request: RegistrationRequest) {
        let key = request.device.key.clone();
        let is_gateway = key == self.gateway_key.as_str();

        if !is_gateway && !self.gateway_registered.load(Ordering::SeqCst) {
            info!(%key, "gateway not yet registered; postponing subdevice registration");
            self.postponed.lock().push_back((key, request));
            return;
        }

        // A manifest byte-equal to what's already on file is a duplicate
        // request; comparing the device the manifest would build (rather
        // than raw JSON bytes) tolerates key reordering in the wire payload
        // without changing the outcome.
        if let Some(existing) = self.repository.find_by_key(&key) {
            if build_device(&request) == existing {
                info!(%key, "registration request identical to stored device; dropping");
                return;
            }
        }

        if !is_gateway && request.manifest != self.gateway_manifest {
            warn!(%key, "registration manifest conflicts with the gateway's protocol manifest; rejecting locally");
            let response = RegistrationResponse {
                result: RegistrationResult::ErrorManifestConflict,
            };
            if let Some(device_publisher) = &self.device_publisher {
                let device = DeviceKey::new(key).expect("non-empty device key");
                device_publisher
                    .add_message(registration::encode_register_response_to_device(&device, response))
                    .await;
            }
            return;
        }

        let device = if is_gateway { None } else { DeviceKey::new(key.clone()) };
        let message = registration::encode_register_request(&self.gateway_key, device.as_ref(), &request);
        let response_channel = self.response_channel(device.as_ref());

        self.pending.lock().insert(key.clone(), request);
        self.retry.track_with(
            response_channel,
            message.clone(),
            RETRY_COUNT,
            RETRY_TIMEOUT,
            None,
        );
        self.platform_publisher.add_message(message).await;
    }

    /// Inbound `p2d/register_subdevice_response/g/<gw>/#` from the
    /// platform.
    pub async fn handle_platform_response(&self, channel: &str, payload: &[u8]) {
        self.retry.resolve(channel);

        let Some(key) = gw_protocol::channel::extract_device_key(channel) else {
            warn!(%channel, "registration response carries no device key");
            return;
        };
        let is_gateway = key.as_str() == self.gateway_key.as_str();

        let response = match registration::decode_register_response(payload) {
            Ok(response) => response,
            Err(err) => {
                warn!(%channel, %err, "malformed registration response; dropping");
                return;
            }
        };

        let request = self.pending.lock().remove(key.as_str());

        match response.result {
            RegistrationResult::Ok => {
                if let Some(request) = &request {
                    let device = build_device(request);
                    if let Err(err) = self.repository.save(device) {
                        error!(%key, %err, "failed to persist registered device");
                    }
                    if let Err(err) = self.existing_devices.add(key.as_str()) {
                        error!(%key, %err, "failed to persist existing-device entry");
                    }
                }
                if let Some(callback) = self.on_registered.lock().as_ref() {
                    callback(key.as_str(), is_gateway);
                }
                if is_gateway {
                    self.gateway_registered.store(true, Ordering::SeqCst);
                    self.drain_postponed().await;
                }
            }
            error_result => {
                error!(%key, result = ?error_result, "registration rejected by platform");
            }
        }

        if !is_gateway {
            if let Some(device_publisher) = &self.device_publisher {
                device_publisher
                    .add_message(registration::encode_register_response_to_device(&key, response))
                    .await;
            }
        }
    }

    async fn drain_postponed(&self) {
        let drained: Vec<(String, RegistrationRequest)> = self.postponed.lock().drain(..).collect();
        for (_, request) in drained {
            Box::pin(self.register(request)).await;
        }
    }
}

pub struct RegistrationLocalHandler(pub Arc<RegistrationService>);

#[async_trait]
impl Handler for RegistrationLocalHandler {
    fn patterns(&self) -> Vec<String> {
        vec!["d2p/register_subdevice_request/#".to_string()]
    }

    async fn on_message(&self, channel: &str, payload: &[u8]) {
        match registration::decode_register_request(payload) {
            Ok(request) => self.0.register(request).await,
            Err(err) => tracing::debug!(%channel, %err, "malformed registration request; dropping"),
        }
    }
}

pub struct RegistrationPlatformHandler(pub Arc<RegistrationService>);

#[async_trait]
impl Handler for RegistrationPlatformHandler {
    fn patterns(&self) -> Vec<String> {
        vec![format!(
            "p2d/register_subdevice_response/g/{}/#",
            self.0.gateway_key
        )]
    }

    async fn on_message(&self, channel: &str, payload: &[u8]) {
        self.0.handle_platform_response(channel, payload).await;
    }
}
