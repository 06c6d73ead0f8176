//! Wires transports, routers, publishers and every lifecycle/firmware/file
//! service into one running process. Startup order follows the narrative
//! ordering as closely as Rust's ownership rules allow: [`Router`]
//! construction has no dependencies, so it happens right before the
//! transport whose callback closes over it, rather than strictly after a
//! component-by-component listing.

use crate::config::parse_mqtt_uri;
use crate::config::GatewayConfig;
use crate::data_relay::DataRelayLocalHandler;
use crate::data_relay::DataRelayPlatformHandler;
use crate::data_relay::PongPlatformHandler;
use crate::installer::ScriptFirmwareInstaller;
use anyhow::Context;
use anyhow::Result;
use gw_filetransfer::FileTransferLocalHandler;
use gw_filetransfer::FileTransferPlatformHandler;
use gw_filetransfer::FileTransferService;
use gw_filetransfer::ReqwestDownloader;
use gw_filetransfer::UrlDownloader;
use gw_firmware::FirmwareInstaller;
use gw_firmware::FirmwareLocalHandler;
use gw_firmware::FirmwarePlatformHandler;
use gw_firmware::FirmwareService;
use gw_lifecycle::DeletionPlatformHandler;
use gw_lifecycle::DeletionService;
use gw_lifecycle::RegistrationLocalHandler;
use gw_lifecycle::RegistrationPlatformHandler;
use gw_lifecycle::RegistrationService;
use gw_lifecycle::ReregistrationPlatformHandler;
use gw_lifecycle::ReregistrationService;
use gw_lifecycle::RetryTable;
use gw_lifecycle::StatusLocalHandler;
use gw_lifecycle::StatusPlatformHandler;
use gw_lifecycle::StatusService;
use gw_mqtt::Credentials;
use gw_mqtt::Message;
use gw_mqtt::MqttTransport;
use gw_mqtt::Transport;
use gw_mqtt::TransportConfig;
use gw_persistence::DeviceRepository;
use gw_persistence::Discipline;
use gw_persistence::ExistingDeviceList;
use gw_persistence::FileRepository;
use gw_persistence::FilesystemFileRepository;
use gw_persistence::OutboundQueue;
use gw_protocol::codec::data;
use gw_protocol::codec::file;
use gw_protocol::codec::registration::DeviceDescriptor;
use gw_protocol::codec::registration::RegistrationRequest;
use gw_protocol::model::DeviceKey;
use gw_protocol::model::Reading;
use gw_publisher::Publisher;
use gw_router::Handler;
use gw_router::Router;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const REGISTRATION_RETRY_TIMEOUT: Duration = Duration::from_secs(5);
const REGISTRATION_RETRY_COUNT: u32 = 3;

/// Everything the gateway facade wires together: two transports, two
/// routers, two publishers, and every service from components F-I
/// registered against both. Owns nothing not needed elsewhere; each field
/// is a handle a caller (or a test) might reasonably want back.
pub struct Gateway {
    gateway_key: DeviceKey,
    config: GatewayConfig,
    platform_transport: Arc<Transport>,
    local_transport: Option<Arc<Transport>>,
    platform_router: Arc<Router>,
    local_router: Option<Arc<Router>>,
    platform_publisher: Arc<Publisher>,
    device_publisher: Option<Arc<Publisher>>,
    registration: Arc<RegistrationService>,
    deletion: Arc<DeletionService>,
    status: Arc<StatusService>,
    firmware: Arc<FirmwareService>,
    // The router keeps only weak references to handlers; this is their
    // sole strong owner for the gateway's lifetime.
    _handlers: Vec<Arc<dyn Handler>>,
}

fn is_binary_channel(channel: &str) -> bool {
    channel == file::upload_chunk_channel()
}

impl Gateway {
    /// Builds every component but does not yet open either broker
    /// connection; call [`Gateway::connect`] for that.
    pub async fn build(config: GatewayConfig) -> Result<Arc<Gateway>> {
        let gateway_key = DeviceKey::new(config.key.clone()).context("gateway key must be non-empty")?;

        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating data directory '{}'", config.data_dir.display()))?;
        std::fs::create_dir_all(config.file_repository_dir())
            .with_context(|| "creating file repository directory")?;

        // --- persistence ---
        let platform_queue = Arc::new(
            OutboundQueue::open(config.outbound_queue_dir("platform"), Discipline::Fifo, None)
                .context("opening platform outbound queue")?,
        );
        let device_repository =
            Arc::new(DeviceRepository::open(config.device_repository_dir()).context("opening device repository")?);
        let file_repository: Arc<dyn FileRepository> = Arc::new(
            FilesystemFileRepository::open(config.file_repository_dir()).context("opening file repository")?,
        );
        let existing_devices = Arc::new(
            ExistingDeviceList::open(config.existing_devices_path()).context("opening existing-device list")?,
        );

        // --- routers (no dependencies; built ahead of the transports whose
        // callbacks close over them) ---
        let platform_router = Arc::new(Router::new());
        let standalone = config.local_mqtt_uri.is_none();
        let local_router = if standalone { None } else { Some(Arc::new(Router::new())) };

        // --- transports ---
        let platform_uri = parse_mqtt_uri(&config.platform_mqtt_uri).context("parsing platformMqttUri")?;
        let platform_transport_config =
            TransportConfig::new(platform_uri.host, platform_uri.port, config.key.clone())
                .with_keep_alive(Duration::from_secs(config.platform_mqtt_keep_alive_seconds as u64));
        let mut platform_transport = Transport::new(
            platform_transport_config,
            Credentials {
                username: Some(config.key.clone()),
                password: Some(config.password.clone()),
            },
        );
        if let Some(trust_store) = &config.platform_trust_store {
            platform_transport = platform_transport.with_trust_store(trust_store.clone());
        }
        let platform_transport = Arc::new(platform_transport);
        platform_transport
            .set_last_will(Message::new(format!("lastwill/{}", config.key), Vec::new()))
            .await;

        {
            let router = platform_router.clone();
            platform_transport
                .on_message(move |message| {
                    let is_binary = is_binary_channel(&message.channel);
                    router.on_message(message.channel, message.payload, is_binary);
                })
                .await;
        }

        let local_transport = if let Some(local_uri) = &config.local_mqtt_uri {
            let uri = parse_mqtt_uri(local_uri).context("parsing localMqttUri")?;
            let client_id = format!("{}-local", config.key);
            let transport_config = TransportConfig::new(uri.host, uri.port, client_id);
            let transport = Transport::new(transport_config, Credentials::default());
            let transport = Arc::new(transport);

            let router = local_router.clone().expect("local router built when local broker configured");
            {
                let router = router.clone();
                transport
                    .on_message(move |message| {
                        let is_binary = is_binary_channel(&message.channel);
                        router.on_message(message.channel, message.payload, is_binary);
                    })
                    .await;
            }
            Some(transport)
        } else {
            None
        };

        // --- publishers ---
        let platform_publisher = Arc::new(Publisher::new(
            "platform",
            platform_transport.clone() as Arc<dyn MqttTransport>,
            platform_queue,
            config.publish_interval,
            config.reconnect_delay,
        ));
        let device_publisher = if let Some(local_transport) = &local_transport {
            let device_queue = Arc::new(
                OutboundQueue::open(config.outbound_queue_dir("device"), Discipline::Fifo, None)
                    .context("opening device outbound queue")?,
            );
            Some(Arc::new(Publisher::new(
                "device",
                local_transport.clone() as Arc<dyn MqttTransport>,
                device_queue,
                config.publish_interval,
                config.reconnect_delay,
            )))
        } else {
            None
        };

        {
            let publisher = platform_publisher.clone();
            platform_transport
                .on_connection_lost(move || {
                    publisher.flush();
                })
                .await;
        }

        // --- retry table + services ---
        let retry = RetryTable::new(platform_publisher.clone(), REGISTRATION_RETRY_TIMEOUT, REGISTRATION_RETRY_COUNT);

        let registration = RegistrationService::new(
            gateway_key.clone(),
            config.manifest.clone(),
            device_repository.clone(),
            existing_devices.clone(),
            retry.clone(),
            platform_publisher.clone(),
            device_publisher.clone(),
        );
        let deletion = DeletionService::new(
            gateway_key.clone(),
            device_repository.clone(),
            retry.clone(),
            platform_publisher.clone(),
        );
        let reregistration = ReregistrationService::new(
            gateway_key.clone(),
            device_repository.clone(),
            platform_publisher.clone(),
            device_publisher.clone(),
        );
        let status = StatusService::new(
            gateway_key.clone(),
            device_repository.clone(),
            platform_publisher.clone(),
            device_publisher.clone(),
            config.status_poll_interval,
        );

        if let (Some(local_transport), Some(device_publisher)) = (&local_transport, &device_publisher) {
            let publisher = device_publisher.clone();
            let status = status.clone();
            local_transport
                .on_connection_lost(move || {
                    publisher.flush();
                    let status = status.clone();
                    tokio::spawn(async move { status.handle_local_connection_lost().await });
                })
                .await;
        }

        let firmware_installer: Option<Arc<dyn FirmwareInstaller>> = config
            .firmware_installer_script
            .as_ref()
            .map(|script| Arc::new(ScriptFirmwareInstaller::new(script.clone())) as Arc<dyn FirmwareInstaller>);
        let firmware = FirmwareService::new(
            gateway_key.clone(),
            config.firmware_version.clone(),
            firmware_installer,
            config.download_dir(),
            config.firmware_version_file(),
            platform_publisher.clone(),
            device_publisher.clone(),
        );

        let url_downloader: Option<Arc<dyn UrlDownloader>> = if config.enable_url_download {
            Some(Arc::new(ReqwestDownloader::new(config.download_dir())))
        } else {
            None
        };
        let file_transfer = device_publisher.clone().map(|device_publisher| {
            FileTransferService::new(
                file_repository.clone(),
                platform_publisher.clone(),
                device_publisher,
                retry.clone(),
                url_downloader,
                config.download_dir(),
                config.max_file_size,
                config.max_packet_size,
            )
        });

        // --- register every handler's subscription patterns ---
        let registration_platform: Arc<dyn Handler> = Arc::new(RegistrationPlatformHandler(registration.clone()));
        let deletion_platform: Arc<dyn Handler> = Arc::new(DeletionPlatformHandler(deletion.clone()));
        let reregistration_platform: Arc<dyn Handler> = Arc::new(ReregistrationPlatformHandler(reregistration.clone()));
        let status_platform: Arc<dyn Handler> = Arc::new(StatusPlatformHandler(status.clone()));
        let firmware_platform: Arc<dyn Handler> = Arc::new(FirmwarePlatformHandler(firmware.clone()));
        let pong_platform: Arc<dyn Handler> = Arc::new(PongPlatformHandler);
        let data_relay_platform: Arc<dyn Handler> = Arc::new(DataRelayPlatformHandler {
            gateway_key: gateway_key.clone(),
            device_publisher: device_publisher.clone(),
        });

        platform_router.register(&registration_platform);
        platform_router.register(&deletion_platform);
        platform_router.register(&reregistration_platform);
        platform_router.register(&status_platform);
        platform_router.register(&firmware_platform);
        platform_router.register(&pong_platform);
        platform_router.register(&data_relay_platform);

        let mut held_handlers: Vec<Arc<dyn Handler>> = vec![
            registration_platform,
            deletion_platform,
            reregistration_platform,
            status_platform,
            firmware_platform,
            pong_platform,
            data_relay_platform,
        ];

        if let (Some(local_router), Some(file_transfer)) = (&local_router, &file_transfer) {
            let file_platform: Arc<dyn Handler> = Arc::new(FileTransferPlatformHandler(file_transfer.clone()));
            platform_router.register(&file_platform);
            held_handlers.push(file_platform);

            let file_local: Arc<dyn Handler> = Arc::new(FileTransferLocalHandler(file_transfer.clone()));
            local_router.register(&file_local);
            held_handlers.push(file_local);
        }

        if let Some(local_router) = &local_router {
            let registration_local: Arc<dyn Handler> = Arc::new(RegistrationLocalHandler(registration.clone()));
            let status_local: Arc<dyn Handler> = Arc::new(StatusLocalHandler(status.clone()));
            let firmware_local: Arc<dyn Handler> = Arc::new(FirmwareLocalHandler(firmware.clone()));
            let data_relay_local: Arc<dyn Handler> = Arc::new(DataRelayLocalHandler {
                gateway_key: gateway_key.clone(),
                platform_publisher: platform_publisher.clone(),
            });
            local_router.register(&registration_local);
            local_router.register(&status_local);
            local_router.register(&firmware_local);
            local_router.register(&data_relay_local);
            held_handlers.push(registration_local);
            held_handlers.push(status_local);
            held_handlers.push(firmware_local);
            held_handlers.push(data_relay_local);
        }

        let gateway = Arc::new(Gateway {
            gateway_key,
            config,
            platform_transport,
            local_transport,
            platform_router,
            local_router,
            platform_publisher,
            device_publisher,
            registration,
            deletion,
            status,
            firmware,
            _handlers: held_handlers,
        });
        Ok(gateway)
    }

    /// Starts both publishing pipelines, connects the local broker (if
    /// configured) then the platform broker, subscribing every handler's
    /// patterns on each, and finally submits the gateway's own registration
    /// request; the gateway registers itself as a device like any other.
    pub async fn connect(&self) -> Result<()> {
        self.platform_publisher.start().await;
        if let Some(device_publisher) = &self.device_publisher {
            device_publisher.start().await;
        }

        if let (Some(local_transport), Some(local_router)) = (&self.local_transport, &self.local_router) {
            local_transport.connect().await.context("connecting to local broker")?;
            local_router
                .subscribe_all(local_transport.as_ref())
                .await
                .context("subscribing local broker patterns")?;
            self.status.poll_all().await;
            info!("local broker connected");
        }

        self.platform_transport.connect().await.context("connecting to platform broker")?;
        self.platform_router
            .subscribe_all(self.platform_transport.as_ref())
            .await
            .context("subscribing platform broker patterns")?;
        info!("platform broker connected");

        self.registration
            .register(RegistrationRequest {
                device: DeviceDescriptor {
                    name: self.config.name.clone(),
                    key: self.config.key.clone(),
                },
                manifest: self.config.manifest.clone(),
            })
            .await;

        if !self.config.firmware_version.is_empty() {
            self.firmware.report_firmware_update_result(&self.config.firmware_version).await;
            self.firmware.publish_firmware_version().await;
        }

        self.status.spawn_periodic();

        Ok(())
    }

    /// Reverses [`Gateway::connect`]: stops both publishers (which
    /// disconnects their transports in turn).
    pub async fn disconnect(&self) {
        if let Some(device_publisher) = &self.device_publisher {
            device_publisher.disconnect().await;
        }
        self.platform_publisher.disconnect().await;
    }

    /// Publishes one telemetry reading for `device` directly to the
    /// platform, bypassing MQTT ingress entirely (for readings the gateway
    /// process itself produces rather than relaying from a subdevice).
    pub async fn submit_reading(&self, device: &DeviceKey, reading: Reading) {
        let message = data::encode_reading(&self.gateway_key, device, &reading);
        self.platform_publisher.add_message(message).await;
    }

    /// Local `register(device)` call: used for subdevices that never speak
    /// MQTT to the gateway directly.
    pub async fn register_device(&self, key: &str, name: &str, manifest: serde_json::Value) {
        self.registration
            .register(RegistrationRequest {
                device: DeviceDescriptor {
                    name: name.to_string(),
                    key: key.to_string(),
                },
                manifest,
            })
            .await;
    }

    pub async fn delete_devices_other_than(&self, keep_keys: &[String]) {
        self.deletion.delete_devices_other_than(keep_keys).await;
    }

    pub fn gateway_key(&self) -> &DeviceKey {
        &self.gateway_key
    }
}
