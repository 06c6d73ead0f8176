//! The gateway's single JSON configuration document.

use serde::Deserialize;
use std::path::Path;
use std::path::PathBuf;
use thiserror::Error;

fn default_keep_alive() -> u16 {
    60
}

fn default_data_dir() -> String {
    "./gateway-data".to_string()
}

fn default_max_file_size() -> u64 {
    gw_filetransfer::DEFAULT_MAX_FILE_SIZE
}

fn default_max_packet_size() -> u32 {
    gw_filetransfer::DEFAULT_MAX_PACKET_SIZE
}

fn default_status_poll_interval_seconds() -> u64 {
    60
}

fn default_publish_interval_seconds() -> u64 {
    5
}

fn default_reconnect_delay_seconds() -> u64 {
    2
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    key: Option<String>,
    password: Option<String>,
    #[serde(rename = "platformMqttUri")]
    platform_mqtt_uri: Option<String>,
    #[serde(rename = "localMqttUri")]
    local_mqtt_uri: Option<String>,
    #[serde(rename = "platformTrustStore")]
    platform_trust_store: Option<String>,
    #[serde(rename = "platformMqttKeepAliveSeconds", default = "default_keep_alive")]
    platform_mqtt_keep_alive_seconds: u16,
    /// Anchors every on-disk path the ambient stack needs (outbound queues,
    /// device repository, file repository, existing-device list, firmware
    /// sentinel, download directory).
    #[serde(rename = "dataDir", default = "default_data_dir")]
    data_dir: String,
    #[serde(rename = "firmwareVersion", default)]
    firmware_version: String,
    #[serde(rename = "firmwareInstallerScript", default)]
    firmware_installer_script: Option<String>,
    #[serde(rename = "maxFileSize", default = "default_max_file_size")]
    max_file_size: u64,
    #[serde(rename = "maxPacketSize", default = "default_max_packet_size")]
    max_packet_size: u32,
    #[serde(rename = "enableUrlDownload", default = "default_true")]
    enable_url_download: bool,
    #[serde(rename = "statusPollIntervalSeconds", default = "default_status_poll_interval_seconds")]
    status_poll_interval_seconds: u64,
    #[serde(rename = "publishIntervalSeconds", default = "default_publish_interval_seconds")]
    publish_interval_seconds: u64,
    #[serde(rename = "reconnectDelaySeconds", default = "default_reconnect_delay_seconds")]
    reconnect_delay_seconds: u64,
    /// The gateway's own display name and protocol manifest, registered to
    /// the platform as a regular device at connect time (just another key
    /// in the repository) and compared against every subdevice's manifest
    /// to detect a protocol conflict.
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    manifest: serde_json::Value,
}

/// The required connection fields, each validated present (save the two
/// explicitly optional ones), plus the ambient operational fields the
/// startup/persistence layer needs.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub key: String,
    pub password: String,
    pub platform_mqtt_uri: String,
    pub local_mqtt_uri: Option<String>,
    pub platform_trust_store: Option<PathBuf>,
    pub platform_mqtt_keep_alive_seconds: u16,
    pub data_dir: PathBuf,
    pub firmware_version: String,
    pub firmware_installer_script: Option<PathBuf>,
    pub max_file_size: u64,
    pub max_packet_size: u32,
    pub enable_url_download: bool,
    pub status_poll_interval: std::time::Duration,
    pub publish_interval: std::time::Duration,
    pub reconnect_delay: std::time::Duration,
    pub name: String,
    pub manifest: serde_json::Value,
}

impl GatewayConfig {
    pub fn outbound_queue_dir(&self, label: &str) -> PathBuf {
        self.data_dir.join("outbound").join(label)
    }

    pub fn device_repository_dir(&self) -> PathBuf {
        self.data_dir.join("devices")
    }

    pub fn file_repository_dir(&self) -> PathBuf {
        self.data_dir.join("files")
    }

    pub fn existing_devices_path(&self) -> PathBuf {
        self.data_dir.join("existingDevices.json")
    }

    pub fn firmware_version_file(&self) -> PathBuf {
        self.data_dir.join("FIRMWARE_VERSION_FILE")
    }

    pub fn download_dir(&self) -> PathBuf {
        self.file_repository_dir()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read configuration file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration file '{path}' is not valid JSON: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("configuration is missing required field '{0}'")]
    MissingField(&'static str),
}

/// Loads and validates the gateway's configuration document. A missing
/// file, unreadable file, or missing required field is fatal; `localMqttUri`
/// is optional, and its absence means the gateway runs standalone rather
/// than being treated as an error.
pub fn load_gateway_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let raw: RawConfig = serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    let key = raw.key.ok_or(ConfigError::MissingField("key"))?;
    let name = raw.name.unwrap_or_else(|| key.clone());

    Ok(GatewayConfig {
        key,
        password: raw.password.ok_or(ConfigError::MissingField("password"))?,
        platform_mqtt_uri: raw
            .platform_mqtt_uri
            .ok_or(ConfigError::MissingField("platformMqttUri"))?,
        local_mqtt_uri: raw.local_mqtt_uri,
        platform_trust_store: raw.platform_trust_store.map(PathBuf::from),
        platform_mqtt_keep_alive_seconds: raw.platform_mqtt_keep_alive_seconds,
        data_dir: PathBuf::from(raw.data_dir),
        firmware_version: raw.firmware_version,
        firmware_installer_script: raw.firmware_installer_script.map(PathBuf::from),
        max_file_size: raw.max_file_size,
        max_packet_size: raw.max_packet_size,
        enable_url_download: raw.enable_url_download,
        status_poll_interval: std::time::Duration::from_secs(raw.status_poll_interval_seconds),
        publish_interval: std::time::Duration::from_secs(raw.publish_interval_seconds),
        reconnect_delay: std::time::Duration::from_secs(raw.reconnect_delay_seconds),
        name,
        manifest: raw.manifest,
    })
}

/// A `scheme://host:port` MQTT URI, parsed just enough to drive
/// [`gw_mqtt::TransportConfig`]: `mqtts`/`ssl` select TLS, anything else
/// plaintext; a missing port defaults to 8883 (TLS) or 1883 (plaintext).
pub struct MqttUri {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

pub fn parse_mqtt_uri(uri: &str) -> Result<MqttUri, ConfigError> {
    let (scheme, rest) = uri.split_once("://").unwrap_or(("mqtt", uri));
    let tls = matches!(scheme, "mqtts" | "ssl");
    let (host, port) = match rest.split_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| ConfigError::MissingField("platformMqttUri port"))?;
            (host.to_string(), port)
        }
        None => (rest.to_string(), if tls { 8883 } else { 1883 }),
    };
    if host.is_empty() {
        return Err(ConfigError::MissingField("platformMqttUri host"));
    }
    Ok(MqttUri { host, port, tls })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn loads_minimal_valid_config() {
        let dir = tempdir().unwrap();
        let path = write(
            &dir,
            "gateway.json",
            r#"{"key":"GW","password":"secret","platformMqttUri":"mqtts://platform:8883"}"#,
        );
        let config = load_gateway_config(&path).unwrap();
        assert_eq!(config.key, "GW");
        assert_eq!(config.platform_mqtt_keep_alive_seconds, 60);
        assert!(config.local_mqtt_uri.is_none());
    }

    #[test]
    fn missing_required_field_is_fatal() {
        let dir = tempdir().unwrap();
        let path = write(&dir, "gateway.json", r#"{"key":"GW"}"#);
        let err = load_gateway_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("password")));
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = load_gateway_config(Path::new("/no/such/gateway.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn malformed_json_is_fatal() {
        let dir = tempdir().unwrap();
        let path = write(&dir, "gateway.json", "not json");
        let err = load_gateway_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn mqtts_uri_defaults_to_tls_port() {
        let uri = parse_mqtt_uri("mqtts://platform.example.com").unwrap();
        assert_eq!(uri.host, "platform.example.com");
        assert_eq!(uri.port, 8883);
        assert!(uri.tls);
    }

    #[test]
    fn mqtt_uri_with_explicit_port() {
        let uri = parse_mqtt_uri("mqtt://localhost:1883").unwrap();
        assert_eq!(uri.port, 1883);
        assert!(!uri.tls);
    }
}
