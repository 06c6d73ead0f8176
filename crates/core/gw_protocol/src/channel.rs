//! Channel tokens, the MQTT wildcard matcher, and the two channel-prefix
//! rewriting functions.

use crate::error::ProtocolError;
use crate::model::DeviceKey;

/// Direction prefix: which side a message travels towards.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Direction {
    /// device/gateway → platform
    DeviceToPlatform,
    /// platform → device/gateway
    PlatformToDevice,
}

impl Direction {
    pub fn prefix(self) -> &'static str {
        match self {
            Direction::DeviceToPlatform => "d2p",
            Direction::PlatformToDevice => "p2d",
        }
    }
}

/// The stable message-type segment names.
pub mod segment {
    pub const SENSOR_READING: &str = "sensor_reading";
    pub const EVENTS: &str = "events";
    pub const ACTUATOR_STATUS: &str = "actuator_status";
    pub const ACTUATOR_SET: &str = "actuator_set";
    pub const ACTUATOR_GET: &str = "actuator_get";
    pub const CONFIGURATION_SET: &str = "configuration_set";
    pub const CONFIGURATION_GET: &str = "configuration_get";
    pub const REGISTER_SUBDEVICE_REQUEST: &str = "register_subdevice_request";
    pub const REGISTER_SUBDEVICE_RESPONSE: &str = "register_subdevice_response";
    pub const REREGISTER_DEVICE: &str = "reregister_device";
    pub const DELETE_DEVICE: &str = "delete_device";
    pub const STATUS: &str = "status";
    pub const SUBDEVICE_STATUS_REQUEST: &str = "subdevice_status_request";
    pub const SUBDEVICE_STATUS_RESPONSE: &str = "subdevice_status_response";
    pub const SUBDEVICE_STATUS_UPDATE: &str = "subdevice_status_update";
    pub const FIRMWARE_UPDATE_INSTALL: &str = "firmware_update_install";
    pub const FIRMWARE_UPDATE_ABORT: &str = "firmware_update_abort";
    pub const FIRMWARE_UPDATE_STATUS: &str = "firmware_update_status";
    pub const FIRMWARE_VERSION: &str = "firmware_version";
    pub const FILE: &str = "file";
    pub const LASTWILL: &str = "lastwill";
    pub const PONG: &str = "pong";
}

/// Split a channel string into its `/`-separated tokens.
pub fn tokens(channel: &str) -> Vec<&str> {
    channel.split('/').collect()
}

/// Join tokens back into a channel string.
pub fn join(tokens: &[&str]) -> String {
    tokens.join("/")
}

/// Builds `g/<gw>`.
pub fn gateway_tail(gateway: &DeviceKey) -> String {
    format!("g/{gateway}")
}

/// Builds `g/<gw>/d/<dev>`.
pub fn gateway_device_tail(gateway: &DeviceKey, device: &DeviceKey) -> String {
    format!("g/{gateway}/d/{device}")
}

/// Builds `d/<dev>`.
pub fn device_tail(device: &DeviceKey) -> String {
    format!("d/{device}")
}

/// Checks that a subscription pattern only uses `#` as its final level, the
/// MQTT rule for multi-level wildcards.
pub fn is_valid_pattern(pattern: &str) -> bool {
    let parts: Vec<&str> = pattern.split('/').collect();
    parts
        .iter()
        .enumerate()
        .all(|(i, part)| part != &"#" || i == parts.len() - 1)
}

/// MQTT-style wildcard match: `+` matches exactly one level, `#` matches
/// zero or more trailing levels (and must be the final pattern level),
/// anything else must match the topic level literally.
pub fn matches(pattern: &str, topic: &str) -> bool {
    let pattern_levels: Vec<&str> = pattern.split('/').collect();
    let topic_levels: Vec<&str> = topic.split('/').collect();

    let mut pi = 0;
    let mut ti = 0;
    while pi < pattern_levels.len() {
        if pattern_levels[pi] == "#" {
            return true;
        }
        if ti >= topic_levels.len() {
            return false;
        }
        if pattern_levels[pi] == "+" || pattern_levels[pi] == topic_levels[ti] {
            pi += 1;
            ti += 1;
        } else {
            return false;
        }
    }
    ti == topic_levels.len()
}

/// Removes the `g/<gateway>/` segment from a platform-addressed channel.
/// Fails if that exact segment is not present.
pub fn route_platform_to_device(channel: &str, gateway: &DeviceKey) -> Result<String, ProtocolError> {
    let parts = tokens(channel);
    let gw = gateway.as_str();
    for i in 0..parts.len().saturating_sub(1) {
        if parts[i] == "g" && parts[i + 1] == gw {
            let mut rest = Vec::with_capacity(parts.len() - 2);
            rest.extend_from_slice(&parts[..i]);
            rest.extend_from_slice(&parts[i + 2..]);
            return Ok(join(&rest));
        }
    }
    Err(ProtocolError::NotGatewayAddressed(channel.to_string()))
}

/// Inserts `g/<gateway>/` immediately before the `d/...` segment of a
/// device-addressed channel. Fails if the channel has no device prefix.
pub fn route_device_to_platform(channel: &str, gateway: &DeviceKey) -> Result<String, ProtocolError> {
    let parts = tokens(channel);
    let Some(d_index) = parts.iter().position(|&p| p == "d") else {
        return Err(ProtocolError::NotDeviceAddressed(channel.to_string()));
    };
    let mut rewritten = Vec::with_capacity(parts.len() + 2);
    rewritten.extend_from_slice(&parts[..d_index]);
    rewritten.push("g");
    let gw = gateway.as_str().to_string();
    rewritten.push(gw.as_str());
    rewritten.extend_from_slice(&parts[d_index..]);
    Ok(join(&rewritten))
}

/// Extracts the device key addressed by a channel: the token following `d`
/// wins, then the token following `g`, then the `lastwill/<key>` literal
/// tail, otherwise `None`.
pub fn extract_device_key(channel: &str) -> Option<DeviceKey> {
    let parts = tokens(channel);
    if let Some(i) = parts.iter().position(|&p| p == "d") {
        if let Some(key) = parts.get(i + 1) {
            return DeviceKey::new(*key);
        }
    }
    if let Some(i) = parts.iter().position(|&p| p == "g") {
        if let Some(key) = parts.get(i + 1) {
            return DeviceKey::new(*key);
        }
    }
    if parts.first() == Some(&segment::LASTWILL) && parts.len() == 2 {
        return DeviceKey::new(parts[1]);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("a/b/c", "a/b/c", true; "exact match")]
    #[test_case("a/+/c", "a/b/c", true; "single level wildcard")]
    #[test_case("a/+/c", "a/b/d/c", false; "single level wildcard does not cross levels")]
    #[test_case("a/#", "a/b/c", true; "multi level wildcard several levels")]
    #[test_case("a/#", "a", true; "multi level wildcard zero trailing levels")]
    #[test_case("a/b", "a/b/c", false; "pattern shorter than topic")]
    #[test_case("a/b/c", "a/b", false; "pattern longer than topic")]
    #[test_case("p2d/file/g/+/d/+/#", "p2d/file/g/GW/d/DEV/chunk/0", true; "gateway channel pattern")]
    fn wildcard_matches(pattern: &str, topic: &str, expected: bool) {
        assert_eq!(matches(pattern, topic), expected);
    }

    #[test]
    fn hash_may_only_be_final_level() {
        assert!(is_valid_pattern("a/#"));
        assert!(is_valid_pattern("a/+/#"));
        assert!(!is_valid_pattern("a/#/b"));
    }

    #[test]
    fn route_round_trip_for_gateway_addressed_platform_channel() {
        let gw = DeviceKey::new("GATEWAY_KEY").unwrap();
        let original = "p2d/actuator_set/g/GATEWAY_KEY/d/device_key/r/temperature";

        let device_side = route_platform_to_device(original, &gw).unwrap();
        assert_eq!(device_side, "p2d/actuator_set/d/device_key/r/temperature");

        let back = route_device_to_platform(&device_side, &gw).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn route_platform_to_device_fails_without_gateway_segment() {
        let gw = DeviceKey::new("GATEWAY_KEY").unwrap();
        assert!(route_platform_to_device("p2d/actuator_set/d/device_key", &gw).is_err());
    }

    #[test]
    fn route_device_to_platform_fails_without_device_segment() {
        let gw = DeviceKey::new("GATEWAY_KEY").unwrap();
        assert!(route_device_to_platform("d2p/reregister_device", &gw).is_err());
    }

    #[test]
    fn extract_device_key_prefers_d_segment() {
        assert_eq!(
            extract_device_key("p2d/actuator_set/g/GW/d/DEV/r/temp").unwrap().as_str(),
            "DEV"
        );
        assert_eq!(
            extract_device_key("d2p/register_subdevice_request/g/GW").unwrap().as_str(),
            "GW"
        );
        assert_eq!(extract_device_key("lastwill/GW").unwrap().as_str(), "GW");
        assert_eq!(extract_device_key("pong"), None);
    }
}
