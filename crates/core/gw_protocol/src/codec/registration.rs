//! Device registration, deletion and reregistration wire formats.

use crate::channel;
use crate::channel::segment;
use crate::error::ProtocolError;
use crate::model::DeviceKey;
use gw_mqtt::Message;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub device: DeviceDescriptor,
    pub manifest: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationResult {
    Ok,
    ErrorKeyConflict,
    ErrorManifestConflict,
    ErrorMaximumNumberOfDevicesExceeded,
    ErrorReadingPayload,
    ErrorGatewayNotFound,
    ErrorNoGatewayManifest,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub result: RegistrationResult,
}

/// `d2p/register_subdevice_request/g/<gw>[/d/<dev>]`. The device segment is
/// omitted exactly when the gateway is registering itself.
pub fn encode_register_request(
    gateway: &DeviceKey,
    device: Option<&DeviceKey>,
    request: &RegistrationRequest,
) -> Message {
    let channel = match device {
        Some(device) => format!(
            "d2p/{}/{}",
            segment::REGISTER_SUBDEVICE_REQUEST,
            channel::gateway_device_tail(gateway, device)
        ),
        None => format!(
            "d2p/{}/{}",
            segment::REGISTER_SUBDEVICE_REQUEST,
            channel::gateway_tail(gateway)
        ),
    };
    Message::new(channel, serde_json::to_vec(request).expect("serializable"))
}

pub fn decode_register_request(payload: &[u8]) -> Result<RegistrationRequest, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

/// `p2d/register_subdevice_response/g/<gw>/#` — the device key (if any) the
/// response concerns is pulled from the channel tail by the caller via
/// [`channel::extract_device_key`].
pub fn decode_register_response(payload: &[u8]) -> Result<RegistrationResponse, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Forwards a registration response down to the originating subdevice, on
/// the local broker: `p2d/register_subdevice_response/d/<dev>`.
pub fn encode_register_response_to_device(device: &DeviceKey, response: RegistrationResponse) -> Message {
    let channel = format!(
        "p2d/{}/{}",
        segment::REGISTER_SUBDEVICE_RESPONSE,
        channel::device_tail(device)
    );
    Message::new(channel, serde_json::to_vec(&response).expect("serializable"))
}

/// `d2p/delete_device/g/<gw>/d/<dev>` — empty payload.
pub fn encode_delete_device_request(gateway: &DeviceKey, device: &DeviceKey) -> Message {
    let channel = format!(
        "d2p/{}/{}",
        segment::DELETE_DEVICE,
        channel::gateway_device_tail(gateway, device)
    );
    Message::new(channel, Vec::new())
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeleteDeviceResponse {
    pub result: RegistrationResult,
}

pub fn decode_delete_device_response(payload: &[u8]) -> Result<DeleteDeviceResponse, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

/// `d2p/reregister_device/g/<gw>` ack, `{result: OK}`.
pub fn encode_reregister_ack(gateway: &DeviceKey) -> Message {
    let channel = format!("d2p/{}/{}", segment::REREGISTER_DEVICE, channel::gateway_tail(gateway));
    let body = RegistrationResponse {
        result: RegistrationResult::Ok,
    };
    Message::new(channel, serde_json::to_vec(&body).expect("serializable"))
}

/// Device-side broadcast asking every attached subdevice to re-submit its
/// registration: `p2d/reregister_device/d/` (no key).
pub fn encode_reregister_broadcast() -> Message {
    Message::new(
        format!("p2d/{}/d/", segment::REREGISTER_DEVICE),
        Vec::new(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_registration_omits_device_segment() {
        let gw = DeviceKey::new("GATEWAY_KEY").unwrap();
        let request = RegistrationRequest {
            device: DeviceDescriptor {
                name: "gw".to_string(),
                key: "GATEWAY_KEY".to_string(),
            },
            manifest: serde_json::json!({}),
        };
        let message = encode_register_request(&gw, None, &request);
        assert_eq!(message.channel, "d2p/register_subdevice_request/g/GATEWAY_KEY");
    }

    #[test]
    fn subdevice_registration_forwarding_channel() {
        let gw = DeviceKey::new("GATEWAY_KEY").unwrap();
        let dev = DeviceKey::new("device_key").unwrap();
        let request = RegistrationRequest {
            device: DeviceDescriptor {
                name: "sensor".to_string(),
                key: "device_key".to_string(),
            },
            manifest: serde_json::json!({}),
        };
        let message = encode_register_request(&gw, Some(&dev), &request);
        assert_eq!(
            message.channel,
            "d2p/register_subdevice_request/g/GATEWAY_KEY/d/device_key"
        );
    }

    #[test]
    fn reregister_broadcast_channel_has_no_key() {
        assert_eq!(encode_reregister_broadcast().channel, "p2d/reregister_device/d/");
    }
}
