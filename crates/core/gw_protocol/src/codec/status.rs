//! Device status, subdevice status polling and last-will interpretation.

use crate::channel;
use crate::channel::segment;
use crate::error::ProtocolError;
use crate::model::DeviceKey;
use crate::model::DeviceStatus;
use gw_mqtt::Message;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct StatusPayload {
    state: DeviceStatus,
}

/// Synthesized status publication, used directly for last-will-derived
/// offline reports: `d2p/status/g/<gw>/d/<dev>`.
pub fn encode_status(gateway: &DeviceKey, device: &DeviceKey, status: DeviceStatus) -> Message {
    let channel = format!("d2p/{}/{}", segment::STATUS, channel::gateway_device_tail(gateway, device));
    let payload = StatusPayload { state: status };
    Message::new(channel, serde_json::to_vec(&payload).expect("serializable"))
}

/// A live status report relayed from a subdevice:
/// `d2p/subdevice_status_update/g/<gw>/d/<dev>`.
pub fn encode_subdevice_status_update(gateway: &DeviceKey, device: &DeviceKey, status: DeviceStatus) -> Message {
    let channel = format!(
        "d2p/{}/{}",
        segment::SUBDEVICE_STATUS_UPDATE,
        channel::gateway_device_tail(gateway, device)
    );
    let payload = StatusPayload { state: status };
    Message::new(channel, serde_json::to_vec(&payload).expect("serializable"))
}

/// A gateway-initiated poll sent on the local broker:
/// `p2d/subdevice_status_request/d/<dev>` — empty payload.
pub fn encode_status_request_to_device(device: &DeviceKey) -> Message {
    Message::new(
        format!(
            "p2d/{}/{}",
            segment::SUBDEVICE_STATUS_REQUEST,
            channel::device_tail(device)
        ),
        Vec::new(),
    )
}

/// A device's self-reported status: `status/d/<dev>` on the local broker.
pub fn decode_status_report(channel_str: &str, payload: &[u8]) -> Result<(DeviceKey, DeviceStatus), ProtocolError> {
    let device = channel::extract_device_key(channel_str)
        .ok_or_else(|| ProtocolError::MissingDeviceKey(channel_str.to_string()))?;
    let parsed: StatusPayload = serde_json::from_slice(payload)?;
    Ok((device, parsed.state))
}

/// Per-device last-will: `lastwill/<key>`, any payload means "offline".
pub fn decode_per_device_lastwill(channel_str: &str) -> Result<DeviceKey, ProtocolError> {
    channel::extract_device_key(channel_str)
        .ok_or_else(|| ProtocolError::MissingDeviceKey(channel_str.to_string()))
}

/// Broker-level last-will: `lastwill`, a JSON array of affected device keys.
pub fn decode_broker_lastwill(payload: &[u8]) -> Result<Vec<DeviceKey>, ProtocolError> {
    let keys: Vec<String> = serde_json::from_slice(payload)?;
    Ok(keys.into_iter().filter_map(DeviceKey::new).collect())
}

/// The keep-alive ping the gateway publishes periodically, answered by the
/// platform on `pong/#`.
pub fn encode_ping(gateway: &DeviceKey) -> Message {
    Message::new(format!("ping/{gateway}"), Vec::new())
}

pub fn is_pong(channel_str: &str) -> bool {
    channel::tokens(channel_str).first() == Some(&segment::PONG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lastwill_fanout_uses_status_segment() {
        let gw = DeviceKey::new("GATEWAY_KEY").unwrap();
        let keys = decode_broker_lastwill(br#"["D1","D2","D3"]"#).unwrap();
        assert_eq!(keys.len(), 3);
        for key in &keys {
            let message = encode_status(&gw, key, DeviceStatus::Offline);
            assert_eq!(message.channel, format!("d2p/status/g/GATEWAY_KEY/d/{key}"));
            assert_eq!(message.payload, br#"{"state":"OFFLINE"}"#);
        }
    }

    #[test]
    fn per_device_lastwill_extracts_key() {
        assert_eq!(decode_per_device_lastwill("lastwill/D1").unwrap().as_str(), "D1");
    }
}
