//! Telemetry readings, events, actuator status/commands and configuration
//! get/set.

use crate::channel::segment;
use crate::channel::tokens;
use crate::error::ProtocolError;
use crate::model::DeviceKey;
use crate::model::Reading;
use crate::model::ReadingValue;
use gw_mqtt::Message;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

/// `d2p/sensor_reading/g/<gw>/d/<dev>/r/<ref>` — one reading per message,
/// the reference carried in the channel rather than the payload.
pub fn encode_reading(gateway: &DeviceKey, device: &DeviceKey, reading: &Reading) -> Message {
    let channel = format!(
        "d2p/{}/g/{gateway}/d/{device}/r/{}",
        segment::SENSOR_READING,
        reading.reference
    );
    let payload = match &reading.value {
        ReadingValue::Single(value) => ReadingPayload::Single {
            value: *value,
            timestamp_ms_since_epoch: reading.timestamp_ms_since_epoch,
        },
        ReadingValue::Multiple(values) => ReadingPayload::Multiple {
            values: values.clone(),
            timestamp_ms_since_epoch: reading.timestamp_ms_since_epoch,
        },
    };
    Message::new(channel, serde_json::to_vec(&payload).expect("serializable"))
}

/// `#[serde(flatten)]` over the untagged `ReadingValue` enum would ask serde's
/// flatten serializer to flatten a bare scalar/sequence, which it rejects at
/// runtime; `value`/`values` are carried as explicit struct-variant fields
/// instead so the payload always serializes as a map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ReadingPayload {
    Single { value: f64, timestamp_ms_since_epoch: i64 },
    Multiple { values: Vec<f64>, timestamp_ms_since_epoch: i64 },
}

/// Decodes a `sensor_reading` channel+payload back into a [`Reading`],
/// pulling the reference out of the channel tail.
pub fn decode_reading(channel: &str, payload: &[u8]) -> Result<Reading, ProtocolError> {
    let reference = reference_from_channel(channel)?;
    let parsed: ReadingPayload = serde_json::from_slice(payload)?;
    let (value, timestamp_ms_since_epoch) = match parsed {
        ReadingPayload::Single { value, timestamp_ms_since_epoch } => (ReadingValue::Single(value), timestamp_ms_since_epoch),
        ReadingPayload::Multiple { values, timestamp_ms_since_epoch } => (ReadingValue::Multiple(values), timestamp_ms_since_epoch),
    };
    Ok(Reading {
        reference,
        value,
        timestamp_ms_since_epoch,
    })
}

fn reference_from_channel(channel: &str) -> Result<String, ProtocolError> {
    let parts = tokens(channel);
    let i = parts
        .iter()
        .position(|&p| p == "r")
        .ok_or_else(|| ProtocolError::MissingField("r"))?;
    parts
        .get(i + 1)
        .map(|s| s.to_string())
        .ok_or(ProtocolError::MissingField("r"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub reference: String,
    pub text: String,
    pub severity: String,
    pub timestamp_ms_since_epoch: i64,
}

pub fn encode_event(gateway: &DeviceKey, device: &DeviceKey, event: &Event) -> Message {
    let channel = format!("d2p/{}/g/{gateway}/d/{device}/r/{}", segment::EVENTS, event.reference);
    #[derive(Serialize)]
    struct Payload<'a> {
        text: &'a str,
        severity: &'a str,
        timestamp_ms_since_epoch: i64,
    }
    let payload = Payload {
        text: &event.text,
        severity: &event.severity,
        timestamp_ms_since_epoch: event.timestamp_ms_since_epoch,
    };
    Message::new(channel, serde_json::to_vec(&payload).expect("serializable"))
}

pub fn decode_event(channel: &str, payload: &[u8]) -> Result<Event, ProtocolError> {
    #[derive(Deserialize)]
    struct Payload {
        text: String,
        severity: String,
        timestamp_ms_since_epoch: i64,
    }
    let reference = reference_from_channel(channel)?;
    let parsed: Payload = serde_json::from_slice(payload)?;
    Ok(Event {
        reference,
        text: parsed.text,
        severity: parsed.severity,
        timestamp_ms_since_epoch: parsed.timestamp_ms_since_epoch,
    })
}

/// One actuator status per message (the `JsonSingle` variant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorStatus {
    pub reference: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

pub fn encode_actuator_status(gateway: &DeviceKey, device: &DeviceKey, status: &ActuatorStatus) -> Message {
    let channel = format!(
        "d2p/{}/g/{gateway}/d/{device}/r/{}",
        segment::ACTUATOR_STATUS,
        status.reference
    );
    #[derive(Serialize)]
    struct Payload<'a> {
        status: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<f64>,
    }
    let payload = Payload {
        status: &status.status,
        value: status.value,
    };
    Message::new(channel, serde_json::to_vec(&payload).expect("serializable"))
}

/// An inbound `p2d/actuator_set/.../r/<ref>` command: `{value}` with the
/// reference derived from the channel tail.
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorSet {
    pub reference: String,
    pub value: f64,
}

pub fn decode_actuator_set(channel: &str, payload: &[u8]) -> Result<ActuatorSet, ProtocolError> {
    #[derive(Deserialize)]
    struct Payload {
        value: f64,
    }
    let reference = reference_from_channel(channel)?;
    let parsed: Payload = serde_json::from_slice(payload)?;
    Ok(ActuatorSet {
        reference,
        value: parsed.value,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorGet {
    pub reference: String,
}

pub fn decode_actuator_get(channel: &str) -> Result<ActuatorGet, ProtocolError> {
    Ok(ActuatorGet {
        reference: reference_from_channel(channel)?,
    })
}

/// Configuration messages carry a reference→value map rather than one value
/// per message.
pub type ConfigurationMap = BTreeMap<String, String>;

pub fn encode_configuration_get(gateway: &DeviceKey, device: &DeviceKey, values: &ConfigurationMap) -> Message {
    let channel = format!("d2p/{}/g/{gateway}/d/{device}", segment::CONFIGURATION_GET);
    Message::new(channel, serde_json::to_vec(values).expect("serializable"))
}

pub fn decode_configuration_set(payload: &[u8]) -> Result<ConfigurationMap, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}
