//! Compact publish/subscribe baseline: MQTT-SN framing.
//!
//! Implements the subset exercised by the simulation byte-exactly (PUBLISH
//! in both directions) and the surrounding frame vocabulary as sizing
//! constants for overhead bookkeeping. Session state mirrors what a real
//! MQTT-SN client keeps (connection, topic registry, inflight QoS 1/2
//! maps, subscriptions, will), which is exactly the footprint the
//! state-size comparison is about.

use crate::config::MqttSnConfig;
use crate::protocols::{ParsedCommand, QosClass};
use std::collections::BTreeMap;

// Message types.
pub const ADVERTISE: u8 = 0x00;
pub const SEARCHGW: u8 = 0x01;
pub const GWINFO: u8 = 0x02;
pub const CONNECT: u8 = 0x04;
pub const CONNACK: u8 = 0x05;
pub const REGISTER: u8 = 0x0A;
pub const REGACK: u8 = 0x0B;
pub const PUBLISH: u8 = 0x0C;
pub const PUBACK: u8 = 0x0D;
pub const PUBCOMP: u8 = 0x0E;
pub const PUBREC: u8 = 0x0F;
pub const PUBREL: u8 = 0x10;
pub const SUBSCRIBE: u8 = 0x12;
pub const SUBACK: u8 = 0x13;
pub const PINGREQ: u8 = 0x16;
pub const PINGRESP: u8 = 0x17;
pub const DISCONNECT: u8 = 0x18;

// Frame sizes used by the overhead bookkeeping functions.
/// Length(1) + MsgType(1) + Flags(1) + TopicId(2) + MsgId(2).
pub const PUBLISH_HEADER_SIZE: usize = 7;
pub const CONNECT_SIZE: usize = 10;
pub const CONNACK_SIZE: usize = 3;
pub const PUBACK_SIZE: usize = 7;
pub const PINGREQ_SIZE: usize = 2;
pub const PINGRESP_SIZE: usize = 2;

/// QoS level carried in bits 5-6 of the flags byte.
fn qos_for_class(qos: QosClass) -> u8 {
    match qos {
        QosClass::Critical => 1,
        QosClass::Normal => 1,
        QosClass::BestEffort => 0,
    }
}

#[derive(Debug, Clone)]
pub struct InflightPublish {
    pub payload: Vec<u8>,
    pub qos: u8,
    pub timestamp_ms: u64,
}

/// Client session state. Considerably heavier than the NOVEL device state;
/// the estimator below is what feeds the footprint comparison.
#[derive(Debug, Clone)]
pub struct MqttSnDeviceState {
    pub connected: bool,
    pub client_id: String,
    pub keep_alive_s: u32,
    pub clean_session: bool,
    /// Monotonic mod 2^16.
    pub message_id: u16,
    pub topic_ids: BTreeMap<String, u16>,
    pub registered_topics: BTreeMap<u16, String>,
    pub inflight_publish: BTreeMap<u16, InflightPublish>,
    pub inflight_pubrel: BTreeMap<u16, InflightPublish>,
    /// topic_id → granted QoS.
    pub subscriptions: BTreeMap<u16, u8>,
    pub will_topic: String,
    pub will_message: Vec<u8>,
    pub will_qos: u8,
    pub will_retain: bool,
}

impl MqttSnDeviceState {
    /// Rough per-session memory footprint in bytes.
    pub fn state_size(&self) -> usize {
        let base = 32;
        let topics = self.topic_ids.len() * 20;
        let inflight = (self.inflight_publish.len() + self.inflight_pubrel.len()) * 50;
        let subs = self.subscriptions.len() * 4;
        let will = self.will_topic.len() + self.will_message.len();
        base + topics + inflight + subs + will
    }
}

#[derive(Debug, Clone)]
pub struct MqttSnProtocol {
    pub keep_alive_s: u32,
}

impl MqttSnProtocol {
    pub fn new(config: &MqttSnConfig) -> Self {
        Self {
            keep_alive_s: config.keep_alive_s,
        }
    }

    pub fn create_device_state(&self) -> MqttSnDeviceState {
        MqttSnDeviceState {
            connected: false,
            client_id: String::new(),
            keep_alive_s: self.keep_alive_s,
            clean_session: true,
            message_id: 0,
            topic_ids: BTreeMap::new(),
            registered_topics: BTreeMap::new(),
            inflight_publish: BTreeMap::new(),
            inflight_pubrel: BTreeMap::new(),
            subscriptions: BTreeMap::new(),
            will_topic: String::new(),
            will_message: Vec::new(),
            will_qos: 0,
            will_retain: false,
        }
    }

    /// Telemetry uplink as a PUBLISH to the predefined topic id 1.
    ///
    /// `{length, PUBLISH, flags, topic_id:16, msg_id:16, data}`; QoS in
    /// flags bits 5-6, msg_id 0 for QoS 0. QoS > 0 publishes are tracked in
    /// the inflight map until the matching ack frees them.
    pub fn encode_uplink(
        &self,
        state: &mut MqttSnDeviceState,
        payload: &[u8],
        qos_class: QosClass,
        now_ms: u64,
    ) -> (Vec<u8>, u16) {
        let qos = qos_for_class(qos_class);
        state.message_id = state.message_id.wrapping_add(1);
        let topic_id: u16 = 1;
        let msg_id = if qos > 0 { state.message_id } else { 0 };
        let flags = (qos & 0x03) << 5;

        let mut frame = Vec::with_capacity(PUBLISH_HEADER_SIZE + payload.len());
        frame.push((PUBLISH_HEADER_SIZE + payload.len()) as u8);
        frame.push(PUBLISH);
        frame.push(flags);
        frame.extend_from_slice(&topic_id.to_be_bytes());
        frame.extend_from_slice(&msg_id.to_be_bytes());
        frame.extend_from_slice(payload);

        if qos > 0 {
            state.inflight_publish.insert(
                msg_id,
                InflightPublish {
                    payload: payload.to_vec(),
                    qos,
                    timestamp_ms: now_ms,
                },
            );
        }
        (frame, msg_id)
    }

    /// Command downlink as a QoS 1 PUBLISH: topic id carries the command
    /// type, msg id carries the epoch the gateway assigned.
    pub fn encode_downlink(&self, cmd_type: u8, epoch: u16, payload: &[u8]) -> Vec<u8> {
        let flags: u8 = 0x20; // QoS 1
        let topic_id = cmd_type as u16;

        let mut frame = Vec::with_capacity(PUBLISH_HEADER_SIZE + payload.len());
        frame.push((PUBLISH_HEADER_SIZE + payload.len()) as u8);
        frame.push(PUBLISH);
        frame.push(flags);
        frame.extend_from_slice(&topic_id.to_be_bytes());
        frame.extend_from_slice(&epoch.to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    /// Extract commands from a downlink frame. `None` for frames too short
    /// to carry a message type; non-PUBLISH frames decode to no commands.
    pub fn decode_downlink(&self, data: &[u8]) -> Option<Vec<ParsedCommand>> {
        if data.len() < 2 {
            return None;
        }
        let mut commands = Vec::new();
        if data[1] == PUBLISH && data.len() >= PUBLISH_HEADER_SIZE {
            let topic_id = u16::from_be_bytes([data[3], data[4]]);
            let msg_id = u16::from_be_bytes([data[5], data[6]]);
            commands.push(ParsedCommand {
                cmd_type: topic_id as u8,
                epoch: msg_id,
                payload: data[PUBLISH_HEADER_SIZE..].to_vec(),
            });
        }
        Some(commands)
    }

    /// Release an inflight QoS 1/2 publish once its ack arrives.
    pub fn ack_publish(&self, state: &mut MqttSnDeviceState, msg_id: u16) -> bool {
        state.inflight_publish.remove(&msg_id).is_some()
    }

    pub fn overhead_bytes(&self) -> usize {
        PUBLISH_HEADER_SIZE
    }

    /// CONNECT/CONNACK handshake cost.
    pub fn connection_overhead(&self) -> usize {
        CONNECT_SIZE + CONNACK_SIZE
    }

    /// PINGREQ/PINGRESP bytes per hour at the configured keep-alive.
    pub fn keepalive_overhead_per_hour(&self) -> usize {
        let pings_per_hour = 3_600.0 / self.keep_alive_s as f64;
        (pings_per_hour * (PINGREQ_SIZE + PINGRESP_SIZE) as f64) as usize
    }

    /// One PUBACK per QoS 1 publish.
    pub fn qos1_ack_overhead(&self) -> usize {
        PUBACK_SIZE
    }

    /// PUBREC + PUBREL + PUBCOMP for QoS 2.
    pub fn qos2_overhead(&self) -> usize {
        PUBACK_SIZE * 3
    }
}
