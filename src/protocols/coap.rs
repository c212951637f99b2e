//! Constrained request/response baseline: CoAP framing.
//!
//! Uplink telemetry is a POST to `/data`; downlink commands arrive as 2.05
//! Content responses. Confirmable messages track inflight transactions by
//! message id; a 4-byte token correlates requests with responses.

use crate::config::CoapConfig;
use crate::protocols::{ParsedCommand, QosClass};
use rand::Rng;
use std::collections::BTreeMap;

// Message types (2 bits).
pub const TYPE_CON: u8 = 0;
pub const TYPE_NON: u8 = 1;
pub const TYPE_ACK: u8 = 2;
pub const TYPE_RST: u8 = 3;

// Method codes.
pub const METHOD_GET: u8 = 1;
pub const METHOD_POST: u8 = 2;
pub const METHOD_PUT: u8 = 3;
pub const METHOD_DELETE: u8 = 4;

/// 2.05 Content, used for downlink command responses.
pub const CODE_CONTENT: u8 = 0x45;

/// Fixed header: Ver(2) + Type(2) + TKL(4) + Code(8) + MessageID(16).
pub const HEADER_SIZE: usize = 4;
/// Default token length.
pub const TOKEN_SIZE: usize = 4;
/// End-of-options marker preceding the payload.
pub const PAYLOAD_MARKER: u8 = 0xFF;

#[derive(Debug, Clone)]
pub struct InflightRequest {
    pub payload: Vec<u8>,
    pub retries: u32,
    pub timestamp_ms: u64,
}

/// Block-transfer progress for one resource.
#[derive(Debug, Clone)]
pub struct BlockTransferState {
    pub next_block: u32,
    pub block_size: u16,
}

#[derive(Debug, Clone)]
pub struct CoapDeviceState {
    /// Monotonic mod 2^16.
    pub message_id: u16,
    pub token: Vec<u8>,
    /// CON messages awaiting their ACK, keyed by message id.
    pub inflight: BTreeMap<u16, InflightRequest>,
    /// Observe subscriptions: URI → token.
    pub observe_tokens: BTreeMap<String, Vec<u8>>,
    pub block_state: BTreeMap<String, BlockTransferState>,
}

impl CoapDeviceState {
    /// Rough per-session memory footprint in bytes.
    pub fn state_size(&self) -> usize {
        let base = 16;
        let inflight = self.inflight.len() * 30;
        let observe = self.observe_tokens.len() * 20;
        let block = self.block_state.len() * 50;
        base + inflight + observe + block
    }
}

#[derive(Debug, Clone)]
pub struct CoapProtocol {
    pub confirmable_ratio: f64,
    pub max_retransmit: u32,
}

impl CoapProtocol {
    pub fn new(config: &CoapConfig) -> Self {
        Self {
            confirmable_ratio: config.confirmable_ratio,
            max_retransmit: config.max_retransmit,
        }
    }

    pub fn create_device_state(&self, rng: &mut impl Rng) -> CoapDeviceState {
        let mut token = vec![0u8; TOKEN_SIZE];
        rng.fill(token.as_mut_slice());
        CoapDeviceState {
            message_id: 0,
            token,
            inflight: BTreeMap::new(),
            observe_tokens: BTreeMap::new(),
            block_state: BTreeMap::new(),
        }
    }

    /// Telemetry uplink: POST /data, CON or NON by QoS class (normal draws
    /// against `confirmable_ratio`).
    ///
    /// `{ver:2|type:2|tkl:4, code, msg_id:16, token, 0xB4 "data", 0xFF,
    /// payload}`.
    pub fn encode_uplink(
        &self,
        state: &mut CoapDeviceState,
        payload: &[u8],
        qos_class: QosClass,
        now_ms: u64,
        rng: &mut impl Rng,
    ) -> (Vec<u8>, u16) {
        let msg_type = match qos_class {
            QosClass::Critical => TYPE_CON,
            QosClass::BestEffort => TYPE_NON,
            QosClass::Normal => {
                if rng.gen_range(0.0..1.0) < self.confirmable_ratio {
                    TYPE_CON
                } else {
                    TYPE_NON
                }
            }
        };
        state.message_id = state.message_id.wrapping_add(1);
        let msg_id = state.message_id;

        let tkl = state.token.len() as u8;
        let byte0 = (1 << 6) | (msg_type << 4) | (tkl & 0x0F);
        let mut frame = Vec::with_capacity(HEADER_SIZE + state.token.len() + 6 + payload.len());
        frame.push(byte0);
        frame.push(METHOD_POST);
        frame.extend_from_slice(&msg_id.to_be_bytes());
        frame.extend_from_slice(&state.token);
        // Uri-Path option: delta 11, length 4, "data".
        frame.push(0xB4);
        frame.extend_from_slice(b"data");
        frame.push(PAYLOAD_MARKER);
        frame.extend_from_slice(payload);

        if msg_type == TYPE_CON {
            state.inflight.insert(
                msg_id,
                InflightRequest {
                    payload: payload.to_vec(),
                    retries: 0,
                    timestamp_ms: now_ms,
                },
            );
        }
        (frame, msg_id)
    }

    /// Command downlink as a 2.05 Content response; the token carries the
    /// gateway-assigned epoch so the device could correlate it with an
    /// outstanding observe.
    pub fn encode_downlink(&self, cmd_id: u16, epoch: u16, payload: &[u8]) -> Vec<u8> {
        let token = (epoch as u32).to_be_bytes();
        let tkl = token.len() as u8;
        let byte0 = (1 << 6) | (TYPE_ACK << 4) | (tkl & 0x0F);

        let mut frame = Vec::with_capacity(HEADER_SIZE + token.len() + 1 + payload.len());
        frame.push(byte0);
        frame.push(CODE_CONTENT);
        frame.extend_from_slice(&cmd_id.to_be_bytes());
        frame.extend_from_slice(&token);
        frame.push(PAYLOAD_MARKER);
        frame.extend_from_slice(payload);
        frame
    }

    /// Extract the command carried by a response. `None` for frames shorter
    /// than the fixed header; a frame without a payload marker decodes to no
    /// commands.
    pub fn decode_downlink(&self, data: &[u8]) -> Option<Vec<ParsedCommand>> {
        if data.len() < HEADER_SIZE {
            return None;
        }
        let byte0 = data[0];
        let code = data[1];
        let msg_id = u16::from_be_bytes([data[2], data[3]]);
        let tkl = (byte0 & 0x0F) as usize;

        let mut commands = Vec::new();
        let mut payload_start = HEADER_SIZE + tkl;
        let mut found_marker = false;
        for i in payload_start..data.len() {
            if data[i] == PAYLOAD_MARKER {
                payload_start = i + 1;
                found_marker = true;
                break;
            }
        }
        if found_marker && payload_start <= data.len() {
            commands.push(ParsedCommand {
                cmd_type: code,
                epoch: msg_id,
                payload: data[payload_start..].to_vec(),
            });
        }
        Some(commands)
    }

    /// Release an inflight CON transaction once its ACK arrives.
    pub fn ack_request(&self, state: &mut CoapDeviceState, msg_id: u16) -> bool {
        state.inflight.remove(&msg_id).is_some()
    }

    /// Header + token + minimal options + payload marker.
    pub fn overhead_bytes(&self) -> usize {
        HEADER_SIZE + TOKEN_SIZE + 5 + 1
    }

    /// An empty ACK is just the fixed header.
    pub fn ack_overhead(&self) -> usize {
        HEADER_SIZE
    }

    /// Expected number of transmissions to reach `reliability` with the
    /// nominal per-transmission success rate.
    pub fn expected_transmissions(&self, reliability: f64) -> f64 {
        let p_success = 0.95;
        if reliability <= p_success {
            return 1.0;
        }
        let n = ((1.0 - reliability).ln() / (1.0 - p_success).ln()).ceil() as u32;
        (0..n).map(|i| (1.0 - p_success).powi(i as i32)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoapConfig;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn protocol() -> CoapProtocol {
        CoapProtocol::new(&CoapConfig::default())
    }

    #[test]
    fn uplink_layout_is_byte_exact_for_con() {
        let protocol = protocol();
        let mut rng = StdRng::seed_from_u64(1);
        let mut state = protocol.create_device_state(&mut rng);
        let (frame, msg_id) =
            protocol.encode_uplink(&mut state, &[0x11], QosClass::Critical, 0, &mut rng);
        assert_eq!(msg_id, 1);
        // Ver 1, CON, TKL 4.
        assert_eq!(frame[0], 0x44);
        assert_eq!(frame[1], METHOD_POST);
        assert_eq!(&frame[2..4], &[0x00, 0x01]);
        assert_eq!(&frame[4..8], state.token.as_slice());
        assert_eq!(&frame[8..13], &[0xB4, b'd', b'a', b't', b'a']);
        assert_eq!(frame[13], PAYLOAD_MARKER);
        assert_eq!(&frame[14..], &[0x11]);
        assert!(state.inflight.contains_key(&1));
    }

    #[test]
    fn best_effort_is_non_confirmable_and_untracked() {
        let protocol = protocol();
        let mut rng = StdRng::seed_from_u64(2);
        let mut state = protocol.create_device_state(&mut rng);
        let (frame, _) =
            protocol.encode_uplink(&mut state, b"t", QosClass::BestEffort, 0, &mut rng);
        assert_eq!((frame[0] >> 4) & 0x03, TYPE_NON);
        assert!(state.inflight.is_empty());
    }

    #[test]
    fn downlink_roundtrip() {
        let protocol = protocol();
        let frame = protocol.encode_downlink(0x2233, 7, &[9, 8, 7]);
        assert_eq!(frame[0], 0x64); // Ver 1, ACK, TKL 4
        assert_eq!(frame[1], CODE_CONTENT);
        let commands = protocol.decode_downlink(&frame).unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].cmd_type, CODE_CONTENT);
        assert_eq!(commands[0].epoch, 0x2233);
        assert_eq!(commands[0].payload, vec![9, 8, 7]);
    }

    #[test]
    fn short_frame_is_a_decode_failure() {
        let protocol = protocol();
        assert!(protocol.decode_downlink(&[0x64, 0x45, 0x00]).is_none());
    }

    #[test]
    fn frame_without_payload_marker_has_no_commands() {
        let protocol = protocol();
        let frame = [0x64, 0x45, 0x00, 0x01, 1, 2, 3, 4];
        let commands = protocol.decode_downlink(&frame).unwrap();
        assert!(commands.is_empty());
    }

    #[test]
    fn ack_releases_inflight_transaction() {
        let protocol = protocol();
        let mut rng = StdRng::seed_from_u64(3);
        let mut state = protocol.create_device_state(&mut rng);
        let (_, msg_id) = protocol.encode_uplink(&mut state, b"x", QosClass::Critical, 0, &mut rng);
        assert!(protocol.ack_request(&mut state, msg_id));
        assert!(state.inflight.is_empty());
    }

    #[test]
    fn state_size_reflects_session_contents() {
        let protocol = protocol();
        let mut rng = StdRng::seed_from_u64(4);
        let mut state = protocol.create_device_state(&mut rng);
        assert_eq!(state.state_size(), 16);
        protocol.encode_uplink(&mut state, b"x", QosClass::Critical, 0, &mut rng);
        state
            .observe_tokens
            .insert("/cfg".to_string(), state.token.clone());
        assert_eq!(state.state_size(), 16 + 30 + 20);
    }

    #[test]
    fn expected_transmissions_grows_with_reliability() {
        let protocol = protocol();
        assert_eq!(protocol.expected_transmissions(0.90), 1.0);
        let high = protocol.expected_transmissions(0.999);
        assert!(high > 1.0 && high < 1.2);
    }

    #[test]
    fn overhead_accounting() {
        let protocol = protocol();
        assert_eq!(protocol.overhead_bytes(), 14);
        assert_eq!(protocol.ack_overhead(), 4);
    }
}
