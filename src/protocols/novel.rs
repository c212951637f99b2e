//! LPWAN-native publish/subscribe codec.
//!
//! Design points, all visible in the wire format:
//! - Micro-session token: the device is mostly stateless; every uplink
//!   carries the token's LSB so the gateway (which owns the session) can
//!   prove continuity.
//! - Compact 5-byte header shared by uplinks and downlinks.
//! - Windowed bitmap ACK: a downlink acknowledges up to `ack_window_size`
//!   consecutive uplink sequence numbers in one 16-bit field.
//! - Epoch-based idempotent commands: each command carries a per-type 8-bit
//!   epoch assigned by the gateway; devices apply strictly newer epochs only.
//! - QoS-D: reliability is a (target probability, deadline) pair plus a
//!   retry budget, not a fixed ack handshake.

use crate::config::{NovelLpwanConfig, QosClassConfig};
use crate::protocols::{ParsedCommand, Priority, QosClass};
use rand::Rng;
use std::collections::BTreeMap;

/// Header size on the wire.
pub const HEADER_SIZE: usize = 5;

/// Bitmap ACK cost carried on a downlink: 2 bytes of bitmap plus the 16-bit
/// base reusing the header's seq field.
pub const ACK_OVERHEAD_BYTES: usize = 4;

/// Per-command framing in an aggregated downlink: type, epoch, length.
pub const COMMAND_HEADER_SIZE: usize = 3;

/// Frame purpose, 3 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    Telemetry = 0,
    CmdPull = 1,
    CmdResp = 2,
    AckBitmap = 3,
    Control = 4,
}

impl MsgType {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(MsgType::Telemetry),
            1 => Some(MsgType::CmdPull),
            2 => Some(MsgType::CmdResp),
            3 => Some(MsgType::AckBitmap),
            4 => Some(MsgType::Control),
            _ => None,
        }
    }
}

/// Predefined topic category, 3 bits. Replaces free-form topic strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TopicClass {
    Telemetry = 0,
    Alarm = 1,
    Config = 2,
    Firmware = 3,
    Status = 4,
    Cmd = 5,
    Ack = 6,
    Reserved = 7,
}

impl TopicClass {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => TopicClass::Telemetry,
            1 => TopicClass::Alarm,
            2 => TopicClass::Config,
            3 => TopicClass::Firmware,
            4 => TopicClass::Status,
            5 => TopicClass::Cmd,
            6 => TopicClass::Ack,
            _ => TopicClass::Reserved,
        }
    }
}

/// Compact 5-byte header.
///
/// ```text
/// byte 0:   [msg_type(3) | priority(2) | topic_class(3)]
/// bytes 1-2: seq (big-endian)
/// byte 3:   flags
/// byte 4:   token_short (LSB of the session token)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NovelHeader {
    pub msg_type: MsgType,
    pub priority: Priority,
    pub topic_class: TopicClass,
    pub seq: u16,
    pub flags: u8,
    pub token_short: u8,
}

impl NovelHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let byte0 = ((self.msg_type as u8 & 0x07) << 5)
            | ((self.priority.as_bits() & 0x03) << 3)
            | (self.topic_class as u8 & 0x07);
        let seq = self.seq.to_be_bytes();
        [byte0, seq[0], seq[1], self.flags, self.token_short]
    }

    /// Decode the leading 5 bytes. `None` for short frames or a reserved
    /// msg_type value.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_SIZE {
            return None;
        }
        let byte0 = data[0];
        Some(Self {
            msg_type: MsgType::from_bits((byte0 >> 5) & 0x07)?,
            priority: Priority::from_bits((byte0 >> 3) & 0x03),
            topic_class: TopicClass::from_bits(byte0 & 0x07),
            seq: u16::from_be_bytes([data[1], data[2]]),
            flags: data[3],
            token_short: data[4],
        })
    }
}

/// Device-side session state. The whole point of the protocol is that this
/// fits in a few dozen bytes: token, two sequence counters, flags, and one
/// epoch byte per command type.
#[derive(Debug, Clone)]
pub struct NovelDeviceState {
    pub session_token: Vec<u8>,
    pub next_seq_uplink: u16,
    pub next_seq_downlink_expected: u16,
    pub reliability_flags: u8,
    /// cmd_type → last applied epoch.
    pub epoch_ids: BTreeMap<u8, u8>,
}

impl NovelDeviceState {
    pub fn state_size(&self) -> usize {
        self.session_token.len() + 2 + 2 + 1 + self.epoch_ids.len()
    }
}

/// A command unpacked from an aggregated downlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NovelCommand {
    pub cmd_type: u8,
    pub epoch: u8,
    pub payload: Vec<u8>,
}

/// A fully decoded downlink frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NovelDownlink {
    pub header: NovelHeader,
    pub ack_base: u16,
    pub ack_bitmap: u16,
    pub commands: Vec<NovelCommand>,
}

/// Codec instance configured for one run.
#[derive(Debug, Clone)]
pub struct NovelProtocol {
    pub token_size: usize,
    pub ack_window_size: u16,
    qos_classes: Vec<QosClassConfig>,
}

impl NovelProtocol {
    pub fn new(config: &NovelLpwanConfig) -> Self {
        Self {
            token_size: config.token_size_bytes,
            ack_window_size: config.ack_window_size,
            qos_classes: config.qos_classes.clone(),
        }
    }

    /// Fresh device state with a randomly-seeded session token.
    pub fn create_device_state(&self, rng: &mut impl Rng) -> NovelDeviceState {
        let mut session_token = vec![0u8; self.token_size];
        rng.fill(session_token.as_mut_slice());
        NovelDeviceState {
            session_token,
            next_seq_uplink: 0,
            next_seq_downlink_expected: 0,
            reliability_flags: 0,
            epoch_ids: BTreeMap::new(),
        }
    }

    /// Retry budget for a QoS class name; the scheduler's default when the
    /// class is not configured.
    pub fn retries_for(&self, qos: QosClass) -> u32 {
        self.qos_classes
            .iter()
            .find(|qc| qc.name == qos.as_str())
            .map(|qc| qc.retries)
            .unwrap_or(2)
    }

    /// Telemetry uplink: header followed by the application payload. The
    /// caller advances `next_seq_uplink` once the frame has been handed to
    /// the radio.
    pub fn encode_uplink(&self, state: &NovelDeviceState, payload: &[u8], qos: QosClass) -> Vec<u8> {
        let header = NovelHeader {
            msg_type: MsgType::Telemetry,
            priority: qos.priority(),
            topic_class: TopicClass::Telemetry,
            seq: state.next_seq_uplink,
            flags: 0,
            token_short: state.session_token.last().copied().unwrap_or(0),
        };
        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(payload);
        frame
    }

    /// Aggregated downlink: header (seq field reused as `ack_base`), 16-bit
    /// ACK bitmap, then `{cmd_type, epoch, len, data}` per command.
    pub fn encode_downlink(
        &self,
        commands: &[NovelCommand],
        ack_base: u16,
        ack_bitmap: u16,
    ) -> Vec<u8> {
        let header = NovelHeader {
            msg_type: MsgType::CmdResp,
            priority: Priority::Normal,
            topic_class: TopicClass::Cmd,
            seq: ack_base,
            flags: 0,
            token_short: 0,
        };
        let body: usize = commands
            .iter()
            .map(|c| COMMAND_HEADER_SIZE + c.payload.len())
            .sum();
        let mut frame = Vec::with_capacity(HEADER_SIZE + 2 + body);
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(&ack_bitmap.to_be_bytes());
        for cmd in commands {
            frame.push(cmd.cmd_type);
            frame.push(cmd.epoch);
            frame.push(cmd.payload.len() as u8);
            frame.extend_from_slice(&cmd.payload);
        }
        frame
    }

    /// Parse a downlink frame. `None` when the frame is shorter than header
    /// plus bitmap; a truncated trailing command is dropped, commands parsed
    /// before it are kept.
    pub fn decode_downlink(&self, data: &[u8]) -> Option<NovelDownlink> {
        if data.len() < HEADER_SIZE + 2 {
            return None;
        }
        let header = NovelHeader::decode(data)?;
        let ack_bitmap = u16::from_be_bytes([data[HEADER_SIZE], data[HEADER_SIZE + 1]]);
        let mut commands = Vec::new();
        let mut offset = HEADER_SIZE + 2;
        while offset + COMMAND_HEADER_SIZE <= data.len() {
            let cmd_type = data[offset];
            let epoch = data[offset + 1];
            let len = data[offset + 2] as usize;
            offset += COMMAND_HEADER_SIZE;
            if offset + len > data.len() {
                break;
            }
            commands.push(NovelCommand {
                cmd_type,
                epoch,
                payload: data[offset..offset + len].to_vec(),
            });
            offset += len;
        }
        Some(NovelDownlink {
            header,
            ack_base: header.seq,
            ack_bitmap,
            commands,
        })
    }

    pub fn overhead_bytes(&self) -> usize {
        HEADER_SIZE
    }

    /// Bitmap ACK cost amortized over the uplinks it acknowledges.
    pub fn effective_ack_overhead(&self, messages_acked: u32) -> f64 {
        if messages_acked == 0 {
            return 0.0;
        }
        ACK_OVERHEAD_BYTES as f64 / messages_acked as f64
    }
}

impl From<&NovelCommand> for ParsedCommand {
    fn from(cmd: &NovelCommand) -> Self {
        ParsedCommand {
            cmd_type: cmd.cmd_type,
            epoch: cmd.epoch as u16,
            payload: cmd.payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NovelLpwanConfig;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn protocol() -> NovelProtocol {
        NovelProtocol::new(&NovelLpwanConfig::default())
    }

    #[test]
    fn header_roundtrip() {
        let header = NovelHeader {
            msg_type: MsgType::CmdResp,
            priority: Priority::Critical,
            topic_class: TopicClass::Firmware,
            seq: 0xBEEF,
            flags: 0x5A,
            token_short: 0x17,
        };
        let bytes = header.encode();
        assert_eq!(NovelHeader::decode(&bytes), Some(header));
    }

    #[test]
    fn header_layout_is_byte_exact() {
        let header = NovelHeader {
            msg_type: MsgType::Telemetry,
            priority: Priority::Normal,
            topic_class: TopicClass::Telemetry,
            seq: 0x0102,
            flags: 0,
            token_short: 0xFF,
        };
        // msg_type=0, prio=1, topic=0 → byte0 = 0b000_01_000
        assert_eq!(header.encode(), [0x08, 0x01, 0x02, 0x00, 0xFF]);
    }

    #[test]
    fn short_or_reserved_headers_rejected() {
        assert_eq!(NovelHeader::decode(&[0x00; 4]), None);
        // msg_type bits 7 (reserved)
        assert_eq!(NovelHeader::decode(&[0xE0, 0, 0, 0, 0]), None);
    }

    #[test]
    fn uplink_carries_seq_and_token_lsb() {
        let protocol = protocol();
        let mut rng = StdRng::seed_from_u64(7);
        let mut state = protocol.create_device_state(&mut rng);
        state.next_seq_uplink = 41;
        let frame = protocol.encode_uplink(&state, b"payload", QosClass::BestEffort);
        let header = NovelHeader::decode(&frame).unwrap();
        assert_eq!(header.seq, 41);
        assert_eq!(header.token_short, *state.session_token.last().unwrap());
        assert_eq!(&frame[HEADER_SIZE..], b"payload");
    }

    #[test]
    fn downlink_roundtrip_with_commands() {
        let protocol = protocol();
        let commands = vec![
            NovelCommand {
                cmd_type: 2,
                epoch: 9,
                payload: vec![1, 2, 3],
            },
            NovelCommand {
                cmd_type: 5,
                epoch: 1,
                payload: vec![],
            },
        ];
        let frame = protocol.encode_downlink(&commands, 100, 0b1011);
        let decoded = protocol.decode_downlink(&frame).unwrap();
        assert_eq!(decoded.ack_base, 100);
        assert_eq!(decoded.ack_bitmap, 0b1011);
        assert_eq!(decoded.commands, commands);
    }

    #[test]
    fn truncated_trailing_command_is_dropped() {
        let protocol = protocol();
        let commands = vec![NovelCommand {
            cmd_type: 1,
            epoch: 1,
            payload: vec![0xAA; 8],
        }];
        let mut frame = protocol.encode_downlink(&commands, 0, 0);
        // Append a command header claiming 10 bytes of data that are absent.
        frame.extend_from_slice(&[3, 2, 10]);
        let decoded = protocol.decode_downlink(&frame).unwrap();
        assert_eq!(decoded.commands, commands);
    }

    #[test]
    fn frame_shorter_than_header_plus_bitmap_is_a_decode_failure() {
        let protocol = protocol();
        assert!(protocol.decode_downlink(&[0x40, 0, 0, 0, 0, 0]).is_none());
    }

    #[test]
    fn device_state_stays_compact() {
        let protocol = protocol();
        let mut rng = StdRng::seed_from_u64(3);
        let mut state = protocol.create_device_state(&mut rng);
        for cmd_type in 0..8 {
            state.epoch_ids.insert(cmd_type, 1);
        }
        // token(12) + seqs(4) + flags(1) + 8 epochs
        assert_eq!(state.state_size(), 25);
        assert!(state.state_size() <= 32);
    }

    #[test]
    fn effective_ack_overhead_amortizes() {
        let protocol = protocol();
        assert_eq!(protocol.overhead_bytes(), 5);
        assert_eq!(protocol.effective_ack_overhead(0), 0.0);
        assert_eq!(protocol.effective_ack_overhead(1), 4.0);
        assert_eq!(protocol.effective_ack_overhead(16), 0.25);
    }

    #[test]
    fn retry_budgets_follow_qos_classes() {
        let protocol = protocol();
        assert_eq!(protocol.retries_for(QosClass::Critical), 3);
        assert_eq!(protocol.retries_for(QosClass::Normal), 2);
        assert_eq!(protocol.retries_for(QosClass::BestEffort), 0);
    }
}
