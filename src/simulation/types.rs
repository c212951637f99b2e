//! Type definitions shared across the simulation.
//!
//! Contains the packet record every transmission passes through, the pending
//! command entry the gateway scheduler queues, and the small shared enums
//! (direction, link rate, node reference).

use crate::protocols::{Priority, ProtocolId, QosClass};

/// Milliseconds in the one-hour windows used for duty cycle and rates.
pub const MS_PER_HOUR: u64 = 3_600_000;

/// Transfer direction of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Uplink,
    Downlink,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Uplink => "uplink",
            Direction::Downlink => "downlink",
        }
    }
}

/// Endpoint of a transmission. Devices are addressed by index into the
/// coordinator's arena; the gateway is a singleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef {
    Device(u32),
    Gateway,
}

/// Modulation parameter the channel picked for a transmission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LinkRate {
    /// Long-range channel: LoRa spreading factor.
    SpreadingFactor(u8),
    /// Narrow-band channel: link rate in kbps.
    RateKbps(f64),
}

/// One radio transmission. Created by a codec (uplink) or the gateway
/// (downlink); the channel fills in `sf_or_rate`, `airtime_ms`, and
/// `delivered` exactly once during transmission.
#[derive(Debug, Clone)]
pub struct Packet {
    pub id: u64,
    pub src: NodeRef,
    pub dst: NodeRef,
    pub protocol: ProtocolId,
    pub direction: Direction,
    pub payload: Vec<u8>,
    /// Always `payload.len()`; kept separately so metrics rows survive
    /// payload release.
    pub size: usize,
    pub ts_ms: u64,
    pub qos_tag: QosClass,
    pub priority: Priority,
    pub seq: u16,
    pub ack_base: u16,
    pub ack_bitmap: u16,
    pub epoch: u8,
    pub sf_or_rate: Option<LinkRate>,
    pub airtime_ms: f64,
    pub delivered: bool,
    pub delivery_time_ms: u64,
    pub retries: u32,
}

impl Packet {
    pub fn new(
        id: u64,
        src: NodeRef,
        dst: NodeRef,
        protocol: ProtocolId,
        direction: Direction,
        payload: Vec<u8>,
        ts_ms: u64,
    ) -> Self {
        let size = payload.len();
        Self {
            id,
            src,
            dst,
            protocol,
            direction,
            payload,
            size,
            ts_ms,
            qos_tag: QosClass::Normal,
            priority: Priority::Normal,
            seq: 0,
            ack_base: 0,
            ack_bitmap: 0,
            epoch: 0,
            sf_or_rate: None,
            airtime_ms: 0.0,
            delivered: false,
            delivery_time_ms: 0,
            retries: 0,
        }
    }

    /// Device this transmission is attributed to in metrics.
    pub fn device_id(&self) -> u32 {
        let node = match self.direction {
            Direction::Uplink => self.src,
            Direction::Downlink => self.dst,
        };
        match node {
            NodeRef::Device(id) => id,
            NodeRef::Gateway => u32::MAX,
        }
    }
}

/// A downlink command waiting in the gateway scheduler.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub cmd_id: u64,
    pub device_id: u32,
    pub protocol: ProtocolId,
    pub cmd_type: u8,
    pub payload: Vec<u8>,
    pub epoch: u8,
    pub priority: Priority,
    pub deadline_ms: u64,
    pub created_ms: u64,
    pub prob_target: f64,
    pub retries: u32,
    pub max_retries: u32,
    /// Enqueue order; the final tie-break so extraction is stable.
    pub insertion_order: u64,
}

impl PendingCommand {
    /// Scheduler key: lowest priority number first, then earliest deadline,
    /// then enqueue order.
    pub fn schedule_key(&self) -> (Priority, u64, u64) {
        (self.priority, self.deadline_ms, self.insertion_order)
    }

    /// Bytes this command occupies in a downlink, including the per-command
    /// header overhead.
    pub fn wire_size(&self) -> usize {
        self.payload.len() + 4
    }

    pub fn expired(&self, now_ms: u64) -> bool {
        self.deadline_ms < now_ms
    }
}
