//! Gateway: server-side session state, the downlink command scheduler, and
//! the windowed-bitmap ACK tracker.
//!
//! The gateway owns everything a device cannot afford to keep: per-device
//! sessions (token, last uplink sequence, command epochs), the
//! priority+deadline command queues, and the set of uplinks still awaiting
//! acknowledgment. Downlinks are only ever emitted during the receive window
//! that follows an uplink: the command pull slot.

use crate::config::{GatewayConfig, QosClassConfig};
use crate::protocols::novel::NovelCommand;
use crate::protocols::{Priority, ProtocolId, QosClass};
use crate::simulation::metrics::MetricsCollector;
use crate::simulation::types::{Direction, NodeRef, Packet, PendingCommand};
use crate::simulation::ProtocolSet;
use std::collections::{BTreeMap, BTreeSet};

/// Command payload budget per downlink, shared by all protocols.
pub const MAX_CMD_PAYLOAD_PER_DOWNLINK: usize = 50;

/// Commands aggregated per NOVEL downlink; baselines carry one each.
pub const NOVEL_CMD_BUDGET: usize = 3;

/// Priority+deadline scheduler for downlink commands.
///
/// Per-device queues are kept sorted by `(priority, deadline, insertion)`;
/// on overflow the queue keeps the best `queue_size` entries under the same
/// comparator and counts the evictions.
#[derive(Debug, Default)]
pub struct CommandScheduler {
    queue_size: usize,
    queues: BTreeMap<u32, Vec<PendingCommand>>,
    pub cmd_counter: u64,
    insertion_counter: u64,
    pub evicted: u64,
}

impl CommandScheduler {
    pub fn new(queue_size: usize) -> Self {
        Self {
            queue_size,
            ..Self::default()
        }
    }

    /// Insert in scheduling order. Stamps the insertion tie-break.
    pub fn enqueue(&mut self, mut cmd: PendingCommand) {
        cmd.insertion_order = self.insertion_counter;
        self.insertion_counter += 1;
        let queue = self.queues.entry(cmd.device_id).or_default();
        let position = queue.partition_point(|c| c.schedule_key() <= cmd.schedule_key());
        queue.insert(position, cmd);
        if queue.len() > self.queue_size {
            queue.truncate(self.queue_size);
            self.evicted += 1;
        }
    }

    /// Pop up to `budget` commands for one device and protocol whose total
    /// wire size fits in `max_payload`, best-first. Expired entries are
    /// skipped (the sweeper reclaims them).
    pub fn get_commands_for_device(
        &mut self,
        device_id: u32,
        budget: usize,
        now_ms: u64,
        max_payload: usize,
        protocol: ProtocolId,
    ) -> Vec<PendingCommand> {
        let Some(queue) = self.queues.get_mut(&device_id) else {
            return Vec::new();
        };
        let mut selected_ids = BTreeSet::new();
        let mut selected = Vec::new();
        let mut remaining_payload = max_payload;
        for cmd in queue.iter() {
            if selected.len() >= budget {
                break;
            }
            if cmd.protocol != protocol || cmd.expired(now_ms) {
                continue;
            }
            if cmd.wire_size() <= remaining_payload {
                remaining_payload -= cmd.wire_size();
                selected_ids.insert(cmd.cmd_id);
                selected.push(cmd.clone());
            }
        }
        queue.retain(|c| !selected_ids.contains(&c.cmd_id));
        selected
    }

    /// Give a command another chance after a failed downlink. Returns false
    /// (dropping it) once the retry budget or deadline is spent.
    pub fn requeue_failed(&mut self, mut cmd: PendingCommand, now_ms: u64) -> bool {
        if cmd.retries < cmd.max_retries && cmd.deadline_ms > now_ms {
            cmd.retries += 1;
            self.enqueue(cmd);
            true
        } else {
            false
        }
    }

    /// Remove entries past their deadline, returning them for accounting.
    pub fn reap_expired(&mut self, now_ms: u64) -> Vec<PendingCommand> {
        let mut expired = Vec::new();
        for queue in self.queues.values_mut() {
            let mut keep = Vec::with_capacity(queue.len());
            for cmd in queue.drain(..) {
                if cmd.expired(now_ms) {
                    expired.push(cmd);
                } else {
                    keep.push(cmd);
                }
            }
            *queue = keep;
        }
        expired
    }

    pub fn queued_for_device(&self, device_id: u32) -> &[PendingCommand] {
        self.queues.get(&device_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Outstanding-uplink tracker feeding the windowed bitmap ACK.
#[derive(Debug, Default)]
pub struct AckTracker {
    window_size: u16,
    /// device → (uplink seq → receive timestamp).
    pending: BTreeMap<u32, BTreeMap<u16, u64>>,
}

impl AckTracker {
    pub fn new(window_size: u16) -> Self {
        Self {
            window_size,
            pending: BTreeMap::new(),
        }
    }

    pub fn add_pending(&mut self, device_id: u32, seq: u16, timestamp_ms: u64) {
        self.pending
            .entry(device_id)
            .or_default()
            .insert(seq, timestamp_ms);
    }

    /// Build `(base, bitmap)` over the device's outstanding uplinks: base is
    /// the oldest, bit `i` acknowledges `(base + i) mod 2^16` when the
    /// offset fits the window. `(0, 0)` when nothing is outstanding.
    pub fn generate_ack_bitmap(&self, device_id: u32) -> (u16, u16) {
        let Some(pending) = self.pending.get(&device_id) else {
            return (0, 0);
        };
        let Some(&base) = pending.keys().min() else {
            return (0, 0);
        };
        let mut bitmap: u16 = 0;
        for &seq in pending.keys() {
            let offset = seq.wrapping_sub(base);
            if offset < self.window_size {
                bitmap |= 1 << offset;
            }
        }
        (base, bitmap)
    }

    /// Clear seqs covered by an announced `(base, bitmap)` pair.
    pub fn mark_acked(&mut self, device_id: u32, base: u16, bitmap: u16) {
        let Some(pending) = self.pending.get_mut(&device_id) else {
            return;
        };
        for offset in 0..self.window_size {
            if bitmap & (1 << offset) != 0 {
                pending.remove(&base.wrapping_add(offset));
            }
        }
    }

    pub fn outstanding(&self, device_id: u32) -> usize {
        self.pending.get(&device_id).map(BTreeMap::len).unwrap_or(0)
    }
}

/// Gateway's view of one device, phased by how much it has proven:
/// a first valid uplink makes it Seen, a first assigned epoch makes it
/// Active, idle timeout demotes back to Unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unknown,
    Seen,
    Active,
}

/// Server-side session for the NOVEL protocol: the state the device refuses
/// to carry.
#[derive(Debug)]
pub struct GatewaySession {
    pub token_short: u8,
    pub last_seq_uplink: u16,
    pub last_seen_ms: u64,
    pub uplink_seen: bool,
    pub phase: SessionPhase,
    /// cmd_type → most recently assigned epoch; the gateway is the source
    /// of truth for the next one.
    pub epochs: BTreeMap<u8, u8>,
    /// Topic classes this device has published on.
    pub subscriptions: BTreeSet<u8>,
    /// cmd_ids currently carried by an in-flight downlink.
    pub inflight: BTreeSet<u64>,
}

impl GatewaySession {
    fn new() -> Self {
        Self {
            token_short: 0,
            last_seq_uplink: 0,
            last_seen_ms: 0,
            uplink_seen: false,
            phase: SessionPhase::Unknown,
            epochs: BTreeMap::new(),
            subscriptions: BTreeSet::new(),
            inflight: BTreeSet::new(),
        }
    }

    fn update_phase(&mut self) {
        self.phase = if !self.uplink_seen {
            SessionPhase::Unknown
        } else if self.epochs.is_empty() {
            SessionPhase::Seen
        } else {
            SessionPhase::Active
        };
    }
}

/// A downlink the gateway decided to emit, with the commands it carries so
/// the transfer task can confirm or requeue them.
#[derive(Debug)]
pub struct DownlinkPlan {
    pub packet: Packet,
    pub commands: Vec<PendingCommand>,
}

pub struct Gateway {
    pub scheduler: CommandScheduler,
    pub ack_tracker: AckTracker,
    pub sessions: BTreeMap<u32, GatewaySession>,
    /// Last `(base, bitmap)` announced per device, cleared (and the covered
    /// seqs released) when the device's next uplink implicitly confirms it.
    announced_acks: BTreeMap<u32, (u16, u16)>,
    qos_classes: Vec<QosClassConfig>,
    idle_timeout_ms: u64,
    mqtt_bridge_enabled: bool,
    mqtt_qos_mapping: BTreeMap<String, u8>,
    pub uplink_count: u64,
    pub downlink_count: u64,
    pub commands_delivered: u64,
    pub commands_expired: u64,
}

impl Gateway {
    pub fn new(
        config: &GatewayConfig,
        ack_window_size: u16,
        qos_classes: Vec<QosClassConfig>,
    ) -> Self {
        Self {
            scheduler: CommandScheduler::new(config.queue_size),
            ack_tracker: AckTracker::new(ack_window_size),
            sessions: BTreeMap::new(),
            announced_acks: BTreeMap::new(),
            qos_classes,
            idle_timeout_ms: (config.idle_timeout_s * 1_000.0) as u64,
            mqtt_bridge_enabled: config.mqtt_bridge.enabled,
            mqtt_qos_mapping: config.mqtt_bridge.qos_mapping.clone(),
            uplink_count: 0,
            downlink_count: 0,
            commands_delivered: 0,
            commands_expired: 0,
        }
    }

    /// Handle one received uplink and decide what to push back during the
    /// device's receive window.
    pub fn receive_uplink(
        &mut self,
        packet: &Packet,
        now_ms: u64,
        protocols: &ProtocolSet,
        metrics: &mut MetricsCollector,
    ) -> Vec<DownlinkPlan> {
        self.uplink_count += 1;
        let device_id = packet.device_id();

        log::debug!(
            "gateway: uplink from device {} proto={} seq={}",
            device_id,
            packet.protocol,
            packet.seq
        );

        if packet.protocol == ProtocolId::NovelLpwan {
            self.handle_novel_uplink(packet, device_id, now_ms);
        }
        self.forward_to_mqtt(device_id, packet);

        metrics.record_gateway_rx(packet);

        self.schedule_downlink_opportunity(device_id, packet.protocol, now_ms, protocols)
    }

    /// NOVEL bookkeeping: session upsert, implicit ACK confirmation, and
    /// registration of the new uplink in the ACK window.
    fn handle_novel_uplink(&mut self, packet: &Packet, device_id: u32, now_ms: u64) {
        let session = self
            .sessions
            .entry(device_id)
            .or_insert_with(GatewaySession::new);
        session.uplink_seen = true;
        session.last_seq_uplink = packet.seq;
        session.last_seen_ms = now_ms;
        if let Some(header_token) = packet.payload.get(4) {
            session.token_short = *header_token;
        }
        if let Some(byte0) = packet.payload.first() {
            session.subscriptions.insert(byte0 & 0x07);
        }
        session.update_phase();

        // A fresh uplink proves the device heard the last announced bitmap.
        if let Some((base, bitmap)) = self.announced_acks.remove(&device_id) {
            self.ack_tracker.mark_acked(device_id, base, bitmap);
        }
        self.ack_tracker.add_pending(device_id, packet.seq, now_ms);
    }

    /// Simulated broker bridge: debug-log the forward with the mapped QoS.
    fn forward_to_mqtt(&self, device_id: u32, packet: &Packet) {
        if !self.mqtt_bridge_enabled {
            return;
        }
        let mqtt_qos = self
            .mqtt_qos_mapping
            .get(packet.qos_tag.as_str())
            .copied()
            .unwrap_or(0);
        log::debug!(
            "mqtt bridge: publish devices/{}/telemetry qos={} size={}",
            device_id,
            mqtt_qos,
            packet.size
        );
    }

    /// Fill the receive window: up to three aggregated commands plus the
    /// bitmap ACK for NOVEL, one bare command frame for a baseline.
    fn schedule_downlink_opportunity(
        &mut self,
        device_id: u32,
        protocol: ProtocolId,
        now_ms: u64,
        protocols: &ProtocolSet,
    ) -> Vec<DownlinkPlan> {
        let budget = if protocol == ProtocolId::NovelLpwan {
            NOVEL_CMD_BUDGET
        } else {
            1
        };
        let commands = self.scheduler.get_commands_for_device(
            device_id,
            budget,
            now_ms,
            MAX_CMD_PAYLOAD_PER_DOWNLINK,
            protocol,
        );
        if commands.is_empty() {
            return Vec::new();
        }

        let mut plans = Vec::new();
        match protocol {
            ProtocolId::NovelLpwan => {
                let Some(novel) = protocols.novel.as_ref() else {
                    return Vec::new();
                };
                let (ack_base, ack_bitmap) = self.ack_tracker.generate_ack_bitmap(device_id);
                let wire_commands: Vec<NovelCommand> = commands
                    .iter()
                    .map(|cmd| NovelCommand {
                        cmd_type: cmd.cmd_type,
                        epoch: cmd.epoch,
                        payload: cmd.payload.clone(),
                    })
                    .collect();
                let frame = novel.encode_downlink(&wire_commands, ack_base, ack_bitmap);
                let mut packet = Packet::new(
                    0,
                    NodeRef::Gateway,
                    NodeRef::Device(device_id),
                    ProtocolId::NovelLpwan,
                    Direction::Downlink,
                    frame,
                    now_ms,
                );
                packet.seq = ack_base;
                packet.ack_base = ack_base;
                packet.ack_bitmap = ack_bitmap;
                packet.priority = commands
                    .iter()
                    .map(|c| c.priority)
                    .min()
                    .unwrap_or(Priority::Normal);
                if ack_bitmap != 0 {
                    self.announced_acks.insert(device_id, (ack_base, ack_bitmap));
                }
                plans.push(DownlinkPlan { packet, commands });
            }
            ProtocolId::MqttSn => {
                let Some(mqtt_sn) = protocols.mqtt_sn.as_ref() else {
                    return Vec::new();
                };
                for cmd in commands {
                    let frame =
                        mqtt_sn.encode_downlink(cmd.cmd_type, cmd.epoch as u16, &cmd.payload);
                    let mut packet = Packet::new(
                        0,
                        NodeRef::Gateway,
                        NodeRef::Device(device_id),
                        ProtocolId::MqttSn,
                        Direction::Downlink,
                        frame,
                        now_ms,
                    );
                    packet.priority = cmd.priority;
                    packet.epoch = cmd.epoch;
                    plans.push(DownlinkPlan {
                        packet,
                        commands: vec![cmd],
                    });
                }
            }
            ProtocolId::Coap => {
                let Some(coap) = protocols.coap.as_ref() else {
                    return Vec::new();
                };
                for cmd in commands {
                    let frame = coap.encode_downlink(
                        (cmd.cmd_id & 0xFFFF) as u16,
                        cmd.epoch as u16,
                        &cmd.payload,
                    );
                    let mut packet = Packet::new(
                        0,
                        NodeRef::Gateway,
                        NodeRef::Device(device_id),
                        ProtocolId::Coap,
                        Direction::Downlink,
                        frame,
                        now_ms,
                    );
                    packet.priority = cmd.priority;
                    packet.epoch = cmd.epoch;
                    plans.push(DownlinkPlan {
                        packet,
                        commands: vec![cmd],
                    });
                }
            }
        }

        for plan in &plans {
            self.downlink_count += 1;
            let session = self
                .sessions
                .entry(device_id)
                .or_insert_with(GatewaySession::new);
            for cmd in &plan.commands {
                session.inflight.insert(cmd.cmd_id);
            }
        }
        plans
    }

    /// Queue a command for delivery. The gateway assigns the next epoch for
    /// the device's cmd_type; the QoS class name sets the retry budget.
    pub fn queue_command(
        &mut self,
        device_id: u32,
        cmd_type: u8,
        payload: Vec<u8>,
        qos: QosClass,
        deadline_s: f64,
        prob_target: f64,
        protocol: ProtocolId,
        now_ms: u64,
    ) {
        let session = self
            .sessions
            .entry(device_id)
            .or_insert_with(GatewaySession::new);
        let epoch_slot = session.epochs.entry(cmd_type).or_insert(0);
        let epoch = epoch_slot.wrapping_add(1);
        *epoch_slot = epoch;
        session.update_phase();

        let max_retries = self
            .qos_classes
            .iter()
            .find(|qc| qc.name == qos.as_str())
            .map(|qc| qc.retries)
            .unwrap_or(2);

        let cmd = PendingCommand {
            cmd_id: self.scheduler.cmd_counter,
            device_id,
            protocol,
            cmd_type,
            payload,
            epoch,
            priority: qos.priority(),
            deadline_ms: now_ms + (deadline_s * 1_000.0) as u64,
            created_ms: now_ms,
            prob_target,
            retries: 0,
            max_retries,
            insertion_order: 0,
        };
        self.scheduler.cmd_counter += 1;
        log::debug!(
            "gateway: queued cmd {} for device {} proto={} type={} epoch={}",
            cmd.cmd_id,
            device_id,
            protocol,
            cmd_type,
            epoch
        );
        self.scheduler.enqueue(cmd);
    }

    /// A downlink finished. Confirms or requeues the carried commands.
    pub fn downlink_completed(
        &mut self,
        device_id: u32,
        commands: Vec<PendingCommand>,
        delivered: bool,
        now_ms: u64,
    ) {
        if let Some(session) = self.sessions.get_mut(&device_id) {
            for cmd in &commands {
                session.inflight.remove(&cmd.cmd_id);
            }
        }
        for cmd in commands {
            if delivered {
                self.commands_delivered += 1;
            } else {
                let cmd_id = cmd.cmd_id;
                if !self.scheduler.requeue_failed(cmd, now_ms) {
                    log::debug!("gateway: cmd {} dropped after failed downlink", cmd_id);
                }
            }
        }
    }

    /// Periodic sweep: reap expired commands and demote idle sessions.
    pub fn sweep(&mut self, now_ms: u64, metrics: &mut MetricsCollector) {
        for cmd in self.scheduler.reap_expired(now_ms) {
            self.commands_expired += 1;
            metrics.record_command_expired(now_ms - cmd.created_ms);
        }
        if self.idle_timeout_ms > 0 {
            for session in self.sessions.values_mut() {
                if session.phase != SessionPhase::Unknown
                    && now_ms.saturating_sub(session.last_seen_ms) >= self.idle_timeout_ms
                {
                    session.uplink_seen = false;
                    session.update_phase();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(
        cmd_id: u64,
        device_id: u32,
        priority: Priority,
        deadline_ms: u64,
        payload_len: usize,
    ) -> PendingCommand {
        PendingCommand {
            cmd_id,
            device_id,
            protocol: ProtocolId::NovelLpwan,
            cmd_type: 0,
            payload: vec![0u8; payload_len],
            epoch: 1,
            priority,
            deadline_ms,
            created_ms: 0,
            prob_target: 0.9,
            retries: 0,
            max_retries: 2,
            insertion_order: 0,
        }
    }

    #[test]
    fn scheduler_extracts_by_priority_then_deadline() {
        let mut scheduler = CommandScheduler::new(100);
        scheduler.enqueue(command(1, 0, Priority::BestEffort, 5_000, 4));
        scheduler.enqueue(command(2, 0, Priority::Critical, 9_000, 4));
        scheduler.enqueue(command(3, 0, Priority::Critical, 1_000, 4));
        let selected =
            scheduler.get_commands_for_device(0, 3, 0, 100, ProtocolId::NovelLpwan);
        let ids: Vec<u64> = selected.iter().map(|c| c.cmd_id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert!(scheduler.queued_for_device(0).is_empty());
    }

    #[test]
    fn scheduler_equal_keys_extract_in_insertion_order() {
        let mut scheduler = CommandScheduler::new(100);
        for cmd_id in 0..5 {
            scheduler.enqueue(command(cmd_id, 0, Priority::Normal, 1_000, 0));
        }
        let selected = scheduler.get_commands_for_device(0, 5, 0, 100, ProtocolId::NovelLpwan);
        let ids: Vec<u64> = selected.iter().map(|c| c.cmd_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn scheduler_respects_budget_and_payload_limit() {
        let mut scheduler = CommandScheduler::new(100);
        // wire size 24 each (20 + 4 overhead); only two fit in 50 bytes.
        for cmd_id in 0..4 {
            scheduler.enqueue(command(cmd_id, 0, Priority::Normal, 1_000, 20));
        }
        let selected = scheduler.get_commands_for_device(0, 3, 0, 50, ProtocolId::NovelLpwan);
        assert_eq!(selected.len(), 2);
        assert_eq!(scheduler.queued_for_device(0).len(), 2);
    }

    #[test]
    fn scheduler_skips_other_protocols_and_expired() {
        let mut scheduler = CommandScheduler::new(100);
        let mut mqtt_cmd = command(1, 0, Priority::Critical, 1_000, 4);
        mqtt_cmd.protocol = ProtocolId::MqttSn;
        scheduler.enqueue(mqtt_cmd);
        scheduler.enqueue(command(2, 0, Priority::Normal, 500, 4));
        scheduler.enqueue(command(3, 0, Priority::Normal, 5_000, 4));
        let selected =
            scheduler.get_commands_for_device(0, 3, 1_000, 100, ProtocolId::NovelLpwan);
        let ids: Vec<u64> = selected.iter().map(|c| c.cmd_id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn scheduler_overflow_keeps_best_entries() {
        let queue_size = 10;
        let mut scheduler = CommandScheduler::new(queue_size);
        // Fill with best-effort far-deadline entries, then add criticals.
        for cmd_id in 0..queue_size as u64 {
            scheduler.enqueue(command(cmd_id, 0, Priority::BestEffort, 1_000_000, 0));
        }
        for cmd_id in 100..105 {
            scheduler.enqueue(command(cmd_id, 0, Priority::Critical, 10_000, 0));
        }
        assert_eq!(scheduler.evicted, 5);
        let queue = scheduler.queued_for_device(0);
        assert_eq!(queue.len(), queue_size);
        assert_eq!(
            queue.iter().filter(|c| c.priority == Priority::Critical).count(),
            5
        );
    }

    #[test]
    fn requeue_respects_retry_budget_and_deadline() {
        let mut scheduler = CommandScheduler::new(10);
        let mut cmd = command(1, 0, Priority::Normal, 1_000, 0);
        cmd.max_retries = 1;
        assert!(scheduler.requeue_failed(cmd.clone(), 0));
        cmd.retries = 1;
        assert!(!scheduler.requeue_failed(cmd.clone(), 0));
        cmd.retries = 0;
        assert!(!scheduler.requeue_failed(cmd, 2_000));
    }

    #[test]
    fn reap_returns_only_expired() {
        let mut scheduler = CommandScheduler::new(10);
        scheduler.enqueue(command(1, 0, Priority::Normal, 100, 0));
        scheduler.enqueue(command(2, 0, Priority::Normal, 10_000, 0));
        let expired = scheduler.reap_expired(5_000);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].cmd_id, 1);
        assert_eq!(scheduler.queued_for_device(0).len(), 1);
    }

    #[test]
    fn ack_tracker_bitmap_covers_window() {
        let mut tracker = AckTracker::new(16);
        assert_eq!(tracker.generate_ack_bitmap(7), (0, 0));
        tracker.add_pending(7, 100, 0);
        tracker.add_pending(7, 101, 1);
        tracker.add_pending(7, 103, 2);
        // Offset 30 is outside the window; not representable.
        tracker.add_pending(7, 130, 3);
        let (base, bitmap) = tracker.generate_ack_bitmap(7);
        assert_eq!(base, 100);
        assert_eq!(bitmap, 0b1011);
    }

    #[test]
    fn ack_tracker_handles_seq_wraparound() {
        let mut tracker = AckTracker::new(16);
        tracker.add_pending(1, 65_534, 0);
        tracker.add_pending(1, 65_535, 1);
        tracker.add_pending(1, 0, 2);
        // Plain min is 0; 65534/65535 sit outside the window from base 0,
        // so only bit 0 is set.
        let (base, bitmap) = tracker.generate_ack_bitmap(1);
        assert_eq!(base, 0);
        assert_eq!(bitmap, 0b1);
        tracker.mark_acked(1, base, bitmap);
        assert_eq!(tracker.outstanding(1), 2);
    }

    #[test]
    fn mark_acked_clears_covered_seqs() {
        let mut tracker = AckTracker::new(16);
        for seq in 10..14 {
            tracker.add_pending(2, seq, 0);
        }
        tracker.mark_acked(2, 10, 0b0101);
        assert_eq!(tracker.outstanding(2), 2);
        let (base, bitmap) = tracker.generate_ack_bitmap(2);
        assert_eq!(base, 11);
        assert_eq!(bitmap, 0b101);
    }
}
