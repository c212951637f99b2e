//! Metrics collection and export.
//!
//! The collector streams per-transmission records and running per-protocol
//! aggregates during the run, takes periodic snapshots after the warmup,
//! derives the comparison KPIs at finalize time, and renders the artifact
//! files (`summary.yaml`, `metrics.csv`, `protocol_comparison.csv`).

use crate::protocols::{ProtocolId, QosClass};
use crate::simulation::types::{Direction, Packet};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

/// One transmission, as exported to `metrics.csv`.
#[derive(Debug, Clone)]
pub struct TransmissionRecord {
    pub timestamp_ms: u64,
    pub device_id: u32,
    pub protocol: ProtocolId,
    pub direction: Direction,
    pub packet_size: usize,
    pub airtime_ms: f64,
    pub success: bool,
    pub seq: u16,
    pub qos_class: QosClass,
    pub energy_mj: f64,
}

/// Running per-protocol totals; the `delivery_rate`..`ack_efficiency`
/// fields are derived once at finalize.
#[derive(Debug, Clone, Default)]
pub struct ProtocolAggregates {
    pub uplink_success: u64,
    pub uplink_failed: u64,
    pub downlink_success: u64,
    pub downlink_failed: u64,
    pub uplink_bytes: u64,
    pub downlink_bytes: u64,
    pub uplink_airtime_ms: f64,
    pub downlink_airtime_ms: f64,
    pub tx_count: u64,
    pub rx_count: u64,
    pub total_energy_mj: f64,
    pub rx_energy_mj: f64,
    pub commands_applied: u64,
    pub cmd_latency_sum_ms: f64,
    pub cmd_latency_count: u64,
    pub acks_sent: u64,
    pub bits_acked: u64,
    pub acks_received: u64,
    pub gateway_rx_count: u64,
    pub gateway_rx_bytes: u64,
    pub gateway_tx_count: u64,
    pub gateway_tx_bytes: u64,
    pub decode_failed: u64,

    pub delivery_rate: f64,
    pub avg_cmd_latency_ms: f64,
    pub energy_per_msg_mj: f64,
    pub ack_efficiency: f64,
}

/// Point-in-time copy of all aggregates.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub timestamp_ms: u64,
    pub aggregates: BTreeMap<ProtocolId, ProtocolAggregates>,
}

/// Per-protocol row of `summary.yaml` and `protocol_comparison.csv`.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryMetrics {
    pub delivery_rate: f64,
    pub avg_cmd_latency_ms: f64,
    pub energy_per_msg_mj: f64,
    pub uplink_bytes: u64,
    pub downlink_bytes: u64,
    pub total_airtime_ms: f64,
    pub commands_applied: u64,
    pub ack_efficiency: f64,
}

pub struct MetricsCollector {
    warmup_ms: u64,
    pub collect_interval_ms: u64,
    transmissions: Vec<TransmissionRecord>,
    pub aggregates: BTreeMap<ProtocolId, ProtocolAggregates>,
    /// (device, protocol) → energy spent transmitting/receiving, mJ.
    device_energy: BTreeMap<(u32, ProtocolId), f64>,
    pub commands_expired: u64,
    pub snapshots: Vec<Snapshot>,
}

impl MetricsCollector {
    pub fn new(warmup_ms: u64, collect_interval_ms: u64) -> Self {
        Self {
            warmup_ms,
            collect_interval_ms,
            transmissions: Vec::new(),
            aggregates: BTreeMap::new(),
            device_energy: BTreeMap::new(),
            commands_expired: 0,
            snapshots: Vec::new(),
        }
    }

    fn agg(&mut self, protocol: ProtocolId) -> &mut ProtocolAggregates {
        self.aggregates.entry(protocol).or_default()
    }

    /// Record one finished transmission. `energy_mj` is the radio energy
    /// attributable to the device for this frame (TX for uplinks, RX for
    /// downlinks).
    pub fn record_transmission(&mut self, packet: &Packet, success: bool, energy_mj: f64) {
        self.transmissions.push(TransmissionRecord {
            timestamp_ms: packet.ts_ms,
            device_id: packet.device_id(),
            protocol: packet.protocol,
            direction: packet.direction,
            packet_size: packet.size,
            airtime_ms: packet.airtime_ms,
            success,
            seq: packet.seq,
            qos_class: packet.qos_tag,
            energy_mj,
        });
        let agg = self.agg(packet.protocol);
        match (packet.direction, success) {
            (Direction::Uplink, true) => agg.uplink_success += 1,
            (Direction::Uplink, false) => agg.uplink_failed += 1,
            (Direction::Downlink, true) => agg.downlink_success += 1,
            (Direction::Downlink, false) => agg.downlink_failed += 1,
        }
        match packet.direction {
            Direction::Uplink => {
                agg.uplink_bytes += packet.size as u64;
                agg.uplink_airtime_ms += packet.airtime_ms;
            }
            Direction::Downlink => {
                agg.downlink_bytes += packet.size as u64;
                agg.downlink_airtime_ms += packet.airtime_ms;
            }
        }
    }

    pub fn record_device_tx(&mut self, device_id: u32, protocol: ProtocolId, energy_mj: f64) {
        *self.device_energy.entry((device_id, protocol)).or_default() += energy_mj;
        let agg = self.agg(protocol);
        agg.total_energy_mj += energy_mj;
        agg.tx_count += 1;
    }

    pub fn record_device_rx(&mut self, device_id: u32, protocol: ProtocolId, energy_mj: f64) {
        *self.device_energy.entry((device_id, protocol)).or_default() += energy_mj;
        let agg = self.agg(protocol);
        agg.rx_energy_mj += energy_mj;
        agg.rx_count += 1;
    }

    pub fn record_gateway_rx(&mut self, packet: &Packet) {
        let agg = self.agg(packet.protocol);
        agg.gateway_rx_count += 1;
        agg.gateway_rx_bytes += packet.size as u64;
    }

    /// Gateway-side downlink accounting; for NOVEL a non-empty bitmap also
    /// tallies the ACK efficiency numerator/denominator.
    pub fn record_gateway_tx(&mut self, packet: &Packet) {
        let agg = self.agg(packet.protocol);
        agg.gateway_tx_count += 1;
        agg.gateway_tx_bytes += packet.size as u64;
        if packet.protocol == ProtocolId::NovelLpwan && packet.ack_bitmap != 0 {
            agg.acks_sent += 1;
            agg.bits_acked += packet.ack_bitmap.count_ones() as u64;
        }
    }

    pub fn record_ack_received(&mut self, _device_id: u32, _seq: u16) {
        self.agg(ProtocolId::NovelLpwan).acks_received += 1;
    }

    pub fn record_command_applied(&mut self, protocol: ProtocolId, latency_ms: f64) {
        let agg = self.agg(protocol);
        agg.commands_applied += 1;
        agg.cmd_latency_sum_ms += latency_ms;
        agg.cmd_latency_count += 1;
    }

    pub fn record_command_expired(&mut self, _age_ms: u64) {
        self.commands_expired += 1;
    }

    pub fn record_decode_failure(&mut self, protocol: ProtocolId) {
        self.agg(protocol).decode_failed += 1;
    }

    /// Periodic snapshot; suppressed during warmup.
    pub fn snapshot(&mut self, now_ms: u64) {
        if now_ms < self.warmup_ms {
            return;
        }
        self.snapshots.push(Snapshot {
            timestamp_ms: now_ms,
            aggregates: self.aggregates.clone(),
        });
    }

    /// Derive the comparison KPIs from the raw totals.
    pub fn finalize(&mut self) {
        for agg in self.aggregates.values_mut() {
            let total_uplinks = agg.uplink_success + agg.uplink_failed;
            if total_uplinks > 0 {
                agg.delivery_rate = agg.uplink_success as f64 / total_uplinks as f64;
            }
            if agg.cmd_latency_count > 0 {
                agg.avg_cmd_latency_ms = agg.cmd_latency_sum_ms / agg.cmd_latency_count as f64;
            }
            if agg.tx_count > 0 {
                agg.energy_per_msg_mj = agg.total_energy_mj / agg.tx_count as f64;
            }
            if agg.acks_sent > 0 {
                agg.ack_efficiency = agg.bits_acked as f64 / agg.acks_sent as f64;
            }
        }
        log::debug!(
            "metrics finalized: {} transmissions, {} snapshots, {} commands expired",
            self.transmissions.len(),
            self.snapshots.len(),
            self.commands_expired
        );
    }

    /// Per-protocol summary keyed by protocol name.
    pub fn summary(&self) -> BTreeMap<String, SummaryMetrics> {
        self.aggregates
            .iter()
            .map(|(protocol, agg)| {
                (
                    protocol.as_str().to_string(),
                    SummaryMetrics {
                        delivery_rate: agg.delivery_rate,
                        avg_cmd_latency_ms: agg.avg_cmd_latency_ms,
                        energy_per_msg_mj: agg.energy_per_msg_mj,
                        uplink_bytes: agg.uplink_bytes,
                        downlink_bytes: agg.downlink_bytes,
                        total_airtime_ms: agg.uplink_airtime_ms + agg.downlink_airtime_ms,
                        commands_applied: agg.commands_applied,
                        ack_efficiency: agg.ack_efficiency,
                    },
                )
            })
            .collect()
    }

    /// Post-warmup transmissions, one CSV row each.
    pub fn write_metrics_csv(&self, writer: &mut impl Write) -> std::io::Result<()> {
        writeln!(
            writer,
            "timestamp_ms,device_id,protocol,direction,packet_size,airtime_ms,success,qos_class,energy_mj"
        )?;
        for tx in &self.transmissions {
            if tx.timestamp_ms < self.warmup_ms {
                continue;
            }
            writeln!(
                writer,
                "{},{},{},{},{},{},{},{},{}",
                tx.timestamp_ms,
                tx.device_id,
                tx.protocol,
                tx.direction.as_str(),
                tx.packet_size,
                tx.airtime_ms,
                tx.success,
                tx.qos_class.as_str(),
                tx.energy_mj
            )?;
        }
        Ok(())
    }

    /// One row per protocol with the summary metrics.
    pub fn write_comparison_csv(&self, writer: &mut impl Write) -> std::io::Result<()> {
        writeln!(
            writer,
            "protocol,delivery_rate,avg_cmd_latency_ms,energy_per_msg_mj,uplink_bytes,downlink_bytes,total_airtime_ms,commands_applied,ack_efficiency"
        )?;
        for (name, row) in self.summary() {
            writeln!(
                writer,
                "{},{},{},{},{},{},{},{},{}",
                name,
                row.delivery_rate,
                row.avg_cmd_latency_ms,
                row.energy_per_msg_mj,
                row.uplink_bytes,
                row.downlink_bytes,
                row.total_airtime_ms,
                row.commands_applied,
                row.ack_efficiency
            )?;
        }
        Ok(())
    }

    pub fn transmissions(&self) -> &[TransmissionRecord] {
        &self.transmissions
    }

    pub fn device_energy(&self, device_id: u32, protocol: ProtocolId) -> f64 {
        self.device_energy
            .get(&(device_id, protocol))
            .copied()
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::types::NodeRef;

    fn uplink(protocol: ProtocolId, ts_ms: u64, size: usize) -> Packet {
        let mut packet = Packet::new(
            0,
            NodeRef::Device(1),
            NodeRef::Gateway,
            protocol,
            Direction::Uplink,
            vec![0u8; size],
            ts_ms,
        );
        packet.airtime_ms = 100.0;
        packet
    }

    #[test]
    fn delivery_rate_counts_uplinks_only() {
        let mut metrics = MetricsCollector::new(0, 60_000);
        metrics.record_transmission(&uplink(ProtocolId::NovelLpwan, 0, 10), true, 0.0);
        metrics.record_transmission(&uplink(ProtocolId::NovelLpwan, 1, 10), true, 0.0);
        metrics.record_transmission(&uplink(ProtocolId::NovelLpwan, 2, 10), false, 0.0);
        let mut downlink = uplink(ProtocolId::NovelLpwan, 3, 10);
        downlink.direction = Direction::Downlink;
        downlink.src = NodeRef::Gateway;
        downlink.dst = NodeRef::Device(1);
        metrics.record_transmission(&downlink, false, 0.0);
        metrics.finalize();
        let agg = &metrics.aggregates[&ProtocolId::NovelLpwan];
        assert!((agg.delivery_rate - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(agg.uplink_bytes, 30);
        assert_eq!(agg.downlink_bytes, 10);
        assert_eq!(agg.downlink_failed, 1);
    }

    #[test]
    fn ack_efficiency_is_bits_per_ack_downlink() {
        let mut metrics = MetricsCollector::new(0, 60_000);
        let mut packet = uplink(ProtocolId::NovelLpwan, 0, 12);
        packet.direction = Direction::Downlink;
        packet.dst = NodeRef::Device(1);
        packet.ack_bitmap = 0b0000_1111;
        metrics.record_gateway_tx(&packet);
        packet.ack_bitmap = 0b0011;
        metrics.record_gateway_tx(&packet);
        // No bitmap: not an ACK.
        packet.ack_bitmap = 0;
        metrics.record_gateway_tx(&packet);
        metrics.finalize();
        let agg = &metrics.aggregates[&ProtocolId::NovelLpwan];
        assert_eq!(agg.acks_sent, 2);
        assert_eq!(agg.bits_acked, 6);
        assert_eq!(agg.ack_efficiency, 3.0);
        assert_eq!(agg.gateway_tx_count, 3);
    }

    #[test]
    fn ack_efficiency_defaults_to_zero_without_acks() {
        let mut metrics = MetricsCollector::new(0, 60_000);
        metrics.record_transmission(&uplink(ProtocolId::NovelLpwan, 0, 10), true, 0.0);
        metrics.finalize();
        assert_eq!(metrics.aggregates[&ProtocolId::NovelLpwan].ack_efficiency, 0.0);
    }

    #[test]
    fn csv_rows_are_warmup_filtered() {
        let mut metrics = MetricsCollector::new(1_000, 60_000);
        metrics.record_transmission(&uplink(ProtocolId::MqttSn, 500, 10), true, 0.0);
        metrics.record_transmission(&uplink(ProtocolId::MqttSn, 1_500, 10), true, 0.5);
        let mut out = Vec::new();
        metrics.write_metrics_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("timestamp_ms,"));
        assert_eq!(lines[1], "1500,1,mqtt_sn,uplink,10,100,true,normal,0.5");
    }

    #[test]
    fn snapshots_respect_warmup() {
        let mut metrics = MetricsCollector::new(10_000, 60_000);
        metrics.record_transmission(&uplink(ProtocolId::Coap, 0, 10), true, 0.0);
        metrics.snapshot(5_000);
        assert!(metrics.snapshots.is_empty());
        metrics.snapshot(20_000);
        assert_eq!(metrics.snapshots.len(), 1);
        assert_eq!(metrics.snapshots[0].timestamp_ms, 20_000);
    }

    #[test]
    fn comparison_csv_has_one_row_per_protocol() {
        let mut metrics = MetricsCollector::new(0, 60_000);
        metrics.record_transmission(&uplink(ProtocolId::NovelLpwan, 0, 10), true, 0.0);
        metrics.record_transmission(&uplink(ProtocolId::Coap, 0, 20), true, 0.0);
        metrics.finalize();
        let mut out = Vec::new();
        metrics.write_comparison_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        // Rows are keyed by protocol name, alphabetically.
        assert!(lines[1].starts_with("coap,"));
        assert!(lines[2].starts_with("novel_lpwan,"));
    }

    #[test]
    fn device_energy_accumulates_per_protocol() {
        let mut metrics = MetricsCollector::new(0, 60_000);
        metrics.record_device_tx(3, ProtocolId::NovelLpwan, 1.5);
        metrics.record_device_tx(3, ProtocolId::NovelLpwan, 0.5);
        metrics.record_device_rx(3, ProtocolId::NovelLpwan, 0.25);
        metrics.finalize();
        assert_eq!(metrics.device_energy(3, ProtocolId::NovelLpwan), 2.25);
        let agg = &metrics.aggregates[&ProtocolId::NovelLpwan];
        assert_eq!(agg.tx_count, 2);
        assert_eq!(agg.rx_count, 1);
        assert_eq!(agg.total_energy_mj, 2.0);
        assert_eq!(agg.energy_per_msg_mj, 1.0);
    }
}
