//! Per-device state and the device task.
//!
//! Each device runs an independent task driving a sleep/wake loop: sleep
//! until the next traffic-generator wake time, transmit the sampled
//! telemetry through every enabled protocol, process any commands that
//! arrived in the meantime, and go back to sleep. Energy is integrated
//! continuously across the `sleep`/`idle`/`rx`/`tx` power states; commands
//! are applied under the NOVEL epoch rule (baselines apply unconditionally,
//! matching their native duplicate-detection semantics which this simulation
//! does not model).

use crate::config::PowerConfig;
use crate::engine::{Spawner, VirtualClock};
use crate::protocols::coap::CoapDeviceState;
use crate::protocols::mqtt_sn::MqttSnDeviceState;
use crate::protocols::novel::NovelDeviceState;
use crate::protocols::{ParsedCommand, ProtocolId, QosClass};
use crate::simulation::metrics::MetricsCollector;
use crate::simulation::network::transmit_uplink;
use crate::simulation::types::{Direction, NodeRef, Packet};
use crate::simulation::{ProtocolSet, SharedWorld};
use rand::rngs::StdRng;

/// Radio power state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Sleep,
    Idle,
    Rx,
    Tx,
}

/// Continuous-time energy integrator: every state change adds
/// `power · elapsed` for the state being left.
#[derive(Debug, Clone)]
pub struct EnergyAccount {
    current_power_mw: f64,
    last_change_ms: u64,
    pub energy_mj: f64,
}

impl EnergyAccount {
    pub fn new(initial_power_mw: f64) -> Self {
        Self {
            current_power_mw: initial_power_mw,
            last_change_ms: 0,
            energy_mj: 0.0,
        }
    }

    /// Close the current state at `now_ms` and enter one drawing
    /// `power_mw`.
    pub fn set_power(&mut self, now_ms: u64, power_mw: f64) {
        self.accumulate_to(now_ms);
        self.current_power_mw = power_mw;
    }

    /// Integrate the current state up to `now_ms` without changing it.
    pub fn accumulate_to(&mut self, now_ms: u64) {
        let elapsed_ms = now_ms.saturating_sub(self.last_change_ms);
        self.energy_mj += self.current_power_mw * elapsed_ms as f64 / 1_000.0;
        self.last_change_ms = now_ms;
    }
}

/// A command delivered to the device, waiting to be applied at the next
/// processing step.
#[derive(Debug, Clone)]
pub struct IncomingCommand {
    pub protocol: ProtocolId,
    pub command: ParsedCommand,
    pub created_ms: u64,
}

/// One end device: per-protocol codec state, pending command queue, energy
/// account.
pub struct DeviceNode {
    pub id: u32,
    power: PowerConfig,
    pub energy: EnergyAccount,
    pub novel_state: Option<NovelDeviceState>,
    pub mqtt_sn_state: Option<MqttSnDeviceState>,
    pub coap_state: Option<CoapDeviceState>,
    pub pending_commands: Vec<IncomingCommand>,
}

impl DeviceNode {
    pub fn new(id: u32, power: &PowerConfig, protocols: &ProtocolSet, rng: &mut StdRng) -> Self {
        Self {
            id,
            power: power.clone(),
            energy: EnergyAccount::new(power.sleep),
            novel_state: protocols
                .novel
                .as_ref()
                .map(|novel| novel.create_device_state(rng)),
            mqtt_sn_state: protocols
                .mqtt_sn
                .as_ref()
                .map(|mqtt_sn| mqtt_sn.create_device_state()),
            coap_state: protocols.coap.as_ref().map(|coap| coap.create_device_state(rng)),
            pending_commands: Vec::new(),
        }
    }

    pub fn set_power_state(&mut self, now_ms: u64, state: PowerState) {
        let power_mw = match state {
            PowerState::Sleep => self.power.sleep,
            PowerState::Idle => self.power.idle,
            PowerState::Rx => self.power.rx,
            PowerState::Tx => self.power.tx_mw(),
        };
        self.energy.set_power(now_ms, power_mw);
    }

    /// Protocol state footprint in bytes, for the comparison the gateway
    /// cannot make on a device's behalf.
    pub fn state_size(&self, protocol: ProtocolId) -> usize {
        match protocol {
            ProtocolId::NovelLpwan => self
                .novel_state
                .as_ref()
                .map(NovelDeviceState::state_size)
                .unwrap_or(0),
            ProtocolId::MqttSn => self
                .mqtt_sn_state
                .as_ref()
                .map(MqttSnDeviceState::state_size)
                .unwrap_or(0),
            ProtocolId::Coap => self
                .coap_state
                .as_ref()
                .map(CoapDeviceState::state_size)
                .unwrap_or(0),
        }
    }

    /// Parse a delivered downlink: queue its commands for the next
    /// processing step, credit RX energy, and (NOVEL) crack the ACK bitmap.
    pub fn receive_downlink(
        &mut self,
        protocols: &ProtocolSet,
        packet: &Packet,
        now_ms: u64,
        metrics: &mut MetricsCollector,
    ) {
        debug_assert_eq!(packet.direction, Direction::Downlink);
        // The radio dwells in RX for the frame's airtime; the device loop
        // itself stays asleep, so the state flips back immediately and the
        // airtime energy is credited explicitly below.
        self.set_power_state(now_ms, PowerState::Rx);
        self.set_power_state(now_ms, PowerState::Sleep);

        match packet.protocol {
            ProtocolId::NovelLpwan => {
                let Some(novel) = protocols.novel.as_ref() else {
                    return;
                };
                match novel.decode_downlink(&packet.payload) {
                    None => {
                        metrics.record_decode_failure(packet.protocol);
                        return;
                    }
                    Some(downlink) => {
                        for cmd in &downlink.commands {
                            self.pending_commands.push(IncomingCommand {
                                protocol: ProtocolId::NovelLpwan,
                                command: ParsedCommand::from(cmd),
                                created_ms: packet.ts_ms,
                            });
                        }
                        if downlink.ack_bitmap != 0 {
                            self.process_ack_bitmap(
                                downlink.ack_base,
                                downlink.ack_bitmap,
                                metrics,
                            );
                        }
                    }
                }
            }
            ProtocolId::MqttSn => {
                let Some(mqtt_sn) = protocols.mqtt_sn.as_ref() else {
                    return;
                };
                match mqtt_sn.decode_downlink(&packet.payload) {
                    None => {
                        metrics.record_decode_failure(packet.protocol);
                        return;
                    }
                    Some(commands) => self.queue_parsed(ProtocolId::MqttSn, commands, packet.ts_ms),
                }
            }
            ProtocolId::Coap => {
                let Some(coap) = protocols.coap.as_ref() else {
                    return;
                };
                match coap.decode_downlink(&packet.payload) {
                    None => {
                        metrics.record_decode_failure(packet.protocol);
                        return;
                    }
                    Some(commands) => self.queue_parsed(ProtocolId::Coap, commands, packet.ts_ms),
                }
            }
        }

        let rx_energy_mj = packet.airtime_ms * self.power.rx / 1_000.0;
        metrics.record_device_rx(self.id, packet.protocol, rx_energy_mj);
    }

    fn queue_parsed(&mut self, protocol: ProtocolId, commands: Vec<ParsedCommand>, ts_ms: u64) {
        for command in commands {
            self.pending_commands.push(IncomingCommand {
                protocol,
                command,
                created_ms: ts_ms,
            });
        }
    }

    /// Release the device-side waiting state for every acknowledged seq.
    fn process_ack_bitmap(&mut self, ack_base: u16, bitmap: u16, metrics: &mut MetricsCollector) {
        for offset in 0..16u16 {
            if bitmap & (1 << offset) != 0 {
                let seq = ack_base.wrapping_add(offset);
                metrics.record_ack_received(self.id, seq);
            }
        }
    }

    /// Apply queued commands. NOVEL enforces the epoch rule: a command is
    /// applied only when its epoch is strictly newer than the last applied
    /// one for the same cmd_type. Returns whether anything was processed.
    pub fn apply_pending_commands(&mut self, now_ms: u64, metrics: &mut MetricsCollector) -> bool {
        if self.pending_commands.is_empty() {
            return false;
        }
        for incoming in std::mem::take(&mut self.pending_commands) {
            let applied = match incoming.protocol {
                ProtocolId::NovelLpwan => {
                    let Some(state) = self.novel_state.as_mut() else {
                        continue;
                    };
                    let cmd_type = incoming.command.cmd_type;
                    let epoch = incoming.command.epoch as u8;
                    let current = state.epoch_ids.get(&cmd_type).copied().unwrap_or(0);
                    if epoch > current {
                        state.epoch_ids.insert(cmd_type, epoch);
                        true
                    } else {
                        log::debug!(
                            "device {}: duplicate cmd type {} epoch {} (have {})",
                            self.id,
                            cmd_type,
                            epoch,
                            current
                        );
                        false
                    }
                }
                ProtocolId::MqttSn | ProtocolId::Coap => true,
            };
            if applied {
                metrics.record_command_applied(
                    incoming.protocol,
                    now_ms.saturating_sub(incoming.created_ms) as f64,
                );
            }
        }
        true
    }
}

/// Time a device spends applying a batch of commands before sleeping again.
const COMMAND_PROCESSING_MS: u64 = 10;

/// The per-device sleep/wake loop.
pub async fn device_task(
    world: SharedWorld,
    clock: VirtualClock,
    spawner: Spawner,
    device_id: u32,
) {
    // Uniform random offset inside the first interval desynchronizes the
    // fleet.
    let offset_ms = {
        let mut w = world.borrow_mut();
        let w = &mut *w;
        w.uplink_traffic.initial_offset_ms(&mut w.rng)
    };
    clock.sleep_ms(offset_ms).await;

    loop {
        // Wake: leave sleep, sample this interval's telemetry, and encode
        // one uplink per enabled protocol.
        let uplinks = {
            let mut w = world.borrow_mut();
            let w = &mut *w;
            let now_ms = clock.now_ms();
            let device = &mut w.devices[device_id as usize];
            device.set_power_state(now_ms, PowerState::Idle);

            let payload = w.uplink_traffic.telemetry_payload(&mut w.rng);
            let qos = w.uplink_traffic.sample_qos(&mut w.rng);
            encode_uplinks(device, &w.protocols, &payload, qos, now_ms, &mut w.rng)
        };

        for packet in uplinks {
            let protocol = packet.protocol;
            let tx_power_mw = {
                let mut w = world.borrow_mut();
                let w = &mut *w;
                let now_ms = clock.now_ms();
                let device = &mut w.devices[device_id as usize];
                device.set_power_state(now_ms, PowerState::Tx);
                device.power.tx_mw()
            };

            let (airtime_ms, _success) = transmit_uplink(&world, &clock, &spawner, packet).await;

            {
                let mut w = world.borrow_mut();
                let w = &mut *w;
                let device = &mut w.devices[device_id as usize];
                // Sequence state advances only after the frame left the
                // radio.
                if protocol == ProtocolId::NovelLpwan {
                    if let Some(state) = device.novel_state.as_mut() {
                        state.next_seq_uplink = state.next_seq_uplink.wrapping_add(1);
                    }
                }
                let energy_mj = airtime_ms * tx_power_mw / 1_000.0;
                w.metrics.record_device_tx(device_id, protocol, energy_mj);
            }
        }

        // Back to idle for command processing, then sleep.
        let had_commands = {
            let mut w = world.borrow_mut();
            let w = &mut *w;
            let now_ms = clock.now_ms();
            let device = &mut w.devices[device_id as usize];
            device.set_power_state(now_ms, PowerState::Idle);
            device.apply_pending_commands(now_ms, &mut w.metrics)
        };
        if had_commands {
            clock.sleep_ms(COMMAND_PROCESSING_MS).await;
        }

        let interval_ms = {
            let mut w = world.borrow_mut();
            let w = &mut *w;
            let now_ms = clock.now_ms();
            w.devices[device_id as usize].set_power_state(now_ms, PowerState::Sleep);
            w.uplink_traffic.next_interval_ms(&mut w.rng)
        };
        clock.sleep_ms(interval_ms).await;
    }
}

/// Encode the telemetry payload once per enabled protocol. Transmission
/// metadata (airtime, modulation, delivery) is stamped later by the channel.
fn encode_uplinks(
    device: &mut DeviceNode,
    protocols: &ProtocolSet,
    payload: &[u8],
    qos: QosClass,
    now_ms: u64,
    rng: &mut StdRng,
) -> Vec<Packet> {
    let mut packets = Vec::new();
    for &protocol in &protocols.enabled {
        let (frame, seq) = match protocol {
            ProtocolId::NovelLpwan => {
                let (Some(novel), Some(state)) =
                    (protocols.novel.as_ref(), device.novel_state.as_ref())
                else {
                    continue;
                };
                (novel.encode_uplink(state, payload, qos), state.next_seq_uplink)
            }
            ProtocolId::MqttSn => {
                let (Some(mqtt_sn), Some(state)) =
                    (protocols.mqtt_sn.as_ref(), device.mqtt_sn_state.as_mut())
                else {
                    continue;
                };
                mqtt_sn.encode_uplink(state, payload, qos, now_ms)
            }
            ProtocolId::Coap => {
                let (Some(coap), Some(state)) =
                    (protocols.coap.as_ref(), device.coap_state.as_mut())
                else {
                    continue;
                };
                coap.encode_uplink(state, payload, qos, now_ms, rng)
            }
        };
        let mut packet = Packet::new(
            0,
            NodeRef::Device(device.id),
            NodeRef::Gateway,
            protocol,
            Direction::Uplink,
            frame,
            now_ms,
        );
        packet.qos_tag = qos;
        packet.priority = qos.priority();
        packet.seq = seq;
        packets.push(packet);
    }
    packets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energy_integrates_power_over_time() {
        let mut account = EnergyAccount::new(0.001);
        account.set_power(10_000, 80.0); // 10 s of sleep
        account.set_power(10_500, 0.001); // 0.5 s of tx
        account.accumulate_to(20_000); // 9.5 s of sleep
        let expected = 0.001 * 10.0 + 80.0 * 0.5 + 0.001 * 9.5;
        assert!((account.energy_mj - expected).abs() < 1e-9);
    }

    #[test]
    fn zero_elapsed_transitions_add_nothing() {
        let mut account = EnergyAccount::new(1.0);
        account.set_power(1_000, 12.0);
        account.set_power(1_000, 1.0);
        account.set_power(1_000, 0.001);
        let expected = 1.0 * 1.0; // only the first second at idle power
        assert!((account.energy_mj - expected).abs() < 1e-9);
    }
}
