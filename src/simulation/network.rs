//! Network coordinator: owns the channel and dispatches transmissions.
//!
//! Uplinks run as part of the device task (the device occupies its radio
//! for the airtime); downlinks are spawned as independent tasks that first
//! await the receive window. The coordinator also keeps the per-device
//! duty-cycle accounting, best effort: exceedance is reported, the frame
//! still transmits and its airtime still counts.

use crate::engine::{Spawner, VirtualClock};
use crate::simulation::channel::{DutyCycleTracker, RadioChannel};
use crate::simulation::gateway::DownlinkPlan;
use crate::simulation::types::{MS_PER_HOUR, Packet};
use crate::simulation::SharedWorld;
use std::collections::BTreeMap;

pub struct NetworkCoordinator {
    pub channel: RadioChannel,
    duty_cycle: BTreeMap<u32, DutyCycleTracker>,
    packet_counter: u64,
}

impl NetworkCoordinator {
    pub fn new(channel: RadioChannel) -> Self {
        Self {
            channel,
            duty_cycle: BTreeMap::new(),
            packet_counter: 0,
        }
    }

    pub fn alloc_packet_id(&mut self) -> u64 {
        self.packet_counter += 1;
        self.packet_counter
    }

    /// Account a finished uplink against the device's one-hour sliding
    /// budget; warn on exceedance.
    pub fn account_duty_cycle(&mut self, device_id: u32, now_ms: u64, airtime_ms: f64) {
        let Some(limit) = self.channel.duty_cycle_limit() else {
            return;
        };
        let tracker = self.duty_cycle.entry(device_id).or_default();
        let used_ms = tracker.record(now_ms, airtime_ms);
        let budget_ms = MS_PER_HOUR as f64 * limit;
        if used_ms > budget_ms {
            log::warn!(
                "device {}: duty cycle exceeded, {:.1} ms used of {:.1} ms hourly budget",
                device_id,
                used_ms,
                budget_ms
            );
        }
    }

    /// Airtime a device consumed in the trailing hour.
    pub fn duty_cycle_used_ms(&mut self, device_id: u32, now_ms: u64) -> f64 {
        self.duty_cycle
            .get_mut(&device_id)
            .map(|tracker| tracker.used_ms(now_ms))
            .unwrap_or(0.0)
    }
}

/// Transmit one uplink: decide success, occupy the channel for the airtime,
/// account duty cycle and metrics, and on success hand the frame to the
/// gateway, whose receive window may spawn downlink transfers.
///
/// Returns `(airtime_ms, success)` so the device can book its TX energy.
pub async fn transmit_uplink(
    world: &SharedWorld,
    clock: &VirtualClock,
    spawner: &Spawner,
    mut packet: Packet,
) -> (f64, bool) {
    let (success, airtime_ms) = {
        let mut w = world.borrow_mut();
        let w = &mut *w;
        packet.id = w.network.alloc_packet_id();
        let success = w.network.channel.transmit(&mut packet, &mut w.rng);
        (success, packet.airtime_ms)
    };

    clock.sleep_ms(airtime_ms.round() as u64).await;

    let plans = {
        let mut w = world.borrow_mut();
        let w = &mut *w;
        let now_ms = clock.now_ms();
        let device_id = packet.device_id();
        w.network.account_duty_cycle(device_id, now_ms, airtime_ms);
        let tx_energy_mj = airtime_ms * w.power.tx_mw() / 1_000.0;
        w.metrics.record_transmission(&packet, success, tx_energy_mj);
        if success {
            packet.delivered = true;
            packet.delivery_time_ms = now_ms;
            w.gateway
                .receive_uplink(&packet, now_ms, &w.protocols, &mut w.metrics)
        } else {
            Vec::new()
        }
    };

    for plan in plans {
        spawner.spawn(transmit_downlink(world.clone(), clock.clone(), plan));
    }

    (airtime_ms, success)
}

/// Transmit one downlink: wait out the receive window, decide success,
/// occupy the channel, then deliver to the device or requeue the carried
/// commands.
pub async fn transmit_downlink(world: SharedWorld, clock: VirtualClock, plan: DownlinkPlan) {
    let DownlinkPlan {
        mut packet,
        commands,
    } = plan;

    let rx_window_ms = {
        let w = world.borrow();
        w.network.channel.rx_window_delay_ms()
    };
    if rx_window_ms > 0 {
        clock.sleep_ms(rx_window_ms).await;
    }

    let (success, airtime_ms) = {
        let mut w = world.borrow_mut();
        let w = &mut *w;
        packet.id = w.network.alloc_packet_id();
        let success = w.network.channel.transmit(&mut packet, &mut w.rng);
        (success, packet.airtime_ms)
    };

    clock.sleep_ms(airtime_ms.round() as u64).await;

    {
        let mut w = world.borrow_mut();
        let w = &mut *w;
        let now_ms = clock.now_ms();
        let device_id = packet.device_id();

        let rx_energy_mj = if success {
            airtime_ms * w.power.rx / 1_000.0
        } else {
            0.0
        };
        w.metrics.record_transmission(&packet, success, rx_energy_mj);

        if success {
            packet.delivered = true;
            packet.delivery_time_ms = now_ms;
            if let Some(device) = w.devices.get_mut(device_id as usize) {
                device.receive_downlink(&w.protocols, &packet, now_ms, &mut w.metrics);
            }
        }
        w.gateway
            .downlink_completed(device_id, commands, success, now_ms);
        w.metrics.record_gateway_tx(&packet);
    }
}
