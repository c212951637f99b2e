//! Radio channel models.
//!
//! Two variants share one contract: compute airtime from payload size and
//! modulation, then decide per-transmission success from a loss probability.
//! No bit-level PHY is modeled; the channel's whole effect on the simulation
//! is airtime (virtual time and duty cycle) and Bernoulli loss.
//!
//! Units:
//! - Time: milliseconds (f64 for airtime math, u64 on the virtual clock)
//! - Rates: kbps (bits per millisecond, which makes airtime = bits / rate)

use crate::config::{LorawanConfig, NbIotConfig};
use crate::simulation::types::{Direction, LinkRate, Packet, MS_PER_HOUR};
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use std::collections::VecDeque;

/// Fixed SF selection weights, biased toward the faster factors.
const SF_WEIGHTS: [f64; 6] = [0.30, 0.25, 0.20, 0.15, 0.07, 0.03];

/// Sub-GHz long-range channel: LoRa-style spreading factors, per-SF loss,
/// duty-cycle regime, RX1 receive window before downlinks.
#[derive(Debug, Clone)]
pub struct LorawanChannel {
    pub duty_cycle: f64,
    pub rx1_delay_ms: u64,
    spreading_factors: Vec<u8>,
    per_override: Option<f64>,
}

impl LorawanChannel {
    pub fn new(config: &LorawanConfig) -> Self {
        Self {
            duty_cycle: config.duty_cycle,
            rx1_delay_ms: config.rx1_delay_ms,
            spreading_factors: config.spreading_factors.clone(),
            per_override: config.per_override,
        }
    }

    /// Time-on-air per payload byte in ms, by spreading factor.
    fn toa_per_byte(sf: u8) -> f64 {
        match sf {
            7 => 0.5,
            8 => 0.9,
            9 => 1.6,
            10 => 2.9,
            11 => 5.2,
            _ => 9.5,
        }
    }

    /// Packet error rate by spreading factor (higher SF is slower but more
    /// robust).
    fn per_by_sf(&self, sf: u8) -> f64 {
        if let Some(per) = self.per_override {
            return per;
        }
        match sf {
            7 => 0.05,
            8 => 0.04,
            9 => 0.03,
            10 => 0.02,
            11 => 0.015,
            _ => 0.01,
        }
    }

    /// Frame time-on-air in milliseconds:
    ///
    /// ```text
    /// airtime = preamble(SF) + (8 + payload_bytes) · t(SF)
    /// preamble(SF) = 12.25 · 2^SF / 125000 · 1000   (125 kHz bandwidth)
    /// ```
    pub fn airtime_ms(&self, payload_bytes: usize, sf: u8) -> f64 {
        let preamble_ms = 12.25 * 2f64.powi(sf as i32) / 125_000.0 * 1_000.0;
        let t = Self::toa_per_byte(sf);
        preamble_ms + (8.0 + payload_bytes as f64) * t
    }

    /// Draw a spreading factor from the fixed weighted distribution.
    pub fn select_sf(&self, rng: &mut StdRng) -> u8 {
        let count = self.spreading_factors.len().min(SF_WEIGHTS.len());
        let dist = WeightedIndex::new(&SF_WEIGHTS[..count]).expect("non-empty SF weights");
        self.spreading_factors[dist.sample(rng)]
    }

    /// Stamp airtime and modulation onto the packet and decide success.
    pub fn transmit(&self, packet: &mut Packet, sf: u8, rng: &mut StdRng) -> bool {
        packet.sf_or_rate = Some(LinkRate::SpreadingFactor(sf));
        packet.airtime_ms = self.airtime_ms(packet.size, sf);
        rng.gen_range(0.0..1.0) >= self.per_by_sf(sf)
    }
}

/// Cellular narrow-band channel: fixed uplink/downlink rates, negligible
/// residual loss after HARQ, no duty-cycle constraint, no RX window.
#[derive(Debug, Clone)]
pub struct NbIotChannel {
    per: f64,
}

impl NbIotChannel {
    pub const UPLINK_RATE_KBPS: f64 = 62.5;
    pub const DOWNLINK_RATE_KBPS: f64 = 27.2;

    pub fn new(config: &NbIotConfig) -> Self {
        Self { per: config.per }
    }

    fn rate_kbps(direction: Direction) -> f64 {
        match direction {
            Direction::Uplink => Self::UPLINK_RATE_KBPS,
            Direction::Downlink => Self::DOWNLINK_RATE_KBPS,
        }
    }

    /// Transmission time in milliseconds: bits / rate.
    pub fn airtime_ms(&self, payload_bytes: usize, direction: Direction) -> f64 {
        payload_bytes as f64 * 8.0 / Self::rate_kbps(direction)
    }

    pub fn transmit(&self, packet: &mut Packet, rng: &mut StdRng) -> bool {
        packet.sf_or_rate = Some(LinkRate::RateKbps(Self::rate_kbps(packet.direction)));
        packet.airtime_ms = self.airtime_ms(packet.size, packet.direction);
        rng.gen_range(0.0..1.0) >= self.per
    }
}

/// The channel a run is configured with.
#[derive(Debug, Clone)]
pub enum RadioChannel {
    Lorawan(LorawanChannel),
    NbIot(NbIotChannel),
}

impl RadioChannel {
    /// Stamp airtime, modulation, and success onto the packet. Virtual time
    /// is advanced by the caller, which owns the clock.
    pub fn transmit(&self, packet: &mut Packet, rng: &mut StdRng) -> bool {
        match self {
            RadioChannel::Lorawan(channel) => {
                let sf = channel.select_sf(rng);
                channel.transmit(packet, sf, rng)
            }
            RadioChannel::NbIot(channel) => channel.transmit(packet, rng),
        }
    }

    /// Receive-window delay awaited before a downlink transmission.
    pub fn rx_window_delay_ms(&self) -> u64 {
        match self {
            RadioChannel::Lorawan(channel) => channel.rx1_delay_ms,
            RadioChannel::NbIot(_) => 0,
        }
    }

    /// Duty-cycle limit as a fraction of an hour, if this channel is
    /// regulated.
    pub fn duty_cycle_limit(&self) -> Option<f64> {
        match self {
            RadioChannel::Lorawan(channel) => Some(channel.duty_cycle),
            RadioChannel::NbIot(_) => None,
        }
    }
}

/// Per-device airtime budget over a one-hour sliding window.
#[derive(Debug, Clone, Default)]
pub struct DutyCycleTracker {
    /// (transmission end, airtime) pairs still inside the window.
    window: VecDeque<(u64, f64)>,
    total_airtime_ms: f64,
    pub last_tx_ms: u64,
}

impl DutyCycleTracker {
    /// Drop transmissions that ended more than an hour ago.
    fn prune(&mut self, now_ms: u64) {
        let horizon = now_ms.saturating_sub(MS_PER_HOUR);
        while let Some(&(end_ms, airtime)) = self.window.front() {
            if end_ms >= horizon {
                break;
            }
            self.total_airtime_ms -= airtime;
            self.window.pop_front();
        }
    }

    /// Account one finished transmission and return the airtime consumed in
    /// the trailing hour, in milliseconds.
    pub fn record(&mut self, now_ms: u64, airtime_ms: f64) -> f64 {
        self.prune(now_ms);
        self.window.push_back((now_ms, airtime_ms));
        self.total_airtime_ms += airtime_ms;
        self.last_tx_ms = now_ms;
        self.total_airtime_ms
    }

    /// Airtime consumed in the trailing hour without recording anything.
    pub fn used_ms(&mut self, now_ms: u64) -> f64 {
        self.prune(now_ms);
        self.total_airtime_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::ProtocolId;
    use crate::simulation::types::NodeRef;
    use rand::SeedableRng;

    fn lorawan() -> LorawanChannel {
        LorawanChannel::new(&LorawanConfig::default())
    }

    fn uplink_packet(size: usize) -> Packet {
        Packet::new(
            1,
            NodeRef::Device(0),
            NodeRef::Gateway,
            ProtocolId::NovelLpwan,
            Direction::Uplink,
            vec![0u8; size],
            0,
        )
    }

    #[test]
    fn lorawan_airtime_matches_closed_form() {
        let channel = lorawan();
        for sf in 7..=12u8 {
            let airtime = channel.airtime_ms(20, sf);
            let preamble = 12.25 * 2f64.powi(sf as i32) / 125_000.0 * 1_000.0;
            let expected = preamble + 28.0 * LorawanChannel::toa_per_byte(sf);
            assert!(
                (airtime - expected).abs() < 0.5,
                "sf {sf}: {airtime} vs {expected}"
            );
        }
    }

    #[test]
    fn lorawan_airtime_increases_with_sf_and_size() {
        let channel = lorawan();
        assert!(channel.airtime_ms(20, 12) > channel.airtime_ms(20, 7));
        assert!(channel.airtime_ms(100, 7) > channel.airtime_ms(10, 7));
    }

    #[test]
    fn per_override_forces_lossless_transmissions() {
        let channel = LorawanChannel::new(&LorawanConfig {
            per_override: Some(0.0),
            ..LorawanConfig::default()
        });
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..200 {
            let mut packet = uplink_packet(20);
            assert!(channel.transmit(&mut packet, 7, &mut rng));
            assert!(packet.airtime_ms > 0.0);
            assert_eq!(packet.sf_or_rate, Some(LinkRate::SpreadingFactor(7)));
        }
    }

    #[test]
    fn sf_selection_favors_low_factors() {
        let channel = lorawan();
        let mut rng = StdRng::seed_from_u64(5);
        let mut counts = [0u32; 13];
        for _ in 0..2_000 {
            counts[channel.select_sf(&mut rng) as usize] += 1;
        }
        assert!(counts[7] > counts[10]);
        assert!(counts[10] > counts[12]);
        assert_eq!(counts[..7].iter().sum::<u32>(), 0);
    }

    #[test]
    fn nbiot_airtime_is_rate_exact() {
        let channel = NbIotChannel::new(&NbIotConfig::default());
        // 100 bytes uplink: 800 bits / 62.5 kbps = 12.8 ms
        assert!((channel.airtime_ms(100, Direction::Uplink) - 12.8).abs() < 1e-9);
        // 34 bytes downlink: 272 bits / 27.2 kbps = 10 ms
        assert!((channel.airtime_ms(34, Direction::Downlink) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn rx_window_only_on_long_range() {
        let lora = RadioChannel::Lorawan(lorawan());
        let nb = RadioChannel::NbIot(NbIotChannel::new(&NbIotConfig::default()));
        assert_eq!(lora.rx_window_delay_ms(), 1_000);
        assert_eq!(nb.rx_window_delay_ms(), 0);
        assert_eq!(lora.duty_cycle_limit(), Some(0.01));
        assert_eq!(nb.duty_cycle_limit(), None);
    }

    #[test]
    fn duty_cycle_window_slides() {
        let mut tracker = DutyCycleTracker::default();
        assert_eq!(tracker.record(0, 100.0), 100.0);
        assert_eq!(tracker.record(1_000, 50.0), 150.0);
        // An hour after the first transmission it falls out of the window.
        let used = tracker.used_ms(MS_PER_HOUR + 1);
        assert_eq!(used, 50.0);
        // And eventually the window empties.
        assert_eq!(tracker.used_ms(2 * MS_PER_HOUR), 0.0);
    }
}
