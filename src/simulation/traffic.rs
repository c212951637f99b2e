//! Synthetic traffic models.
//!
//! Uplink telemetry is sampled per device by the device task (initial
//! desynchronization offset, then pattern-driven inter-arrival times);
//! downlink commands arrive gateway-side as a Poisson-like stream over the
//! whole fleet. The same command is enqueued once per enabled protocol so
//! the comparison stays apples-to-apples.

use crate::config::{
    DownlinkPattern, DownlinkTrafficConfig, UplinkPattern, UplinkTrafficConfig,
};
use crate::engine::VirtualClock;
use crate::protocols::QosClass;
use crate::simulation::types::MS_PER_HOUR;
use crate::simulation::SharedWorld;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::Exp;

/// Shortest uplink inter-arrival the generator will produce.
const MIN_UPLINK_INTERVAL_MS: u64 = 1_000;
/// Shortest downlink command inter-arrival.
const MIN_COMMAND_INTERVAL_MS: u64 = 100;

/// Per-device uplink schedule and payload synthesis.
#[derive(Debug, Clone)]
pub struct UplinkTrafficModel {
    pattern: UplinkPattern,
    interval_ms: f64,
    payload_bytes: usize,
    jitter_ratio: f64,
}

impl UplinkTrafficModel {
    pub fn new(config: &UplinkTrafficConfig) -> Self {
        Self {
            pattern: config.pattern,
            interval_ms: config.interval_s * 1_000.0,
            payload_bytes: config.payload_bytes,
            jitter_ratio: config.jitter_ratio,
        }
    }

    /// Uniform offset in `[0, interval)` applied once at boot so devices do
    /// not transmit in lockstep.
    pub fn initial_offset_ms(&self, rng: &mut StdRng) -> u64 {
        if self.interval_ms <= 0.0 {
            return 0;
        }
        rng.gen_range(0.0..self.interval_ms) as u64
    }

    /// Next inter-arrival by pattern: periodic with ±jitter, Poisson, or
    /// event-driven (exponential at twice the mean interval).
    pub fn next_interval_ms(&self, rng: &mut StdRng) -> u64 {
        let interval = match self.pattern {
            UplinkPattern::Periodic => {
                let jitter = if self.jitter_ratio > 0.0 {
                    rng.gen_range(-self.jitter_ratio..self.jitter_ratio)
                } else {
                    0.0
                };
                self.interval_ms * (1.0 + jitter)
            }
            UplinkPattern::Poisson => sample_exponential(rng, self.interval_ms),
            UplinkPattern::EventDriven => sample_exponential(rng, self.interval_ms * 2.0),
        };
        (interval as u64).max(MIN_UPLINK_INTERVAL_MS)
    }

    /// Synthetic sensor reading: temperature, humidity, battery voltage as
    /// three big-endian f32s, padded or truncated to the configured size.
    pub fn telemetry_payload(&self, rng: &mut StdRng) -> Vec<u8> {
        let temperature: f32 = rng.gen_range(15.0..35.0);
        let humidity: f32 = rng.gen_range(30.0..80.0);
        let battery: f32 = rng.gen_range(2.8..4.2);

        let mut payload = Vec::with_capacity(self.payload_bytes.max(12));
        payload.extend_from_slice(&temperature.to_be_bytes());
        payload.extend_from_slice(&humidity.to_be_bytes());
        payload.extend_from_slice(&battery.to_be_bytes());
        payload.resize(self.payload_bytes, 0);
        payload
    }

    /// Telemetry is mostly routine: 30% normal, 70% best-effort.
    pub fn sample_qos(&self, rng: &mut StdRng) -> QosClass {
        if rng.gen_range(0.0..1.0) < 0.3 {
            QosClass::Normal
        } else {
            QosClass::BestEffort
        }
    }
}

/// Fleet-wide downlink command arrivals.
#[derive(Debug, Clone)]
pub struct DownlinkTrafficModel {
    pattern: DownlinkPattern,
    rate_per_hour: f64,
    payload_bytes: usize,
    priority_weights: [f64; 3],
}

impl DownlinkTrafficModel {
    pub fn new(config: &DownlinkTrafficConfig) -> Self {
        Self {
            pattern: config.pattern,
            rate_per_hour: config.mean_rate_per_hour,
            payload_bytes: config.payload_bytes,
            priority_weights: [
                config.priority_distribution.critical,
                config.priority_distribution.normal,
                config.priority_distribution.best_effort,
            ],
        }
    }

    pub fn enabled(&self) -> bool {
        self.rate_per_hour > 0.0
    }

    pub fn sample_priority(&self, rng: &mut StdRng) -> QosClass {
        let dist = WeightedIndex::new(self.priority_weights).expect("priority weights");
        match dist.sample(rng) {
            0 => QosClass::Critical,
            1 => QosClass::Normal,
            _ => QosClass::BestEffort,
        }
    }

    /// Delivery deadline by priority: 10 minutes, 1 hour, 24 hours.
    pub fn deadline_s(qos: QosClass) -> f64 {
        match qos {
            QosClass::Critical => 600.0,
            QosClass::Normal => 3_600.0,
            QosClass::BestEffort => 86_400.0,
        }
    }

    /// Target delivery probability by priority.
    pub fn prob_target(qos: QosClass) -> f64 {
        match qos {
            QosClass::Critical => 0.99,
            QosClass::Normal => 0.90,
            QosClass::BestEffort => 0.50,
        }
    }

    /// Command payload by type: reporting interval, threshold, mode,
    /// actuator state, time sync, or generic random bytes.
    pub fn command_payload(&self, cmd_type: u8, now_ms: u64, rng: &mut StdRng) -> Vec<u8> {
        match cmd_type {
            0 => {
                let interval_s: u16 = rng.gen_range(60..900);
                interval_s.to_be_bytes().to_vec()
            }
            1 => {
                let threshold: f32 = rng.gen_range(0.0..100.0);
                threshold.to_be_bytes().to_vec()
            }
            2 => vec![rng.gen_range(0..4u8)],
            3 => vec![rng.gen_range(0..2u8)],
            4 => {
                let timestamp_s = (now_ms / 1_000) as u32;
                timestamp_s.to_be_bytes().to_vec()
            }
            _ => {
                let mut payload = vec![0u8; self.payload_bytes];
                rng.fill(payload.as_mut_slice());
                payload
            }
        }
    }

    /// Inter-arrival until the next command across the whole fleet.
    pub fn next_interval_ms(&self, num_devices: u32, rng: &mut StdRng) -> u64 {
        let total_rate_per_ms = self.rate_per_hour * num_devices as f64 / MS_PER_HOUR as f64;
        if total_rate_per_ms <= 0.0 {
            return u64::MAX;
        }
        let mean_ms = 1.0 / total_rate_per_ms;
        let interval = match self.pattern {
            DownlinkPattern::Uniform => mean_ms,
            DownlinkPattern::Bursty => {
                if rng.gen_range(0.0..1.0) < 0.1 {
                    sample_exponential(rng, 1_000.0)
                } else {
                    sample_exponential(rng, mean_ms)
                }
            }
            DownlinkPattern::Scheduled => MS_PER_HOUR as f64 / self.rate_per_hour,
        };
        (interval as u64).max(MIN_COMMAND_INTERVAL_MS)
    }
}

fn sample_exponential(rng: &mut StdRng, mean_ms: f64) -> f64 {
    if mean_ms <= 0.0 {
        return 0.0;
    }
    Exp::new(1.0 / mean_ms).expect("positive rate").sample(rng)
}

/// Gateway-side command generator: pick a device, draw a command, and queue
/// it once per enabled protocol so every protocol sees the same offered
/// load.
pub async fn downlink_command_task(world: SharedWorld, clock: VirtualClock) {
    let enabled = {
        let w = world.borrow();
        if !w.downlink_traffic.enabled() {
            return;
        }
        w.protocols.enabled.clone()
    };

    loop {
        let interval_ms = {
            let mut w = world.borrow_mut();
            let w = &mut *w;
            let now_ms = clock.now_ms();

            let device_id = w.rng.gen_range(0..w.devices.len() as u32);
            let qos = w.downlink_traffic.sample_priority(&mut w.rng);
            let cmd_type: u8 = w.rng.gen_range(0..8);
            let payload = w
                .downlink_traffic
                .command_payload(cmd_type, now_ms, &mut w.rng);
            for &protocol in &enabled {
                w.gateway.queue_command(
                    device_id,
                    cmd_type,
                    payload.clone(),
                    qos,
                    DownlinkTrafficModel::deadline_s(qos),
                    DownlinkTrafficModel::prob_target(qos),
                    protocol,
                    now_ms,
                );
            }

            let num_devices = w.devices.len() as u32;
            w.downlink_traffic.next_interval_ms(num_devices, &mut w.rng)
        };
        clock.sleep_ms(interval_ms).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(11)
    }

    #[test]
    fn periodic_interval_stays_within_jitter_band() {
        let model = UplinkTrafficModel::new(&UplinkTrafficConfig {
            pattern: UplinkPattern::Periodic,
            interval_s: 600.0,
            payload_bytes: 20,
            jitter_ratio: 0.1,
        });
        let mut rng = rng();
        for _ in 0..500 {
            let interval = model.next_interval_ms(&mut rng);
            assert!((540_000..=660_000).contains(&interval));
        }
    }

    #[test]
    fn zero_jitter_is_exactly_periodic() {
        let model = UplinkTrafficModel::new(&UplinkTrafficConfig {
            pattern: UplinkPattern::Periodic,
            interval_s: 60.0,
            payload_bytes: 20,
            jitter_ratio: 0.0,
        });
        let mut rng = rng();
        assert_eq!(model.next_interval_ms(&mut rng), 60_000);
    }

    #[test]
    fn intervals_never_undercut_the_floor() {
        let model = UplinkTrafficModel::new(&UplinkTrafficConfig {
            pattern: UplinkPattern::Poisson,
            interval_s: 1.0,
            payload_bytes: 20,
            jitter_ratio: 0.0,
        });
        let mut rng = rng();
        for _ in 0..500 {
            assert!(model.next_interval_ms(&mut rng) >= MIN_UPLINK_INTERVAL_MS);
        }
    }

    #[test]
    fn telemetry_payload_has_configured_size() {
        let model = UplinkTrafficModel::new(&UplinkTrafficConfig {
            payload_bytes: 20,
            ..UplinkTrafficConfig::default()
        });
        let mut rng = rng();
        let payload = model.telemetry_payload(&mut rng);
        assert_eq!(payload.len(), 20);
        // First reading decodes to a plausible temperature.
        let temperature = f32::from_be_bytes(payload[0..4].try_into().unwrap());
        assert!((15.0..35.0).contains(&temperature));

        let tiny = UplinkTrafficModel::new(&UplinkTrafficConfig {
            payload_bytes: 8,
            ..UplinkTrafficConfig::default()
        });
        assert_eq!(tiny.telemetry_payload(&mut rng).len(), 8);
    }

    #[test]
    fn qos_split_favors_best_effort() {
        let model = UplinkTrafficModel::new(&UplinkTrafficConfig::default());
        let mut rng = rng();
        let mut normal = 0;
        for _ in 0..2_000 {
            if model.sample_qos(&mut rng) == QosClass::Normal {
                normal += 1;
            }
        }
        // 30% ± a generous margin.
        assert!((450..750).contains(&normal));
    }

    #[test]
    fn priority_distribution_matches_weights() {
        let model = DownlinkTrafficModel::new(&DownlinkTrafficConfig::default());
        let mut rng = rng();
        let mut critical = 0;
        let mut best_effort = 0;
        for _ in 0..2_000 {
            match model.sample_priority(&mut rng) {
                QosClass::Critical => critical += 1,
                QosClass::BestEffort => best_effort += 1,
                QosClass::Normal => {}
            }
        }
        assert!(critical < 250);
        assert!(best_effort > 1_200);
    }

    #[test]
    fn deadlines_and_targets_by_priority() {
        assert_eq!(DownlinkTrafficModel::deadline_s(QosClass::Critical), 600.0);
        assert_eq!(DownlinkTrafficModel::deadline_s(QosClass::Normal), 3_600.0);
        assert_eq!(
            DownlinkTrafficModel::deadline_s(QosClass::BestEffort),
            86_400.0
        );
        assert_eq!(DownlinkTrafficModel::prob_target(QosClass::Critical), 0.99);
        assert_eq!(DownlinkTrafficModel::prob_target(QosClass::BestEffort), 0.50);
    }

    #[test]
    fn command_payloads_follow_type() {
        let model = DownlinkTrafficModel::new(&DownlinkTrafficConfig::default());
        let mut rng = rng();
        assert_eq!(model.command_payload(0, 0, &mut rng).len(), 2);
        assert_eq!(model.command_payload(1, 0, &mut rng).len(), 4);
        assert_eq!(model.command_payload(2, 0, &mut rng).len(), 1);
        assert_eq!(model.command_payload(3, 0, &mut rng).len(), 1);
        let sync = model.command_payload(4, 90_000, &mut rng);
        assert_eq!(u32::from_be_bytes(sync.try_into().unwrap()), 90);
        assert_eq!(model.command_payload(7, 0, &mut rng).len(), 10);
    }

    #[test]
    fn scheduled_pattern_is_deterministic() {
        let model = DownlinkTrafficModel::new(&DownlinkTrafficConfig {
            pattern: DownlinkPattern::Scheduled,
            mean_rate_per_hour: 4.0,
            ..DownlinkTrafficConfig::default()
        });
        let mut rng = rng();
        assert_eq!(model.next_interval_ms(10, &mut rng), 900_000);
    }

    #[test]
    fn zero_rate_disables_generation() {
        let model = DownlinkTrafficModel::new(&DownlinkTrafficConfig {
            mean_rate_per_hour: 0.0,
            ..DownlinkTrafficConfig::default()
        });
        assert!(!model.enabled());
    }
}
