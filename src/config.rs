//! Configuration model for the simulator.
//!
//! The configuration is a hierarchical YAML document; every section and field
//! carries a default so partial configs load. The effective (defaulted)
//! configuration is re-serialized into the output directory as `config.yaml`
//! so a run is always reproducible from its artifacts alone.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Root configuration document.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub simulation: SimulationConfig,
    pub network: NetworkConfig,
    pub device: DeviceConfig,
    pub traffic: TrafficConfig,
    pub protocols: ProtocolsConfig,
    pub metrics: MetricsConfig,
    pub gateway: GatewayConfig,
}

impl SimulatorConfig {
    /// Load a configuration from a YAML file.
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file: {}", config_path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", config_path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the simulator cannot run meaningfully.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.network.num_devices >= 1,
            "network.num_devices must be at least 1"
        );
        anyhow::ensure!(
            self.simulation.duration_hours > 0.0,
            "simulation.duration_hours must be positive"
        );
        anyhow::ensure!(
            self.simulation.warmup_hours >= 0.0
                && self.simulation.warmup_hours <= self.simulation.duration_hours,
            "simulation.warmup_hours must be within [0, duration_hours]"
        );
        anyhow::ensure!(
            self.simulation.time_step_ms > 0,
            "simulation.time_step_ms must be positive"
        );
        anyhow::ensure!(
            !self.enabled_protocol_names().is_empty(),
            "at least one protocol must be enabled"
        );
        Ok(())
    }

    pub fn enabled_protocol_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.protocols.novel_lpwan.enabled {
            names.push("novel_lpwan");
        }
        if self.protocols.mqtt_sn.enabled {
            names.push("mqtt_sn");
        }
        if self.protocols.coap.enabled {
            names.push("coap");
        }
        names
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub duration_hours: f64,
    pub warmup_hours: f64,
    /// Driver step used for progress reporting only; internal scheduling is
    /// event-exact regardless of this value.
    pub time_step_ms: u64,
    pub seed: u64,
}

impl SimulationConfig {
    pub fn duration_ms(&self) -> u64 {
        (self.duration_hours * 3_600_000.0).round() as u64
    }

    pub fn warmup_ms(&self) -> u64 {
        (self.warmup_hours * 3_600_000.0).round() as u64
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            duration_hours: 1.0,
            warmup_hours: 0.0,
            time_step_ms: 1_000,
            seed: 42,
        }
    }
}

/// Which physical network to model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Lorawan,
    Nbiot,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    #[serde(rename = "type")]
    pub network_type: NetworkType,
    pub num_devices: u32,
    pub num_gateways: u32,
    pub lorawan: LorawanConfig,
    pub nbiot: NbIotConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            network_type: NetworkType::Lorawan,
            num_devices: 100,
            num_gateways: 1,
            lorawan: LorawanConfig::default(),
            nbiot: NbIotConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LorawanConfig {
    pub region: String,
    /// Fraction of any one-hour sliding window a device may transmit.
    pub duty_cycle: f64,
    pub spreading_factors: Vec<u8>,
    pub rx1_delay_ms: u64,
    /// Present for completeness; the downlink path awaits RX1 only.
    pub rx2_delay_ms: u64,
    /// When set, replaces the per-SF packet error rate for every SF.
    /// Used by regression scenarios to run loss-free.
    pub per_override: Option<f64>,
}

impl Default for LorawanConfig {
    fn default() -> Self {
        Self {
            region: "EU868".to_string(),
            duty_cycle: 0.01,
            spreading_factors: vec![7, 8, 9, 10, 11, 12],
            rx1_delay_ms: 1_000,
            rx2_delay_ms: 2_000,
            per_override: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NbIotConfig {
    pub carrier_freq_mhz: u32,
    pub psm_enabled: bool,
    pub edrx_cycle_s: f64,
    /// Residual loss probability after HARQ.
    pub per: f64,
}

impl Default for NbIotConfig {
    fn default() -> Self {
        Self {
            carrier_freq_mhz: 900,
            psm_enabled: true,
            edrx_cycle_s: 20.48,
            per: 0.001,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub power: PowerConfig,
}

/// Power draw per radio state, in milliwatts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PowerConfig {
    pub sleep: f64,
    pub idle: f64,
    pub rx: f64,
    /// Transmit power table: dBm setting → draw in mW.
    pub tx_dbm_to_mw: BTreeMap<i32, f64>,
    /// dBm setting devices transmit at.
    pub tx_power_dbm: i32,
}

impl PowerConfig {
    /// Draw for the configured transmit power, falling back to 80 mW when
    /// the table has no entry.
    pub fn tx_mw(&self) -> f64 {
        self.tx_dbm_to_mw
            .get(&self.tx_power_dbm)
            .copied()
            .unwrap_or(80.0)
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            sleep: 0.001,
            idle: 1.0,
            rx: 12.0,
            tx_dbm_to_mw: BTreeMap::from([(14, 80.0)]),
            tx_power_dbm: 14,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TrafficConfig {
    pub uplink: UplinkTrafficConfig,
    pub downlink: DownlinkTrafficConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UplinkPattern {
    Periodic,
    Poisson,
    EventDriven,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UplinkTrafficConfig {
    pub pattern: UplinkPattern,
    pub interval_s: f64,
    pub payload_bytes: usize,
    pub jitter_ratio: f64,
}

impl Default for UplinkTrafficConfig {
    fn default() -> Self {
        Self {
            pattern: UplinkPattern::Periodic,
            interval_s: 600.0,
            payload_bytes: 20,
            jitter_ratio: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownlinkPattern {
    Uniform,
    Bursty,
    Scheduled,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DownlinkTrafficConfig {
    pub pattern: DownlinkPattern,
    pub mean_rate_per_hour: f64,
    pub payload_bytes: usize,
    pub priority_distribution: PriorityDistribution,
}

impl Default for DownlinkTrafficConfig {
    fn default() -> Self {
        Self {
            pattern: DownlinkPattern::Bursty,
            mean_rate_per_hour: 2.0,
            payload_bytes: 10,
            priority_distribution: PriorityDistribution::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PriorityDistribution {
    pub critical: f64,
    pub normal: f64,
    pub best_effort: f64,
}

impl Default for PriorityDistribution {
    fn default() -> Self {
        Self {
            critical: 0.05,
            normal: 0.25,
            best_effort: 0.70,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProtocolsConfig {
    pub novel_lpwan: NovelLpwanConfig,
    pub mqtt_sn: MqttSnConfig,
    pub coap: CoapConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NovelLpwanConfig {
    pub enabled: bool,
    pub token_size_bytes: usize,
    pub header_size_bytes: usize,
    pub ack_window_size: u16,
    pub ack_base_bits: u8,
    pub epoch_bits: u8,
    pub cmd_types: u8,
    pub qos_classes: Vec<QosClassConfig>,
}

impl Default for NovelLpwanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token_size_bytes: 12,
            header_size_bytes: 5,
            ack_window_size: 16,
            ack_base_bits: 16,
            epoch_bits: 8,
            cmd_types: 8,
            qos_classes: vec![
                QosClassConfig {
                    name: "critical".to_string(),
                    probability: 0.99,
                    deadline_s: 60.0,
                    retries: 3,
                },
                QosClassConfig {
                    name: "normal".to_string(),
                    probability: 0.90,
                    deadline_s: 3_600.0,
                    retries: 2,
                },
                QosClassConfig {
                    name: "best_effort".to_string(),
                    probability: 0.50,
                    deadline_s: 86_400.0,
                    retries: 0,
                },
            ],
        }
    }
}

/// One QoS-D class: the delivery contract is the pair
/// (target probability, deadline) plus a retry budget.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QosClassConfig {
    pub name: String,
    pub probability: f64,
    pub deadline_s: f64,
    pub retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MqttSnConfig {
    pub enabled: bool,
    pub qos_levels: Vec<i8>,
    pub keep_alive_s: u32,
    pub topic_id_type: String,
}

impl Default for MqttSnConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            qos_levels: vec![0, 1, 2, -1],
            keep_alive_s: 60,
            topic_id_type: "predefined".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoapConfig {
    pub enabled: bool,
    pub confirmable_ratio: f64,
    pub max_retransmit: u32,
    pub ack_timeout_s: f64,
}

impl Default for CoapConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            confirmable_ratio: 0.5,
            max_retransmit: 4,
            ack_timeout_s: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Names of metric families to report; informational, the collector
    /// always records the full set.
    pub enabled: Vec<String>,
    pub collect_interval_s: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: Vec::new(),
            collect_interval_s: 60.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub queue_size: usize,
    pub scheduler: String,
    /// Seconds of uplink silence before a device's gateway-side session
    /// falls back to unknown. 0 disables the timeout.
    pub idle_timeout_s: f64,
    pub mqtt_bridge: MqttBridgeConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            queue_size: 1_000,
            scheduler: "priority_deadline".to_string(),
            idle_timeout_s: 0.0,
            mqtt_bridge: MqttBridgeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MqttBridgeConfig {
    pub enabled: bool,
    /// QoS class name → MQTT QoS level used when forwarding uplinks.
    pub qos_mapping: BTreeMap<String, u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_form_a_valid_config() {
        let config = SimulatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.network.num_devices, 100);
        assert_eq!(config.gateway.queue_size, 1_000);
        assert_eq!(config.protocols.novel_lpwan.qos_classes.len(), 3);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = r#"
simulation:
  duration_hours: 2.0
  seed: 12345
network:
  type: nbiot
  num_devices: 50
protocols:
  mqtt_sn:
    enabled: true
"#;
        let config: SimulatorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.simulation.duration_hours, 2.0);
        assert_eq!(config.simulation.seed, 12345);
        assert_eq!(config.network.network_type, NetworkType::Nbiot);
        assert_eq!(config.network.num_devices, 50);
        assert!(config.protocols.novel_lpwan.enabled);
        assert!(config.protocols.mqtt_sn.enabled);
        assert!(!config.protocols.coap.enabled);
        assert_eq!(config.traffic.uplink.interval_s, 600.0);
    }

    #[test]
    fn validation_rejects_zero_devices() {
        let mut config = SimulatorConfig::default();
        config.network.num_devices = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_warmup_beyond_duration() {
        let mut config = SimulatorConfig::default();
        config.simulation.warmup_hours = 2.0;
        config.simulation.duration_hours = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_roundtrips_through_yaml() {
        let config = SimulatorConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: SimulatorConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.simulation.seed, config.simulation.seed);
        assert_eq!(back.device.power.tx_mw(), 80.0);
    }

    #[test]
    fn duration_conversions() {
        let sim = SimulationConfig {
            duration_hours: 0.5,
            warmup_hours: 0.25,
            ..Default::default()
        };
        assert_eq!(sim.duration_ms(), 1_800_000);
        assert_eq!(sim.warmup_ms(), 900_000);
    }
}
