//! Simulation assembly and the driver loop.
//!
//! `Simulation::new` builds the world (channel, coordinator, gateway,
//! device arena, traffic models, metrics) on one deterministic engine and
//! spawns every process: one task per device, the downlink command
//! generator, the gateway sweeper, and the metrics snapshotter. `run`
//! advances virtual time in `time_step_ms` chunks purely to drive progress
//! reporting; scheduling underneath is event-exact.
//!
//! The world lives in a single `Rc<RefCell<..>>` arena: the engine is
//! strictly single-threaded and tasks only borrow between yields, so the
//! coordinator arena (spec'd session graph) needs no locks and no cyclic
//! ownership.

pub mod channel;
pub mod device;
pub mod gateway;
pub mod metrics;
pub mod network;
pub mod traffic;
pub mod types;

use crate::config::{NetworkType, ProtocolsConfig, SimulatorConfig};
use crate::engine::{Engine, Spawner, VirtualClock};
use crate::protocols::coap::CoapProtocol;
use crate::protocols::mqtt_sn::MqttSnProtocol;
use crate::protocols::novel::NovelProtocol;
use crate::protocols::ProtocolId;
use channel::{LorawanChannel, NbIotChannel, RadioChannel};
use device::{device_task, DeviceNode};
use gateway::Gateway;
use metrics::MetricsCollector;
use network::NetworkCoordinator;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::RefCell;
use std::rc::Rc;
use traffic::{downlink_command_task, DownlinkTrafficModel, UplinkTrafficModel};

/// Gateway housekeeping cadence (expired-command reap, idle sessions).
const GATEWAY_SWEEP_INTERVAL_MS: u64 = 60_000;

/// The codecs enabled for a run.
pub struct ProtocolSet {
    pub novel: Option<NovelProtocol>,
    pub mqtt_sn: Option<MqttSnProtocol>,
    pub coap: Option<CoapProtocol>,
    /// Enabled protocols in their fixed comparison order.
    pub enabled: Vec<ProtocolId>,
}

impl ProtocolSet {
    pub fn from_config(config: &ProtocolsConfig) -> Self {
        let mut enabled = Vec::new();
        let novel = config.novel_lpwan.enabled.then(|| {
            enabled.push(ProtocolId::NovelLpwan);
            NovelProtocol::new(&config.novel_lpwan)
        });
        let mqtt_sn = config.mqtt_sn.enabled.then(|| {
            enabled.push(ProtocolId::MqttSn);
            MqttSnProtocol::new(&config.mqtt_sn)
        });
        let coap = config.coap.enabled.then(|| {
            enabled.push(ProtocolId::Coap);
            CoapProtocol::new(&config.coap)
        });
        Self {
            novel,
            mqtt_sn,
            coap,
            enabled,
        }
    }
}

/// All mutable simulation state, owned by the coordinator arena.
pub struct World {
    pub power: crate::config::PowerConfig,
    pub rng: StdRng,
    pub network: NetworkCoordinator,
    pub gateway: Gateway,
    pub devices: Vec<DeviceNode>,
    pub metrics: MetricsCollector,
    pub protocols: ProtocolSet,
    pub uplink_traffic: UplinkTrafficModel,
    pub downlink_traffic: DownlinkTrafficModel,
}

pub type SharedWorld = Rc<RefCell<World>>;

pub struct Simulation {
    engine: Engine,
    clock: VirtualClock,
    spawner: Spawner,
    world: SharedWorld,
    duration_ms: u64,
    step_ms: u64,
}

impl Simulation {
    pub fn new(config: &SimulatorConfig) -> Self {
        let engine = Engine::new();
        let clock = engine.clock();
        let spawner = engine.spawner();

        let mut rng = StdRng::seed_from_u64(config.simulation.seed);
        let protocols = ProtocolSet::from_config(&config.protocols);

        let channel = match config.network.network_type {
            NetworkType::Lorawan => {
                RadioChannel::Lorawan(LorawanChannel::new(&config.network.lorawan))
            }
            NetworkType::Nbiot => RadioChannel::NbIot(NbIotChannel::new(&config.network.nbiot)),
        };
        log::info!(
            "network initialized: {:?}, {} devices, {} gateway(s)",
            config.network.network_type,
            config.network.num_devices,
            config.network.num_gateways
        );

        let gateway = Gateway::new(
            &config.gateway,
            config.protocols.novel_lpwan.ack_window_size,
            config.protocols.novel_lpwan.qos_classes.clone(),
        );

        let devices: Vec<DeviceNode> = (0..config.network.num_devices)
            .map(|id| DeviceNode::new(id, &config.device.power, &protocols, &mut rng))
            .collect();

        let metrics = MetricsCollector::new(
            config.simulation.warmup_ms(),
            (config.metrics.collect_interval_s * 1_000.0) as u64,
        );

        let world: SharedWorld = Rc::new(RefCell::new(World {
            power: config.device.power.clone(),
            rng,
            network: NetworkCoordinator::new(channel),
            gateway,
            devices,
            metrics,
            protocols,
            uplink_traffic: UplinkTrafficModel::new(&config.traffic.uplink),
            downlink_traffic: DownlinkTrafficModel::new(&config.traffic.downlink),
        }));

        for device_id in 0..config.network.num_devices {
            spawner.spawn(device_task(
                world.clone(),
                clock.clone(),
                spawner.clone(),
                device_id,
            ));
        }
        spawner.spawn(downlink_command_task(world.clone(), clock.clone()));
        spawner.spawn(gateway_sweep_task(world.clone(), clock.clone()));
        spawner.spawn(metrics_snapshot_task(world.clone(), clock.clone()));

        Self {
            engine,
            clock,
            spawner,
            world,
            duration_ms: config.simulation.duration_ms(),
            step_ms: config.simulation.time_step_ms,
        }
    }

    /// Drive the run to completion and finalize metrics and energy
    /// integrators.
    pub fn run(&mut self) {
        log::info!(
            "starting simulation: {} ms of virtual time",
            self.duration_ms
        );
        let mut current_ms = 0u64;
        let mut next_progress_pct = 10u64;
        while current_ms < self.duration_ms {
            let target_ms = (current_ms + self.step_ms).min(self.duration_ms);
            self.engine.run_until_ms(target_ms);
            current_ms = target_ms;
            let pct = current_ms * 100 / self.duration_ms;
            if pct >= next_progress_pct {
                log::info!("simulation progress: {pct}%");
                next_progress_pct += 10;
            }
        }
        log::info!("simulation completed");

        let mut w = self.world.borrow_mut();
        let w = &mut *w;
        for device in &mut w.devices {
            device.energy.accumulate_to(self.duration_ms);
        }
        w.metrics.finalize();
    }

    pub fn shared_world(&self) -> SharedWorld {
        self.world.clone()
    }

    pub fn clock(&self) -> VirtualClock {
        self.clock.clone()
    }

    pub fn spawner(&self) -> Spawner {
        self.spawner.clone()
    }
}

/// Periodic gateway housekeeping.
async fn gateway_sweep_task(world: SharedWorld, clock: VirtualClock) {
    loop {
        clock.sleep_ms(GATEWAY_SWEEP_INTERVAL_MS).await;
        let mut w = world.borrow_mut();
        let w = &mut *w;
        w.gateway.sweep(clock.now_ms(), &mut w.metrics);
    }
}

/// Periodic aggregate snapshots (suppressed during warmup).
async fn metrics_snapshot_task(world: SharedWorld, clock: VirtualClock) {
    let interval_ms = {
        let w = world.borrow();
        w.metrics.collect_interval_ms.max(1)
    };
    loop {
        clock.sleep_ms(interval_ms).await;
        let mut w = world.borrow_mut();
        w.metrics.snapshot(clock.now_ms());
    }
}
