//! # LPWAN Protocol Simulator
//!
//! A discrete-event simulator comparing an LPWAN-native publish/subscribe
//! protocol against two baselines (an MQTT-SN-style compact pub/sub codec
//! and a CoAP-style request/response codec) under identical traffic,
//! radio, and energy conditions.
//!
//! ## Architecture
//!
//! Everything runs on a single-threaded cooperative executor over a virtual
//! millisecond clock ([`engine`]). Device tasks drive sleep/wake loops and
//! transmit telemetry through every enabled codec; the gateway owns all
//! server-side session state, the priority+deadline command scheduler, and
//! the windowed bitmap ACK tracker; the network coordinator models the
//! radio (airtime, loss, duty cycle, receive windows). The metrics
//! collector streams per-transmission records and derives the comparison
//! KPIs.
//!
//! Given the same seed, configuration, and protocol set, every artifact is
//! bit-identical run-to-run.

pub mod config;
pub mod engine;
pub mod logging;
pub mod protocols;
pub mod simulation;
