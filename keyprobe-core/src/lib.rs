//! Core library for the `keyprobe` CLI.
//!
//! This crate defines:
//! - Configuration & key resolution
//! - The [`KeyProber`] abstraction and its OpenWeather HTTP implementation
//! - Outcome classification, key comparison and the activation monitor
//!
//! It is used by `keyprobe-cli`, but can also be reused by other binaries or services.

pub mod compare;
pub mod config;
pub mod model;
pub mod monitor;
pub mod probe;

pub use compare::{CityOutcome, Comparison, KeyReport, KeyVerdict, compare, probe_key};
pub use config::{Config, KeyConfig, MonitorConfig};
pub use model::{
    KeyCredential, Observation, ProbeError, ProbeOutcome, ProbeRequest, ProbeSettings, UnitSystem,
    describe_duration, mask_key,
};
pub use monitor::{MonitorReport, check_once, monitor_until_active, monitor_until_active_with};
pub use probe::{
    KeyProber,
    openweather::{Exchange, OpenWeatherProbe},
};
