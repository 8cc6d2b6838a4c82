//! # aiolos-link
//!
//! Cellular uplink core of the Aiolos weather station: keeps a SIM7000-class
//! modem powered and attached, and moves telemetry to the backend over HTTP
//! without ever taking the station down with it.
//!
//! ## Crate structure
//!
//! - [`clock`] — Monotonic clock with an injectable mock for virtual time
//! - [`backoff`] — Exponential backoff policy shared by both resilience layers
//! - [`hal`] — Serial, GPIO, watchdog and interrupt-masking traits
//! - [`at`] — Deadline-bounded AT command channel
//! - [`modem`] — Power sequencing, SIM probing, network and TCP bearer
//! - [`supervisor`] — Registration/GPRS upkeep and failure-driven resets
//! - [`http`] — Single-shot HTTP client with its own backoff
//! - [`api`] — Station endpoints and JSON payloads
//! - [`config`] — TOML configuration
//! - [`sim`] — Deterministic SIM7000 simulator
//! - [`uplink`] — Boot-time context owning the three components

pub mod api;
pub mod at;
pub mod backoff;
pub mod clock;
pub mod config;
pub mod error;
pub mod hal;
pub mod http;
pub mod modem;
pub mod sim;
pub mod supervisor;
pub mod uplink;

pub use error::LinkError;
pub use uplink::Uplink;
