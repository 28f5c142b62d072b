//! # OCPP Central
//!
//! OCPP 1.6 Central System engine for EV charge points.
//!
//! ## Architecture
//!
//! - **domain**: settings, capabilities, measurements, transactions and errors
//! - **application**: central system, charge points, connectors, the
//!   outbound correlator and OCPP-J handlers
//! - **interfaces**: WebSocket server
//! - **support**: frame codec, clock, shutdown plumbing

pub mod application;
pub mod config;
pub mod domain;
pub mod interfaces;
pub mod support;

pub use config::{default_config_path, AppConfig};
