//! Interfaces layer: transports in front of the central system

pub mod ws;
