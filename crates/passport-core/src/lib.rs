//! Core passport library (handshake controller, provider bridge, SDKs, config).

pub mod bridge;
pub mod config;
pub mod controller;
pub mod logging;
pub mod requester;
pub mod sdk;
pub mod surface;
pub mod telemetry;

pub use passport_types as types;
