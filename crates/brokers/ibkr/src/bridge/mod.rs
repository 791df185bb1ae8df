//! TCP bridge to TWS / IB Gateway.
//!
//! A small sidecar process owns the actual IB API session and relays
//! requests as length-prefixed JSON messages.

pub mod client;
pub mod protocol;

pub use client::BridgeClient;
