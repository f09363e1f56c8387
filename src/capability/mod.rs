//! Capability server connections
//!
//! One [`CapabilityClient`] per configured server, speaking JSON-RPC over the
//! subprocess's stdio. The session layer only sees the `CapabilityPort`
//! trait from the domain module.

mod client;
mod transport;

pub use client::CapabilityClient;
pub use transport::{StdioTransport, Transport};
