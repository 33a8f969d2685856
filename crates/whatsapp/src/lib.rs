//! Protocol client backed by a bridge sidecar.
//!
//! The sidecar speaks the chat protocol and exposes it to the gateway as
//! JSON frames over a local WebSocket. This crate implements
//! [`chatgate_protocol::ProtocolClient`] on top of that link and can
//! supervise the sidecar process itself.

pub mod client;
pub mod process;
pub mod sidecar;
pub mod types;

pub use {
    client::{SidecarClient, SidecarClientFactory},
    process::{SidecarConfig, SidecarProcess, find_sidecar_dir, start_sidecar},
    sidecar::{DEFAULT_SIDECAR_PORT, SidecarHandle, connect_with_retry},
};
