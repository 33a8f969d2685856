//! Instance orchestration: the per-session state machine, the occurrence
//! translation table, the live registry and the administrative service.

pub mod error;
pub mod instance;
pub mod qr;
pub mod registry;
pub mod service;
pub mod table;

pub use {
    error::{Error, ErrorKind, Result},
    instance::{Instance, InstanceContext},
    qr::QrCode,
    registry::InstanceRegistry,
    service::{CreateInstance, InstanceService, ServiceSettings},
    table::{ConnectionUpdate, Effect, EventTable, TranslateCtx, Translation},
};
