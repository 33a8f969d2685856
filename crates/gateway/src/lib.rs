//! Gateway: the `/api/v3` HTTP surface over the instance registry and the
//! send pipeline.
//!
//! Lifecycle:
//! 1. Open the SQLite store and run migrations
//! 2. Connect the broker and declare the event topology
//! 3. Optionally spawn the protocol sidecar, then connect to it
//! 4. Resume persisted sessions through the registry
//! 5. Serve HTTP until SIGINT/SIGTERM, publishing `app.status` on/off

pub mod auth_middleware;
pub mod error;
pub mod extract;
pub mod instance_routes;
pub mod send_routes;
pub mod server;
pub mod state;

pub use {
    server::{API_PREFIX, build_app, start_gateway},
    state::AppState,
};
