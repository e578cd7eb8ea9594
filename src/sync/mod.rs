//! Synchronization engine.
//!
//! Keeps the live cache consistent with the server: fetches state for new
//! tags, registers them for push delivery, demotes tags the server no longer
//! knows and flags every live tag while the broker or the server heartbeat is
//! lost. Only one synchronization runs at a time.

mod engine;
mod events;

pub use engine::SyncEngine;
