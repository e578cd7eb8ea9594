//! Interfaces of the collaborators the cache talks to.
//!
//! None of these are implemented here except [`crate::push::UpdateDispatcher`],
//! a channel-fed [`PushRegistry`]. Transports, the supervision subsystem and
//! the name resolver are provided by the embedding application.

use crate::tag::TagController;
use crate::types::{TagId, TagUpdate, TagValueUpdate};
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Broker or network failure reported by a collaborator.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("Transport error: {0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        TransportError(message.into())
    }
}

/// Synchronous requests to the server. Calls may block for a network round trip.
pub trait RequestHandler: Send + Sync {
    /// Static configuration and current value of each id the server knows.
    fn fetch_tag_states(&self, ids: &HashSet<TagId>) -> Result<Vec<TagUpdate>, TransportError>;

    /// Current values only.
    fn fetch_tag_values(&self, ids: &HashSet<TagId>) -> Result<Vec<TagValueUpdate>, TransportError>;
}

/// Registration of cache entries for asynchronous value delivery.
///
/// Implementations deliver updates by calling
/// [`TagController::update_value`] on the registered entry, from their own
/// thread.
pub trait PushRegistry: Send + Sync {
    fn register(&self, tag: Arc<TagController>) -> Result<(), TransportError>;

    fn unregister(&self, tag: &TagController) -> Result<(), TransportError>;

    fn is_registered(&self, tag: &TagController) -> bool;
}

/// Receiver of connection and heartbeat transitions.
pub trait ConnectionObserver: Send + Sync {
    fn on_disconnect(&self);

    fn on_connect(&self);

    fn on_heartbeat_expired(&self);

    fn on_heartbeat_resumed(&self);
}

/// Heartbeat and producer health monitoring.
pub trait SupervisionService: Send + Sync {
    /// Subscribe to the four connection/heartbeat events.
    fn add_connection_observer(&self, observer: Weak<dyn ConnectionObserver>);

    /// Forward producer events for the given ids to
    /// [`TagController::on_supervision_update`].
    fn add_supervision_listener(
        &self,
        tag: Arc<TagController>,
        process_ids: &[u64],
        equipment_ids: &[u64],
        sub_equipment_ids: &[u64],
    );

    fn remove_supervision_listener(&self, tag: &TagController);

    /// Re-read the health of all producers from the server.
    fn refresh_supervision_status(&self);
}

/// Resolves a tag name pattern (with `*` and `?` wildcards) to ids.
pub trait PatternResolver: Send + Sync {
    fn resolve(&self, pattern: &str) -> Result<HashSet<TagId>, TransportError>;
}
