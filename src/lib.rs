//! # Tag Cache
//!
//! Client-side state layer for remotely produced measurement points
//! ("tags"). Keeps a coherent local view of each subscribed tag and survives
//! broker disconnects and heartbeat loss without losing subscribers.
//!
//! ## Core Concepts
//!
//! - **Tag entries**: latest value and quality of one tag, plus its listeners
//! - **Live and history caches**: two independent views of the same tags; the
//!   active one answers queries and delivers to listeners
//! - **Synchronization**: repairs the live cache against the server and flags
//!   every tag while the connection or heartbeat is lost
//! - **Subscriptions**: listeners attached to entries, created on demand
//!
//! ## Example
//!
//! ```ignore
//! use tagsync::{SubscriptionManager, SyncEngine, TagStore, UpdateDispatcher};
//!
//! let store = Arc::new(TagStore::new(CacheConfig::default()));
//! let push = Arc::new(UpdateDispatcher::new(DispatcherConfig::default())?);
//! let engine = SyncEngine::new(store, requests, push.clone(), supervision);
//! let manager = SubscriptionManager::new(engine, resolver);
//!
//! manager.subscribe(&ids, Listener::live(Arc::new(Printer)), false)?;
//!
//! // Freeze the view
//! manager.store().set_history_mode(true);
//! ```

pub mod config;
pub mod error;
pub mod push;
pub mod remote;
pub mod rule;
pub mod store;
pub mod subscriptions;
pub mod sync;
pub mod tag;
pub mod types;

pub use config::{CacheConfig, DispatcherConfig};
pub use error::{CacheError, Result};
pub use push::UpdateDispatcher;
pub use remote::{
    ConnectionObserver, PatternResolver, PushRegistry, RequestHandler, SupervisionService, TransportError,
};
pub use rule::RuleExpression;
pub use store::TagStore;
pub use subscriptions::{
    InitialValuesListener, Listener, ListenerKey, ListenerSet, SubscriptionListener, SubscriptionManager,
    TagListener,
};
pub use sync::SyncEngine;
pub use tag::{Tag, TagController, TagQuality, TagQualityStatus};
pub use types::{
    CacheMode, SupervisionEntity, SupervisionEvent, SupervisionStatus, TagId, TagUpdate, TagValueUpdate,
    Timestamp,
};
