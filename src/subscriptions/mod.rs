//! Subscriptions of listeners to cached tags.
//!
//! This module provides:
//! - Listener capabilities: plain live updates, or live updates plus one
//!   batch of initial values
//! - Meta-listeners told when tags enter or leave the cache
//! - [`SubscriptionManager`], which creates missing cache entries on
//!   subscribe and removes entries that lose their last listener
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::new(engine, resolver);
//!
//! let display = Arc::new(Display::default());
//! manager.subscribe(&ids, Listener::with_initial_values(Arc::clone(&display)), true)?;
//!
//! // Later
//! let removed = manager.unsubscribe_all(ListenerKey::of(&display));
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    InitialValuesListener, Listener, ListenerKey, ListenerSet, SubscriptionListener, TagListener,
};
