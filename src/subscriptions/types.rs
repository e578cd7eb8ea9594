//! Listener capabilities and listener sets.

use crate::tag::Tag;
use crate::types::TagId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Receives every change of the tags it is subscribed to.
pub trait TagListener: Send + Sync {
    fn on_update(&self, tag: &Tag);
}

/// A listener that can take the initial values of a subscription as one batch
/// before any live update.
pub trait InitialValuesListener: TagListener {
    fn on_initial_update(&self, initial_values: &[Tag]);
}

/// Meta-listener told when tags enter or leave the cache.
pub trait SubscriptionListener: Send + Sync {
    /// Ids that were not in the cache before this subscription.
    fn on_new_tag_subscriptions(&self, tag_ids: &HashSet<TagId>);

    /// Ids that lost their last listener and were removed.
    fn on_unsubscribe(&self, tag_ids: &HashSet<TagId>);
}

/// Identity of a listener object (its allocation address).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey(usize);

impl ListenerKey {
    pub fn of<T: ?Sized>(listener: &Arc<T>) -> Self {
        ListenerKey(Arc::as_ptr(listener) as *const () as usize)
    }
}

impl fmt::Debug for ListenerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerKey({:#x})", self.0)
    }
}

/// A subscriber, tagged with the capabilities it supports.
#[derive(Clone)]
pub enum Listener {
    Live(Arc<dyn TagListener>),
    WithInitialValues(Arc<dyn InitialValuesListener>),
}

impl Listener {
    pub fn live<L: TagListener + 'static>(listener: Arc<L>) -> Self {
        Listener::Live(listener)
    }

    pub fn with_initial_values<L: InitialValuesListener + 'static>(listener: Arc<L>) -> Self {
        Listener::WithInitialValues(listener)
    }

    pub fn key(&self) -> ListenerKey {
        match self {
            Listener::Live(l) => ListenerKey::of(l),
            Listener::WithInitialValues(l) => ListenerKey::of(l),
        }
    }

    pub fn on_update(&self, tag: &Tag) {
        match self {
            Listener::Live(l) => l.on_update(tag),
            Listener::WithInitialValues(l) => l.on_update(tag),
        }
    }

    pub(crate) fn initial_values(&self) -> Option<&dyn InitialValuesListener> {
        match self {
            Listener::Live(_) => None,
            Listener::WithInitialValues(l) => Some(l.as_ref()),
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Listener::Live(_) => write!(f, "Listener::Live({:?})", self.key()),
            Listener::WithInitialValues(_) => {
                write!(f, "Listener::WithInitialValues({:?})", self.key())
            }
        }
    }
}

/// Listeners registered on one cache entry, keyed by identity.
#[derive(Clone, Debug, Default)]
pub struct ListenerSet {
    listeners: HashMap<ListenerKey, Listener>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the listener was already present.
    pub fn insert(&mut self, listener: Listener) -> bool {
        self.listeners.insert(listener.key(), listener).is_none()
    }

    pub fn remove(&mut self, key: ListenerKey) -> Option<Listener> {
        self.listeners.remove(&key)
    }

    pub fn contains(&self, key: ListenerKey) -> bool {
        self.listeners.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = ListenerKey> + '_ {
        self.listeners.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Listener> {
        self.listeners.values()
    }

    /// Move every listener of `other` into this set.
    pub fn merge(&mut self, other: ListenerSet) {
        self.listeners.extend(other.listeners);
    }
}

impl IntoIterator for ListenerSet {
    type Item = Listener;
    type IntoIter = std::collections::hash_map::IntoValues<ListenerKey, Listener>;

    fn into_iter(self) -> Self::IntoIter {
        self.listeners.into_values()
    }
}
