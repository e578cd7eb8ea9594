//! Subscription manager: ties listeners to cache entries.

use crate::error::{CacheError, Result};
use crate::remote::PatternResolver;
use crate::store::TagStore;
use crate::sync::SyncEngine;
use crate::tag::Tag;
use crate::types::TagId;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::types::{InitialValuesListener, Listener, ListenerKey, SubscriptionListener};

/// Public entry point for subscribing listeners to tags.
///
/// There is no subscription table: a subscription is the presence of a
/// listener in an entry's listener set, and "all tags of a listener" is a
/// scan of the active cache. Subscribe and unsubscribe calls are serialized
/// so an entry cannot be removed while another call is attaching to it.
pub struct SubscriptionManager {
    store: Arc<TagStore>,
    engine: Arc<SyncEngine>,
    resolver: Arc<dyn PatternResolver>,
    subscription_lock: Mutex<()>,
    /// Meta-listeners by identity.
    meta_listeners: RwLock<HashMap<ListenerKey, Arc<dyn SubscriptionListener>>>,
}

impl SubscriptionManager {
    pub fn new(engine: Arc<SyncEngine>, resolver: Arc<dyn PatternResolver>) -> Self {
        Self {
            store: Arc::clone(engine.store()),
            engine,
            resolver,
            subscription_lock: Mutex::new(()),
            meta_listeners: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<TagStore> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    // --- Subscribe ---

    /// Subscribe a listener to the given tags, creating and synchronizing
    /// entries that are not cached yet.
    ///
    /// With `deliver_initial_separately`, a listener that accepts initial
    /// values gets one batch of snapshots before it is attached to any entry.
    /// An entry that changed in between sends its new state once attached, so
    /// nothing is missed. Other listeners get the current state of each entry
    /// as a regular update.
    pub fn subscribe(
        &self,
        ids: &HashSet<TagId>,
        listener: Listener,
        deliver_initial_separately: bool,
    ) -> Result<()> {
        if ids.is_empty() {
            debug!(listener = ?listener.key(), "Subscribe called with no tags");
            return Ok(());
        }

        let created = {
            let _subscribe = self.subscription_lock.lock();
            let created = self.engine.init_tags(ids)?;

            let initial: HashMap<TagId, Tag> = match listener.initial_values() {
                Some(batch) if deliver_initial_separately => {
                    let snapshots: Vec<Tag> = ids
                        .iter()
                        .filter_map(|id| self.store.get(*id))
                        .map(|tag| tag.snapshot())
                        .collect();
                    deliver_initial(batch, &snapshots, listener.key());
                    snapshots.into_iter().map(|tag| (tag.id, tag)).collect()
                }
                _ => HashMap::new(),
            };

            // Placement happens under the store lock; delivery after it, so a
            // listener may switch the cache mode from its callback.
            let tags = self.store.attach(ids, &listener);
            for tag in &tags {
                tag.catch_up(&listener, initial.get(&tag.id()));
            }

            info!(listener = ?listener.key(), tags = tags.len(), new = created.len(), "Subscribed listener");
            created
        };

        if !created.is_empty() {
            self.fire_meta(|meta| meta.on_new_tag_subscriptions(&created));
        }
        Ok(())
    }

    /// Resolve name patterns and subscribe to the union of the matches.
    /// Returns the matched ids.
    pub fn subscribe_by_pattern<I, S>(
        &self,
        patterns: I,
        listener: Listener,
        deliver_initial_separately: bool,
    ) -> Result<HashSet<TagId>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns: Vec<S> = patterns.into_iter().collect();
        if patterns.is_empty() {
            return Err(CacheError::InvalidArgument("No tag name pattern given".to_string()));
        }
        if patterns.iter().any(|p| p.as_ref().trim().is_empty()) {
            return Err(CacheError::InvalidArgument("Tag name pattern must not be blank".to_string()));
        }

        let mut ids = HashSet::new();
        for pattern in &patterns {
            let matched = self.resolver.resolve(pattern.as_ref())?;
            debug!(pattern = pattern.as_ref(), matched = matched.len(), "Resolved tag name pattern");
            ids.extend(matched);
        }

        self.subscribe(&ids, listener, deliver_initial_separately)?;
        Ok(ids)
    }

    // --- Unsubscribe ---

    /// Detach a listener from the given tags. Entries left without any
    /// listener are removed from the cache; their ids are returned. Ids that
    /// are not cached are ignored.
    pub fn unsubscribe(&self, ids: &HashSet<TagId>, listener: ListenerKey) -> HashSet<TagId> {
        let removed = {
            let _subscribe = self.subscription_lock.lock();
            let orphaned = self.store.detach(ids, listener);
            self.remove_orphaned(orphaned, listener)
        };
        self.after_unsubscribe(&removed);
        removed
    }

    /// Detach a listener from every tag it is subscribed to.
    pub fn unsubscribe_all(&self, listener: ListenerKey) -> HashSet<TagId> {
        let removed = {
            let _subscribe = self.subscription_lock.lock();
            let orphaned = self.store.detach_all(listener);
            self.remove_orphaned(orphaned, listener)
        };
        self.after_unsubscribe(&removed);
        removed
    }

    fn remove_orphaned(&self, orphaned: HashSet<TagId>, listener: ListenerKey) -> HashSet<TagId> {
        self.engine.remove_tags(&orphaned);
        debug!(?listener, removed = orphaned.len(), "Unsubscribed listener");
        orphaned
    }

    fn after_unsubscribe(&self, removed: &HashSet<TagId>) {
        if !removed.is_empty() {
            self.fire_meta(|meta| meta.on_unsubscribe(removed));
        }
    }

    // --- Meta-listeners ---

    pub fn add_subscription_listener(&self, listener: Arc<dyn SubscriptionListener>) {
        self.meta_listeners.write().insert(ListenerKey::of(&listener), listener);
    }

    pub fn remove_subscription_listener(&self, listener: ListenerKey) -> bool {
        self.meta_listeners.write().remove(&listener).is_some()
    }

    fn fire_meta<F>(&self, event: F)
    where
        F: Fn(&dyn SubscriptionListener),
    {
        let meta_listeners = self.meta_listeners.read();
        for (key, meta) in meta_listeners.iter() {
            if panic::catch_unwind(AssertUnwindSafe(|| event(meta.as_ref()))).is_err() {
                error!(listener = ?key, "Subscription listener panicked");
            }
        }
    }

    // --- Reads ---

    /// Snapshots of the given tags. Cached tags come from the active cache;
    /// the rest are fetched from the server without being cached.
    pub fn get_tags(&self, ids: &HashSet<TagId>) -> Result<Vec<Tag>> {
        let mut tags = Vec::with_capacity(ids.len());
        let mut missing = HashSet::new();
        for (id, tag) in self.store.get_many(ids) {
            match tag {
                Some(tag) => tags.push(tag.snapshot()),
                None => {
                    missing.insert(id);
                }
            }
        }

        if !missing.is_empty() {
            tags.extend(self.engine.fetch_uncached(&missing)?);
        }
        Ok(tags)
    }

    pub fn get_tag(&self, id: TagId) -> Result<Tag> {
        if let Some(tag) = self.store.get(id) {
            return Ok(tag.snapshot());
        }
        let mut fetched = self.engine.fetch_uncached(&HashSet::from([id]))?;
        Ok(fetched
            .pop()
            .unwrap_or_else(|| Tag::unknown(id, self.store.config().unknown_tag_reason.as_str())))
    }

    /// Snapshots of every tag the listener is subscribed to.
    pub fn get_subscriptions(&self, listener: ListenerKey) -> Vec<Tag> {
        self.store
            .all_with_listener(listener)
            .iter()
            .map(|tag| tag.snapshot())
            .collect()
    }

    pub fn get_subscription_ids(&self, listener: ListenerKey) -> HashSet<TagId> {
        self.store.all_ids_with_listener(listener)
    }

    pub fn is_subscribed(&self, listener: ListenerKey) -> bool {
        !self.store.all_with_listener(listener).is_empty()
    }

    pub fn cache_size(&self) -> usize {
        self.store.len()
    }

    // --- Refresh ---

    pub fn refresh(&self) -> Result<()> {
        self.engine.refresh()
    }

    pub fn refresh_tags(&self, ids: &HashSet<TagId>) -> Result<()> {
        self.engine.refresh_tags(ids)
    }
}

fn deliver_initial(listener: &dyn InitialValuesListener, snapshots: &[Tag], key: ListenerKey) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_initial_update(snapshots)));
    if outcome.is_err() {
        error!(listener = ?key, tags = snapshots.len(), "Listener panicked while handling initial values");
    }
}
