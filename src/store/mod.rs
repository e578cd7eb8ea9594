//! Dual tag store: a live cache, a history cache and the active-mode switch.
//!
//! Both caches map tag ids to independent [`TagController`] instances. Every
//! id in the history cache is also in the live cache; an entry is never shared
//! between the two. Queries always go to the active cache.

mod mode;

use crate::config::CacheConfig;
use crate::subscriptions::{Listener, ListenerKey};
use crate::tag::TagController;
use crate::types::{CacheMode, TagId};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

type TagMap = HashMap<TagId, Arc<TagController>>;

/// The two caches and the mode selecting between them.
struct Caches {
    live: TagMap,
    history: TagMap,
    mode: CacheMode,
}

impl Caches {
    fn active(&self) -> &TagMap {
        match self.mode {
            CacheMode::Live => &self.live,
            CacheMode::History => &self.history,
        }
    }
}

/// Holder of all cached tags.
///
/// Structural changes (insert, remove, mode switch) take the write side of
/// one lock; lookups and scans take the read side. Mode switches are
/// additionally serialized by a separate lock so [`TagStore::is_history_mode`]
/// never waits on a reader.
pub struct TagStore {
    caches: RwLock<Caches>,
    mode_lock: Mutex<()>,
    history_mode: AtomicBool,
    config: CacheConfig,
}

impl TagStore {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            caches: RwLock::new(Caches {
                live: HashMap::with_capacity(config.initial_capacity),
                history: HashMap::new(),
                mode: CacheMode::Live,
            }),
            mode_lock: Mutex::new(()),
            history_mode: AtomicBool::new(false),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // --- Queries on the active cache ---

    pub fn get(&self, id: TagId) -> Option<Arc<TagController>> {
        self.caches.read().active().get(&id).cloned()
    }

    /// Every requested id appears in the result; unknown ids map to `None`.
    pub fn get_many(&self, ids: &HashSet<TagId>) -> HashMap<TagId, Option<Arc<TagController>>> {
        let caches = self.caches.read();
        let active = caches.active();
        ids.iter().map(|id| (*id, active.get(id).cloned())).collect()
    }

    pub fn contains(&self, id: TagId) -> bool {
        self.caches.read().active().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.caches.read().active().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all_with_listener(&self, listener: ListenerKey) -> Vec<Arc<TagController>> {
        self.scan(|tag| tag.is_listener_registered(listener))
    }

    pub fn all_ids_with_listener(&self, listener: ListenerKey) -> HashSet<TagId> {
        self.all_with_listener(listener).iter().map(|t| t.id()).collect()
    }

    pub fn all_for_equipment(&self, equipment_id: u64) -> Vec<Arc<TagController>> {
        self.scan(|tag| tag.depends_on_equipment(equipment_id))
    }

    pub fn all_for_process(&self, process_id: u64) -> Vec<Arc<TagController>> {
        self.scan(|tag| tag.depends_on_process(process_id))
    }

    /// Entries with at least one listener.
    pub fn all_subscribed(&self) -> Vec<Arc<TagController>> {
        self.scan(|tag| tag.has_listeners())
    }

    pub fn mode(&self) -> CacheMode {
        self.caches.read().mode
    }

    pub fn is_history_mode(&self) -> bool {
        self.history_mode.load(Ordering::SeqCst)
    }

    fn scan<F>(&self, filter: F) -> Vec<Arc<TagController>>
    where
        F: Fn(&TagController) -> bool,
    {
        self.caches
            .read()
            .active()
            .values()
            .filter(|tag| filter(tag))
            .cloned()
            .collect()
    }

    // --- Listener placement ---

    /// Register `listener` on the active entries for `ids`. Returns the
    /// entries it was added to.
    ///
    /// Runs under the read lock, so a mode switch cannot move listeners
    /// between the lookup and the insert. Nothing is delivered here.
    pub(crate) fn attach(&self, ids: &HashSet<TagId>, listener: &Listener) -> Vec<Arc<TagController>> {
        let caches = self.caches.read();
        let active = caches.active();
        ids.iter()
            .filter_map(|id| active.get(id))
            .map(|tag| {
                tag.insert_listener(listener.clone());
                Arc::clone(tag)
            })
            .collect()
    }

    /// Remove `listener` from the active entries for `ids`. Returns the ids
    /// of entries left without listeners.
    pub(crate) fn detach(&self, ids: &HashSet<TagId>, listener: ListenerKey) -> HashSet<TagId> {
        let caches = self.caches.read();
        let active = caches.active();
        let mut orphaned = HashSet::new();
        for id in ids {
            let Some(tag) = active.get(id) else {
                continue;
            };
            tag.remove_listener(listener);
            if !tag.has_listeners() {
                orphaned.insert(*id);
            }
        }
        orphaned
    }

    /// Like [`TagStore::all_ids_with_listener`] followed by
    /// [`TagStore::detach`], without a mode switch in between.
    pub(crate) fn detach_all(&self, listener: ListenerKey) -> HashSet<TagId> {
        let caches = self.caches.read();
        let mut orphaned = HashSet::new();
        for (id, tag) in caches.active() {
            if tag.remove_listener(listener) && !tag.has_listeners() {
                orphaned.insert(*id);
            }
        }
        orphaned
    }

    // --- Live cache access for the synchronizer ---

    pub(crate) fn get_live(&self, id: TagId) -> Option<Arc<TagController>> {
        self.caches.read().live.get(&id).cloned()
    }

    pub(crate) fn live_ids(&self) -> HashSet<TagId> {
        self.caches.read().live.keys().copied().collect()
    }

    pub(crate) fn live_tags(&self) -> Vec<Arc<TagController>> {
        self.caches.read().live.values().cloned().collect()
    }

    pub(crate) fn live_len(&self) -> usize {
        self.caches.read().live.len()
    }

    /// Create unknown-state entries for ids missing from the live cache.
    /// Returns the ids that were created.
    pub(crate) fn insert_missing(&self, ids: &HashSet<TagId>) -> HashSet<TagId> {
        let mut caches = self.caches.write();
        let mut created = HashSet::new();
        for id in ids {
            if !caches.live.contains_key(id) {
                let tag = TagController::unknown(*id, &self.config.unknown_tag_reason);
                caches.live.insert(*id, Arc::new(tag));
                created.insert(*id);
            }
        }
        if !created.is_empty() {
            debug!(created = created.len(), total = caches.live.len(), "Added tags to the live cache");
        }
        created
    }

    /// Swap the live entry for `fresh.id()`, moving the old entry's listeners
    /// onto `fresh`. Returns the replaced entry.
    pub(crate) fn replace_live(&self, fresh: Arc<TagController>) -> Option<Arc<TagController>> {
        let mut caches = self.caches.write();
        let old = caches.live.get(&fresh.id()).cloned()?;
        fresh.adopt_listeners(old.take_listeners());
        caches.live.insert(fresh.id(), fresh);
        Some(old)
    }

    /// Remove ids from both caches. Returns the removed live entries.
    pub(crate) fn remove(&self, ids: &HashSet<TagId>) -> Vec<Arc<TagController>> {
        let mut caches = self.caches.write();
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            caches.history.remove(id);
            if let Some(tag) = caches.live.remove(id) {
                removed.push(tag);
            }
        }
        if caches.live.is_empty() {
            info!("Cache is now empty");
        } else {
            info!(remaining = caches.live.len(), "Removed {} tags from the cache", removed.len());
        }
        removed
    }

    /// While in history mode, give new live entries a listener-free copy in
    /// the history cache.
    pub(crate) fn copy_to_history(&self, ids: &HashSet<TagId>) {
        let mut caches = self.caches.write();
        if !caches.mode.is_history() {
            return;
        }
        let Caches { live, history, .. } = &mut *caches;
        for id in ids {
            if let Some(tag) = live.get(id) {
                history
                    .entry(*id)
                    .or_insert_with(|| Arc::new(tag.detached_copy()));
            }
        }
    }
}

impl Default for TagStore {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
