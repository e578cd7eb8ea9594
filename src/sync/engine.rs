//! Live cache synchronization against the server.

use crate::error::{CacheError, Result};
use crate::remote::{ConnectionObserver, PushRegistry, RequestHandler, SupervisionService, TransportError};
use crate::store::TagStore;
use crate::tag::{Tag, TagController, TagQualityStatus};
use crate::types::TagId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Which live entries a synchronization covers.
#[derive(Clone, Copy, Debug)]
pub(super) enum Scope<'a> {
    All,
    Tags(&'a HashSet<TagId>),
}

/// Result of applying one batch of server states.
#[derive(Default)]
struct Applied {
    known: HashSet<TagId>,
    registered: HashSet<TagId>,
}

/// Repairs the live cache against the server.
///
/// Synchronizations and the connection events are serialized by one lock.
/// The two link flags are only written while that lock is held, so the
/// decision to escalate a partial synchronization to a full one always sees
/// a settled state.
///
/// Both flags start raised: until the first completed synchronization or
/// recovery event, the link is not known to be healthy, and the first
/// connection event resynchronizes everything cached so far.
pub struct SyncEngine {
    store: Arc<TagStore>,
    requests: Arc<dyn RequestHandler>,
    push: Arc<dyn PushRegistry>,
    supervision: Arc<dyn SupervisionService>,
    pub(super) sync_lock: Mutex<()>,
    pub(super) broker_down: AtomicBool,
    pub(super) heartbeat_expired: AtomicBool,
}

impl SyncEngine {
    /// Create the engine and register it for connection and heartbeat events.
    pub fn new(
        store: Arc<TagStore>,
        requests: Arc<dyn RequestHandler>,
        push: Arc<dyn PushRegistry>,
        supervision: Arc<dyn SupervisionService>,
    ) -> Arc<Self> {
        let engine = Arc::new(Self {
            store,
            requests,
            push,
            supervision,
            sync_lock: Mutex::new(()),
            broker_down: AtomicBool::new(true),
            heartbeat_expired: AtomicBool::new(true),
        });

        let weak: Weak<SyncEngine> = Arc::downgrade(&engine);
        let observer: Weak<dyn ConnectionObserver> = weak;
        engine.supervision.add_connection_observer(observer);
        engine
    }

    pub fn store(&self) -> &Arc<TagStore> {
        &self.store
    }

    pub fn is_broker_down(&self) -> bool {
        self.broker_down.load(Ordering::SeqCst)
    }

    pub fn is_heartbeat_expired(&self) -> bool {
        self.heartbeat_expired.load(Ordering::SeqCst)
    }

    // --- Synchronization ---

    /// Synchronize every live entry.
    pub fn resync_all(&self) -> Result<()> {
        let _sync = self.sync_lock.lock();
        self.resync_locked(Scope::All)
    }

    /// Synchronize the given live entries. Becomes a full synchronization
    /// while the broker is down or the heartbeat has expired.
    pub fn resync(&self, ids: &HashSet<TagId>) -> Result<()> {
        let _sync = self.sync_lock.lock();
        self.resync_locked(Scope::Tags(ids))
    }

    /// Refresh producer health, then synchronize every live entry.
    pub fn refresh(&self) -> Result<()> {
        self.refresh_supervision();
        self.resync_all()
    }

    /// Refresh producer health, then synchronize the given entries.
    pub fn refresh_tags(&self, ids: &HashSet<TagId>) -> Result<()> {
        self.refresh_supervision();
        self.resync(ids)
    }

    fn refresh_supervision(&self) {
        if self.store.config().refresh_supervision_on_refresh {
            self.supervision.refresh_supervision_status();
        }
    }

    /// Transport failures are turned into quality flags and do not fail the
    /// call; domain errors abort it.
    pub(super) fn resync_locked(&self, scope: Scope<'_>) -> Result<()> {
        let full = matches!(scope, Scope::All) || self.is_broker_down() || self.is_heartbeat_expired();
        let working_set: HashSet<TagId> = match scope {
            Scope::Tags(ids) if !full => {
                let live = self.store.live_ids();
                ids.iter().filter(|id| live.contains(id)).copied().collect()
            }
            _ => self.store.live_ids(),
        };

        if !working_set.is_empty() {
            info!(tags = working_set.len(), full, "Synchronizing live cache with the server");
            match self.synchronize(&working_set, true) {
                Ok(()) => {}
                Err(CacheError::Transport(e)) => {
                    self.on_transport_failure(&e);
                    return Ok(());
                }
                Err(e) => {
                    error!(error = %e, "Live cache synchronization aborted");
                    return Err(e);
                }
            }
        }

        // A completed round trip proves the broker reachable again
        if self.broker_down.swap(false, Ordering::SeqCst) {
            self.validate_live(TagQualityStatus::BrokerDown);
        }
        self.heartbeat_expired.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Fetch states, demote what the server did not return, then fetch values
    /// for entries registered in this round.
    fn synchronize(&self, ids: &HashSet<TagId>, demote_missing: bool) -> Result<()> {
        let applied = self.apply_states(ids)?;

        if demote_missing {
            for id in ids.difference(&applied.known) {
                self.demote(*id);
            }
        }

        self.apply_values(&applied.registered)
    }

    fn apply_states(&self, ids: &HashSet<TagId>) -> Result<Applied> {
        let updates = self.requests.fetch_tag_states(ids)?;
        let mut applied = Applied::default();

        for update in &updates {
            let id = update.id();
            if !ids.contains(&id) {
                debug!(tag_id = %id, "Ignoring unrequested tag in server response");
                continue;
            }
            let Some(tag) = self.store.get_live(id) else {
                debug!(tag_id = %id, "Tag left the cache during synchronization");
                continue;
            };

            let was_unknown = !tag.is_existing();
            tag.update(update)?;
            applied.known.insert(id);

            if was_unknown {
                self.add_supervision(&tag);
            }
            if tag.is_existing() && !self.push.is_registered(&tag) {
                self.push.register(Arc::clone(&tag))?;
                applied.registered.insert(id);
            }
        }

        debug!(
            requested = ids.len(),
            known = applied.known.len(),
            registered = applied.registered.len(),
            "Applied tag states"
        );
        Ok(applied)
    }

    /// Second round trip for freshly registered entries. A value is applied
    /// only if it is newer, since a push update may already have arrived.
    fn apply_values(&self, ids: &HashSet<TagId>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let values = self.requests.fetch_tag_values(ids)?;
        for value in &values {
            if let Some(tag) = self.store.get_live(value.tag_id) {
                if !tag.update_value(value) {
                    debug!(tag_id = %value.tag_id, "Push delivery was ahead of the value request");
                }
            }
        }
        Ok(())
    }

    /// Replace a live entry the server does not know with an undefined one.
    /// The history cache is left as it is.
    fn demote(&self, id: TagId) {
        let Some(tag) = self.store.get_live(id) else {
            return;
        };
        if !tag.is_existing() {
            return;
        }

        self.release(&tag);
        let unknown = Arc::new(TagController::unknown(id, &self.store.config().unknown_tag_reason));
        if self.store.replace_live(Arc::clone(&unknown)).is_some() {
            unknown.send_current(&unknown.listeners());
        }
        info!(tag_id = %id, "Tag is not known by the server, set to undefined");
    }

    // --- Creation and removal ---

    /// Create live entries for ids not cached yet and fetch their state.
    /// Returns the ids that were created.
    ///
    /// On a domain error the created entries are removed again.
    pub fn init_tags(&self, ids: &HashSet<TagId>) -> Result<HashSet<TagId>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let created = self.store.insert_missing(ids);
        if created.is_empty() {
            return Ok(created);
        }

        let outcome = {
            let _sync = self.sync_lock.lock();
            match self.synchronize(&created, false) {
                Err(CacheError::Transport(e)) => {
                    self.on_transport_failure(&e);
                    Ok(())
                }
                other => other,
            }
        };

        if let Err(e) = outcome {
            warn!(tags = created.len(), error = %e, "Rolling back new tags");
            self.remove_tags(&created);
            return Err(e);
        }

        self.store.copy_to_history(&created);
        Ok(created)
    }

    /// Remove entries from both caches and cancel their registrations.
    pub fn remove_tags(&self, ids: &HashSet<TagId>) {
        if ids.is_empty() {
            return;
        }
        info!(tags = ids.len(), "Removing tags from the cache");
        for tag in self.store.remove(ids) {
            self.release(&tag);
        }
    }

    /// Fetch snapshots of tags without caching them. Ids the server does not
    /// return, or that could not be fetched, come back as undefined snapshots.
    pub fn fetch_uncached(&self, ids: &HashSet<TagId>) -> Result<Vec<Tag>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let reason = &self.store.config().unknown_tag_reason;
        let updates = match self.requests.fetch_tag_states(ids) {
            Ok(updates) => updates,
            Err(e) => {
                warn!(tags = ids.len(), error = %e, "Could not fetch tags from the server");
                Vec::new()
            }
        };

        let mut found = HashMap::with_capacity(updates.len());
        for update in updates.iter().filter(|u| ids.contains(&u.id())) {
            let tag = TagController::unknown(update.id(), reason);
            tag.update(update)?;
            found.insert(update.id(), tag.snapshot());
        }

        Ok(ids
            .iter()
            .map(|id| found.remove(id).unwrap_or_else(|| Tag::unknown(*id, reason.as_str())))
            .collect())
    }

    // --- Helpers ---

    fn add_supervision(&self, tag: &Arc<TagController>) {
        let snapshot = tag.snapshot();
        if !snapshot.follows_supervision() {
            return;
        }
        self.supervision.add_supervision_listener(
            Arc::clone(tag),
            &snapshot.process_ids(),
            &snapshot.equipment_ids(),
            &snapshot.sub_equipment_ids(),
        );
    }

    /// Cancel push and supervision registrations of an entry.
    fn release(&self, tag: &TagController) {
        if self.push.is_registered(tag) {
            if let Err(e) = self.push.unregister(tag) {
                warn!(tag_id = %tag.id(), error = %e, "Could not unregister tag from push delivery");
            }
        }
        self.supervision.remove_supervision_listener(tag);
    }

    fn on_transport_failure(&self, e: &TransportError) {
        error!(error = %e, "Lost contact with the server, invalidating the live cache");
        self.invalidate_live(TagQualityStatus::BrokerDown, &self.store.config().broker_down_reason);
        self.broker_down.store(true, Ordering::SeqCst);
    }

    pub(super) fn invalidate_live(&self, status: TagQualityStatus, reason: &str) {
        let tags = self.store.live_tags();
        debug!(tags = tags.len(), %status, "Invalidating live cache");
        for tag in &tags {
            tag.invalidate(status, reason);
        }
    }

    pub(super) fn validate_live(&self, status: TagQualityStatus) {
        let tags = self.store.live_tags();
        debug!(tags = tags.len(), %status, "Removing quality flag from live cache");
        for tag in &tags {
            tag.validate(status);
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("broker_down", &self.is_broker_down())
            .field("heartbeat_expired", &self.is_heartbeat_expired())
            .field("live_tags", &self.store.live_len())
            .finish()
    }
}
