//! Cache entry: a tag snapshot guarded by its own lock, plus its listeners.

use super::quality::TagQualityStatus;
use super::record::Tag;
use super::TagQuality;
use crate::error::{CacheError, Result};
use crate::rule::RuleExpression;
use crate::subscriptions::{Listener, ListenerKey, ListenerSet};
use crate::types::{SupervisionEntity, SupervisionEvent, TagId, TagUpdate, TagValueUpdate};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use tracing::{error, trace};

/// One cache entry.
///
/// Field updates happen under the entry's own write lock so readers never see
/// a half-applied update. Listeners are notified after the lock is released,
/// each with its own copy of the new state.
pub struct TagController {
    id: TagId,
    tag: RwLock<Tag>,
    listeners: Mutex<ListenerSet>,
}

impl TagController {
    /// A fresh, uninitialised entry.
    pub fn new(id: TagId) -> Self {
        Self::from_tag(Tag::new(id))
    }

    /// An entry flagged as unknown to the server.
    pub fn unknown(id: TagId, reason: &str) -> Self {
        Self::from_tag(Tag::unknown(id, reason))
    }

    pub(crate) fn from_tag(tag: Tag) -> Self {
        Self {
            id: tag.id,
            tag: RwLock::new(tag),
            listeners: Mutex::new(ListenerSet::new()),
        }
    }

    pub fn id(&self) -> TagId {
        self.id
    }

    /// Owned copy of the current state.
    pub fn snapshot(&self) -> Tag {
        self.tag.read().clone()
    }

    pub fn quality(&self) -> TagQuality {
        self.tag.read().quality.clone()
    }

    pub fn is_existing(&self) -> bool {
        self.tag.read().quality.is_existing()
    }

    pub(crate) fn depends_on_process(&self, process_id: u64) -> bool {
        self.tag.read().process_status.contains_key(&process_id)
    }

    pub(crate) fn depends_on_equipment(&self, equipment_id: u64) -> bool {
        self.tag.read().equipment_status.contains_key(&equipment_id)
    }

    /// Independent copy of the state with an empty listener set.
    pub fn detached_copy(&self) -> TagController {
        TagController::from_tag(self.snapshot())
    }

    // --- Updates ---

    /// Apply full server state. Returns false if the update is not newer than
    /// what the entry already holds.
    pub fn update(&self, update: &TagUpdate) -> Result<bool> {
        let clone = {
            let mut tag = self.tag.write();
            if !is_newer(&tag, &update.value, true) {
                return Ok(false);
            }

            let rule = match update.rule_expression.as_deref() {
                Some(expression) => Some(RuleExpression::parse(expression).map_err(|reason| {
                    error!(tag_id = %self.id, %reason, "Received an incorrect rule tag from the server");
                    CacheError::RuleFormat {
                        tag_id: self.id,
                        reason,
                    }
                })?),
                None => None,
            };
            if rule.is_some() {
                tag.rule_expression = rule;
            }

            apply_values(&mut tag, &update.value);

            tag.process_status = carry_over(&tag.process_status, &update.process_ids);
            tag.equipment_status = carry_over(&tag.equipment_status, &update.equipment_ids);
            tag.sub_equipment_status = carry_over(&tag.sub_equipment_status, &update.sub_equipment_ids);

            tag.name = update.name.clone();
            tag.unit = update.unit.clone();
            tag.control_tag = update.control_tag;
            tag.alive_tag = update.alive_tag;
            tag.metadata = update.metadata.clone();

            tag.clone()
        };

        self.notify(&clone);
        Ok(true)
    }

    /// Apply a value update from the push channel or a value request.
    /// Returns false if the update is stale.
    pub fn update_value(&self, update: &TagValueUpdate) -> bool {
        let clone = {
            let mut tag = self.tag.write();
            if !is_newer(&tag, update, false) {
                trace!(tag_id = %self.id, "Ignoring stale value update");
                return false;
            }
            apply_values(&mut tag, update);
            tag.clone()
        };

        self.notify(&clone);
        true
    }

    /// Add a quality flag. Listeners are only told if the quality changed.
    pub fn invalidate(&self, status: TagQualityStatus, reason: &str) -> bool {
        let clone = {
            let mut tag = self.tag.write();
            if !tag.quality.add_invalid_status(status, reason) {
                return false;
            }
            trace!(tag_id = %self.id, %status, "Invalidated tag");
            tag.clone()
        };

        self.notify(&clone);
        true
    }

    /// Remove a quality flag. Listeners are only told if it was set.
    pub fn validate(&self, status: TagQualityStatus) -> bool {
        let clone = {
            let mut tag = self.tag.write();
            if !tag.quality.remove_invalid_status(status) {
                return false;
            }
            trace!(tag_id = %self.id, %status, "Removed quality flag");
            tag.clone()
        };

        self.notify(&clone);
        true
    }

    /// Track the health of a producer this tag depends on.
    pub fn on_supervision_update(&self, event: &SupervisionEvent) -> bool {
        let clone = {
            let mut guard = self.tag.write();
            let tag = &mut *guard;
            if !tag.follows_supervision() {
                return false;
            }

            let (status_map, flag) = match event.entity {
                SupervisionEntity::Process => (&mut tag.process_status, TagQualityStatus::ProcessDown),
                SupervisionEntity::Equipment => (&mut tag.equipment_status, TagQualityStatus::EquipmentDown),
                SupervisionEntity::SubEquipment => {
                    (&mut tag.sub_equipment_status, TagQualityStatus::SubEquipmentDown)
                }
            };

            if !status_map.contains_key(&event.entity_id) {
                return false;
            }
            let previous = status_map.insert(event.entity_id, Some(event.clone())).flatten();

            if event.status.is_down() {
                let reason = status_map
                    .values()
                    .flatten()
                    .filter(|e| e.status.is_down())
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                tag.quality.add_invalid_status(flag, reason);
            } else {
                tag.quality.remove_invalid_status(flag);
            }

            if previous.as_ref() == Some(event) {
                return false;
            }
            tag.clone()
        };

        self.notify(&clone);
        true
    }

    // --- Listeners ---

    /// Register a listener and send it the current state, unless it already
    /// holds exactly that state as `initial`.
    pub fn add_listener(&self, listener: Listener, initial: Option<&Tag>) {
        self.insert_listener(listener.clone());
        self.catch_up(&listener, initial);
    }

    /// Register a listener without sending it anything.
    pub(crate) fn insert_listener(&self, listener: Listener) {
        self.listeners.lock().insert(listener);
    }

    /// Send the current state to a registered listener until the state it
    /// last received is the current one. An update racing with this call
    /// cannot leave the listener on an older state than the entry holds.
    pub(crate) fn catch_up(&self, listener: &Listener, initial: Option<&Tag>) {
        let mut last = initial.cloned();
        loop {
            let current = self.snapshot();
            if last.as_ref() == Some(&current) {
                return;
            }
            deliver(listener, &current);
            last = Some(current);
        }
    }

    pub fn remove_listener(&self, key: ListenerKey) -> bool {
        self.listeners.lock().remove(key).is_some()
    }

    pub fn has_listeners(&self) -> bool {
        !self.listeners.lock().is_empty()
    }

    pub fn is_listener_registered(&self, key: ListenerKey) -> bool {
        self.listeners.lock().contains(key)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn listeners(&self) -> Vec<Listener> {
        self.listeners.lock().iter().cloned().collect()
    }

    /// Remove and return the whole listener set.
    pub(crate) fn take_listeners(&self) -> ListenerSet {
        std::mem::take(&mut *self.listeners.lock())
    }

    /// Merge a listener set without notifying anyone.
    pub(crate) fn adopt_listeners(&self, listeners: ListenerSet) {
        self.listeners.lock().merge(listeners);
    }

    /// Send the current state to the given listeners only.
    pub(crate) fn send_current(&self, listeners: &[Listener]) {
        let current = self.snapshot();
        for listener in listeners {
            deliver(listener, &current);
        }
    }

    /// Send a state copy to every registered listener.
    pub(crate) fn notify(&self, tag: &Tag) {
        let listeners = self.listeners();
        for listener in &listeners {
            deliver(listener, tag);
        }
    }
}

impl std::fmt::Debug for TagController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagController")
            .field("id", &self.id)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

fn deliver(listener: &Listener, tag: &Tag) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_update(tag)));
    if outcome.is_err() {
        error!(tag_id = %tag.id, listener = ?listener.key(), "Listener panicked while handling tag update");
    }
}

/// Server time first, then DAQ time, then source time.
fn is_newer(tag: &Tag, update: &TagValueUpdate, full_update: bool) -> bool {
    if update.tag_id != tag.id {
        return false;
    }
    let Some(server_time) = update.server_timestamp else {
        return false;
    };

    if server_time > tag.server_timestamp {
        return true;
    }
    if server_time < tag.server_timestamp {
        return false;
    }

    let Some(daq_time) = update.daq_timestamp else {
        return false;
    };
    let Some(old_daq_time) = tag.daq_timestamp else {
        return true;
    };

    if daq_time > old_daq_time {
        return true;
    }
    if daq_time < old_daq_time {
        return false;
    }

    match (update.source_timestamp, tag.source_timestamp) {
        (Some(_), None) => true,
        // Source timestamps are allowed to jump backwards
        (Some(new), Some(old)) => full_update || new != old,
        (None, None) => full_update,
        (None, Some(_)) => false,
    }
}

fn apply_values(tag: &mut Tag, update: &TagValueUpdate) {
    merge_quality(&mut tag.quality, &update.quality);
    tag.description = update.description.clone();
    tag.value_description = update.value_description.clone();
    if let Some(server_time) = update.server_timestamp {
        tag.server_timestamp = server_time;
    }
    tag.daq_timestamp = update.daq_timestamp;
    tag.source_timestamp = update.source_timestamp;
    tag.value = update.value.clone();
}

/// The server does not know about local supervision flags; keep them while
/// the tag is inaccessible.
fn merge_quality(current: &mut TagQuality, incoming: &TagQuality) {
    let kept: Vec<(TagQualityStatus, String)> = if current.is_accessible() {
        Vec::new()
    } else {
        current
            .invalid_states()
            .filter(|(status, _)| status.is_supervision())
            .map(|(status, reason)| (status, reason.to_string()))
            .collect()
    };

    current.set_invalid_states(incoming);
    for (status, reason) in kept {
        current.add_invalid_status(status, reason);
    }
}

fn carry_over(
    current: &BTreeMap<u64, Option<SupervisionEvent>>,
    ids: &[u64],
) -> BTreeMap<u64, Option<SupervisionEvent>> {
    ids.iter()
        .map(|id| (*id, current.get(id).cloned().flatten()))
        .collect()
}
