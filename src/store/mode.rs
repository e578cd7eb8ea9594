//! Switching the active cache between live and history.

use super::{Caches, TagStore};
use crate::subscriptions::Listener;
use crate::tag::TagController;
use crate::types::CacheMode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

impl TagStore {
    /// Make the history cache (`true`) or the live cache (`false`) active.
    ///
    /// Entering history mode rebuilds the history cache as copies of the live
    /// entries and moves every listener onto the copy. Leaving it moves the
    /// listeners back onto the live entries. Listeners are moved under the
    /// same write lock that flips the mode, so no update is delivered to a
    /// listener through both caches or through neither.
    ///
    /// Returns false if the cache was already in the requested mode.
    pub fn set_history_mode(&self, enable: bool) -> bool {
        let target = if enable { CacheMode::History } else { CacheMode::Live };
        let _switch = self.mode_lock.lock();

        let resumed = {
            let mut caches = self.caches.write();
            if caches.mode == target {
                debug!(mode = %target, "Cache already in requested mode");
                return false;
            }

            let resumed = match target {
                CacheMode::History => {
                    caches.enter_history();
                    Vec::new()
                }
                CacheMode::Live => caches.leave_history(),
            };
            caches.mode = target;
            self.history_mode.store(enable, Ordering::SeqCst);
            info!(mode = %target, tags = caches.live.len(), "Switched cache mode");
            resumed
        };

        if self.config.notify_on_live_resume {
            for (tag, listeners) in resumed {
                tag.send_current(&listeners);
            }
        }
        true
    }
}

impl Caches {
    fn enter_history(&mut self) {
        let Caches { live, history, .. } = self;
        history.clear();
        for (id, tag) in live.iter() {
            let copy = tag.detached_copy();
            copy.adopt_listeners(tag.take_listeners());
            history.insert(*id, Arc::new(copy));
        }
    }

    /// Returns each live entry that got listeners back, with those listeners.
    fn leave_history(&mut self) -> Vec<(Arc<TagController>, Vec<Listener>)> {
        let Caches { live, history, .. } = self;
        let mut resumed = Vec::new();
        for (id, copy) in history.iter() {
            let listeners = copy.take_listeners();
            if listeners.is_empty() {
                continue;
            }
            match live.get(id) {
                Some(tag) => {
                    let moved: Vec<Listener> = listeners.iter().cloned().collect();
                    tag.adopt_listeners(listeners);
                    resumed.push((Arc::clone(tag), moved));
                }
                None => warn!(tag_id = %id, "History entry without live entry, dropping its listeners"),
            }
        }
        resumed
    }
}
