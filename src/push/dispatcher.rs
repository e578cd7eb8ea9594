//! Channel-fed delivery thread.
//!
//! ```text
//! transport thread:  publish(update) -> bounded queue
//!                                          |
//! delivery thread:   recv -> registered entry for tag id -> update_value()
//! ```
//!
//! Updates for one tag are applied in the order they were published. Updates
//! for unregistered ids are discarded.

use crate::config::DispatcherConfig;
use crate::error::{CacheError, Result};
use crate::remote::{PushRegistry, TransportError};
use crate::tag::TagController;
use crate::types::{TagId, TagValueUpdate};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

enum DispatchMessage {
    Update(TagValueUpdate),
    Shutdown,
}

#[derive(Default)]
struct DispatcherInner {
    registered: RwLock<HashMap<TagId, Arc<TagController>>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl DispatcherInner {
    fn dispatch(&self, update: &TagValueUpdate) {
        let target = self.registered.read().get(&update.tag_id).cloned();
        match target {
            Some(tag) => {
                if tag.update_value(update) {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
            }
            None => trace!(tag_id = %update.tag_id, "No registered entry for pushed update"),
        }
    }
}

/// Delivers pushed value updates to registered entries on a dedicated thread.
pub struct UpdateDispatcher {
    inner: Arc<DispatcherInner>,
    sender: Sender<DispatchMessage>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl UpdateDispatcher {
    /// Start the delivery thread.
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        let (sender, receiver) = bounded(config.buffer_size);
        let inner = Arc::new(DispatcherInner::default());

        let worker_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run(worker_inner, receiver))
            .map_err(|e| CacheError::Synchronization(format!("Could not start push dispatcher: {e}")))?;

        Ok(Self {
            inner,
            sender,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queue an update, blocking while the queue is full.
    pub fn publish(&self, update: TagValueUpdate) -> Result<()> {
        self.sender
            .send(DispatchMessage::Update(update))
            .map_err(|_| CacheError::Synchronization("Push dispatcher is stopped".to_string()))
    }

    /// Queue an update without blocking. Returns false if it was dropped.
    pub fn try_publish(&self, update: TagValueUpdate) -> bool {
        match self.sender.try_send(DispatchMessage::Update(update)) {
            Ok(()) => true,
            Err(TrySendError::Full(DispatchMessage::Update(update))) => {
                warn!(tag_id = %update.tag_id, "Push queue full, dropping update");
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(_) => false,
        }
    }

    pub fn registered_count(&self) -> usize {
        self.inner.registered.read().len()
    }

    /// Updates that changed an entry.
    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    /// Updates dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Deliver everything queued so far, then stop the thread.
    pub fn shutdown(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        let _ = self.sender.send(DispatchMessage::Shutdown);
        if handle.join().is_err() {
            warn!("Push dispatcher thread panicked");
        }
    }
}

impl PushRegistry for UpdateDispatcher {
    fn register(&self, tag: Arc<TagController>) -> std::result::Result<(), TransportError> {
        trace!(tag_id = %tag.id(), "Registered for push delivery");
        self.inner.registered.write().insert(tag.id(), tag);
        Ok(())
    }

    fn unregister(&self, tag: &TagController) -> std::result::Result<(), TransportError> {
        let mut registered = self.inner.registered.write();
        if is_same(registered.get(&tag.id()), tag) {
            registered.remove(&tag.id());
            trace!(tag_id = %tag.id(), "Unregistered from push delivery");
        }
        Ok(())
    }

    fn is_registered(&self, tag: &TagController) -> bool {
        is_same(self.inner.registered.read().get(&tag.id()), tag)
    }
}

impl Drop for UpdateDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Registration is per entry, not per id.
fn is_same(registered: Option<&Arc<TagController>>, tag: &TagController) -> bool {
    registered.is_some_and(|r| std::ptr::eq(Arc::as_ptr(r), tag))
}

fn run(inner: Arc<DispatcherInner>, receiver: Receiver<DispatchMessage>) {
    debug!("Push dispatcher started");
    for message in receiver.iter() {
        match message {
            DispatchMessage::Update(update) => inner.dispatch(&update),
            DispatchMessage::Shutdown => break,
        }
    }
    debug!("Push dispatcher stopped");
}
