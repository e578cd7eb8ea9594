//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tagsync::{
    CacheConfig, ConnectionObserver, DispatcherConfig, InitialValuesListener, PatternResolver,
    RequestHandler, SubscriptionListener, SubscriptionManager, SupervisionService, SyncEngine, Tag,
    TagController, TagId, TagStore, TagUpdate, TagValueUpdate, Timestamp, TransportError,
    UpdateDispatcher,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn ids(raw: &[u64]) -> HashSet<TagId> {
    raw.iter().map(|id| TagId(*id)).collect()
}

pub fn tag_update(id: u64, value: i64, server: i64) -> TagUpdate {
    TagUpdate::new(
        format!("plant.tag.{id}"),
        TagValueUpdate::new(TagId(id), json!(value), Timestamp(server)),
    )
    .with_process_ids(vec![1])
    .with_equipment_ids(vec![10])
}

// --- Server ---

/// Runs inside a state request, before it is answered.
pub type RequestHook = Arc<dyn Fn() + Send + Sync>;

/// Answers requests from a table of known tags.
#[derive(Default)]
pub struct MockServer {
    known: Mutex<HashMap<TagId, TagUpdate>>,
    values: Mutex<HashMap<TagId, TagValueUpdate>>,
    failing: AtomicBool,
    fail_once: AtomicBool,
    state_hook: Mutex<Option<RequestHook>>,
    state_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    pub state_requests: Mutex<Vec<HashSet<TagId>>>,
    pub value_requests: Mutex<Vec<HashSet<TagId>>>,
}

impl MockServer {
    pub fn with_tags(raw: &[u64]) -> Self {
        let server = Self::default();
        for id in raw {
            server.put(tag_update(*id, *id as i64, 100));
        }
        server
    }

    pub fn put(&self, update: TagUpdate) {
        self.known.lock().insert(update.id(), update);
    }

    pub fn forget(&self, id: u64) {
        self.known.lock().remove(&TagId(id));
    }

    /// Answer value requests for `update.tag_id` with this update instead of
    /// the stored state.
    pub fn put_value(&self, update: TagValueUpdate) {
        self.values.lock().insert(update.tag_id, update);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail the next request only.
    pub fn fail_next_request(&self) {
        self.fail_once.store(true, Ordering::SeqCst);
    }

    /// Run `hook` inside the next state request only.
    pub fn on_next_state_request(&self, hook: RequestHook) {
        *self.state_hook.lock() = Some(hook);
    }

    /// Hold every state request open for `delay`.
    pub fn set_state_delay(&self, delay: Duration) {
        *self.state_delay.lock() = delay;
    }

    /// Highest number of state requests that were open at the same time.
    pub fn max_concurrent_state_requests(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn state_request_count(&self) -> usize {
        self.state_requests.lock().len()
    }

    pub fn value_request_count(&self) -> usize {
        self.value_requests.lock().len()
    }

    pub fn clear_requests(&self) {
        self.state_requests.lock().clear();
        self.value_requests.lock().clear();
    }

    fn check(&self) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) || self.fail_once.swap(false, Ordering::SeqCst) {
            return Err(TransportError::new("connection refused"));
        }
        Ok(())
    }
}

impl RequestHandler for MockServer {
    fn fetch_tag_states(&self, ids: &HashSet<TagId>) -> Result<Vec<TagUpdate>, TransportError> {
        self.state_requests.lock().push(ids.clone());
        let open = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(open, Ordering::SeqCst);

        let hook = self.state_hook.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        let delay = *self.state_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let result = self.check().map(|()| {
            let known = self.known.lock();
            ids.iter().filter_map(|id| known.get(id).cloned()).collect()
        });
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn fetch_tag_values(&self, ids: &HashSet<TagId>) -> Result<Vec<TagValueUpdate>, TransportError> {
        self.value_requests.lock().push(ids.clone());
        self.check()?;
        let known = self.known.lock();
        let values = self.values.lock();
        Ok(ids
            .iter()
            .filter_map(|id| values.get(id).cloned().or_else(|| known.get(id).map(|u| u.value.clone())))
            .collect())
    }
}

impl PatternResolver for MockServer {
    /// Supports a single trailing `*`.
    fn resolve(&self, pattern: &str) -> Result<HashSet<TagId>, TransportError> {
        self.check()?;
        let known = self.known.lock();
        let matches = |name: &str| match pattern.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => name == pattern,
        };
        Ok(known
            .values()
            .filter(|update| matches(&update.name))
            .map(|update| update.id())
            .collect())
    }
}

// --- Supervision ---

#[derive(Default)]
pub struct MockSupervision {
    observer: Mutex<Option<Weak<dyn ConnectionObserver>>>,
    supervised: Mutex<HashSet<TagId>>,
    refreshes: AtomicUsize,
}

impl MockSupervision {
    fn observer(&self) -> Arc<dyn ConnectionObserver> {
        self.observer
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .expect("no connection observer registered")
    }

    pub fn disconnect(&self) {
        self.observer().on_disconnect();
    }

    pub fn connect(&self) {
        self.observer().on_connect();
    }

    pub fn heartbeat_expired(&self) {
        self.observer().on_heartbeat_expired();
    }

    pub fn heartbeat_resumed(&self) {
        self.observer().on_heartbeat_resumed();
    }

    pub fn is_supervised(&self, id: u64) -> bool {
        self.supervised.lock().contains(&TagId(id))
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl SupervisionService for MockSupervision {
    fn add_connection_observer(&self, observer: Weak<dyn ConnectionObserver>) {
        *self.observer.lock() = Some(observer);
    }

    fn add_supervision_listener(
        &self,
        tag: Arc<TagController>,
        _process_ids: &[u64],
        _equipment_ids: &[u64],
        _sub_equipment_ids: &[u64],
    ) {
        self.supervised.lock().insert(tag.id());
    }

    fn remove_supervision_listener(&self, tag: &TagController) {
        self.supervised.lock().remove(&tag.id());
    }

    fn refresh_supervision_status(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }
}

// --- Listeners ---

#[derive(Clone, Debug)]
pub enum Delivery {
    Initial(Vec<Tag>),
    Update(Tag),
}

/// Records everything it receives.
#[derive(Default)]
pub struct Recorder {
    pub deliveries: Mutex<Vec<Delivery>>,
}

impl Recorder {
    pub fn updates(&self) -> Vec<Tag> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Update(tag) => Some(tag.clone()),
                Delivery::Initial(_) => None,
            })
            .collect()
    }

    pub fn last_update(&self, id: u64) -> Option<Tag> {
        self.updates().into_iter().rev().find(|tag| tag.id == TagId(id))
    }

    pub fn clear(&self) {
        self.deliveries.lock().clear();
    }
}

impl tagsync::TagListener for Recorder {
    fn on_update(&self, tag: &Tag) {
        self.deliveries.lock().push(Delivery::Update(tag.clone()));
    }
}

impl InitialValuesListener for Recorder {
    fn on_initial_update(&self, initial_values: &[Tag]) {
        self.deliveries.lock().push(Delivery::Initial(initial_values.to_vec()));
    }
}

#[derive(Default)]
pub struct MetaRecorder {
    pub added: Mutex<Vec<HashSet<TagId>>>,
    pub removed: Mutex<Vec<HashSet<TagId>>>,
}

impl SubscriptionListener for MetaRecorder {
    fn on_new_tag_subscriptions(&self, tag_ids: &HashSet<TagId>) {
        self.added.lock().push(tag_ids.clone());
    }

    fn on_unsubscribe(&self, tag_ids: &HashSet<TagId>) {
        self.removed.lock().push(tag_ids.clone());
    }
}

// --- Fixture ---

/// A full cache wired to in-memory collaborators.
pub struct Fixture {
    pub server: Arc<MockServer>,
    pub push: Arc<UpdateDispatcher>,
    pub supervision: Arc<MockSupervision>,
    pub engine: Arc<SyncEngine>,
    pub manager: SubscriptionManager,
}

impl Fixture {
    pub fn new(server: MockServer) -> Self {
        Self::with_config(server, CacheConfig::default())
    }

    /// The link reports up once at startup, as a real supervision service
    /// does after connecting.
    pub fn with_config(server: MockServer, config: CacheConfig) -> Self {
        let fixture = Self::unlinked(server, config);
        fixture.supervision.connect();
        fixture
    }

    /// No connection event has been reported yet.
    pub fn unlinked(server: MockServer, config: CacheConfig) -> Self {
        init_tracing();
        let server = Arc::new(server);
        let push = Arc::new(UpdateDispatcher::new(DispatcherConfig::default()).unwrap());
        let supervision = Arc::new(MockSupervision::default());
        let engine = SyncEngine::new(
            Arc::new(TagStore::new(config)),
            Arc::clone(&server) as Arc<dyn RequestHandler>,
            Arc::clone(&push) as Arc<dyn tagsync::PushRegistry>,
            Arc::clone(&supervision) as Arc<dyn SupervisionService>,
        );
        let manager = SubscriptionManager::new(Arc::clone(&engine), Arc::clone(&server) as Arc<dyn PatternResolver>);
        Self {
            server,
            push,
            supervision,
            engine,
            manager,
        }
    }

    pub fn store(&self) -> &Arc<TagStore> {
        self.manager.store()
    }

    /// Checks the entry in the active cache.
    pub fn is_push_registered(&self, id: u64) -> bool {
        use tagsync::PushRegistry;
        self.store()
            .get(TagId(id))
            .is_some_and(|tag| self.push.is_registered(&tag))
    }
}

/// Poll until `condition` holds or two seconds pass.
pub fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
