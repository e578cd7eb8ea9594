//! Connection and heartbeat transitions.

use super::engine::{Scope, SyncEngine};
use crate::remote::ConnectionObserver;
use crate::tag::TagQualityStatus;
use std::sync::atomic::Ordering;
use tracing::{error, info};

impl SyncEngine {
    fn in_trouble(&self) -> bool {
        self.is_broker_down() || self.is_heartbeat_expired()
    }

    /// Full synchronization after a recovery. Called with the sync lock held.
    fn recover(&self, cause: &str) {
        if !self.in_trouble() {
            return;
        }
        info!(cause, "Resynchronizing the live cache");
        if let Err(e) = self.resync_locked(Scope::All) {
            error!(cause, error = %e, "Could not resynchronize the live cache");
        }
    }
}

impl ConnectionObserver for SyncEngine {
    fn on_disconnect(&self) {
        let _sync = self.sync_lock.lock();
        if self.broker_down.load(Ordering::SeqCst) {
            return;
        }
        info!("Broker connection lost, invalidating the live cache");
        let reason = self.store().config().broker_down_reason.clone();
        self.invalidate_live(TagQualityStatus::BrokerDown, &reason);
        self.broker_down.store(true, Ordering::SeqCst);
    }

    fn on_connect(&self) {
        let _sync = self.sync_lock.lock();
        info!("Broker connection restored");
        self.validate_live(TagQualityStatus::BrokerDown);
        self.recover("connection restored");
    }

    fn on_heartbeat_expired(&self) {
        let _sync = self.sync_lock.lock();
        if self.heartbeat_expired.load(Ordering::SeqCst) {
            return;
        }
        info!("Server heartbeat expired, invalidating the live cache");
        let reason = self.store().config().heartbeat_expired_reason.clone();
        self.invalidate_live(TagQualityStatus::HeartbeatExpired, &reason);
        self.heartbeat_expired.store(true, Ordering::SeqCst);
    }

    fn on_heartbeat_resumed(&self) {
        let _sync = self.sync_lock.lock();
        info!("Server heartbeat resumed");
        self.validate_live(TagQualityStatus::HeartbeatExpired);
        self.recover("heartbeat resumed");
    }
}
