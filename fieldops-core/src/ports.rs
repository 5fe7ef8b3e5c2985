//! Ports to the outside world: remote tables, storage, realtime feed,
//! device location, local key-value session store and clock.
//!
//! Adapters live in `fieldops-client`; in-memory implementations for tests
//! live in [`crate::memory`].

use crate::chat::{ChatMessage, NewChatMessage};
use crate::error::{FieldOpsResult, LocationError, SessionError};
use crate::identity::{Coordinates, LapId, LocalDate, LocalTime, Timestamp, VehicleId};
use crate::lap::{Lap, LapPatch, NewLap};
use crate::returns::{ReturnConfirmation, ReturnRecord};
use crate::sync::LapChange;
use ::async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

/// Remote table of lap records.
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// All laps for (`vehicle`, `date`) ordered by lap number, then scheduled time.
    async fn list_laps(&self, vehicle: &VehicleId, date: LocalDate) -> FieldOpsResult<Vec<Lap>>;

    /// Cheap reachability probe for (`vehicle`, `date`); returns whether any row exists.
    async fn probe_route(&self, vehicle: &VehicleId, date: LocalDate) -> FieldOpsResult<bool>;

    /// Single-row update keyed by `id`.
    async fn update_lap(&self, id: LapId, patch: &LapPatch) -> FieldOpsResult<()>;

    /// Single atomic insert; returns the backend-assigned id.
    async fn insert_lap(&self, lap: &NewLap) -> FieldOpsResult<LapId>;
}

/// Remote table of chat messages.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Most recent messages for `vehicle`, newest first.
    async fn recent_messages(
        &self,
        vehicle: &VehicleId,
        limit: usize,
    ) -> FieldOpsResult<Vec<ChatMessage>>;

    async fn insert_message(&self, message: &NewChatMessage) -> FieldOpsResult<()>;
}

/// Remote table of warehouse return records.
#[async_trait]
pub trait ReturnStore: Send + Sync {
    async fn find_return(&self, key: &str) -> FieldOpsResult<Option<ReturnRecord>>;

    async fn confirm_return(
        &self,
        key: &str,
        confirmation: &ReturnConfirmation,
    ) -> FieldOpsResult<()>;
}

/// Object storage for photo evidence.
#[async_trait]
pub trait PhotoStore: Send + Sync {
    /// Upload `bytes` to `bucket/path` (overwriting) and return its public URL.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> FieldOpsResult<String>;
}

/// Realtime change feed scoped to one vehicle.
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    /// UPDATE events on the vehicle's lap rows.
    async fn subscribe_laps(&self, vehicle: &VehicleId) -> FieldOpsResult<Subscription<LapChange>>;

    /// INSERT events on the vehicle's chat messages.
    async fn subscribe_chat(
        &self,
        vehicle: &VehicleId,
    ) -> FieldOpsResult<Subscription<ChatMessage>>;
}

/// Accuracy hint passed to the location service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accuracy {
    Low,
    Balanced,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

/// Device location service.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn request_permission(&self) -> Permission;

    async fn current_position(&self, accuracy: Accuracy) -> Result<Coordinates, LocationError>;
}

/// Persistent string key-value store backing the session.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, SessionError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), SessionError>;

    async fn remove(&self, key: &str) -> Result<(), SessionError>;
}

/// Source of the current instant and local calendar.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;

    fn today(&self) -> LocalDate;

    fn local_time(&self) -> LocalTime;
}

/// Wall clock in the device's local timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now()
    }

    fn today(&self) -> LocalDate {
        chrono::Local::now().date_naive()
    }

    fn local_time(&self) -> LocalTime {
        chrono::Local::now().time()
    }
}

// ============================================================================
// SUBSCRIPTIONS
// ============================================================================

/// Receiving half of a realtime subscription.
///
/// Dropping the subscription (or its [`SubscriptionGuard`]) tears the remote
/// channel down.
#[derive(Debug)]
pub struct Subscription<T> {
    events: mpsc::Receiver<T>,
    guard: SubscriptionGuard,
}

/// Teardown handle; the feed side observes its drop.
#[derive(Debug)]
pub struct SubscriptionGuard {
    channel: String,
    _teardown: oneshot::Sender<()>,
}

impl SubscriptionGuard {
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

/// Producing half handed to the notifier implementation.
#[derive(Debug)]
pub struct SubscriptionFeed<T> {
    pub events: mpsc::Sender<T>,
    pub teardown: oneshot::Receiver<()>,
}

impl<T> SubscriptionFeed<T> {
    /// True once the subscriber has gone away.
    pub fn is_torn_down(&mut self) -> bool {
        self.events.is_closed()
            || !matches!(self.teardown.try_recv(), Err(oneshot::error::TryRecvError::Empty))
    }
}

impl<T> Subscription<T> {
    /// Create a connected subscription/feed pair.
    pub fn channel(name: impl Into<String>, capacity: usize) -> (Self, SubscriptionFeed<T>) {
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let (teardown_tx, teardown_rx) = oneshot::channel();
        let subscription = Self {
            events: events_rx,
            guard: SubscriptionGuard {
                channel: name.into(),
                _teardown: teardown_tx,
            },
        };
        let feed = SubscriptionFeed {
            events: events_tx,
            teardown: teardown_rx,
        };
        (subscription, feed)
    }

    pub fn name(&self) -> &str {
        self.guard.channel()
    }

    pub async fn recv(&mut self) -> Option<T> {
        self.events.recv().await
    }

    pub fn into_parts(self) -> (mpsc::Receiver<T>, SubscriptionGuard) {
        (self.events, self.guard)
    }
}
