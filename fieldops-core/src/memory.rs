//! In-memory port implementations for tests and offline demos.

use crate::chat::{ChatMessage, NewChatMessage};
use crate::error::{FieldOpsResult, LocationError, RemoteError, SessionError};
use crate::identity::{Coordinates, LapId, LocalDate, LocalTime, MessageId, Timestamp, VehicleId};
use crate::lap::{sort_laps, Lap, LapPatch, NewLap};
use crate::ports::{
    Accuracy, ChangeNotifier, ChatStore, Clock, KeyValueStore, LocationProvider, Permission,
    PhotoStore, ReturnStore, RouteStore, Subscription, SubscriptionFeed,
};
use crate::returns::{ReturnConfirmation, ReturnRecord};
use crate::sync::LapChange;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

const LAPS_RESOURCE: &str = "asignaciones_transporte";
const CHAT_RESOURCE: &str = "mensajes_chat";
const RETURNS_RESOURCE: &str = "devoluciones_bodega";
const STORAGE_RESOURCE: &str = "storage";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn take_failure(slot: &Mutex<Option<String>>, resource: &str) -> FieldOpsResult<()> {
    match lock(slot).take() {
        Some(reason) => Err(RemoteError::RequestFailed {
            resource: resource.to_string(),
            reason,
        }
        .into()),
        None => Ok(()),
    }
}

// ============================================================================
// ROUTE STORE
// ============================================================================

/// In-memory lap table.
#[derive(Debug)]
pub struct MemoryRouteStore {
    laps: Mutex<Vec<Lap>>,
    next_id: AtomicI64,
    failure: Mutex<Option<String>>,
    list_gate: Mutex<Option<oneshot::Receiver<()>>>,
    list_calls: AtomicUsize,
    updates: Mutex<Vec<(LapId, LapPatch)>>,
    inserts: Mutex<Vec<NewLap>>,
}

impl Default for MemoryRouteStore {
    fn default() -> Self {
        Self {
            laps: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
            failure: Mutex::new(None),
            list_gate: Mutex::new(None),
            list_calls: AtomicUsize::new(0),
            updates: Mutex::new(Vec::new()),
            inserts: Mutex::new(Vec::new()),
        }
    }
}

impl MemoryRouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_laps(laps: Vec<Lap>) -> Self {
        let store = Self::new();
        store.set_laps(laps);
        store
    }

    /// Replace the whole table. Later inserts get ids above the highest seen.
    pub fn set_laps(&self, laps: Vec<Lap>) {
        let max_id = laps.iter().map(|l| l.id.get()).max().unwrap_or(0);
        self.next_id.fetch_max(max_id + 1, Ordering::SeqCst);
        *lock(&self.laps) = laps;
    }

    pub fn laps(&self) -> Vec<Lap> {
        lock(&self.laps).clone()
    }

    pub fn lap(&self, id: LapId) -> Option<Lap> {
        lock(&self.laps).iter().find(|l| l.id == id).cloned()
    }

    /// Make the next call of any kind fail with `reason`.
    pub fn fail_next(&self, reason: &str) {
        *lock(&self.failure) = Some(reason.to_string());
    }

    /// Hold the next `list_laps` call until the returned sender fires or drops.
    pub fn pause_next_list(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *lock(&self.list_gate) = Some(rx);
        tx
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> Vec<(LapId, LapPatch)> {
        lock(&self.updates).clone()
    }

    pub fn inserts(&self) -> Vec<NewLap> {
        lock(&self.inserts).clone()
    }

    /// Number of mutating calls issued so far.
    pub fn mutation_count(&self) -> usize {
        lock(&self.updates).len() + lock(&self.inserts).len()
    }
}

#[async_trait]
impl RouteStore for MemoryRouteStore {
    async fn list_laps(&self, vehicle: &VehicleId, date: LocalDate) -> FieldOpsResult<Vec<Lap>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        take_failure(&self.failure, LAPS_RESOURCE)?;

        let gate = lock(&self.list_gate).take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        let mut laps: Vec<Lap> = lock(&self.laps)
            .iter()
            .filter(|l| &l.vehicle_id == vehicle && l.date == date)
            .cloned()
            .collect();
        sort_laps(&mut laps);
        Ok(laps)
    }

    async fn probe_route(&self, vehicle: &VehicleId, date: LocalDate) -> FieldOpsResult<bool> {
        take_failure(&self.failure, LAPS_RESOURCE)?;
        Ok(lock(&self.laps)
            .iter()
            .any(|l| &l.vehicle_id == vehicle && l.date == date))
    }

    async fn update_lap(&self, id: LapId, patch: &LapPatch) -> FieldOpsResult<()> {
        take_failure(&self.failure, LAPS_RESOURCE)?;
        let mut laps = lock(&self.laps);
        let lap = laps
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| RemoteError::Rejected {
                resource: LAPS_RESOURCE.to_string(),
                status: 404,
                message: format!("no row with id {}", id),
            })?;
        patch.apply_to(lap);
        lock(&self.updates).push((id, patch.clone()));
        Ok(())
    }

    async fn insert_lap(&self, lap: &NewLap) -> FieldOpsResult<LapId> {
        take_failure(&self.failure, LAPS_RESOURCE)?;
        let id = LapId(self.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.laps).push(lap.clone().into_lap(id));
        lock(&self.inserts).push(lap.clone());
        Ok(id)
    }
}

// ============================================================================
// CHANGE NOTIFIER
// ============================================================================

/// In-memory change feed. Events are pushed by the test.
#[derive(Debug, Default)]
pub struct MemoryChangeNotifier {
    lap_feeds: Mutex<Vec<(VehicleId, SubscriptionFeed<LapChange>)>>,
    chat_feeds: Mutex<Vec<(VehicleId, SubscriptionFeed<ChatMessage>)>>,
    failure: Mutex<Option<String>>,
    /// (vehicle, live lap subscriptions at the moment it subscribed)
    lap_log: Mutex<Vec<(VehicleId, usize)>>,
}

fn prune<T>(feeds: &mut Vec<(VehicleId, SubscriptionFeed<T>)>) {
    feeds.retain_mut(|(_, feed)| !feed.is_torn_down());
}

impl MemoryChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, reason: &str) {
        *lock(&self.failure) = Some(reason.to_string());
    }

    pub fn active_lap_subscriptions(&self) -> usize {
        let mut feeds = lock(&self.lap_feeds);
        prune(&mut feeds);
        feeds.len()
    }

    pub fn active_chat_subscriptions(&self) -> usize {
        let mut feeds = lock(&self.chat_feeds);
        prune(&mut feeds);
        feeds.len()
    }

    /// Every lap subscription made, with the live count seen when it was made.
    pub fn lap_subscription_log(&self) -> Vec<(VehicleId, usize)> {
        lock(&self.lap_log).clone()
    }

    /// Deliver `change` to every live lap subscription; returns how many took it.
    pub fn emit_lap_change(&self, change: LapChange) -> usize {
        let mut feeds = lock(&self.lap_feeds);
        prune(&mut feeds);
        feeds
            .iter()
            .filter(|(_, feed)| feed.events.try_send(change.clone()).is_ok())
            .count()
    }

    pub fn emit_chat(&self, message: ChatMessage) -> usize {
        let mut feeds = lock(&self.chat_feeds);
        prune(&mut feeds);
        feeds
            .iter()
            .filter(|(vehicle, _)| *vehicle == message.vehicle_id)
            .filter(|(_, feed)| feed.events.try_send(message.clone()).is_ok())
            .count()
    }
}

#[async_trait]
impl ChangeNotifier for MemoryChangeNotifier {
    async fn subscribe_laps(&self, vehicle: &VehicleId) -> FieldOpsResult<Subscription<LapChange>> {
        let channel = format!("alertas-chofer-{}", vehicle);
        if let Some(reason) = lock(&self.failure).take() {
            return Err(RemoteError::SubscriptionFailed { channel, reason }.into());
        }
        let (subscription, feed) = Subscription::channel(channel, 32);
        let mut feeds = lock(&self.lap_feeds);
        prune(&mut feeds);
        lock(&self.lap_log).push((vehicle.clone(), feeds.len()));
        feeds.push((vehicle.clone(), feed));
        Ok(subscription)
    }

    async fn subscribe_chat(
        &self,
        vehicle: &VehicleId,
    ) -> FieldOpsResult<Subscription<ChatMessage>> {
        let channel = format!("chat-{}", vehicle);
        if let Some(reason) = lock(&self.failure).take() {
            return Err(RemoteError::SubscriptionFailed { channel, reason }.into());
        }
        let (subscription, feed) = Subscription::channel(channel, 32);
        let mut feeds = lock(&self.chat_feeds);
        prune(&mut feeds);
        feeds.push((vehicle.clone(), feed));
        Ok(subscription)
    }
}

// ============================================================================
// LOCATION
// ============================================================================

/// Location provider with a fixed answer.
#[derive(Debug)]
pub struct StaticLocation {
    permission: Mutex<Permission>,
    fix: Mutex<Result<Coordinates, LocationError>>,
    permission_requests: AtomicUsize,
    fix_requests: AtomicUsize,
}

impl StaticLocation {
    pub fn granted(position: Coordinates) -> Self {
        Self {
            permission: Mutex::new(Permission::Granted),
            fix: Mutex::new(Ok(position)),
            permission_requests: AtomicUsize::new(0),
            fix_requests: AtomicUsize::new(0),
        }
    }

    pub fn denied() -> Self {
        Self {
            permission: Mutex::new(Permission::Denied),
            fix: Mutex::new(Err(LocationError::PermissionDenied)),
            permission_requests: AtomicUsize::new(0),
            fix_requests: AtomicUsize::new(0),
        }
    }

    pub fn set_granted(&self, position: Coordinates) {
        *lock(&self.permission) = Permission::Granted;
        *lock(&self.fix) = Ok(position);
    }

    pub fn set_denied(&self) {
        *lock(&self.permission) = Permission::Denied;
        *lock(&self.fix) = Err(LocationError::PermissionDenied);
    }

    /// Permission stays granted but no fix can be obtained.
    pub fn set_unavailable(&self, reason: &str) {
        *lock(&self.permission) = Permission::Granted;
        *lock(&self.fix) = Err(LocationError::Unavailable {
            reason: reason.to_string(),
        });
    }

    pub fn permission_requests(&self) -> usize {
        self.permission_requests.load(Ordering::SeqCst)
    }

    pub fn fix_requests(&self) -> usize {
        self.fix_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationProvider for StaticLocation {
    async fn request_permission(&self) -> Permission {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        *lock(&self.permission)
    }

    async fn current_position(&self, _accuracy: Accuracy) -> Result<Coordinates, LocationError> {
        self.fix_requests.fetch_add(1, Ordering::SeqCst);
        lock(&self.fix).clone()
    }
}

// ============================================================================
// KEY-VALUE STORE AND CLOCK
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
    failure: Mutex<Option<String>>,
    set_gate: Mutex<Option<oneshot::Receiver<()>>>,
    set_calls: AtomicUsize,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Make the next write fail with `reason`.
    pub fn fail_next(&self, reason: &str) {
        *lock(&self.failure) = Some(reason.to_string());
    }

    /// Hold the next `set` call until the returned sender fires or drops.
    pub fn pause_next_set(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *lock(&self.set_gate) = Some(rx);
        tx
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Result<(), SessionError> {
        match lock(&self.failure).take() {
            Some(reason) => Err(SessionError::StoreFailed { reason }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        let gate = lock(&self.set_gate).take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.take_failure()?;
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), SessionError> {
        self.take_failure()?;
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// Clock pinned to an instant. The local calendar is read in UTC.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<Timestamp>,
}

impl FixedClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: Timestamp) {
        *lock(&self.now) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        *lock(&self.now)
    }

    fn today(&self) -> LocalDate {
        self.now().date_naive()
    }

    fn local_time(&self) -> LocalTime {
        self.now().time()
    }
}

// ============================================================================
// CHAT, RETURNS AND PHOTOS
// ============================================================================

#[derive(Debug)]
pub struct MemoryChatStore {
    messages: Mutex<Vec<ChatMessage>>,
    next_id: AtomicI64,
    failure: Mutex<Option<String>>,
}

impl Default for MemoryChatStore {
    fn default() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
            failure: Mutex::new(None),
        }
    }
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages in insertion order.
    pub fn inserted(&self) -> Vec<ChatMessage> {
        lock(&self.messages).clone()
    }

    pub fn fail_next(&self, reason: &str) {
        *lock(&self.failure) = Some(reason.to_string());
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn recent_messages(
        &self,
        vehicle: &VehicleId,
        limit: usize,
    ) -> FieldOpsResult<Vec<ChatMessage>> {
        take_failure(&self.failure, CHAT_RESOURCE)?;
        let mut messages: Vec<ChatMessage> = lock(&self.messages)
            .iter()
            .filter(|m| &m.vehicle_id == vehicle)
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.id.cmp(&a.id));
        messages.truncate(limit);
        Ok(messages)
    }

    async fn insert_message(&self, message: &NewChatMessage) -> FieldOpsResult<()> {
        take_failure(&self.failure, CHAT_RESOURCE)?;
        let id = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.messages).push(ChatMessage {
            id,
            created_at: None,
            vehicle_id: message.vehicle_id.clone(),
            sender: message.sender,
            body: message.body.clone(),
            image_url: message.image_url.clone(),
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryReturnStore {
    records: Mutex<HashMap<String, ReturnRecord>>,
}

impl MemoryReturnStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: ReturnRecord) {
        lock(&self.records).insert(record.key.clone(), record);
    }

    pub fn get(&self, key: &str) -> Option<ReturnRecord> {
        lock(&self.records).get(key).cloned()
    }
}

#[async_trait]
impl ReturnStore for MemoryReturnStore {
    async fn find_return(&self, key: &str) -> FieldOpsResult<Option<ReturnRecord>> {
        Ok(self.get(key))
    }

    async fn confirm_return(
        &self,
        key: &str,
        confirmation: &ReturnConfirmation,
    ) -> FieldOpsResult<()> {
        let mut records = lock(&self.records);
        let record = records.get_mut(key).ok_or_else(|| RemoteError::Rejected {
            resource: RETURNS_RESOURCE.to_string(),
            status: 404,
            message: format!("no return with key {}", key),
        })?;
        record.status = Some(confirmation.status.clone());
        record.photo_url = Some(confirmation.photo_url.clone());
        record.extra_photo_urls = confirmation.extra_photo_urls.clone();
        record.confirmed_at = Some(confirmation.confirmed_at);
        record.confirmed_source = Some(confirmation.confirmed_source.clone());
        Ok(())
    }
}

/// One object written to [`MemoryPhotoStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPhoto {
    pub bucket: String,
    pub path: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct MemoryPhotoStore {
    base_url: String,
    uploads: Mutex<Vec<StoredPhoto>>,
    fail_after: Mutex<Option<usize>>,
}

impl MemoryPhotoStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            uploads: Mutex::new(Vec::new()),
            fail_after: Mutex::new(None),
        }
    }

    /// Let `n` more uploads succeed, then fail every one after.
    pub fn fail_after(&self, n: usize) {
        let done = lock(&self.uploads).len();
        *lock(&self.fail_after) = Some(done + n);
    }

    pub fn uploads(&self) -> Vec<StoredPhoto> {
        lock(&self.uploads).clone()
    }
}

#[async_trait]
impl PhotoStore for MemoryPhotoStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> FieldOpsResult<String> {
        let mut uploads = lock(&self.uploads);
        if let Some(limit) = *lock(&self.fail_after) {
            if uploads.len() >= limit {
                return Err(RemoteError::RequestFailed {
                    resource: STORAGE_RESOURCE.to_string(),
                    reason: format!("upload of {}/{} refused", bucket, path),
                }
                .into());
            }
        }
        uploads.push(StoredPhoto {
            bucket: bucket.to_string(),
            path: path.to_string(),
            content_type: content_type.to_string(),
            bytes,
        });
        Ok(format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, bucket, path
        ))
    }
}
