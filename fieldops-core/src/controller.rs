//! Route lap controller.
//!
//! Owns the loaded lap list for the active (vehicle, date), gates checkpoint
//! transitions, creates follow-up laps and keeps exactly one realtime
//! subscription alive for the active vehicle.
//!
//! Every load takes a ticket from a monotonically increasing counter. A
//! result is committed only while its ticket is still the most recently
//! issued one. Commits (session save, list swap, subscription) run one at a
//! time, so a slow load can never overwrite the list, the persisted vehicle
//! or the subscription of a newer one.

use crate::error::{FieldOpsError, FieldOpsResult, LocationError, ValidationError};
use crate::identity::{Coordinates, LapId, LocalDate, LocalTime, VehicleId};
use crate::lap::{self, Checkpoint, Lap, LapPatch, NewLap};
use crate::ports::{
    Accuracy, ChangeNotifier, Clock, LocationProvider, Permission, RouteStore, SubscriptionGuard,
};
use crate::session::SessionContext;
use crate::sync::{dispatch_notices, LapChange, RouteNotice};
use chrono::Timelike;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// External collaborators of the controller.
#[derive(Clone)]
pub struct RoutePorts {
    pub routes: Arc<dyn RouteStore>,
    pub notifier: Arc<dyn ChangeNotifier>,
    pub location: Arc<dyn LocationProvider>,
    pub clock: Arc<dyn Clock>,
}

/// The (vehicle, date) group a lap list belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub vehicle_id: VehicleId,
    pub date: LocalDate,
}

/// Snapshot of the controller's view of the route.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LapBoard {
    pub active: Option<RouteKey>,
    pub laps: Vec<Lap>,
}

impl LapBoard {
    pub fn latest(&self) -> Option<&Lap> {
        lap::latest_lap(&self.laps)
    }

    pub fn find(&self, id: LapId) -> Option<&Lap> {
        self.laps.iter().find(|l| l.id == id)
    }

    pub fn can_start_next(&self, id: LapId) -> bool {
        lap::can_start_next(&self.laps, id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// The list was replaced with `count` laps.
    Loaded {
        count: usize,
        route_available: Option<RouteNotice>,
    },
    /// No laps exist yet for this vehicle and date.
    Empty,
    /// A newer load was issued while this one was pending; its result was dropped.
    Superseded,
}

/// Result of a successful mutation. The follow-up reload may still fail.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub lap_id: LapId,
    pub reloaded: Result<LoadOutcome, FieldOpsError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeOutcome {
    pub notices: Vec<RouteNotice>,
    /// `None` when the event was ignored.
    pub reloaded: Option<Result<LoadOutcome, FieldOpsError>>,
}

impl ChangeOutcome {
    fn ignored() -> Self {
        Self {
            notices: Vec::new(),
            reloaded: None,
        }
    }
}

struct ActiveSubscription {
    vehicle: VehicleId,
    guard: SubscriptionGuard,
    forwarder: JoinHandle<()>,
}

impl Drop for ActiveSubscription {
    fn drop(&mut self) {
        self.forwarder.abort();
        tracing::info!(vehicle = %self.vehicle, channel = self.guard.channel(), "Lap subscription torn down");
    }
}

/// Resets the in-flight flag when the mutation ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct LapController {
    ports: RoutePorts,
    session: SessionContext,
    inbox: mpsc::Sender<LapChange>,
    board: RwLock<LapBoard>,
    issued: AtomicU64,
    commit: Mutex<()>,
    in_flight: AtomicBool,
    subscription: Mutex<Option<ActiveSubscription>>,
}

impl LapController {
    /// Realtime events for the active vehicle are forwarded to `inbox`; the
    /// owner feeds them back through [`LapController::handle_change`].
    pub fn new(ports: RoutePorts, session: SessionContext, inbox: mpsc::Sender<LapChange>) -> Self {
        Self {
            ports,
            session,
            inbox,
            board: RwLock::new(LapBoard::default()),
            issued: AtomicU64::new(0),
            commit: Mutex::new(()),
            in_flight: AtomicBool::new(false),
            subscription: Mutex::new(None),
        }
    }

    pub fn board(&self) -> LapBoard {
        self.board.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn laps(&self) -> Vec<Lap> {
        self.board().laps
    }

    pub fn active_route(&self) -> Option<RouteKey> {
        self.board().active
    }

    pub fn latest_lap(&self) -> Option<Lap> {
        self.board().latest().cloned()
    }

    pub fn can_start_next(&self, id: LapId) -> bool {
        self.board().can_start_next(id)
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn subscribed_vehicle(&self) -> Option<VehicleId> {
        self.subscription
            .lock()
            .await
            .as_ref()
            .map(|s| s.vehicle.clone())
    }

    /// Fetch every lap for (`vehicle`, `date`) and make it the active route.
    ///
    /// On failure the previous list is left untouched.
    pub async fn load_laps(&self, vehicle: &VehicleId, date: LocalDate) -> FieldOpsResult<LoadOutcome> {
        let ticket = self.issued.fetch_add(1, Ordering::SeqCst) + 1;

        let mut laps = match self.ports.routes.list_laps(vehicle, date).await {
            Ok(laps) => laps,
            Err(err) => {
                tracing::warn!(vehicle = %vehicle, %date, error = %err, "Lap load failed");
                return Err(err);
            }
        };
        lap::sort_laps(&mut laps);

        let _commit = self.commit.lock().await;
        if self.is_superseded(ticket) {
            tracing::debug!(vehicle = %vehicle, ticket, "Discarding superseded lap load");
            return Ok(LoadOutcome::Superseded);
        }
        if let Err(err) = self.session.save_vehicle(vehicle).await {
            tracing::warn!(vehicle = %vehicle, error = %err, "Session save failed; keeping previous laps");
            return Err(err);
        }

        let outcome = {
            let mut board = self.board.write().unwrap_or_else(PoisonError::into_inner);
            let was_empty = board.laps.is_empty();
            let count = laps.len();
            board.active = Some(RouteKey {
                vehicle_id: vehicle.clone(),
                date,
            });
            board.laps = laps;
            if count == 0 {
                LoadOutcome::Empty
            } else {
                LoadOutcome::Loaded {
                    count,
                    route_available: was_empty.then(|| RouteNotice::RouteAvailable {
                        vehicle_id: vehicle.clone(),
                    }),
                }
            }
        };

        self.ensure_subscription(vehicle).await;
        tracing::debug!(vehicle = %vehicle, %date, ?outcome, "Laps loaded");
        Ok(outcome)
    }

    fn is_superseded(&self, ticket: u64) -> bool {
        self.issued.load(Ordering::SeqCst) != ticket
    }

    /// Reload the active route.
    pub async fn refresh(&self) -> FieldOpsResult<LoadOutcome> {
        let key = self.active_route().ok_or(ValidationError::NoSession)?;
        self.load_laps(&key.vehicle_id, key.date).await
    }

    /// Record `checkpoint` on lap `id`, then reload.
    pub async fn advance_checkpoint(&self, id: LapId, checkpoint: Checkpoint) -> FieldOpsResult<MutationOutcome> {
        let _flight = self.begin_mutation()?;

        let lap = self
            .board()
            .find(id)
            .cloned()
            .ok_or(ValidationError::LapNotFound { lap_id: id })?;
        lap.ensure_accepts(checkpoint)?;

        let position = if checkpoint.needs_location() {
            Some(self.acquire_fix().await?)
        } else {
            None
        };
        let patch = LapPatch::for_checkpoint(checkpoint, self.ports.clock.now(), position);

        if let Err(err) = self.ports.routes.update_lap(id, &patch).await {
            tracing::warn!(lap_id = %id, checkpoint = checkpoint.label(), error = %err, "Checkpoint update failed");
            return Err(err);
        }
        tracing::info!(lap_id = %id, checkpoint = checkpoint.label(), "Checkpoint recorded");

        let reloaded = self.load_laps(&lap.vehicle_id, lap.date).await;
        Ok(MutationOutcome { lap_id: id, reloaded })
    }

    /// Create lap `number + 1` after the completed latest lap `id`.
    ///
    /// The new lap is already arrived at the current position.
    pub async fn start_next_lap(&self, id: LapId) -> FieldOpsResult<MutationOutcome> {
        let _flight = self.begin_mutation()?;

        let board = self.board();
        let current = lap::ensure_can_start_next(&board.laps, id)?.clone();
        let position = self.acquire_fix().await?;

        let next = NewLap::following(
            &current,
            truncate_to_minute(self.ports.clock.local_time()),
            self.ports.clock.now(),
            position,
        );
        let created = match self.ports.routes.insert_lap(&next).await {
            Ok(created) => created,
            Err(err) => {
                tracing::warn!(lap_id = %id, error = %err, "Next lap insert failed");
                return Err(err);
            }
        };
        tracing::info!(lap_id = %created, lap_number = next.lap_number, "Next lap started");

        let reloaded = self.load_laps(&current.vehicle_id, current.date).await;
        Ok(MutationOutcome {
            lap_id: created,
            reloaded,
        })
    }

    /// Turn a change event into notices and reload the active route.
    pub async fn handle_change(&self, change: LapChange) -> ChangeOutcome {
        let key = match self.active_route() {
            Some(key) if key.vehicle_id == change.vehicle_id => key,
            _ => {
                tracing::debug!(vehicle = %change.vehicle_id, "Ignoring change for inactive vehicle");
                return ChangeOutcome::ignored();
            }
        };
        let notices = dispatch_notices(&change);
        let reloaded = self.load_laps(&key.vehicle_id, key.date).await;
        ChangeOutcome {
            notices,
            reloaded: Some(reloaded),
        }
    }

    /// Drop the realtime subscription.
    pub async fn shutdown(&self) {
        self.subscription.lock().await.take();
    }

    fn begin_mutation(&self) -> Result<InFlight<'_>, ValidationError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| InFlight(&self.in_flight))
            .map_err(|_| ValidationError::OperationInFlight)
    }

    async fn acquire_fix(&self) -> Result<Coordinates, LocationError> {
        if self.ports.location.request_permission().await == Permission::Denied {
            tracing::warn!("Location permission denied");
            return Err(LocationError::PermissionDenied);
        }
        self.ports.location.current_position(Accuracy::Balanced).await
    }

    async fn ensure_subscription(&self, vehicle: &VehicleId) {
        let mut slot = self.subscription.lock().await;
        if slot.as_ref().is_some_and(|s| &s.vehicle == vehicle) {
            return;
        }
        // The old channel must be gone before the new one is requested.
        slot.take();

        let subscription = match self.ports.notifier.subscribe_laps(vehicle).await {
            Ok(subscription) => subscription,
            Err(err) => {
                tracing::warn!(vehicle = %vehicle, error = %err, "Lap subscription failed");
                return;
            }
        };
        let (mut events, guard) = subscription.into_parts();
        let inbox = self.inbox.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(change) = events.recv().await {
                if inbox.send(change).await.is_err() {
                    break;
                }
            }
        });
        tracing::info!(vehicle = %vehicle, channel = guard.channel(), "Lap subscription established");
        *slot = Some(ActiveSubscription {
            vehicle: vehicle.clone(),
            guard,
            forwarder,
        });
    }
}

fn truncate_to_minute(time: LocalTime) -> LocalTime {
    time.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time)
}
