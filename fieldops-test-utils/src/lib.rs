//! Field Ops Test Utilities
//!
//! Shared test infrastructure for the workspace:
//! - Proptest generators for laps, change events and chat messages
//! - Fixtures for the common route scenarios and a wired controller harness
//! - Custom assertions for field operations results

// Re-export in-memory ports from their source crate
pub use fieldops_core::memory::{
    FixedClock, MemoryChangeNotifier, MemoryChatStore, MemoryKeyValueStore, MemoryPhotoStore,
    MemoryReturnStore, MemoryRouteStore, StaticLocation, StoredPhoto,
};

// Re-export core types for convenience
pub use fieldops_core::{
    ChatMessage, Checkpoint, Coordinates, DispatchFields, FieldOpsError, FieldOpsResult, Lap,
    LapChange, LapController, LapId, LapStage, LoadOutcome, LocalDate, LocalTime, LocationError,
    MessageId, RemoteError, ReturnRecord, RouteNotice, RoutePorts, Sender, SessionContext,
    Timestamp, ValidationError, VehicleId,
};

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for field operations entities.

    use super::*;
    use proptest::prelude::*;

    // === Identity Generators ===

    /// Generate a normalised vehicle plate (two letters, four digits).
    pub fn arb_vehicle_id() -> impl Strategy<Value = VehicleId> {
        "[A-Z]{2}[0-9]{4}".prop_filter_map("plate must parse", |raw| VehicleId::parse(&raw).ok())
    }

    /// Generate raw plate input with stray whitespace and mixed case.
    pub fn arb_raw_plate() -> impl Strategy<Value = String> {
        ("[ ]{0,3}", "[a-zA-Z]{2}[0-9]{4}", "[ ]{0,3}").prop_map(|(l, p, r)| format!("{l}{p}{r}"))
    }

    /// Generate a Timestamp on the fixture route date.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (0u32..24, 0u32..60, 0u32..60).prop_map(|(h, m, s)| {
            Utc.with_ymd_and_hms(2026, 10, 19, h, m, s)
                .single()
                .unwrap_or_else(|| fixtures::now())
        })
    }

    /// Generate a scheduled time of day, possibly missing.
    pub fn arb_scheduled_time() -> impl Strategy<Value = Option<LocalTime>> {
        prop::option::of((5u32..23, 0u32..60).prop_filter_map("valid time", |(h, m)| {
            NaiveTime::from_hms_opt(h, m, 0)
        }))
    }

    /// Generate coordinates within valid ranges.
    pub fn arb_coordinates() -> impl Strategy<Value = Coordinates> {
        (-90.0f64..=90.0, -180.0f64..=180.0).prop_map(|(lat, lon)| Coordinates::new(lat, lon))
    }

    // === Enum Generators ===

    /// Generate a Checkpoint.
    pub fn arb_checkpoint() -> impl Strategy<Value = Checkpoint> {
        prop_oneof![
            Just(Checkpoint::Arrival),
            Just(Checkpoint::Departure),
            Just(Checkpoint::Completion),
        ]
    }

    /// Generate a LapStage.
    pub fn arb_stage() -> impl Strategy<Value = LapStage> {
        prop_oneof![
            Just(LapStage::AwaitingArrival),
            Just(LapStage::AwaitingDeparture),
            Just(LapStage::AwaitingCompletion),
            Just(LapStage::Completed),
        ]
    }

    /// Generate a chat Sender.
    pub fn arb_sender() -> impl Strategy<Value = Sender> {
        prop_oneof![Just(Sender::Driver), Just(Sender::Dispatch)]
    }

    // === Struct Generators ===

    /// Generate a lap at an arbitrary stage for the fixture vehicle and date.
    pub fn arb_lap(id: i64) -> impl Strategy<Value = Lap> {
        (1u32..6, arb_scheduled_time(), arb_stage()).prop_map(move |(number, time, stage)| {
            let mut lap = fixtures::lap(id, fixtures::PRIMARY_PLATE, number, None);
            lap.scheduled_time = time;
            fixtures::at_stage(lap, stage)
        })
    }

    /// Generate a list of laps with unique ids for one (vehicle, date).
    pub fn arb_lap_list(max: usize) -> impl Strategy<Value = Vec<Lap>> {
        prop::collection::vec((1u32..6, arb_scheduled_time(), arb_stage()), 0..=max).prop_map(
            |specs| {
                specs
                    .into_iter()
                    .enumerate()
                    .map(|(i, (number, time, stage))| {
                        let mut lap =
                            fixtures::lap(i as i64 + 1, fixtures::PRIMARY_PLATE, number, None);
                        lap.scheduled_time = time;
                        fixtures::at_stage(lap, stage)
                    })
                    .collect()
            },
        )
    }

    /// Generate an optional dispatch text, including the empty string.
    pub fn arb_dispatch_text() -> impl Strategy<Value = Option<String>> {
        prop::option::of(prop_oneof![
            Just(String::new()),
            Just("Go to dock 4".to_string()),
            Just("Load pallets first".to_string()),
            "[a-z ]{1,12}",
        ])
    }

    /// Generate the dispatch-authored fields of a row snapshot.
    pub fn arb_dispatch_fields() -> impl Strategy<Value = DispatchFields> {
        (arb_dispatch_text(), arb_dispatch_text())
            .prop_map(|(message, comment)| DispatchFields { message, comment })
    }

    /// Generate a change event for `vehicle`.
    pub fn arb_lap_change(vehicle: VehicleId) -> impl Strategy<Value = LapChange> {
        (
            prop::option::of((1i64..100).prop_map(LapId)),
            arb_dispatch_fields(),
            arb_dispatch_fields(),
        )
            .prop_map(move |(lap_id, previous, current)| LapChange {
                vehicle_id: vehicle.clone(),
                lap_id,
                previous,
                current,
            })
    }

    /// Generate a chat message for `vehicle`.
    pub fn arb_chat_message(vehicle: VehicleId) -> impl Strategy<Value = ChatMessage> {
        (1i64..10_000, arb_sender(), "[a-zA-Z ]{0,40}").prop_map(move |(id, sender, body)| {
            ChatMessage {
                id: MessageId(id),
                created_at: None,
                vehicle_id: vehicle.clone(),
                sender,
                body,
                image_url: None,
            }
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built route scenarios.

    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    pub const PRIMARY_PLATE: &str = "AB1234";
    pub const SECONDARY_PLATE: &str = "XY9999";

    /// Position reported by granted location fixtures.
    pub const DEPOT: Coordinates = Coordinates {
        latitude: -33.45,
        longitude: -70.66,
    };

    pub fn route_date() -> LocalDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap_or_default()
    }

    /// 2026-10-19 12:34:56 UTC.
    pub fn now() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 34, 56)
            .single()
            .unwrap_or_default()
    }

    pub fn vehicle(raw: &str) -> VehicleId {
        VehicleId::parse(raw).unwrap_or_else(|e| panic!("invalid fixture plate {raw:?}: {e}"))
    }

    /// A fresh lap awaiting arrival. `time` is "HH:MM".
    pub fn lap(id: i64, plate: &str, number: u32, time: Option<&str>) -> Lap {
        Lap {
            id: LapId(id),
            date: route_date(),
            vehicle_id: vehicle(plate),
            node: Some("Nodo Norte".to_string()),
            site: Some("Local 12".to_string()),
            scheduled_time: time.and_then(|t| NaiveTime::parse_from_str(t, "%H:%M").ok()),
            lap_number: number,
            arrived_at: None,
            departed_at: None,
            completed_at: None,
            arrival_position: None,
            dispatcher_message: None,
            dispatcher_comment: None,
            status: Some("pendiente".to_string()),
        }
    }

    /// Fill in checkpoints so `lap` sits at `stage`.
    pub fn at_stage(mut lap: Lap, stage: LapStage) -> Lap {
        let at = Utc
            .with_ymd_and_hms(2026, 10, 19, 11, 0, 0)
            .single()
            .unwrap_or_default();
        let (arrived, departed, completed) = match stage {
            LapStage::AwaitingArrival => (false, false, false),
            LapStage::AwaitingDeparture => (true, false, false),
            LapStage::AwaitingCompletion => (true, true, false),
            LapStage::Completed => (true, true, true),
        };
        lap.arrived_at = arrived.then_some(at);
        lap.arrival_position = arrived.then_some(DEPOT);
        lap.departed_at = departed.then_some(at);
        lap.completed_at = completed.then_some(at);
        lap
    }

    pub fn completed_lap(id: i64, plate: &str, number: u32, time: Option<&str>) -> Lap {
        at_stage(lap(id, plate, number, time), LapStage::Completed)
    }

    /// Two laps for the primary vehicle: #1 completed, #2 awaiting departure.
    pub fn two_lap_route() -> Vec<Lap> {
        vec![
            completed_lap(1, PRIMARY_PLATE, 1, Some("08:00")),
            at_stage(lap(2, PRIMARY_PLATE, 2, Some("12:30")), LapStage::AwaitingDeparture),
        ]
    }

    /// A dispatch edit of `lap_id` on `plate`.
    pub fn dispatch_change(plate: &str, lap_id: i64, old: Option<&str>, new: Option<&str>) -> LapChange {
        LapChange {
            vehicle_id: vehicle(plate),
            lap_id: Some(LapId(lap_id)),
            previous: DispatchFields {
                message: old.map(str::to_string),
                comment: None,
            },
            current: DispatchFields {
                message: new.map(str::to_string),
                comment: None,
            },
        }
    }

    pub fn pending_return(key: &str) -> ReturnRecord {
        ReturnRecord {
            key: key.to_string(),
            status: Some("pendiente".to_string()),
            sg: Some(r#"["SG-1","SG-2"]"#.to_string()),
            photo_url: None,
            extra_photo_urls: Vec::new(),
            confirmed_at: None,
            confirmed_source: None,
        }
    }

    /// A lap controller wired to in-memory ports, with handles to each.
    pub struct RouteHarness {
        pub controller: Arc<LapController>,
        pub routes: Arc<MemoryRouteStore>,
        pub notifier: Arc<MemoryChangeNotifier>,
        pub location: Arc<StaticLocation>,
        pub clock: Arc<FixedClock>,
        pub kv: Arc<MemoryKeyValueStore>,
        pub inbox: mpsc::Receiver<LapChange>,
    }

    impl RouteHarness {
        /// Controller over `laps` with location granted at [`DEPOT`].
        pub fn new(laps: Vec<Lap>) -> Self {
            Self::with_location(laps, StaticLocation::granted(DEPOT))
        }

        pub fn with_location(laps: Vec<Lap>, location: StaticLocation) -> Self {
            let routes = Arc::new(MemoryRouteStore::with_laps(laps));
            let notifier = Arc::new(MemoryChangeNotifier::new());
            let location = Arc::new(location);
            let clock = Arc::new(FixedClock::new(now()));
            let kv = Arc::new(MemoryKeyValueStore::new());
            let (tx, rx) = mpsc::channel(16);
            let controller = LapController::new(
                RoutePorts {
                    routes: routes.clone(),
                    notifier: notifier.clone(),
                    location: location.clone(),
                    clock: clock.clone(),
                },
                SessionContext::new(kv.clone()),
                tx,
            );
            Self {
                controller: Arc::new(controller),
                routes,
                notifier,
                location,
                clock,
                kv,
                inbox: rx,
            }
        }

        /// Load the primary vehicle's route for the fixture date.
        pub async fn load_primary(&self) -> FieldOpsResult<LoadOutcome> {
            self.controller
                .load_laps(&vehicle(PRIMARY_PLATE), route_date())
                .await
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for field operations results.

    use super::*;

    /// Assert that a FieldOpsResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &FieldOpsResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a FieldOpsResult is Err.
    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &FieldOpsResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    /// Assert that a FieldOpsResult is a Validation error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &FieldOpsResult<T>) {
        match result {
            Err(FieldOpsError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that a FieldOpsResult was rejected as out of order for `lap_id`.
    #[track_caller]
    pub fn assert_out_of_order<T: std::fmt::Debug>(result: &FieldOpsResult<T>, lap_id: LapId) {
        match result {
            Err(FieldOpsError::Validation(ValidationError::CheckpointOutOfOrder {
                lap_id: id,
                ..
            })) => {
                assert_eq!(*id, lap_id, "Wrong lap in CheckpointOutOfOrder error");
            }
            other => panic!("Expected CheckpointOutOfOrder for {}, got: {:?}", lap_id, other),
        }
    }

    /// Assert that a FieldOpsResult was rejected because a mutation was running.
    #[track_caller]
    pub fn assert_in_flight<T: std::fmt::Debug>(result: &FieldOpsResult<T>) {
        match result {
            Err(FieldOpsError::Validation(ValidationError::OperationInFlight)) => {}
            other => panic!("Expected OperationInFlight error, got: {:?}", other),
        }
    }

    /// Assert that a FieldOpsResult is a Location error.
    #[track_caller]
    pub fn assert_location_error<T: std::fmt::Debug>(result: &FieldOpsResult<T>) {
        match result {
            Err(FieldOpsError::Location(_)) => {}
            other => panic!("Expected Location error, got: {:?}", other),
        }
    }

    /// Assert that a FieldOpsResult is a Remote error.
    #[track_caller]
    pub fn assert_remote_error<T: std::fmt::Debug>(result: &FieldOpsResult<T>) {
        match result {
            Err(FieldOpsError::Remote(_)) => {}
            other => panic!("Expected Remote error, got: {:?}", other),
        }
    }

    /// Assert that `laps` are ordered by lap number, then scheduled time.
    #[track_caller]
    pub fn assert_sorted(laps: &[Lap]) {
        for pair in laps.windows(2) {
            assert!(
                fieldops_core::lap::lap_order(&pair[0], &pair[1]) != std::cmp::Ordering::Greater,
                "Laps out of order: #{} {:?} before #{} {:?}",
                pair[0].lap_number,
                pair[0].scheduled_time,
                pair[1].lap_number,
                pair[1].scheduled_time
            );
        }
    }

    /// Assert that `lap` sits at `expected`.
    #[track_caller]
    pub fn assert_stage(lap: &Lap, expected: LapStage) {
        assert_eq!(
            lap.stage(),
            expected,
            "Lap {} stage mismatch: expected {:?}, got {:?}",
            lap.id,
            expected,
            lap.stage()
        );
    }
}
