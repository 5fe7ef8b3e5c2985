//! Lap records and checkpoint gating rules.

use crate::error::ValidationError;
use crate::identity::{Coordinates, LapId, LocalDate, LocalTime, Timestamp, VehicleId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Status written on laps created by the client.
pub const NEW_LAP_STATUS: &str = "pendiente";

/// Progress checkpoint within a lap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Checkpoint {
    Arrival,
    Departure,
    Completion,
}

impl Checkpoint {
    pub fn label(&self) -> &'static str {
        match self {
            Checkpoint::Arrival => "arrival",
            Checkpoint::Departure => "departure",
            Checkpoint::Completion => "completion",
        }
    }

    /// Whether recording this checkpoint requires a location fix.
    pub fn needs_location(&self) -> bool {
        matches!(self, Checkpoint::Arrival)
    }
}

/// Where a lap currently sits in its checkpoint sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LapStage {
    AwaitingArrival,
    AwaitingDeparture,
    AwaitingCompletion,
    Completed,
}

/// One lap attempt of a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lap {
    pub id: LapId,
    pub date: LocalDate,
    pub vehicle_id: VehicleId,
    pub node: Option<String>,
    pub site: Option<String>,
    pub scheduled_time: Option<LocalTime>,
    pub lap_number: u32,
    pub arrived_at: Option<Timestamp>,
    pub departed_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub arrival_position: Option<Coordinates>,
    pub dispatcher_message: Option<String>,
    pub dispatcher_comment: Option<String>,
    pub status: Option<String>,
}

impl Lap {
    pub fn stage(&self) -> LapStage {
        if self.arrived_at.is_none() {
            LapStage::AwaitingArrival
        } else if self.departed_at.is_none() {
            LapStage::AwaitingDeparture
        } else if self.completed_at.is_none() {
            LapStage::AwaitingCompletion
        } else {
            LapStage::Completed
        }
    }

    /// The only checkpoint currently accepted for this lap, if any.
    pub fn next_checkpoint(&self) -> Option<Checkpoint> {
        match self.stage() {
            LapStage::AwaitingArrival => Some(Checkpoint::Arrival),
            LapStage::AwaitingDeparture => Some(Checkpoint::Departure),
            LapStage::AwaitingCompletion => Some(Checkpoint::Completion),
            LapStage::Completed => None,
        }
    }

    pub fn accepts(&self, checkpoint: Checkpoint) -> bool {
        self.next_checkpoint() == Some(checkpoint)
    }

    pub fn ensure_accepts(&self, checkpoint: Checkpoint) -> Result<(), ValidationError> {
        if self.accepts(checkpoint) {
            Ok(())
        } else {
            Err(ValidationError::CheckpointOutOfOrder {
                lap_id: self.id,
                checkpoint,
            })
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Single-row update issued when a checkpoint is recorded.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LapPatch {
    pub arrived_at: Option<Timestamp>,
    pub arrival_position: Option<Coordinates>,
    pub departed_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl LapPatch {
    /// Build the update for `checkpoint` at `at`. Arrival carries its fix.
    pub fn for_checkpoint(
        checkpoint: Checkpoint,
        at: Timestamp,
        position: Option<Coordinates>,
    ) -> Self {
        match checkpoint {
            Checkpoint::Arrival => Self {
                arrived_at: Some(at),
                arrival_position: position,
                ..Default::default()
            },
            Checkpoint::Departure => Self {
                departed_at: Some(at),
                ..Default::default()
            },
            Checkpoint::Completion => Self {
                completed_at: Some(at),
                ..Default::default()
            },
        }
    }

    pub fn apply_to(&self, lap: &mut Lap) {
        if let Some(at) = self.arrived_at {
            lap.arrived_at = Some(at);
            lap.arrival_position = self.arrival_position;
        }
        if let Some(at) = self.departed_at {
            lap.departed_at = Some(at);
        }
        if let Some(at) = self.completed_at {
            lap.completed_at = Some(at);
        }
    }
}

/// A lap created client-side when the driver starts the next lap.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLap {
    pub date: LocalDate,
    pub vehicle_id: VehicleId,
    pub node: Option<String>,
    pub site: Option<String>,
    pub scheduled_time: LocalTime,
    pub lap_number: u32,
    pub status: String,
    pub arrived_at: Timestamp,
    pub arrival_position: Coordinates,
}

impl NewLap {
    /// Successor of `current`, already arrived at `position`.
    pub fn following(
        current: &Lap,
        scheduled_time: LocalTime,
        arrived_at: Timestamp,
        position: Coordinates,
    ) -> Self {
        Self {
            date: current.date,
            vehicle_id: current.vehicle_id.clone(),
            node: current.node.clone(),
            site: current.site.clone(),
            scheduled_time,
            lap_number: current.lap_number + 1,
            status: NEW_LAP_STATUS.to_string(),
            arrived_at,
            arrival_position: position,
        }
    }

    pub fn into_lap(self, id: LapId) -> Lap {
        Lap {
            id,
            date: self.date,
            vehicle_id: self.vehicle_id,
            node: self.node,
            site: self.site,
            scheduled_time: Some(self.scheduled_time),
            lap_number: self.lap_number,
            arrived_at: Some(self.arrived_at),
            departed_at: None,
            completed_at: None,
            arrival_position: Some(self.arrival_position),
            dispatcher_message: None,
            dispatcher_comment: None,
            status: Some(self.status),
        }
    }
}

/// Ordering key for lap lists: lap number, then scheduled time.
///
/// Laps without a scheduled time sort after those with one.
pub fn lap_order(a: &Lap, b: &Lap) -> Ordering {
    a.lap_number.cmp(&b.lap_number).then_with(|| {
        match (a.scheduled_time, b.scheduled_time) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    })
}

pub fn sort_laps(laps: &mut [Lap]) {
    laps.sort_by(lap_order);
}

/// The lap with the highest lap number. Ties resolve to the last in order.
pub fn latest_lap(laps: &[Lap]) -> Option<&Lap> {
    laps.iter().max_by(|a, b| lap_order(a, b))
}

/// Check that `lap_id` may spawn the next lap and return that lap.
pub fn ensure_can_start_next(laps: &[Lap], lap_id: LapId) -> Result<&Lap, ValidationError> {
    let lap = laps
        .iter()
        .find(|l| l.id == lap_id)
        .ok_or(ValidationError::LapNotFound { lap_id })?;
    let latest = latest_lap(laps).ok_or(ValidationError::LapNotFound { lap_id })?;
    if latest.lap_number != lap.lap_number {
        return Err(ValidationError::NotLatestLap {
            lap_id,
            latest_number: latest.lap_number,
        });
    }
    if !lap.is_completed() {
        return Err(ValidationError::LapNotCompleted { lap_id });
    }
    Ok(lap)
}

/// Whether the "start next lap" control is enabled for `lap_id`.
pub fn can_start_next(laps: &[Lap], lap_id: LapId) -> bool {
    ensure_can_start_next(laps, lap_id).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

    fn lap(id: i64, number: u32, time: &str) -> Lap {
        Lap {
            id: LapId(id),
            date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            vehicle_id: VehicleId::parse("AB1234").unwrap(),
            node: Some("Nodo Norte".to_string()),
            site: None,
            scheduled_time: NaiveTime::parse_from_str(time, "%H:%M").ok(),
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

    #[test]
    fn test_stage_progression() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let mut l = lap(1, 1, "08:00");
        assert_eq!(l.stage(), LapStage::AwaitingArrival);
        l.arrived_at = Some(at);
        assert_eq!(l.stage(), LapStage::AwaitingDeparture);
        l.departed_at = Some(at);
        assert_eq!(l.stage(), LapStage::AwaitingCompletion);
        l.completed_at = Some(at);
        assert_eq!(l.stage(), LapStage::Completed);
        assert_eq!(l.next_checkpoint(), None);
    }

    #[test]
    fn test_departure_rejected_before_arrival() {
        let l = lap(1, 1, "08:00");
        let err = l.ensure_accepts(Checkpoint::Departure).unwrap_err();
        assert!(matches!(err, ValidationError::CheckpointOutOfOrder { .. }));
    }

    #[test]
    fn test_sort_by_number_then_time() {
        let mut laps = vec![lap(3, 2, "07:00"), lap(2, 1, "09:00"), lap(1, 1, "08:00")];
        sort_laps(&mut laps);
        let ids: Vec<i64> = laps.iter().map(|l| l.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_start_next_requires_latest_completed() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let mut first = lap(1, 1, "08:00");
        first.arrived_at = Some(at);
        first.departed_at = Some(at);
        first.completed_at = Some(at);
        let second = lap(2, 2, "11:00");

        let laps = vec![first.clone(), second];
        assert!(matches!(
            ensure_can_start_next(&laps, LapId(1)),
            Err(ValidationError::NotLatestLap { latest_number: 2, .. })
        ));
        assert!(matches!(
            ensure_can_start_next(&laps, LapId(2)),
            Err(ValidationError::LapNotCompleted { .. })
        ));
        assert!(can_start_next(&[first], LapId(1)));
    }

    #[test]
    fn test_new_lap_following_copies_route_fields() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 15, 30, 0).unwrap();
        let current = lap(4, 1, "08:00");
        let time = NaiveTime::from_hms_opt(12, 30, 0).unwrap();
        let next = NewLap::following(&current, time, at, Coordinates::new(-33.45, -70.66));
        assert_eq!(next.lap_number, 2);
        assert_eq!(next.node, current.node);
        assert_eq!(next.vehicle_id, current.vehicle_id);
        assert_eq!(next.status, NEW_LAP_STATUS);

        let created = next.into_lap(LapId(5));
        assert_eq!(created.stage(), LapStage::AwaitingDeparture);
        assert!(created.departed_at.is_none());
        assert!(created.completed_at.is_none());
    }

    #[test]
    fn test_patch_for_arrival_carries_position() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        let patch = LapPatch::for_checkpoint(
            Checkpoint::Arrival,
            at,
            Some(Coordinates::new(1.0, 2.0)),
        );
        let mut l = lap(1, 1, "08:00");
        patch.apply_to(&mut l);
        assert_eq!(l.arrived_at, Some(at));
        assert_eq!(l.arrival_position, Some(Coordinates::new(1.0, 2.0)));
        assert!(l.departed_at.is_none());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_lap() -> impl Strategy<Value = Lap> {
            (1i64..1000, 1u32..6, prop::option::of(0u32..24 * 60)).prop_map(|(id, number, minutes)| {
                let mut l = lap(id, number, "00:00");
                l.scheduled_time = minutes.and_then(|m| NaiveTime::from_hms_opt(m / 60, m % 60, 0));
                l
            })
        }

        proptest! {
            #[test]
            fn sorted_laps_follow_number_then_time(mut laps in prop::collection::vec(arb_lap(), 0..12)) {
                sort_laps(&mut laps);
                for pair in laps.windows(2) {
                    let (a, b) = (&pair[0], &pair[1]);
                    prop_assert!(a.lap_number <= b.lap_number);
                    if a.lap_number == b.lap_number {
                        let ordered = match (a.scheduled_time, b.scheduled_time) {
                            (Some(x), Some(y)) => x <= y,
                            (None, Some(_)) => false,
                            _ => true,
                        };
                        prop_assert!(ordered);
                    }
                }
            }

            #[test]
            fn latest_lap_has_max_number(laps in prop::collection::vec(arb_lap(), 1..12)) {
                let max = laps.iter().map(|l| l.lap_number).max();
                prop_assert_eq!(latest_lap(&laps).map(|l| l.lap_number), max);
            }
        }
    }
}
