//! Realtime change events and the notices derived from them.
//!
//! Change events are invalidation signals: the controller derives dispatch
//! notices from the dispatch-authored fields and then reloads the full lap
//! list. The rest of the row payload is never applied locally.

use crate::identity::{LapId, VehicleId};
use serde::{Deserialize, Serialize};

/// Dispatch-authored fields of a lap row snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DispatchFields {
    pub message: Option<String>,
    pub comment: Option<String>,
}

/// An UPDATE event on a lap row, as delivered by the change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LapChange {
    pub vehicle_id: VehicleId,
    pub lap_id: Option<LapId>,
    pub previous: DispatchFields,
    pub current: DispatchFields,
}

/// Something the driver should be shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteNotice {
    DispatcherMessage { lap_id: Option<LapId>, text: String },
    DispatcherComment { lap_id: Option<LapId>, text: String },
    RouteAvailable { vehicle_id: VehicleId },
    ChatMessage { text: String },
}

impl RouteNotice {
    pub fn title(&self) -> &'static str {
        match self {
            RouteNotice::DispatcherMessage { .. } => "Message from dispatch",
            RouteNotice::DispatcherComment { .. } => "New comment",
            RouteNotice::RouteAvailable { .. } => "Route available",
            RouteNotice::ChatMessage { .. } => "New message from dispatch",
        }
    }

    pub fn body(&self) -> String {
        match self {
            RouteNotice::DispatcherMessage { text, .. }
            | RouteNotice::DispatcherComment { text, .. }
            | RouteNotice::ChatMessage { text } => text.clone(),
            RouteNotice::RouteAvailable { vehicle_id } => {
                format!("The route for vehicle {} is loaded.", vehicle_id)
            }
        }
    }
}

fn changed_text<'a>(previous: &Option<String>, current: &'a Option<String>) -> Option<&'a str> {
    match current.as_deref() {
        Some(text) if !text.is_empty() && previous.as_deref() != Some(text) => Some(text),
        _ => None,
    }
}

/// Notices raised by a single change event: at most one message notice and
/// one comment notice.
pub fn dispatch_notices(change: &LapChange) -> Vec<RouteNotice> {
    let mut notices = Vec::new();
    if let Some(text) = changed_text(&change.previous.message, &change.current.message) {
        notices.push(RouteNotice::DispatcherMessage {
            lap_id: change.lap_id,
            text: text.to_string(),
        });
    }
    if let Some(text) = changed_text(&change.previous.comment, &change.current.comment) {
        notices.push(RouteNotice::DispatcherComment {
            lap_id: change.lap_id,
            text: text.to_string(),
        });
    }
    notices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(old_msg: Option<&str>, new_msg: Option<&str>) -> LapChange {
        LapChange {
            vehicle_id: VehicleId::parse("AB1234").unwrap(),
            lap_id: Some(LapId(1)),
            previous: DispatchFields {
                message: old_msg.map(str::to_string),
                comment: None,
            },
            current: DispatchFields {
                message: new_msg.map(str::to_string),
                comment: None,
            },
        }
    }

    #[test]
    fn test_new_message_raises_one_notice() {
        let notices = dispatch_notices(&change(None, Some("Go to dock 4")));
        assert_eq!(notices.len(), 1);
        assert!(matches!(
            &notices[0],
            RouteNotice::DispatcherMessage { text, .. } if text == "Go to dock 4"
        ));
    }

    #[test]
    fn test_unchanged_message_is_silent() {
        assert!(dispatch_notices(&change(Some("same"), Some("same"))).is_empty());
    }

    #[test]
    fn test_cleared_message_is_silent() {
        assert!(dispatch_notices(&change(Some("old"), Some(""))).is_empty());
        assert!(dispatch_notices(&change(Some("old"), None)).is_empty());
    }

    #[test]
    fn test_message_and_comment_both_notify() {
        let mut c = change(None, Some("msg"));
        c.current.comment = Some("comment".to_string());
        let notices = dispatch_notices(&c);
        assert_eq!(notices.len(), 2);
        assert!(matches!(notices[1], RouteNotice::DispatcherComment { .. }));
    }
}
