//! Field Ops Core - Route Laps, Dispatch Chat and Returns
//!
//! Domain types, the error taxonomy and the ports every backend adapter
//! implements. The lap controller, session context, chat room and return
//! desk are written against the ports only, so they run unchanged against
//! the hosted backend or the in-memory implementations in [`memory`].

pub mod chat;
pub mod controller;
pub mod error;
pub mod identity;
pub mod lap;
pub mod memory;
pub mod ports;
pub mod returns;
pub mod session;
pub mod sync;

pub use chat::{ChatMessage, ChatRoom, NewChatMessage, Sender};
pub use controller::{
    ChangeOutcome, LapBoard, LapController, LoadOutcome, MutationOutcome, RouteKey, RoutePorts,
};
pub use error::{
    FieldOpsError, FieldOpsResult, LocationError, RemoteError, SessionError, ValidationError,
};
pub use identity::{Coordinates, LapId, LocalDate, LocalTime, MessageId, Timestamp, VehicleId};
pub use lap::{Checkpoint, Lap, LapPatch, LapStage, NewLap};
pub use ports::{
    Accuracy, ChangeNotifier, ChatStore, Clock, KeyValueStore, LocationProvider, Permission,
    PhotoStore, ReturnStore, RouteStore, Subscription, SubscriptionFeed, SubscriptionGuard,
    SystemClock,
};
pub use returns::{PhotoUpload, ReturnConfirmation, ReturnDesk, ReturnRecord};
pub use session::SessionContext;
pub use sync::{DispatchFields, LapChange, RouteNotice};
