//! Port wiring: hosted backend adapters for the binary, anything else in tests.

use crate::config::TuiConfig;
use crate::error::TuiError;
use fieldops_client::{
    ConfiguredLocation, FileKeyValueStore, PostgrestClient, RealtimeClient, StorageClient,
};
use fieldops_core::ports::{
    ChangeNotifier, ChatStore, Clock, LocationProvider, PhotoStore, ReturnStore, RouteStore,
    SystemClock,
};
use fieldops_core::{RoutePorts, SessionContext};
use std::sync::Arc;

#[derive(Clone)]
pub struct Services {
    pub session: SessionContext,
    pub routes: Arc<dyn RouteStore>,
    pub notifier: Arc<dyn ChangeNotifier>,
    pub location: Arc<dyn LocationProvider>,
    pub chat: Arc<dyn ChatStore>,
    pub returns: Arc<dyn ReturnStore>,
    pub photos: Arc<dyn PhotoStore>,
    pub clock: Arc<dyn Clock>,
}

impl Services {
    pub fn connect(config: &TuiConfig) -> Result<Self, TuiError> {
        let rest = Arc::new(PostgrestClient::new(&config.backend)?);
        let storage = Arc::new(StorageClient::new(&config.backend)?);
        let realtime = Arc::new(RealtimeClient::new(&config.backend, &config.realtime));
        let session_store = Arc::new(FileKeyValueStore::open(&config.session_path)?);
        tracing::info!(
            backend = config.backend.base_url(),
            session_path = %config.session_path.display(),
            location_configured = config.location.is_some(),
            "Backend adapters ready"
        );

        Ok(Self {
            session: SessionContext::new(session_store),
            routes: rest.clone(),
            notifier: realtime,
            location: Arc::new(ConfiguredLocation::new(config.location)),
            chat: rest.clone(),
            returns: rest,
            photos: storage,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn route_ports(&self) -> RoutePorts {
        RoutePorts {
            routes: self.routes.clone(),
            notifier: self.notifier.clone(),
            location: self.location.clone(),
            clock: self.clock.clone(),
        }
    }
}
