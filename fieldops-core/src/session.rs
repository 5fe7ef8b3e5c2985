//! Driver session context backed by an injected key-value store.

use crate::error::{FieldOpsResult, ValidationError};
use crate::identity::{LocalDate, VehicleId};
use crate::ports::{KeyValueStore, RouteStore};
use std::sync::Arc;

pub const VEHICLE_KEY: &str = "patente_sesion";
pub const DRIVER_NAME_KEY: &str = "nombre_usuario";

#[derive(Clone)]
pub struct SessionContext {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext").finish_non_exhaustive()
    }
}

impl SessionContext {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The persisted active vehicle, if a session exists.
    ///
    /// A stored value that no longer normalises to a valid identifier is
    /// treated as no session.
    pub async fn restore(&self) -> FieldOpsResult<Option<VehicleId>> {
        let raw = self.store.get(VEHICLE_KEY).await?;
        Ok(raw.and_then(|value| VehicleId::parse(&value).ok()))
    }

    pub async fn driver_name(&self) -> FieldOpsResult<Option<String>> {
        Ok(self.store.get(DRIVER_NAME_KEY).await?)
    }

    pub async fn save_vehicle(&self, vehicle: &VehicleId) -> FieldOpsResult<()> {
        self.store.set(VEHICLE_KEY, vehicle.as_str()).await?;
        Ok(())
    }

    /// Validate the login form, confirm the backend answers and persist the session.
    pub async fn login(
        &self,
        routes: &dyn RouteStore,
        today: LocalDate,
        driver_name: &str,
        vehicle: &str,
    ) -> FieldOpsResult<VehicleId> {
        let name = driver_name.trim();
        if name.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "driver_name".to_string(),
            }
            .into());
        }
        let vehicle = VehicleId::parse(vehicle)?;

        let has_route = routes.probe_route(&vehicle, today).await?;
        tracing::info!(vehicle = %vehicle, has_route, "Driver logged in");

        self.store.set(DRIVER_NAME_KEY, name).await?;
        self.save_vehicle(&vehicle).await?;
        Ok(vehicle)
    }

    pub async fn logout(&self) -> FieldOpsResult<()> {
        self.store.remove(VEHICLE_KEY).await?;
        self.store.remove(DRIVER_NAME_KEY).await?;
        Ok(())
    }
}
