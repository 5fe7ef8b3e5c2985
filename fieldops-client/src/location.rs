//! Location provider for hosts without a positioning device.

use async_trait::async_trait;
use fieldops_core::error::LocationError;
use fieldops_core::identity::Coordinates;
use fieldops_core::ports::{Accuracy, LocationProvider, Permission};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
}

impl LocationConfig {
    pub fn validate(&self) -> Result<(), crate::config::ConfigError> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(crate::config::ConfigError::InvalidValue {
                field: "location.latitude",
                reason: "must be within [-90, 90]".to_string(),
            });
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(crate::config::ConfigError::InvalidValue {
                field: "location.longitude",
                reason: "must be within [-180, 180]".to_string(),
            });
        }
        Ok(())
    }
}

/// Reports the configured position. Without one, permission is denied.
#[derive(Debug, Clone, Copy)]
pub struct ConfiguredLocation {
    position: Option<Coordinates>,
}

impl ConfiguredLocation {
    pub fn new(config: Option<LocationConfig>) -> Self {
        Self {
            position: config.map(|c| Coordinates::new(c.latitude, c.longitude)),
        }
    }
}

#[async_trait]
impl LocationProvider for ConfiguredLocation {
    async fn request_permission(&self) -> Permission {
        if self.position.is_some() {
            Permission::Granted
        } else {
            Permission::Denied
        }
    }

    async fn current_position(&self, accuracy: Accuracy) -> Result<Coordinates, LocationError> {
        tracing::debug!(?accuracy, "Reading configured position");
        self.position.ok_or(LocationError::PermissionDenied)
    }
}
