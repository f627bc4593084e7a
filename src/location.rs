//! Viewer geolocation, as seen by the task board.

use async_trait::async_trait;
use thiserror::Error;

use crate::geo::Coordinate;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("location permission was denied")]
    PermissionDenied,
    #[error("location is unavailable: {0}")]
    Unavailable(String),
}

/// Source of the viewer's current position (device GPS, browser API, a
/// fixed kiosk location...).
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_location(&self) -> Result<Coordinate, LocationError>;
}

/// Provider with a predetermined answer.
#[derive(Debug, Clone)]
pub struct StaticLocation {
    answer: Result<Coordinate, LocationError>,
}

impl StaticLocation {
    pub fn at(coordinate: Coordinate) -> Self {
        StaticLocation { answer: Ok(coordinate) }
    }

    pub fn denied() -> Self {
        StaticLocation {
            answer: Err(LocationError::PermissionDenied),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        StaticLocation {
            answer: Err(LocationError::Unavailable(reason.into())),
        }
    }
}

#[async_trait]
impl LocationProvider for StaticLocation {
    async fn current_location(&self) -> Result<Coordinate, LocationError> {
        self.answer.clone()
    }
}
