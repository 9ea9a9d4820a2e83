//! Geofence polygons drawn by the operator
//!
//! A draw tool hands over a polygon in one of two shapes:
//! - GeoJSON (`Polygon` geometry or a `Feature` wrapping one), rings of `[lng, lat]`
//!   with the closing vertex repeated
//! - nested `{lat, lng}` rings, outer ring first, closure implied
//!
//! Only the outer ring survives normalization. Holes and any other geometry
//! metadata are dropped.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};

/// Minimum vertex count for a submittable polygon
pub const MIN_GEOFENCE_POINTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Ordered vertex list, first point not repeated at the end
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeofencePolygon(Vec<LatLng>);

impl GeofencePolygon {
    pub fn new(points: Vec<LatLng>) -> Self {
        Self(points)
    }

    pub fn points(&self) -> &[LatLng] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.0.len() < MIN_GEOFENCE_POINTS {
            return Err(ValidationError::TooFewPoints { min: MIN_GEOFENCE_POINTS, got: self.0.len() });
        }
        Ok(())
    }
}

/// Polygon as emitted by a draw tool, before normalization
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawPolygon {
    GeoJson(GeoJson),
    Rings(Vec<Vec<LatLng>>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum GeoJson {
    Feature { geometry: GeoJsonGeometry },
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum GeoJsonGeometry {
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
}

impl RawPolygon {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Outer ring mapped to `{lat, lng}`, in drawn order
    pub fn outer_ring(&self) -> Vec<LatLng> {
        match self {
            RawPolygon::Rings(rings) => rings.first().cloned().unwrap_or_default(),
            RawPolygon::GeoJson(GeoJson::Polygon { coordinates })
            | RawPolygon::GeoJson(GeoJson::Feature {
                geometry: GeoJsonGeometry::Polygon { coordinates },
            }) => {
                let Some(ring) = coordinates.first() else { return Vec::new() };
                let mut points: Vec<LatLng> = ring
                    .iter()
                    .filter(|pos| pos.len() >= 2)
                    .map(|pos| LatLng::new(pos[1], pos[0]))
                    .collect();
                // GeoJSON rings repeat the first vertex to close
                if points.len() > 1 && points.first() == points.last() {
                    points.pop();
                }
                points
            }
        }
    }
}

/// Holds at most one captured, not-yet-submitted polygon
#[derive(Debug, Default)]
pub struct GeofenceCapture {
    current: Option<GeofencePolygon>,
}

impl GeofenceCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new draw discards whatever was captured before
    pub fn begin_draw(&mut self) {
        self.current = None;
    }

    pub fn on_draw_complete(&mut self, raw: &RawPolygon) -> GeofencePolygon {
        let polygon = GeofencePolygon::new(raw.outer_ring());
        self.current = Some(polygon.clone());
        polygon
    }

    pub fn current(&self) -> Option<&GeofencePolygon> {
        self.current.as_ref()
    }

    /// Polygon ready for submission, or the validation failure to show
    pub fn for_submission(&self) -> Result<&GeofencePolygon, ValidationError> {
        let polygon = self.current.as_ref().ok_or(ValidationError::MissingGeofence)?;
        polygon.validate()?;
        Ok(polygon)
    }
}
