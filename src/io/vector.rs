//! Vector layers: polygon features with numeric properties.

use geo::{BoundingRect, Contains, MultiPolygon, Point, Polygon, Rect};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A polygon feature with numeric attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub geometry: MultiPolygon<f64>,
    #[serde(default)]
    pub properties: BTreeMap<String, f64>,
}

impl Feature {
    pub fn new(geometry: MultiPolygon<f64>) -> Self {
        Self {
            geometry,
            properties: BTreeMap::new(),
        }
    }

    pub fn from_polygon(polygon: Polygon<f64>) -> Self {
        Self::new(MultiPolygon::new(vec![polygon]))
    }

    pub fn with_property(mut self, name: &str, value: f64) -> Self {
        self.properties.insert(name.to_string(), value);
        self
    }

    pub fn property(&self, name: &str) -> Option<f64> {
        self.properties.get(name).copied().filter(|v| v.is_finite())
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        self.geometry.contains(&Point::new(x, y))
    }

    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.geometry.bounding_rect()
    }
}

/// Ordered collection of features
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorLayer {
    pub features: Vec<Feature>,
}

impl VectorLayer {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Features satisfying `keep`, order preserved
    pub fn filter<F>(&self, keep: F) -> VectorLayer
    where
        F: Fn(&Feature) -> bool,
    {
        VectorLayer {
            features: self.features.iter().filter(|f| keep(f)).cloned().collect(),
        }
    }
}
