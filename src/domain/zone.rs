//! Zones, zone sets and membership
//!
//! A `ZoneSet` is built once from configuration and never mutated. Containment
//! uses `geo`'s DE-9IM `Contains`, so points on an edge or vertex are NOT
//! inside the polygon.

use crate::domain::error::ZoneError;
use crate::domain::types::Point2;
use geo::{Contains, LineString, Point, Polygon};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Zone definition as it appears in configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ZoneDefinition {
    pub name: String,
    pub frame_id: String,
    /// Polygon vertices as `[x, y]` pairs, in order
    pub vertices: Vec<[f64; 2]>,
}

/// Serializable view of a zone, used in events and API responses
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneInfo {
    pub name: String,
    pub frame_id: String,
    pub vertices: Vec<Point2>,
}

/// A named polygon in a fixed coordinate frame
#[derive(Debug, Clone)]
pub struct Zone {
    name: String,
    frame_id: String,
    vertices: Vec<Point2>,
    polygon: Polygon<f64>,
}

impl Zone {
    /// Build a zone, rejecting polygons with fewer than 3 distinct vertices
    pub fn new(name: &str, frame_id: &str, vertices: &[[f64; 2]]) -> Result<Self, ZoneError> {
        let mut points: Vec<Point2> = vertices.iter().map(|&v| Point2::from(v)).collect();

        // An explicitly closed ring repeats the first vertex at the end
        if points.len() > 1 && points.first() == points.last() {
            points.pop();
        }

        if points.len() < 3 {
            return Err(ZoneError::InvalidPolygon { zone: name.to_string(), vertices: points.len() });
        }

        let ring: LineString<f64> = points.iter().map(|p| (p.x, p.y)).collect::<Vec<_>>().into();
        let polygon = Polygon::new(ring, vec![]);

        Ok(Self { name: name.to_string(), frame_id: frame_id.to_string(), vertices: points, polygon })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }

    pub fn vertices(&self) -> &[Point2] {
        &self.vertices
    }

    /// Strict interior containment; boundary points are outside
    pub fn contains(&self, point: Point2) -> bool {
        self.polygon.contains(&Point::new(point.x, point.y))
    }

    pub fn info(&self) -> ZoneInfo {
        ZoneInfo {
            name: self.name.clone(),
            frame_id: self.frame_id.clone(),
            vertices: self.vertices.clone(),
        }
    }
}

/// Reference to a zone, either unresolved by name or already resolved
#[derive(Debug, Clone)]
pub enum ZoneRef {
    ByName(String),
    Resolved(Arc<Zone>),
}

impl ZoneRef {
    pub fn name(&self) -> &str {
        match self {
            ZoneRef::ByName(name) => name,
            ZoneRef::Resolved(zone) => zone.name(),
        }
    }
}

impl From<&str> for ZoneRef {
    fn from(name: &str) -> Self {
        ZoneRef::ByName(name.to_string())
    }
}

impl From<Arc<Zone>> for ZoneRef {
    fn from(zone: Arc<Zone>) -> Self {
        ZoneRef::Resolved(zone)
    }
}

/// Set of zones containing a point, keyed by zone name
///
/// Iteration is in name order for stable logs and tests; it carries no meaning.
#[derive(Debug, Clone, Default)]
pub struct Membership {
    zones: BTreeMap<String, Arc<Zone>>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, zone: Arc<Zone>) {
        self.zones.insert(zone.name().to_string(), zone);
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.zones.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Zone>> {
        self.zones.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.zones.keys().cloned().collect()
    }

    /// Zones in `self` that are not in `other`, compared by name
    pub fn difference(&self, other: &Membership) -> Vec<Arc<Zone>> {
        self.zones
            .iter()
            .filter(|(name, _)| !other.zones.contains_key(*name))
            .map(|(_, zone)| zone.clone())
            .collect()
    }
}

impl FromIterator<Arc<Zone>> for Membership {
    fn from_iter<I: IntoIterator<Item = Arc<Zone>>>(iter: I) -> Self {
        let mut membership = Membership::new();
        for zone in iter {
            membership.insert(zone);
        }
        membership
    }
}

/// Immutable collection of named zones
#[derive(Debug, Clone, Default)]
pub struct ZoneSet {
    zones: BTreeMap<String, Arc<Zone>>,
}

impl ZoneSet {
    /// Build the zone set from configuration definitions
    pub fn from_definitions(definitions: &[ZoneDefinition]) -> Result<Self, ZoneError> {
        let mut zones = BTreeMap::new();
        for def in definitions {
            let zone = Zone::new(&def.name, &def.frame_id, &def.vertices)?;
            if zones.insert(def.name.clone(), Arc::new(zone)).is_some() {
                return Err(ZoneError::DuplicateZone(def.name.clone()));
            }
        }
        Ok(Self { zones })
    }

    /// Every zone whose polygon strictly contains `point`
    pub fn in_which(&self, point: Point2) -> Membership {
        self.zones.values().filter(|zone| zone.contains(point)).cloned().collect()
    }

    pub fn get(&self, name: &str) -> Result<Arc<Zone>, ZoneError> {
        self.zones.get(name).cloned().ok_or_else(|| ZoneError::NotFound(name.to_string()))
    }

    /// Resolve a zone reference against this set
    pub fn resolve(&self, zone: &ZoneRef) -> Result<Arc<Zone>, ZoneError> {
        match zone {
            ZoneRef::ByName(name) => self.get(name),
            ZoneRef::Resolved(zone) => Ok(zone.clone()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Zone>> {
        self.zones.values()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, vertices: &[[f64; 2]]) -> ZoneDefinition {
        ZoneDefinition { name: name.to_string(), frame_id: "map".to_string(), vertices: vertices.to_vec() }
    }

    fn square(name: &str, x0: f64, y0: f64, side: f64) -> ZoneDefinition {
        def(name, &[[x0, y0], [x0 + side, y0], [x0 + side, y0 + side], [x0, y0 + side]])
    }

    fn overlapping() -> Vec<ZoneDefinition> {
        vec![square("A", 0.0, 0.0, 10.0), square("B", 5.0, 5.0, 10.0)]
    }

    #[test]
    fn test_interior_point_single_zone() {
        let zones = ZoneSet::from_definitions(&overlapping()).unwrap();
        let membership = zones.in_which(Point2::new(2.0, 2.0));
        assert_eq!(membership.names(), vec!["A"]);
    }

    #[test]
    fn test_exterior_point_empty() {
        let zones = ZoneSet::from_definitions(&overlapping()).unwrap();
        assert!(zones.in_which(Point2::new(20.0, 20.0)).is_empty());
        assert!(zones.in_which(Point2::new(-1.0, 3.0)).is_empty());
    }

    #[test]
    fn test_overlap_independent_of_declaration_order() {
        let forward = ZoneSet::from_definitions(&overlapping()).unwrap();
        let mut reversed_defs = overlapping();
        reversed_defs.reverse();
        let reversed = ZoneSet::from_definitions(&reversed_defs).unwrap();

        let p = Point2::new(7.0, 7.0);
        let mut a = forward.in_which(p).names();
        let mut b = reversed.in_which(p).names();
        a.sort();
        b.sort();
        assert_eq!(a, vec!["A", "B"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_boundary_point_not_contained() {
        let zones = ZoneSet::from_definitions(&[square("A", 0.0, 0.0, 10.0)]).unwrap();
        // On an edge
        assert!(zones.in_which(Point2::new(10.0, 5.0)).is_empty());
        assert!(zones.in_which(Point2::new(5.0, 0.0)).is_empty());
        // On a vertex
        assert!(zones.in_which(Point2::new(0.0, 0.0)).is_empty());
        // Just inside
        assert_eq!(zones.in_which(Point2::new(9.999, 5.0)).len(), 1);
    }

    #[test]
    fn test_shared_edge_point_in_neither_zone() {
        let zones = ZoneSet::from_definitions(&[
            square("left", 0.0, 0.0, 10.0),
            square("right", 10.0, 0.0, 10.0),
        ])
        .unwrap();
        assert!(zones.in_which(Point2::new(10.0, 5.0)).is_empty());
    }

    #[test]
    fn test_concave_polygon() {
        // L-shaped zone; the notch at (7, 7) is outside
        let zones = ZoneSet::from_definitions(&[def(
            "L",
            &[[0.0, 0.0], [10.0, 0.0], [10.0, 5.0], [5.0, 5.0], [5.0, 10.0], [0.0, 10.0]],
        )])
        .unwrap();
        assert_eq!(zones.in_which(Point2::new(2.0, 8.0)).len(), 1);
        assert_eq!(zones.in_which(Point2::new(8.0, 2.0)).len(), 1);
        assert!(zones.in_which(Point2::new(7.0, 7.0)).is_empty());
    }

    #[test]
    fn test_invalid_polygon_rejected() {
        let err = ZoneSet::from_definitions(&[def("line", &[[0.0, 0.0], [1.0, 1.0]])]).unwrap_err();
        assert_eq!(err, ZoneError::InvalidPolygon { zone: "line".to_string(), vertices: 2 });
    }

    #[test]
    fn test_closing_vertex_not_counted() {
        let err =
            Zone::new("closed", "map", &[[0.0, 0.0], [1.0, 0.0], [0.0, 0.0]]).unwrap_err();
        assert_eq!(err, ZoneError::InvalidPolygon { zone: "closed".to_string(), vertices: 2 });

        let zone =
            Zone::new("tri", "map", &[[0.0, 0.0], [4.0, 0.0], [0.0, 4.0], [0.0, 0.0]]).unwrap();
        assert_eq!(zone.vertices().len(), 3);
    }

    #[test]
    fn test_duplicate_zone_rejected() {
        let err = ZoneSet::from_definitions(&[square("A", 0.0, 0.0, 1.0), square("A", 5.0, 5.0, 1.0)])
            .unwrap_err();
        assert_eq!(err, ZoneError::DuplicateZone("A".to_string()));
    }

    #[test]
    fn test_get_and_resolve() {
        let zones = ZoneSet::from_definitions(&overlapping()).unwrap();
        assert_eq!(zones.get("A").unwrap().name(), "A");
        assert_eq!(zones.get("nope").unwrap_err(), ZoneError::NotFound("nope".to_string()));

        let resolved = zones.resolve(&ZoneRef::from("B")).unwrap();
        assert_eq!(resolved.frame_id(), "map");
        let again = zones.resolve(&ZoneRef::Resolved(resolved.clone())).unwrap();
        assert!(Arc::ptr_eq(&resolved, &again));
        assert!(zones.resolve(&ZoneRef::from("C")).is_err());
    }

    #[test]
    fn test_membership_difference_by_name() {
        let zones = ZoneSet::from_definitions(&overlapping()).unwrap();
        let both = zones.in_which(Point2::new(7.0, 7.0));
        let only_b = zones.in_which(Point2::new(12.0, 12.0));

        let exited: Vec<_> = both.difference(&only_b).iter().map(|z| z.name().to_string()).collect();
        assert_eq!(exited, vec!["A"]);
        assert!(only_b.difference(&both).is_empty());
    }
}
