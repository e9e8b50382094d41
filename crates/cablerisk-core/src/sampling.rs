//! Presence and background point sets.
//!
//! Presence points are the incident records reprojected into the working
//! CRS. Background points are drawn uniformly inside a [`Domain`] by
//! rejection sampling over its bounding rectangle. Every draw comes from a
//! caller-owned `StdRng`, so the same seed and domain give the same points.

use log::{debug, info};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::crs::Crs;
use crate::error::{Error, Result};
use crate::geometry::Domain;

/// Rejection budget: total draws allowed per requested point.
pub const MAX_DRAWS_PER_POINT: usize = 1000;

/// Largest background sample accepted; bounds the up-front allocation.
pub const MAX_BACKGROUND_COUNT: usize = 5_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointLabel {
    Presence,
    Background,
}

impl PointLabel {
    /// Response value in the training table.
    pub fn response(self) -> u8 {
        match self {
            PointLabel::Presence => 1,
            PointLabel::Background => 0,
        }
    }
}

/// One recorded anchor-drag incident, in geographic degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub lon: f64,
    pub lat: f64,
}

/// Ordered labelled coordinates in one CRS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSet {
    pub name: String,
    pub crs: Crs,
    pub label: PointLabel,
    pub points: Vec<[f64; 2]>,
}

impl PointSet {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Reproject incidents into `crs`, keeping their count and order.
pub fn presence_points(name: &str, incidents: &[Incident], crs: Crs) -> Result<PointSet> {
    let from_wgs84 = Crs::WGS84.to(crs)?;
    let mut points = Vec::with_capacity(incidents.len());
    for (i, inc) in incidents.iter().enumerate() {
        let (x, y) = from_wgs84.apply(inc.lon, inc.lat).map_err(|_| Error::Input {
            id: name.to_string(),
            reason: format!("incident {i} at ({}, {}) not representable in {crs}", inc.lon, inc.lat),
        })?;
        points.push([x, y]);
    }
    info!("presence `{name}`: {} points in {crs}", points.len());
    Ok(PointSet {
        name: name.to_string(),
        crs,
        label: PointLabel::Presence,
        points,
    })
}

/// Draw `count` points uniformly inside `domain` (coordinates in `crs`).
///
/// Fails with [`Error::DegenerateDomain`] when the domain has no area or the
/// rejection budget of `MAX_DRAWS_PER_POINT × count` draws runs out, and
/// when `count` exceeds [`MAX_BACKGROUND_COUNT`].
pub fn background_points(
    name: &str,
    domain: &Domain,
    count: usize,
    crs: Crs,
    rng: &mut StdRng,
) -> Result<PointSet> {
    let degenerate = |reason: String| Error::DegenerateDomain {
        domain: domain.name(),
        requested: count,
        reason,
    };
    if count > MAX_BACKGROUND_COUNT {
        return Err(degenerate(format!("more than {MAX_BACKGROUND_COUNT} points requested")));
    }
    let bounds = domain
        .bounds()
        .ok_or_else(|| degenerate("bounding box is empty".into()))?;
    let (min, max) = (bounds.min(), bounds.max());
    if !(max.x > min.x && max.y > min.y) {
        return Err(degenerate("bounding box has zero area".into()));
    }

    let budget = count.saturating_mul(MAX_DRAWS_PER_POINT);
    let mut points = Vec::with_capacity(count);
    let mut draws = 0usize;
    while points.len() < count {
        if draws >= budget {
            return Err(degenerate(format!(
                "accepted {} of {count} after {draws} draws",
                points.len()
            )));
        }
        draws += 1;
        let x = rng.gen_range(min.x..max.x);
        let y = rng.gen_range(min.y..max.y);
        if domain.contains(x, y) {
            points.push([x, y]);
        }
    }
    debug!(
        "background `{name}`: acceptance {:.3} ({count}/{draws})",
        count as f64 / draws.max(1) as f64
    );
    info!("background `{name}`: {count} points inside `{}`", domain.name());
    Ok(PointSet {
        name: name.to_string(),
        crs,
        label: PointLabel::Background,
        points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::VectorGeometry;
    use geo::{line_string, polygon, Geometry};
    use rand::SeedableRng;

    fn utm() -> Crs {
        Crs::from_code("EPSG:32634").unwrap()
    }

    fn cable() -> VectorGeometry {
        VectorGeometry::new(
            "cable",
            utm(),
            vec![Geometry::LineString(line_string![
                (x: 500_000.0, y: 6_095_000.0), (x: 500_000.0, y: 6_105_000.0)
            ])],
        )
    }

    #[test]
    fn same_seed_same_points() {
        let ring = Domain::ring(&cable(), 500.0, 1500.0, None).unwrap();
        let a = background_points("bg", &ring, 300, utm(), &mut StdRng::seed_from_u64(7)).unwrap();
        let b = background_points("bg", &ring, 300, utm(), &mut StdRng::seed_from_u64(7)).unwrap();
        let c = background_points("bg", &ring, 300, utm(), &mut StdRng::seed_from_u64(8)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.points, c.points);
        assert_eq!(a.len(), 300);
        assert_eq!(a.label, PointLabel::Background);
    }

    #[test]
    fn ring_points_lie_between_radii() {
        let c = cable();
        let ring = Domain::ring(&c, 500.0, 1500.0, None).unwrap();
        let set = background_points("bg", &ring, 500, utm(), &mut StdRng::seed_from_u64(1)).unwrap();
        for p in &set.points {
            let d = c.distance_to(p[0], p[1]);
            assert!((500.0..=1500.0).contains(&d), "distance {d}");
        }
    }

    #[test]
    fn area_points_lie_inside_polygon() {
        let aoi = VectorGeometry::new(
            "aoi",
            utm(),
            vec![Geometry::Polygon(polygon![
                (x: 0.0, y: 0.0), (x: 1000.0, y: 0.0), (x: 0.0, y: 1000.0)
            ])],
        );
        let domain = Domain::polygons(&aoi).unwrap();
        let set = background_points("bg", &domain, 200, utm(), &mut StdRng::seed_from_u64(3)).unwrap();
        assert!(set.points.iter().all(|p| p[0] + p[1] <= 1000.0));
    }

    #[test]
    fn clipped_ring_outside_clip_is_degenerate() {
        let far = VectorGeometry::new(
            "corridor",
            utm(),
            vec![Geometry::Polygon(polygon![
                (x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)
            ])],
        );
        let ring = Domain::ring(&cable(), 500.0, 1500.0, Some(Domain::polygons(&far).unwrap())).unwrap();
        let err = background_points("bg", &ring, 10, utm(), &mut StdRng::seed_from_u64(1)).unwrap_err();
        assert!(matches!(err, Error::DegenerateDomain { requested: 10, .. }));
    }

    #[test]
    fn oversized_request_fails_before_allocating() {
        let domain = Domain::buffer(&cable(), 1000.0).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let err = background_points("bg", &domain, usize::MAX, utm(), &mut rng).unwrap_err();
        assert!(matches!(err, Error::DegenerateDomain { requested: usize::MAX, .. }));
        let err = background_points("bg", &domain, MAX_BACKGROUND_COUNT + 1, utm(), &mut rng).unwrap_err();
        assert!(matches!(err, Error::DegenerateDomain { .. }));
    }

    #[test]
    fn presence_keeps_count_and_order() {
        let u = utm();
        let incidents: Vec<Incident> = [(500_100.0, 6_100_000.0), (499_900.0, 6_101_000.0)]
            .iter()
            .map(|&(x, y)| {
                let (lon, lat) = u.to_lonlat(x, y).unwrap();
                Incident { lon, lat }
            })
            .collect();
        let set = presence_points("incidents", &incidents, u).unwrap();
        assert_eq!(set.len(), 2);
        assert!((set.points[0][0] - 500_100.0).abs() < 1e-3);
        assert!((set.points[1][1] - 6_101_000.0).abs() < 1e-3);
        assert_eq!(set.label.response(), 1);
    }
}
