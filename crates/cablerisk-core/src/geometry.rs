//! Vector geometry in a known CRS, and point-membership domains built from it.

use geo::{
    coord, Area, BoundingRect, Contains, CoordsIter, EuclideanDistance, Geometry, MapCoords,
    MultiPolygon, Point, Polygon, Rect,
};
use serde::{Deserialize, Serialize};

use crate::crs::Crs;
use crate::error::{Error, Result};

/// One or more features sharing a CRS (a cable route, a corridor polygon, an AOI).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorGeometry {
    pub name: String,
    pub crs: Crs,
    pub features: Vec<Geometry<f64>>,
}

impl VectorGeometry {
    pub fn new(name: impl Into<String>, crs: Crs, features: Vec<Geometry<f64>>) -> Self {
        Self { name: name.into(), crs, features }
    }

    pub fn is_empty(&self) -> bool {
        self.features.iter().all(|g| g.coords_count() == 0)
    }

    fn ensure_non_empty(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::EmptyGeometry { name: self.name.clone() });
        }
        Ok(())
    }

    /// Copy of this geometry expressed in `target`.
    pub fn reproject(&self, target: Crs) -> Result<VectorGeometry> {
        self.ensure_non_empty()?;
        if self.crs.same_projection(&target) {
            return Ok(VectorGeometry { crs: target, ..self.clone() });
        }
        let transform = self.crs.to(target)?;
        let transform = &transform;
        let features = self
            .features
            .iter()
            .map(|g| {
                g.try_map_coords(|c| {
                    let (x, y) = transform.apply(c.x, c.y)?;
                    Ok::<_, Error>(coord! { x: x, y: y })
                })
            })
            .collect::<Result<Vec<Geometry<f64>>>>()
            .map_err(|e| Error::InvalidGeometry {
                name: self.name.clone(),
                reason: format!("coordinates not representable in {target}: {e}"),
            })?;
        Ok(VectorGeometry { name: self.name.clone(), crs: target, features })
    }

    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.features
            .iter()
            .filter_map(|g| g.bounding_rect())
            .reduce(union_rect)
    }

    /// Euclidean distance from (x, y) to the nearest feature, in CRS units.
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        let p = Point::new(x, y);
        self.features
            .iter()
            .map(|g| point_distance(&p, g))
            .fold(f64::INFINITY, f64::min)
    }

    /// All polygonal features, for use as an area domain.
    pub fn polygons(&self) -> Result<MultiPolygon<f64>> {
        self.ensure_non_empty()?;
        let mut polys: Vec<Polygon<f64>> = Vec::new();
        for g in &self.features {
            match g {
                Geometry::Polygon(p) => polys.push(p.clone()),
                Geometry::MultiPolygon(mp) => polys.extend(mp.0.iter().cloned()),
                Geometry::Rect(r) => polys.push(r.to_polygon()),
                Geometry::Triangle(t) => polys.push(t.to_polygon()),
                other => {
                    return Err(Error::InvalidGeometry {
                        name: self.name.clone(),
                        reason: format!("expected polygons, found {}", geometry_kind(other)),
                    })
                }
            }
        }
        Ok(MultiPolygon(polys))
    }
}

fn point_distance(p: &Point<f64>, g: &Geometry<f64>) -> f64 {
    match g {
        Geometry::Point(q) => p.euclidean_distance(q),
        Geometry::Line(l) => p.euclidean_distance(l),
        Geometry::LineString(ls) => p.euclidean_distance(ls),
        Geometry::MultiLineString(mls) => p.euclidean_distance(mls),
        Geometry::Polygon(poly) => p.euclidean_distance(poly),
        Geometry::MultiPolygon(mp) => p.euclidean_distance(mp),
        Geometry::MultiPoint(mp) => p.euclidean_distance(mp),
        Geometry::Rect(r) => p.euclidean_distance(&r.to_polygon()),
        Geometry::Triangle(t) => p.euclidean_distance(&t.to_polygon()),
        Geometry::GeometryCollection(gc) => gc
            .iter()
            .map(|g| point_distance(p, g))
            .fold(f64::INFINITY, f64::min),
    }
}

fn geometry_kind(g: &Geometry<f64>) -> &'static str {
    match g {
        Geometry::Point(_) => "point",
        Geometry::Line(_) => "line",
        Geometry::LineString(_) => "linestring",
        Geometry::Polygon(_) => "polygon",
        Geometry::MultiPoint(_) => "multipoint",
        Geometry::MultiLineString(_) => "multilinestring",
        Geometry::MultiPolygon(_) => "multipolygon",
        Geometry::GeometryCollection(_) => "geometry collection",
        Geometry::Rect(_) => "rect",
        Geometry::Triangle(_) => "triangle",
    }
}

pub(crate) fn union_rect(a: Rect<f64>, b: Rect<f64>) -> Rect<f64> {
    Rect::new(
        coord! { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
        coord! { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
    )
}

pub(crate) fn intersect_rect(a: Rect<f64>, b: Rect<f64>) -> Option<Rect<f64>> {
    let min_x = a.min().x.max(b.min().x);
    let min_y = a.min().y.max(b.min().y);
    let max_x = a.max().x.min(b.max().x);
    let max_y = a.max().y.min(b.max().y);
    (min_x <= max_x && min_y <= max_y)
        .then(|| Rect::new(coord! { x: min_x, y: min_y }, coord! { x: max_x, y: max_y }))
}

fn expand_rect(r: Rect<f64>, by: f64) -> Rect<f64> {
    Rect::new(
        coord! { x: r.min().x - by, y: r.min().y - by },
        coord! { x: r.max().x + by, y: r.max().y + by },
    )
}

// ── Domains ───────────────────────────────────────────────────────────────────

/// A point-membership region in one CRS.
///
/// Buffers and rings are evaluated exactly from point-to-geometry distance,
/// so no polygonal approximation of the buffer outline is involved.
#[derive(Debug, Clone)]
pub enum Domain {
    /// Union of polygons (a supplied corridor or a sea-basin AOI).
    Polygons { name: String, polygons: MultiPolygon<f64> },
    /// Every point within `radius` of the geometry.
    Buffer { around: VectorGeometry, radius: f64 },
    /// Every point whose distance to the geometry lies in `[inner, outer]`,
    /// optionally intersected with another domain.
    Ring {
        around: VectorGeometry,
        inner: f64,
        outer: f64,
        clip: Option<Box<Domain>>,
    },
}

impl Domain {
    pub fn polygons(geometry: &VectorGeometry) -> Result<Domain> {
        let polygons = geometry.polygons()?;
        if !(polygons.unsigned_area() > 0.0) {
            return Err(Error::InvalidGeometry {
                name: geometry.name.clone(),
                reason: "polygon has zero area".into(),
            });
        }
        Ok(Domain::Polygons { name: geometry.name.clone(), polygons })
    }

    pub fn buffer(around: &VectorGeometry, radius: f64) -> Result<Domain> {
        around.ensure_non_empty()?;
        if !(radius > 0.0 && radius.is_finite()) {
            return Err(Error::InvalidGeometry {
                name: around.name.clone(),
                reason: format!("buffer radius {radius} must be positive"),
            });
        }
        Ok(Domain::Buffer { around: around.clone(), radius })
    }

    pub fn ring(around: &VectorGeometry, inner: f64, outer: f64, clip: Option<Domain>) -> Result<Domain> {
        around.ensure_non_empty()?;
        if !(inner >= 0.0 && outer > inner && outer.is_finite()) {
            return Err(Error::InvalidGeometry {
                name: around.name.clone(),
                reason: format!("ring radii [{inner}, {outer}] enclose no area"),
            });
        }
        Ok(Domain::Ring {
            around: around.clone(),
            inner,
            outer,
            clip: clip.map(Box::new),
        })
    }

    pub fn name(&self) -> String {
        match self {
            Domain::Polygons { name, .. } => name.clone(),
            Domain::Buffer { around, radius } => format!("{} buffer {radius} m", around.name),
            Domain::Ring { around, inner, outer, .. } => {
                format!("{} ring [{inner}, {outer}] m", around.name)
            }
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        match self {
            Domain::Polygons { polygons, .. } => polygons.contains(&Point::new(x, y)),
            Domain::Buffer { around, radius } => around.distance_to(x, y) <= *radius,
            Domain::Ring { around, inner, outer, clip } => {
                if let Some(clip) = clip {
                    if !clip.contains(x, y) {
                        return false;
                    }
                }
                let d = around.distance_to(x, y);
                d >= *inner && d <= *outer
            }
        }
    }

    /// Bounding rectangle of the domain, or `None` when it is provably empty.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        match self {
            Domain::Polygons { polygons, .. } => polygons.bounding_rect(),
            Domain::Buffer { around, radius } => around.bounds().map(|r| expand_rect(r, *radius)),
            Domain::Ring { around, outer, clip, .. } => {
                let ring = around.bounds().map(|r| expand_rect(r, *outer))?;
                match clip {
                    Some(clip) => intersect_rect(ring, clip.bounds()?),
                    None => Some(ring),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, polygon};

    fn utm() -> Crs {
        Crs::from_code("EPSG:32634").unwrap()
    }

    fn cable() -> VectorGeometry {
        let ls = line_string![(x: 0.0, y: 0.0), (x: 0.0, y: 1000.0)];
        VectorGeometry::new("cable", utm(), vec![Geometry::LineString(ls)])
    }

    #[test]
    fn distance_to_linestring() {
        let c = cable();
        assert_eq!(c.distance_to(300.0, 500.0), 300.0);
        assert_eq!(c.distance_to(0.0, 1400.0), 400.0);
    }

    #[test]
    fn ring_membership_respects_radii_and_clip() {
        let c = cable();
        let ring = Domain::ring(&c, 500.0, 1500.0, None).unwrap();
        assert!(!ring.contains(100.0, 500.0));
        assert!(ring.contains(800.0, 500.0));
        assert!(ring.contains(-1500.0, 500.0));
        assert!(!ring.contains(1600.0, 500.0));

        let clip = VectorGeometry::new(
            "corridor",
            utm(),
            vec![Geometry::Polygon(polygon![
                (x: 0.0, y: 0.0), (x: 2000.0, y: 0.0), (x: 2000.0, y: 1000.0), (x: 0.0, y: 1000.0)
            ])],
        );
        let clipped = Domain::ring(&c, 500.0, 1500.0, Some(Domain::polygons(&clip).unwrap())).unwrap();
        assert!(clipped.contains(800.0, 500.0));
        assert!(!clipped.contains(-800.0, 500.0));
        let b = clipped.bounds().unwrap();
        assert_eq!((b.min().x, b.max().x), (0.0, 1500.0));
    }

    #[test]
    fn degenerate_domains_are_rejected() {
        let c = cable();
        assert!(matches!(Domain::buffer(&c, 0.0), Err(Error::InvalidGeometry { .. })));
        assert!(matches!(Domain::ring(&c, 500.0, 500.0, None), Err(Error::InvalidGeometry { .. })));
        let empty = VectorGeometry::new("cable", utm(), vec![]);
        assert!(matches!(Domain::buffer(&empty, 10.0), Err(Error::EmptyGeometry { .. })));
        assert!(matches!(c.polygons(), Err(Error::InvalidGeometry { .. })));
    }

    #[test]
    fn collinear_polygon_has_no_area() {
        // Non-degenerate bounding box, zero enclosed area.
        let sliver = VectorGeometry::new(
            "corridor",
            utm(),
            vec![Geometry::Polygon(polygon![
                (x: 0.0, y: 0.0), (x: 1000.0, y: 1000.0), (x: 2000.0, y: 2000.0)
            ])],
        );
        let err = Domain::polygons(&sliver).unwrap_err();
        assert!(matches!(err, Error::InvalidGeometry { ref name, .. } if name == "corridor"));
    }

    #[test]
    fn reproject_roundtrip_preserves_coordinates() {
        let c = cable();
        let shifted = VectorGeometry::new(
            "cable",
            utm(),
            c.features
                .iter()
                .map(|g| g.map_coords(|p| coord! { x: p.x + 500_000.0, y: p.y + 6_100_000.0 }))
                .collect(),
        );
        let geo = shifted.reproject(Crs::WGS84).unwrap();
        let back = geo.reproject(utm()).unwrap();
        let a: Vec<_> = shifted.features[0].coords_iter().collect();
        let b: Vec<_> = back.features[0].coords_iter().collect();
        for (p, q) in a.iter().zip(b.iter()) {
            assert!((p.x - q.x).abs() < 1e-3 && (p.y - q.y).abs() < 1e-3);
        }
    }

    #[test]
    fn buffer_bounds_expand_geometry() {
        let d = Domain::buffer(&cable(), 5500.0).unwrap();
        let b = d.bounds().unwrap();
        assert_eq!((b.min().x, b.min().y, b.max().x, b.max().y), (-5500.0, -5500.0, 5500.0, 6500.0));
    }
}
