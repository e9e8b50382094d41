//! Distance-to-cable field.
//!
//! The geometry is rasterised onto the grid (every cell a segment passes
//! through, every cell holding a vertex point, every cell whose centre lies
//! inside a polygon) and an exact Euclidean distance transform is run over
//! the result. Distances are measured between cell centres in grid units,
//! with separate column and row spacing.
//!
//! Transform: Felzenszwalb & Huttenlocher (2012), separable lower envelope of
//! parabolas, rows first then columns.

use geo::{Contains, Geometry, Line, Point, Polygon};
use log::debug;

use crate::error::{Error, Result};
use crate::geometry::VectorGeometry;
use crate::raster::{GridSpec, RasterLayer};

/// Stand-in for +∞ in the squared-distance transform. Finite so the
/// parabola intersections never evaluate ∞ − ∞.
const FAR: f64 = 1e20;

/// Mark every grid cell touched by `geometry`. The geometry is reprojected
/// into the grid CRS first when needed.
pub fn rasterize(geometry: &VectorGeometry, grid: &GridSpec) -> Result<Vec<bool>> {
    let geometry = geometry.reproject(grid.crs)?;
    let inv = grid.transform.invert().ok_or_else(|| Error::SingularTransform {
        name: geometry.name.clone(),
    })?;

    let mut parts = Parts::default();
    for feature in &geometry.features {
        parts.collect(feature);
    }

    let mut cells = vec![false; grid.len()];
    let mut mark = |col: i64, row: i64| {
        if col >= 0 && row >= 0 && (col as usize) < grid.width && (row as usize) < grid.height {
            cells[row as usize * grid.width + col as usize] = true;
        }
    };
    let (w, h) = (grid.width as f64, grid.height as f64);
    for line in &parts.segments {
        let a = inv.apply(line.start.x, line.start.y);
        let b = inv.apply(line.end.x, line.end.y);
        if let Some((a, b)) = clip_segment(a, b, w, h) {
            trace_segment(a, b, &mut mark);
        }
    }
    for p in &parts.points {
        let (px, py) = inv.apply(p.x(), p.y());
        mark(px.floor() as i64, py.floor() as i64);
    }

    for poly in &parts.polygons {
        for row in 0..grid.height {
            for col in 0..grid.width {
                let (x, y) = grid.cell_center(row, col);
                if poly.contains(&Point::new(x, y)) {
                    cells[row * grid.width + col] = true;
                }
            }
        }
    }
    Ok(cells)
}

/// Segments (polygon rings included), points, and polygons for interior fill.
#[derive(Default)]
struct Parts {
    segments: Vec<Line<f64>>,
    points: Vec<Point<f64>>,
    polygons: Vec<Polygon<f64>>,
}

impl Parts {
    fn collect(&mut self, g: &Geometry<f64>) {
        match g {
            Geometry::Point(p) => self.points.push(*p),
            Geometry::MultiPoint(mp) => self.points.extend(mp.iter().copied()),
            Geometry::Line(l) => self.segments.push(*l),
            Geometry::LineString(ls) => self.segments.extend(ls.lines()),
            Geometry::MultiLineString(mls) => {
                self.segments.extend(mls.iter().flat_map(|ls| ls.lines()))
            }
            Geometry::Polygon(poly) => self.polygon(poly.clone()),
            Geometry::MultiPolygon(mp) => mp.iter().for_each(|p| self.polygon(p.clone())),
            Geometry::Rect(r) => self.polygon(r.to_polygon()),
            Geometry::Triangle(t) => self.polygon(t.to_polygon()),
            Geometry::GeometryCollection(gc) => gc.iter().for_each(|g| self.collect(g)),
        }
    }

    fn polygon(&mut self, poly: Polygon<f64>) {
        self.segments.extend(poly.exterior().lines());
        self.segments.extend(poly.interiors().iter().flat_map(|r| r.lines()));
        self.polygons.push(poly);
    }
}

/// Clip a pixel-space segment to `[0, w] × [0, h]` (Liang–Barsky), so the
/// cell walk is bounded by the grid rather than the segment length.
fn clip_segment(a: (f64, f64), b: (f64, f64), w: f64, h: f64) -> Option<((f64, f64), (f64, f64))> {
    if ![a.0, a.1, b.0, b.1].iter().all(|v| v.is_finite()) {
        return None;
    }
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for (p, q) in [(-dx, a.0), (dx, w - a.0), (-dy, a.1), (dy, h - a.1)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return None;
                }
                t0 = t0.max(r);
            } else {
                if r < t0 {
                    return None;
                }
                t1 = t1.min(r);
            }
        }
    }
    Some(((a.0 + t0 * dx, a.1 + t0 * dy), (a.0 + t1 * dx, a.1 + t1 * dy)))
}

/// Visit every cell a segment passes through (Amanatides–Woo traversal),
/// in fractional pixel coordinates.
fn trace_segment(a: (f64, f64), b: (f64, f64), mark: &mut impl FnMut(i64, i64)) {
    let (mut cx, mut cy) = (a.0.floor() as i64, a.1.floor() as i64);
    mark(cx, cy);

    let dx = b.0 - a.0;
    let dy = b.1 - a.1;
    let step_x: i64 = if dx > 0.0 { 1 } else { -1 };
    let step_y: i64 = if dy > 0.0 { 1 } else { -1 };
    let t_delta_x = if dx != 0.0 { 1.0 / dx.abs() } else { f64::INFINITY };
    let t_delta_y = if dy != 0.0 { 1.0 / dy.abs() } else { f64::INFINITY };
    let mut t_max_x = if dx > 0.0 {
        (cx as f64 + 1.0 - a.0) / dx
    } else if dx < 0.0 {
        (a.0 - cx as f64) / -dx
    } else {
        f64::INFINITY
    };
    let mut t_max_y = if dy > 0.0 {
        (cy as f64 + 1.0 - a.1) / dy
    } else if dy < 0.0 {
        (a.1 - cy as f64) / -dy
    } else {
        f64::INFINITY
    };

    loop {
        if t_max_x.min(t_max_y) > 1.0 {
            break;
        }
        if t_max_x < t_max_y {
            cx += step_x;
            t_max_x += t_delta_x;
        } else {
            cy += step_y;
            t_max_y += t_delta_y;
        }
        mark(cx, cy);
    }
}

/// Exact Euclidean distance from every cell to the nearest source cell.
///
/// `dx`/`dy` are the column and row spacing. Returns `None` when there is no
/// source cell at all.
pub fn euclidean_distance_transform(
    sources: &[bool],
    width: usize,
    height: usize,
    dx: f64,
    dy: f64,
) -> Option<Vec<f64>> {
    if !sources.iter().any(|&s| s) {
        return None;
    }
    let mut sq: Vec<f64> = sources.iter().map(|&s| if s { 0.0 } else { FAR }).collect();

    let n = width.max(height);
    let mut f = vec![0.0; n];
    let mut d = vec![0.0; n];
    let mut v = vec![0usize; n];
    let mut z = vec![0.0; n + 1];

    // Rows.
    for r in 0..height {
        let line = &mut sq[r * width..(r + 1) * width];
        f[..width].copy_from_slice(line);
        lower_envelope(&f[..width], dx, &mut d[..width], &mut v, &mut z);
        line.copy_from_slice(&d[..width]);
    }
    // Columns.
    for c in 0..width {
        for r in 0..height {
            f[r] = sq[r * width + c];
        }
        lower_envelope(&f[..height], dy, &mut d[..height], &mut v, &mut z);
        for r in 0..height {
            sq[r * width + c] = d[r];
        }
    }
    Some(sq.into_iter().map(f64::sqrt).collect())
}

/// One-dimensional squared distance transform of sampled function `f`
/// with sample spacing `spacing`.
fn lower_envelope(f: &[f64], spacing: f64, d: &mut [f64], v: &mut [usize], z: &mut [f64]) {
    let n = f.len();
    if n == 0 {
        return;
    }
    let s2 = spacing * spacing;
    let intersect = |q: usize, p: usize| -> f64 {
        let (qf, pf) = (q as f64, p as f64);
        ((f[q] + s2 * qf * qf) - (f[p] + s2 * pf * pf)) / (2.0 * s2 * (qf - pf))
    };

    let mut k = 0usize;
    v[0] = 0;
    z[0] = f64::NEG_INFINITY;
    z[1] = f64::INFINITY;
    for q in 1..n {
        let mut s = intersect(q, v[k]);
        while s <= z[k] {
            k -= 1;
            s = intersect(q, v[k]);
        }
        k += 1;
        v[k] = q;
        z[k] = s;
        z[k + 1] = f64::INFINITY;
    }

    k = 0;
    for (q, out) in d.iter_mut().enumerate() {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let off = spacing * (q as f64 - v[k] as f64);
        *out = off * off + f[v[k]];
    }
}

/// Rebuild a distance layer named `name` from `geometry` on `grid`.
pub fn distance_field(name: &str, geometry: &VectorGeometry, grid: &GridSpec) -> Result<RasterLayer> {
    let sources = rasterize(geometry, grid)?;
    let (dx, dy) = grid.transform.cell_size();
    let dist = euclidean_distance_transform(&sources, grid.width, grid.height, dx, dy).ok_or_else(|| {
        Error::InvalidGeometry {
            name: geometry.name.clone(),
            reason: "geometry does not touch the reference grid".into(),
        }
    })?;
    debug!(
        "distance field `{name}` from `{}`: {} source cells",
        geometry.name,
        sources.iter().filter(|&&s| s).count()
    );
    RasterLayer::from_data(name, *grid, dist.into_iter().map(|d| d as f32).collect(), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::raster::GeoTransform;
    use geo::line_string;

    fn grid(w: usize, h: usize, cell: f64) -> GridSpec {
        GridSpec::new(
            Crs::from_code("EPSG:32634").unwrap(),
            GeoTransform::north_up(0.0, h as f64 * cell, cell, cell),
            w,
            h,
        )
    }

    fn brute_force(sources: &[bool], w: usize, h: usize, dx: f64, dy: f64) -> Vec<f64> {
        let pts: Vec<(usize, usize)> = (0..w * h).filter(|&i| sources[i]).map(|i| (i % w, i / w)).collect();
        (0..w * h)
            .map(|i| {
                let (c, r) = (i % w, i / w);
                pts.iter()
                    .map(|&(sc, sr)| {
                        let ex = (c as f64 - sc as f64) * dx;
                        let ey = (r as f64 - sr as f64) * dy;
                        (ex * ex + ey * ey).sqrt()
                    })
                    .fold(f64::INFINITY, f64::min)
            })
            .collect()
    }

    #[test]
    fn edt_matches_brute_force_with_anisotropic_spacing() {
        let (w, h) = (17, 11);
        let mut state: u64 = 7;
        let sources: Vec<bool> = (0..w * h)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (state >> 33) % 23 == 0
            })
            .collect();
        assert!(sources.iter().any(|&s| s));
        let fast = euclidean_distance_transform(&sources, w, h, 30.0, 45.0).unwrap();
        let slow = brute_force(&sources, w, h, 30.0, 45.0);
        for (a, b) in fast.iter().zip(slow.iter()) {
            assert!((a - b).abs() < 1e-6, "{a} vs {b}");
        }
    }

    #[test]
    fn edt_is_not_chessboard() {
        let mut sources = vec![false; 25];
        sources[0] = true;
        let d = euclidean_distance_transform(&sources, 5, 5, 1.0, 1.0).unwrap();
        assert!((d[24] - 32f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn empty_sources_have_no_transform() {
        assert!(euclidean_distance_transform(&[false; 9], 3, 3, 1.0, 1.0).is_none());
    }

    #[test]
    fn vertical_cable_gives_column_distances() {
        let g = grid(10, 10, 200.0);
        let cable = VectorGeometry::new(
            "cable",
            g.crs,
            vec![Geometry::LineString(line_string![(x: 1100.0, y: 2500.0), (x: 1100.0, y: -500.0)])],
        );
        let layer = distance_field("distance", &cable, &g).unwrap();
        for r in 0..10 {
            for c in 0..10 {
                let expected = (c as f64 - 5.0).abs() * 200.0;
                assert_eq!(layer.get(r, c) as f64, expected);
            }
        }
    }

    #[test]
    fn diagonal_segment_marks_every_crossed_cell() {
        let g = grid(8, 8, 1.0);
        let cable = VectorGeometry::new(
            "cable",
            g.crs,
            vec![Geometry::LineString(line_string![(x: 0.2, y: 7.9), (x: 7.7, y: 2.3)])],
        );
        let cells = rasterize(&cable, &g).unwrap();
        // Dense sampling along the segment must only hit marked cells.
        for i in 0..=10_000 {
            let t = i as f64 / 10_000.0;
            let (x, y) = (0.2 + t * 7.5, 7.9 - t * 5.6);
            let (row, col) = g.locate(x, y).unwrap();
            assert!(cells[row * 8 + col], "cell ({row},{col}) missed");
        }
    }

    #[test]
    fn clipping_keeps_the_in_grid_cells() {
        let (w, h) = (10i64, 8i64);
        let (a, b) = ((-37.1, -17.25), (52.9, 27.75));
        let mut full = Vec::new();
        trace_segment(a, b, &mut |c, r| {
            if (0..w).contains(&c) && (0..h).contains(&r) {
                full.push((c, r));
            }
        });
        let (ca, cb) = clip_segment(a, b, w as f64, h as f64).unwrap();
        assert!(ca.0.abs() < 1e-9 && (cb.0 - 10.0).abs() < 1e-9);
        let mut clipped = Vec::new();
        trace_segment(ca, cb, &mut |c, r| {
            if (0..w).contains(&c) && (0..h).contains(&r) {
                clipped.push((c, r));
            }
        });
        assert!(!full.is_empty());
        assert_eq!(full, clipped);
        assert!(clip_segment((-5.0, 20.0), (50.0, 20.0), 10.0, 8.0).is_none());
        assert!(clip_segment((f64::NAN, 1.0), (5.0, 1.0), 10.0, 8.0).is_none());
    }

    #[test]
    fn very_long_cable_rasterizes_only_its_grid_crossing() {
        let g = grid(10, 8, 1.0);
        let cable = VectorGeometry::new(
            "cable",
            g.crs,
            vec![Geometry::LineString(line_string![(x: -1e12, y: 4.5), (x: 1e12, y: 4.5)])],
        );
        let cells = rasterize(&cable, &g).unwrap();
        for r in 0..8 {
            for c in 0..10 {
                assert_eq!(cells[r * 10 + c], r == 3, "cell ({r},{c})");
            }
        }
    }

    #[test]
    fn cable_outside_grid_is_geometry_error() {
        let g = grid(5, 5, 100.0);
        let cable = VectorGeometry::new(
            "cable",
            g.crs,
            vec![Geometry::LineString(line_string![(x: 9_000.0, y: 0.0), (x: 9_000.0, y: 500.0)])],
        );
        assert!(matches!(distance_field("distance", &cable, &g), Err(Error::InvalidGeometry { .. })));
    }
}
