//! Terrain derivatives of a bathymetry layer.
//!
//! Slope in degrees from Horn's (1981) weighted 3×3 gradient:
//!
//! ```text
//!   NW  N  NE
//!   W   *  E
//!   SW  S  SE
//! ```
//!
//! `dz/dx = ((NE + 2E + SE) − (NW + 2W + SW)) / (8 · dx)`
//! `dz/dy = ((NW + 2N + NE) − (SW + 2S + SE)) / (8 · dy)`
//! `slope = atan(√(dz/dx² + dz/dy²))`
//!
//! Border cells and cells with a missing neighbour are missing (NaN).

use crate::error::{Error, Result};
use crate::raster::{GridSpec, RasterLayer};

/// Metres per degree of latitude.
const M_PER_DEG: f64 = 111_320.0;

/// Ground cell size (dx, dy) in metres. Geographic grids use the latitude of
/// the grid centre to scale longitude.
pub fn cell_size_m(grid: &GridSpec) -> (f64, f64) {
    let (w, h) = grid.transform.cell_size();
    if !grid.crs.is_geographic() {
        return (w, h);
    }
    let (_, mid_lat) = grid.cell_center(grid.height / 2, grid.width / 2);
    (w * M_PER_DEG * mid_lat.to_radians().cos(), h * M_PER_DEG)
}

/// Horn gradient at interior cell (`r`, `c`), or `None` if any neighbour is missing.
fn horn_gradient(dem: &RasterLayer, r: usize, c: usize, dx: f64, dy: f64) -> Option<(f64, f64)> {
    let z = |dr: isize, dc: isize| -> Option<f64> {
        dem.value((r as isize + dr) as usize, (c as isize + dc) as usize)
            .map(f64::from)
    };
    let nw = z(-1, -1)?;
    let n = z(-1, 0)?;
    let ne = z(-1, 1)?;
    let w = z(0, -1)?;
    let e = z(0, 1)?;
    let sw = z(1, -1)?;
    let s = z(1, 0)?;
    let se = z(1, 1)?;

    let dz_dx = ((ne + 2.0 * e + se) - (nw + 2.0 * w + sw)) / (8.0 * dx);
    let dz_dy = ((nw + 2.0 * n + ne) - (sw + 2.0 * s + se)) / (8.0 * dy);
    Some((dz_dx, dz_dy))
}

/// Slope (degrees) of `dem`, named `name`, on the same grid.
pub fn slope(name: &str, dem: &RasterLayer) -> Result<RasterLayer> {
    let (width, height) = (dem.width(), dem.height());
    if width < 3 || height < 3 {
        return Err(Error::InsufficientData {
            what: format!("slope source `{}` (grid side)", dem.name),
            found: width.min(height),
            required: 3,
        });
    }
    let (dx, dy) = cell_size_m(&dem.grid);
    let mut out = RasterLayer::new(name, dem.grid, f32::NAN);
    for r in 1..height - 1 {
        for c in 1..width - 1 {
            if dem.value(r, c).is_none() {
                continue;
            }
            if let Some((gx, gy)) = horn_gradient(dem, r, c, dx, dy) {
                let deg = (gx * gx + gy * gy).sqrt().atan().to_degrees();
                out.set(r, c, deg as f32);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::raster::GeoTransform;
    use approx::assert_relative_eq;

    fn ramp(grid: GridSpec, gx: f64, gy: f64) -> RasterLayer {
        let mut dem = RasterLayer::new("bathymetry", grid, 0.0);
        for r in 0..grid.height {
            for c in 0..grid.width {
                let (x, y) = grid.cell_center(r, c);
                dem.set(r, c, (gx * (x - grid.transform.origin_x) + gy * (grid.transform.origin_y - y)) as f32);
            }
        }
        dem
    }

    #[test]
    fn planar_ramp_has_constant_slope() {
        let utm = Crs::from_code("EPSG:32634").unwrap();
        let grid = GridSpec::new(utm, GeoTransform::north_up(500_000.0, 6_100_000.0, 100.0, 100.0), 6, 5);
        let s = slope("slope", &ramp(grid, 0.03, 0.04)).unwrap();
        let expected = 0.05f64.atan().to_degrees();
        for r in 0..5 {
            for c in 0..6 {
                let v = s.get(r, c);
                if r == 0 || c == 0 || r == 4 || c == 5 {
                    assert!(v.is_nan());
                } else {
                    assert_relative_eq!(v as f64, expected, epsilon = 1e-3);
                }
            }
        }
    }

    #[test]
    fn missing_neighbour_propagates() {
        let utm = Crs::from_code("EPSG:32634").unwrap();
        let grid = GridSpec::new(utm, GeoTransform::north_up(0.0, 500.0, 100.0, 100.0), 5, 5);
        let mut dem = ramp(grid, 0.1, 0.0);
        dem.set(2, 2, f32::NAN);
        let s = slope("slope", &dem).unwrap();
        assert!(s.value(1, 1).is_none());
        assert!(s.value(2, 2).is_none());
        assert_eq!(s.valid_count(), 0);
    }

    #[test]
    fn geographic_cells_shrink_with_latitude() {
        let grid = GridSpec::new(Crs::WGS84, GeoTransform::north_up(20.0, 60.5, 0.01, 0.01), 10, 100);
        let (dx, dy) = cell_size_m(&grid);
        assert_relative_eq!(dy, 1113.2, epsilon = 1e-6);
        assert_relative_eq!(dx, 1113.2 * 60.0f64.to_radians().cos(), epsilon = 1.0);
    }

    #[test]
    fn too_small_grid_is_rejected() {
        let grid = GridSpec::new(Crs::WGS84, GeoTransform::north_up(0.0, 1.0, 0.5, 0.5), 2, 2);
        let dem = RasterLayer::new("bathymetry", grid, -10.0);
        assert!(matches!(slope("slope", &dem), Err(Error::InsufficientData { .. })));
    }
}
