//! Corridor masking: crop a stack to a domain's extent and null out cells
//! whose centre lies outside the domain.

use log::{info, warn};

use crate::error::Result;
use crate::geometry::Domain;
use crate::raster::{GridSpec, RasterLayer, RasterStack};

/// Per-cell membership of cell centres in `domain`, row-major.
pub fn domain_mask(grid: &GridSpec, domain: &Domain) -> Vec<bool> {
    let mut mask = Vec::with_capacity(grid.len());
    for row in 0..grid.height {
        for col in 0..grid.width {
            let (x, y) = grid.cell_center(row, col);
            mask.push(domain.contains(x, y));
        }
    }
    mask
}

/// Null out every cell where `mask` is false. The grid is unchanged.
pub fn apply_mask(layer: &RasterLayer, mask: &[bool]) -> RasterLayer {
    let fill = layer.fill_value();
    let data = layer
        .data
        .iter()
        .zip(mask)
        .map(|(&v, &inside)| if inside { v } else { fill })
        .collect();
    RasterLayer { data, ..layer.clone() }
}

/// Smallest whole-cell window of `grid` covering the domain's bounding
/// rectangle, as (col0, row0, width, height). `None` if they do not meet.
fn crop_window(grid: &GridSpec, domain: &Domain) -> Option<(usize, usize, usize, usize)> {
    let bounds = domain.bounds()?;
    let inv = grid.transform.invert()?;
    let corners = [
        inv.apply(bounds.min().x, bounds.min().y),
        inv.apply(bounds.max().x, bounds.min().y),
        inv.apply(bounds.min().x, bounds.max().y),
        inv.apply(bounds.max().x, bounds.max().y),
    ];
    let min_px = corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min);
    let max_px = corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max);
    let min_py = corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
    let max_py = corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max);

    let c0 = min_px.floor().max(0.0);
    let r0 = min_py.floor().max(0.0);
    let c1 = max_px.ceil().min(grid.width as f64);
    let r1 = max_py.ceil().min(grid.height as f64);
    if !(c1 > c0 && r1 > r0) {
        return None;
    }
    Some((c0 as usize, r0 as usize, (c1 - c0) as usize, (r1 - r0) as usize))
}

fn crop_layer(layer: &RasterLayer, window: (usize, usize, usize, usize)) -> RasterLayer {
    let (c0, r0, w, h) = window;
    let mut data = Vec::with_capacity(w * h);
    for row in r0..r0 + h {
        let start = row * layer.width() + c0;
        data.extend_from_slice(&layer.data[start..start + w]);
    }
    RasterLayer {
        name: layer.name.clone(),
        grid: layer.grid.window(c0, r0, w, h),
        data,
        nodata: layer.nodata,
    }
}

/// Crop every layer to the domain extent, then null out cells outside it.
///
/// A domain that misses the grid entirely yields all-missing layers on the
/// original grid rather than an error; downstream extraction then drops
/// every row that lands there.
pub fn mask_stack(stack: &RasterStack, domain: &Domain) -> Result<RasterStack> {
    let grid = *stack.grid();
    let Some(window) = crop_window(&grid, domain) else {
        warn!("domain `{}` does not intersect the stack grid; all cells masked", domain.name());
        return stack.map_layers(|l| Ok(apply_mask(l, &vec![false; grid.len()])));
    };

    let cropped_grid = grid.window(window.0, window.1, window.2, window.3);
    let mask = domain_mask(&cropped_grid, domain);
    let inside = mask.iter().filter(|&&m| m).count();
    info!(
        "masking to `{}`: window {}×{} at ({}, {}), {inside} cells inside",
        domain.name(),
        window.2,
        window.3,
        window.0,
        window.1
    );
    stack.map_layers(|l| Ok(apply_mask(&crop_layer(l, window), &mask)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::geometry::VectorGeometry;
    use crate::raster::GeoTransform;
    use geo::{line_string, Geometry};

    fn utm() -> Crs {
        Crs::from_code("EPSG:32634").unwrap()
    }

    fn stack(w: usize, h: usize) -> RasterStack {
        let grid = GridSpec::new(utm(), GeoTransform::north_up(0.0, h as f64 * 100.0, 100.0, 100.0), w, h);
        let mut depth = RasterLayer::new("bathymetry", grid, -30.0);
        depth.nodata = Some(-9999.0);
        let speed = RasterLayer::new("current_speed", grid, 0.4);
        RasterStack::new(vec![depth, speed]).unwrap()
    }

    fn cable_at(x: f64) -> VectorGeometry {
        VectorGeometry::new(
            "cable",
            utm(),
            vec![Geometry::LineString(line_string![(x: x, y: -10_000.0), (x: x, y: 10_000.0)])],
        )
    }

    #[test]
    fn crops_to_buffer_extent_and_nulls_outside() {
        let s = stack(20, 5);
        let domain = Domain::buffer(&cable_at(1050.0), 170.0).unwrap();
        let masked = mask_stack(&s, &domain).unwrap();
        let g = masked.grid();
        // Buffer spans x ∈ [880, 1220] → columns 8..13; the edge columns fall outside.
        assert_eq!((g.width, g.height), (5, 5));
        assert_eq!(g.transform.origin_x, 800.0);

        let depth = masked.get("bathymetry").unwrap();
        for row in 0..g.height {
            for col in 0..g.width {
                let (x, _) = g.cell_center(row, col);
                let inside = (x - 1050.0).abs() <= 170.0;
                assert_eq!(depth.value(row, col).is_some(), inside, "col {col} x {x}");
            }
        }
        // Sentinel-carrying layers keep their sentinel; others use NaN.
        assert_eq!(depth.nodata, Some(-9999.0));
        assert!(depth.data.iter().any(|&v| v == -9999.0));
        assert!(masked.get("current_speed").unwrap().data.iter().any(|v| v.is_nan()));
    }

    #[test]
    fn domain_outside_grid_yields_all_missing_layers() {
        let s = stack(10, 10);
        let domain = Domain::buffer(&cable_at(50_000.0), 500.0).unwrap();
        let masked = mask_stack(&s, &domain).unwrap();
        assert_eq!(masked.grid().width, 10);
        for layer in masked.layers() {
            assert_eq!(layer.valid_count(), 0);
        }
    }
}
