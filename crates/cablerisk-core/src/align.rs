//! Raster alignment: reproject and resample layers onto one reference grid.
//!
//! The reference grid is the template layer's grid. When the template is in
//! a different CRS than the target, its footprint is reprojected (edges
//! densified) and the grid keeps the template's width and height.
//!
//! Resampling is bilinear about source cell centres. Weights are renormalised
//! over the valid neighbours, so a missing neighbour never drags a value
//! toward the sentinel; a target cell with no valid neighbour stays missing.

use geo::{coord, Rect};
use log::{debug, info};

use crate::crs::Crs;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, GridSpec, RasterLayer, RasterStack};

/// Sample points per template edge when reprojecting the footprint.
const EDGE_SAMPLES: usize = 21;

/// Derive the reference grid from `template`, expressed in `target`.
pub fn reference_grid(template: &RasterLayer, target: Crs) -> Result<GridSpec> {
    let grid = template.grid;
    if grid.is_empty() {
        return Err(Error::InsufficientData {
            what: format!("template layer `{}`", template.name),
            found: 0,
            required: 1,
        });
    }
    if grid.crs.same_projection(&target) {
        return Ok(GridSpec { crs: target, ..grid });
    }

    let to_target = grid.crs.to(target)?;
    let (w, h) = (grid.width as f64, grid.height as f64);
    let mut xs = Vec::with_capacity(EDGE_SAMPLES * 4);
    let mut ys = Vec::with_capacity(EDGE_SAMPLES * 4);
    for i in 0..EDGE_SAMPLES {
        let t = i as f64 / (EDGE_SAMPLES - 1) as f64;
        for (px, py) in [(t * w, 0.0), (t * w, h), (0.0, t * h), (w, t * h)] {
            let (sx, sy) = grid.transform.apply(px, py);
            // Edge points outside the target projection's domain are skipped.
            if let Ok((x, y)) = to_target.apply(sx, sy) {
                xs.push(x);
                ys.push(y);
            }
        }
    }
    let bounds = bounds_of(&xs, &ys).ok_or_else(|| Error::NoOverlap { layer: template.name.clone() })?;
    let cell_w = bounds.width() / w;
    let cell_h = bounds.height() / h;
    debug!(
        "reference grid from `{}`: {} → {target}, {}×{} cells of {cell_w:.2}×{cell_h:.2}",
        template.name, grid.crs, grid.width, grid.height
    );
    Ok(GridSpec::new(
        target,
        GeoTransform::north_up(bounds.min().x, bounds.max().y, cell_w, cell_h),
        grid.width,
        grid.height,
    ))
}

fn bounds_of(xs: &[f64], ys: &[f64]) -> Option<Rect<f64>> {
    if xs.is_empty() {
        return None;
    }
    let min_x = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let max_x = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min_y = ys.iter().copied().fold(f64::INFINITY, f64::min);
    let max_y = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (max_x > min_x && max_y > min_y)
        .then(|| Rect::new(coord! { x: min_x, y: min_y }, coord! { x: max_x, y: max_y }))
}

/// Reproject and resample `layer` onto `grid` with bilinear interpolation.
///
/// The output uses NaN as its missing value. Fails with
/// [`Error::NoOverlap`] when no target cell centre falls inside the
/// source footprint.
pub fn align_layer(layer: &RasterLayer, grid: &GridSpec) -> Result<RasterLayer> {
    if layer.grid.same_grid(grid) {
        let mut out = layer.normalized();
        out.grid = *grid;
        return Ok(out);
    }

    let src = &layer.grid;
    let inv = src
        .transform
        .invert()
        .ok_or_else(|| Error::SingularTransform { name: layer.name.clone() })?;

    let to_source = grid.crs.to(src.crs)?;
    let mut out = RasterLayer::new(layer.name.clone(), *grid, f32::NAN);
    let mut covered = 0usize;
    for row in 0..grid.height {
        for col in 0..grid.width {
            let (x, y) = grid.cell_center(row, col);
            let Ok((sx, sy)) = to_source.apply(x, y) else {
                continue;
            };
            let (px, py) = inv.apply(sx, sy);
            if !(px >= 0.0 && py >= 0.0 && px < src.width as f64 && py < src.height as f64) {
                continue;
            }
            covered += 1;
            if let Some(v) = bilinear(layer, px, py) {
                out.set(row, col, v);
            }
        }
    }

    if covered == 0 {
        return Err(Error::NoOverlap { layer: layer.name.clone() });
    }
    debug!(
        "aligned `{}`: {covered}/{} target cells inside source footprint",
        layer.name,
        grid.len()
    );
    Ok(out)
}

/// Bilinear sample at fractional pixel position (`px`, `py`), renormalising
/// over valid neighbours.
fn bilinear(layer: &RasterLayer, px: f64, py: f64) -> Option<f32> {
    let u = px - 0.5;
    let v = py - 0.5;
    let c0 = u.floor();
    let r0 = v.floor();
    let tx = u - c0;
    let ty = v - r0;

    let taps = [
        (0.0, 0.0, (1.0 - tx) * (1.0 - ty)),
        (1.0, 0.0, tx * (1.0 - ty)),
        (0.0, 1.0, (1.0 - tx) * ty),
        (1.0, 1.0, tx * ty),
    ];

    let mut acc = 0.0f64;
    let mut wsum = 0.0f64;
    for (dc, dr, w) in taps {
        if w <= 0.0 {
            continue;
        }
        let c = c0 + dc;
        let r = r0 + dr;
        if c < 0.0 || r < 0.0 || c >= layer.width() as f64 || r >= layer.height() as f64 {
            continue;
        }
        if let Some(val) = layer.value(r as usize, c as usize) {
            acc += w * val as f64;
            wsum += w;
        }
    }
    (wsum > 1e-12).then(|| (acc / wsum) as f32)
}

/// Align every layer onto the grid of the layer named `template`, in `target`.
/// Output order follows the input order.
pub fn align_stack(layers: &[RasterLayer], template: &str, target: Crs) -> Result<RasterStack> {
    let template_layer = layers
        .iter()
        .find(|l| l.name == template)
        .ok_or_else(|| Error::MissingLayer(template.to_string()))?;
    let grid = reference_grid(template_layer, target)?;
    info!(
        "aligning {} layers onto `{template}` grid ({}×{}, {})",
        layers.len(),
        grid.width,
        grid.height,
        grid.crs
    );
    let aligned = layers
        .iter()
        .map(|l| align_layer(l, &grid))
        .collect::<Result<Vec<_>>>()?;
    RasterStack::new(aligned)
}
