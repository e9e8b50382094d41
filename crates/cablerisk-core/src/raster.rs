use serde::{Deserialize, Serialize};

use geo::{coord, Rect};

use crate::crs::Crs;
use crate::error::{Error, Result};

/// Affine pixel → world transform in GDAL coefficient order.
///
/// ```text
///   x = origin_x + col · pixel_width  + row · row_rotation
///   y = origin_y + col · col_rotation + row · pixel_height
/// ```
/// North-up grids have zero rotation and a negative `pixel_height`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub row_rotation: f64,
    pub origin_y: f64,
    pub col_rotation: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with the top-left corner at (`origin_x`, `origin_y`).
    pub fn north_up(origin_x: f64, origin_y: f64, cell_width: f64, cell_height: f64) -> Self {
        Self {
            origin_x,
            pixel_width: cell_width,
            row_rotation: 0.0,
            origin_y,
            col_rotation: 0.0,
            pixel_height: -cell_height.abs(),
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            origin_x: gt[0],
            pixel_width: gt[1],
            row_rotation: gt[2],
            origin_y: gt[3],
            col_rotation: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            self.row_rotation,
            self.origin_y,
            self.col_rotation,
            self.pixel_height,
        ]
    }

    /// Map fractional pixel coordinates (col, row) to world coordinates.
    #[inline]
    pub fn apply(&self, px: f64, py: f64) -> (f64, f64) {
        (
            self.origin_x + px * self.pixel_width + py * self.row_rotation,
            self.origin_y + px * self.col_rotation + py * self.pixel_height,
        )
    }

    /// The world → pixel transform, or `None` when the matrix is singular.
    pub fn invert(&self) -> Option<GeoTransform> {
        let det = self.pixel_width * self.pixel_height - self.row_rotation * self.col_rotation;
        if det.abs() < 1e-15 || !det.is_finite() {
            return None;
        }
        Some(GeoTransform {
            origin_x: (self.row_rotation * self.origin_y - self.pixel_height * self.origin_x) / det,
            pixel_width: self.pixel_height / det,
            row_rotation: -self.row_rotation / det,
            origin_y: (self.col_rotation * self.origin_x - self.pixel_width * self.origin_y) / det,
            col_rotation: -self.col_rotation / det,
            pixel_height: self.pixel_width / det,
        })
    }

    /// Ground spacing between adjacent columns and adjacent rows.
    pub fn cell_size(&self) -> (f64, f64) {
        (
            self.pixel_width.hypot(self.col_rotation),
            self.row_rotation.hypot(self.pixel_height),
        )
    }

    fn approx_eq(&self, other: &GeoTransform) -> bool {
        // Tolerance is a millionth of a cell.
        let tol = 1e-6 * self.pixel_width.abs().max(self.pixel_height.abs());
        let a = self.to_gdal();
        let b = other.to_gdal();
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= tol)
    }
}

/// Grid definition shared by every layer in a stack.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub crs: Crs,
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
}

impl GridSpec {
    pub fn new(crs: Crs, transform: GeoTransform, width: usize, height: usize) -> Self {
        Self { crs, transform, width, height }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// World coordinates of the centre of cell (`row`, `col`).
    #[inline]
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.transform.apply(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// (row, col) of the cell enclosing world point (x, y), if inside the grid.
    pub fn locate(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let inv = self.transform.invert()?;
        let (px, py) = inv.apply(x, y);
        if !(px >= 0.0 && py >= 0.0) {
            return None;
        }
        let (col, row) = (px.floor() as usize, py.floor() as usize);
        (col < self.width && row < self.height).then_some((row, col))
    }

    /// Bounding rectangle of the grid footprint.
    pub fn bounds(&self) -> Rect<f64> {
        let (w, h) = (self.width as f64, self.height as f64);
        let corners = [
            self.transform.apply(0.0, 0.0),
            self.transform.apply(w, 0.0),
            self.transform.apply(0.0, h),
            self.transform.apply(w, h),
        ];
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (x, y) in corners {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Rect::new(coord! { x: min_x, y: min_y }, coord! { x: max_x, y: max_y })
    }

    /// Sub-grid starting at (`col0`, `row0`) with the given size.
    pub fn window(&self, col0: usize, row0: usize, width: usize, height: usize) -> GridSpec {
        let (ox, oy) = self.transform.apply(col0 as f64, row0 as f64);
        GridSpec {
            crs: self.crs,
            transform: GeoTransform { origin_x: ox, origin_y: oy, ..self.transform },
            width,
            height,
        }
    }

    /// Same CRS, dimensions and (numerically) the same transform.
    pub fn same_grid(&self, other: &GridSpec) -> bool {
        self.crs.same_projection(&other.crs)
            && self.width == other.width
            && self.height == other.height
            && self.transform.approx_eq(&other.transform)
    }
}

/// A single named raster layer, row-major, values as f32.
/// Coordinate math uses f64; cell values use f32.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterLayer {
    pub name: String,
    pub grid: GridSpec,
    /// Row-major cell values; NaN is always treated as missing.
    pub data: Vec<f32>,
    /// Additional missing-value sentinel.
    #[serde(default)]
    pub nodata: Option<f32>,
}

impl RasterLayer {
    /// Create a layer filled with the given value.
    pub fn new(name: impl Into<String>, grid: GridSpec, fill: f32) -> Self {
        Self {
            name: name.into(),
            data: vec![fill; grid.len()],
            grid,
            nodata: None,
        }
    }

    pub fn from_data(
        name: impl Into<String>,
        grid: GridSpec,
        data: Vec<f32>,
        nodata: Option<f32>,
    ) -> Result<Self> {
        let name = name.into();
        if data.len() != grid.len() {
            return Err(Error::ShapeMismatch {
                layer: name,
                found: data.len(),
                expected: grid.len(),
            });
        }
        Ok(Self { name, grid, data, nodata })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.grid.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.grid.height
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.grid.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f32) {
        self.data[row * self.grid.width + col] = val;
    }

    #[inline]
    pub fn is_missing(&self, v: f32) -> bool {
        v.is_nan() || self.nodata == Some(v)
    }

    /// Cell value, or `None` if the cell is missing.
    #[inline]
    pub fn value(&self, row: usize, col: usize) -> Option<f32> {
        let v = self.get(row, col);
        (!self.is_missing(v)).then_some(v)
    }

    /// The value written into cells that are masked out.
    pub fn fill_value(&self) -> f32 {
        self.nodata.unwrap_or(f32::NAN)
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|&&v| !self.is_missing(v)).count()
    }

    /// Copy with sentinel cells rewritten to NaN and the sentinel dropped.
    pub fn normalized(&self) -> RasterLayer {
        let data = self
            .data
            .iter()
            .map(|&v| if self.is_missing(v) { f32::NAN } else { v })
            .collect();
        RasterLayer { name: self.name.clone(), grid: self.grid, data, nodata: None }
    }

    pub fn renamed(mut self, name: impl Into<String>) -> RasterLayer {
        self.name = name.into();
        self
    }

    pub fn min_value(&self) -> Option<f32> {
        self.data.iter().copied().filter(|v| !self.is_missing(*v)).reduce(f32::min)
    }

    pub fn max_value(&self) -> Option<f32> {
        self.data.iter().copied().filter(|v| !self.is_missing(*v)).reduce(f32::max)
    }
}

/// Ordered, immutable set of uniquely named layers on one grid.
#[derive(Debug, Clone, Serialize)]
pub struct RasterStack {
    layers: Vec<RasterLayer>,
}

impl RasterStack {
    pub fn new(layers: Vec<RasterLayer>) -> Result<Self> {
        let first = layers.first().ok_or(Error::EmptyStack)?;
        let grid = first.grid;
        for (i, layer) in layers.iter().enumerate() {
            if layers[..i].iter().any(|l| l.name == layer.name) {
                return Err(Error::DuplicateLayer(layer.name.clone()));
            }
            if !layer.grid.same_grid(&grid) {
                return Err(Error::GridMismatch { layer: layer.name.clone() });
            }
            if layer.data.len() != grid.len() {
                return Err(Error::ShapeMismatch {
                    layer: layer.name.clone(),
                    found: layer.data.len(),
                    expected: grid.len(),
                });
            }
        }
        Ok(Self { layers })
    }

    pub fn grid(&self) -> &GridSpec {
        &self.layers[0].grid
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[RasterLayer] {
        &self.layers
    }

    pub fn names(&self) -> Vec<String> {
        self.layers.iter().map(|l| l.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&RasterLayer> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// A new stack with `layer` replacing the same-named layer in its slot,
    /// or appended when the name is new.
    pub fn with_layer(&self, layer: RasterLayer) -> Result<RasterStack> {
        let mut layers = self.layers.clone();
        match layers.iter_mut().find(|l| l.name == layer.name) {
            Some(slot) => *slot = layer,
            None => layers.push(layer),
        }
        RasterStack::new(layers)
    }

    /// A new stack holding exactly `names`, in that order.
    pub fn select(&self, names: &[String]) -> Result<RasterStack> {
        let layers = names
            .iter()
            .map(|n| self.get(n).cloned().ok_or_else(|| Error::MissingLayer(n.clone())))
            .collect::<Result<Vec<_>>>()?;
        RasterStack::new(layers)
    }

    /// Apply `f` to every layer, producing a new stack.
    pub fn map_layers<F>(&self, f: F) -> Result<RasterStack>
    where
        F: FnMut(&RasterLayer) -> Result<RasterLayer>,
    {
        let layers = self.layers.iter().map(f).collect::<Result<Vec<_>>>()?;
        RasterStack::new(layers)
    }

    /// Predictor vector at cell (`row`, `col`); `None` if any layer is missing.
    pub fn values_at(&self, row: usize, col: usize) -> Option<Vec<f64>> {
        self.layers
            .iter()
            .map(|l| l.value(row, col).map(f64::from))
            .collect()
    }
}
