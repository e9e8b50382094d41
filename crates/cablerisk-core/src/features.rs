//! Feature extraction: point sets + raster stack → labelled training table.

use std::io;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::raster::RasterStack;
use crate::sampling::{PointLabel, PointSet};

/// One point with its predictor vector. `values` follows the table's
/// feature order and never holds a missing value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRow {
    pub x: f64,
    pub y: f64,
    pub values: Vec<f64>,
    /// 1 for presence, 0 for background.
    pub label: u8,
}

impl TrainingRow {
    pub fn is_presence(&self) -> bool {
        self.label == 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingTable {
    pub feature_names: Vec<String>,
    pub rows: Vec<TrainingRow>,
}

impl TrainingTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn presence_count(&self) -> usize {
        self.rows.iter().filter(|r| r.is_presence()).count()
    }

    pub fn background_count(&self) -> usize {
        self.len() - self.presence_count()
    }

    /// Sub-table holding the rows at `indices`, in that order.
    pub fn subset(&self, indices: &[usize]) -> TrainingTable {
        TrainingTable {
            feature_names: self.feature_names.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    /// Write as delimited text: `x,y,<features...>,label`.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        let mut header = vec!["x".to_string(), "y".to_string()];
        header.extend(self.feature_names.iter().cloned());
        header.push("label".to_string());
        wtr.write_record(&header)?;
        for row in &self.rows {
            let mut record = Vec::with_capacity(row.values.len() + 3);
            record.push(row.x.to_string());
            record.push(row.y.to_string());
            record.extend(row.values.iter().map(|v| v.to_string()));
            record.push(row.label.to_string());
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Rows kept and dropped per label during extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub presence_kept: usize,
    pub presence_dropped: usize,
    pub background_kept: usize,
    pub background_dropped: usize,
}

/// Read the enclosing cell of every point. Points outside the grid or on a
/// cell where any layer is missing are dropped. Returns the rows and the
/// number dropped. Points that cannot be transformed into the grid's system
/// count as dropped.
pub fn extract(points: &PointSet, stack: &RasterStack) -> Result<(Vec<TrainingRow>, usize)> {
    let grid = stack.grid();
    let to_grid = points.crs.to(grid.crs)?;
    let label = points.label.response();
    let mut rows = Vec::with_capacity(points.len());
    let mut dropped = 0;
    for &[px, py] in &points.points {
        let Ok((x, y)) = to_grid.apply(px, py) else {
            dropped += 1;
            continue;
        };
        let values = grid
            .locate(x, y)
            .and_then(|(row, col)| stack.values_at(row, col));
        match values {
            Some(values) => rows.push(TrainingRow { x, y, values, label }),
            None => dropped += 1,
        }
    }
    Ok((rows, dropped))
}

/// Extract both point sets and concatenate them, presence rows first.
pub fn build_training_table(
    presence: &PointSet,
    background: &PointSet,
    stack: &RasterStack,
) -> Result<(TrainingTable, ExtractionSummary)> {
    debug_assert_eq!(presence.label, PointLabel::Presence);
    debug_assert_eq!(background.label, PointLabel::Background);

    let (mut rows, presence_dropped) = extract(presence, stack)?;
    let (bg_rows, background_dropped) = extract(background, stack)?;
    let summary = ExtractionSummary {
        presence_kept: rows.len(),
        presence_dropped,
        background_kept: bg_rows.len(),
        background_dropped,
    };
    if presence_dropped > 0 {
        warn!("{presence_dropped} of {} presence points fell on missing cells", presence.len());
    }
    info!(
        "training table: {} presence + {} background rows ({} + {} dropped)",
        summary.presence_kept, summary.background_kept, presence_dropped, background_dropped
    );
    rows.extend(bg_rows);
    Ok((
        TrainingTable { feature_names: stack.names(), rows },
        summary,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::raster::{GeoTransform, GridSpec, RasterLayer};

    fn utm() -> Crs {
        Crs::from_code("EPSG:32634").unwrap()
    }

    fn stack() -> RasterStack {
        let grid = GridSpec::new(utm(), GeoTransform::north_up(0.0, 300.0, 100.0, 100.0), 3, 3);
        let mut depth = RasterLayer::new("bathymetry", grid, 0.0);
        for r in 0..3 {
            for c in 0..3 {
                depth.set(r, c, -1.0 - (r * 3 + c) as f32);
            }
        }
        depth.set(1, 1, f32::NAN);
        let speed = RasterLayer::new("current_speed", grid, 0.5);
        RasterStack::new(vec![depth, speed]).unwrap()
    }

    fn set(label: PointLabel, points: Vec<[f64; 2]>) -> PointSet {
        PointSet { name: "pts".into(), crs: utm(), label, points }
    }

    #[test]
    fn rows_are_filtered_and_ordered() {
        let s = stack();
        let presence = set(PointLabel::Presence, vec![[50.0, 250.0], [150.0, 150.0], [250.0, 50.0]]);
        let background = set(PointLabel::Background, vec![[250.0, 250.0], [999.0, 50.0], [50.0, 50.0]]);
        let (table, summary) = build_training_table(&presence, &background, &s).unwrap();

        assert_eq!(table.feature_names, vec!["bathymetry", "current_speed"]);
        assert_eq!(summary.presence_kept + summary.presence_dropped, presence.len());
        assert_eq!(summary.background_kept + summary.background_dropped, background.len());
        assert_eq!((summary.presence_dropped, summary.background_dropped), (1, 1));
        assert_eq!(table.presence_count(), 2);
        assert_eq!(table.background_count(), 2);
        assert!(table.rows[..2].iter().all(|r| r.label == 1));
        assert_eq!(table.rows[0].values, vec![-1.0, 0.5]);
        assert_eq!(table.rows[1].values, vec![-9.0, 0.5]);
        assert_eq!(table.rows[3].values, vec![-7.0, 0.5]);
    }

    #[test]
    fn csv_has_header_and_one_line_per_row() {
        let s = stack();
        let presence = set(PointLabel::Presence, vec![[50.0, 250.0]]);
        let background = set(PointLabel::Background, vec![[250.0, 250.0]]);
        let (table, _) = build_training_table(&presence, &background, &s).unwrap();
        let mut buf = Vec::new();
        table.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "x,y,bathymetry,current_speed,label");
        assert_eq!(lines[1], "50,250,-1,0.5,1");
        assert_eq!(lines[2], "250,250,-3,0.5,0");
        assert_eq!(lines.len(), 3);
    }
}
