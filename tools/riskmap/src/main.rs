/// Risk-map runner: loads pipeline inputs from a directory, runs one or more
/// pipeline configurations, and writes the training table, both prediction
/// surfaces and the run report per configuration.
///
/// Input layout:
///   <inputs>/rasters/<id>.json    serialized RasterLayer
///   <inputs>/vectors/<id>.json    serialized VectorGeometry
///   <inputs>/incidents/<id>.csv   `lon,lat` header
///
/// Output layout (per run):
///   <output>/<output_id>/training.csv
///   <output>/<output_id>/surface_cv.json
///   <output>/<output_id>/surface_full.json
///   <output>/<output_id>/report.json
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use serde::Serialize;

use cablerisk_core::{
    Error as CoreError, Incident, InputSource, Pipeline, PipelineConfig, RasterLayer, RunOutput,
    VectorGeometry,
};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Preset {
    Corridor,
    Region,
}

#[derive(Parser, Debug)]
#[command(
    name = "riskmap",
    about = "Fit cross-validated anchor-drag risk surfaces for one or more pipeline configurations"
)]
struct Args {
    /// Pipeline configuration JSON files (one run each)
    #[arg(short, long, num_args = 1..)]
    config: Vec<PathBuf>,

    /// Input directory holding rasters/, vectors/ and incidents/
    #[arg(short, long, default_value = "data/inputs")]
    inputs: PathBuf,

    /// Output root directory (created if absent)
    #[arg(short, long, default_value = "data/outputs")]
    output: PathBuf,

    /// Override the seed of every configuration
    #[arg(long)]
    seed: Option<u64>,

    /// Print a preset configuration as JSON and exit
    #[arg(long, value_enum)]
    print_preset: Option<Preset>,
}

// ── Inputs ───────────────────────────────────────────────────────────────────

/// Reads inputs by id from a directory tree.
struct JsonDirSource {
    root: PathBuf,
}

impl JsonDirSource {
    fn new(root: &Path) -> Self {
        Self { root: root.to_path_buf() }
    }

    fn path(&self, kind: &str, id: &str, ext: &str) -> cablerisk_core::Result<PathBuf> {
        let path = self.root.join(kind).join(format!("{id}.{ext}"));
        if !path.is_file() {
            return Err(CoreError::MissingInput(format!("{id} ({})", path.display())));
        }
        Ok(path)
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, kind: &str, id: &str) -> cablerisk_core::Result<T> {
        let path = self.path(kind, id, "json")?;
        let text = fs::read_to_string(&path)?;
        serde_json::from_str(&text).map_err(|e| CoreError::Input {
            id: id.to_string(),
            reason: format!("{}: {e}", path.display()),
        })
    }
}

impl InputSource for JsonDirSource {
    fn raster(&self, id: &str) -> cablerisk_core::Result<RasterLayer> {
        let layer: RasterLayer = self.read_json("rasters", id)?;
        // Re-check the cell count against the grid.
        RasterLayer::from_data(layer.name, layer.grid, layer.data, layer.nodata)
    }

    fn vector(&self, id: &str) -> cablerisk_core::Result<VectorGeometry> {
        self.read_json("vectors", id)
    }

    fn incidents(&self, id: &str) -> cablerisk_core::Result<Vec<Incident>> {
        let path = self.path("incidents", id, "csv")?;
        let mut reader = csv::Reader::from_path(&path)?;
        let records = reader.deserialize().collect::<Result<Vec<Incident>, _>>()?;
        Ok(records)
    }
}

// ── Outputs ──────────────────────────────────────────────────────────────────

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Cannot create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .with_context(|| format!("Cannot write {}", path.display()))
}

fn write_run(root: &Path, out: &RunOutput) -> Result<PathBuf> {
    let dir = root.join(&out.output_id);
    fs::create_dir_all(&dir).with_context(|| format!("Cannot create {}", dir.display()))?;

    let training = dir.join("training.csv");
    let file = File::create(&training).with_context(|| format!("Cannot create {}", training.display()))?;
    out.table
        .write_csv(BufWriter::new(file))
        .with_context(|| format!("Cannot write {}", training.display()))?;

    write_json(&dir.join("surface_cv.json"), &out.cross_validation.surface)?;
    write_json(&dir.join("surface_full.json"), &out.full.surface)?;
    write_json(&dir.join("report.json"), &out.report())?;
    Ok(dir)
}

fn load_config(path: &Path, seed: Option<u64>) -> Result<PipelineConfig> {
    let text = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    let mut config =
        PipelineConfig::from_json(&text).with_context(|| format!("Failed to parse {}", path.display()))?;
    if let Some(seed) = seed {
        config.seed = seed;
    }
    Ok(config)
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Some(preset) = args.print_preset {
        let config = match preset {
            Preset::Corridor => PipelineConfig::corridor("corridor"),
            Preset::Region => PipelineConfig::region("region"),
        };
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }
    if args.config.is_empty() {
        bail!("no configuration given; pass --config <file>... or --print-preset");
    }

    let source = JsonDirSource::new(&args.inputs);
    for path in &args.config {
        let config = load_config(path, args.seed)?;
        let name = config.name.clone();
        let out = Pipeline::new(config)
            .run(&source)
            .with_context(|| format!("Run `{name}` from {} failed", path.display()))?;

        if out.extraction.presence_dropped > 0 {
            warn!(
                "[{name}] {} presence points dropped on missing cells",
                out.extraction.presence_dropped
            );
        }
        let dir = write_run(&args.output, &out)?;
        info!(
            "[{name}] wrote {} ({} rows, mean CV AUC {})",
            dir.display(),
            out.table.len(),
            out.cross_validation
                .mean_auc
                .map_or("n/a".to_string(), |a| format!("{a:.3}"))
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cablerisk_core::{Crs, GeoTransform, GridSpec};

    fn scratch(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("riskmap-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        for kind in ["rasters", "vectors", "incidents"] {
            fs::create_dir_all(dir.join(kind)).unwrap();
        }
        dir
    }

    #[test]
    fn reads_rasters_and_incidents_by_id() {
        let dir = scratch("read");
        let grid = GridSpec::new(Crs::WGS84, GeoTransform::north_up(20.0, 56.0, 0.1, 0.1), 3, 2);
        let layer = RasterLayer::new("bathymetry", grid, -42.0);
        fs::write(dir.join("rasters/bathymetry.json"), serde_json::to_string(&layer).unwrap()).unwrap();
        fs::write(dir.join("incidents/incidents.csv"), "lon,lat\n20.05,55.95\n20.15,55.85\n").unwrap();

        let source = JsonDirSource::new(&dir);
        let read = source.raster("bathymetry").unwrap();
        assert_eq!(read.data, layer.data);
        assert_eq!(read.grid.crs, Crs::WGS84);
        let incidents = source.incidents("incidents").unwrap();
        assert_eq!(incidents, vec![Incident { lon: 20.05, lat: 55.95 }, Incident { lon: 20.15, lat: 55.85 }]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_and_malformed_inputs_are_reported() {
        let dir = scratch("bad");
        fs::write(dir.join("rasters/short.json"), "{\"name\":\"short\"}").unwrap();
        let source = JsonDirSource::new(&dir);
        assert!(matches!(source.vector("cable"), Err(CoreError::MissingInput(_))));
        assert!(matches!(source.raster("short"), Err(CoreError::Input { .. })));
        fs::remove_dir_all(&dir).unwrap();
    }
}
