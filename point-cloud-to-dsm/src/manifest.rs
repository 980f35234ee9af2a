/// Output manifest generation: layer files plus the georeferencing needed to read them back.
use crate::constants::{RASTER_COLOR_IMG, RASTER_HGT};
use crate::dataset::{NoDataValues, RasterDataset};
use crate::dds_writer::write_layer_dds;
use crate::diagnostics::DiagnosticSink;
use crate::error::DsmResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Sub-directory of the output directory holding the raster layers.
pub const DSM_DIRECTORY: &str = "dsm";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Written to `manifest.json` next to the `dsm/` directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputManifest {
    pub epsg: u32,
    pub resolution: f64,
    /// Top-left corner of the top-left cell.
    pub x_start: f64,
    pub y_start: f64,
    pub x_size: usize,
    pub y_size: usize,
    pub no_data: NoDataValues,
    pub layers: Vec<LayerFile>,
}

/// One DDS file per layer, relative to the output directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerFile {
    pub name: String,
    pub file: String,
}

/// Writes every layer of a dataset plus its manifest.
pub struct ManifestGenerator {
    output_dir: PathBuf,
    dsm_basename: String,
    color_basename: String,
}

impl ManifestGenerator {
    pub fn new(output_dir: &Path, dsm_basename: &str, color_basename: &str) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            dsm_basename: dsm_basename.to_string(),
            color_basename: color_basename.to_string(),
        }
    }

    /// File name for a layer: the height and colour layers follow the configured basenames.
    fn file_name(&self, layer: &str) -> String {
        if layer == RASTER_HGT {
            return format!("{}.dds", self.dsm_basename);
        }
        if let Some(band) = layer
            .strip_prefix(RASTER_COLOR_IMG)
            .filter(|band| band.parse::<usize>().is_ok())
        {
            return format!("{}_band{band}.dds", self.color_basename);
        }
        format!("{layer}.dds")
    }

    pub fn write_outputs(
        &self,
        dataset: &RasterDataset,
        sink: &dyn DiagnosticSink,
    ) -> DsmResult<OutputManifest> {
        let dsm_dir = self.output_dir.join(DSM_DIRECTORY);
        fs::create_dir_all(&dsm_dir)?;

        let (width, height) = (dataset.footprint.x_size, dataset.footprint.y_size);
        let mut layers = Vec::new();
        for (name, data) in dataset.named_layers() {
            let file = self.file_name(&name);
            write_layer_dds(&dsm_dir.join(&file), width, height, &data.to_f32())?;
            sink.debug("output", &format!("Saved {name} to {file}"));
            layers.push(LayerFile {
                name,
                file: format!("{DSM_DIRECTORY}/{file}"),
            });
        }

        let manifest = OutputManifest {
            epsg: dataset.epsg,
            resolution: dataset.resolution,
            x_start: dataset.footprint.x_start,
            y_start: dataset.footprint.y_start,
            x_size: width,
            y_size: height,
            no_data: dataset.no_data,
            layers,
        };

        let manifest_path = self.output_dir.join(MANIFEST_FILE);
        fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;
        sink.info(
            "output",
            &format!(
                "Generated manifest {}: {} layers of {width}x{height} cells, EPSG:{}",
                manifest_path.display(),
                manifest.layers.len(),
                manifest.epsg
            ),
        );
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use crate::grid::GridFootprint;

    #[test]
    fn layer_files_follow_basenames() {
        let generator = ManifestGenerator::new(Path::new("out"), "dsm", "color");
        assert_eq!(generator.file_name("hgt"), "dsm.dds");
        assert_eq!(generator.file_name("img2"), "color_band2.dds");
        assert_eq!(generator.file_name("hgt_stdev"), "hgt_stdev.dds");
        assert_eq!(generator.file_name("band_mean1"), "band_mean1.dds");
    }

    #[test]
    fn outputs_and_manifest_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let footprint = GridFootprint {
            x_start: 10.0,
            y_start: 20.0,
            x_size: 3,
            y_size: 2,
            resolution: 0.5,
        };
        let dataset =
            RasterDataset::blank(footprint, 32631, NoDataValues::default(), 1, &[], false);
        let generator = ManifestGenerator::new(dir.path(), "dsm", "color");
        let manifest = generator.write_outputs(&dataset, &MemorySink::new()).unwrap();

        let names: Vec<&str> = manifest.layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(
            names,
            ["hgt", "img1", "hgt_mean", "hgt_stdev", "band_mean1", "band_stdev1", "n_pts", "pts_in_cell"]
        );
        for layer in &manifest.layers {
            assert!(dir.path().join(&layer.file).is_file(), "{}", layer.file);
        }

        let text = fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap();
        let back: OutputManifest = serde_json::from_str(&text).unwrap();
        assert_eq!(back, manifest);
        assert_eq!(back.x_size, 3);
    }
}
