/// Point clouds to DSM sequencer: fusion, two outlier removal passes and rasterization over terrain tiles
use crate::applications::outlier_removal::{SMALL_COMPONENTS, STATISTICAL};
use crate::applications::{
    CloudFilter, FUSION_APPLICATION, FusionMethod, OutlierRemovalMethod,
    RASTERIZATION_APPLICATION, RasterizationMethod, TileStage,
};
use crate::config::{DsmConfig, OUTLIERS_REMOVING_1, OUTLIERS_REMOVING_2, USED_CONF_FILE};
use crate::constants::GEOGRAPHIC_RESOLUTION_THRESHOLD;
use crate::coordinates::{Reprojection, is_geographic};
use crate::dataset::RasterDataset;
use crate::diagnostics::{CRS_MISMATCH_WARNING, DiagnosticSink};
use crate::error::{DsmError, DsmResult};
use crate::executor::TileExecutor;
use crate::grid::GridFootprint;
use crate::laz::read_point_cloud;
use crate::manifest::{ManifestGenerator, OutputManifest};
use crate::point_cloud::{NamedSource, PointCloud};
use crate::tile_sizing::{DensityStats, optimal_terrain_tile_width, tile_width_in_cells};
use crate::tiling::{
    SourceTileIndex, TerrainTile, gather_tile_points, terrain_bounds, terrain_tiles,
};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;

pub const DUMP_DIR: &str = "dump_dir";

/// Sequencer states. Every tile goes through them in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Fuse,
    RemoveSmallComponents,
    RemoveStatisticalOutliers,
    /// Sources are already fused: gather them per tile and go straight to rasterization.
    NoMerge,
    Rasterize,
    Done,
}

impl PipelineState {
    pub fn initial(no_merging: bool) -> Self {
        if no_merging {
            Self::NoMerge
        } else {
            Self::Fuse
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::Fuse => Self::RemoveSmallComponents,
            Self::RemoveSmallComponents => Self::RemoveStatisticalOutliers,
            Self::RemoveStatisticalOutliers | Self::NoMerge => Self::Rasterize,
            Self::Rasterize | Self::Done => Self::Done,
        }
    }

    /// Dump sub-directory of the stage.
    fn dump_name(self) -> &'static str {
        match self {
            Self::Fuse => "fusion",
            Self::RemoveSmallComponents => "outliers_removing_1",
            Self::RemoveStatisticalOutliers => "outliers_removing_2",
            Self::NoMerge => "no_merge",
            Self::Rasterize => "rasterization",
            Self::Done => "done",
        }
    }
}

/// Fusion and filtering applications, absent on the no-merge path.
#[derive(Debug, Clone)]
pub struct MergingStages {
    pub fusion: FusionMethod,
    pub outliers_removing_1: OutlierRemovalMethod,
    pub outliers_removing_2: OutlierRemovalMethod,
}

/// A terrain tile and the points gathered for it, margins included.
#[derive(Debug, Serialize)]
struct TileCloud<'a> {
    tile: &'a TerrainTile,
    cloud: &'a PointCloud,
}

pub struct DsmPipeline {
    config: DsmConfig,
    merging: Option<MergingStages>,
    rasterization: RasterizationMethod,
}

impl DsmPipeline {
    /// Build every application named by the configuration.
    /// Unknown methods fail here, before any data is read.
    pub fn new(config: DsmConfig) -> DsmResult<Self> {
        config.validate()?;
        let merging = if config.pipeline.no_merging {
            None
        } else {
            Some(MergingStages {
                fusion: FusionMethod::from_conf(config.application(FUSION_APPLICATION))?,
                outliers_removing_1: OutlierRemovalMethod::from_conf(
                    config.application(OUTLIERS_REMOVING_1),
                    SMALL_COMPONENTS,
                )?,
                outliers_removing_2: OutlierRemovalMethod::from_conf(
                    config.application(OUTLIERS_REMOVING_2),
                    STATISTICAL,
                )?,
            })
        };
        let rasterization =
            RasterizationMethod::from_conf(config.application(RASTERIZATION_APPLICATION))?;
        Ok(Self {
            config,
            merging,
            rasterization,
        })
    }

    pub fn config(&self) -> &DsmConfig {
        &self.config
    }

    pub fn merging(&self) -> Option<&MergingStages> {
        self.merging.as_ref()
    }

    /// Configuration with every application fully resolved.
    pub fn used_conf(&self) -> DsmResult<Value> {
        let mut used = self.config.clone();
        used.applications.clear();
        if let Some(merging) = &self.merging {
            used.applications
                .insert(FUSION_APPLICATION.to_string(), merging.fusion.get_conf());
            used.applications.insert(
                OUTLIERS_REMOVING_1.to_string(),
                merging.outliers_removing_1.get_conf()?,
            );
            used.applications.insert(
                OUTLIERS_REMOVING_2.to_string(),
                merging.outliers_removing_2.get_conf()?,
            );
        }
        used.applications.insert(
            RASTERIZATION_APPLICATION.to_string(),
            self.rasterization.get_conf()?,
        );
        Ok(serde_json::to_value(&used)?)
    }

    /// Border gathered around each tile at fusion time: every downstream stage's margin.
    pub fn fusion_margin(&self) -> f64 {
        let resolution = self.rasterization.get_resolution();
        let filters = self.merging.as_ref().map_or(0.0, |m| {
            m.outliers_removing_1.get_on_ground_margin(resolution)
                + m.outliers_removing_2.get_on_ground_margin(resolution)
        });
        filters + self.rasterization.get_margins()
    }

    fn stages(&self) -> Vec<&dyn TileStage> {
        let mut stages: Vec<&dyn TileStage> = Vec::new();
        if let Some(m) = &self.merging {
            stages.push(&m.fusion);
            stages.push(&m.outliers_removing_1);
            stages.push(&m.outliers_removing_2);
        }
        stages.push(&self.rasterization);
        stages
    }

    /// Warn when a geographic output CRS gets a resolution that looks metric.
    pub fn check_resolution_against_crs(&self, epsg: u32, sink: &dyn DiagnosticSink) {
        let resolution = self.rasterization.get_resolution();
        if is_geographic(epsg) && resolution > GEOGRAPHIC_RESOLUTION_THRESHOLD {
            sink.warn(
                CRS_MISMATCH_WARNING,
                &format!(
                    "The resolution of the point_cloud_rasterization ({resolution}) \
                     should be fixed according to the epsg (EPSG:{epsg} is in degrees)"
                ),
            );
        }
    }

    /// Load the configured sources, in name order.
    pub fn load_sources(&self) -> DsmResult<Vec<NamedSource>> {
        self.config
            .inputs
            .point_clouds
            .iter()
            .map(|(name, input)| {
                read_point_cloud(
                    name,
                    &input.path,
                    input.epsg,
                    self.config.orchestrator.show_progress,
                )
            })
            .collect()
    }

    /// Full run: save the used configuration, load the sources, build the DSM and write it.
    /// `None` when no tile produced any cell.
    pub fn run<E: TileExecutor>(
        &self,
        executor: &E,
        sink: &dyn DiagnosticSink,
    ) -> DsmResult<Option<OutputManifest>> {
        let out_dir = &self.config.output.out_dir;
        fs::create_dir_all(out_dir)?;
        let used_conf_path = out_dir.join(USED_CONF_FILE);
        fs::write(&used_conf_path, serde_json::to_string_pretty(&self.used_conf()?)?)?;
        sink.info("pipeline", &format!("Saved {}", used_conf_path.display()));

        let sources = self.load_sources()?;
        let Some(dataset) = self.process(sources, executor, sink)? else {
            sink.warn("pipeline", "No tile produced any raster cell, nothing written");
            return Ok(None);
        };

        let generator = ManifestGenerator::new(
            out_dir,
            &self.config.output.dsm_basename,
            &self.config.output.color_basename,
        );
        generator.write_outputs(&dataset, sink).map(Some)
    }

    /// Run every terrain tile through the stages and merge the raster tiles.
    ///
    /// A tile goes through all of its stages inside one executor task, so tiles never
    /// wait on each other; the only join is the final merge.
    pub fn process<E: TileExecutor>(
        &self,
        sources: Vec<NamedSource>,
        executor: &E,
        sink: &dyn DiagnosticSink,
    ) -> DsmResult<Option<RasterDataset>> {
        let Some(first) = sources.first() else {
            return Err(DsmError::configuration("no input point cloud to process"));
        };
        let epsg_cloud = first.cloud.attributes.epsg;
        if let Some(other) = sources.iter().find(|s| s.cloud.attributes.epsg != epsg_cloud) {
            return Err(DsmError::configuration(format!(
                "input point clouds must share one EPSG: {} is EPSG:{}, {} is EPSG:{epsg_cloud}",
                other.name, other.cloud.attributes.epsg, first.name
            )));
        }
        let epsg = self.config.output.epsg.unwrap_or(epsg_cloud);
        self.check_resolution_against_crs(epsg, sink);

        let resolution = self.rasterization.get_resolution();
        let density = DensityStats::from_sources(&sources, resolution);
        sink.info(
            "pipeline",
            &format!(
                "Average point spacing {:.4}, at most {} superposing point clouds",
                density.average_spacing, density.max_superposing
            ),
        );

        let reprojection = Reprojection::new(epsg_cloud, epsg)?;
        let sources: Vec<NamedSource> = sources
            .into_iter()
            .map(|s| NamedSource {
                name: s.name,
                cloud: reprojection.apply_cloud(s.cloud),
            })
            .collect();

        let roi = self.config.roi();
        let terrain = terrain_bounds(&sources, roi.as_ref())?;
        let tile_width = optimal_terrain_tile_width(
            &self.stages(),
            self.config.orchestrator.max_ram_per_worker,
            &density,
            &terrain,
            epsg,
            epsg_cloud,
            sink,
        )?;
        let global = GridFootprint::from_bounds(resolution, &terrain)?;
        let tile_cells = tile_width_in_cells(tile_width, resolution);
        let tiles = terrain_tiles(&global, tile_cells);
        sink.info(
            "pipeline",
            &format!(
                "DSM grid {}x{} cells at resolution {resolution}, {} terrain tiles",
                global.x_size,
                global.y_size,
                tiles.len()
            ),
        );

        let margin = self.fusion_margin();
        sink.info("pipeline", &format!("Fusion margin: {margin}"));
        let index = SourceTileIndex::build(&sources, &global, tile_cells, margin);

        let results = executor.map_tiles("dsm", tiles, |tile| {
            let raster =
                self.process_tile(&tile, &sources, index.candidates(&tile), margin, epsg, sink);
            (tile, raster)
        });

        // Join point: every tile raster is back.
        let mut rasters: Vec<(TerrainTile, RasterDataset)> = Vec::new();
        for (tile, result) in results {
            match result {
                Ok(Some(raster)) => rasters.push((tile, raster)),
                Ok(None) => {}
                Err(e) if e.is_tile_skip() => {
                    sink.debug("pipeline", &format!("{} skipped: {e}", tile.label()));
                }
                Err(e) => return Err(e),
            }
        }
        let Some((_, first)) = rasters.first() else {
            return Ok(None);
        };
        let mut dsm = first.blank_like(global);
        for (tile, raster) in &rasters {
            dsm.paste(raster, tile.window.col0, tile.window.row0);
        }
        sink.info(
            "pipeline",
            &format!("Merged {} raster tiles into the DSM", rasters.len()),
        );
        Ok(Some(dsm))
    }

    /// Walk one tile through the state machine. `None` once the tile runs out of points.
    fn process_tile(
        &self,
        tile: &TerrainTile,
        sources: &[NamedSource],
        candidates: &[Vec<usize>],
        margin: f64,
        epsg: u32,
        sink: &dyn DiagnosticSink,
    ) -> DsmResult<Option<RasterDataset>> {
        let bounds = tile.bounds();
        let mut state = PipelineState::initial(self.merging.is_none());
        let mut cloud = match (state, &self.merging) {
            (PipelineState::Fuse, Some(merging)) => {
                let fused = merging.fusion.fuse_tile(sources, candidates, &bounds, margin, sink)?;
                if merging.fusion.save_intermediate_data() {
                    self.dump_tile(state, tile, &TileCloud { tile, cloud: &fused })?;
                }
                fused
            }
            _ => gather_tile_points(sources, candidates, &bounds, margin)?,
        };
        state = state.next();

        let mut raster = None;
        while state != PipelineState::Done {
            if cloud.is_empty() {
                sink.debug("pipeline", &format!("{} has no points left", tile.label()));
                return Ok(None);
            }
            match (state, &self.merging) {
                (PipelineState::RemoveSmallComponents, Some(merging)) => {
                    cloud = self.filter_tile(state, &merging.outliers_removing_1, tile, cloud, sink)?;
                }
                (PipelineState::RemoveStatisticalOutliers, Some(merging)) => {
                    cloud = self.filter_tile(state, &merging.outliers_removing_2, tile, cloud, sink)?;
                }
                (PipelineState::Rasterize, _) => {
                    raster = self.rasterization.rasterize_tile(&cloud, &tile.window, epsg, sink)?;
                    if let (true, Some(r)) = (self.rasterization.save_intermediate_data(), &raster) {
                        self.dump_tile(state, tile, r)?;
                    }
                }
                _ => {
                    return Err(DsmError::configuration(format!(
                        "state {state:?} needs the merging applications"
                    )));
                }
            }
            state = state.next();
        }
        Ok(raster)
    }

    fn filter_tile(
        &self,
        state: PipelineState,
        filter: &OutlierRemovalMethod,
        tile: &TerrainTile,
        cloud: PointCloud,
        sink: &dyn DiagnosticSink,
    ) -> DsmResult<PointCloud> {
        let filtered = filter.run_tile(cloud, sink);
        if filter.save_intermediate_data() {
            self.dump_tile(state, tile, &TileCloud { tile, cloud: &filtered })?;
        }
        Ok(filtered)
    }

    fn dump_path(&self, state: PipelineState, tile: &TerrainTile) -> PathBuf {
        self.config
            .output
            .out_dir
            .join(DUMP_DIR)
            .join(state.dump_name())
            .join(format!("{}.json", tile.label()))
    }

    fn dump_tile<T: Serialize>(
        &self,
        state: PipelineState,
        tile: &TerrainTile,
        value: &T,
    ) -> DsmResult<()> {
        let path = self.dump_path(state, tile);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, serde_json::to_vec(value)?)?;
        Ok(())
    }
}
