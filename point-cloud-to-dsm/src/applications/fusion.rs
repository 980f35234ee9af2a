/// Fusion of source point clouds into terrain-aligned tiles
use super::{FUSION_APPLICATION, TileStage, method_of, parse_params, save_intermediate_data_of};
use crate::bounds::PointCloudBounds;
use crate::diagnostics::DiagnosticSink;
use crate::error::{DsmError, DsmResult};
use crate::point_cloud::{NamedSource, PointCloud};
use crate::tile_sizing::tile_width_from_memory;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;

pub const MAPPING_TO_TERRAIN_TILES: &str = "mapping_to_terrain_tiles";

/// Columns plus the dedup set entry and source bookkeeping.
const FUSION_BYTES_PER_POINT: f64 = 160.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MappingToTerrainTilesParams {}

/// Gathers every source point falling in a terrain tile grown by the pipeline margin.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingToTerrainTiles {
    pub params: MappingToTerrainTilesParams,
    pub save_intermediate_data: bool,
}

impl MappingToTerrainTiles {
    /// Fuse the points of `sources` lying in `tile` grown by `margin`.
    ///
    /// Only the rows listed in `candidates` (one list per source) are tested.
    /// Points found in several sources with identical coordinates are kept once.
    /// An empty cloud is returned when no source reaches the tile.
    pub fn fuse_tile(
        &self,
        sources: &[NamedSource],
        candidates: &[Vec<usize>],
        tile: &PointCloudBounds,
        margin: f64,
        sink: &dyn DiagnosticSink,
    ) -> DsmResult<PointCloud> {
        let Some(first) = sources.first() else {
            return Err(DsmError::empty_cloud("no source point cloud to fuse"));
        };
        let schema = first.cloud.schema();
        let mut fused = PointCloud::new(first.cloud.attributes.epsg, &schema);
        fused.attributes.color_type = first.cloud.attributes.color_type.clone();

        let extent = tile.expanded(margin);
        let mut seen: HashSet<(u64, u64, u64)> = HashSet::new();
        let mut duplicates = 0usize;

        for (source, rows) in sources.iter().zip(candidates) {
            if source.cloud.schema() != schema {
                return Err(DsmError::configuration(format!(
                    "source {} does not share the columns of source {}",
                    source.name, first.name
                )));
            }
            let cloud = &source.cloud;
            let mut contributed = false;
            for &i in rows {
                if !extent.contains_xy(cloud.x[i], cloud.y[i]) {
                    continue;
                }
                let key = (cloud.x[i].to_bits(), cloud.y[i].to_bits(), cloud.z[i].to_bits());
                if !seen.insert(key) {
                    duplicates += 1;
                    continue;
                }
                fused.push_from(cloud, i);
                contributed = true;
            }
            if contributed {
                fused.attributes.source_names.push(source.name.clone());
            }
        }

        if duplicates > 0 {
            sink.debug(
                "fusion",
                &format!("{duplicates} duplicated points dropped while fusing tile"),
            );
        }
        Ok(fused)
    }
}

/// Registered fusion methods.
#[derive(Debug, Clone, PartialEq)]
pub enum FusionMethod {
    MappingToTerrainTiles(MappingToTerrainTiles),
}

impl FusionMethod {
    pub fn from_conf(conf: Option<&Value>) -> DsmResult<Self> {
        let method = method_of(conf, MAPPING_TO_TERRAIN_TILES)?;
        match method.as_str() {
            MAPPING_TO_TERRAIN_TILES => Ok(Self::MappingToTerrainTiles(MappingToTerrainTiles {
                params: parse_params(conf)?,
                save_intermediate_data: save_intermediate_data_of(conf)?,
            })),
            _ => Err(DsmError::unknown_method(FUSION_APPLICATION, method)),
        }
    }

    /// Fully resolved configuration of this application.
    pub fn get_conf(&self) -> Value {
        match self {
            Self::MappingToTerrainTiles(app) => json!({
                "method": MAPPING_TO_TERRAIN_TILES,
                "save_intermediate_data": app.save_intermediate_data,
            }),
        }
    }

    pub fn fuse_tile(
        &self,
        sources: &[NamedSource],
        candidates: &[Vec<usize>],
        tile: &PointCloudBounds,
        margin: f64,
        sink: &dyn DiagnosticSink,
    ) -> DsmResult<PointCloud> {
        match self {
            Self::MappingToTerrainTiles(app) => {
                app.fuse_tile(sources, candidates, tile, margin, sink)
            }
        }
    }
}

impl TileStage for FusionMethod {
    fn name(&self) -> &'static str {
        FUSION_APPLICATION
    }

    fn get_optimal_tile_size(
        &self,
        max_ram_per_worker: f64,
        superposing_point_clouds: usize,
        point_cloud_resolution: f64,
    ) -> f64 {
        tile_width_from_memory(
            FUSION_BYTES_PER_POINT,
            max_ram_per_worker,
            superposing_point_clouds,
            point_cloud_resolution,
        )
    }

    fn save_intermediate_data(&self) -> bool {
        match self {
            Self::MappingToTerrainTiles(app) => app.save_intermediate_data,
        }
    }
}
