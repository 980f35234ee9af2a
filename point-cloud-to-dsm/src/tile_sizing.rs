/// Terrain tile width selection under a per-worker memory budget
use crate::applications::TileStage;
use crate::bounds::PointCloudBounds;
use crate::constants::WORKER_FIXED_OVERHEAD_MIB;
use crate::coordinates::convert_optimal_tile_size_with_epsg;
use crate::diagnostics::DiagnosticSink;
use crate::error::{DsmError, DsmResult};
use crate::point_cloud::NamedSource;

/// Tile width a stage can afford when each point costs `bytes_per_point`.
///
/// A square tile of width `w` holds `superposing * (w / spacing)^2` points, so
/// `w = spacing * sqrt(available_bytes / (bytes_per_point * superposing))`.
/// Returns 0 when the budget does not even cover the fixed worker overhead.
pub fn tile_width_from_memory(
    bytes_per_point: f64,
    max_ram_per_worker: f64,
    superposing_point_clouds: usize,
    point_cloud_resolution: f64,
) -> f64 {
    let available = (max_ram_per_worker - WORKER_FIXED_OVERHEAD_MIB) * (1u64 << 20) as f64;
    if !(available > 0.0 && point_cloud_resolution > 0.0 && bytes_per_point > 0.0) {
        return 0.0;
    }
    let superposing = superposing_point_clouds.max(1) as f64;
    point_cloud_resolution * (available / (bytes_per_point * superposing)).sqrt()
}

/// Point density figures fed to every stage's tile sizing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DensityStats {
    /// Average ground distance between neighbouring points, cloud CRS units.
    pub average_spacing: f64,
    /// Largest number of sources overlapping one location.
    pub max_superposing: usize,
}

impl DensityStats {
    /// `fallback_spacing` is used when no source has a non-degenerate footprint.
    pub fn from_sources(sources: &[NamedSource], fallback_spacing: f64) -> Self {
        let boxes: Vec<PointCloudBounds> = sources.iter().filter_map(|s| s.cloud.bounds()).collect();
        Self {
            average_spacing: average_point_spacing(sources).unwrap_or(fallback_spacing),
            max_superposing: max_superposing_point_clouds(&boxes),
        }
    }
}

/// Mean over sources of `sqrt(bbox_area / n_points)`.
///
/// Sources without points or with a zero-area footprint carry no density
/// information and are ignored.
pub fn average_point_spacing(sources: &[NamedSource]) -> Option<f64> {
    let spacings: Vec<f64> = sources
        .iter()
        .filter_map(|source| {
            let bounds = source.cloud.bounds()?;
            let area = bounds.area_xy();
            (area > 0.0).then(|| (area / source.cloud.len() as f64).sqrt())
        })
        .collect();
    if spacings.is_empty() {
        None
    } else {
        Some(spacings.iter().sum::<f64>() / spacings.len() as f64)
    }
}

/// Largest count of source boxes containing the centre of any source box (at least 1).
pub fn max_superposing_point_clouds(boxes: &[PointCloudBounds]) -> usize {
    boxes
        .iter()
        .map(|b| {
            let (cx, cy) = b.center_xy();
            boxes.iter().filter(|o| o.contains_xy(cx, cy)).count()
        })
        .max()
        .unwrap_or(1)
        .max(1)
}

/// Binding tile width across `stages`, converted to output CRS units.
///
/// Every stage reports the width it can process in cloud CRS units; the smallest
/// one wins, then the unit change between `epsg_cloud` and `epsg` is applied.
pub fn optimal_terrain_tile_width(
    stages: &[&dyn TileStage],
    max_ram_per_worker: f64,
    density: &DensityStats,
    terrain_bounds: &PointCloudBounds,
    epsg: u32,
    epsg_cloud: u32,
    sink: &dyn DiagnosticSink,
) -> DsmResult<f64> {
    if !terrain_bounds.is_valid_xy() {
        return Err(DsmError::configuration(
            "terrain bounds are undefined, cannot size tiles",
        ));
    }

    let mut width = f64::INFINITY;
    for stage in stages {
        let stage_width = stage.get_optimal_tile_size(
            max_ram_per_worker,
            density.max_superposing,
            density.average_spacing,
        );
        sink.debug(
            "tile_sizing",
            &format!("{} optimal tile size: {stage_width}", stage.name()),
        );
        width = width.min(stage_width);
    }

    if !(width.is_finite() && width > 0.0) {
        return Err(DsmError::configuration(format!(
            "optimal tile width must be positive, got {width} \
             (max_ram_per_worker = {max_ram_per_worker} MiB)"
        )));
    }

    let width = convert_optimal_tile_size_with_epsg(terrain_bounds, width, epsg, epsg_cloud)?;
    if !(width.is_finite() && width > 0.0) {
        return Err(DsmError::configuration(format!(
            "converted tile width must be positive, got {width}"
        )));
    }
    sink.info("tile_sizing", &format!("Optimal terrain tile width: {width}"));
    Ok(width)
}

/// Tile edge in raster cells, at least one.
pub fn tile_width_in_cells(width: f64, resolution: f64) -> usize {
    ((width / resolution).floor() as usize).max(1)
}
