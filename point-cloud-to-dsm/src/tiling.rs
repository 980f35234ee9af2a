/// Terrain tiles as windows of the global output grid
use crate::bounds::PointCloudBounds;
use crate::error::{DsmError, DsmResult};
use crate::grid::{GridFootprint, GridWindow};
use crate::point_cloud::{NamedSource, PointCloud};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TerrainTile {
    pub row: usize,
    pub col: usize,
    /// Cells this tile owns in the final raster.
    pub window: GridWindow,
}

impl TerrainTile {
    pub fn bounds(&self) -> PointCloudBounds {
        self.window.bounds()
    }

    /// File stem used for dump artifacts.
    pub fn label(&self) -> String {
        format!("tile_{}_{}", self.row, self.col)
    }
}

/// Split `global` into square tiles of `tile_cells` cells, row-major from the top-left.
/// Tiles on the right and bottom edges are clipped to the grid.
pub fn terrain_tiles(global: &GridFootprint, tile_cells: usize) -> Vec<TerrainTile> {
    let tile_cells = tile_cells.max(1);
    let n_rows = global.y_size.div_ceil(tile_cells);
    let n_cols = global.x_size.div_ceil(tile_cells);
    let mut tiles = Vec::with_capacity(n_rows * n_cols);
    for row in 0..n_rows {
        for col in 0..n_cols {
            tiles.push(TerrainTile {
                row,
                col,
                window: global.window(col * tile_cells, row * tile_cells, tile_cells, tile_cells),
            });
        }
    }
    tiles
}

/// Terrain extent covered by every source, restricted to `roi` when given.
pub fn terrain_bounds(
    sources: &[NamedSource],
    roi: Option<&PointCloudBounds>,
) -> DsmResult<PointCloudBounds> {
    let mut bounds = PointCloudBounds::new();
    for source in sources {
        if let Some(b) = source.cloud.bounds() {
            bounds.merge(&b);
        }
    }
    if !bounds.is_valid_xy() {
        return Err(DsmError::configuration(
            "input point clouds have no points to derive terrain bounds from",
        ));
    }
    match roi {
        None => Ok(bounds),
        Some(roi) => bounds.intersect_xy(roi).ok_or_else(|| {
            DsmError::configuration("region of interest does not intersect the input point clouds")
        }),
    }
}

/// Source rows bucketed by terrain tile, so each tile only looks at points near it.
///
/// Buckets hold candidates: every row within `margin` of a tile is in that tile's
/// bucket, plus a few rows just beyond it. Callers still test the exact extent.
#[derive(Debug, Clone)]
pub struct SourceTileIndex {
    n_cols: usize,
    /// `buckets[tile][source]`, tiles in row-major order.
    buckets: Vec<Vec<Vec<usize>>>,
}

impl SourceTileIndex {
    /// Bucket every finite point of `sources` once, against the tiling of `global`
    /// produced by [`terrain_tiles`] with the same `tile_cells`.
    pub fn build(
        sources: &[NamedSource],
        global: &GridFootprint,
        tile_cells: usize,
        margin: f64,
    ) -> Self {
        let tile_cells = tile_cells.max(1);
        let n_rows = global.y_size.div_ceil(tile_cells);
        let n_cols = global.x_size.div_ceil(tile_cells);
        let mut buckets = vec![vec![Vec::new(); sources.len()]; n_rows * n_cols];
        if buckets.is_empty() {
            return Self { n_cols, buckets };
        }

        let whole = GridWindow::whole(*global);
        // One extra cell absorbs rounding between the cell lookup and the extent test.
        let slack = (margin.max(0.0) / global.resolution).ceil() as i64 + 1;
        let tc = tile_cells as i64;
        let tile_span = |cell: i64, n_tiles: usize| -> Option<(usize, usize)> {
            let first = (cell - slack).div_euclid(tc).max(0);
            let last = (cell + slack).div_euclid(tc).min(n_tiles as i64 - 1);
            (first <= last).then_some((first as usize, last as usize))
        };

        for (s, source) in sources.iter().enumerate() {
            let cloud = &source.cloud;
            for i in 0..cloud.len() {
                let (x, y) = (cloud.x[i], cloud.y[i]);
                if !x.is_finite() || !y.is_finite() {
                    continue;
                }
                let (col, row) = whole.locate(x, y);
                let (Some((c0, c1)), Some((r0, r1))) = (tile_span(col, n_cols), tile_span(row, n_rows))
                else {
                    continue;
                };
                for r in r0..=r1 {
                    for c in c0..=c1 {
                        buckets[r * n_cols + c][s].push(i);
                    }
                }
            }
        }
        Self { n_cols, buckets }
    }

    /// Candidate rows of each source for `tile`, in source order.
    pub fn candidates(&self, tile: &TerrainTile) -> &[Vec<usize>] {
        self.buckets
            .get(tile.row * self.n_cols + tile.col)
            .map_or(&[], Vec::as_slice)
    }
}

/// Concatenate the source points lying in `tile` grown by `margin`, without fusion.
///
/// `candidates` holds, for each source, the rows worth testing against the extent.
pub fn gather_tile_points(
    sources: &[NamedSource],
    candidates: &[Vec<usize>],
    tile: &PointCloudBounds,
    margin: f64,
) -> DsmResult<PointCloud> {
    let Some(first) = sources.first() else {
        return Err(DsmError::empty_cloud("no source point cloud to gather"));
    };
    let mut out = first.cloud.empty_like();
    out.attributes.source_names.clear();
    let extent = tile.expanded(margin);
    for (source, rows) in sources.iter().zip(candidates) {
        if source.cloud.schema() != out.schema() {
            return Err(DsmError::configuration(format!(
                "source {} does not share the columns of source {}",
                source.name, first.name
            )));
        }
        let before = out.len();
        for &i in rows {
            if extent.contains_xy(source.cloud.x[i], source.cloud.y[i]) {
                out.push_from(&source.cloud, i);
            }
        }
        if out.len() > before {
            out.attributes.source_names.push(source.name.clone());
        }
    }
    Ok(out)
}
