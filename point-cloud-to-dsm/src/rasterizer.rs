/// Gaussian point-to-cell rasterization with per-cell statistics
use crate::constants::{CONFIDENCE_KEY_ROOT, POINTS_CLOUD_CONFIDENCE, POINTS_CLOUD_MSK, RASTER_MSK};
use crate::dataset::{NoDataValues, RasterDataset, create_raster_dataset};
use crate::diagnostics::DiagnosticSink;
use crate::error::{DsmError, DsmResult};
use crate::grid::{GridFootprint, GridWindow, check_resolution};
use crate::point_cloud::PointCloud;
use rayon::prelude::*;

/// Relative slack on the search disc so points exactly `radius` cells away are kept.
const DISC_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterParams {
    pub resolution: f64,
    /// Gaussian kernel width in ground units.
    pub sigma: f64,
    /// Search radius in cells.
    pub radius: usize,
}

impl RasterParams {
    /// `sigma` defaults to the resolution.
    pub fn new(resolution: f64, sigma: Option<f64>, radius: usize) -> DsmResult<Self> {
        check_resolution(resolution)?;
        let sigma = sigma.unwrap_or(resolution);
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(DsmError::configuration(format!(
                "sigma must be a positive number, got {sigma}"
            )));
        }
        if radius < 1 {
            return Err(DsmError::configuration("radius must be at least 1 cell"));
        }
        Ok(Self {
            resolution,
            sigma,
            radius,
        })
    }
}

/// Flat per-cell arrays, each of length `x_size * y_size`, row-major from the top-left cell.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRaster {
    pub footprint: GridFootprint,
    /// Gaussian-weighted value per layer: height first, then colour bands.
    pub out: Vec<Vec<f64>>,
    /// Unweighted mean per layer, same order as `out`.
    pub mean: Vec<Vec<f64>>,
    /// Unweighted population standard deviation per layer.
    pub stdev: Vec<Vec<f64>>,
    /// Points inside the search disc of the cell centre.
    pub n_pts_in_disc: Vec<u32>,
    /// Points whose coordinates fall inside the cell itself.
    pub n_pts_in_cell: Vec<u32>,
    pub mask: Option<Vec<f64>>,
    pub confidences: Vec<(String, Vec<f64>)>,
}

/// True if any entry of `list` contains `substring`.
pub fn substring_in_list<S: AsRef<str>>(list: &[S], substring: &str) -> bool {
    list.iter().any(|s| s.as_ref().contains(substring))
}

/// Confidence columns of `cloud` to rasterize given the requested layers.
fn selected_confidences(cloud: &PointCloud, list_computed_layers: Option<&[String]>) -> Vec<usize> {
    let names: Vec<&str> = cloud.confidences.iter().map(|(n, _)| n.as_str()).collect();
    let requested = list_computed_layers
        .map(|list| substring_in_list(list, CONFIDENCE_KEY_ROOT))
        .unwrap_or(true);
    if !substring_in_list(&names, CONFIDENCE_KEY_ROOT) || !requested {
        return Vec::new();
    }
    names
        .iter()
        .enumerate()
        .filter(|(_, name)| POINTS_CLOUD_CONFIDENCE.contains(name))
        .map(|(i, _)| i)
        .collect()
}

fn mask_requested(cloud: &PointCloud, list_computed_layers: Option<&[String]>) -> bool {
    cloud.mask.is_some()
        && list_computed_layers
            .map(|list| list.iter().any(|l| l == RASTER_MSK || l == POINTS_CLOUD_MSK))
            .unwrap_or(true)
}

/// Point indices bucketed by cell over the window padded by `radius` cells on each side,
/// so points in the tile margin still reach the border cells.
struct CellIndex {
    x_size: usize,
    y_size: usize,
    offsets: Vec<usize>,
    points: Vec<usize>,
}

impl CellIndex {
    fn build(cloud: &PointCloud, window: &GridWindow, radius: usize) -> Self {
        let x_size = window.x_size + 2 * radius;
        let y_size = window.y_size + 2 * radius;
        let n_cells = x_size * y_size;
        let pad = radius as i64;

        let cells: Vec<Option<usize>> = (0..cloud.len())
            .map(|k| {
                let (x, y) = (cloud.x[k], cloud.y[k]);
                if !(x.is_finite() && y.is_finite()) {
                    return None;
                }
                let (col, row) = window.locate(x, y);
                let (col, row) = (col + pad, row + pad);
                let inside = col >= 0 && row >= 0 && (col as usize) < x_size && (row as usize) < y_size;
                inside.then(|| row as usize * x_size + col as usize)
            })
            .collect();

        // Counting sort into a compressed row layout.
        let mut offsets = vec![0usize; n_cells + 1];
        for cell in cells.iter().flatten() {
            offsets[cell + 1] += 1;
        }
        for i in 0..n_cells {
            offsets[i + 1] += offsets[i];
        }
        let mut cursor = offsets.clone();
        let mut points = vec![0usize; offsets[n_cells]];
        for (k, cell) in cells.iter().enumerate() {
            if let Some(cell) = cell {
                points[cursor[*cell]] = k;
                cursor[*cell] += 1;
            }
        }

        Self {
            x_size,
            y_size,
            offsets,
            points,
        }
    }

    fn points_in(&self, col: usize, row: usize) -> &[usize] {
        let cell = row * self.x_size + col;
        &self.points[self.offsets[cell]..self.offsets[cell + 1]]
    }
}

/// Running sums for one cell: incremental weighted mean plus Welford statistics.
struct CellAccumulator {
    n: u32,
    in_cell: u32,
    any_valid: bool,
    weight_sum: f64,
    weighted: Vec<f64>,
    mean: Vec<f64>,
    m2: Vec<f64>,
    mask_max: f64,
}

impl CellAccumulator {
    fn new(n_layers: usize) -> Self {
        Self {
            n: 0,
            in_cell: 0,
            any_valid: false,
            weight_sum: 0.0,
            weighted: vec![0.0; n_layers],
            mean: vec![0.0; n_layers],
            m2: vec![0.0; n_layers],
            mask_max: f64::NAN,
        }
    }

    fn reset(&mut self) {
        self.n = 0;
        self.in_cell = 0;
        self.any_valid = false;
        self.weight_sum = 0.0;
        self.weighted.iter_mut().for_each(|v| *v = 0.0);
        self.mean.iter_mut().for_each(|v| *v = 0.0);
        self.m2.iter_mut().for_each(|v| *v = 0.0);
        self.mask_max = f64::NAN;
    }

    fn add(&mut self, values: impl Iterator<Item = f64>, weight: f64, valid: bool) {
        self.n += 1;
        self.any_valid |= valid;
        self.weight_sum += weight;
        let ratio = if self.weight_sum > 0.0 {
            weight / self.weight_sum
        } else {
            0.0
        };
        let n = self.n as f64;
        for (b, v) in values.enumerate() {
            self.weighted[b] += ratio * (v - self.weighted[b]);
            let delta = v - self.mean[b];
            self.mean[b] += delta / n;
            self.m2[b] += delta * (v - self.mean[b]);
        }
    }

    /// A cell carries values only with at least one valid contributor.
    fn has_data(&self) -> bool {
        self.n > 0 && self.any_valid
    }

    fn value(&self, b: usize) -> f64 {
        if !self.has_data() {
            f64::NAN
        } else if self.weight_sum > 0.0 {
            self.weighted[b]
        } else {
            self.mean[b]
        }
    }

    fn mean(&self, b: usize) -> f64 {
        if self.has_data() { self.mean[b] } else { f64::NAN }
    }

    fn stdev(&self, b: usize) -> f64 {
        if self.has_data() {
            (self.m2[b] / self.n as f64).max(0.0).sqrt()
        } else {
            f64::NAN
        }
    }
}

/// One raster row of results, merged into the flat arrays afterwards.
struct RowBlock {
    values: Vec<Vec<f64>>,
    mean: Vec<Vec<f64>>,
    stdev: Vec<Vec<f64>>,
    n_pts_in_disc: Vec<u32>,
    n_pts_in_cell: Vec<u32>,
    mask: Vec<f64>,
}

/// Rasterize `cloud` on the cells of `window` with a gaussian kernel.
///
/// Value layers are `[z, colour bands..., selected confidences...]`; the
/// confidences are split back out of that block before returning. Statistics
/// cover height and colour bands only.
pub fn compute_vector_raster_and_stats(
    cloud: &PointCloud,
    window: &GridWindow,
    params: &RasterParams,
    list_computed_layers: Option<&[String]>,
    sink: &dyn DiagnosticSink,
) -> VectorRaster {
    let confidence_index = selected_confidences(cloud, list_computed_layers);
    let with_mask = mask_requested(cloud, list_computed_layers);

    let mut value_columns: Vec<&[f64]> = vec![&cloud.z];
    value_columns.extend(cloud.colors.iter().map(|c| c.as_slice()));
    value_columns.extend(
        confidence_index
            .iter()
            .map(|&i| cloud.confidences[i].1.as_slice()),
    );
    let n_layers = value_columns.len();
    let n_stat_layers = 1 + cloud.colors.len();

    let index = CellIndex::build(cloud, window, params.radius);
    sink.debug(
        "rasterization",
        &format!(
            "{} of {} points indexed on a {}x{} padded grid",
            index.points.len(),
            cloud.len(),
            index.x_size,
            index.y_size
        ),
    );

    let radius = params.radius;
    let disc_radius = radius as f64 * params.resolution;
    let disc_radius_sq = disc_radius * disc_radius * (1.0 + DISC_TOLERANCE);
    let two_sigma_sq = 2.0 * params.sigma * params.sigma;

    let rows: Vec<RowBlock> = (0..window.y_size)
        .into_par_iter()
        .map(|row| {
            let mut block = RowBlock {
                values: vec![Vec::with_capacity(window.x_size); n_layers],
                mean: vec![Vec::with_capacity(window.x_size); n_stat_layers],
                stdev: vec![Vec::with_capacity(window.x_size); n_stat_layers],
                n_pts_in_disc: Vec::with_capacity(window.x_size),
                n_pts_in_cell: Vec::with_capacity(window.x_size),
                mask: Vec::new(),
            };
            let mut acc = CellAccumulator::new(n_layers);

            for col in 0..window.x_size {
                acc.reset();
                let (cx, cy) = window.cell_center(col, row);
                // Padded indices of this cell.
                let (pcol, prow) = (col + radius, row + radius);

                for nrow in prow - radius..=prow + radius {
                    for ncol in pcol - radius..=pcol + radius {
                        let same_cell = nrow == prow && ncol == pcol;
                        for &k in index.points_in(ncol, nrow) {
                            let dx = cloud.x[k] - cx;
                            let dy = cloud.y[k] - cy;
                            let d2 = dx * dx + dy * dy;
                            if d2 > disc_radius_sq {
                                continue;
                            }
                            let weight = (-d2 / two_sigma_sq).exp();
                            acc.add(value_columns.iter().map(|c| c[k]), weight, cloud.valid[k]);
                            if same_cell {
                                acc.in_cell += 1;
                            }
                            if let Some(mask) = cloud.mask.as_ref().filter(|_| with_mask) {
                                if !mask[k].is_nan() {
                                    acc.mask_max = acc.mask_max.max(mask[k]);
                                }
                            }
                        }
                    }
                }

                for b in 0..n_layers {
                    block.values[b].push(acc.value(b));
                }
                for b in 0..n_stat_layers {
                    block.mean[b].push(acc.mean(b));
                    block.stdev[b].push(acc.stdev(b));
                }
                block.n_pts_in_disc.push(acc.n);
                block.n_pts_in_cell.push(acc.in_cell);
                if with_mask {
                    block
                        .mask
                        .push(if acc.has_data() { acc.mask_max } else { f64::NAN });
                }
            }
            block
        })
        .collect();

    let n_cells = window.n_cells();
    let mut out = vec![Vec::with_capacity(n_cells); n_layers];
    let mut mean = vec![Vec::with_capacity(n_cells); n_stat_layers];
    let mut stdev = vec![Vec::with_capacity(n_cells); n_stat_layers];
    let mut n_pts_in_disc = Vec::with_capacity(n_cells);
    let mut n_pts_in_cell = Vec::with_capacity(n_cells);
    let mut mask = with_mask.then(|| Vec::with_capacity(n_cells));
    for block in rows {
        for (dst, src) in out.iter_mut().zip(block.values) {
            dst.extend(src);
        }
        for (dst, src) in mean.iter_mut().zip(block.mean) {
            dst.extend(src);
        }
        for (dst, src) in stdev.iter_mut().zip(block.stdev) {
            dst.extend(src);
        }
        n_pts_in_disc.extend(block.n_pts_in_disc);
        n_pts_in_cell.extend(block.n_pts_in_cell);
        if let Some(mask) = mask.as_mut() {
            mask.extend(block.mask);
        }
    }

    // Strip confidences out of the value block before colour handling.
    let confidence_layers = out.split_off(n_layers - confidence_index.len());
    let confidences = confidence_index
        .iter()
        .zip(confidence_layers)
        .map(|(&i, layer)| (cloud.confidences[i].0.clone(), layer))
        .collect();

    VectorRaster {
        footprint: window.footprint(),
        out,
        mean,
        stdev,
        n_pts_in_disc,
        n_pts_in_cell,
        mask,
        confidences,
    }
}

/// Rasterize a cloud into an assembled dataset.
///
/// Returns `None` when the cloud has no points at all: the tile produced nothing,
/// which is not an error.
pub fn rasterize(
    cloud: &PointCloud,
    window: &GridWindow,
    params: &RasterParams,
    no_data: &NoDataValues,
    epsg: u32,
    list_computed_layers: Option<&[String]>,
    sink: &dyn DiagnosticSink,
) -> DsmResult<Option<RasterDataset>> {
    if cloud.is_empty() {
        sink.debug("rasterization", "No points to rasterize, returning None");
        return Ok(None);
    }

    sink.debug(
        "rasterization",
        &format!(
            "Rasterization window: cells [{},{}] + [{},{}] of the output grid, resolution={}",
            window.col0,
            window.row0,
            window.x_size,
            window.y_size,
            window.resolution()
        ),
    );

    let raster = compute_vector_raster_and_stats(cloud, window, params, list_computed_layers, sink);
    create_raster_dataset(raster, no_data, epsg).map(Some)
}

/// Rasterize with a grid derived from the cloud itself when `footprint` is not given.
pub fn simple_rasterization_dataset_wrapper(
    cloud: &PointCloud,
    params: &RasterParams,
    epsg: u32,
    footprint: Option<GridFootprint>,
    no_data: &NoDataValues,
    list_computed_layers: Option<&[String]>,
    sink: &dyn DiagnosticSink,
) -> DsmResult<Option<RasterDataset>> {
    if cloud.is_empty() {
        return Ok(None);
    }
    let footprint = match footprint {
        Some(footprint) => footprint,
        None => GridFootprint::from_cloud(params.resolution, cloud, sink)?,
    };
    rasterize(
        cloud,
        &GridWindow::whole(footprint),
        params,
        no_data,
        epsg,
        list_computed_layers,
        sink,
    )
}
