/// Output raster dataset assembly: reshaping, no-data substitution, naming and merging
use crate::constants::{
    DEFAULT_COLOR_NO_DATA, DEFAULT_DSM_NO_DATA, DEFAULT_MSK_NO_DATA, RASTER_BAND_MEAN,
    RASTER_BAND_STD_DEV, RASTER_COLOR_IMG, RASTER_HGT, RASTER_HGT_MEAN, RASTER_HGT_STD_DEV,
    RASTER_MSK, RASTER_NB_PTS, RASTER_NB_PTS_IN_CELL,
};
use crate::error::{DsmError, DsmResult};
use crate::grid::GridFootprint;
use crate::rasterizer::VectorRaster;
use serde::{Deserialize, Serialize};

/// Row-major 2D array of `height` rows by `width` columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid2<T> {
    pub width: usize,
    pub height: usize,
    data: Vec<T>,
}

impl<T: Copy> Grid2<T> {
    /// Reshape a flat array of `width * height` cells, first row first.
    pub fn from_flat(data: Vec<T>, width: usize, height: usize) -> DsmResult<Self> {
        if data.len() != width * height {
            return Err(DsmError::layer_shape(format!(
                "{} cells cannot fill a {width}x{height} grid",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn filled(value: T, width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    pub fn get(&self, col: usize, row: usize) -> T {
        self.data[row * self.width + col]
    }

    pub fn row(&self, row: usize) -> &[T] {
        &self.data[row * self.width..(row + 1) * self.width]
    }

    pub fn as_flat(&self) -> &[T] {
        &self.data
    }

    pub fn into_flat(self) -> Vec<T> {
        self.data
    }

    /// Copy `other` in with its top-left cell at `(col0, row0)`, clipping what overflows.
    pub fn paste(&mut self, other: &Grid2<T>, col0: usize, row0: usize) {
        let width = other.width.min(self.width.saturating_sub(col0));
        for row in 0..other.height.min(self.height.saturating_sub(row0)) {
            let dst = (row0 + row) * self.width + col0;
            self.data[dst..dst + width].copy_from_slice(&other.row(row)[..width]);
        }
    }
}

/// No-data sentinels per layer category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoDataValues {
    pub dsm: f64,
    pub color: f64,
    pub msk: f64,
}

impl Default for NoDataValues {
    fn default() -> Self {
        Self {
            dsm: DEFAULT_DSM_NO_DATA,
            color: DEFAULT_COLOR_NO_DATA,
            msk: DEFAULT_MSK_NO_DATA,
        }
    }
}

fn nan_to_num(values: Vec<f64>, no_data: f64, footprint: &GridFootprint) -> DsmResult<Grid2<f64>> {
    let values = values
        .into_iter()
        .map(|v| if v.is_nan() { no_data } else { v })
        .collect();
    Grid2::from_flat(values, footprint.x_size, footprint.y_size)
}

/// Terminal raster artifact: every layer shares the `(y_size, x_size)` footprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterDataset {
    pub footprint: GridFootprint,
    pub epsg: u32,
    pub resolution: f64,
    /// Cell-centre x coordinate per column.
    pub x: Vec<f64>,
    /// Cell-centre y coordinate per row.
    pub y: Vec<f64>,
    pub hgt: Grid2<f64>,
    /// Colour bands, band axis first (band `i` is layer `i + 1`).
    pub color: Vec<Grid2<f64>>,
    pub hgt_mean: Grid2<f64>,
    pub hgt_stdev: Grid2<f64>,
    pub band_mean: Vec<Grid2<f64>>,
    pub band_stdev: Vec<Grid2<f64>>,
    pub n_pts: Grid2<u32>,
    pub pts_in_cell: Grid2<u32>,
    pub msk: Option<Grid2<f64>>,
    pub confidences: Vec<(String, Grid2<f64>)>,
    pub no_data: NoDataValues,
}

/// Borrowed view of one named layer.
#[derive(Debug, Clone, Copy)]
pub enum LayerData<'a> {
    Values(&'a Grid2<f64>),
    Counts(&'a Grid2<u32>),
}

impl LayerData<'_> {
    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            LayerData::Values(grid) => grid.as_flat().iter().map(|v| *v as f32).collect(),
            LayerData::Counts(grid) => grid.as_flat().iter().map(|v| *v as f32).collect(),
        }
    }
}

/// Turn the flat rasterizer arrays into the named, sentinel-filled dataset.
pub fn create_raster_dataset(
    raster: VectorRaster,
    no_data: &NoDataValues,
    epsg: u32,
) -> DsmResult<RasterDataset> {
    let footprint = raster.footprint;
    let mut out = raster.out.into_iter();
    let mut mean = raster.mean.into_iter();
    let mut stdev = raster.stdev.into_iter();

    let hgt = nan_to_num(out.next().unwrap_or_default(), no_data.dsm, &footprint)?;
    let color = out
        .map(|band| nan_to_num(band, no_data.color, &footprint))
        .collect::<DsmResult<_>>()?;

    // Statistics layers for height output, then one pair per colour band.
    let hgt_mean = nan_to_num(mean.next().unwrap_or_default(), no_data.dsm, &footprint)?;
    let hgt_stdev = nan_to_num(stdev.next().unwrap_or_default(), no_data.dsm, &footprint)?;
    let band_mean = mean
        .map(|band| nan_to_num(band, no_data.color, &footprint))
        .collect::<DsmResult<_>>()?;
    let band_stdev = stdev
        .map(|band| nan_to_num(band, no_data.color, &footprint))
        .collect::<DsmResult<_>>()?;

    Ok(RasterDataset {
        footprint,
        epsg,
        resolution: footprint.resolution,
        x: footprint.x_coords(),
        y: footprint.y_coords(),
        hgt,
        color,
        hgt_mean,
        hgt_stdev,
        band_mean,
        band_stdev,
        n_pts: Grid2::from_flat(raster.n_pts_in_disc, footprint.x_size, footprint.y_size)?,
        pts_in_cell: Grid2::from_flat(raster.n_pts_in_cell, footprint.x_size, footprint.y_size)?,
        msk: raster
            .mask
            .map(|mask| nan_to_num(mask, no_data.msk, &footprint))
            .transpose()?,
        confidences: raster
            .confidences
            .into_iter()
            .map(|(name, layer)| Ok((name, nan_to_num(layer, no_data.dsm, &footprint)?)))
            .collect::<DsmResult<_>>()?,
        no_data: *no_data,
    })
}

impl RasterDataset {
    /// Dataset covering `footprint` where every cell holds its layer's sentinel.
    pub fn blank(
        footprint: GridFootprint,
        epsg: u32,
        no_data: NoDataValues,
        n_bands: usize,
        confidence_names: &[String],
        with_mask: bool,
    ) -> Self {
        let (w, h) = (footprint.x_size, footprint.y_size);
        Self {
            footprint,
            epsg,
            resolution: footprint.resolution,
            x: footprint.x_coords(),
            y: footprint.y_coords(),
            hgt: Grid2::filled(no_data.dsm, w, h),
            color: vec![Grid2::filled(no_data.color, w, h); n_bands],
            hgt_mean: Grid2::filled(no_data.dsm, w, h),
            hgt_stdev: Grid2::filled(no_data.dsm, w, h),
            band_mean: vec![Grid2::filled(no_data.color, w, h); n_bands],
            band_stdev: vec![Grid2::filled(no_data.color, w, h); n_bands],
            n_pts: Grid2::filled(0, w, h),
            pts_in_cell: Grid2::filled(0, w, h),
            msk: with_mask.then(|| Grid2::filled(no_data.msk, w, h)),
            confidences: confidence_names
                .iter()
                .map(|name| (name.clone(), Grid2::filled(no_data.dsm, w, h)))
                .collect(),
            no_data,
        }
    }

    /// Blank dataset on `footprint` with the same layers as `self`.
    pub fn blank_like(&self, footprint: GridFootprint) -> Self {
        let names: Vec<String> = self.confidences.iter().map(|(n, _)| n.clone()).collect();
        Self::blank(
            footprint,
            self.epsg,
            self.no_data,
            self.color.len(),
            &names,
            self.msk.is_some(),
        )
    }

    /// Place a tile dataset with its top-left cell at `(col0, row0)` of this (larger) dataset.
    ///
    /// Tiles do not overlap once margins are trimmed, so placement is a plain copy.
    /// Layers the tile does not carry are left untouched.
    pub fn paste(&mut self, tile: &RasterDataset, col0: usize, row0: usize) {
        self.hgt.paste(&tile.hgt, col0, row0);
        self.hgt_mean.paste(&tile.hgt_mean, col0, row0);
        self.hgt_stdev.paste(&tile.hgt_stdev, col0, row0);
        for (dst, src) in self.color.iter_mut().zip(&tile.color) {
            dst.paste(src, col0, row0);
        }
        for (dst, src) in self.band_mean.iter_mut().zip(&tile.band_mean) {
            dst.paste(src, col0, row0);
        }
        for (dst, src) in self.band_stdev.iter_mut().zip(&tile.band_stdev) {
            dst.paste(src, col0, row0);
        }
        self.n_pts.paste(&tile.n_pts, col0, row0);
        self.pts_in_cell.paste(&tile.pts_in_cell, col0, row0);
        if let (Some(dst), Some(src)) = (self.msk.as_mut(), tile.msk.as_ref()) {
            dst.paste(src, col0, row0);
        }
        for (name, dst) in self.confidences.iter_mut() {
            if let Some((_, src)) = tile.confidences.iter().find(|(n, _)| n == name) {
                dst.paste(src, col0, row0);
            }
        }
    }

    /// Every layer with its output name, in file order.
    pub fn named_layers(&self) -> Vec<(String, LayerData<'_>)> {
        let mut layers = vec![(RASTER_HGT.to_string(), LayerData::Values(&self.hgt))];
        for (i, band) in self.color.iter().enumerate() {
            layers.push((format!("{RASTER_COLOR_IMG}{}", i + 1), LayerData::Values(band)));
        }
        layers.push((RASTER_HGT_MEAN.to_string(), LayerData::Values(&self.hgt_mean)));
        layers.push((RASTER_HGT_STD_DEV.to_string(), LayerData::Values(&self.hgt_stdev)));
        for (i, (mean, stdev)) in self.band_mean.iter().zip(&self.band_stdev).enumerate() {
            layers.push((format!("{RASTER_BAND_MEAN}{}", i + 1), LayerData::Values(mean)));
            layers.push((format!("{RASTER_BAND_STD_DEV}{}", i + 1), LayerData::Values(stdev)));
        }
        layers.push((RASTER_NB_PTS.to_string(), LayerData::Counts(&self.n_pts)));
        layers.push((RASTER_NB_PTS_IN_CELL.to_string(), LayerData::Counts(&self.pts_in_cell)));
        if let Some(msk) = &self.msk {
            layers.push((RASTER_MSK.to_string(), LayerData::Values(msk)));
        }
        for (name, grid) in &self.confidences {
            layers.push((name.clone(), LayerData::Values(grid)));
        }
        layers
    }
}
