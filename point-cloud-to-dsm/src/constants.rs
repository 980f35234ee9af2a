/// Shared names and defaults for point cloud rasterization

/// Mask column name, also accepted as a requested layer
pub const POINTS_CLOUD_MSK: &str = "mask";

/// Substring that marks a column or requested layer as a confidence layer
pub const CONFIDENCE_KEY_ROOT: &str = "confidence_from";

/// Confidence columns the rasterizer recognises
pub const POINTS_CLOUD_CONFIDENCE: &[&str] = &[
    "confidence_from_ambiguity",
    "confidence_from_intensity_std",
    "confidence_from_risk_min",
    "confidence_from_risk_max",
    "confidence_from_interval_bounds_inf",
    "confidence_from_interval_bounds_sup",
];

/// Output raster layer names
pub const RASTER_HGT: &str = "hgt";
pub const RASTER_COLOR_IMG: &str = "img";
pub const RASTER_HGT_MEAN: &str = "hgt_mean";
pub const RASTER_HGT_STD_DEV: &str = "hgt_stdev";
pub const RASTER_BAND_MEAN: &str = "band_mean";
pub const RASTER_BAND_STD_DEV: &str = "band_stdev";
pub const RASTER_NB_PTS: &str = "n_pts";
pub const RASTER_NB_PTS_IN_CELL: &str = "pts_in_cell";
pub const RASTER_MSK: &str = "msk";

/// Default no-data sentinels per layer category
pub const DEFAULT_DSM_NO_DATA: f64 = -32768.0;
pub const DEFAULT_COLOR_NO_DATA: f64 = 0.0;
pub const DEFAULT_MSK_NO_DATA: f64 = 65535.0;

/// Default rasterization parameters
pub const DEFAULT_RESOLUTION: f64 = 0.5;
pub const DEFAULT_RADIUS: usize = 1;

/// Coarsest resolution accepted without warning for a geographic output CRS (degrees)
pub const GEOGRAPHIC_RESOLUTION_THRESHOLD: f64 = 10e-3;

/// Default memory budget per worker (MiB)
pub const DEFAULT_MAX_RAM_PER_WORKER: f64 = 2000.0;

/// Memory reserved per worker for libraries and tile bookkeeping (MiB)
pub const WORKER_FIXED_OVERHEAD_MIB: f64 = 200.0;

/// Spherical mercator earth radius (metres)
pub const EARTH_RADIUS: f64 = 6_378_137.0;
