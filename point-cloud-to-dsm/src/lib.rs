/// Point clouds to DSM: fusion, outlier filtering and gaussian rasterization over memory-bounded terrain tiles
pub mod applications;
pub mod bounds;
pub mod config;
pub mod constants;
pub mod coordinates;
pub mod dataset;
pub mod dds_writer;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod grid;
pub mod laz;
pub mod manifest;
pub mod pipeline;
pub mod point_cloud;
pub mod rasterizer;
pub mod spatial_index;
pub mod tile_sizing;
pub mod tiling;

pub use config::DsmConfig;
pub use dataset::{NoDataValues, RasterDataset};
pub use diagnostics::{DiagnosticSink, MemorySink, TracingSink};
pub use error::{DsmError, DsmResult};
pub use executor::{RayonExecutor, SequentialExecutor, TileExecutor};
pub use grid::GridFootprint;
pub use pipeline::{DsmPipeline, PipelineState};
pub use point_cloud::{CloudSchema, NamedSource, PointCloud, PointRecord};
