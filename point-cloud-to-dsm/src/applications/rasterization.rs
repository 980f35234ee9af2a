/// Rasterization application: gaussian splatting of tile clouds onto the terrain grid
use super::{RASTERIZATION_APPLICATION, TileStage, method_of, parse_params, save_intermediate_data_of};
use crate::constants::{
    DEFAULT_COLOR_NO_DATA, DEFAULT_DSM_NO_DATA, DEFAULT_MSK_NO_DATA, DEFAULT_RADIUS,
    DEFAULT_RESOLUTION,
};
use crate::dataset::{NoDataValues, RasterDataset};
use crate::diagnostics::DiagnosticSink;
use crate::error::{DsmError, DsmResult};
use crate::grid::GridWindow;
use crate::point_cloud::PointCloud;
use crate::rasterizer::{RasterParams, rasterize};
use crate::tile_sizing::tile_width_from_memory;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const SIMPLE_GAUSSIAN: &str = "simple_gaussian";

/// Point bucket plus every per-cell accumulator, amortised per point.
const RASTERIZATION_BYTES_PER_POINT: f64 = 320.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimpleGaussianParams {
    pub resolution: f64,
    /// Defaults to `resolution`.
    pub sigma: Option<f64>,
    /// Search radius in cells.
    pub radius: usize,
    pub dsm_no_data: f64,
    pub color_no_data: f64,
    pub msk_no_data: f64,
    pub list_computed_layers: Option<Vec<String>>,
}

impl Default for SimpleGaussianParams {
    fn default() -> Self {
        Self {
            resolution: DEFAULT_RESOLUTION,
            sigma: None,
            radius: DEFAULT_RADIUS,
            dsm_no_data: DEFAULT_DSM_NO_DATA,
            color_no_data: DEFAULT_COLOR_NO_DATA,
            msk_no_data: DEFAULT_MSK_NO_DATA,
            list_computed_layers: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimpleGaussian {
    pub params: SimpleGaussianParams,
    pub raster_params: RasterParams,
    pub no_data: NoDataValues,
    pub save_intermediate_data: bool,
}

impl SimpleGaussian {
    pub fn new(params: SimpleGaussianParams, save_intermediate_data: bool) -> DsmResult<Self> {
        let raster_params = RasterParams::new(params.resolution, params.sigma, params.radius)?;
        let no_data = NoDataValues {
            dsm: params.dsm_no_data,
            color: params.color_no_data,
            msk: params.msk_no_data,
        };
        Ok(Self {
            params,
            raster_params,
            no_data,
            save_intermediate_data,
        })
    }
}

/// Registered rasterization methods.
#[derive(Debug, Clone, PartialEq)]
pub enum RasterizationMethod {
    SimpleGaussian(SimpleGaussian),
}

impl RasterizationMethod {
    pub fn from_conf(conf: Option<&Value>) -> DsmResult<Self> {
        let method = method_of(conf, SIMPLE_GAUSSIAN)?;
        match method.as_str() {
            SIMPLE_GAUSSIAN => Ok(Self::SimpleGaussian(SimpleGaussian::new(
                parse_params(conf)?,
                save_intermediate_data_of(conf)?,
            )?)),
            _ => Err(DsmError::unknown_method(RASTERIZATION_APPLICATION, method)),
        }
    }

    pub fn get_conf(&self) -> DsmResult<Value> {
        match self {
            Self::SimpleGaussian(app) => {
                let mut conf = serde_json::to_value(&app.params)?;
                if let Value::Object(map) = &mut conf {
                    map.insert("method".to_string(), json!(SIMPLE_GAUSSIAN));
                    map.insert("sigma".to_string(), json!(app.raster_params.sigma));
                    map.insert(
                        "save_intermediate_data".to_string(),
                        json!(app.save_intermediate_data),
                    );
                }
                Ok(conf)
            }
        }
    }

    /// Ground border a tile needs so the kernel sees every neighbour of its edge cells.
    pub fn get_margins(&self) -> f64 {
        match self {
            Self::SimpleGaussian(app) => {
                app.raster_params.radius as f64 * app.raster_params.resolution
            }
        }
    }

    pub fn get_resolution(&self) -> f64 {
        match self {
            Self::SimpleGaussian(app) => app.raster_params.resolution,
        }
    }

    /// Rasterize one tile cloud on its window of the output grid. `None` when the tile has no points.
    pub fn rasterize_tile(
        &self,
        cloud: &PointCloud,
        window: &GridWindow,
        epsg: u32,
        sink: &dyn DiagnosticSink,
    ) -> DsmResult<Option<RasterDataset>> {
        match self {
            Self::SimpleGaussian(app) => rasterize(
                cloud,
                window,
                &app.raster_params,
                &app.no_data,
                epsg,
                app.params.list_computed_layers.as_deref(),
                sink,
            ),
        }
    }
}

impl TileStage for RasterizationMethod {
    fn name(&self) -> &'static str {
        RASTERIZATION_APPLICATION
    }

    fn get_optimal_tile_size(
        &self,
        max_ram_per_worker: f64,
        superposing_point_clouds: usize,
        point_cloud_resolution: f64,
    ) -> f64 {
        tile_width_from_memory(
            RASTERIZATION_BYTES_PER_POINT,
            max_ram_per_worker,
            superposing_point_clouds,
            point_cloud_resolution,
        )
    }

    fn save_intermediate_data(&self) -> bool {
        match self {
            Self::SimpleGaussian(app) => app.save_intermediate_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use crate::grid::GridFootprint;
    use crate::point_cloud::{CloudSchema, PointRecord};

    #[test]
    fn defaults_follow_resolution() {
        let app = RasterizationMethod::from_conf(Some(&json!({"resolution": 2.0}))).unwrap();
        assert_eq!(app.get_resolution(), 2.0);
        assert_eq!(app.get_margins(), 2.0);
        let conf = app.get_conf().unwrap();
        assert_eq!(conf["sigma"], 2.0);
        assert_eq!(conf["radius"], 1);
        assert_eq!(conf["method"], "simple_gaussian");
    }

    #[test]
    fn margin_is_radius_cells() {
        let conf = json!({"method": "simple_gaussian", "resolution": 0.5, "radius": 3});
        let app = RasterizationMethod::from_conf(Some(&conf)).unwrap();
        assert_eq!(app.get_margins(), 1.5);
    }

    #[test]
    fn invalid_configurations() {
        assert!(matches!(
            RasterizationMethod::from_conf(Some(&json!({"method": "idw"}))),
            Err(DsmError::UnknownApplicationMethod { .. })
        ));
        assert!(matches!(
            RasterizationMethod::from_conf(Some(&json!({"resolution": 0.0}))),
            Err(DsmError::Configuration(_))
        ));
        assert!(matches!(
            RasterizationMethod::from_conf(Some(&json!({"radius": 0}))),
            Err(DsmError::Configuration(_))
        ));
    }

    #[test]
    fn tile_rasterization_uses_configured_sentinels() {
        let conf = json!({"resolution": 1.0, "dsm_no_data": -9999.0});
        let app = RasterizationMethod::from_conf(Some(&conf)).unwrap();
        let cloud = PointCloud::from_records(
            32631,
            &CloudSchema::default(),
            &[PointRecord::new(0.5, 3.5, 12.0)],
        )
        .unwrap();
        let window = GridWindow::whole(GridFootprint {
            x_start: 0.0,
            y_start: 4.0,
            x_size: 4,
            y_size: 4,
            resolution: 1.0,
        });
        let sink = MemorySink::new();
        let raster = app
            .rasterize_tile(&cloud, &window, 32631, &sink)
            .unwrap()
            .unwrap();
        assert_eq!(raster.hgt.get(0, 0), 12.0);
        assert_eq!(raster.hgt.get(3, 3), -9999.0);

        let empty = PointCloud::new(32631, &CloudSchema::default());
        assert!(app.rasterize_tile(&empty, &window, 32631, &sink).unwrap().is_none());
    }
}
