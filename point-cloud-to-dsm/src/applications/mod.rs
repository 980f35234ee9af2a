/// Pipeline applications: point cloud fusion, outlier removal and rasterization
pub mod fusion;
pub mod outlier_removal;
pub mod rasterization;

use crate::diagnostics::DiagnosticSink;
use crate::error::{DsmError, DsmResult};
use crate::point_cloud::PointCloud;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use fusion::FusionMethod;
pub use outlier_removal::OutlierRemovalMethod;
pub use rasterization::RasterizationMethod;

pub const FUSION_APPLICATION: &str = "point_cloud_fusion";
pub const OUTLIER_REMOVAL_APPLICATION: &str = "point_cloud_outliers_removing";
pub const RASTERIZATION_APPLICATION: &str = "point_cloud_rasterization";

const SAVE_INTERMEDIATE_DATA: &str = "save_intermediate_data";

/// Capabilities every tiled stage reports to the sequencer.
pub trait TileStage: Send + Sync {
    /// Application key this stage was built for.
    fn name(&self) -> &'static str;

    /// Largest terrain tile width (cloud CRS units) processable within
    /// `max_ram_per_worker` MiB.
    fn get_optimal_tile_size(
        &self,
        max_ram_per_worker: f64,
        superposing_point_clouds: usize,
        point_cloud_resolution: f64,
    ) -> f64;

    /// Whether per-tile outputs are dumped for debugging.
    fn save_intermediate_data(&self) -> bool;
}

/// A stage that consumes a tile cloud and returns a filtered cloud with the same schema.
pub trait CloudFilter: TileStage {
    /// Border width in ground units the filter needs around each tile.
    fn get_on_ground_margin(&self, resolution: f64) -> f64;

    fn run_tile(&self, cloud: PointCloud, sink: &dyn DiagnosticSink) -> PointCloud;
}

/// Method tag of an application configuration, `default` when absent.
pub(crate) fn method_of(conf: Option<&Value>, default: &str) -> DsmResult<String> {
    match conf.and_then(|c| c.get("method")) {
        None => Ok(default.to_string()),
        Some(Value::String(method)) => Ok(method.clone()),
        Some(other) => Err(DsmError::configuration(format!(
            "application method must be a string, got {other}"
        ))),
    }
}

/// Parse method parameters, ignoring the keys shared by every application.
pub(crate) fn parse_params<T: DeserializeOwned + Default>(conf: Option<&Value>) -> DsmResult<T> {
    let Some(Value::Object(map)) = conf else {
        return Ok(T::default());
    };
    let mut map = map.clone();
    map.remove("method");
    map.remove(SAVE_INTERMEDIATE_DATA);
    Ok(serde_json::from_value(Value::Object(map))?)
}

pub(crate) fn save_intermediate_data_of(conf: Option<&Value>) -> DsmResult<bool> {
    match conf.and_then(|c| c.get(SAVE_INTERMEDIATE_DATA)) {
        None => Ok(false),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(other) => Err(DsmError::configuration(format!(
            "{SAVE_INTERMEDIATE_DATA} must be a boolean, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default, deny_unknown_fields)]
    struct Params {
        k: usize,
    }

    #[test]
    fn method_defaults_and_type_check() {
        assert_eq!(method_of(None, "statistical").unwrap(), "statistical");
        let conf = json!({"method": "small_components"});
        assert_eq!(method_of(Some(&conf), "statistical").unwrap(), "small_components");
        assert!(method_of(Some(&json!({"method": 3})), "statistical").is_err());
    }

    #[test]
    fn params_skip_method_tag() {
        let conf = json!({"method": "statistical", "k": 12, "save_intermediate_data": true});
        assert_eq!(parse_params::<Params>(Some(&conf)).unwrap(), Params { k: 12 });
        assert!(save_intermediate_data_of(Some(&conf)).unwrap());
        assert!(!save_intermediate_data_of(None).unwrap());
        assert_eq!(parse_params::<Params>(None).unwrap(), Params::default());
        assert!(parse_params::<Params>(Some(&json!({"z": 1}))).is_err());
    }
}
