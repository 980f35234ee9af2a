/// Point cloud outlier removal methods
pub mod small_components;
pub mod statistical;

use super::{
    CloudFilter, OUTLIER_REMOVAL_APPLICATION, TileStage, method_of, parse_params,
    save_intermediate_data_of,
};
use crate::diagnostics::DiagnosticSink;
use crate::error::{DsmError, DsmResult};
use crate::point_cloud::PointCloud;
use crate::tile_sizing::tile_width_from_memory;
use serde_json::{Value, json};

pub use small_components::{SMALL_COMPONENTS, SmallComponents, SmallComponentsParams};
pub use statistical::{STATISTICAL, Statistical, StatisticalParams};

/// Registered outlier removal methods.
#[derive(Debug, Clone, PartialEq)]
pub enum OutlierRemovalMethod {
    SmallComponents(SmallComponents),
    Statistical(Statistical),
}

impl OutlierRemovalMethod {
    /// Build from an application configuration, `default_method` applying when
    /// the configuration does not name one.
    pub fn from_conf(conf: Option<&Value>, default_method: &str) -> DsmResult<Self> {
        let method = method_of(conf, default_method)?;
        let save_intermediate_data = save_intermediate_data_of(conf)?;
        match method.as_str() {
            SMALL_COMPONENTS => {
                let params: SmallComponentsParams = parse_params(conf)?;
                if !(params.connection_distance > 0.0) {
                    return Err(DsmError::configuration(
                        "connection_distance must be positive",
                    ));
                }
                Ok(Self::SmallComponents(SmallComponents {
                    params,
                    save_intermediate_data,
                }))
            }
            STATISTICAL => Ok(Self::Statistical(Statistical {
                params: parse_params(conf)?,
                save_intermediate_data,
            })),
            _ => Err(DsmError::unknown_method(OUTLIER_REMOVAL_APPLICATION, method)),
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::SmallComponents(_) => SMALL_COMPONENTS,
            Self::Statistical(_) => STATISTICAL,
        }
    }

    pub fn get_conf(&self) -> DsmResult<Value> {
        let (mut conf, save) = match self {
            Self::SmallComponents(app) => {
                (serde_json::to_value(&app.params)?, app.save_intermediate_data)
            }
            Self::Statistical(app) => (serde_json::to_value(&app.params)?, app.save_intermediate_data),
        };
        if let Value::Object(map) = &mut conf {
            map.insert("method".to_string(), json!(self.method()));
            map.insert("save_intermediate_data".to_string(), json!(save));
        }
        Ok(conf)
    }
}

impl TileStage for OutlierRemovalMethod {
    fn name(&self) -> &'static str {
        OUTLIER_REMOVAL_APPLICATION
    }

    fn get_optimal_tile_size(
        &self,
        max_ram_per_worker: f64,
        superposing_point_clouds: usize,
        point_cloud_resolution: f64,
    ) -> f64 {
        let bytes_per_point = match self {
            Self::SmallComponents(_) => small_components::SMALL_COMPONENTS_BYTES_PER_POINT,
            Self::Statistical(_) => statistical::STATISTICAL_BYTES_PER_POINT,
        };
        tile_width_from_memory(
            bytes_per_point,
            max_ram_per_worker,
            superposing_point_clouds,
            point_cloud_resolution,
        )
    }

    fn save_intermediate_data(&self) -> bool {
        match self {
            Self::SmallComponents(app) => app.save_intermediate_data,
            Self::Statistical(app) => app.save_intermediate_data,
        }
    }
}

impl CloudFilter for OutlierRemovalMethod {
    fn get_on_ground_margin(&self, resolution: f64) -> f64 {
        match self {
            Self::SmallComponents(app) => app.get_on_ground_margin(resolution),
            Self::Statistical(app) => app.get_on_ground_margin(resolution),
        }
    }

    fn run_tile(&self, cloud: PointCloud, sink: &dyn DiagnosticSink) -> PointCloud {
        match self {
            Self::SmallComponents(app) => app.run_tile(cloud, sink),
            Self::Statistical(app) => app.run_tile(cloud, sink),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_selects_by_tag() {
        let first = OutlierRemovalMethod::from_conf(None, SMALL_COMPONENTS).unwrap();
        assert_eq!(first.method(), SMALL_COMPONENTS);

        let conf = json!({"method": "statistical", "k": 8, "on_ground_margin": 3});
        let second = OutlierRemovalMethod::from_conf(Some(&conf), SMALL_COMPONENTS).unwrap();
        assert_eq!(second.method(), STATISTICAL);
        assert_eq!(second.get_on_ground_margin(1.0), 3.0);

        let err = OutlierRemovalMethod::from_conf(Some(&json!({"method": "median"})), STATISTICAL)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown method \"median\" for application point_cloud_outliers_removing"
        );
    }

    #[test]
    fn bad_parameters_are_rejected() {
        let conf = json!({"method": "small_components", "connection_distance": -1.0});
        assert!(OutlierRemovalMethod::from_conf(Some(&conf), SMALL_COMPONENTS).is_err());
        let conf = json!({"method": "statistical", "neighbours": 3});
        assert!(OutlierRemovalMethod::from_conf(Some(&conf), STATISTICAL).is_err());
    }

    #[test]
    fn resolved_conf_lists_every_parameter() {
        let app = OutlierRemovalMethod::from_conf(None, STATISTICAL).unwrap();
        let conf = app.get_conf().unwrap();
        assert_eq!(conf["method"], "statistical");
        assert_eq!(conf["k"], 50);
        assert_eq!(conf["save_intermediate_data"], false);
    }
}
