/// JSON run configuration: inputs, output, orchestration and application parameters
use crate::applications::{FUSION_APPLICATION, RASTERIZATION_APPLICATION};
use crate::bounds::PointCloudBounds;
use crate::constants::DEFAULT_MAX_RAM_PER_WORKER;
use crate::error::{DsmError, DsmResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const OUTLIERS_REMOVING_1: &str = "point_cloud_outliers_removing.1";
pub const OUTLIERS_REMOVING_2: &str = "point_cloud_outliers_removing.2";
pub const USED_CONF_FILE: &str = "used_conf.json";

const KNOWN_APPLICATIONS: [&str; 4] = [
    FUSION_APPLICATION,
    OUTLIERS_REMOVING_1,
    OUTLIERS_REMOVING_2,
    RASTERIZATION_APPLICATION,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DsmConfig {
    pub inputs: InputsConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Application configurations keyed by application name.
    #[serde(default)]
    pub applications: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputsConfig {
    pub point_clouds: BTreeMap<String, PointCloudInput>,
    /// `[xmin, ymin, xmax, ymax]` in the output CRS.
    #[serde(default)]
    pub roi: Option<[f64; 4]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PointCloudInput {
    pub path: PathBuf,
    pub epsg: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub out_dir: PathBuf,
    /// Defaults to the EPSG of the input clouds.
    #[serde(default)]
    pub epsg: Option<u32>,
    #[serde(default = "default_dsm_basename")]
    pub dsm_basename: String,
    #[serde(default = "default_color_basename")]
    pub color_basename: String,
}

fn default_dsm_basename() -> String {
    "dsm".to_string()
}

fn default_color_basename() -> String {
    "color".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Worker threads; all available cores when unset.
    pub nb_workers: Option<usize>,
    /// Memory budget per worker, MiB.
    pub max_ram_per_worker: f64,
    pub show_progress: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            nb_workers: None,
            max_ram_per_worker: DEFAULT_MAX_RAM_PER_WORKER,
            show_progress: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn resolved_nb_workers(&self) -> usize {
        self.nb_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Rasterize the sources directly, skipping fusion and outlier removal.
    pub no_merging: bool,
}

impl DsmConfig {
    /// Read and validate a configuration file. Relative input and output paths
    /// are resolved against the file's directory.
    pub fn from_file(path: &Path) -> DsmResult<Self> {
        let text = fs::read_to_string(path)?;
        let mut config = Self::from_json_str(&text)?;
        if let Some(dir) = path.parent() {
            config.resolve_relative_paths(dir);
        }
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> DsmResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn resolve_relative_paths(&mut self, base: &Path) {
        for input in self.inputs.point_clouds.values_mut() {
            if input.path.is_relative() {
                input.path = base.join(&input.path);
            }
        }
        if self.output.out_dir.is_relative() {
            self.output.out_dir = base.join(&self.output.out_dir);
        }
    }

    pub fn validate(&self) -> DsmResult<()> {
        if self.inputs.point_clouds.is_empty() {
            return Err(DsmError::configuration("no input point cloud given"));
        }
        if let Some([xmin, ymin, xmax, ymax]) = self.inputs.roi {
            if !(xmin < xmax && ymin < ymax) {
                return Err(DsmError::configuration(format!(
                    "roi must be [xmin, ymin, xmax, ymax] with min < max, got {:?}",
                    [xmin, ymin, xmax, ymax]
                )));
            }
        }
        if !(self.orchestrator.max_ram_per_worker > 0.0) {
            return Err(DsmError::configuration("max_ram_per_worker must be positive"));
        }
        if self.orchestrator.nb_workers == Some(0) {
            return Err(DsmError::configuration("nb_workers must be at least 1"));
        }
        for key in self.applications.keys() {
            if !KNOWN_APPLICATIONS.contains(&key.as_str()) {
                return Err(DsmError::configuration(format!("unknown application {key}")));
            }
            if self.pipeline.no_merging && key != RASTERIZATION_APPLICATION {
                return Err(DsmError::configuration(format!(
                    "application {key} is not used when no_merging is set"
                )));
            }
        }
        Ok(())
    }

    pub fn application(&self, key: &str) -> Option<&Value> {
        self.applications.get(key)
    }

    pub fn roi(&self) -> Option<PointCloudBounds> {
        self.inputs
            .roi
            .map(|[xmin, ymin, xmax, ymax]| PointCloudBounds::from_xy(xmin, ymin, xmax, ymax))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "inputs": {"point_clouds": {"left": {"path": "left.laz", "epsg": 32631}}},
        "output": {"out_dir": "out"}
    }"#;

    #[test]
    fn defaults_are_filled() {
        let config = DsmConfig::from_json_str(MINIMAL).unwrap();
        assert_eq!(config.output.dsm_basename, "dsm");
        assert_eq!(config.output.color_basename, "color");
        assert_eq!(config.output.epsg, None);
        assert_eq!(config.orchestrator.max_ram_per_worker, 2000.0);
        assert!(config.orchestrator.show_progress);
        assert!(!config.pipeline.no_merging);
        assert!(config.applications.is_empty());
        assert!(config.orchestrator.resolved_nb_workers() >= 1);
    }

    #[test]
    fn relative_paths_follow_the_config_file() {
        let mut config = DsmConfig::from_json_str(MINIMAL).unwrap();
        config.resolve_relative_paths(Path::new("/data/run"));
        assert_eq!(
            config.inputs.point_clouds["left"].path,
            PathBuf::from("/data/run/left.laz")
        );
        assert_eq!(config.output.out_dir, PathBuf::from("/data/run/out"));
    }

    #[test]
    fn unused_applications_are_rejected_without_merging() {
        let text = r#"{
            "inputs": {"point_clouds": {"a": {"path": "a.las", "epsg": 32631}}},
            "output": {"out_dir": "out"},
            "pipeline": {"no_merging": true},
            "applications": {"point_cloud_outliers_removing.1": {"method": "small_components"}}
        }"#;
        let err = DsmConfig::from_json_str(text).unwrap_err();
        assert!(err.to_string().contains("not used when no_merging"));

        let text = r#"{
            "inputs": {"point_clouds": {"a": {"path": "a.las", "epsg": 32631}}},
            "output": {"out_dir": "out"},
            "pipeline": {"no_merging": true},
            "applications": {"point_cloud_rasterization": {"resolution": 1.0}}
        }"#;
        assert!(DsmConfig::from_json_str(text).is_ok());
    }

    #[test]
    fn invalid_sections() {
        let unknown_app = r#"{
            "inputs": {"point_clouds": {"a": {"path": "a.las", "epsg": 32631}}},
            "output": {"out_dir": "out"},
            "applications": {"dense_matching": {}}
        }"#;
        assert!(matches!(
            DsmConfig::from_json_str(unknown_app),
            Err(DsmError::Configuration(_))
        ));

        let bad_roi = r#"{
            "inputs": {"point_clouds": {"a": {"path": "a.las", "epsg": 32631}}, "roi": [5, 0, 1, 1]},
            "output": {"out_dir": "out"}
        }"#;
        assert!(DsmConfig::from_json_str(bad_roi).is_err());

        let no_inputs = r#"{"inputs": {"point_clouds": {}}, "output": {"out_dir": "out"}}"#;
        assert!(DsmConfig::from_json_str(no_inputs).is_err());

        let typo = r#"{
            "inputs": {"point_clouds": {"a": {"path": "a.las", "epsg": 32631}}},
            "output": {"out_dir": "out", "epgs": 4326}
        }"#;
        assert!(matches!(DsmConfig::from_json_str(typo), Err(DsmError::Serde(_))));
    }
}
