/// k-nearest-neighbour mean distance filter
use crate::diagnostics::DiagnosticSink;
use crate::point_cloud::PointCloud;
use crate::spatial_index::PointTree;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const STATISTICAL: &str = "statistical";

/// Neighbour distance lists dominate.
pub(super) const STATISTICAL_BYTES_PER_POINT: f64 = 480.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatisticalParams {
    /// Tile border needed, in raster cells.
    pub on_ground_margin: f64,
    /// Neighbours considered per point.
    pub k: usize,
    /// Points whose mean distance exceeds `mean + std_dev_factor * std` are removed.
    pub std_dev_factor: f64,
}

impl Default for StatisticalParams {
    fn default() -> Self {
        Self {
            on_ground_margin: 10.0,
            k: 50,
            std_dev_factor: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statistical {
    pub params: StatisticalParams,
    pub save_intermediate_data: bool,
}

impl Statistical {
    pub fn get_on_ground_margin(&self, resolution: f64) -> f64 {
        self.params.on_ground_margin * resolution
    }

    pub fn run_tile(&self, cloud: PointCloud, sink: &dyn DiagnosticSink) -> PointCloud {
        let k = self.params.k;
        if k == 0 || cloud.len() <= k {
            return cloud;
        }

        let tree = PointTree::build(&cloud);
        let mean_distances: Vec<Option<f64>> = (0..cloud.len())
            .into_par_iter()
            .map(|i| {
                let distances = tree.knn_distances(&cloud, i, k);
                (!distances.is_empty())
                    .then(|| distances.iter().sum::<f64>() / distances.len() as f64)
            })
            .collect();

        let known: Vec<f64> = mean_distances.iter().flatten().copied().collect();
        if known.is_empty() {
            return cloud;
        }
        let n = known.len() as f64;
        let mean = known.iter().sum::<f64>() / n;
        let std = (known.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n).sqrt();
        let threshold = mean + self.params.std_dev_factor * std;

        let keep: Vec<bool> = mean_distances
            .iter()
            .map(|d| d.is_none_or(|d| d <= threshold))
            .collect();
        let filtered = cloud.retain_mask(&keep);
        sink.debug(
            "outliers",
            &format!(
                "statistical removal: {} of {} points removed (threshold {threshold:.3})",
                cloud.len() - filtered.len(),
                cloud.len()
            ),
        );
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use crate::point_cloud::{CloudSchema, PointRecord};

    fn app(k: usize, std_dev_factor: f64) -> Statistical {
        Statistical {
            params: StatisticalParams {
                k,
                std_dev_factor,
                ..StatisticalParams::default()
            },
            save_intermediate_data: false,
        }
    }

    fn patch_with_spike() -> PointCloud {
        let mut records = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                records.push(PointRecord::new(i as f64, j as f64, 0.0));
            }
        }
        records.push(PointRecord::new(4.5, 4.5, 100.0));
        PointCloud::from_records(32631, &CloudSchema::default(), &records).unwrap()
    }

    #[test]
    fn spike_is_removed() {
        let filtered = app(4, 3.0).run_tile(patch_with_spike(), &MemorySink::new());
        assert_eq!(filtered.len(), 100);
        assert!(filtered.z.iter().all(|&z| z == 0.0));
    }

    #[test]
    fn small_cloud_is_returned_unchanged() {
        let cloud = patch_with_spike();
        let filtered = app(200, 3.0).run_tile(cloud.clone(), &MemorySink::new());
        assert_eq!(filtered, cloud);
    }

    #[test]
    fn uniform_cloud_keeps_everything() {
        let records: Vec<_> = (0..30).map(|i| PointRecord::new(i as f64, 0.0, 0.0)).collect();
        let cloud = PointCloud::from_records(32631, &CloudSchema::default(), &records).unwrap();
        // Interior and end points differ only slightly in mean distance.
        assert_eq!(app(2, 5.0).run_tile(cloud, &MemorySink::new()).len(), 30);
    }
}
