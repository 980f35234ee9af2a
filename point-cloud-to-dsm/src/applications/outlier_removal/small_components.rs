/// Removal of spatially isolated point clusters
use crate::diagnostics::DiagnosticSink;
use crate::point_cloud::PointCloud;
use crate::spatial_index::PointTree;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const SMALL_COMPONENTS: &str = "small_components";

/// Union-find parents plus the R*-tree and neighbour lists.
pub(super) const SMALL_COMPONENTS_BYTES_PER_POINT: f64 = 240.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SmallComponentsParams {
    /// Tile border needed, in raster cells.
    pub on_ground_margin: f64,
    /// Two points closer than this (3D) belong to the same component.
    pub connection_distance: f64,
    /// Components with fewer points are removed.
    pub nb_points_threshold: usize,
}

impl Default for SmallComponentsParams {
    fn default() -> Self {
        Self {
            on_ground_margin: 11.0,
            connection_distance: 3.0,
            nb_points_threshold: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmallComponents {
    pub params: SmallComponentsParams,
    pub save_intermediate_data: bool,
}

impl SmallComponents {
    pub fn get_on_ground_margin(&self, resolution: f64) -> f64 {
        self.params.on_ground_margin * resolution
    }

    /// Drop every connected component smaller than `nb_points_threshold`.
    pub fn run_tile(&self, cloud: PointCloud, sink: &dyn DiagnosticSink) -> PointCloud {
        if cloud.is_empty() {
            return cloud;
        }
        let distance = self.params.connection_distance;
        let tree = PointTree::build(&cloud);
        let neighbours: Vec<Vec<usize>> = (0..cloud.len())
            .into_par_iter()
            .map(|i| tree.neighbours_within(&cloud, i, distance))
            .collect();

        let mut parent: Vec<usize> = (0..cloud.len()).collect();
        for (i, linked) in neighbours.iter().enumerate() {
            for &j in linked.iter().filter(|&&j| j > i) {
                uf_union(&mut parent, i, j);
            }
        }

        let mut component_size = vec![0usize; cloud.len()];
        let roots: Vec<usize> = (0..cloud.len()).map(|i| uf_find(&mut parent, i)).collect();
        for &root in &roots {
            component_size[root] += 1;
        }
        let keep: Vec<bool> = roots
            .iter()
            .map(|&root| component_size[root] >= self.params.nb_points_threshold)
            .collect();

        let filtered = cloud.retain_mask(&keep);
        sink.debug(
            "outliers",
            &format!(
                "small components removal: {} of {} points removed",
                cloud.len() - filtered.len(),
                cloud.len()
            ),
        );
        filtered
    }
}

fn uf_find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn uf_union(parent: &mut [usize], a: usize, b: usize) {
    let ra = uf_find(parent, a);
    let rb = uf_find(parent, b);
    if ra != rb {
        parent[ra] = rb;
    }
}
