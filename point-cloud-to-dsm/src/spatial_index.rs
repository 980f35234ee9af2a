/// R*-tree over the finite points of a cloud for radius and k-nearest-neighbour queries
use crate::point_cloud::PointCloud;
use rstar::RTree;
use rstar::primitives::GeomWithData;

/// A 3D position tagged with its row in the cloud.
type IndexedPoint = GeomWithData<[f64; 3], usize>;

pub struct PointTree {
    tree: RTree<IndexedPoint>,
}

fn position(cloud: &PointCloud, i: usize) -> Option<[f64; 3]> {
    let p = [cloud.x[i], cloud.y[i], cloud.z[i]];
    p.iter().all(|v| v.is_finite()).then_some(p)
}

impl PointTree {
    /// Bulk load every finite point of `cloud`; non-finite rows are left out.
    pub fn build(cloud: &PointCloud) -> Self {
        let points: Vec<IndexedPoint> = (0..cloud.len())
            .filter_map(|i| position(cloud, i).map(|p| GeomWithData::new(p, i)))
            .collect();
        Self {
            tree: RTree::bulk_load(points),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Rows within `distance` (inclusive) of row `i`, `i` itself excluded.
    pub fn neighbours_within(&self, cloud: &PointCloud, i: usize, distance: f64) -> Vec<usize> {
        let Some(query) = position(cloud, i) else {
            return Vec::new();
        };
        self.tree
            .locate_within_distance(query, distance * distance)
            .map(|p| p.data)
            .filter(|&j| j != i)
            .collect()
    }

    /// Distances from row `i` to its `k` nearest other rows, closest first.
    pub fn knn_distances(&self, cloud: &PointCloud, i: usize, k: usize) -> Vec<f64> {
        let Some(query) = position(cloud, i) else {
            return Vec::new();
        };
        self.tree
            .nearest_neighbor_iter_with_distance_2(&query)
            .filter(|(p, _)| p.data != i)
            .take(k)
            .map(|(_, d2)| d2.sqrt())
            .collect()
    }
}
