use point_cloud_to_dsm::diagnostics::MemorySink;
use point_cloud_to_dsm::grid::GridWindow;
use point_cloud_to_dsm::rasterizer::{RasterParams, simple_rasterization_dataset_wrapper};
use point_cloud_to_dsm::{
    CloudSchema, DsmError, GridFootprint, NoDataValues, PointCloud, PointRecord,
};
use proptest::prelude::*;

fn cloud_of(points: &[(f64, f64)]) -> PointCloud {
    let records: Vec<_> = points.iter().map(|&(x, y)| PointRecord::new(x, y, 1.0)).collect();
    PointCloud::from_records(32631, &CloudSchema::default(), &records).unwrap()
}

proptest! {
    #[test]
    fn every_point_lies_inside_the_grid(
        resolution in 0.01f64..10.0,
        points in prop::collection::vec((-5000.0f64..5000.0, -5000.0f64..5000.0), 1..40),
    ) {
        let cloud = cloud_of(&points);
        let grid = GridFootprint::from_cloud(resolution, &cloud, &MemorySink::new()).unwrap();
        let xmin = points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
        let xmax = points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
        let ymin = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
        let ymax = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);

        prop_assert!(grid.x_size >= 1 && grid.y_size >= 1);
        prop_assert!(grid.x_start <= xmin);
        prop_assert!(xmax < grid.x_start + grid.x_size as f64 * resolution);
        prop_assert!(ymax <= grid.y_start);
        prop_assert!(grid.y_start - grid.y_size as f64 * resolution < ymin);

        let whole = GridWindow::whole(grid);
        for &(x, y) in &points {
            let (col, row) = whole.locate(x, y);
            prop_assert!(col >= 0 && (col as usize) < grid.x_size);
            prop_assert!(row >= 0 && (row as usize) < grid.y_size);
        }
    }

    #[test]
    fn grid_is_minimal_and_aligned(
        resolution in 0.1f64..5.0,
        x in -1000.0f64..1000.0,
        y in -1000.0f64..1000.0,
        w in 0.0f64..100.0,
        h in 0.0f64..100.0,
    ) {
        let grid = GridFootprint::from_extent(resolution, x, x + w, y, y + h).unwrap();
        // The origin sits on the resolution lattice.
        prop_assert!(((grid.x_start / resolution) - (grid.x_start / resolution).round()).abs() < 1e-6);
        prop_assert!(((grid.y_start / resolution) - (grid.y_start / resolution).round()).abs() < 1e-6);
        // One cell less on either axis would drop the extent's far side.
        prop_assert!(grid.x_size as f64 <= w / resolution + 2.0);
        prop_assert!(grid.y_size as f64 <= h / resolution + 2.0);
    }
}

#[test]
fn documented_formulas() {
    let grid = GridFootprint::from_extent(0.5, 0.3, 2.2, -1.1, 0.9).unwrap();
    assert_eq!(grid.x_start, 0.0);
    assert_eq!(grid.x_size, 5);
    assert_eq!(grid.y_start, 1.0);
    assert_eq!(grid.y_size, 5);
}

#[test]
fn empty_cloud_raises_and_rasterizes_to_nothing() {
    let sink = MemorySink::new();
    let empty = PointCloud::new(32631, &CloudSchema::default());
    assert!(matches!(
        GridFootprint::from_cloud(1.0, &empty, &sink),
        Err(DsmError::EmptyCloud(_))
    ));

    let params = RasterParams::new(1.0, None, 1).unwrap();
    let out = simple_rasterization_dataset_wrapper(
        &empty,
        &params,
        32631,
        None,
        &NoDataValues::default(),
        None,
        &sink,
    )
    .unwrap();
    assert!(out.is_none());
}

#[test]
fn non_positive_resolution_is_a_configuration_error() {
    let cloud = cloud_of(&[(0.0, 0.0)]);
    let err = GridFootprint::from_cloud(0.0, &cloud, &MemorySink::new()).unwrap_err();
    assert!(matches!(err, DsmError::Configuration(_)));
}
