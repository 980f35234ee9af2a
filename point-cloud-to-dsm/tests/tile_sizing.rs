use point_cloud_to_dsm::applications::outlier_removal::{SMALL_COMPONENTS, STATISTICAL};
use point_cloud_to_dsm::applications::{
    FusionMethod, OutlierRemovalMethod, RasterizationMethod, TileStage,
};
use point_cloud_to_dsm::bounds::PointCloudBounds;
use point_cloud_to_dsm::diagnostics::MemorySink;
use point_cloud_to_dsm::tile_sizing::{DensityStats, optimal_terrain_tile_width};
use proptest::prelude::*;

struct Stages {
    fusion: FusionMethod,
    small_components: OutlierRemovalMethod,
    statistical: OutlierRemovalMethod,
    rasterization: RasterizationMethod,
}

impl Stages {
    fn defaults() -> Self {
        Self {
            fusion: FusionMethod::from_conf(None).unwrap(),
            small_components: OutlierRemovalMethod::from_conf(None, SMALL_COMPONENTS).unwrap(),
            statistical: OutlierRemovalMethod::from_conf(None, STATISTICAL).unwrap(),
            rasterization: RasterizationMethod::from_conf(None).unwrap(),
        }
    }

    fn all(&self) -> [&dyn TileStage; 4] {
        [
            &self.fusion,
            &self.small_components,
            &self.statistical,
            &self.rasterization,
        ]
    }

    fn width(&self, ram: f64, superposing: usize, spacing: f64) -> f64 {
        let terrain = PointCloudBounds::from_xy(0.0, 0.0, 1000.0, 1000.0);
        let density = DensityStats {
            average_spacing: spacing,
            max_superposing: superposing,
        };
        optimal_terrain_tile_width(
            &self.all(),
            ram,
            &density,
            &terrain,
            32631,
            32631,
            &MemorySink::new(),
        )
        .unwrap()
    }
}

proptest! {
    #[test]
    fn more_memory_never_shrinks_tiles(
        ram in 201.0f64..64_000.0,
        extra in 0.0f64..64_000.0,
        superposing in 1usize..20,
        spacing in 0.01f64..5.0,
    ) {
        let stages = Stages::defaults();
        for stage in stages.all() {
            prop_assert!(
                stage.get_optimal_tile_size(ram + extra, superposing, spacing)
                    >= stage.get_optimal_tile_size(ram, superposing, spacing)
            );
        }
        prop_assert!(stages.width(ram + extra, superposing, spacing) >= stages.width(ram, superposing, spacing));
    }

    #[test]
    fn more_superposition_never_grows_tiles(
        ram in 201.0f64..64_000.0,
        superposing in 1usize..20,
        more in 0usize..20,
        spacing in 0.01f64..5.0,
    ) {
        let stages = Stages::defaults();
        for stage in stages.all() {
            prop_assert!(
                stage.get_optimal_tile_size(ram, superposing + more, spacing)
                    <= stage.get_optimal_tile_size(ram, superposing, spacing)
            );
        }
        prop_assert!(stages.width(ram, superposing + more, spacing) <= stages.width(ram, superposing, spacing));
    }
}

#[test]
fn budget_below_overhead_is_rejected() {
    let stages = Stages::defaults();
    let terrain = PointCloudBounds::from_xy(0.0, 0.0, 1000.0, 1000.0);
    let density = DensityStats {
        average_spacing: 0.5,
        max_superposing: 1,
    };
    let result = optimal_terrain_tile_width(
        &stages.all(),
        100.0,
        &density,
        &terrain,
        32631,
        32631,
        &MemorySink::new(),
    );
    assert!(result.is_err());
}

#[test]
fn width_converted_to_output_units() {
    let stages = Stages::defaults();
    // Terrain in web mercator metres, clouds in degrees.
    let terrain = PointCloudBounds::from_xy(0.0, 0.0, 11_132.0, 11_132.0);
    let density = DensityStats {
        average_spacing: 0.000_01,
        max_superposing: 1,
    };
    let degrees = stages.all()
        .iter()
        .map(|s| s.get_optimal_tile_size(2000.0, 1, 0.000_01))
        .fold(f64::INFINITY, f64::min);
    let metres = optimal_terrain_tile_width(
        &stages.all(),
        2000.0,
        &density,
        &terrain,
        3857,
        4326,
        &MemorySink::new(),
    )
    .unwrap();
    // About 111 km per degree near the equator.
    let ratio = metres / degrees;
    assert!((ratio - 111_319.49).abs() < 50.0, "ratio {ratio}");
}
