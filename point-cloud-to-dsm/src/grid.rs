/// Raster grid footprint derived from a point cloud extent
use crate::bounds::PointCloudBounds;
use crate::diagnostics::DiagnosticSink;
use crate::error::{DsmError, DsmResult};
use crate::point_cloud::PointCloud;
use serde::{Deserialize, Serialize};

/// Axis-aligned grid anchored at its top-left corner; rows grow downwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridFootprint {
    pub x_start: f64,
    pub y_start: f64,
    pub x_size: usize,
    pub y_size: usize,
    pub resolution: f64,
}

impl GridFootprint {
    /// Minimal resolution-aligned grid enclosing `[xmin, xmax] x [ymin, ymax]`.
    ///
    /// `x_start` is the aligned floor of `xmin` and `y_start` the aligned ceiling of
    /// `ymax`. A one-step correction keeps every extent corner in-bounds when the
    /// division by `resolution` rounds the wrong way.
    pub fn from_extent(
        resolution: f64,
        xmin: f64,
        xmax: f64,
        ymin: f64,
        ymax: f64,
    ) -> DsmResult<Self> {
        check_resolution(resolution)?;
        if !(xmin.is_finite() && xmax.is_finite() && ymin.is_finite() && ymax.is_finite()) {
            return Err(DsmError::empty_cloud("no finite coordinates to derive a grid from"));
        }

        // Clamp to a regular grid
        let mut x_start = (xmin / resolution).floor() * resolution;
        if x_start > xmin {
            x_start -= resolution;
        }
        let mut x_size = 1 + ((xmax - x_start) / resolution).floor() as usize;
        while x_start + x_size as f64 * resolution <= xmax {
            x_size += 1;
        }

        let mut y_start = (ymax / resolution).ceil() * resolution;
        if y_start < ymax {
            y_start += resolution;
        }
        let mut y_size = 1 + ((y_start - ymin) / resolution).floor() as usize;
        while y_start - y_size as f64 * resolution >= ymin {
            y_size += 1;
        }

        Ok(Self {
            x_start,
            y_start,
            x_size,
            y_size,
            resolution,
        })
    }

    /// Grid for every finite point of `cloud`. Fails with `EmptyCloud` when there is none.
    pub fn from_cloud(
        resolution: f64,
        cloud: &PointCloud,
        sink: &dyn DiagnosticSink,
    ) -> DsmResult<Self> {
        let bounds = cloud
            .bounds()
            .ok_or_else(|| DsmError::empty_cloud("cannot compute a grid from a cloud without points"))?;
        sink.debug(
            "grid",
            &format!(
                "Points x coordinate range: [{},{}], y coordinate range: [{},{}]",
                bounds.min_x, bounds.max_x, bounds.min_y, bounds.max_y
            ),
        );
        Self::from_bounds(resolution, &bounds)
    }

    pub fn from_bounds(resolution: f64, bounds: &PointCloudBounds) -> DsmResult<Self> {
        Self::from_extent(
            resolution,
            bounds.min_x,
            bounds.max_x,
            bounds.min_y,
            bounds.max_y,
        )
    }

    pub fn n_cells(&self) -> usize {
        self.x_size * self.y_size
    }

    pub fn cell_center(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.x_start + self.resolution * (col as f64 + 0.5),
            self.y_start - self.resolution * (row as f64 + 0.5),
        )
    }

    /// Cell-centre x coordinates, one per column.
    pub fn x_coords(&self) -> Vec<f64> {
        (0..self.x_size).map(|i| self.cell_center(i, 0).0).collect()
    }

    /// Cell-centre y coordinates, one per row (decreasing).
    pub fn y_coords(&self) -> Vec<f64> {
        (0..self.y_size).map(|j| self.cell_center(0, j).1).collect()
    }

    /// Window of this grid starting at `(col0, row0)`, clipped to the grid.
    pub fn window(&self, col0: usize, row0: usize, width: usize, height: usize) -> GridWindow {
        GridWindow {
            parent: *self,
            col0,
            row0,
            x_size: width.min(self.x_size.saturating_sub(col0)),
            y_size: height.min(self.y_size.saturating_sub(row0)),
        }
    }

    /// Ground extent covered by the cells.
    pub fn bounds(&self) -> PointCloudBounds {
        PointCloudBounds::from_xy(
            self.x_start,
            self.y_start - self.y_size as f64 * self.resolution,
            self.x_start + self.x_size as f64 * self.resolution,
            self.y_start,
        )
    }
}

/// Cells `[col0, col0 + x_size) x [row0, row0 + y_size)` of a parent grid.
///
/// Points are located against the parent origin with integer offsets, so every
/// window of the same parent puts a given point in the same cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridWindow {
    pub parent: GridFootprint,
    pub col0: usize,
    pub row0: usize,
    pub x_size: usize,
    pub y_size: usize,
}

impl GridWindow {
    /// The whole of `grid`.
    pub fn whole(grid: GridFootprint) -> Self {
        grid.window(0, 0, grid.x_size, grid.y_size)
    }

    pub fn resolution(&self) -> f64 {
        self.parent.resolution
    }

    pub fn n_cells(&self) -> usize {
        self.x_size * self.y_size
    }

    /// Footprint of the window cells alone.
    pub fn footprint(&self) -> GridFootprint {
        let res = self.parent.resolution;
        GridFootprint {
            x_start: self.parent.x_start + self.col0 as f64 * res,
            y_start: self.parent.y_start - self.row0 as f64 * res,
            x_size: self.x_size,
            y_size: self.y_size,
            resolution: res,
        }
    }

    /// Window column/row of the cell holding `(x, y)`; negative or past the
    /// window size for points outside it.
    pub fn locate(&self, x: f64, y: f64) -> (i64, i64) {
        let res = self.parent.resolution;
        let col = ((x - self.parent.x_start) / res).floor() as i64;
        let row = ((self.parent.y_start - y) / res).floor() as i64;
        (col - self.col0 as i64, row - self.row0 as i64)
    }

    pub fn cell_center(&self, col: usize, row: usize) -> (f64, f64) {
        self.parent.cell_center(self.col0 + col, self.row0 + row)
    }

    pub fn bounds(&self) -> PointCloudBounds {
        self.footprint().bounds()
    }
}

pub fn check_resolution(resolution: f64) -> DsmResult<()> {
    if resolution.is_finite() && resolution > 0.0 {
        Ok(())
    } else {
        Err(DsmError::configuration(format!(
            "resolution must be a positive number, got {resolution}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use crate::point_cloud::{CloudSchema, PointRecord};

    fn cloud(points: &[(f64, f64)]) -> PointCloud {
        let records: Vec<_> = points
            .iter()
            .map(|&(x, y)| PointRecord::new(x, y, 0.0))
            .collect();
        PointCloud::from_records(32631, &CloudSchema::default(), &records).unwrap()
    }

    #[test]
    fn aligned_floor_and_ceiling() {
        let grid = GridFootprint::from_cloud(
            0.5,
            &cloud(&[(10.2, 20.1), (11.9, 21.3)]),
            &MemorySink::new(),
        )
        .unwrap();
        assert_eq!(grid.x_start, 10.0);
        assert_eq!(grid.y_start, 21.5);
        assert_eq!(grid.x_size, 4);
        assert_eq!(grid.y_size, 3);
        assert_eq!(GridWindow::whole(grid).locate(10.2, 20.1), (0, 2));
        assert_eq!(GridWindow::whole(grid).locate(11.9, 21.3), (3, 0));
    }

    #[test]
    fn single_point_gives_single_cell() {
        let grid =
            GridFootprint::from_cloud(1.0, &cloud(&[(3.5, 7.5)]), &MemorySink::new()).unwrap();
        assert_eq!((grid.x_size, grid.y_size), (1, 1));
        assert_eq!(grid.cell_center(0, 0), (3.5, 7.5));
    }

    #[test]
    fn point_on_grid_line_stays_in_bounds() {
        // xmax sits exactly on a cell edge: it belongs to a new column.
        let grid =
            GridFootprint::from_cloud(1.0, &cloud(&[(0.0, 0.0), (2.0, 2.0)]), &MemorySink::new())
                .unwrap();
        assert_eq!((grid.x_start, grid.y_start), (0.0, 2.0));
        assert_eq!((grid.x_size, grid.y_size), (3, 3));
        assert_eq!(GridWindow::whole(grid).locate(2.0, 0.0), (2, 2));
    }

    #[test]
    fn empty_cloud_is_an_error() {
        let err = GridFootprint::from_cloud(1.0, &cloud(&[]), &MemorySink::new()).unwrap_err();
        assert!(matches!(err, DsmError::EmptyCloud(_)));
    }

    #[test]
    fn non_positive_resolution_is_rejected() {
        let err = GridFootprint::from_extent(0.0, 0.0, 1.0, 0.0, 1.0).unwrap_err();
        assert!(matches!(err, DsmError::Configuration(_)));
    }

    #[test]
    fn cell_centre_axes() {
        let grid = GridFootprint {
            x_start: 100.0,
            y_start: 50.0,
            x_size: 3,
            y_size: 2,
            resolution: 2.0,
        };
        assert_eq!(grid.x_coords(), vec![101.0, 103.0, 105.0]);
        assert_eq!(grid.y_coords(), vec![49.0, 47.0]);

        let window = grid.window(2, 1, 4, 4).footprint();
        assert_eq!((window.x_start, window.y_start), (104.0, 48.0));
        assert_eq!((window.x_size, window.y_size), (1, 1));
    }

    #[test]
    fn windows_agree_on_edge_points() {
        let grid = GridFootprint::from_extent(0.1, 0.0, 29.9, 0.0, 29.9).unwrap();
        let whole = GridWindow::whole(grid);
        for col0 in [0, 7, 13, 150, 299] {
            let window = grid.window(col0, col0, 10, 10);
            for i in 0..300 {
                // Every lattice point sits on a cell edge.
                let x = i as f64 * 0.1;
                let (gc, gr) = whole.locate(x, x);
                let (wc, wr) = window.locate(x, x);
                assert_eq!((wc + col0 as i64, wr + col0 as i64), (gc, gr), "x = {x}");
            }
        }
    }
}
