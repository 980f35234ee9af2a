use crate::error::DsmResult;
use crate::point_cloud::{CloudSchema, NamedSource, PointCloud};
use indicatif::{ProgressBar, ProgressStyle};
use las::Reader;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Colour sample type of LAS RGB channels.
const LAS_COLOR_TYPE: &str = "uint16";

/// Create LAS file reader for point cloud access.
/// Handles both .las and .laz compressed formats.
pub fn create_reader(file_path: &Path) -> DsmResult<Reader> {
    let file = File::open(file_path)?;
    let buf_reader = BufReader::new(file);
    Ok(Reader::new(buf_reader)?)
}

/// Load a LAS/LAZ file as a named source in `epsg`.
///
/// RGB becomes three colour bands when the point format carries colour.
/// Withheld points are kept but flagged invalid.
pub fn read_point_cloud(
    name: &str,
    file_path: &Path,
    epsg: u32,
    show_progress: bool,
) -> DsmResult<NamedSource> {
    let mut reader = create_reader(file_path)?;
    let total_points = reader.header().number_of_points() as usize;
    let has_color = reader.header().point_format().has_color;

    let schema = CloudSchema::with_colors(if has_color { 3 } else { 0 });
    let mut cloud = PointCloud::new(epsg, &schema);
    cloud.attributes.source_names = vec![name.to_string()];
    if has_color {
        cloud.attributes.color_type = Some(LAS_COLOR_TYPE.to_string());
    }
    cloud.x.reserve(total_points);
    cloud.y.reserve(total_points);
    cloud.z.reserve(total_points);
    cloud.valid.reserve(total_points);

    let pb = if show_progress {
        ProgressBar::new(total_points as u64)
    } else {
        ProgressBar::hidden()
    };
    if let Ok(style) =
        ProgressStyle::with_template("[{bar:40.cyan/blue}] {pos}/{len} points ({percent}%) {msg}")
    {
        pb.set_style(style.progress_chars("▉▊▋▌▍▎▏ "));
    }
    pb.set_message(format!("Loading {name}"));

    for (idx, point_result) in reader.points().enumerate() {
        let point = point_result?;
        cloud.x.push(point.x);
        cloud.y.push(point.y);
        cloud.z.push(point.z);
        if let Some(color) = point.color {
            for (band, value) in cloud.colors.iter_mut().zip([color.red, color.green, color.blue]) {
                band.push(f64::from(value));
            }
        } else {
            for band in cloud.colors.iter_mut() {
                band.push(0.0);
            }
        }
        cloud.valid.push(!point.is_withheld);

        if idx % 50_000 == 0 {
            pb.set_position(idx as u64);
        }
    }
    pb.finish_with_message(format!("{name} loaded"));

    Ok(NamedSource {
        name: name.to_string(),
        cloud,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DsmError;

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_point_cloud("a", &dir.path().join("absent.laz"), 32631, false).unwrap_err();
        assert!(matches!(err, DsmError::Io(_)));
    }

    #[test]
    fn garbage_is_a_las_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.las");
        std::fs::write(&path, b"not a las file").unwrap();
        let err = read_point_cloud("b", &path, 32631, false).unwrap_err();
        assert!(matches!(err, DsmError::Las(_)));
    }
}
