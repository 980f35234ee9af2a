use crate::error::{DsmError, DsmResult};
use ddsfile::{AlphaMode, D3D10ResourceDimension, Dds, DxgiFormat, NewDxgiParams};
use std::path::Path;

/// Write one raster layer as a single-channel R32_Float texture.
/// `data` is row-major, `height` rows of `width` samples from the top-left cell.
pub fn write_layer_dds(path: &Path, width: usize, height: usize, data: &[f32]) -> DsmResult<()> {
    if data.len() != width * height {
        return Err(DsmError::layer_shape(format!(
            "layer {} has {} samples, expected {width}x{height}",
            path.display(),
            data.len()
        )));
    }

    let mut bytes = Vec::with_capacity(data.len() * 4);
    for &value in data {
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    let params = NewDxgiParams {
        height: height as u32,
        width: width as u32,
        depth: None,
        format: DxgiFormat::R32_Float,
        mipmap_levels: Some(1),
        array_layers: Some(1),
        caps2: None,
        is_cubemap: false,
        resource_dimension: D3D10ResourceDimension::Texture2D,
        alpha_mode: AlphaMode::Unknown,
    };

    let mut dds = Dds::new_dxgi(params)?;
    dds.data = bytes;
    dds.write(&mut std::fs::File::create(path)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_round_trips_through_ddsfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hgt.dds");
        let data = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        write_layer_dds(&path, 3, 2, &data).unwrap();

        let dds = Dds::read(&mut std::fs::File::open(&path).unwrap()).unwrap();
        assert_eq!(dds.get_width(), 3);
        assert_eq!(dds.get_height(), 2);
        assert!(matches!(dds.get_dxgi_format(), Some(DxgiFormat::R32_Float)));
        let first = f32::from_le_bytes([dds.data[0], dds.data[1], dds.data[2], dds.data[3]]);
        assert_eq!(first, 1.0);
        assert_eq!(dds.data.len(), 24);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_layer_dds(&dir.path().join("x.dds"), 2, 2, &[0.0; 3]).unwrap_err();
        assert!(matches!(err, DsmError::LayerShape(_)));
    }
}
