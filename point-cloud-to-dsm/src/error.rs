/// Error taxonomy shared by every pipeline stage.
pub type DsmResult<T> = Result<T, DsmError>;

#[derive(thiserror::Error, Debug)]
pub enum DsmError {
    /// No points to derive an extent from or to rasterize.
    /// Tile-local: the sequencer turns it into "no output for this tile".
    #[error("empty cloud: {0}")]
    EmptyCloud(String),

    /// Invalid resolution, tile size or CRS combination. Fatal before tile work starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A stage method name that no implementation answers to.
    #[error("unknown method {method:?} for application {application}")]
    UnknownApplicationMethod { application: String, method: String },

    /// A flat layer whose length does not match the grid it is placed on.
    #[error("layer shape mismatch: {0}")]
    LayerShape(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("las error: {0}")]
    Las(#[from] las::Error),

    #[error("dds error: {0}")]
    Dds(#[from] ddsfile::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl DsmError {
    pub fn empty_cloud(msg: impl Into<String>) -> Self {
        Self::EmptyCloud(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn layer_shape(msg: impl Into<String>) -> Self {
        Self::LayerShape(msg.into())
    }

    pub fn unknown_method(application: impl Into<String>, method: impl Into<String>) -> Self {
        Self::UnknownApplicationMethod {
            application: application.into(),
            method: method.into(),
        }
    }

    /// True for errors that only mean "this tile has nothing to produce".
    pub fn is_tile_skip(&self) -> bool {
        matches!(self, Self::EmptyCloud(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            DsmError::empty_cloud("x")
                .to_string()
                .starts_with("empty cloud:")
        );
        assert!(
            DsmError::configuration("x")
                .to_string()
                .starts_with("configuration error:")
        );
        let unknown = DsmError::unknown_method("point_cloud_rasterization", "nearest");
        assert!(unknown.to_string().contains("\"nearest\""));
        assert!(unknown.to_string().contains("point_cloud_rasterization"));
    }

    #[test]
    fn only_empty_cloud_is_a_tile_skip() {
        assert!(DsmError::empty_cloud("tile").is_tile_skip());
        assert!(!DsmError::configuration("bad").is_tile_skip());
        assert!(!DsmError::layer_shape("3 of 4").is_tile_skip());
        let io = DsmError::from(std::io::Error::other("boom"));
        assert!(!io.is_tile_skip());
        assert!(io.to_string().contains("boom"));
    }
}
