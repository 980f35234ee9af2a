/// Columnar point cloud with colour, confidence, mask and validity columns
use crate::bounds::PointCloudBounds;
use crate::error::{DsmError, DsmResult};
use serde::{Deserialize, Serialize};

/// Cloud-level attributes carried alongside the columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudAttributes {
    /// Names of the sources that contributed points.
    pub source_names: Vec<String>,
    /// Sample type of the colour bands in the sources (e.g. "uint16").
    pub color_type: Option<String>,
    /// EPSG code of the x/y coordinates.
    pub epsg: u32,
}

/// Optional columns present in a cloud. Two clouds can only be merged when equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudSchema {
    pub n_color_bands: usize,
    pub confidence_names: Vec<String>,
    pub has_mask: bool,
}

impl CloudSchema {
    pub fn with_colors(n_color_bands: usize) -> Self {
        Self {
            n_color_bands,
            ..Self::default()
        }
    }
}

/// One row of a point cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub colors: Vec<f64>,
    pub confidences: Vec<f64>,
    pub mask: Option<f64>,
    /// False if the point sits on an epipolar tile border and may miss neighbours.
    pub is_valid: bool,
}

impl PointRecord {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            colors: Vec::new(),
            confidences: Vec::new(),
            mask: None,
            is_valid: true,
        }
    }

    pub fn with_colors(mut self, colors: &[f64]) -> Self {
        self.colors = colors.to_vec();
        self
    }

    pub fn with_confidences(mut self, confidences: &[f64]) -> Self {
        self.confidences = confidences.to_vec();
        self
    }

    pub fn with_mask(mut self, mask: f64) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn invalid(mut self) -> Self {
        self.is_valid = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    /// One column per colour band, band-major.
    pub colors: Vec<Vec<f64>>,
    /// Named confidence columns.
    pub confidences: Vec<(String, Vec<f64>)>,
    pub mask: Option<Vec<f64>>,
    pub valid: Vec<bool>,
    pub attributes: CloudAttributes,
}

impl PointCloud {
    /// Create an empty cloud with the given optional columns.
    pub fn new(epsg: u32, schema: &CloudSchema) -> Self {
        Self {
            x: Vec::new(),
            y: Vec::new(),
            z: Vec::new(),
            colors: vec![Vec::new(); schema.n_color_bands],
            confidences: schema
                .confidence_names
                .iter()
                .map(|name| (name.clone(), Vec::new()))
                .collect(),
            mask: schema.has_mask.then(Vec::new),
            valid: Vec::new(),
            attributes: CloudAttributes {
                epsg,
                ..CloudAttributes::default()
            },
        }
    }

    /// Empty cloud sharing schema and attributes with `self`.
    pub fn empty_like(&self) -> Self {
        let mut cloud = Self::new(self.attributes.epsg, &self.schema());
        cloud.attributes = self.attributes.clone();
        cloud
    }

    /// Build a cloud from records that all follow `schema`.
    pub fn from_records(
        epsg: u32,
        schema: &CloudSchema,
        records: &[PointRecord],
    ) -> DsmResult<Self> {
        let mut cloud = Self::new(epsg, schema);
        for record in records {
            cloud.push(record)?;
        }
        Ok(cloud)
    }

    pub fn schema(&self) -> CloudSchema {
        CloudSchema {
            n_color_bands: self.colors.len(),
            confidence_names: self.confidences.iter().map(|(n, _)| n.clone()).collect(),
            has_mask: self.mask.is_some(),
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Append one record, rejecting rows whose optional columns do not match.
    pub fn push(&mut self, record: &PointRecord) -> DsmResult<()> {
        if record.colors.len() != self.colors.len()
            || record.confidences.len() != self.confidences.len()
            || record.mask.is_some() != self.mask.is_some()
        {
            return Err(DsmError::configuration(format!(
                "point record does not match cloud schema ({} colour bands, {} confidences, mask: {})",
                self.colors.len(),
                self.confidences.len(),
                self.mask.is_some()
            )));
        }

        self.x.push(record.x);
        self.y.push(record.y);
        self.z.push(record.z);
        for (band, value) in self.colors.iter_mut().zip(&record.colors) {
            band.push(*value);
        }
        for ((_, column), value) in self.confidences.iter_mut().zip(&record.confidences) {
            column.push(*value);
        }
        if let (Some(mask), Some(value)) = (self.mask.as_mut(), record.mask) {
            mask.push(value);
        }
        self.valid.push(record.is_valid);
        Ok(())
    }

    /// Copy row `index` of `other`, which must share this cloud's schema.
    pub fn push_from(&mut self, other: &PointCloud, index: usize) {
        self.x.push(other.x[index]);
        self.y.push(other.y[index]);
        self.z.push(other.z[index]);
        for (band, source) in self.colors.iter_mut().zip(&other.colors) {
            band.push(source[index]);
        }
        for ((_, column), (_, source)) in self.confidences.iter_mut().zip(&other.confidences) {
            column.push(source[index]);
        }
        if let (Some(mask), Some(source)) = (self.mask.as_mut(), other.mask.as_ref()) {
            mask.push(source[index]);
        }
        self.valid.push(other.valid[index]);
    }

    pub fn record(&self, index: usize) -> PointRecord {
        PointRecord {
            x: self.x[index],
            y: self.y[index],
            z: self.z[index],
            colors: self.colors.iter().map(|band| band[index]).collect(),
            confidences: self.confidences.iter().map(|(_, c)| c[index]).collect(),
            mask: self.mask.as_ref().map(|m| m[index]),
            is_valid: self.valid[index],
        }
    }

    /// Keep the rows whose `keep` flag is set. Removed rows are gone for good.
    pub fn retain_mask(&self, keep: &[bool]) -> PointCloud {
        let mut out = self.empty_like();
        for (index, _) in keep.iter().enumerate().filter(|(_, k)| **k) {
            out.push_from(self, index);
        }
        out
    }

    /// Planimetric and height bounds over finite points, `None` if there are none.
    pub fn bounds(&self) -> Option<PointCloudBounds> {
        let mut bounds = PointCloudBounds::new();
        let mut any = false;
        for i in 0..self.len() {
            let (x, y, z) = (self.x[i], self.y[i], self.z[i]);
            if x.is_finite() && y.is_finite() {
                bounds.update(x, y, z);
                any = true;
            }
        }
        any.then_some(bounds)
    }
}

/// A named upstream source: one point cloud per input file or epipolar pair.
#[derive(Debug, Clone)]
pub struct NamedSource {
    pub name: String,
    pub cloud: PointCloud,
}
