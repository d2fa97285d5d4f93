//! Measurement models.
//!
//! A [`MeasurementModel`] stores, for every vertex label, a discretized
//! probability density of observing a CT density at a signed offset along the
//! surface normal, given the angle between the normal and the scanner z axis.
//! The density grid for one label is laid out with the offset index varying
//! fastest:
//!
//! ```text
//! index = angle * n_samples * n_densities + density * n_samples + sample
//! ```
//!
//! Models are stored as YAML files:
//!
//! ```yaml
//! name: cortical bone
//! author: someone
//! creationDate: 2018-11-02 14:01:00 +0100
//! kernel:
//!   sigma: 1.0
//! sliceSpacing: 1.0
//! samplingRange: {min: -2, max: 2, stride: 0.1}
//! densityRange: {min: -1000, max: 2000, stride: 1}
//! angleRange: {min: 0, max: 90, stride: 1}
//! data:
//!   0: <base64 little-endian f64>
//!   1: <base64 little-endian f64>
//! ```
//!
//! A single base64 string under `data` is stored for label 0.

pub mod sampler;

pub use sampler::{ModelSampler, ModelSamplingPosition};

use std::collections::BTreeMap;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use serde_yaml::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::labels::Label;
use crate::range::DiscreteRange;

/// Date format of the `creationDate` key.
pub const CREATION_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Discretized measurement PDFs for each vertex label.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementModel {
    /// Optional model name.
    pub name: Option<String>,
    /// Optional free-form description.
    pub description: Option<String>,
    /// Optional author.
    pub author: Option<String>,
    /// Optional creation date, as written in the model file.
    pub creation_date: Option<String>,
    /// Standard deviation of the reconstruction kernel.
    pub kernel_sigma: f64,
    /// Distance between two CT slices.
    pub slice_spacing: f64,
    /// Offsets along the normal the model was sampled at.
    pub sampling_range: DiscreteRange,
    /// Density bins.
    pub density_range: DiscreteRange,
    /// Normal angle bins, in degrees.
    pub angle_range: DiscreteRange,
    data: BTreeMap<Label, Vec<f64>>,
}

impl Default for MeasurementModel {
    fn default() -> Self {
        Self {
            name: None,
            description: None,
            author: None,
            creation_date: None,
            kernel_sigma: 1.0,
            slice_spacing: 1.0,
            sampling_range: DiscreteRange::new(-2.0, 2.0, 0.1),
            density_range: DiscreteRange::new(-1000.0, 2000.0, 1.0),
            angle_range: DiscreteRange::new(0.0, 90.0, 1.0),
            data: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawModel {
    name: Option<String>,
    description: Option<String>,
    author: Option<String>,
    creation_date: Option<Value>,
    kernel: Option<RawKernel>,
    slice_spacing: Option<f64>,
    sampling_range: Option<DiscreteRange>,
    density_range: Option<DiscreteRange>,
    angle_range: Option<DiscreteRange>,
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawKernel {
    sigma: Option<f64>,
}

impl MeasurementModel {
    /// Create a model from ranges and per-label density grids.
    ///
    /// # Errors
    ///
    /// Returns an error if a range is invalid or a grid does not hold
    /// exactly [`MeasurementModel::grid_len`] values.
    pub fn new(
        sampling_range: DiscreteRange,
        density_range: DiscreteRange,
        angle_range: DiscreteRange,
        data: BTreeMap<Label, Vec<f64>>,
    ) -> Result<Self> {
        let model = Self {
            sampling_range,
            density_range,
            angle_range,
            data,
            ..Self::default()
        };
        model.validate()?;
        Ok(model)
    }

    /// Load a model from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let model = Self::from_yaml_str(&text).map_err(|e| match e {
            Error::Io(io) => Error::Io(io),
            other => Error::load(path, other.to_string()),
        })?;
        debug!(
            path = %path.display(),
            labels = model.label_count(),
            "loaded measurement model"
        );
        Ok(model)
    }

    /// Parse a model from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let raw: RawModel = serde_yaml::from_str(text)?;

        let kernel = raw.kernel.ok_or_else(|| missing("kernel"))?;
        let kernel_sigma = kernel.sigma.ok_or_else(|| missing("kernel.sigma"))?;
        let slice_spacing = raw.slice_spacing.ok_or_else(|| missing("sliceSpacing"))?;
        let sampling_range = raw.sampling_range.ok_or_else(|| missing("samplingRange"))?;
        let density_range = raw.density_range.ok_or_else(|| missing("densityRange"))?;
        let angle_range = raw.angle_range.ok_or_else(|| missing("angleRange"))?;
        let data_node = raw.data.ok_or_else(|| missing("data"))?;

        let creation_date = match raw.creation_date {
            Some(node) => Some(parse_creation_date(&node)?),
            None => None,
        };

        let data = match untag(&data_node) {
            Value::String(encoded) => BTreeMap::from([(0, decode_grid(encoded)?)]),
            Value::Mapping(map) => {
                let mut data = BTreeMap::new();
                for (key, value) in map {
                    let label = untag(key)
                        .as_u64()
                        .and_then(|l| Label::try_from(l).ok())
                        .ok_or_else(|| {
                            Error::parse(format!("invalid label key {:?} in 'data'", key))
                        })?;
                    let encoded = untag(value).as_str().ok_or_else(|| {
                        Error::parse(format!("data for label {} must be a base64 string", label))
                    })?;
                    data.insert(label, decode_grid(encoded)?);
                }
                data
            }
            _ => {
                return Err(Error::parse(
                    "'data' must be a base64 string or a mapping of labels",
                ))
            }
        };

        let model = Self {
            name: raw.name,
            description: raw.description,
            author: raw.author,
            creation_date,
            kernel_sigma,
            slice_spacing,
            sampling_range,
            density_range,
            angle_range,
            data,
        };
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        for (name, range) in [
            ("samplingRange", &self.sampling_range),
            ("densityRange", &self.density_range),
            ("angleRange", &self.angle_range),
        ] {
            if !range.is_valid() {
                return Err(Error::invalid_param(
                    name,
                    format!("[{}, {}] step {}", range.min, range.max, range.stride),
                    "requires finite bounds, stride > 0 and max >= min",
                ));
            }
        }
        let expected = self
            .sampling_range
            .num_elements()
            .checked_mul(self.density_range.num_elements())
            .and_then(|n| n.checked_mul(self.angle_range.num_elements()))
            .ok_or_else(|| {
                Error::invalid_param(
                    "samplingRange x densityRange x angleRange",
                    format!(
                        "{} x {} x {}",
                        self.sampling_range.num_elements(),
                        self.density_range.num_elements(),
                        self.angle_range.num_elements()
                    ),
                    "grid is too large",
                )
            })?;
        for values in self.data.values() {
            if values.len() != expected {
                return Err(Error::DimensionMismatch {
                    what: "measurement model data",
                    expected,
                    actual: values.len(),
                });
            }
        }
        Ok(())
    }

    /// Number of values in the density grid of one label.
    ///
    /// Saturates at `usize::MAX`; loaded models are checked not to.
    pub fn grid_len(&self) -> usize {
        self.sampling_range
            .num_elements()
            .saturating_mul(self.density_range.num_elements())
            .saturating_mul(self.angle_range.num_elements())
    }

    /// Whether the model holds no data.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// All labels with data, in ascending order.
    pub fn labels(&self) -> impl Iterator<Item = Label> + '_ {
        self.data.keys().copied()
    }

    /// Number of labels with data.
    #[inline]
    pub fn label_count(&self) -> usize {
        self.data.len()
    }

    /// Whether the model has data for `label`.
    #[inline]
    pub fn has_label(&self, label: Label) -> bool {
        self.data.contains_key(&label)
    }

    /// Density grid of `label`.
    pub fn data(&self, label: Label) -> Result<&[f64]> {
        self.data
            .get(&label)
            .map(Vec::as_slice)
            .ok_or(Error::UnknownLabel(label))
    }

    pub(crate) fn data_opt(&self, label: Label) -> Option<&[f64]> {
        self.data.get(&label).map(Vec::as_slice)
    }
}

fn missing(key: &str) -> Error {
    Error::parse(format!("missing '{}'", key))
}

fn untag(value: &Value) -> &Value {
    match value {
        Value::Tagged(tagged) => untag(&tagged.value),
        other => other,
    }
}

fn parse_creation_date(node: &Value) -> Result<String> {
    let text = match untag(node) {
        Value::String(s) => s.clone(),
        _ => return Err(Error::parse("'creationDate' must be a string")),
    };
    chrono::DateTime::parse_from_str(&text, CREATION_DATE_FORMAT).map_err(|e| {
        Error::parse(format!("failed to parse date '{}': {}", text, e))
    })?;
    Ok(text)
}

fn decode_grid(encoded: &str) -> Result<Vec<f64>> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64
        .decode(compact.as_bytes())
        .map_err(|e| Error::parse(format!("invalid base64 data: {}", e)))?;
    if bytes.len() % 8 != 0 {
        return Err(Error::parse(format!(
            "data length {} is not a multiple of 8",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut b = [0u8; 8];
            b.copy_from_slice(chunk);
            f64::from_le_bytes(b)
        })
        .collect())
}

/// Encode a density grid the way model files store it.
pub fn encode_grid(values: &[f64]) -> String {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    BASE64.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_yaml(data: &str) -> String {
        format!(
            "name: test\n\
             kernel:\n  sigma: 0.5\n\
             sliceSpacing: 2\n\
             samplingRange: {{min: -1, max: 1, stride: 1}}\n\
             densityRange: {{min: 0, max: 1, stride: 1}}\n\
             angleRange: {{min: 0, max: 90, stride: 90}}\n\
             {}\n",
            data
        )
    }

    #[test]
    fn test_default_model() {
        let model = MeasurementModel::default();
        assert!(model.is_empty());
        assert_eq!(model.kernel_sigma, 1.0);
        assert_eq!(model.sampling_range.num_elements(), 41);
        assert_eq!(model.grid_len(), 41 * 3001 * 91);
    }

    #[test]
    fn test_load_single_grid() {
        let grid: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let yaml = small_yaml(&format!("data: {}", encode_grid(&grid)));
        let model = MeasurementModel::from_yaml_str(&yaml).unwrap();
        assert_eq!(model.name.as_deref(), Some("test"));
        assert_eq!(model.kernel_sigma, 0.5);
        assert_eq!(model.slice_spacing, 2.0);
        assert_eq!(model.labels().collect::<Vec<_>>(), vec![0]);
        assert_eq!(model.data(0).unwrap(), grid.as_slice());
        assert!(matches!(model.data(1), Err(Error::UnknownLabel(1))));
    }

    #[test]
    fn test_load_per_label_grids() {
        let a = encode_grid(&[1.0; 12]);
        let b = encode_grid(&[2.0; 12]);
        let yaml = small_yaml(&format!("data:\n  3: {}\n  1: {}", a, b));
        let model = MeasurementModel::from_yaml_str(&yaml).unwrap();
        assert_eq!(model.labels().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(model.data(1).unwrap()[0], 2.0);
        assert_eq!(model.data(3).unwrap()[11], 1.0);
    }

    #[test]
    fn test_load_rejects_wrong_length() {
        let yaml = small_yaml(&format!("data: {}", encode_grid(&[0.0; 11])));
        assert!(matches!(
            MeasurementModel::from_yaml_str(&yaml),
            Err(Error::DimensionMismatch { expected: 12, actual: 11, .. })
        ));
    }

    #[test]
    fn test_load_missing_keys() {
        let grid = encode_grid(&[0.0; 12]);
        let full = small_yaml(&format!("data: {}", grid));
        for key in ["kernel:", "sliceSpacing:", "samplingRange:", "densityRange:", "angleRange:", "data:"] {
            let reduced: String = full
                .lines()
                .filter(|l| !l.starts_with(key) && !(key == "kernel:" && l.starts_with("  sigma")))
                .map(|l| format!("{}\n", l))
                .collect();
            let err = MeasurementModel::from_yaml_str(&reduced).unwrap_err();
            assert!(err.to_string().contains("missing"), "{}: {}", key, err);
        }
    }

    #[test]
    fn test_creation_date() {
        let grid = encode_grid(&[0.0; 12]);
        let ok = small_yaml(&format!("creationDate: 2018-11-02 14:01:00 +0100\ndata: {}", grid));
        let model = MeasurementModel::from_yaml_str(&ok).unwrap();
        assert_eq!(model.creation_date.as_deref(), Some("2018-11-02 14:01:00 +0100"));

        let bad = small_yaml(&format!("creationDate: yesterday\ndata: {}", grid));
        assert!(MeasurementModel::from_yaml_str(&bad).is_err());
    }

    #[test]
    fn test_invalid_range() {
        let result = MeasurementModel::new(
            DiscreteRange::new(1.0, -1.0, 1.0),
            DiscreteRange::new(0.0, 1.0, 1.0),
            DiscreteRange::new(0.0, 1.0, 1.0),
            BTreeMap::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_rejects_unrepresentable_ranges() {
        let grid = encode_grid(&[0.0; 12]);
        let yaml = small_yaml(&format!("data: {}", grid)).replace(
            "samplingRange: {min: -1, max: 1, stride: 1}",
            "samplingRange: {min: 0, max: 1.0e300, stride: 1.0e-300}",
        );
        let err = MeasurementModel::from_yaml_str(&yaml).unwrap_err();
        assert!(
            matches!(err, Error::InvalidParameter { name: "samplingRange", .. }),
            "{}",
            err
        );

        // each axis alone is fine, their product is not
        let huge = DiscreteRange::new(0.0, 4_194_303.0, 1.0);
        assert_eq!(huge.num_elements(), 1 << 22);
        let result = MeasurementModel::new(huge, huge, huge, BTreeMap::from([(0, vec![0.0])]));
        assert!(matches!(result, Err(Error::InvalidParameter { reason: "grid is too large", .. })));
    }

    #[test]
    fn test_malformed_data_is_a_parse_error() {
        let yaml = small_yaml("data: {x: 1}");
        assert!(matches!(MeasurementModel::from_yaml_str(&yaml), Err(Error::Parse(_))));
        let yaml = small_yaml("data: '!!!'");
        assert!(matches!(MeasurementModel::from_yaml_str(&yaml), Err(Error::Parse(_))));
        let missing = small_yaml("").replace("sliceSpacing: 2\n", "");
        assert!(matches!(MeasurementModel::from_yaml_str(&missing), Err(Error::Parse(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.yml");
        std::fs::write(&path, small_yaml(&format!("data: {}", encode_grid(&[0.5; 12])))).unwrap();
        let model = MeasurementModel::from_file(&path).unwrap();
        assert_eq!(model.label_count(), 1);
        assert!(MeasurementModel::from_file(dir.path().join("missing.yml")).is_err());
    }
}
