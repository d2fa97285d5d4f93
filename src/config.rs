//! Fitting configuration.
//!
//! A [`Configuration`] bundles the reference mesh, the measurement model and
//! the tuning parameters of the fit. It can be built in code or loaded from a
//! YAML file:
//!
//! ```yaml
//! referenceMesh:
//!   mesh: femur.off
//!   labels: femur.labels          # or colorToLabelMap: {type: default}
//!   origin: centered              # untouched | centered | {type: absolute, xyz: [x, y, z]}
//! measurementModel: model.yml
//! sigmaE: 2.0
//! sigmaS: 2.0
//! ```
//!
//! Relative paths are resolved against the directory of the configuration
//! file.

use std::path::{Path, PathBuf};

use nalgebra::{Point3, Vector3};
use serde::Deserialize;
use serde_yaml::Value;
use tracing::info;

use crate::algo::ArapOptions;
use crate::error::{Error, Result};
use crate::io;
use crate::labels::{CustomColorMap, DefaultColorMap};
use crate::mesh::Mesh;
use crate::model::MeasurementModel;
use crate::volume::VoxelVolume;

/// Where to place the reference mesh before fitting.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Origin {
    /// Keep the mesh where it is.
    Untouched,
    /// Move the mesh centroid to the centre of the volume.
    #[default]
    Centered,
    /// Move the mesh centroid to a world position.
    Absolute(Vector3<f64>),
    /// Move the mesh centroid to a position given as a fraction of the
    /// volume's physical extent.
    Relative(Vector3<f64>),
}

impl Origin {
    /// World position the mesh centroid is moved to, if any.
    pub fn target(&self, volume: &VoxelVolume) -> Option<Point3<f64>> {
        let extent = volume.physical_extent();
        match self {
            Origin::Untouched => None,
            Origin::Centered => Some(Point3::from(extent * 0.5)),
            Origin::Absolute(xyz) => Some(Point3::from(*xyz)),
            Origin::Relative(xyz) => Some(Point3::from(xyz.component_mul(&extent))),
        }
    }

    fn from_yaml(node: &Value) -> std::result::Result<Self, String> {
        let type_name = match node {
            Value::String(s) => s.as_str(),
            Value::Mapping(_) => node
                .get("type")
                .and_then(Value::as_str)
                .ok_or("missing or invalid 'referenceMesh.origin.type'")?,
            _ => return Err("invalid 'referenceMesh.origin'".into()),
        };
        match type_name {
            "untouched" => Ok(Origin::Untouched),
            "centered" => Ok(Origin::Centered),
            "absolute" | "relative" => {
                let xyz = node
                    .get("xyz")
                    .and_then(Value::as_sequence)
                    .filter(|s| s.len() == 3)
                    .and_then(|s| {
                        let c: Option<Vec<f64>> = s.iter().map(Value::as_f64).collect();
                        c.map(|c| Vector3::new(c[0], c[1], c[2]))
                    })
                    .ok_or("missing or invalid 'referenceMesh.origin.xyz'")?;
                Ok(if type_name == "absolute" {
                    Origin::Absolute(xyz)
                } else {
                    Origin::Relative(xyz)
                })
            }
            other => Err(format!("invalid origin type '{}'", other)),
        }
    }
}

/// Everything the fitter needs besides the volume.
#[derive(Debug, Clone)]
pub struct Configuration {
    /// Measurement model.
    pub model: MeasurementModel,
    /// Labelled reference mesh.
    pub reference_mesh: Mesh,
    /// ARAP rigidity parameter; larger values allow more deformation.
    pub sigma_e: f64,
    /// Initial standard deviation of the displacement prior.
    pub sigma_s: f64,
    /// Upper bound on fitting iterations.
    pub max_iterations: usize,
    /// Iterations without improvement before the prior starts to shrink.
    pub min_non_decreasing: usize,
    /// Iterations without improvement after which the fit has converged.
    pub max_non_decreasing: usize,
    /// Factor applied to the prior variance once it starts to shrink.
    pub decay: f64,
    /// Options of the ARAP deformation step.
    pub arap: ArapOptions,
    /// Placement of the reference mesh relative to the volume.
    pub reference_mesh_origin: Origin,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            model: MeasurementModel::default(),
            reference_mesh: Mesh::default(),
            sigma_e: 2.0,
            sigma_s: 2.0,
            max_iterations: 100,
            min_non_decreasing: 10,
            max_non_decreasing: 20,
            decay: 0.9,
            arap: ArapOptions::default(),
            reference_mesh_origin: Origin::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    reference_mesh: Option<RawReferenceMesh>,
    measurement_model: Option<String>,
    sigma_e: Option<f64>,
    sigma_s: Option<f64>,
    max_iterations: Option<usize>,
    min_non_decreasing: Option<usize>,
    max_non_decreasing: Option<usize>,
    decay: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReferenceMesh {
    mesh: Option<String>,
    labels: Option<String>,
    color_to_label_map: Option<Value>,
    origin: Option<Value>,
}

impl Configuration {
    /// Create a configuration with default parameters.
    pub fn new(model: MeasurementModel, reference_mesh: Mesh) -> Self {
        Self {
            model,
            reference_mesh,
            ..Self::default()
        }
    }

    /// Set the ARAP rigidity parameter.
    pub fn with_sigma_e(mut self, sigma_e: f64) -> Self {
        self.sigma_e = sigma_e;
        self
    }

    /// Set the initial displacement prior standard deviation.
    pub fn with_sigma_s(mut self, sigma_s: f64) -> Self {
        self.sigma_s = sigma_s;
        self
    }

    /// Set the iteration limit.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the reference mesh placement.
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.reference_mesh_origin = origin;
        self
    }

    /// Check that the tuning parameters are usable.
    ///
    /// `sigmaE`, `sigmaS` and `decay` must be finite and positive, the
    /// non-decreasing iteration counts must be at least 1.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("sigmaE", self.sigma_e),
            ("sigmaS", self.sigma_s),
            ("decay", self.decay),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::invalid_param(name, value, "must be positive"));
            }
        }
        for (name, value) in [
            ("minNonDecreasing", self.min_non_decreasing),
            ("maxNonDecreasing", self.max_non_decreasing),
        ] {
            if value == 0 {
                return Err(Error::invalid_param(name, value, "must be positive"));
            }
        }
        Ok(())
    }

    /// Load a configuration, its reference mesh and its model from YAML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let raw: RawConfig =
            serde_yaml::from_str(&text).map_err(|e| Error::config(path, e.to_string()))?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));

        let ref_node = raw
            .reference_mesh
            .ok_or_else(|| Error::config(path, "missing 'referenceMesh'"))?;
        let model_file = raw
            .measurement_model
            .ok_or_else(|| Error::config(path, "missing 'measurementModel'"))?;
        let mesh_file = ref_node
            .mesh
            .ok_or_else(|| Error::config(path, "missing 'referenceMesh.mesh'"))?;
        let mesh_path = compose_path(base, &mesh_file);

        let mut config = Self::default();

        if let Some(origin) = &ref_node.origin {
            config.reference_mesh_origin =
                Origin::from_yaml(origin).map_err(|m| Error::config(path, m))?;
        }

        config.reference_mesh = if let Some(labels) = &ref_node.labels {
            io::load_mesh_with_labels(&mesh_path, compose_path(base, labels))?
        } else if let Some(map_node) = &ref_node.color_to_label_map {
            match map_node.get("type").map(|t| t.as_str()) {
                Some(Some("default")) => io::load_mesh_with_color_map(&mesh_path, &DefaultColorMap)?,
                Some(Some("custom")) | None => {
                    let map = CustomColorMap::from_yaml(map_node)
                        .map_err(|e| Error::config(path, e.to_string()))?;
                    io::load_mesh_with_color_map(&mesh_path, &map)?
                }
                Some(other) => {
                    return Err(Error::config(
                        path,
                        format!("invalid color to label map type: {:?}", other),
                    ))
                }
            }
        } else {
            return Err(Error::config(
                path,
                "missing 'referenceMesh.labels' or 'referenceMesh.colorToLabelMap'",
            ));
        };

        if config.reference_mesh.is_empty() {
            return Err(Error::config(path, "reference mesh is empty"));
        }

        config.model = MeasurementModel::from_file(compose_path(base, &model_file))?;

        if let Some(v) = raw.sigma_e {
            config.sigma_e = v;
        }
        if let Some(v) = raw.sigma_s {
            config.sigma_s = v;
        }
        if let Some(v) = raw.max_iterations {
            config.max_iterations = v;
        }
        if let Some(v) = raw.min_non_decreasing {
            config.min_non_decreasing = v;
        }
        if let Some(v) = raw.max_non_decreasing {
            config.max_non_decreasing = v;
        }
        if let Some(v) = raw.decay {
            config.decay = v;
        }
        config
            .validate()
            .map_err(|e| Error::config(path, e.to_string()))?;

        info!(
            path = %path.display(),
            vertices = config.reference_mesh.vertex_count(),
            labels = config.model.label_count(),
            "loaded configuration"
        );
        Ok(config)
    }
}

fn compose_path(base: &Path, relative: &str) -> PathBuf {
    let p = Path::new(relative);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::save_mesh_with_color_map;
    use crate::labels::{DefaultLabelToColorMap, Label};
    use crate::mesh::tests::tetrahedron;
    use crate::model::encode_grid;
    use crate::volume::{VolumeSize, VoxelSize};

    const MODEL: &str = "kernel:\n  sigma: 1\nsliceSpacing: 1\n\
        samplingRange: {min: -1, max: 1, stride: 1}\n\
        densityRange: {min: 0, max: 1, stride: 1}\n\
        angleRange: {min: 0, max: 90, stride: 90}\n";

    fn write_fixture(dir: &Path) {
        let mesh = tetrahedron();
        save_mesh_with_color_map(&mesh, dir.join("mesh.off"), &DefaultLabelToColorMap).unwrap();
        std::fs::write(dir.join("mesh.labels"), "5\n6\n7\n8\n").unwrap();
        let model = format!("{}data: {}\n", MODEL, encode_grid(&[0.5; 12]));
        std::fs::write(dir.join("model.yml"), model).unwrap();
    }

    fn labels_of(config: &Configuration) -> Vec<Label> {
        config.reference_mesh.labels().to_vec()
    }

    #[test]
    fn test_load_with_label_file() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            "referenceMesh:\n  mesh: mesh.off\n  labels: mesh.labels\nmeasurementModel: model.yml\nsigmaE: 3.5\n",
        )
        .unwrap();
        let config = Configuration::from_file(&path).unwrap();
        assert_eq!(labels_of(&config), vec![5, 6, 7, 8]);
        assert_eq!(config.sigma_e, 3.5);
        assert_eq!(config.sigma_s, 2.0);
        assert_eq!(config.reference_mesh_origin, Origin::Centered);
        assert_eq!(config.model.label_count(), 1);
    }

    #[test]
    fn test_load_with_default_color_map() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            "referenceMesh:\n  mesh: mesh.off\n  colorToLabelMap: {type: default}\n  origin: untouched\nmeasurementModel: model.yml\n",
        )
        .unwrap();
        let config = Configuration::from_file(&path).unwrap();
        // the fixture mesh was written with label i at vertex i
        assert_eq!(labels_of(&config), vec![0, 1, 2, 3]);
        assert_eq!(config.reference_mesh_origin, Origin::Untouched);
    }

    #[test]
    fn test_load_with_custom_color_map() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            "referenceMesh:\n  mesh: mesh.off\n  colorToLabelMap:\n    type: custom\n    map: [[[1, 0, 0], 9]]\n    undefinedLabel: 4\n\
             \n  origin: {type: relative, xyz: [0.5, 0.25, 1]}\nmeasurementModel: model.yml\n",
        )
        .unwrap();
        let config = Configuration::from_file(&path).unwrap();
        assert_eq!(labels_of(&config), vec![4, 9, 4, 4]);
        assert_eq!(config.reference_mesh_origin, Origin::Relative(Vector3::new(0.5, 0.25, 1.0)));
    }

    #[test]
    fn test_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let path = dir.path().join("config.yml");
        for (text, key) in [
            ("measurementModel: model.yml\n", "referenceMesh"),
            ("referenceMesh:\n  mesh: mesh.off\n  labels: mesh.labels\n", "measurementModel"),
            ("referenceMesh:\n  labels: mesh.labels\nmeasurementModel: model.yml\n", "referenceMesh.mesh"),
            ("referenceMesh:\n  mesh: mesh.off\nmeasurementModel: model.yml\n", "colorToLabelMap"),
        ] {
            std::fs::write(&path, text).unwrap();
            let err = Configuration::from_file(&path).unwrap_err();
            assert!(err.to_string().contains(key), "{} not in {}", key, err);
        }
    }

    #[test]
    fn test_rejects_non_positive_tuning() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let path = dir.path().join("config.yml");
        let base = "referenceMesh:\n  mesh: mesh.off\n  labels: mesh.labels\nmeasurementModel: model.yml\n";
        for (extra, key) in [
            ("sigmaS: 0", "sigmaS"),
            ("sigmaE: -1", "sigmaE"),
            ("decay: 0", "decay"),
            ("minNonDecreasing: 0", "minNonDecreasing"),
            ("maxNonDecreasing: 0", "maxNonDecreasing"),
        ] {
            std::fs::write(&path, format!("{}{}\n", base, extra)).unwrap();
            match Configuration::from_file(&path) {
                Err(err @ Error::Config { .. }) => assert!(err.to_string().contains(key), "{}", err),
                other => panic!("{} accepted: {:?}", extra, other.map(|c| c.sigma_s)),
            }
        }
        std::fs::write(&path, format!("{}decay: 0.5\nsigmaS: 0.25\n", base)).unwrap();
        let config = Configuration::from_file(&path).unwrap();
        assert_eq!((config.decay, config.sigma_s), (0.5, 0.25));
    }

    #[test]
    fn test_validate_builder_values() {
        let config = Configuration::new(MeasurementModel::default(), tetrahedron());
        assert!(config.validate().is_ok());
        assert!(matches!(
            config.clone().with_sigma_s(0.0).validate(),
            Err(Error::InvalidParameter { name: "sigmaS", .. })
        ));
        assert!(config.with_sigma_e(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_invalid_origin() {
        for text in ["sideways", "{type: absolute}", "{type: absolute, xyz: [1, 2]}", "{xyz: [1, 2, 3]}"] {
            let node: Value = serde_yaml::from_str(text).unwrap();
            assert!(Origin::from_yaml(&node).is_err(), "accepted {}", text);
        }
        let node: Value = serde_yaml::from_str("{type: absolute, xyz: [1, 2, 3.5]}").unwrap();
        assert_eq!(Origin::from_yaml(&node).unwrap(), Origin::Absolute(Vector3::new(1.0, 2.0, 3.5)));
    }

    #[test]
    fn test_origin_target() {
        let vol = VoxelVolume::new(VolumeSize::new(10, 10, 4), VoxelSize::new(1.0, 2.0, 0.5), vec![0.0; 400]).unwrap();
        assert_eq!(Origin::Untouched.target(&vol), None);
        assert_eq!(Origin::Centered.target(&vol), Some(Point3::new(5.0, 10.0, 1.0)));
        assert_eq!(
            Origin::Relative(Vector3::new(0.0, 0.5, 1.0)).target(&vol),
            Some(Point3::new(0.0, 10.0, 2.0))
        );
        assert_eq!(
            Origin::Absolute(Vector3::new(1.0, 2.0, 3.0)).target(&vol),
            Some(Point3::new(1.0, 2.0, 3.0))
        );
    }

    #[test]
    fn test_builders() {
        let config = Configuration::new(MeasurementModel::default(), tetrahedron())
            .with_sigma_e(1.0)
            .with_sigma_s(0.5)
            .with_max_iterations(3)
            .with_origin(Origin::Untouched);
        assert_eq!(config.sigma_e, 1.0);
        assert_eq!(config.sigma_s, 0.5);
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.decay, 0.9);
    }
}
