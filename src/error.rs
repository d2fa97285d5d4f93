//! Error types for cortid.
//!
//! This module defines all error types used throughout the library.

use std::path::PathBuf;
use thiserror::Error;

use crate::labels::Label;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading data or fitting a mesh.
#[derive(Error, Debug)]
pub enum Error {
    /// The mesh has vertices but no faces.
    #[error("mesh has no faces")]
    EmptyMesh,

    /// A face references an invalid vertex index.
    #[error("face {face} references invalid vertex index {vertex}")]
    InvalidVertexIndex {
        /// The face index.
        face: usize,
        /// The invalid vertex index.
        vertex: usize,
    },

    /// A face has duplicate vertex indices (degenerate triangle).
    #[error("face {face} is degenerate (has duplicate vertices)")]
    DegenerateFace {
        /// The face index.
        face: usize,
    },

    /// Number of per-vertex labels differs from the number of vertices.
    #[error("expected {expected} labels, got {actual}")]
    LabelCountMismatch {
        /// Number of vertices.
        expected: usize,
        /// Number of labels supplied.
        actual: usize,
    },

    /// Two inputs that must agree in size do not.
    #[error("dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// What was being compared.
        what: &'static str,
        /// Expected size.
        expected: usize,
        /// Actual size.
        actual: usize,
    },

    /// The measurement model has no data for the requested label.
    #[error("measurement model has no data for label {0}")]
    UnknownLabel(Label),

    /// A label cannot be represented as an RGB color.
    #[error("label {0} does not fit into a 24 bit color")]
    LabelOutOfRange(Label),

    /// A barycentric point references a triangle that does not exist.
    #[error("triangle index {index} out of range (mesh has {count} triangles)")]
    InvalidTriangleIndex {
        /// The offending triangle index.
        index: usize,
        /// Number of triangles in the mesh.
        count: usize,
    },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML syntax or type error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A configuration or model file is missing a key or holds a bad value.
    #[error("invalid configuration in {path}: {message}")]
    Config {
        /// The file path.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Malformed model, color map or other structured input.
    #[error("malformed input: {0}")]
    Parse(String),

    /// Error loading data from file.
    #[error("failed to load {path}: {message}")]
    LoadError {
        /// The file path.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Error saving data to file.
    #[error("failed to save {path}: {message}")]
    SaveError {
        /// The file path.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Unsupported file format.
    #[error("unsupported file format: {extension}")]
    UnsupportedFormat {
        /// The file extension.
        extension: String,
    },

    /// Invalid state for the requested operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Algorithm failed to converge.
    #[error("algorithm failed to converge after {iterations} iterations")]
    ConvergenceFailed {
        /// Number of iterations attempted.
        iterations: usize,
    },

    /// Invalid parameter value.
    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// The invalid value (as string).
        value: String,
        /// Reason the value is invalid.
        reason: &'static str,
    },
}

impl Error {
    /// Create an invalid parameter error.
    pub fn invalid_param<T: std::fmt::Display>(
        name: &'static str,
        value: T,
        reason: &'static str,
    ) -> Self {
        Error::InvalidParameter {
            name,
            value: value.to_string(),
            reason,
        }
    }

    /// Create a configuration error for the given file.
    pub fn config<P: Into<PathBuf>, M: Into<String>>(path: P, message: M) -> Self {
        Error::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a parse error.
    pub fn parse<M: Into<String>>(message: M) -> Self {
        Error::Parse(message.into())
    }

    /// Create a save error for the given file.
    pub fn save<P: Into<PathBuf>, M: Into<String>>(path: P, message: M) -> Self {
        Error::SaveError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a load error for the given file.
    pub fn load<P: Into<PathBuf>, M: Into<String>>(path: P, message: M) -> Self {
        Error::LoadError {
            path: path.into(),
            message: message.into(),
        }
    }
}
