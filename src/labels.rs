//! Conversion between vertex colors and vertex labels.
//!
//! Reference meshes are commonly authored with per-vertex colors where each
//! color marks one anatomical region. A [`ColorToLabel`] map turns those colors
//! into the integer labels the measurement model is indexed by, and a
//! [`LabelToColor`] map does the reverse when writing results.
//!
//! Color components are passed as `f64` in `[0, 1]`.
//!
//! # Example
//!
//! ```
//! use cortid::labels::{ColorToLabel, CustomColorMap, DefaultColorMap};
//!
//! assert_eq!(DefaultColorMap.label(1.0, 0.0, 0.0), 255);
//! assert_eq!(CustomColorMap::default().label(0.0, 0.0, 1.0), 3);
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde_yaml::Value;

use crate::error::{Error, Result};

/// Per-vertex label type.
pub type Label = u32;

/// 8 bit RGB color.
pub type ColorRgb = [u8; 3];

/// Maps an RGB color to a label.
pub trait ColorToLabel {
    /// Label for the color with components in `[0, 1]`.
    fn label(&self, red: f64, green: f64, blue: f64) -> Label;
}

impl<F> ColorToLabel for F
where
    F: Fn(f64, f64, f64) -> Label,
{
    fn label(&self, red: f64, green: f64, blue: f64) -> Label {
        self(red, green, blue)
    }
}

/// Maps a label to an RGB color.
pub trait LabelToColor {
    /// Color with components in `[0, 1]` for the given label.
    fn color(&self, label: Label) -> Result<[f64; 3]>;
}

/// Scale a `[0, 1]` component to a byte.
#[inline]
fn to_byte(component: f64) -> u8 {
    (component * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Packs a color into `blue * 256^2 + green * 256 + red`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultColorMap;

impl ColorToLabel for DefaultColorMap {
    fn label(&self, red: f64, green: f64, blue: f64) -> Label {
        let r = to_byte(red) as Label;
        let g = to_byte(green) as Label;
        let b = to_byte(blue) as Label;
        b << 16 | g << 8 | r
    }
}

/// Inverse of [`DefaultColorMap`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultLabelToColorMap;

impl LabelToColor for DefaultLabelToColorMap {
    fn color(&self, label: Label) -> Result<[f64; 3]> {
        if label > 0x00ff_ffff {
            return Err(Error::LabelOutOfRange(label));
        }
        let red = (label & 0xff) as f64 / 255.0;
        let green = ((label >> 8) & 0xff) as f64 / 255.0;
        let blue = ((label >> 16) & 0xff) as f64 / 255.0;
        Ok([red, green, blue])
    }
}

/// Table based color to label map.
///
/// Colors not found in the table map to `undefined_label`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomColorMap {
    /// Color to label table.
    pub table: HashMap<ColorRgb, Label>,
    /// Label for colors missing from the table.
    pub undefined_label: Label,
}

impl Default for CustomColorMap {
    /// Red, green, yellow, blue, magenta and cyan mapped to labels 0 to 5.
    fn default() -> Self {
        let table = [
            ([255, 0, 0], 0),
            ([0, 255, 0], 1),
            ([255, 255, 0], 2),
            ([0, 0, 255], 3),
            ([255, 0, 255], 4),
            ([0, 255, 255], 5),
        ]
        .into_iter()
        .collect();
        Self {
            table,
            undefined_label: 0,
        }
    }
}

impl ColorToLabel for CustomColorMap {
    fn label(&self, red: f64, green: f64, blue: f64) -> Label {
        let key = [to_byte(red), to_byte(green), to_byte(blue)];
        self.table.get(&key).copied().unwrap_or(self.undefined_label)
    }
}

impl CustomColorMap {
    /// Create a map from a table.
    pub fn new(table: HashMap<ColorRgb, Label>, undefined_label: Label) -> Self {
        Self {
            table,
            undefined_label,
        }
    }

    /// Load a map from a YAML file.
    ///
    /// See [`CustomColorMap::from_yaml`] for the accepted layout.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let value: Value = serde_yaml::from_str(&text)?;
        Self::from_yaml(&value).map_err(|e| Error::load(path, e.to_string()))
    }

    /// Build a map from a parsed YAML node.
    ///
    /// The node is either a sequence of `[[r, g, b], label]` entries or a
    /// mapping with such a sequence under `map` and an optional
    /// `undefinedLabel`.
    pub fn from_yaml(node: &Value) -> Result<Self> {
        let entries = match node {
            Value::Sequence(seq) => seq,
            Value::Mapping(map) => match map.get("map") {
                Some(Value::Sequence(seq)) => seq,
                Some(_) => return Err(Error::parse("'map' must be a sequence")),
                None => return Err(Error::parse("missing 'map' entry")),
            },
            _ => {
                return Err(Error::parse(
                    "custom color map node must be a sequence or a map",
                ))
            }
        };

        let mut table = HashMap::with_capacity(entries.len());
        for entry in entries {
            let pair = match entry {
                Value::Sequence(pair) if pair.len() == 2 => pair,
                _ => return Err(Error::parse("color table entry must be a sequence of length 2")),
            };
            let color = parse_color(&pair[0])?;
            let label = parse_label(&pair[1])?;
            table.insert(color, label);
        }

        let undefined_label = match node.get("undefinedLabel") {
            Some(v) => parse_label(v)?,
            None => 0,
        };

        Ok(Self::new(table, undefined_label))
    }
}

fn parse_color(node: &Value) -> Result<ColorRgb> {
    let components = match node {
        Value::Sequence(seq) if seq.len() == 3 => seq,
        _ => return Err(Error::parse("a color entry must be a sequence of length 3")),
    };
    let mut color = [0u8; 3];
    for (c, v) in color.iter_mut().zip(components) {
        let raw = v
            .as_u64()
            .ok_or_else(|| Error::parse("color components must be unsigned integers"))?;
        *c = u8::try_from(raw).map_err(|_| Error::invalid_param("color", raw, "exceeds 255"))?;
    }
    Ok(color)
}

fn parse_label(node: &Value) -> Result<Label> {
    let raw = node
        .as_u64()
        .ok_or_else(|| Error::parse("label entry must be an unsigned integer"))?;
    Label::try_from(raw).map_err(|_| Error::invalid_param("label", raw, "exceeds 32 bits"))
}
