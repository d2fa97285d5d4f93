//! PLY (Stanford polygon) format support.
//!
//! This module provides loading and saving of meshes in the PLY format,
//! also known as the Polygon File Format or Stanford Triangle Format.
//! Vertex colors are read from `red`, `green` and `blue` properties.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::Point3;
use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, Property};

use super::MeshData;
use crate::error::{Error, Result};

/// Read a PLY file.
///
/// # Example
///
/// ```no_run
/// use cortid::io::ply;
///
/// let data = ply::read("model.ply").unwrap();
/// println!("{} vertices", data.vertices.len());
/// ```
pub fn read<P: AsRef<Path>>(path: P) -> Result<MeshData> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let parser = Parser::<DefaultElement>::new();
    let ply = parser
        .read_ply(&mut reader)
        .map_err(|e| Error::load(path, e.to_string()))?;

    let vertex_element = ply
        .payload
        .get("vertex")
        .ok_or_else(|| Error::load(path, "PLY file has no vertex element"))?;

    let mut vertices: Vec<Point3<f64>> = Vec::with_capacity(vertex_element.len());
    let mut colors: Vec<[f64; 3]> = Vec::with_capacity(vertex_element.len());
    for vertex in vertex_element {
        let coord = |name: &str| {
            get_float_property(vertex, name)
                .ok_or_else(|| Error::load(path, format!("vertex missing {} coordinate", name)))
        };
        vertices.push(Point3::new(coord("x")?, coord("y")?, coord("z")?));

        if let (Some(r), Some(g), Some(b)) = (
            get_color_property(vertex, "red"),
            get_color_property(vertex, "green"),
            get_color_property(vertex, "blue"),
        ) {
            colors.push([r, g, b]);
        }
    }

    let face_element = ply
        .payload
        .get("face")
        .ok_or_else(|| Error::load(path, "PLY file has no face element"))?;

    let mut faces: Vec<[usize; 3]> = Vec::with_capacity(face_element.len());
    for face in face_element {
        let indices = get_list_property(face, "vertex_indices")
            .or_else(|| get_list_property(face, "vertex_index"))
            .ok_or_else(|| Error::load(path, "face missing vertex_indices property"))?;

        if indices.len() == 3 {
            faces.push([indices[0], indices[1], indices[2]]);
        } else if indices.len() > 3 {
            for i in 1..indices.len() - 1 {
                faces.push([indices[0], indices[i], indices[i + 1]]);
            }
        }
    }

    let colors = if !vertices.is_empty() && colors.len() == vertices.len() {
        Some(colors)
    } else {
        None
    };

    Ok(MeshData {
        vertices,
        faces,
        colors,
    })
}

fn get_float_property(element: &DefaultElement, name: &str) -> Option<f64> {
    match element.get(name)? {
        Property::Float(v) => Some(*v as f64),
        Property::Double(v) => Some(*v),
        Property::Int(v) => Some(*v as f64),
        Property::UInt(v) => Some(*v as f64),
        Property::Short(v) => Some(*v as f64),
        Property::UShort(v) => Some(*v as f64),
        Property::Char(v) => Some(*v as f64),
        Property::UChar(v) => Some(*v as f64),
        _ => None,
    }
}

/// Color component in `[0, 1]`; integer properties are bytes.
fn get_color_property(element: &DefaultElement, name: &str) -> Option<f64> {
    match element.get(name)? {
        Property::Float(v) => Some(*v as f64),
        Property::Double(v) => Some(*v),
        Property::UChar(v) => Some(*v as f64 / 255.0),
        Property::Int(v) => Some(*v as f64 / 255.0),
        Property::UInt(v) => Some(*v as f64 / 255.0),
        _ => None,
    }
}

fn get_list_property(element: &DefaultElement, name: &str) -> Option<Vec<usize>> {
    match element.get(name)? {
        Property::ListInt(v) => Some(v.iter().map(|&x| x as usize).collect()),
        Property::ListUInt(v) => Some(v.iter().map(|&x| x as usize).collect()),
        Property::ListShort(v) => Some(v.iter().map(|&x| x as usize).collect()),
        Property::ListUShort(v) => Some(v.iter().map(|&x| x as usize).collect()),
        Property::ListChar(v) => Some(v.iter().map(|&x| x as usize).collect()),
        Property::ListUChar(v) => Some(v.iter().map(|&x| x as usize).collect()),
        _ => None,
    }
}

/// Write a PLY file (ASCII format) with `double` coordinates and, when
/// present, `uchar` colors.
pub fn write<P: AsRef<Path>>(data: &MeshData, path: P) -> Result<()> {
    let path = path.as_ref();
    data.check_colors()?;
    File::create(path)
        .and_then(|file| write_to(data, BufWriter::new(file)))
        .map_err(|e| Error::save(path, e.to_string()))
}

fn write_to<W: Write>(data: &MeshData, mut writer: W) -> std::io::Result<()> {
    writeln!(writer, "ply")?;
    writeln!(writer, "format ascii 1.0")?;
    writeln!(writer, "comment Generated by cortid")?;
    writeln!(writer, "element vertex {}", data.vertices.len())?;
    for axis in ["x", "y", "z"] {
        writeln!(writer, "property double {}", axis)?;
    }
    if data.colors.is_some() {
        for channel in ["red", "green", "blue"] {
            writeln!(writer, "property uchar {}", channel)?;
        }
    }
    writeln!(writer, "element face {}", data.faces.len())?;
    writeln!(writer, "property list uchar int vertex_indices")?;
    writeln!(writer, "end_header")?;

    for (i, v) in data.vertices.iter().enumerate() {
        match data.colors.as_ref().map(|c| c[i]) {
            Some(c) => {
                let [r, g, b] = c.map(|x| (x * 255.0).round().clamp(0.0, 255.0) as u8);
                writeln!(writer, "{} {} {} {} {} {}", v.x, v.y, v.z, r, g, b)?
            }
            None => writeln!(writer, "{} {} {}", v.x, v.y, v.z)?,
        }
    }

    for f in &data.faces {
        writeln!(writer, "3 {} {} {}", f[0], f[1], f[2])?;
    }

    writer.flush()
}
