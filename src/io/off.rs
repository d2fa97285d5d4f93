//! Object File Format (OFF) support.
//!
//! Reads `OFF`, `COFF`, `NOFF` and `CNOFF` files. Per-vertex colors follow
//! the coordinates (and normals, if present) on each vertex line; an optional
//! alpha component is ignored. Colors may be given as bytes or in `[0, 1]`.
//! Polygons with more than three corners are fan triangulated.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use nalgebra::Point3;

use super::{normalize_colors, MeshData};
use crate::error::{Error, Result};

/// Read an OFF file.
pub fn read<P: AsRef<Path>>(path: P) -> Result<MeshData> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    parse(&text).map_err(|message| Error::load(path, message))
}

fn parse(text: &str) -> std::result::Result<MeshData, String> {
    let mut lines = text
        .lines()
        .map(|l| l.split('#').next().unwrap_or("").trim())
        .filter(|l| !l.is_empty());

    let header = lines.next().ok_or("file is empty")?;
    let mut header_tokens = header.split_whitespace();
    let keyword = header_tokens.next().unwrap_or("");
    if !keyword.ends_with("OFF") {
        return Err(format!("invalid OFF header '{}'", keyword));
    }
    let prefix = &keyword[..keyword.len() - 3];
    let has_normals = prefix.contains('N');
    let has_colors = prefix.contains('C');

    // The counts may share the header line
    let mut counts: Vec<usize> = header_tokens.map(parse_token).collect::<std::result::Result<_, _>>()?;
    if counts.is_empty() {
        let line = lines.next().ok_or("missing element counts")?;
        counts = line.split_whitespace().map(parse_token).collect::<std::result::Result<_, _>>()?;
    }
    if counts.len() < 2 {
        return Err("missing element counts".into());
    }
    let (n_vertices, n_faces) = (counts[0], counts[1]);
    // Header counts are untrusted; every element needs a line of its own.
    let line_count = text.lines().count();

    let mut vertices = Vec::with_capacity(n_vertices.min(line_count));
    let mut colors = Vec::with_capacity(n_vertices.min(line_count));
    for i in 0..n_vertices {
        let line = lines.next().ok_or_else(|| format!("missing vertex {}", i))?;
        let values: Vec<f64> = line.split_whitespace().map(parse_token).collect::<std::result::Result<_, _>>()?;
        if values.len() < 3 {
            return Err(format!("vertex {} has fewer than 3 coordinates", i));
        }
        vertices.push(Point3::new(values[0], values[1], values[2]));

        let color_start = if has_normals { 6 } else { 3 };
        if values.len() >= color_start + 3 {
            colors.push([values[color_start], values[color_start + 1], values[color_start + 2]]);
        } else if has_colors {
            return Err(format!("vertex {} has no color", i));
        }
    }

    let mut faces = Vec::with_capacity(n_faces.min(line_count));
    for i in 0..n_faces {
        let line = lines.next().ok_or_else(|| format!("missing face {}", i))?;
        let mut tokens = line.split_whitespace();
        let corners: usize = parse_token(tokens.next().unwrap_or(""))?;
        let indices: Vec<usize> = tokens
            .take(corners)
            .map(parse_token)
            .collect::<std::result::Result<_, _>>()?;
        if indices.len() != corners || corners < 3 {
            return Err(format!("face {} is malformed", i));
        }
        for k in 1..corners - 1 {
            faces.push([indices[0], indices[k], indices[k + 1]]);
        }
    }

    let colors = if colors.len() == n_vertices && n_vertices > 0 {
        normalize_colors(&mut colors);
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

fn parse_token<T: std::str::FromStr>(token: &str) -> std::result::Result<T, String> {
    token
        .parse()
        .map_err(|_| format!("invalid number '{}'", token))
}

/// Write an OFF file, as `COFF` when colors are present.
///
/// Colors are written as floats in `[0, 1]` followed by an opaque alpha.
pub fn write<P: AsRef<Path>>(data: &MeshData, path: P) -> Result<()> {
    let path = path.as_ref();
    data.check_colors()?;
    File::create(path)
        .and_then(|file| write_to(data, BufWriter::new(file)))
        .map_err(|e| Error::save(path, e.to_string()))
}

fn write_to<W: Write>(data: &MeshData, mut writer: W) -> std::io::Result<()> {
    writeln!(writer, "{}", if data.colors.is_some() { "COFF" } else { "OFF" })?;
    writeln!(writer, "{} {} 0", data.vertices.len(), data.faces.len())?;

    for (i, v) in data.vertices.iter().enumerate() {
        match &data.colors {
            Some(colors) => {
                let [r, g, b] = colors[i];
                writeln!(writer, "{} {} {} {:.6} {:.6} {:.6} 1", v.x, v.y, v.z, r, g, b)?
            }
            None => writeln!(writer, "{} {} {}", v.x, v.y, v.z)?,
        }
    }

    for f in &data.faces {
        writeln!(writer, "3 {} {} {}", f[0], f[1], f[2])?;
    }

    writer.flush()
}
