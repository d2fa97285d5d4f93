//! Per-vertex label files.
//!
//! A label file holds one unsigned integer per vertex, separated by
//! whitespace. Files written here put each label on its own line.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::labels::Label;

/// Read exactly `expected` labels from a file.
pub fn read<P: AsRef<Path>>(path: P, expected: usize) -> Result<Vec<Label>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let labels = text
        .split_whitespace()
        .map(|token| {
            token
                .parse::<Label>()
                .map_err(|_| Error::load(path, format!("invalid label '{}'", token)))
        })
        .collect::<Result<Vec<_>>>()?;

    if labels.len() != expected {
        return Err(Error::load(
            path,
            format!("expected {} labels, found {}", expected, labels.len()),
        ));
    }
    Ok(labels)
}

/// Write one label per line.
pub fn write<P: AsRef<Path>>(labels: &[Label], path: P) -> Result<()> {
    let path = path.as_ref();
    File::create(path)
        .and_then(|file| {
            let mut writer = BufWriter::new(file);
            for label in labels {
                writeln!(writer, "{}", label)?;
            }
            writer.flush()
        })
        .map_err(|e| Error::save(path, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_any_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.labels");
        std::fs::write(&path, "1 2\n\t3\n  4\n").unwrap();
        assert_eq!(read(&path, 4).unwrap(), vec![1, 2, 3, 4]);
        assert!(read(&path, 5).is_err());
    }

    #[test]
    fn test_read_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.labels");
        std::fs::write(&path, "1 -2 3").unwrap();
        let err = read(&path, 3).unwrap_err();
        assert!(err.to_string().contains("-2"));
    }

    #[test]
    fn test_write_one_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.labels");
        write(&[7, 0, 42], &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "7\n0\n42\n");
    }
}
