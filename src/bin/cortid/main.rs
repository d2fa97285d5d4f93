//! cortid CLI - fit reference meshes to CT volumes.
//!
//! Usage: cortid <COMMAND> [OPTIONS] <INPUT> [OUTPUT]
//!
//! Run `cortid --help` for available commands.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cortid::algo::Progress;
use cortid::fitter::MeshFitter;
use cortid::io;
use cortid::labels::{CustomColorMap, DefaultLabelToColorMap};
use cortid::mesh::Mesh;
use cortid::volume::{VolumeSize, VoxelSize, VoxelVolume};

#[derive(Parser)]
#[command(name = "cortid")]
#[command(author, version, about = "Model based mesh fitting for CT volumes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the configured reference mesh to a volume
    Fit {
        /// Fitter configuration (YAML)
        config: PathBuf,

        /// Raw little-endian f32 volume
        volume: PathBuf,

        /// Output mesh file
        output: PathBuf,

        /// Also write per-vertex labels to this file
        #[arg(short, long)]
        labels: Option<PathBuf>,

        /// Volume dimensions in voxels, e.g. 512x512x200
        #[arg(short, long, value_parser = parse_volume_size)]
        size: VolumeSize,

        /// Voxel size, e.g. 0.4x0.4x1.0
        #[arg(short, long, value_parser = parse_voxel_size)]
        voxel_size: VoxelSize,

        /// Override the iteration limit of the configuration
        #[arg(short, long)]
        max_iterations: Option<usize>,
    },

    /// Convert a mesh, reading labels from a label file or a color map
    Convert {
        /// Input mesh file
        input: PathBuf,

        /// Label file, or a custom color map (.yml/.yaml), followed by the output mesh
        #[arg(num_args = 1..=2, required = true)]
        rest: Vec<PathBuf>,
    },

    /// Display mesh information
    Info {
        /// Input mesh file
        input: PathBuf,

        /// Per-vertex label file
        #[arg(short, long)]
        labels: Option<PathBuf>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Fit {
            config,
            volume,
            output,
            labels,
            size,
            voxel_size,
            max_iterations,
        } => {
            cmd_fit(&config, &volume, &output, labels.as_deref(), size, voxel_size, max_iterations)?;
        }

        Commands::Convert { input, rest } => match rest.as_slice() {
            [output] => cmd_convert(&input, None, output)?,
            [labels, output] => cmd_convert(&input, Some(labels.as_path()), output)?,
            _ => return Err("expected [LABELS] <OUTPUT>".into()),
        },

        Commands::Info { input, labels } => {
            cmd_info(&input, labels.as_deref())?;
        }
    }

    Ok(())
}

fn parse_triple(s: &str) -> Result<[f64; 3], String> {
    let parts: Vec<&str> = s.split(['x', 'X', ',']).collect();
    if parts.len() != 3 {
        return Err(format!("expected three values like 1x2x3, got '{}'", s));
    }
    let mut out = [0.0; 3];
    for (o, p) in out.iter_mut().zip(parts) {
        *o = p.trim().parse().map_err(|_| format!("invalid number '{}'", p))?;
    }
    Ok(out)
}

fn parse_volume_size(s: &str) -> Result<VolumeSize, String> {
    let [w, h, d] = parse_triple(s)?;
    if [w, h, d].iter().any(|v| v.fract() != 0.0 || *v < 1.0) {
        return Err(format!("volume dimensions must be positive integers, got '{}'", s));
    }
    Ok(VolumeSize::new(w as usize, h as usize, d as usize))
}

fn parse_voxel_size(s: &str) -> Result<VoxelSize, String> {
    let [w, h, d] = parse_triple(s)?;
    Ok(VoxelSize::new(w, h, d))
}

/// Create a progress reporter that displays a progress bar on the terminal.
fn create_progress() -> Progress {
    let max_percent = Arc::new(AtomicUsize::new(0));

    Progress::new(move |current, total, message| {
        if total == 0 {
            return;
        }

        let raw_percent = if current >= total {
            100
        } else {
            ((current * 100) + (total / 2)) / total
        };

        // Never move backwards
        let percent = max_percent.fetch_max(raw_percent, Ordering::Relaxed).max(raw_percent);

        let bar_width = 30;
        let filled = (percent * bar_width) / 100;
        let bar = "=".repeat(filled);
        let space = " ".repeat(bar_width - filled);

        eprint!("\r[{}{}] {:3}% {}", bar, space, percent, message);
        let _ = std::io::stderr().flush();

        if current >= total {
            eprintln!();
        }
    })
}

fn cmd_fit(
    config: &Path,
    volume: &Path,
    output: &Path,
    labels: Option<&Path>,
    size: VolumeSize,
    voxel_size: VoxelSize,
    max_iterations: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut fitter_config = cortid::config::Configuration::from_file(config)?;
    if let Some(n) = max_iterations {
        fitter_config.max_iterations = n;
    }
    println!(
        "Reference mesh: {} vertices, {} triangles",
        fitter_config.reference_mesh.vertex_count(),
        fitter_config.reference_mesh.triangle_count()
    );

    let volume = VoxelVolume::load_raw(volume, size, voxel_size)?;
    println!(
        "Volume: {}x{}x{} voxels of {}x{}x{}",
        size.width, size.height, size.depth, voxel_size.width, voxel_size.height, voxel_size.depth
    );

    let fitter = MeshFitter::new(fitter_config);
    let progress = create_progress();
    let start = Instant::now();
    let result = fitter.fit_with_progress(&volume, &progress)?;
    let elapsed = start.elapsed();

    println!(
        "Fit {} after {} iterations (log likelihood {:.3}, {:.2?})",
        if result.success { "converged" } else { "stopped" },
        result.iteration,
        result.log_likelihood,
        elapsed
    );

    match labels {
        Some(label_path) => io::save_mesh_with_labels(&result.deformed_mesh, output, label_path)?,
        None => io::save_mesh(&result.deformed_mesh, output)?,
    }
    println!("Saved: {}", output.display());
    Ok(())
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref(),
        Some("yml") | Some("yaml")
    )
}

fn cmd_convert(input: &Path, labels: Option<&Path>, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mesh = match labels {
        None => io::load_mesh(input)?,
        Some(map_path) if is_yaml(map_path) => {
            let map = CustomColorMap::from_file(map_path)?;
            io::load_mesh_with_color_map(input, &map)?
        }
        Some(label_path) => io::load_mesh_with_labels(input, label_path)?,
    };
    println!("Loaded: {} vertices, {} triangles", mesh.vertex_count(), mesh.triangle_count());

    io::save_mesh_with_color_map(&mesh, output, &DefaultLabelToColorMap)?;
    println!("Saved: {}", output.display());
    Ok(())
}

fn cmd_info(input: &Path, labels: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let mesh: Mesh = match labels {
        Some(label_path) => io::load_mesh_with_labels(input, label_path)?,
        None => io::load_mesh(input)?,
    };

    println!("File: {}", input.display());
    println!("Vertices: {}", mesh.vertex_count());
    println!("Triangles: {}", mesh.triangle_count());

    if let Some((min, max)) = mesh.bounding_box() {
        println!(
            "Bounding box: ({:.3}, {:.3}, {:.3}) to ({:.3}, {:.3}, {:.3})",
            min.x, min.y, min.z, max.x, max.y, max.z
        );
        let diag = max - min;
        println!("Dimensions: {:.3} x {:.3} x {:.3}", diag.x, diag.y, diag.z);
    }

    let c = mesh.centroid();
    println!("Centroid: ({:.3}, {:.3}, {:.3})", c.x, c.y, c.z);
    println!(
        "Orientation: {}",
        if mesh.is_outward_oriented() { "outward" } else { "inward" }
    );

    if labels.is_some() {
        println!("\nLabels:");
        for (label, count) in mesh.label_histogram() {
            println!("  {:>8}: {} vertices", label, count);
        }
    }

    Ok(())
}
