//! Segcore: multi-representation segmentation engine.
//!
//! A segmentation is an ordered set of segments, each held in one or more
//! representations (closed surface meshes, binary labelmaps). One
//! representation is the *master*; the others are derived from it through
//! costed conversion rules and dropped whenever the master changes.
//! Labelmaps of several segments can share one image, distinguished by
//! label value.
//!
//! # Modules
//!
//! - [`geometry`]: Oriented volumes, meshes, extents and resampling
//! - [`oversampling`]: Fuzzy estimation of rasterisation oversampling
//! - [`conversion`]: Conversion rules, path finding and parameters
//! - [`segmentation`]: Segments, segmentations, shared labelmap layers
//! - [`validation`]: Document validation and error reporting
//! - [`config`]: Conversion parameter files
//! - [`error`]: Error types for segcore operations

pub mod config;
pub mod conversion;
pub mod error;
pub mod geometry;
pub mod oversampling;
pub mod segmentation;
pub mod validation;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use log::{info, LevelFilter};

pub use error::{ErrorKind, SegmentationError};
pub use segmentation::{Segment, Segmentation};

use conversion::{default_image_geometry_for_surface, ConversionCounts, ConversionReport, RuleRegistry};
use geometry::SurfaceMesh;
use segmentation::io_json::{read_document_json, read_segmentation_json, write_segmentation_json};
use segmentation::{Representation, BINARY_LABELMAP, CLOSED_SURFACE};

/// The segcore CLI application.
#[derive(Parser)]
#[command(name = "segcore")]
#[command(version, author, about)]
#[command(propagate_version = true)]
struct Cli {
    /// Log debug messages.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Log errors only.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Build a surface segmentation from mesh files.
    Import(ImportArgs),
    /// Create a representation in every segment of a segmentation.
    Convert(ConvertArgs),
    /// Pack labelmaps into as few shared layers as possible.
    Collapse(CollapseArgs),
    /// Estimate the rasterisation oversampling factor of a mesh.
    Oversampling(OversamplingArgs),
    /// Validate a segmentation document for errors and warnings.
    Validate(ValidateArgs),
}

/// Arguments for the import subcommand.
#[derive(clap::Args)]
struct ImportArgs {
    /// Mesh files ('.obj' or mesh '.json'), one segment each.
    #[arg(required = true)]
    meshes: Vec<PathBuf>,

    /// Output segmentation document.
    #[arg(short, long)]
    output: PathBuf,

    /// Conversion parameter override as 'name=value' (repeatable).
    #[arg(long = "param", value_name = "NAME=VALUE")]
    params: Vec<String>,
}

/// Arguments for the convert subcommand.
#[derive(clap::Args)]
struct ConvertArgs {
    /// Input segmentation document.
    input: PathBuf,

    /// Target representation ('labelmap', 'surface', or a full name).
    #[arg(long)]
    to: String,

    /// Convert from the master even when the target already exists.
    #[arg(long)]
    always: bool,

    /// YAML or JSON conversion parameter file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Conversion parameter override as 'name=value' (repeatable).
    #[arg(long = "param", value_name = "NAME=VALUE")]
    params: Vec<String>,

    /// Where to write the converted document.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format for the report ('text' or 'json').
    #[arg(long, default_value = "text")]
    report: String,
}

/// Arguments for the collapse subcommand.
#[derive(clap::Args)]
struct CollapseArgs {
    /// Input segmentation document.
    input: PathBuf,

    /// Merge every segment into a single layer.
    #[arg(long)]
    force: bool,

    /// Output segmentation document.
    #[arg(short, long)]
    output: PathBuf,
}

/// Arguments for the oversampling subcommand.
#[derive(clap::Args)]
struct OversamplingArgs {
    /// Mesh file ('.obj' or mesh '.json').
    mesh: PathBuf,

    /// Reference image geometry string (defaults to a grid fitted to the mesh).
    #[arg(long)]
    reference: Option<String>,

    /// Output format ('text' or 'json').
    #[arg(long, default_value = "text")]
    output: String,
}

/// Arguments for the validate subcommand.
#[derive(clap::Args)]
struct ValidateArgs {
    /// Segmentation document to validate.
    input: PathBuf,

    /// Treat warnings as errors (exit non-zero if any warnings).
    #[arg(long)]
    strict: bool,

    /// Output format for the report ('text' or 'json').
    #[arg(long, default_value = "text")]
    output: String,
}

/// Run the segcore CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), SegmentationError> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Some(Commands::Import(args)) => run_import(args),
        Some(Commands::Convert(args)) => run_convert(args),
        Some(Commands::Collapse(args)) => run_collapse(args),
        Some(Commands::Oversampling(args)) => run_oversampling(args),
        Some(Commands::Validate(args)) => run_validate(args),
        None => {
            println!("segcore {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Multi-representation segmentation engine.");
            println!();
            println!("Run 'segcore --help' for usage information.");
            Ok(())
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else if quiet {
        LevelFilter::Error
    } else {
        LevelFilter::Warn
    };
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .without_timestamps()
        .init()
        .ok();
}

/// Accepts short aliases for the built-in representation names.
fn representation_name(text: &str) -> Result<&'static str, SegmentationError> {
    match text.to_ascii_lowercase().replace(['-', '_'], " ").as_str() {
        "labelmap" | "binary labelmap" => Ok(BINARY_LABELMAP),
        "surface" | "closed surface" => Ok(CLOSED_SURFACE),
        _ => Err(SegmentationError::UnsupportedFormat(format!(
            "representation '{}' (supported: labelmap, surface)",
            text
        ))),
    }
}

fn read_mesh(path: &Path) -> Result<SurfaceMesh, SegmentationError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "obj" => geometry::io_obj::read_obj(path),
        "json" => geometry::io_json::read_mesh_json(path),
        other => Err(SegmentationError::UnsupportedFormat(format!(
            "mesh extension '{}' (supported: obj, json)",
            other
        ))),
    }
}

fn apply_parameters(
    segmentation: &mut Segmentation,
    config: Option<&Path>,
    overrides: &[String],
) -> Result<(), SegmentationError> {
    if let Some(path) = config {
        let parameters = config::load_parameter_file(path)?;
        for (name, parameter) in parameters.iter() {
            segmentation.set_conversion_parameter(name, parameter.value.clone());
        }
    }
    for text in overrides {
        let (name, value) = config::parse_parameter_override(text)?;
        segmentation.set_conversion_parameter(&name, value);
    }
    Ok(())
}

fn counts(segmentation: &Segmentation) -> ConversionCounts {
    ConversionCounts {
        segments: segmentation.number_of_segments(),
        labelmap_layers: segmentation.number_of_layers(),
        representations: segmentation.contained_representation_names().len(),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), SegmentationError> {
    let text = serde_json::to_string_pretty(value).map_err(|source| SegmentationError::JsonWrite {
        path: PathBuf::from("<stdout>"),
        source,
    })?;
    println!("{}", text);
    Ok(())
}

/// Execute the import subcommand.
fn run_import(args: ImportArgs) -> Result<(), SegmentationError> {
    let mut segmentation = Segmentation::with_default_rules(CLOSED_SURFACE);
    apply_parameters(&mut segmentation, None, &args.params)?;

    for path in &args.meshes {
        let mesh = read_mesh(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let segment = Segment::new(name).with_representation(CLOSED_SURFACE, Representation::closed_surface(mesh));
        let id = segmentation.add_segment(segment, None, None)?;
        info!("Imported {} as segment '{}'", path.display(), id);
    }

    write_segmentation_json(&args.output, &segmentation)?;
    println!(
        "Imported {} segment(s) into {}",
        segmentation.number_of_segments(),
        args.output.display()
    );
    Ok(())
}

/// Execute the convert subcommand.
fn run_convert(args: ConvertArgs) -> Result<(), SegmentationError> {
    let target = representation_name(&args.to)?;
    let registry = RuleRegistry::with_default_rules();
    let mut segmentation = read_segmentation_json(&args.input, &registry)?;
    apply_parameters(&mut segmentation, args.config.as_deref(), &args.params)?;

    let mut report = if !args.always && segmentation.contains_representation(target) {
        let mut report = ConversionReport::new(target, target);
        report.path = vec![target.to_string()];
        report
    } else {
        let sources = if args.always {
            vec![segmentation.master_representation_name().to_string()]
        } else {
            segmentation.contained_representation_names()
        };
        let path = segmentation
            .converter()
            .cheapest_path_from(sources.iter().map(String::as_str), target)
            .ok_or_else(|| SegmentationError::NoConversionPath {
                from: sources.join(", "),
                to: target.to_string(),
            })?;
        segmentation.converter().build_conversion_report(&path)
    };

    report.input = counts(&segmentation);
    segmentation.create_representation(target, args.always)?;
    report.output = counts(&segmentation);

    match args.report.as_str() {
        "json" => print_json(&report)?,
        _ => {
            println!("Converted {} -> {}", report.from, report.to);
            print!("{}", report);
        }
    }

    if let Some(output) = &args.output {
        write_segmentation_json(output, &segmentation)?;
    }
    Ok(())
}

/// Execute the collapse subcommand.
fn run_collapse(args: CollapseArgs) -> Result<(), SegmentationError> {
    let registry = RuleRegistry::with_default_rules();
    let mut segmentation = read_segmentation_json(&args.input, &registry)?;
    let before = segmentation.number_of_layers();
    segmentation.collapse_binary_labelmaps(args.force)?;
    let after = segmentation.number_of_layers();

    write_segmentation_json(&args.output, &segmentation)?;
    println!("Collapsed {} labelmap layer(s) into {}", before, after);
    Ok(())
}

/// Execute the oversampling subcommand.
fn run_oversampling(args: OversamplingArgs) -> Result<(), SegmentationError> {
    let mesh = read_mesh(&args.mesh)?;
    let reference = match &args.reference {
        Some(text) => geometry::deserialize_image_geometry(text)?,
        None => default_image_geometry_for_surface(&mesh),
    };
    let estimate = oversampling::OversamplingEstimator::new().estimate(&mesh, &reference)?;

    match args.output.as_str() {
        "json" => print_json(&serde_json::json!({
            "volume": estimate.mass_properties.volume,
            "surface_area": estimate.mass_properties.surface_area,
            "normalized_shape_index": estimate.mass_properties.normalized_shape_index,
            "relative_structure_size": estimate.relative_structure_size,
            "complexity": estimate.complexity,
            "power": estimate.power,
            "factor": estimate.factor,
        }))?,
        _ => {
            println!("Volume:                  {:.6}", estimate.mass_properties.volume);
            println!("Surface area:            {:.6}", estimate.mass_properties.surface_area);
            println!("Relative structure size: {:.6}", estimate.relative_structure_size);
            println!("Complexity:              {:.6}", estimate.complexity);
            println!("Oversampling factor:     {} (2^{})", estimate.factor, estimate.power);
        }
    }
    Ok(())
}

/// Execute the validate subcommand.
fn run_validate(args: ValidateArgs) -> Result<(), SegmentationError> {
    let document = read_document_json(&args.input)?;

    let opts = validation::ValidateOptions {
        strict: args.strict,
    };
    let report = validation::validate_document(&document, &opts);

    match args.output.as_str() {
        "json" => print_json(&serde_json::json!({
            "error_count": report.error_count(),
            "warning_count": report.warning_count(),
            "issues": report.issues,
        }))?,
        _ => print!("{}", report),
    }

    let has_errors = report.error_count() > 0;
    let has_warnings = report.warning_count() > 0;

    if has_errors || (args.strict && has_warnings) {
        Err(SegmentationError::ValidationFailed {
            error_count: report.error_count(),
            warning_count: report.warning_count(),
            report,
        })
    } else {
        Ok(())
    }
}
