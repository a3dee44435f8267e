//! bricklayers CLI - interlock inner wall seams in sliced G-code
//!
//! Standalone front end for slicers without a post-processing plugin host.

use anyhow::{Context, Result};
use bricklayers::host::definition;
use bricklayers::{inspect, parse_layer_list, transform, Dialect, Settings, TransformStats};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bricklayers")]
#[command(about = "Stagger inner wall seams between layers of sliced G-code", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite a G-code file
    Process(ProcessArgs),
    /// Show the layers and wall loops found in a G-code file
    Inspect {
        /// Input G-code file
        input: PathBuf,
        /// Marker dialect (cura, prusa, orca)
        #[arg(long, default_value = "cura")]
        dialect: String,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the post-processing settings definition for the slicer
    Definition,
}

#[derive(Args)]
struct ProcessArgs {
    /// Input G-code file
    input: PathBuf,
    /// Output file (default: overwrite the input)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Settings file (.toml or .json)
    #[arg(long)]
    settings: Option<PathBuf>,
    /// First layer index to interlock
    #[arg(long)]
    start_layer: Option<i64>,
    /// Extrusion multiplier for relocated wall halves
    #[arg(long)]
    multiplier: Option<f64>,
    /// Layers to leave untouched, e.g. "3,4"
    #[arg(long)]
    ignore: Option<String>,
    /// Marker dialect (cura, prusa, orca)
    #[arg(long)]
    dialect: Option<String>,
    /// Pass the file through unchanged
    #[arg(long)]
    disable: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Process(args) => {
            process_file(&args)?;
        }
        Commands::Inspect {
            input,
            dialect,
            json,
        } => {
            show_layers(&input, &dialect, json)?;
        }
        Commands::Definition => {
            println!("{}", definition().to_json()?);
        }
    }

    Ok(())
}

fn dialect_named(name: &str) -> Result<Dialect> {
    Dialect::by_name(name).ok_or_else(|| {
        let known: Vec<String> = Dialect::all_dialects().into_iter().map(|d| d.name).collect();
        anyhow::anyhow!("Unknown dialect `{}` (known: {})", name, known.join(", "))
    })
}

fn load_settings(path: &Path) -> Result<Settings> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings {}", path.display()))?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let settings = match ext.to_lowercase().as_str() {
        "toml" => Settings::from_toml(&text)?,
        "json" => Settings::from_json(&text)?,
        _ => anyhow::bail!("Unknown settings format: {}", ext),
    };
    Ok(settings)
}

/// Settings file first, then command-line overrides.
fn resolve_settings(args: &ProcessArgs) -> Result<Settings> {
    let mut settings = match &args.settings {
        Some(path) => load_settings(path)?,
        None => Settings::default(),
    };
    if let Some(start) = args.start_layer {
        settings.start_layer = start;
    }
    if let Some(multiplier) = args.multiplier {
        settings.extrusion_multiplier = multiplier;
    }
    if let Some(ignore) = &args.ignore {
        settings.ignored_layers = parse_layer_list(ignore)?;
    }
    if let Some(name) = &args.dialect {
        settings.dialect = dialect_named(name)?;
    }
    if args.disable {
        settings.enabled = false;
    }
    Ok(settings)
}

fn process_file(args: &ProcessArgs) -> Result<TransformStats> {
    let settings = resolve_settings(args)?;
    let input = fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;

    let result = transform(&input, &settings)
        .with_context(|| format!("Failed to process {}", args.input.display()))?;

    for notice in &result.notices {
        warn!("{}", notice);
    }
    let stats = result.stats;
    debug!(?stats, "transform finished");
    info!(
        "{} layers, {} pairs, {} loops swapped, {} travels added",
        stats.layers, stats.pairs, stats.swapped_loops, stats.synthesized_moves
    );

    let output = args.output.as_ref().unwrap_or(&args.input);
    write_atomic(output, &result.output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!("Wrote {}", output.display());
    Ok(stats)
}

/// Write through a temporary file in the same directory, then rename it over
/// `path`.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    file.persist(path)?;
    Ok(())
}

fn show_layers(input: &Path, dialect: &str, json: bool) -> Result<()> {
    let dialect = dialect_named(dialect)?;
    let text = fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let layers = inspect(&text, &dialect)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&layers)?);
        return Ok(());
    }

    println!("G-code: {} ({} dialect)", input.display(), dialect.name);
    println!("  Layers: {}", layers.len());
    for layer in &layers {
        let kinds: Vec<String> = layer.segments.iter().map(|k| k.to_string()).collect();
        println!(
            "  {:>5}  z={:<8.3} inner loops: {:<3} moves: {:<6} [{}]",
            layer.index,
            layer.z,
            layer.inner_loops,
            layer.motions,
            kinds.join(", ")
        );
    }
    Ok(())
}
